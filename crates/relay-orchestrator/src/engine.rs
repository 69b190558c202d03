use crate::broadcaster::EventBroadcaster;
use crate::catalog::{WorkflowCatalog, PROJECT_PLACEHOLDER};
use crate::task_store::TaskStore;
use crate::types::{
    AgentRole, NewTask, StepDefinition, Task, TaskPayload, TaskStatus, Workflow, WorkflowLink,
    WorkflowStatus, WorkflowStep,
};
use chrono::{DateTime, Utc};
use relay_core::{EventKind, RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of one step-advance attempt.
///
/// Only `Progressed`, `ManualTriggerRequired` and `WorkflowCompleted` change
/// state; the rest are normal "nothing to do" answers, not errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepAdvance {
    /// The workflow had already exhausted its steps.
    AlreadyCompleted,
    /// The hinted step is behind the cursor; another call advanced it first.
    AlreadyAdvanced { step_id: String, current_step: usize },
    /// No task for the current step is completed yet.
    StepPending { step_id: String, agent: AgentRole },
    /// Cursor moved and the next step's task was auto-created.
    Progressed {
        current_step: usize,
        next_step_id: String,
        next_agent: AgentRole,
        task: Box<Task>,
    },
    /// Cursor moved but the next step waits for an external trigger.
    ManualTriggerRequired {
        current_step: usize,
        next_step_id: String,
        next_agent: AgentRole,
    },
    /// The last step completed; the workflow is now `completed`.
    WorkflowCompleted,
}

impl StepAdvance {
    /// Whether this call moved the step cursor.
    pub fn advanced(&self) -> bool {
        matches!(
            self,
            StepAdvance::Progressed { .. }
                | StepAdvance::ManualTriggerRequired { .. }
                | StepAdvance::WorkflowCompleted
        )
    }
}

/// Outcome of an explicit request to materialize the current step's task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum StepTrigger {
    Created { task: Box<Task> },
    /// An open task for the current step already exists.
    AlreadyOpen { task: Box<Task> },
    WorkflowCompleted,
}

/// Compact view of a workflow for listings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowSummary {
    pub id: Uuid,
    pub name: String,
    pub project_name: String,
    /// 1-based for display; `total_steps + 1` never appears since completed
    /// workflows report `total_steps`.
    pub current_step: usize,
    pub total_steps: usize,
    pub current_agent: Option<AgentRole>,
    pub status: WorkflowStatus,
    pub progress: u32,
    pub created: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(w: &Workflow) -> Self {
        Self {
            id: w.id,
            name: w.name.clone(),
            project_name: w.project_name.clone(),
            current_step: (w.current_step + 1).min(w.steps.len()),
            total_steps: w.steps.len(),
            current_agent: w.current().map(|s| s.agent),
            status: w.status,
            progress: w.progress_percent(),
            created: w.created,
        }
    }
}

/// Owns every workflow and drives the per-workflow step state machine.
///
/// Each workflow sits behind its own mutex so the check-then-increment in
/// [`WorkflowEngine::advance`] is atomic per workflow while different
/// workflows advance in parallel. Lock order: workflow mutex, then task store.
pub struct WorkflowEngine {
    workflows: RwLock<HashMap<Uuid, Arc<Mutex<Workflow>>>>,
    catalog: WorkflowCatalog,
    tasks: Arc<TaskStore>,
    events: Arc<EventBroadcaster>,
}

impl WorkflowEngine {
    pub fn new(
        catalog: WorkflowCatalog,
        tasks: Arc<TaskStore>,
        events: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            workflows: RwLock::new(HashMap::new()),
            catalog,
            tasks,
            events,
        }
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Instantiate a template and seed the first step's task.
    pub async fn start(
        &self,
        workflow_type: &str,
        project_name: &str,
        description: Option<&str>,
        initiator: AgentRole,
    ) -> RelayResult<(Workflow, Task)> {
        let definitions = self.catalog.template_for(workflow_type);
        if definitions.is_empty() {
            return Err(RelayError::UnknownWorkflowType(workflow_type.to_string()));
        }

        let id = Uuid::new_v4();
        let workflow = Workflow {
            id,
            name: workflow_type.to_string(),
            description: description.map(str::to_string).unwrap_or_else(|| {
                format!("Automated {workflow_type} workflow for {project_name}")
            }),
            project_name: project_name.to_string(),
            initiator,
            steps: materialize(id, definitions, project_name),
            status: WorkflowStatus::Running,
            current_step: 0,
            created: Utc::now(),
            completed_at: None,
        };

        let handle = Arc::new(Mutex::new(workflow));
        // Hold the workflow while registering it so no advance can observe it
        // before its first task exists.
        let guard = handle.lock().await;
        self.workflows.write().await.insert(id, handle.clone());

        let first = self.tasks.create(step_task(&guard, 0, None)).await;
        let workflow = guard.clone();
        drop(guard);

        info!(
            workflow_id = %id,
            workflow = %workflow.name,
            project = %workflow.project_name,
            first_agent = %first.to,
            "Workflow started"
        );
        self.events
            .publish(
                EventKind::WorkflowStarted,
                serde_json::json!({
                    "workflowId": id,
                    "workflowName": workflow.name,
                    "projectName": workflow.project_name,
                    "totalSteps": workflow.steps.len(),
                    "firstAgent": first.to,
                    "taskId": first.id,
                }),
            )
            .await;

        Ok((workflow, first))
    }

    /// Move the step cursor if the current step has a completed task.
    ///
    /// Idempotent: safe to call any number of times for the same completion.
    /// `completed_step_hint` names the step whose task just completed; when the
    /// cursor is already past it the call is a no-op.
    ///
    /// A step counts as done once *any* of its tasks is completed, even if
    /// other tasks for the same step are still open.
    pub async fn advance(
        &self,
        workflow_id: Uuid,
        completed_step_hint: Option<&str>,
    ) -> RelayResult<StepAdvance> {
        let handle = self.handle(workflow_id).await?;
        let mut workflow = handle.lock().await;

        if workflow.is_exhausted() {
            debug!(workflow_id = %workflow_id, "Advance skipped: workflow already completed");
            return Ok(StepAdvance::AlreadyCompleted);
        }

        if let Some(index) = completed_step_hint.and_then(|hint| workflow.step_index(hint)) {
            if index < workflow.current_step {
                debug!(
                    workflow_id = %workflow_id,
                    current_step = workflow.current_step,
                    "Advance skipped: step already passed"
                );
                return Ok(StepAdvance::AlreadyAdvanced {
                    step_id: workflow.steps[index].id.clone(),
                    current_step: workflow.current_step,
                });
            }
        }

        let step = workflow.steps[workflow.current_step].clone();
        let step_done = self
            .tasks
            .list_by_workflow_step(workflow_id, &step.id)
            .await
            .iter()
            .any(|t| t.status == TaskStatus::Completed);
        if !step_done {
            debug!(workflow_id = %workflow_id, step = %step.key, "Step still pending");
            return Ok(StepAdvance::StepPending {
                step_id: step.id,
                agent: step.agent,
            });
        }

        workflow.current_step += 1;

        if workflow.is_exhausted() {
            workflow.status = WorkflowStatus::Completed;
            workflow.completed_at = Some(Utc::now());
            info!(workflow_id = %workflow_id, workflow = %workflow.name, "Workflow completed");
            self.events
                .publish(
                    EventKind::WorkflowCompleted,
                    serde_json::json!({
                        "workflowId": workflow_id,
                        "workflowName": workflow.name,
                        "projectName": workflow.project_name,
                    }),
                )
                .await;
            return Ok(StepAdvance::WorkflowCompleted);
        }

        let current_step = workflow.current_step;
        let next = workflow.steps[current_step].clone();
        let task = if next.auto_trigger {
            Some(
                self.tasks
                    .create(step_task(&workflow, current_step, Some(step.agent)))
                    .await,
            )
        } else {
            None
        };

        info!(
            workflow_id = %workflow_id,
            step = current_step + 1,
            total = workflow.steps.len(),
            next_agent = %next.agent,
            auto_triggered = next.auto_trigger,
            "Workflow step progressed"
        );
        self.events
            .publish(
                EventKind::WorkflowStepProgressed,
                serde_json::json!({
                    "workflowId": workflow_id,
                    "stepNumber": current_step + 1,
                    "totalSteps": workflow.steps.len(),
                    "nextAgent": next.agent,
                    "autoTriggered": next.auto_trigger,
                    "taskId": task.as_ref().map(|t| t.id),
                }),
            )
            .await;

        Ok(match task {
            Some(task) => StepAdvance::Progressed {
                current_step,
                next_step_id: next.id,
                next_agent: next.agent,
                task: Box::new(task),
            },
            None => StepAdvance::ManualTriggerRequired {
                current_step,
                next_step_id: next.id,
                next_agent: next.agent,
            },
        })
    }

    /// Create the current step's task on external request.
    ///
    /// Used for steps that do not auto-trigger. Returns the existing task
    /// instead if one is already open for the step.
    pub async fn trigger_step(&self, workflow_id: Uuid) -> RelayResult<StepTrigger> {
        let handle = self.handle(workflow_id).await?;
        let workflow = handle.lock().await;

        let Some(step) = workflow.current() else {
            return Ok(StepTrigger::WorkflowCompleted);
        };

        let open = self
            .tasks
            .list_by_workflow_step(workflow_id, &step.id)
            .await
            .into_iter()
            .find(|t| t.status != TaskStatus::Completed);
        if let Some(task) = open {
            return Ok(StepTrigger::AlreadyOpen {
                task: Box::new(task),
            });
        }

        let task = self
            .tasks
            .create(step_task(&workflow, workflow.current_step, None))
            .await;
        info!(workflow_id = %workflow_id, step = %step.key, agent = %step.agent, "Step manually triggered");
        Ok(StepTrigger::Created {
            task: Box::new(task),
        })
    }

    pub async fn get(&self, workflow_id: Uuid) -> RelayResult<Workflow> {
        let handle = self.handle(workflow_id).await?;
        let workflow = handle.lock().await;
        Ok(workflow.clone())
    }

    /// Every workflow, oldest first.
    pub async fn all(&self) -> Vec<Workflow> {
        let handles: Vec<Arc<Mutex<Workflow>>> =
            self.workflows.read().await.values().cloned().collect();
        let mut all = Vec::with_capacity(handles.len());
        for handle in handles {
            all.push(handle.lock().await.clone());
        }
        all.sort_by_key(|w| w.created);
        all
    }

    /// Workflows still `running`.
    pub async fn get_active(&self) -> Vec<Workflow> {
        self.all()
            .await
            .into_iter()
            .filter(|w| w.status == WorkflowStatus::Running)
            .collect()
    }

    async fn handle(&self, workflow_id: Uuid) -> RelayResult<Arc<Mutex<Workflow>>> {
        self.workflows
            .read()
            .await
            .get(&workflow_id)
            .cloned()
            .ok_or(RelayError::WorkflowNotFound(workflow_id))
    }
}

fn materialize(workflow_id: Uuid, definitions: &[StepDefinition], project: &str) -> Vec<WorkflowStep> {
    definitions
        .iter()
        .map(|def| WorkflowStep {
            id: format!("{workflow_id}:{}", def.key),
            key: def.key.clone(),
            agent: def.agent,
            action: def.action.clone(),
            description: def.description.replace(PROJECT_PLACEHOLDER, project),
            auto_trigger: def.auto_trigger,
            template: def.template.clone(),
        })
        .collect()
}

/// Build the task for `steps[index]`. `previous` is the agent whose completed
/// step caused an automatic trigger.
fn step_task(workflow: &Workflow, index: usize, previous: Option<AgentRole>) -> NewTask {
    let step = &workflow.steps[index];
    let (title, description) = match previous {
        Some(prev) => (
            format!("Auto-triggered: {}", step.description),
            format!(
                "Workflow step auto-triggered\nPrevious step completed by: {prev}\nNext action: {}",
                step.description
            ),
        ),
        None => (
            format!("{}: {}", workflow.project_name, step.description),
            format!(
                "Workflow: {}\nStep: {}\nProject: {}",
                workflow.name, step.description, workflow.project_name
            ),
        ),
    };

    NewTask::new(
        AgentRole::Orchestrator,
        step.agent,
        step.template.task_type,
        title,
        description,
    )
    .with_priority(step.template.priority.unwrap_or_default())
    .with_payload(TaskPayload::Workflow(WorkflowLink {
        workflow_id: workflow.id,
        step_id: step.id.clone(),
        project_name: workflow.project_name.clone(),
        auto_triggered: previous.is_some(),
        template: step.template.clone(),
    }))
}
