use crate::activity::AgentActivityTracker;
use crate::broadcaster::{EventBroadcaster, Subscription};
use crate::catalog::WorkflowCatalog;
use crate::collaborator::{run_step_actions, VersionControl};
use crate::config::OrchestratorConfig;
use crate::engine::{StepAdvance, StepTrigger, WorkflowEngine, WorkflowSummary};
use crate::log::{ConversationLog, LogEntry};
use crate::metrics::{MetricsAggregator, MonitoringMetrics};
use crate::scheduler::spawn_metrics_loop;
use crate::task_store::{TaskStats, TaskStore};
use crate::types::{
    AgentRole, AgentStatus, NewTask, Task, TaskKind, TaskPayload, TaskStatus, Workflow,
};
use chrono::{DateTime, Utc};
use relay_core::{Event, EventKind, RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};
use uuid::Uuid;

/// A request an observer may send over its connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverRequest {
    GetCurrentState,
    GetMetrics,
    RequestRecommendations,
}

/// Position of a workflow-linked task inside its workflow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPosition {
    pub id: Uuid,
    pub name: String,
    /// 1-based.
    pub current_step: usize,
    pub total_steps: usize,
    pub auto_triggered: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskView {
    #[serde(flatten)]
    pub task: Task,
    pub workflow: Option<WorkflowPosition>,
}

/// An agent's open tasks, in dispatch order, with totals.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTaskList {
    pub agent: AgentRole,
    pub total: usize,
    pub workflow_tasks: usize,
    pub manual_tasks: usize,
    pub tasks: Vec<TaskView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentQueue {
    pub agent: AgentRole,
    pub pending: usize,
    pub total: usize,
    pub status: AgentStatus,
    pub last_active: Option<DateTime<Utc>>,
}

/// Agents with pending work.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingAgents {
    pub agents: Vec<AgentQueue>,
    pub total_pending: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskBrief {
    pub id: Uuid,
    pub title: String,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub agent: AgentRole,
    pub status: AgentStatus,
    pub last_active: Option<DateTime<Utc>>,
    pub current_task: Option<TaskBrief>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveWorkflow {
    #[serde(flatten)]
    pub summary: WorkflowSummary,
    pub duration_seconds: i64,
}

/// Everything a freshly connected observer needs to render the system.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardState {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub connected_observers: usize,
    pub active_workflows: Vec<ActiveWorkflow>,
    pub agents: Vec<AgentView>,
    pub pending_tasks: Vec<Task>,
    pub metrics: MonitoringMetrics,
}

/// Entry point for every orchestration operation.
///
/// Owns the stores, the workflow engine and the background work (delayed step
/// advances and the metrics loop). Cheap to share behind an `Arc`.
pub struct Orchestrator {
    config: OrchestratorConfig,
    events: Arc<EventBroadcaster>,
    activity: Arc<AgentActivityTracker>,
    tasks: Arc<TaskStore>,
    engine: Arc<WorkflowEngine>,
    metrics: Arc<MetricsAggregator>,
    log: Arc<ConversationLog>,
    vcs: Option<Arc<dyn VersionControl>>,
    advances: Mutex<JoinSet<()>>,
    /// Serializes status updates per task, collaborator calls included.
    task_guards: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
    metrics_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Orchestrator {
    /// Create an orchestrator with the built-in workflow templates.
    pub fn new(config: OrchestratorConfig) -> Self {
        Self::with_catalog(config, WorkflowCatalog::builtin())
    }

    pub fn with_catalog(config: OrchestratorConfig, catalog: WorkflowCatalog) -> Self {
        let events = Arc::new(EventBroadcaster::new(config.subscriber_capacity));
        let activity = Arc::new(AgentActivityTracker::new(events.clone()));
        let tasks = Arc::new(TaskStore::new(events.clone(), activity.clone()));
        let engine = Arc::new(WorkflowEngine::new(catalog, tasks.clone(), events.clone()));
        let metrics = Arc::new(MetricsAggregator::new(
            tasks.clone(),
            engine.clone(),
            activity.clone(),
            config.metrics.clone(),
        ));
        let log = Arc::new(ConversationLog::new(config.conversation_log_capacity));

        Self {
            config,
            events,
            activity,
            tasks,
            engine,
            metrics,
            log,
            vcs: None,
            advances: Mutex::new(JoinSet::new()),
            task_guards: Mutex::new(HashMap::new()),
            metrics_loop: Mutex::new(None),
        }
    }

    /// Attach a version-control collaborator for template-driven git actions.
    pub fn with_version_control(mut self, vcs: Arc<dyn VersionControl>) -> Self {
        self.vcs = Some(vcs);
        self
    }

    /// The attached version-control collaborator, if any.
    pub fn version_control(&self) -> Option<&Arc<dyn VersionControl>> {
        self.vcs.as_ref()
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Get a reference to the event broadcaster.
    pub fn events(&self) -> &Arc<EventBroadcaster> {
        &self.events
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn engine(&self) -> &Arc<WorkflowEngine> {
        &self.engine
    }

    pub fn activity(&self) -> &Arc<AgentActivityTracker> {
        &self.activity
    }

    // ---- tasks ----

    pub async fn create_task(&self, spec: NewTask) -> Task {
        let task = self.tasks.create(spec).await;
        self.log
            .append(
                task.from,
                format!("Task created for {}: {}", task.to, task.title),
                Some(serde_json::json!({ "taskId": task.id })),
            )
            .await;
        task
    }

    pub async fn get_task(&self, id: Uuid) -> RelayResult<Task> {
        self.tasks.get(id).await
    }

    /// Open tasks for `agent` in dispatch order.
    pub async fn list_for_agent(&self, agent: AgentRole) -> Vec<Task> {
        self.tasks.list_for_agent(agent).await
    }

    /// Open tasks for `agent`, annotated with their workflow position.
    pub async fn my_tasks(&self, agent: AgentRole) -> AgentTaskList {
        let open = self.tasks.list_for_agent(agent).await;
        let workflows: HashMap<Uuid, Workflow> = self
            .engine
            .all()
            .await
            .into_iter()
            .map(|w| (w.id, w))
            .collect();

        let tasks: Vec<TaskView> = open
            .into_iter()
            .map(|task| {
                let workflow = task.workflow_link().and_then(|link| {
                    workflows.get(&link.workflow_id).map(|w| WorkflowPosition {
                        id: w.id,
                        name: w.name.clone(),
                        current_step: (w.current_step + 1).min(w.steps.len()),
                        total_steps: w.steps.len(),
                        auto_triggered: link.auto_triggered,
                    })
                });
                TaskView { task, workflow }
            })
            .collect();

        let workflow_tasks = tasks.iter().filter(|t| t.task.workflow_id.is_some()).count();
        AgentTaskList {
            agent,
            total: tasks.len(),
            workflow_tasks,
            manual_tasks: tasks.len() - workflow_tasks,
            tasks,
        }
    }

    /// Move a task forward and, on completion of a workflow task, schedule
    /// the workflow's step advance after the configured delay.
    ///
    /// Backward moves and changes to a completed task fail with
    /// `InvalidTransition`; re-asserting the current status is a no-op.
    /// Version-control actions requested by the step template run first; if
    /// one fails the task keeps its prior status.
    pub async fn update_task_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        acting: AgentRole,
    ) -> RelayResult<Task> {
        self.tasks.get(id).await?;
        let guard = self.task_guard(id).await;
        let _held = guard.lock().await;

        let current = self.tasks.get(id).await?;
        if current.status == status {
            tracing::debug!(task_id = %id, status = %status, "Status unchanged");
            return Ok(current);
        }
        if !current.status.can_transition_to(status) {
            return Err(RelayError::InvalidTransition {
                task: id,
                from: current.status.to_string(),
                to: status.to_string(),
            });
        }

        if let Some(vcs) = &self.vcs {
            run_step_actions(vcs.as_ref(), &current, status).await?;
        }

        let task = self.tasks.transition(id, status, acting).await?;
        self.log
            .append(
                acting,
                format!("Task \"{}\" is now {status}", task.title),
                Some(serde_json::json!({ "taskId": id })),
            )
            .await;

        if status == TaskStatus::Completed {
            if let Some(link) = task.workflow_link() {
                self.schedule_advance(link.workflow_id, link.step_id.clone())
                    .await;
            }
        }
        Ok(task)
    }

    async fn task_guard(&self, id: Uuid) -> Arc<Mutex<()>> {
        self.task_guards.lock().await.entry(id).or_default().clone()
    }

    /// Task counters across the whole store.
    pub async fn task_stats(&self) -> TaskStats {
        self.tasks.stats().await
    }

    /// Per-agent pending workload, busiest first.
    pub async fn pending_agents(&self) -> PendingAgents {
        let stats = self.tasks.stats().await;
        let states: HashMap<AgentRole, _> = self.activity.snapshot().await.into_iter().collect();

        let mut agents: Vec<AgentQueue> = stats
            .by_agent
            .iter()
            .filter(|(_, load)| load.pending > 0)
            .map(|(agent, load)| {
                let state = states.get(agent).cloned().unwrap_or_default();
                AgentQueue {
                    agent: *agent,
                    pending: load.pending,
                    total: load.total,
                    status: state.status,
                    last_active: state.last_active,
                }
            })
            .collect();
        agents.sort_by(|a, b| b.pending.cmp(&a.pending).then(a.agent.cmp(&b.agent)));

        PendingAgents {
            agents,
            total_pending: stats.pending,
        }
    }

    /// Ask `target` to pick up work by dropping a trigger task in its queue.
    pub async fn trigger_agent(
        &self,
        from: AgentRole,
        target: AgentRole,
        message: &str,
    ) -> Task {
        let spec = NewTask::new(
            from,
            target,
            TaskKind::WorkflowTrigger,
            format!("Triggered by {from}"),
            message,
        )
        .with_payload(TaskPayload::Trigger {
            from_orchestrator: from == AgentRole::Orchestrator,
        });
        // Creation marks the target as notified.
        let task = self.tasks.create(spec).await;
        self.log
            .append(
                from,
                format!("Triggered {target}: {message}"),
                Some(serde_json::json!({ "taskId": task.id })),
            )
            .await;
        task
    }

    // ---- workflows ----

    pub async fn start_workflow(
        &self,
        workflow_type: &str,
        project_name: &str,
        description: Option<&str>,
        initiator: AgentRole,
    ) -> RelayResult<(Workflow, Task)> {
        let (workflow, first) = self
            .engine
            .start(workflow_type, project_name, description, initiator)
            .await?;
        self.log
            .append(
                initiator,
                format!(
                    "Started {} workflow for {} ({} steps), first task for {}",
                    workflow.name,
                    workflow.project_name,
                    workflow.steps.len(),
                    first.to
                ),
                Some(serde_json::json!({ "workflowId": workflow.id })),
            )
            .await;
        Ok((workflow, first))
    }

    /// Advance a workflow now, without a step hint.
    pub async fn advance_workflow(&self, workflow_id: Uuid) -> RelayResult<StepAdvance> {
        let outcome = self.engine.advance(workflow_id, None).await?;
        record_advance(&self.log, workflow_id, &outcome).await;
        Ok(outcome)
    }

    pub async fn trigger_step(&self, workflow_id: Uuid) -> RelayResult<StepTrigger> {
        let outcome = self.engine.trigger_step(workflow_id).await?;
        if let StepTrigger::Created { task } = &outcome {
            self.log
                .append(
                    AgentRole::Orchestrator,
                    format!("Triggered step for {}: {}", task.to, task.title),
                    Some(serde_json::json!({ "workflowId": workflow_id, "taskId": task.id })),
                )
                .await;
        }
        Ok(outcome)
    }

    pub async fn get_workflow(&self, workflow_id: Uuid) -> RelayResult<Workflow> {
        self.engine.get(workflow_id).await
    }

    pub async fn get_workflows(&self) -> Vec<WorkflowSummary> {
        self.engine
            .all()
            .await
            .iter()
            .map(WorkflowSummary::from)
            .collect()
    }

    /// Names of the registered workflow templates.
    pub fn workflow_types(&self) -> Vec<String> {
        self.engine.catalog().names().map(str::to_string).collect()
    }

    async fn schedule_advance(&self, workflow_id: Uuid, step_id: String) {
        let engine = self.engine.clone();
        let log = self.log.clone();
        let delay = self.config.advance_delay();

        let mut advances = self.advances.lock().await;
        while advances.try_join_next().is_some() {}
        advances.spawn(async move {
            tokio::time::sleep(delay).await;
            match engine.advance(workflow_id, Some(&step_id)).await {
                Ok(outcome) => record_advance(&log, workflow_id, &outcome).await,
                Err(e) => warn!(workflow_id = %workflow_id, error = %e, "Delayed advance failed"),
            }
        });
    }

    /// Wait for every scheduled step advance to run.
    pub async fn settle(&self) {
        let mut advances = self.advances.lock().await;
        while let Some(joined) = advances.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "Delayed advance did not finish");
            }
        }
    }

    // ---- log ----

    pub async fn log_message(
        &self,
        agent: AgentRole,
        message: &str,
        context: Option<serde_json::Value>,
    ) -> LogEntry {
        self.log.append(agent, message, context).await
    }

    pub async fn conversation_log(&self, limit: usize) -> Vec<LogEntry> {
        self.log.recent(limit).await
    }

    // ---- observers ----

    pub async fn subscribe(&self) -> Subscription {
        self.events.subscribe().await
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        self.events.unsubscribe(id).await;
    }

    pub async fn metrics(&self) -> MonitoringMetrics {
        self.metrics.recompute().await
    }

    pub async fn current_state(&self) -> DashboardState {
        let now = Utc::now();
        let metrics = self.metrics.recompute_at(now).await;

        let active_workflows = self
            .engine
            .get_active()
            .await
            .iter()
            .map(|w| ActiveWorkflow {
                summary: WorkflowSummary::from(w),
                duration_seconds: (now - w.created).num_seconds(),
            })
            .collect();

        let mut agents = Vec::new();
        for (agent, state) in self.activity.snapshot().await {
            let open = self.tasks.list_for_agent(agent).await;
            let current = open
                .iter()
                .find(|t| t.status == TaskStatus::InProgress)
                .or_else(|| open.first())
                .map(|t| TaskBrief {
                    id: t.id,
                    title: t.title.clone(),
                    status: t.status,
                });
            agents.push(AgentView {
                agent,
                status: state.status,
                last_active: state.last_active,
                current_task: current,
            });
        }

        DashboardState {
            timestamp: now,
            uptime_seconds: (now - self.metrics.started_at()).num_seconds(),
            connected_observers: self.events.subscriber_count().await,
            active_workflows,
            agents,
            pending_tasks: self.tasks.list_by_status(TaskStatus::Pending).await,
            metrics,
        }
    }

    /// The `initial_state` event sent to an observer right after it connects.
    pub async fn initial_state(&self) -> RelayResult<Event> {
        let state = self.current_state().await;
        Ok(Event::new(EventKind::InitialState, serde_json::to_value(state)?))
    }

    /// Answer a request sent by an observer.
    pub async fn answer(&self, request: ObserverRequest) -> RelayResult<Event> {
        Ok(match request {
            ObserverRequest::GetCurrentState => Event::new(
                EventKind::CurrentState,
                serde_json::to_value(self.current_state().await)?,
            ),
            ObserverRequest::GetMetrics => Event::new(
                EventKind::Metrics,
                serde_json::to_value(self.metrics().await)?,
            ),
            ObserverRequest::RequestRecommendations => {
                let metrics = self.metrics().await;
                Event::new(
                    EventKind::Recommendations,
                    serde_json::json!({
                        "recommendations": metrics.recommendations,
                        "bottlenecks": metrics.bottlenecks,
                    }),
                )
            }
        })
    }

    // ---- lifecycle ----

    /// Start the periodic `metrics_update` broadcast. No-op if already running.
    pub async fn spawn_metrics_loop(&self) {
        let mut slot = self.metrics_loop.lock().await;
        if slot.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        *slot = Some(spawn_metrics_loop(
            self.metrics.clone(),
            self.events.clone(),
            self.config.metrics_interval(),
        ));
        info!(
            interval_secs = self.config.metrics_interval().as_secs(),
            "Metrics loop started"
        );
    }

    /// Cancel the metrics loop and every pending step advance.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.metrics_loop.lock().await.take() {
            handle.abort();
        }
        let mut advances = self.advances.lock().await;
        let pending = advances.len();
        advances.abort_all();
        while advances.join_next().await.is_some() {}
        info!(cancelled_advances = pending, "Orchestrator shut down");
    }
}

async fn record_advance(log: &ConversationLog, workflow_id: Uuid, outcome: &StepAdvance) {
    let context = Some(serde_json::json!({ "workflowId": workflow_id }));
    match outcome {
        StepAdvance::Progressed {
            current_step,
            next_agent,
            task,
            ..
        } => {
            log.append(
                AgentRole::Orchestrator,
                format!(
                    "Auto-triggered {next_agent} for step {}: {}",
                    current_step + 1,
                    task.title
                ),
                context,
            )
            .await;
        }
        StepAdvance::ManualTriggerRequired {
            current_step,
            next_agent,
            ..
        } => {
            log.append(
                AgentRole::Orchestrator,
                format!(
                    "Step {} waits for a manual trigger for {next_agent}",
                    current_step + 1
                ),
                context,
            )
            .await;
        }
        StepAdvance::WorkflowCompleted => {
            log.append(AgentRole::Orchestrator, "Workflow completed", context)
                .await;
        }
        StepAdvance::AlreadyCompleted
        | StepAdvance::AlreadyAdvanced { .. }
        | StepAdvance::StepPending { .. } => {}
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::collaborator::{CollaboratorReply, PullRequest};
    use crate::types::Priority;
    use async_trait::async_trait;

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(OrchestratorConfig {
            advance_delay_ms: 0,
            ..OrchestratorConfig::default()
        })
    }

    #[tokio::test]
    async fn test_status_cannot_go_backward() {
        let orch = orchestrator();
        let task = orch
            .create_task(NewTask::new(
                AgentRole::Designer,
                AgentRole::Developer,
                TaskKind::Code,
                "Build",
                "",
            ))
            .await;
        orch.update_task_status(task.id, TaskStatus::Completed, AgentRole::Developer)
            .await
            .unwrap();

        let err = orch
            .update_task_status(task.id, TaskStatus::Pending, AgentRole::Developer)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::InvalidTransition { .. }));

        // Re-asserting is accepted.
        let same = orch
            .update_task_status(task.id, TaskStatus::Completed, AgentRole::Developer)
            .await
            .unwrap();
        assert_eq!(same.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn test_unknown_task() {
        let orch = orchestrator();
        let err = orch
            .update_task_status(Uuid::new_v4(), TaskStatus::Completed, AgentRole::Qa)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_my_tasks_annotates_workflow_position() {
        let orch = orchestrator();
        let (wf, _) = orch
            .start_workflow("feature-request", "Shop", None, AgentRole::Designer)
            .await
            .unwrap();
        orch.create_task(
            NewTask::new(
                AgentRole::Designer,
                AgentRole::Developer,
                TaskKind::Code,
                "Side quest",
                "",
            )
            .with_priority(Priority::High),
        )
        .await;

        let mine = orch.my_tasks(AgentRole::Developer).await;
        assert_eq!(mine.total, 2);
        assert_eq!(mine.workflow_tasks, 1);
        assert_eq!(mine.manual_tasks, 1);
        let first = &mine.tasks[0];
        assert_eq!(first.task.workflow_id, Some(wf.id));
        let position = first.workflow.as_ref().unwrap();
        assert_eq!(position.current_step, 1);
        assert_eq!(position.total_steps, 4);
        assert!(!position.auto_triggered);
        assert!(mine.tasks[1].workflow.is_none());
    }

    #[tokio::test]
    async fn test_trigger_agent() {
        let orch = orchestrator();
        let task = orch
            .trigger_agent(AgentRole::Orchestrator, AgentRole::Qa, "please review")
            .await;
        assert_eq!(task.kind, TaskKind::WorkflowTrigger);
        assert_eq!(
            task.data,
            TaskPayload::Trigger {
                from_orchestrator: true
            }
        );
        assert_eq!(
            orch.activity().get_state(AgentRole::Qa).await.status,
            AgentStatus::Notified
        );
        let pending = orch.pending_agents().await;
        assert_eq!(pending.total_pending, 1);
        assert_eq!(pending.agents[0].agent, AgentRole::Qa);
        assert_eq!(pending.agents[0].status, AgentStatus::Notified);
    }

    #[tokio::test]
    async fn test_conversation_log_records_operations() {
        let orch = orchestrator();
        orch.start_workflow("bug-fix", "Calc", None, AgentRole::Qa)
            .await
            .unwrap();
        orch.log_message(AgentRole::Developer, "on it", None).await;
        let log = orch.conversation_log(10).await;
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].agent, AgentRole::Qa);
        assert!(log[0].message.starts_with("Started bug-fix workflow for Calc"));
        assert_eq!(log[1].message, "on it");
    }

    #[tokio::test]
    async fn test_observer_requests() {
        let orch = orchestrator();
        orch.start_workflow("bug-fix", "Calc", None, AgentRole::Orchestrator)
            .await
            .unwrap();
        let _sub = orch.subscribe().await;

        let state = orch.answer(ObserverRequest::GetCurrentState).await.unwrap();
        assert_eq!(state.kind, EventKind::CurrentState);
        assert_eq!(state.data["connectedObservers"], 1);
        assert_eq!(state.data["activeWorkflows"][0]["projectName"], "Calc");
        assert_eq!(state.data["pendingTasks"].as_array().unwrap().len(), 1);
        let developer = state.data["agents"]
            .as_array()
            .unwrap()
            .iter()
            .find(|a| a["agent"] == "developer")
            .unwrap();
        assert!(developer["currentTask"]["title"].is_string());

        let metrics = orch.answer(ObserverRequest::GetMetrics).await.unwrap();
        assert_eq!(metrics.kind, EventKind::Metrics);
        assert_eq!(metrics.data["activeWorkflows"], 1);

        let recs = orch
            .answer(ObserverRequest::RequestRecommendations)
            .await
            .unwrap();
        assert_eq!(recs.kind, EventKind::Recommendations);
        assert!(recs.data["recommendations"].is_array());

        let request: ObserverRequest =
            serde_json::from_str(r#"{"type":"request_recommendations"}"#).unwrap();
        assert_eq!(request, ObserverRequest::RequestRecommendations);
    }

    struct FailingPull;

    #[async_trait]
    impl VersionControl for FailingPull {
        async fn init(&self) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
        async fn clone_repo(&self, _url: &str) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
        async fn commit(&self, _message: &str) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
        async fn push(&self, _branch: Option<&str>) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
        async fn pull(&self, _branch: Option<&str>) -> CollaboratorReply {
            CollaboratorReply::failed("merge conflict")
        }
        async fn fetch(&self) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
        async fn checkout(&self, _branch: &str, _create: bool) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
        async fn merge(&self, _branch: &str) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
        async fn list_branches(&self) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
        async fn create_pull_request(&self, _request: &PullRequest) -> CollaboratorReply {
            CollaboratorReply::ok("")
        }
    }

    #[tokio::test]
    async fn test_collaborator_failure_keeps_prior_status() {
        let orch = orchestrator().with_version_control(Arc::new(FailingPull));
        // The first bug-fix step syncs before starting.
        let (_, first) = orch
            .start_workflow("bug-fix", "Calc", None, AgentRole::Orchestrator)
            .await
            .unwrap();

        let err = orch
            .update_task_status(first.id, TaskStatus::InProgress, AgentRole::Developer)
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::Collaborator(ref m) if m == "merge conflict"));
        assert_eq!(
            orch.get_task(first.id).await.unwrap().status,
            TaskStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_advance() {
        let orch = Orchestrator::new(OrchestratorConfig {
            advance_delay_ms: 60_000,
            ..OrchestratorConfig::default()
        });
        let (wf, first) = orch
            .start_workflow("bug-fix", "Calc", None, AgentRole::Orchestrator)
            .await
            .unwrap();
        orch.spawn_metrics_loop().await;
        orch.update_task_status(first.id, TaskStatus::Completed, AgentRole::Developer)
            .await
            .unwrap();

        orch.shutdown().await;
        assert_eq!(orch.get_workflow(wf.id).await.unwrap().current_step, 0);
        assert_eq!(orch.tasks().all().await.len(), 1);
    }
}
