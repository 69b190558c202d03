use crate::activity::AgentActivityTracker;
use crate::broadcaster::EventBroadcaster;
use crate::types::{AgentRole, AgentStatus, NewTask, Task, TaskStatus};
use relay_core::{EventKind, RelayError, RelayResult};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-agent task counts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWorkload {
    pub total: usize,
    pub pending: usize,
}

/// Aggregate task counters.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub by_agent: BTreeMap<AgentRole, AgentWorkload>,
}

/// The unsynchronized task table. [`TaskStore`] owns one behind a lock.
#[derive(Default)]
pub struct TaskTable {
    tasks: HashMap<Uuid, Task>,
    by_agent: HashMap<AgentRole, Vec<Uuid>>,
    next_sequence: u64,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, spec: NewTask) -> Task {
        let task = Task::from_spec(spec, self.next_sequence);
        self.next_sequence += 1;
        self.by_agent.entry(task.to).or_default().push(task.id);
        self.tasks.insert(task.id, task.clone());
        task
    }

    pub fn get(&self, id: Uuid) -> Option<&Task> {
        self.tasks.get(&id)
    }

    /// Open tasks addressed to `agent`: workflow-linked first, then by
    /// descending priority, then by creation order.
    pub fn for_agent(&self, agent: AgentRole) -> Vec<Task> {
        let mut open: Vec<Task> = self
            .by_agent
            .get(&agent)
            .into_iter()
            .flatten()
            .filter_map(|id| self.tasks.get(id))
            .filter(|t| t.status != TaskStatus::Completed)
            .cloned()
            .collect();
        open.sort_by_key(|t| (t.workflow_id.is_none(), Reverse(t.priority), t.sequence));
        open
    }

    pub fn by_workflow_step(&self, workflow_id: Uuid, step_id: &str) -> Vec<Task> {
        self.sorted(|t| t.belongs_to_step(workflow_id, step_id))
    }

    pub fn by_workflow(&self, workflow_id: Uuid) -> Vec<Task> {
        self.sorted(|t| t.workflow_id == Some(workflow_id))
    }

    pub fn by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.sorted(|t| t.status == status)
    }

    /// All tasks in creation order.
    pub fn all(&self) -> Vec<Task> {
        self.sorted(|_| true)
    }

    fn sorted(&self, keep: impl Fn(&Task) -> bool) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.tasks.values().filter(|t| keep(*t)).cloned().collect();
        tasks.sort_by_key(|t| t.sequence);
        tasks
    }

    /// Overwrite a task's status. Returns the previous status.
    pub fn set_status(&mut self, id: Uuid, status: TaskStatus) -> Option<TaskStatus> {
        let task = self.tasks.get_mut(&id)?;
        let previous = task.status;
        task.status = status;
        Some(previous)
    }

    pub fn stats(&self) -> TaskStats {
        let mut stats = TaskStats {
            total: self.tasks.len(),
            ..TaskStats::default()
        };
        for task in self.tasks.values() {
            let workload = stats.by_agent.entry(task.to).or_default();
            workload.total += 1;
            match task.status {
                TaskStatus::Pending => {
                    stats.pending += 1;
                    workload.pending += 1;
                }
                TaskStatus::InProgress => stats.in_progress += 1,
                TaskStatus::Completed => stats.completed += 1,
            }
        }
        stats
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Shared task store. Every mutation is serialized through one lock and
/// followed by an observer event and an agent-activity update.
pub struct TaskStore {
    table: RwLock<TaskTable>,
    events: Arc<EventBroadcaster>,
    activity: Arc<AgentActivityTracker>,
}

impl TaskStore {
    pub fn new(events: Arc<EventBroadcaster>, activity: Arc<AgentActivityTracker>) -> Self {
        Self {
            table: RwLock::new(TaskTable::new()),
            events,
            activity,
        }
    }

    /// Store a new `pending` task and announce it.
    pub async fn create(&self, spec: NewTask) -> Task {
        let task = self.table.write().await.insert(spec);

        tracing::info!(
            task_id = %task.id,
            from = %task.from,
            to = %task.to,
            workflow_id = ?task.workflow_id,
            "Task created"
        );
        self.events
            .publish(
                EventKind::TaskCreated,
                serde_json::json!({
                    "taskId": task.id,
                    "agent": task.to,
                    "title": task.title,
                    "priority": task.priority,
                    "workflowId": task.workflow_id,
                }),
            )
            .await;
        self.activity.record(task.to, AgentStatus::Notified).await;
        task
    }

    pub async fn get(&self, id: Uuid) -> RelayResult<Task> {
        self.table
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(RelayError::TaskNotFound(id))
    }

    pub async fn list_for_agent(&self, agent: AgentRole) -> Vec<Task> {
        self.table.read().await.for_agent(agent)
    }

    pub async fn list_by_workflow_step(&self, workflow_id: Uuid, step_id: &str) -> Vec<Task> {
        self.table.read().await.by_workflow_step(workflow_id, step_id)
    }

    pub async fn list_by_workflow(&self, workflow_id: Uuid) -> Vec<Task> {
        self.table.read().await.by_workflow(workflow_id)
    }

    pub async fn list_by_status(&self, status: TaskStatus) -> Vec<Task> {
        self.table.read().await.by_status(status)
    }

    pub async fn all(&self) -> Vec<Task> {
        self.table.read().await.all()
    }

    pub async fn stats(&self) -> TaskStats {
        self.table.read().await.stats()
    }

    /// Set a task's status without checking direction.
    ///
    /// Callers are expected to only move forward; use [`TaskStore::transition`]
    /// to have backward moves rejected.
    pub async fn update_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        acting: AgentRole,
    ) -> RelayResult<Task> {
        self.apply_status(id, status, acting, false).await
    }

    /// Like [`TaskStore::update_status`], but fails with `InvalidTransition`
    /// when the move would go backward or leave `completed`.
    pub async fn transition(
        &self,
        id: Uuid,
        status: TaskStatus,
        acting: AgentRole,
    ) -> RelayResult<Task> {
        self.apply_status(id, status, acting, true).await
    }

    async fn apply_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        acting: AgentRole,
        forward_only: bool,
    ) -> RelayResult<Task> {
        let (task, previous) = {
            let mut table = self.table.write().await;
            let current = table.get(id).ok_or(RelayError::TaskNotFound(id))?.status;
            if forward_only && !current.can_transition_to(status) {
                return Err(RelayError::InvalidTransition {
                    task: id,
                    from: current.to_string(),
                    to: status.to_string(),
                });
            }
            table.set_status(id, status);
            let task = table.get(id).cloned().ok_or(RelayError::TaskNotFound(id))?;
            (task, current)
        };

        tracing::info!(
            task_id = %id,
            from = %previous,
            to = %status,
            agent = %acting,
            "Task status updated"
        );
        self.events
            .publish(
                EventKind::TaskStatusChanged,
                serde_json::json!({
                    "taskId": id,
                    "status": status,
                    "previousStatus": previous,
                    "agent": acting,
                    "workflowId": task.workflow_id,
                }),
            )
            .await;
        let agent_status = if status == TaskStatus::Completed {
            AgentStatus::Idle
        } else {
            AgentStatus::Active
        };
        self.activity.record(acting, agent_status).await;
        Ok(task)
    }
}
