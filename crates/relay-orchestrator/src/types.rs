use chrono::{DateTime, Utc};
use relay_core::RelayError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

/// Named worker role that tasks are addressed to and from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Writes requirements and specifications.
    Designer,
    /// Implements code and opens pull requests.
    Developer,
    /// Reproduces, reviews, and verifies.
    Qa,
    /// The engine itself; author of every system-generated task.
    Orchestrator,
}

impl AgentRole {
    /// Every role, in display order.
    pub const ALL: [AgentRole; 4] = [
        AgentRole::Designer,
        AgentRole::Developer,
        AgentRole::Qa,
        AgentRole::Orchestrator,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AgentRole::Designer => "designer",
            AgentRole::Developer => "developer",
            AgentRole::Qa => "qa",
            AgentRole::Orchestrator => "orchestrator",
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentRole {
    type Err = RelayError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentRole::ALL
            .into_iter()
            .find(|role| role.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| RelayError::UnknownAgent(s.to_string()))
    }
}

/// Work-kind tag. Informational only; dispatch never branches on it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[default]
    Requirement,
    Code,
    Review,
    Feedback,
    WorkflowTrigger,
}

/// Status of a task. Legal moves are forward only: pending -> in_progress -> completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl TaskStatus {
    fn rank(self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::InProgress => 1,
            TaskStatus::Completed => 2,
        }
    }

    /// Whether moving from `self` to `next` is a legal forward transition.
    ///
    /// Re-asserting the current status is not a transition.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_terminal(self) -> bool {
        self == TaskStatus::Completed
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Scheduling priority. Declaration order gives `Low < Medium < High`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

/// Per-step payload copied from the workflow template into each generated task.
///
/// The boolean flags drive the version-control hooks; they are otherwise
/// passed through to the assignee untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StepTemplate {
    pub task_type: TaskKind,
    pub priority: Option<Priority>,
    pub sync_before_start: bool,
    pub create_branch: bool,
    pub branch_prefix: Option<String>,
    pub sync_main_before_branch: bool,
    pub run_tests: bool,
    pub regression_test: bool,
    pub open_pull_request: bool,
    pub sync_before_pr: bool,
}

impl StepTemplate {
    pub fn new(task_type: TaskKind) -> Self {
        Self {
            task_type,
            ..Self::default()
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Correlates a task with the workflow step it was generated for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowLink {
    pub workflow_id: Uuid,
    pub step_id: String,
    pub project_name: String,
    /// True when the engine synthesized the task on completion of the previous step.
    #[serde(default)]
    pub auto_triggered: bool,
    #[serde(default)]
    pub template: StepTemplate,
}

/// Task payload: either a workflow linkage, an agent trigger, or free-form data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskPayload {
    Workflow(WorkflowLink),
    Trigger {
        #[serde(rename = "fromOrchestrator")]
        from_orchestrator: bool,
    },
    Manual(serde_json::Map<String, serde_json::Value>),
}

impl Default for TaskPayload {
    fn default() -> Self {
        TaskPayload::Manual(serde_json::Map::new())
    }
}

impl TaskPayload {
    pub fn workflow_link(&self) -> Option<&WorkflowLink> {
        match self {
            TaskPayload::Workflow(link) => Some(link),
            _ => None,
        }
    }
}

/// Everything a caller supplies to create a task; the store fills in the rest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub from: AgentRole,
    pub to: AgentRole,
    #[serde(rename = "type", default)]
    pub kind: TaskKind,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub data: TaskPayload,
    #[serde(default)]
    pub priority: Priority,
}

impl NewTask {
    pub fn new(
        from: AgentRole,
        to: AgentRole,
        kind: TaskKind,
        title: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            from,
            to,
            kind,
            title: title.into(),
            description: description.into(),
            data: TaskPayload::default(),
            priority: Priority::default(),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_payload(mut self, data: TaskPayload) -> Self {
        self.data = data;
        self
    }
}

/// A unit of work routed between two agent roles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    /// Monotonic creation counter; breaks ties between equal timestamps.
    pub sequence: u64,
    pub from: AgentRole,
    pub to: AgentRole,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub title: String,
    pub description: String,
    pub data: TaskPayload,
    pub status: TaskStatus,
    pub created: DateTime<Utc>,
    /// Back-reference only; the workflow holds no reference to its tasks.
    pub workflow_id: Option<Uuid>,
    pub priority: Priority,
}

impl Task {
    pub(crate) fn from_spec(spec: NewTask, sequence: u64) -> Self {
        let workflow_id = spec.data.workflow_link().map(|link| link.workflow_id);
        Self {
            id: Uuid::new_v4(),
            sequence,
            from: spec.from,
            to: spec.to,
            kind: spec.kind,
            title: spec.title,
            description: spec.description,
            data: spec.data,
            status: TaskStatus::Pending,
            created: Utc::now(),
            workflow_id,
            priority: spec.priority,
        }
    }

    pub fn workflow_link(&self) -> Option<&WorkflowLink> {
        self.data.workflow_link()
    }

    /// Whether this task was generated for `step_id` of `workflow_id`.
    pub fn belongs_to_step(&self, workflow_id: Uuid, step_id: &str) -> bool {
        self.workflow_link()
            .is_some_and(|link| link.workflow_id == workflow_id && link.step_id == step_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Running,
    Completed,
}

/// Template element: one step of a workflow, bound to one agent role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub key: String,
    pub agent: AgentRole,
    pub action: String,
    pub description: String,
    pub auto_trigger: bool,
    pub template: StepTemplate,
}

/// A materialized step of a running workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowStep {
    /// Scoped to the owning workflow: `{workflow_id}:{key}`.
    pub id: String,
    /// Template step key, stable across workflow instances.
    pub key: String,
    pub agent: AgentRole,
    pub action: String,
    pub description: String,
    pub auto_trigger: bool,
    pub template: StepTemplate,
}

/// An instance of a workflow template in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workflow {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub project_name: String,
    pub initiator: AgentRole,
    pub steps: Vec<WorkflowStep>,
    pub status: WorkflowStatus,
    /// Invariant: `0 <= current_step <= steps.len()`; equal to the length once complete.
    pub current_step: usize,
    pub created: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Workflow {
    /// The step whose task is currently awaited, or `None` once complete.
    pub fn current(&self) -> Option<&WorkflowStep> {
        self.steps.get(self.current_step)
    }

    pub fn is_exhausted(&self) -> bool {
        self.current_step >= self.steps.len()
    }

    pub fn step_index(&self, step_id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn progress_percent(&self) -> u32 {
        if self.steps.is_empty() {
            return 100;
        }
        ((self.current_step as f64 / self.steps.len() as f64) * 100.0).round() as u32
    }
}

/// Last-known activity status of an agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[default]
    Idle,
    Active,
    Notified,
}

/// Ephemeral per-agent state, overwritten on every relevant event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentState {
    pub status: AgentStatus,
    pub last_active: Option<DateTime<Utc>>,
}
