use thiserror::Error;
use uuid::Uuid;

/// Top-level error type for Relay.
///
/// Lookup failures and rejected transitions are surfaced to the caller and
/// never retried internally. "Not ready yet" outcomes of workflow advancement
/// are not errors; see `StepAdvance` in `relay-orchestrator`.
#[derive(Error, Debug)]
pub enum RelayError {
    /// No task with this id exists.
    #[error("Task {0} not found")]
    TaskNotFound(Uuid),

    /// No workflow with this id exists.
    #[error("Workflow {0} not found")]
    WorkflowNotFound(Uuid),

    /// The workflow catalog has no template with this name.
    #[error("Unknown workflow type: {0}")]
    UnknownWorkflowType(String),

    /// A status update would move a task backward or mutate a completed task.
    #[error("Invalid transition for task {task}: {from} -> {to}")]
    InvalidTransition {
        /// The task whose status update was rejected.
        task: Uuid,
        /// Status the task currently has.
        from: String,
        /// Status that was requested.
        to: String,
    },

    /// The agent name is not one of the known roles.
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    /// The tool-call layer asked for an operation that does not exist.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// Tool-call arguments were missing or malformed.
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// An external collaborator (version control, PR API) reported failure.
    #[error("Collaborator error: {0}")]
    Collaborator(String),

    /// Configuration parsing or validation failed.
    #[error("Config error: {0}")]
    Config(String),

    /// Failure in the observer/tool-call gateway.
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`RelayError`].
pub type RelayResult<T> = Result<T, RelayError>;

impl RelayError {
    /// Whether this error means the referenced task or workflow does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            RelayError::TaskNotFound(_) | RelayError::WorkflowNotFound(_)
        )
    }
}
