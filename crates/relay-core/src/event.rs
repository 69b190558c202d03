use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Type vocabulary of observer events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskStatusChanged,
    WorkflowStarted,
    WorkflowStepProgressed,
    WorkflowCompleted,
    MetricsUpdate,
    AgentStatusChanged,
    /// Full dashboard snapshot sent to an observer right after it connects.
    InitialState,
    /// Reply to an observer's `get_current_state` request.
    CurrentState,
    /// Reply to an observer's `get_metrics` request.
    Metrics,
    /// Reply to an observer's `request_recommendations` request.
    Recommendations,
}

impl EventKind {
    /// Wire name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCreated => "task_created",
            Self::TaskStatusChanged => "task_status_changed",
            Self::WorkflowStarted => "workflow_started",
            Self::WorkflowStepProgressed => "workflow_step_progressed",
            Self::WorkflowCompleted => "workflow_completed",
            Self::MetricsUpdate => "metrics_update",
            Self::AgentStatusChanged => "agent_status_changed",
            Self::InitialState => "initial_state",
            Self::CurrentState => "current_state",
            Self::Metrics => "metrics",
            Self::Recommendations => "recommendations",
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged event pushed to observers: `{ type, timestamp, data }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

impl Event {
    /// Stamp a new event with the current time.
    pub fn new(kind: EventKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }

    /// Serialize to the JSON text frame sent over the observer transport.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
