//! Workflow orchestration and dispatch engine for Relay.
//!
//! Tracks tasks flowing between a fixed set of agent roles, drives templated
//! multi-step workflows forward as their tasks complete, derives monitoring
//! metrics, and fans every state change out to live observers.
//!
//! # Main types
//!
//! - [`Orchestrator`] — Facade exposing every operation; owns the background work.
//! - [`TaskStore`] — The shared task table with dispatch-ordered listings.
//! - [`WorkflowEngine`] — Per-workflow step state machine with idempotent advance.
//! - [`WorkflowCatalog`] — Built-in workflow templates.
//! - [`MetricsAggregator`] — Counters, cost projection, bottlenecks, recommendations.
//! - [`EventBroadcaster`] — Fan-out of observer events, pruning slow or dead subscribers.
//! - [`AgentActivityTracker`] — Last-known status of every agent role.

/// Last-known agent status.
pub mod activity;
/// Observer event fan-out.
pub mod broadcaster;
/// Built-in workflow templates.
pub mod catalog;
/// Version-control collaborator and template-driven actions.
pub mod collaborator;
/// Orchestrator and metrics configuration.
pub mod config;
/// Workflow state machine.
pub mod engine;
/// Bounded conversation log.
pub mod log;
/// Monitoring metrics derivation.
pub mod metrics;
/// The operation facade.
pub mod orchestrator;
/// Periodic metrics broadcast.
pub mod scheduler;
/// Shared task table.
pub mod task_store;
/// Shared orchestration types (Task, Workflow, AgentRole, etc.).
pub mod types;

pub use activity::AgentActivityTracker;
pub use broadcaster::{EventBroadcaster, Subscription};
pub use catalog::WorkflowCatalog;
pub use collaborator::{CollaboratorReply, GitCommand, PullRequest, VersionControl};
pub use config::{MetricsConfig, OrchestratorConfig};
pub use engine::{StepAdvance, StepTrigger, WorkflowEngine, WorkflowSummary};
pub use log::{ConversationLog, LogEntry};
pub use metrics::{CostProjections, MetricsAggregator, MonitoringMetrics};
pub use orchestrator::{
    AgentTaskList, DashboardState, ObserverRequest, Orchestrator, PendingAgents, TaskView,
};
pub use task_store::{AgentWorkload, TaskStats, TaskStore};
pub use types::{
    AgentRole, AgentState, AgentStatus, NewTask, Priority, StepTemplate, Task, TaskKind,
    TaskPayload, TaskStatus, Workflow, WorkflowLink, WorkflowStatus, WorkflowStep,
};
