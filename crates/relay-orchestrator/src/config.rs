use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Runtime settings for the orchestration core.
///
/// Every field is defaulted so a partial `[orchestrator]` table is accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Delay between a workflow task completing and the step advance running.
    #[serde(default = "default_advance_delay_ms")]
    pub advance_delay_ms: u64,
    /// Period of the background metrics recompute/broadcast.
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    /// Per-observer event buffer; an observer that falls this far behind is pruned.
    #[serde(default = "default_subscriber_capacity")]
    pub subscriber_capacity: usize,
    #[serde(default = "default_conversation_log_capacity")]
    pub conversation_log_capacity: usize,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

fn default_advance_delay_ms() -> u64 {
    1000
}

fn default_metrics_interval_secs() -> u64 {
    10
}

fn default_subscriber_capacity() -> usize {
    256
}

fn default_conversation_log_capacity() -> usize {
    100
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            advance_delay_ms: default_advance_delay_ms(),
            metrics_interval_secs: default_metrics_interval_secs(),
            subscriber_capacity: default_subscriber_capacity(),
            conversation_log_capacity: default_conversation_log_capacity(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl OrchestratorConfig {
    pub fn advance_delay(&self) -> Duration {
        Duration::from_millis(self.advance_delay_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs.max(1))
    }
}

/// Constants of the cost model and the bottleneck/recommendation heuristics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_cost_per_task")]
    pub cost_per_task: f64,
    #[serde(default = "default_cost_per_workflow")]
    pub cost_per_workflow: f64,
    /// An agent with at least this many pending tasks is a bottleneck.
    #[serde(default = "default_pending_task_threshold")]
    pub pending_task_threshold: usize,
    /// A running workflow older than this is reported as blocked.
    #[serde(default = "default_blocked_workflow_minutes")]
    pub blocked_workflow_minutes: i64,
    /// Success rate (percent) below which failures should be investigated.
    #[serde(default = "default_success_rate_target")]
    pub success_rate_target: u32,
    /// Monthly cost projection above which optimization is suggested.
    #[serde(default = "default_monthly_cost_alert")]
    pub monthly_cost_alert: f64,
}

fn default_cost_per_task() -> f64 {
    0.05
}

fn default_cost_per_workflow() -> f64 {
    0.25
}

fn default_pending_task_threshold() -> usize {
    3
}

fn default_blocked_workflow_minutes() -> i64 {
    60
}

fn default_success_rate_target() -> u32 {
    90
}

fn default_monthly_cost_alert() -> f64 {
    50.0
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cost_per_task: default_cost_per_task(),
            cost_per_workflow: default_cost_per_workflow(),
            pending_task_threshold: default_pending_task_threshold(),
            blocked_workflow_minutes: default_blocked_workflow_minutes(),
            success_rate_target: default_success_rate_target(),
            monthly_cost_alert: default_monthly_cost_alert(),
        }
    }
}
