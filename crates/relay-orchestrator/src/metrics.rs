use crate::activity::AgentActivityTracker;
use crate::config::MetricsConfig;
use crate::engine::WorkflowEngine;
use crate::task_store::{AgentWorkload, TaskStats, TaskStore};
use crate::types::{AgentRole, Workflow, WorkflowStatus};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Linear extrapolation of accumulated cost.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostProjections {
    pub daily: f64,
    pub monthly: f64,
    pub annual: f64,
}

/// Derived monitoring snapshot. Never authoritative: always recomputed from
/// the task store, the workflow engine and the activity tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringMetrics {
    pub timestamp: DateTime<Utc>,
    pub uptime_seconds: i64,
    pub total_workflows: usize,
    pub active_workflows: usize,
    pub completed_workflows: usize,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub pending_tasks: usize,
    pub in_progress_tasks: usize,
    /// Percent of workflows completed, rounded.
    pub success_rate: u32,
    pub total_cost: f64,
    pub avg_cost_per_workflow: f64,
    pub cost_projections: CostProjections,
    pub bottlenecks: Vec<String>,
    pub recommendations: Vec<String>,
    pub agent_utilization: BTreeMap<AgentRole, AgentWorkload>,
}

/// Everything a recompute reads, captured up front.
#[derive(Debug, Clone, Default)]
pub struct MetricsInputs {
    pub workflows: Vec<Workflow>,
    pub tasks: TaskStats,
    pub all_agents_idle: bool,
}

/// Recomputes [`MonitoringMetrics`] on demand.
pub struct MetricsAggregator {
    tasks: Arc<TaskStore>,
    engine: Arc<WorkflowEngine>,
    activity: Arc<AgentActivityTracker>,
    config: MetricsConfig,
    started_at: DateTime<Utc>,
}

impl MetricsAggregator {
    pub fn new(
        tasks: Arc<TaskStore>,
        engine: Arc<WorkflowEngine>,
        activity: Arc<AgentActivityTracker>,
        config: MetricsConfig,
    ) -> Self {
        Self {
            tasks,
            engine,
            activity,
            config,
            started_at: Utc::now(),
        }
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub async fn recompute(&self) -> MonitoringMetrics {
        self.recompute_at(Utc::now()).await
    }

    pub async fn recompute_at(&self, now: DateTime<Utc>) -> MonitoringMetrics {
        let inputs = MetricsInputs {
            workflows: self.engine.all().await,
            tasks: self.tasks.stats().await,
            all_agents_idle: self.activity.all_idle().await,
        };
        derive(&inputs, &self.config, self.started_at, now)
    }
}

/// Pure metrics derivation.
pub fn derive(
    inputs: &MetricsInputs,
    config: &MetricsConfig,
    started_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> MonitoringMetrics {
    let total_workflows = inputs.workflows.len();
    let active_workflows = count_status(&inputs.workflows, WorkflowStatus::Running);
    let completed_workflows = count_status(&inputs.workflows, WorkflowStatus::Completed);

    let success_rate = if total_workflows == 0 {
        0
    } else {
        (100.0 * completed_workflows as f64 / total_workflows as f64).round() as u32
    };

    let total_cost = inputs.tasks.completed as f64 * config.cost_per_task
        + completed_workflows as f64 * config.cost_per_workflow;
    let avg_cost_per_workflow = if completed_workflows == 0 {
        0.0
    } else {
        total_cost / completed_workflows as f64
    };

    let uptime = now - started_at;
    let uptime_hours = uptime.num_milliseconds() as f64 / 3_600_000.0;
    let daily = if uptime_hours > 0.0 {
        total_cost / uptime_hours * 24.0
    } else {
        0.0
    };
    let cost_projections = CostProjections {
        daily,
        monthly: daily * 30.0,
        annual: daily * 365.0,
    };

    let bottlenecks = bottlenecks(inputs, config, now);

    let mut recommendations = Vec::new();
    if !bottlenecks.is_empty() {
        recommendations
            .push("Bottlenecks detected: consider adding agents or parallelizing tasks".to_string());
    }
    if total_workflows > 0 && success_rate < config.success_rate_target {
        recommendations.push(format!(
            "Success rate below {}%: investigate failing or stalled workflows",
            config.success_rate_target
        ));
    }
    if cost_projections.monthly > config.monthly_cost_alert {
        recommendations.push(format!(
            "Projected monthly cost above ${:.2}: optimize workflows to reduce cost",
            config.monthly_cost_alert
        ));
    }
    if inputs.all_agents_idle && active_workflows > 0 {
        recommendations
            .push("All agents idle while workflows are active: check task dispatch".to_string());
    }

    MonitoringMetrics {
        timestamp: now,
        uptime_seconds: uptime.num_seconds(),
        total_workflows,
        active_workflows,
        completed_workflows,
        total_tasks: inputs.tasks.total,
        completed_tasks: inputs.tasks.completed,
        pending_tasks: inputs.tasks.pending,
        in_progress_tasks: inputs.tasks.in_progress,
        success_rate,
        total_cost,
        avg_cost_per_workflow,
        cost_projections,
        bottlenecks,
        recommendations,
        agent_utilization: inputs.tasks.by_agent.clone(),
    }
}

fn count_status(workflows: &[Workflow], status: WorkflowStatus) -> usize {
    workflows.iter().filter(|w| w.status == status).count()
}

fn bottlenecks(inputs: &MetricsInputs, config: &MetricsConfig, now: DateTime<Utc>) -> Vec<String> {
    let mut found = Vec::new();

    // Ties go to the first role in declaration order.
    let busiest = inputs
        .tasks
        .by_agent
        .iter()
        .fold(None::<(AgentRole, usize)>, |best, (role, load)| match best {
            Some((_, max)) if load.pending <= max => best,
            _ => Some((*role, load.pending)),
        });
    if let Some((agent, pending)) = busiest {
        if pending >= config.pending_task_threshold {
            found.push(format!("Agent {agent} has {pending} pending tasks"));
        }
    }

    let blocked = inputs
        .workflows
        .iter()
        .filter(|w| w.status == WorkflowStatus::Running)
        .filter(|w| now - w.created > Duration::minutes(config.blocked_workflow_minutes))
        .count();
    if blocked > 0 {
        found.push(format!(
            "{blocked} workflow(s) running for more than {} minutes",
            config.blocked_workflow_minutes
        ));
    }

    found
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn workflow(status: WorkflowStatus, created: DateTime<Utc>) -> Workflow {
        Workflow {
            id: Uuid::new_v4(),
            name: "bug-fix".into(),
            description: String::new(),
            project_name: "Calc".into(),
            initiator: AgentRole::Orchestrator,
            steps: Vec::new(),
            status,
            current_step: 0,
            created,
            completed_at: None,
        }
    }

    fn load(total: usize, pending: usize) -> AgentWorkload {
        AgentWorkload { total, pending }
    }

    #[test]
    fn test_empty_system() {
        let now = Utc::now();
        let m = derive(&MetricsInputs::default(), &MetricsConfig::default(), now, now);
        assert_eq!(m.success_rate, 0);
        assert_eq!(m.total_cost, 0.0);
        assert_eq!(m.cost_projections, CostProjections::default());
        assert!(m.bottlenecks.is_empty());
        assert!(m.recommendations.is_empty());
    }

    #[test]
    fn test_success_rate_and_cost() {
        let now = Utc::now();
        let started = now - Duration::hours(24);
        let inputs = MetricsInputs {
            workflows: vec![
                workflow(WorkflowStatus::Completed, now),
                workflow(WorkflowStatus::Completed, now),
                workflow(WorkflowStatus::Running, now),
            ],
            tasks: TaskStats {
                total: 10,
                completed: 8,
                pending: 2,
                ..TaskStats::default()
            },
            all_agents_idle: false,
        };
        let m = derive(&inputs, &MetricsConfig::default(), started, now);

        assert_eq!(m.total_workflows, 3);
        assert_eq!(m.active_workflows, 1);
        assert_eq!(m.completed_workflows, 2);
        assert_eq!(m.success_rate, 67);
        // 8 * 0.05 + 2 * 0.25
        assert!((m.total_cost - 0.9).abs() < 1e-9);
        assert!((m.avg_cost_per_workflow - 0.45).abs() < 1e-9);
        assert!((m.cost_projections.daily - 0.9).abs() < 1e-9);
        assert!((m.cost_projections.monthly - 27.0).abs() < 1e-9);
        assert!((m.cost_projections.annual - 328.5).abs() < 1e-9);
        assert!(m.recommendations.iter().any(|r| r.starts_with("Success rate below 90%")));
    }

    #[test]
    fn test_pending_bottleneck_threshold() {
        let now = Utc::now();
        let mut inputs = MetricsInputs::default();
        inputs.tasks.by_agent.insert(AgentRole::Designer, load(2, 2));
        inputs.tasks.by_agent.insert(AgentRole::Qa, load(5, 2));
        let m = derive(&inputs, &MetricsConfig::default(), now, now);
        assert!(m.bottlenecks.is_empty());

        inputs.tasks.by_agent.insert(AgentRole::Qa, load(5, 3));
        let m = derive(&inputs, &MetricsConfig::default(), now, now);
        assert_eq!(m.bottlenecks, vec!["Agent qa has 3 pending tasks".to_string()]);
        assert!(m.recommendations[0].starts_with("Bottlenecks detected"));
        assert_eq!(m.agent_utilization[&AgentRole::Qa], load(5, 3));
    }

    #[test]
    fn test_blocked_workflow() {
        let now = Utc::now();
        let inputs = MetricsInputs {
            workflows: vec![
                workflow(WorkflowStatus::Running, now - Duration::minutes(61)),
                workflow(WorkflowStatus::Running, now - Duration::minutes(59)),
                workflow(WorkflowStatus::Completed, now - Duration::minutes(500)),
            ],
            ..MetricsInputs::default()
        };
        let m = derive(&inputs, &MetricsConfig::default(), now, now);
        assert_eq!(m.bottlenecks.len(), 1);
        assert!(m.bottlenecks[0].starts_with("1 workflow(s)"));
    }

    #[test]
    fn test_blocked_workflow_counts_partial_minutes() {
        let now = Utc::now();
        let age = |secs| MetricsInputs {
            workflows: vec![workflow(WorkflowStatus::Running, now - Duration::seconds(secs))],
            ..MetricsInputs::default()
        };
        let config = MetricsConfig::default();

        assert_eq!(derive(&age(60 * 60 + 50), &config, now, now).bottlenecks.len(), 1);
        assert!(derive(&age(60 * 60), &config, now, now).bottlenecks.is_empty());
    }

    #[test]
    fn test_metrics_round_trip_through_json() {
        let now = Utc::now();
        let inputs = MetricsInputs {
            tasks: TaskStats {
                total: 2,
                pending: 2,
                by_agent: BTreeMap::from([(AgentRole::Qa, load(2, 2))]),
                ..TaskStats::default()
            },
            ..MetricsInputs::default()
        };
        let m = derive(&inputs, &MetricsConfig::default(), now, now);
        let json = serde_json::to_string(&m).unwrap();
        let back: MonitoringMetrics = serde_json::from_str(&json).unwrap();
        assert_eq!(back.agent_utilization[&AgentRole::Qa], load(2, 2));
    }

    #[test]
    fn test_monthly_cost_alert() {
        let now = Utc::now();
        let inputs = MetricsInputs {
            workflows: vec![workflow(WorkflowStatus::Completed, now)],
            tasks: TaskStats {
                total: 100,
                completed: 100,
                ..TaskStats::default()
            },
            all_agents_idle: false,
        };
        // 5.25 over one hour projects to 126/day.
        let m = derive(&inputs, &MetricsConfig::default(), now - Duration::hours(1), now);
        assert!(m.cost_projections.monthly > 50.0);
        assert!(m.recommendations.iter().any(|r| r.contains("monthly cost")));
    }

    #[test]
    fn test_idle_agents_with_active_workflows() {
        let now = Utc::now();
        let inputs = MetricsInputs {
            workflows: vec![workflow(WorkflowStatus::Running, now)],
            all_agents_idle: true,
            ..MetricsInputs::default()
        };
        let m = derive(&inputs, &MetricsConfig::default(), now, now);
        assert!(m
            .recommendations
            .iter()
            .any(|r| r.starts_with("All agents idle")));
    }

    #[test]
    fn test_serializes_camel_case() {
        let now = Utc::now();
        let m = derive(&MetricsInputs::default(), &MetricsConfig::default(), now, now);
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("successRate").is_some());
        assert!(json["costProjections"].get("monthly").is_some());
    }
}
