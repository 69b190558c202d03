use crate::broadcaster::EventBroadcaster;
use crate::types::{AgentRole, AgentState, AgentStatus};
use chrono::Utc;
use relay_core::EventKind;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Last-known status of every agent role. Never historized.
pub struct AgentActivityTracker {
    states: RwLock<HashMap<AgentRole, AgentState>>,
    events: Arc<EventBroadcaster>,
}

impl AgentActivityTracker {
    pub fn new(events: Arc<EventBroadcaster>) -> Self {
        let states = AgentRole::ALL
            .into_iter()
            .map(|role| (role, AgentState::default()))
            .collect();
        Self {
            states: RwLock::new(states),
            events,
        }
    }

    /// Overwrite an agent's status, stamp `last_active`, and notify observers.
    pub async fn record(&self, role: AgentRole, status: AgentStatus) {
        let now = Utc::now();
        {
            let mut states = self.states.write().await;
            let state = states.entry(role).or_default();
            state.status = status;
            state.last_active = Some(now);
        }
        self.events
            .publish(
                EventKind::AgentStatusChanged,
                serde_json::json!({
                    "agent": role,
                    "status": status,
                    "lastActive": now,
                }),
            )
            .await;
    }

    pub async fn get_state(&self, role: AgentRole) -> AgentState {
        self.states
            .read()
            .await
            .get(&role)
            .cloned()
            .unwrap_or_default()
    }

    /// All agent states, ordered by role.
    pub async fn snapshot(&self) -> Vec<(AgentRole, AgentState)> {
        let states = self.states.read().await;
        let mut all: Vec<(AgentRole, AgentState)> =
            states.iter().map(|(role, s)| (*role, s.clone())).collect();
        all.sort_by_key(|(role, _)| *role);
        all
    }

    pub async fn all_idle(&self) -> bool {
        self.states
            .read()
            .await
            .values()
            .all(|s| s.status == AgentStatus::Idle)
    }
}
