use crate::types::AgentRole;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::RwLock;

/// One line of the shared conversation log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub agent: AgentRole,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

/// Bounded, newest-last log of agent and orchestrator messages.
///
/// Entries are also mirrored to `tracing` at info level.
pub struct ConversationLog {
    entries: RwLock<VecDeque<LogEntry>>,
    capacity: usize,
}

impl ConversationLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub async fn append(
        &self,
        agent: AgentRole,
        message: impl Into<String>,
        context: Option<serde_json::Value>,
    ) -> LogEntry {
        let entry = LogEntry {
            timestamp: Utc::now(),
            agent,
            message: message.into(),
            context,
        };
        tracing::info!(agent = %agent, "{}", entry.message);

        let mut entries = self.entries.write().await;
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(entry.clone());
        entry
    }

    /// The most recent `limit` entries, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<LogEntry> {
        let entries = self.entries.read().await;
        let skip = entries.len().saturating_sub(limit);
        entries.iter().skip(skip).cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new(100)
    }
}
