use relay_core::{Event, EventKind};
use std::collections::HashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Receiving half handed to an observer on subscribe.
#[derive(Debug)]
pub struct Subscription {
    pub id: Uuid,
    pub receiver: mpsc::Receiver<Event>,
}

/// Best-effort fan-out of observer events.
///
/// Each subscriber owns a bounded queue. A subscriber whose queue is full or
/// whose receiver was dropped is removed on the next publish; publishing never
/// waits on a slow consumer.
pub struct EventBroadcaster {
    subscribers: RwLock<HashMap<Uuid, mpsc::Sender<Event>>>,
    capacity: usize,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Register a new observer.
    pub async fn subscribe(&self) -> Subscription {
        let (tx, receiver) = mpsc::channel(self.capacity);
        let id = Uuid::new_v4();
        self.subscribers.write().await.insert(id, tx);
        tracing::info!(subscriber_id = %id, "Observer subscribed");
        Subscription { id, receiver }
    }

    pub async fn unsubscribe(&self, id: Uuid) {
        if self.subscribers.write().await.remove(&id).is_some() {
            tracing::info!(subscriber_id = %id, "Observer unsubscribed");
        }
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Stamp and fan out an event. Returns the number of observers reached.
    pub async fn publish(&self, kind: EventKind, data: serde_json::Value) -> usize {
        self.publish_event(Event::new(kind, data)).await
    }

    pub async fn publish_event(&self, event: Event) -> usize {
        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let subs = self.subscribers.read().await;
            if subs.is_empty() {
                return 0;
            }
            for (id, tx) in subs.iter() {
                match tx.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut subs = self.subscribers.write().await;
            for id in &dead {
                subs.remove(id);
                tracing::warn!(subscriber_id = %id, event = %event.kind, "Pruned unresponsive observer");
            }
        }

        tracing::debug!(event = %event.kind, delivered, "Event published");
        delivered
    }

    /// Deliver an event to one observer only (replies to observer requests).
    pub async fn send_to(&self, id: Uuid, event: Event) -> bool {
        let subs = self.subscribers.read().await;
        match subs.get(&id) {
            Some(tx) => tx.try_send(event).is_ok(),
            None => false,
        }
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
