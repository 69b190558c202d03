use crate::broadcaster::EventBroadcaster;
use crate::metrics::MetricsAggregator;
use relay_core::EventKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Start the periodic metrics broadcast.
///
/// Every `period` the metrics are recomputed and published as
/// `metrics_update`. The first publish happens one period after start.
/// Returns the [`JoinHandle`] so the caller can abort it on shutdown.
pub fn spawn_metrics_loop(
    metrics: Arc<MetricsAggregator>,
    events: Arc<EventBroadcaster>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            let snapshot = metrics.recompute().await;
            let data = match serde_json::to_value(&snapshot) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, "Metrics loop: failed to serialize snapshot");
                    continue;
                }
            };
            let delivered = events.publish(EventKind::MetricsUpdate, data).await;
            tracing::debug!(observers = delivered, "Metrics loop: published update");
        }
    })
}
