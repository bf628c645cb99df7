// ── Metrics broadcaster ──
//
// Holds the latest system-wide snapshot in a `watch` channel. Snapshots
// arrive as `system-metrics` events while connected; while disconnected a
// fallback task polls the REST collaborator instead.

use std::sync::Arc;
use std::time::Duration;

use solarsync_api::{Backend, MetricsSnapshot};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::connection::ConnectionState;

#[derive(Debug)]
pub struct MetricsBroadcaster {
    latest: watch::Sender<Option<Arc<MetricsSnapshot>>>,
}

impl Default for MetricsBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsBroadcaster {
    pub fn new() -> Self {
        let (latest, _) = watch::channel(None);
        Self { latest }
    }

    pub fn latest(&self) -> Option<Arc<MetricsSnapshot>> {
        self.latest.borrow().clone()
    }

    /// Replace the latest snapshot and notify subscribers.
    pub fn publish(&self, snapshot: MetricsSnapshot) {
        let snapshot = Arc::new(snapshot);
        self.latest.send_modify(|slot| *slot = Some(snapshot));
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<Arc<MetricsSnapshot>>> {
        self.latest.subscribe()
    }
}

/// Fallback poll for system metrics.
///
/// Fetches `GET /api/metrics/current` every `period`, but only on ticks
/// where the event channel is down. Failures wait for the next tick.
pub(crate) async fn metrics_poll_task<B: Backend>(
    backend: Arc<B>,
    metrics: Arc<MetricsBroadcaster>,
    connection: watch::Receiver<ConnectionState>,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    interval.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => {
                if connection.borrow().connected {
                    continue;
                }

                debug!("metrics_poll tick (channel down)");
                match backend.current_metrics().await {
                    Ok(snapshot) => metrics.publish(snapshot),
                    Err(e) if e.is_transient() => debug!(error = %e, "metrics_poll: backend unreachable"),
                    Err(e) => warn!(error = %e, "metrics_poll: fetch failed"),
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::Utc;
    use solarsync_api::{Device, Error as ApiError, OfflineEntry, Reading};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingBackend {
        calls: AtomicUsize,
    }

    impl Backend for CountingBackend {
        async fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
            Ok(Vec::new())
        }

        async fn current_metrics(&self) -> Result<MetricsSnapshot, ApiError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(snapshot(f64::from(u32::try_from(n).unwrap()) * 100.0))
        }

        async fn device_history(&self, _: &str, _: usize) -> Result<Vec<Reading>, ApiError> {
            Ok(Vec::new())
        }

        async fn replay_readings(&self, _: &[OfflineEntry]) -> Result<(), ApiError> {
            Ok(())
        }
    }

    fn snapshot(total_power: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            timestamp: Utc::now(),
            total_power,
            energy_today: 0.0,
            energy_total: 0.0,
            active_devices: 1,
            total_devices: 1,
            average_efficiency: None,
            extra: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn publish_notifies_subscribers() {
        let metrics = MetricsBroadcaster::new();
        let mut rx = metrics.subscribe();
        assert!(metrics.latest().is_none());

        metrics.publish(snapshot(1500.0));
        rx.changed().await.unwrap();

        let seen = rx.borrow().clone().unwrap();
        assert!((seen.total_power - 1500.0).abs() < f64::EPSILON);
        assert_eq!(metrics.latest().unwrap().total_power, seen.total_power);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_runs_only_while_channel_is_down() {
        let backend = Arc::new(CountingBackend::default());
        let metrics = Arc::new(MetricsBroadcaster::new());
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(metrics_poll_task(
            Arc::clone(&backend),
            Arc::clone(&metrics),
            state_rx,
            Duration::from_secs(30),
            cancel.clone(),
        ));

        // no fetch on the immediate first tick
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!((metrics.latest().unwrap().total_power - 100.0).abs() < f64::EPSILON);

        state_tx.send_modify(|s| s.connected = true);
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);

        state_tx.send_modify(|s| s.connected = false);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert!((metrics.latest().unwrap().total_power - 200.0).abs() < f64::EPSILON);

        cancel.cancel();
        task.await.unwrap();
    }
}
