// ── Telemetry service ──
//
// Lifecycle object that owns every component. `start` rehydrates the
// state file, spawns the connection driver and the background tasks, and
// kicks off the first connect. A single dispatch loop consumes the
// driver's `TransportEvent`s and fans them out to the cache, the offline
// sync, the alert aggregator, and the metrics broadcaster.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use solarsync_api::{Backend, Connector, Device, MetricsSnapshot, Reading};
use tokio::sync::{Mutex, MutexGuard, broadcast, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::alerts::{Alert, AlertAggregator};
use crate::cache::CacheEntry;
use crate::config::SyncConfig;
use crate::connection::{ConnectionConfig, ConnectionManager, ConnectionState, TransportEvent};
use crate::error::CoreError;
use crate::metrics::{MetricsBroadcaster, metrics_poll_task};
use crate::persist::{self, PersistedState, STATE_VERSION};
use crate::sync::{SyncPass, TelemetrySync};

const EVENT_CHANNEL_SIZE: usize = 256;

/// Notifications for live consumers (CLI, UI bridges).
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    Reading(Arc<Reading>),
    Alert(Alert),
    Metrics(Arc<MetricsSnapshot>),
    /// An offline → online transition reconciled the buffer.
    Synced { entries: usize, uploaded: bool },
}

/// Offline sync status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub online: bool,
    pub pending: usize,
    pub last_sync: Option<DateTime<Utc>>,
}

// ── TelemetryService ─────────────────────────────────────────────────

/// The main entry point for consumers.
///
/// Cheaply cloneable via `Arc<ServiceInner>`.
pub struct TelemetryService<B: Backend> {
    inner: Arc<ServiceInner<B>>,
}

impl<B: Backend> Clone for TelemetryService<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ServiceInner<B> {
    config: SyncConfig,
    backend: Arc<B>,
    connection: ConnectionManager,
    sync: Mutex<TelemetrySync>,
    alerts: Mutex<AlertAggregator>,
    devices: watch::Sender<Arc<Vec<Device>>>,
    metrics: Arc<MetricsBroadcaster>,
    /// Bumped on every change that belongs in the state file.
    revision: watch::Sender<u64>,
    events: broadcast::Sender<ServiceEvent>,
    cancel: CancellationToken,
    /// Long-lived tasks. Dispatch is always first.
    task_handles: Mutex<Vec<JoinHandle<()>>>,
    /// Per-connect catch-up and replay tasks, reaped on every spawn.
    transient: Mutex<JoinSet<()>>,
}

impl<B: Backend> TelemetryService<B> {
    /// Rehydrate persisted state, spawn the background tasks, and start
    /// connecting.
    pub async fn start<C: Connector>(
        config: SyncConfig,
        connector: C,
        backend: B,
    ) -> Result<Self, CoreError> {
        let mut sync = TelemetrySync::new(config.cache, config.offline);
        let (devices, _) = watch::channel(Arc::new(Vec::new()));

        if let Some(path) = &config.state_path {
            match persist::load(path).await {
                Ok(Some(state)) => {
                    info!(
                        path = %path.display(),
                        devices = state.devices.len(),
                        readings = state.reading_count(),
                        buffered = state.offline_buffer.len(),
                        "Restored state file"
                    );
                    sync.cache_mut().restore(state.cache_snapshot());
                    sync.restore(state.offline_buffer, state.last_sync);
                    devices.send_replace(Arc::new(state.devices));
                }
                Ok(None) => debug!(path = %path.display(), "No state file yet"),
                Err(e) => warn!(error = %e, "State file unreadable, starting empty"),
            }
        }

        let cancel = CancellationToken::new();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let connection = ConnectionManager::spawn(
            connector,
            ConnectionConfig::from(&config),
            transport_tx,
            cancel.child_token(),
        );
        let (revision, _) = watch::channel(0u64);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);

        let service = Self {
            inner: Arc::new(ServiceInner {
                config,
                backend: Arc::new(backend),
                connection,
                sync: Mutex::new(sync),
                alerts: Mutex::new(AlertAggregator::new()),
                devices,
                metrics: Arc::new(MetricsBroadcaster::new()),
                revision,
                events,
                cancel,
                task_handles: Mutex::new(Vec::new()),
                transient: Mutex::new(JoinSet::new()),
            }),
        };

        service.spawn_tasks(transport_rx).await;
        service.inner.connection.connect()?;
        Ok(service)
    }

    async fn spawn_tasks(&self, transport_rx: mpsc::UnboundedReceiver<TransportEvent>) {
        let mut handles = self.inner.task_handles.lock().await;

        {
            let svc = self.clone();
            let cancel = self.inner.cancel.child_token();
            handles.push(tokio::spawn(dispatch_task(svc, transport_rx, cancel)));
        }

        {
            let period = self.inner.config.poll_interval;
            if !period.is_zero() {
                handles.push(tokio::spawn(metrics_poll_task(
                    Arc::clone(&self.inner.backend),
                    Arc::clone(&self.inner.metrics),
                    self.inner.connection.watch_state(),
                    period,
                    self.inner.cancel.child_token(),
                )));
            }
        }

        if let Some(path) = self.inner.config.state_path.clone() {
            let svc = self.clone();
            let snapshot = move || {
                let svc = svc.clone();
                async move { svc.snapshot().await }
            };
            handles.push(tokio::spawn(persist::persist_task(
                path,
                self.inner.revision.subscribe(),
                snapshot,
                self.inner.cancel.child_token(),
            )));
        }
    }

    /// Stop every task, close the channel, and write a final snapshot.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.connection.shutdown().await;

        // Dispatch is the only spawner of transient tasks, so join it
        // before draining them.
        let handles: Vec<JoinHandle<()>> = self.inner.task_handles.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        let mut transient = std::mem::take(&mut *self.inner.transient.lock().await);
        while transient.join_next().await.is_some() {}

        if let Some(path) = &self.inner.config.state_path {
            let state = self.snapshot().await;
            if let Err(e) = persist::save(path, &state).await {
                warn!(error = %e, "Final state write failed");
            }
        }
        info!("Telemetry service stopped");
    }

    // ── Connection ───────────────────────────────────────────────────

    pub fn connection(&self) -> &ConnectionManager {
        &self.inner.connection
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.inner.connection.state()
    }

    pub fn subscribe_device(&self, device_id: impl Into<String>) -> Result<(), CoreError> {
        self.inner.connection.subscribe(device_id)
    }

    pub fn unsubscribe_device(&self, device_id: impl Into<String>) -> Result<(), CoreError> {
        self.inner.connection.unsubscribe(device_id)
    }

    /// External network signal (e.g. the host's online/offline events).
    ///
    /// Going offline stops sync immediately. Coming back online syncs if the
    /// channel is up, and otherwise reconnects now instead of waiting out
    /// the backoff.
    pub async fn set_network_online(&self, online: bool) -> Result<(), CoreError> {
        if !online {
            self.inner.sync.lock().await.set_online(false);
            return Ok(());
        }

        if self.inner.connection.state().connected {
            self.go_online().await;
            Ok(())
        } else {
            self.inner.connection.force_reconnect()
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub async fn cached_readings(&self, device_id: &str) -> Option<CacheEntry> {
        self.inner.sync.lock().await.cache_mut().get_cached(device_id)
    }

    pub async fn latest_reading(&self, device_id: &str) -> Option<Arc<Reading>> {
        self.inner.sync.lock().await.cache().latest(device_id)
    }

    /// Devices with cached readings.
    pub async fn cached_device_ids(&self) -> Vec<String> {
        self.inner.sync.lock().await.cache().device_ids()
    }

    /// Mark one device, or all, stale.
    pub async fn invalidate(&self, device_id: Option<&str>) {
        self.inner.sync.lock().await.cache_mut().invalidate(device_id);
    }

    pub fn devices(&self) -> Arc<Vec<Device>> {
        self.inner.devices.borrow().clone()
    }

    pub fn watch_devices(&self) -> watch::Receiver<Arc<Vec<Device>>> {
        self.inner.devices.subscribe()
    }

    /// Lock the alert aggregator for reads or lifecycle updates.
    pub async fn alerts(&self) -> MutexGuard<'_, AlertAggregator> {
        self.inner.alerts.lock().await
    }

    pub fn metrics(&self) -> &MetricsBroadcaster {
        &self.inner.metrics
    }

    pub async fn sync_status(&self) -> SyncStatus {
        let sync = self.inner.sync.lock().await;
        SyncStatus {
            online: sync.is_online(),
            pending: sync.pending(),
            last_sync: sync.last_sync(),
        }
    }

    /// Live notifications. Slow receivers may observe `Lagged`.
    pub fn events(&self) -> broadcast::Receiver<ServiceEvent> {
        self.inner.events.subscribe()
    }

    /// Recent readings straight from the REST collaborator.
    pub async fn device_history(
        &self,
        device_id: &str,
        limit: usize,
    ) -> Result<Vec<Reading>, CoreError> {
        Ok(self.inner.backend.device_history(device_id, limit).await?)
    }

    /// The document the state file would hold right now.
    pub async fn snapshot(&self) -> PersistedState {
        let devices = Vec::clone(&self.devices());
        let sync = self.inner.sync.lock().await;
        let cache = sync.cache().export();

        PersistedState {
            version: STATE_VERSION,
            devices,
            device_data: cache.device_data,
            device_cache: cache.device_cache,
            offline_buffer: sync.buffer().iter().cloned().collect(),
            last_sync: sync.last_sync(),
        }
    }

    /// Background tasks still running or not yet joined.
    pub async fn background_tasks(&self) -> usize {
        let long_lived = self.inner.task_handles.lock().await.len();
        let mut transient = self.inner.transient.lock().await;
        while transient.try_join_next().is_some() {}
        long_lived + transient.len()
    }

    pub fn state_path(&self) -> Option<&PathBuf> {
        self.inner.config.state_path.as_ref()
    }

    // ── Dispatch ─────────────────────────────────────────────────────

    async fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected { resubscribed } => {
                debug!(resubscribed = resubscribed.len(), "dispatch: connected");
                self.go_online().await;
                self.spawn_catch_up().await;
            }
            TransportEvent::Disconnected { reason } => {
                debug!(reason = %reason, "dispatch: disconnected");
                self.inner.sync.lock().await.set_online(false);
            }
            TransportEvent::Reading(reading) => {
                let buffered = self
                    .inner
                    .sync
                    .lock()
                    .await
                    .append(&reading.device_id, Arc::clone(&reading));
                if buffered {
                    debug!(device_id = %reading.device_id, "reading buffered");
                }
                self.bump_revision();
                let _ = self.inner.events.send(ServiceEvent::Reading(reading));
            }
            TransportEvent::Alerts(records) => {
                let mut alerts = self.inner.alerts.lock().await;
                for record in records {
                    let alert = Alert::from(record);
                    if alerts.add_alert(alert.clone()) {
                        let _ = self.inner.events.send(ServiceEvent::Alert(alert));
                    }
                }
            }
            TransportEvent::Metrics(snapshot) => {
                self.inner.metrics.publish(snapshot);
                if let Some(latest) = self.inner.metrics.latest() {
                    let _ = self.inner.events.send(ServiceEvent::Metrics(latest));
                }
            }
        }
    }

    async fn go_online(&self) {
        let pass = self.inner.sync.lock().await.set_online(true);
        if let Some(pass) = pass {
            self.bump_revision();
            if pass.entries.is_empty() {
                return;
            }
            let svc = self.clone();
            self.spawn_transient(async move { svc.replay(pass).await }).await;
        }
    }

    /// Reconcile a drained offline buffer.
    async fn replay(&self, pass: SyncPass) {
        let entries = pass.entries.len();
        if entries == 0 {
            return;
        }

        let uploaded = if self.inner.config.offline.replay_upload {
            match self.inner.backend.replay_readings(&pass.entries).await {
                Ok(()) => {
                    info!(entries, "Offline readings uploaded");
                    true
                }
                Err(e) => {
                    let e = CoreError::from(e);
                    warn!(
                        error = %e,
                        entries,
                        retryable = e.is_retryable(),
                        "Offline replay upload failed, dropping batch"
                    );
                    false
                }
            }
        } else {
            info!(entries, synced_at = %pass.synced_at, "Offline readings reconciled locally");
            false
        };

        let _ = self
            .inner
            .events
            .send(ServiceEvent::Synced { entries, uploaded });
    }

    /// Fetch the device list and current metrics after a connect.
    async fn spawn_catch_up(&self) {
        let svc = self.clone();
        let cancel = self.inner.cancel.child_token();
        self.spawn_transient(async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {}
                () = svc.catch_up() => {}
            }
        })
        .await;
    }

    async fn spawn_transient<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut transient = self.inner.transient.lock().await;
        while transient.try_join_next().is_some() {}
        transient.spawn(task);
    }

    async fn catch_up(&self) {
        match self.inner.backend.list_devices().await {
            Ok(devices) => {
                debug!(count = devices.len(), "catch-up: devices");
                self.inner.devices.send_replace(Arc::new(devices));
                self.bump_revision();
            }
            Err(e) => warn!(error = %e, "catch-up: device list failed"),
        }

        match self.inner.backend.current_metrics().await {
            Ok(snapshot) => self.inner.metrics.publish(snapshot),
            Err(e) => warn!(error = %e, "catch-up: metrics failed"),
        }
    }

    fn bump_revision(&self) {
        self.inner.revision.send_modify(|r| *r = r.wrapping_add(1));
    }
}

async fn dispatch_task<B: Backend>(
    service: TelemetryService<B>,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            event = events.recv() => {
                let Some(event) = event else { break };
                service.handle_event(event).await;
            }
        }
    }
    debug!("dispatch loop stopped");
}
