// End-to-end tests for `TelemetryService` with an in-memory channel and a
// fake REST collaborator.

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio::sync::mpsc;

use solarsync_api::{
    AlertPayload, AlertRecord, Backend, Connector, Device, Error as ApiError, Link, MetricsSnapshot,
    OfflineEntry, Reading, RemoteEnd, ServerEvent,
};
use solarsync_core::persist::{self, PersistedState};
use solarsync_core::{ServiceEvent, Severity, SyncConfig, TelemetryService};

// ── Fakes ───────────────────────────────────────────────────────────

struct TestConnector {
    up: Arc<AtomicBool>,
    remotes: mpsc::UnboundedSender<RemoteEnd>,
}

impl Connector for TestConnector {
    async fn connect(&self) -> Result<Link, ApiError> {
        if !self.up.load(Ordering::SeqCst) {
            return Err(ApiError::WebSocketConnect("connection refused".into()));
        }
        let (link, remote) = Link::in_memory();
        let _ = self.remotes.send(remote);
        Ok(link)
    }
}

#[derive(Clone, Default)]
struct FakeBackend {
    metrics_calls: Arc<AtomicUsize>,
    replays: Arc<std::sync::Mutex<Vec<Vec<OfflineEntry>>>>,
}

impl Backend for FakeBackend {
    async fn list_devices(&self) -> Result<Vec<Device>, ApiError> {
        Ok(vec![
            serde_json::from_value(json!({"id": "inv-01", "name": "Roof", "type": "inverter"}))
                .unwrap(),
        ])
    }

    async fn current_metrics(&self) -> Result<MetricsSnapshot, ApiError> {
        self.metrics_calls.fetch_add(1, Ordering::SeqCst);
        Ok(metrics(900.0))
    }

    async fn device_history(&self, device_id: &str, limit: usize) -> Result<Vec<Reading>, ApiError> {
        Ok((0..limit)
            .map(|n| reading(device_id, f64::from(u32::try_from(n).unwrap())))
            .collect())
    }

    async fn replay_readings(&self, batch: &[OfflineEntry]) -> Result<(), ApiError> {
        self.replays.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

fn reading(device_id: &str, power: f64) -> Reading {
    Reading {
        device_id: device_id.into(),
        timestamp: Utc::now(),
        power,
        voltage: 240.0,
        current: 5.0,
        temperature: 30.0,
        energy_today: 1.0,
        energy_total: 100.0,
        status: solarsync_api::DeviceStatus::Online,
    }
}

fn metrics(total_power: f64) -> MetricsSnapshot {
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

struct Harness {
    service: TelemetryService<FakeBackend>,
    backend: FakeBackend,
    up: Arc<AtomicBool>,
    remotes: mpsc::UnboundedReceiver<RemoteEnd>,
}

async fn start(up: bool, tweak: impl FnOnce(&mut SyncConfig)) -> Harness {
    let mut config = SyncConfig::new(
        "ws://solar.test/events".parse().unwrap(),
        "http://solar.test/".parse().unwrap(),
    );
    tweak(&mut config);

    let up = Arc::new(AtomicBool::new(up));
    let (remote_tx, remotes) = mpsc::unbounded_channel();
    let backend = FakeBackend::default();
    let connector = TestConnector {
        up: Arc::clone(&up),
        remotes: remote_tx,
    };

    let service = TelemetryService::start(config, connector, backend.clone())
        .await
        .unwrap();
    Harness {
        service,
        backend,
        up,
        remotes,
    }
}

/// Let the driver and dispatch loop drain their queues.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

// ── Tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn readings_reach_cache_and_live_stream() {
    let mut h = start(true, |_| {}).await;
    let mut events = h.service.events();
    let remote = h.remotes.recv().await.unwrap();
    settle().await;

    remote.push(ServerEvent::DeviceData(reading("inv-01", 1200.0)));
    remote.push(ServerEvent::DeviceData(reading("inv-01", 1300.0)));
    settle().await;

    let entry = h.service.cached_readings("inv-01").await.unwrap();
    assert_eq!(entry.readings.len(), 2);
    assert!((entry.readings[0].power - 1300.0).abs() < f64::EPSILON);
    assert_eq!(h.service.connection_state().stats.total_data_received, 2);

    let first = loop {
        if let ServiceEvent::Reading(r) = events.recv().await.unwrap() {
            break r;
        }
    };
    assert!((first.power - 1200.0).abs() < f64::EPSILON);
    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn connect_performs_baseline_catch_up() {
    let mut h = start(true, |_| {}).await;
    let _remote = h.remotes.recv().await.unwrap();
    settle().await;

    assert_eq!(h.service.devices().len(), 1);
    assert_eq!(h.service.devices()[0].id, "inv-01");
    assert!(h.service.metrics().latest().is_some());
    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn channel_loss_takes_sync_offline_until_reconnect() {
    let mut h = start(true, |_| {}).await;
    let remote = h.remotes.recv().await.unwrap();
    settle().await;
    assert!(h.service.sync_status().await.online);

    remote.push(ServerEvent::Disconnect {
        reason: "transport close".into(),
    });
    settle().await;
    assert!(!h.service.sync_status().await.online);
    assert!(!h.service.connection_state().connected);

    // retry fires after 1s and the link comes back
    let _remote = h.remotes.recv().await.unwrap();
    settle().await;
    assert!(h.service.sync_status().await.online);
    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn flapping_link_does_not_accumulate_tasks() {
    let mut h = start(true, |_| {}).await;
    let mut remote = h.remotes.recv().await.unwrap();
    settle().await;
    let baseline = h.service.background_tasks().await;

    for _ in 0..50 {
        remote.push(ServerEvent::Disconnect {
            reason: "transport close".into(),
        });
        settle().await;
        h.service.connection().force_reconnect().unwrap();
        remote = h.remotes.recv().await.unwrap();
        settle().await;
    }

    assert!(h.service.sync_status().await.online);
    assert_eq!(h.service.background_tasks().await, baseline);

    h.service.shutdown().await;
    assert_eq!(h.service.background_tasks().await, 0);
}

#[tokio::test(start_paused = true)]
async fn network_offline_buffers_and_reconnect_flushes_once() {
    let mut h = start(true, |c| c.offline.replay_upload = true).await;
    let remote = h.remotes.recv().await.unwrap();
    settle().await;

    h.service.set_network_online(false).await.unwrap();
    for n in 0..3 {
        remote.push(ServerEvent::DeviceData(reading("inv-02", f64::from(n))));
    }
    settle().await;
    assert_eq!(h.service.sync_status().await.pending, 3);
    assert_eq!(h.service.cached_readings("inv-02").await.unwrap().readings.len(), 3);

    h.service.set_network_online(true).await.unwrap();
    settle().await;
    let status = h.service.sync_status().await;
    assert!(status.online);
    assert_eq!(status.pending, 0);
    assert!(status.last_sync.is_some());

    // a second online signal does not replay again
    h.service.set_network_online(true).await.unwrap();
    settle().await;

    let replays = h.backend.replays.lock().unwrap().clone();
    assert_eq!(replays.len(), 1);
    assert_eq!(replays[0].len(), 3);
    assert_eq!(replays[0][0].device_id, "inv-02");
    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn replay_is_log_only_by_default() {
    let mut h = start(true, |_| {}).await;
    let remote = h.remotes.recv().await.unwrap();
    settle().await;

    h.service.set_network_online(false).await.unwrap();
    remote.push(ServerEvent::DeviceData(reading("inv-01", 1.0)));
    settle().await;

    let mut events = h.service.events();
    h.service.set_network_online(true).await.unwrap();
    settle().await;

    assert!(h.backend.replays.lock().unwrap().is_empty());
    assert_eq!(h.service.sync_status().await.pending, 0);
    let synced = loop {
        if let ServiceEvent::Synced { entries, uploaded } = events.recv().await.unwrap() {
            break (entries, uploaded);
        }
    };
    assert_eq!(synced, (1, false));
    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn fallback_poll_only_runs_while_disconnected() {
    let h = start(false, |_| {}).await;

    tokio::time::sleep(Duration::from_secs(65)).await;
    assert_eq!(h.backend.metrics_calls.load(Ordering::SeqCst), 2);
    assert!(h.service.metrics().latest().is_some());

    // once connected, the catch-up fetch is the only metrics call
    h.up.store(true, Ordering::SeqCst);
    h.service.connection().force_reconnect().unwrap();
    settle().await;
    let after_connect = h.backend.metrics_calls.load(Ordering::SeqCst);
    assert_eq!(after_connect, 3);

    tokio::time::sleep(Duration::from_secs(90)).await;
    assert_eq!(h.backend.metrics_calls.load(Ordering::SeqCst), after_connect);
    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn pushed_metrics_and_alerts_are_dispatched() {
    let mut h = start(true, |_| {}).await;
    let remote = h.remotes.recv().await.unwrap();
    settle().await;

    remote.push(ServerEvent::SystemMetrics(metrics(4200.0)));
    remote.push(ServerEvent::DeviceAlerts(AlertPayload::Batch {
        device_id: "bat-1".into(),
        alerts: vec![
            AlertRecord {
                id: "a-1".into(),
                device_id: None,
                severity: Severity::Critical,
                message: "Battery over temperature".into(),
                timestamp: Utc::now(),
            },
            AlertRecord {
                id: "a-2".into(),
                device_id: None,
                severity: Severity::Warning,
                message: "Charge rate limited".into(),
                timestamp: Utc::now(),
            },
        ],
    }));
    settle().await;

    let latest = h.service.metrics().latest().unwrap();
    assert!((latest.total_power - 4200.0).abs() < f64::EPSILON);

    let mut alerts = h.service.alerts().await;
    assert_eq!(alerts.unread_count(), 2);
    assert_eq!(alerts.current_critical().unwrap().id, "a-1");
    assert_eq!(alerts.get("a-2").unwrap().device_id.as_deref(), Some("bat-1"));
    alerts.acknowledge_alert("a-1");
    assert_eq!(alerts.unread_count(), 1);
    drop(alerts);

    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn subscription_made_offline_is_sent_after_connect() {
    let mut h = start(false, |_| {}).await;
    h.service.subscribe_device("dev-7").unwrap();
    settle().await;

    h.up.store(true, Ordering::SeqCst);
    // first retry fires after 1s
    let mut remote = h.remotes.recv().await.unwrap();
    assert_eq!(
        remote.next_message().await,
        Some(solarsync_api::ClientMessage::SubscribeDevice("dev-7".into()))
    );
    h.service.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn device_history_passes_through() {
    let h = start(false, |_| {}).await;
    let history = h.service.device_history("inv-09", 3).await.unwrap();
    assert_eq!(history.len(), 3);
    assert!(history.iter().all(|r| r.device_id == "inv-09"));
    h.service.shutdown().await;
}

#[tokio::test]
async fn state_is_rehydrated_before_connect_and_saved_on_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    let buffered = OfflineEntry {
        device_id: "inv-05".into(),
        reading: reading("inv-05", 10.0),
        captured_at: Utc::now(),
    };
    let seeded = PersistedState {
        devices: vec![
            serde_json::from_value(json!({"id": "inv-05", "name": "Carport", "type": "inverter"}))
                .unwrap(),
        ],
        device_data: BTreeMap::from([(
            "inv-05".to_string(),
            vec![reading("inv-05", 20.0), reading("inv-05", 10.0)],
        )]),
        offline_buffer: vec![buffered],
        ..PersistedState::default()
    };
    persist::save(&path, &seeded).await.unwrap();

    let state_path = path.clone();
    let h = start(false, move |c| {
        c.state_path = Some(state_path);
        c.poll_interval = Duration::ZERO;
    })
    .await;

    assert_eq!(h.service.devices()[0].name, "Carport");
    assert_eq!(h.service.cached_readings("inv-05").await.unwrap().readings.len(), 2);
    assert_eq!(h.service.sync_status().await.pending, 1);

    h.service.shutdown().await;

    let saved = persist::load(&path).await.unwrap().unwrap();
    assert_eq!(saved.version, persist::STATE_VERSION);
    assert_eq!(saved.device_data["inv-05"].len(), 2);
    assert_eq!(saved.offline_buffer.len(), 1);
    assert_eq!(saved.devices.len(), 1);
}
