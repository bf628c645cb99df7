// ── Connection manager ──
//
// A single driver task owns the event-channel `Link`, the retry timer,
// the heartbeat, and the remembered subscription set. Handles talk to it
// through an mpsc control channel, so every transport mutation is
// serialized and at most one connection attempt is ever in flight.
//
// Inbound events are decoded into `TransportEvent`s and forwarded to
// whoever owns the event receiver (normally `TelemetryService`).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::Serialize;
use solarsync_api::{AlertRecord, ClientMessage, Connector, Link, MetricsSnapshot, Reading, ServerEvent};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::{BackoffConfig, SyncConfig};
use crate::error::CoreError;

// ── Observable state ─────────────────────────────────────────────────

/// Counters maintained by the connection manager. Nothing else writes them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStats {
    /// Consecutive failures since the last successful connect.
    pub reconnect_attempts: u32,
    pub last_connected: Option<DateTime<Utc>>,
    pub last_disconnected: Option<DateTime<Utc>>,
    /// `device-data` events received over the lifetime of the manager.
    pub total_data_received: u64,
    /// Running two-point average of heartbeat round trips.
    pub average_latency_ms: f64,
}

/// Connection state observable by consumers.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionState {
    pub connected: bool,
    pub connecting: bool,
    pub stats: ConnectionStats,
    /// Delay of the currently scheduled retry, if one is pending.
    #[serde(with = "duration_ms")]
    pub retry_in: Option<Duration>,
}

mod duration_ms {
    use std::time::Duration;

    use serde::Serializer;

    #[allow(clippy::ref_option)]
    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }
}

/// Typed events the driver forwards to the dispatch loop.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A link was established and every remembered subscription re-sent.
    Connected { resubscribed: Vec<String> },
    /// An established link was lost.
    Disconnected { reason: String },
    Reading(Arc<Reading>),
    Alerts(Vec<AlertRecord>),
    Metrics(MetricsSnapshot),
}

/// Knobs the driver needs, split out of [`SyncConfig`].
#[derive(Debug, Clone, Copy)]
pub struct ConnectionConfig {
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
    pub heartbeat_interval: Duration,
}

impl From<&SyncConfig> for ConnectionConfig {
    fn from(config: &SyncConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            backoff: config.backoff,
            heartbeat_interval: config.heartbeat_interval,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(20),
            backoff: BackoffConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

// ── Handle ───────────────────────────────────────────────────────────

#[derive(Debug)]
enum Control {
    Connect,
    ForceReconnect,
    Subscribe(String),
    Unsubscribe(String),
}

/// Handle to the connection driver task.
pub struct ConnectionManager {
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<ConnectionState>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionManager {
    /// Spawn the driver. Nothing connects until [`connect`](Self::connect).
    ///
    /// Inbound traffic is forwarded to `events`. The driver stops when
    /// `cancel` fires or [`shutdown`](Self::shutdown) is called.
    pub fn spawn<C: Connector>(
        connector: C,
        config: ConnectionConfig,
        events: mpsc::UnboundedSender<TransportEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::default());

        let driver = Driver {
            connector: Arc::new(connector),
            config,
            control: control_rx,
            events,
            state: state_tx,
            link: None,
            attempt: None,
            retry_at: None,
            heartbeat: None,
            ping_sent: None,
            subscriptions: IndexSet::new(),
        };
        let task = tokio::spawn(driver.run(cancel.clone()));

        Self {
            control: control_tx,
            state: state_rx,
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// Start connecting if idle. No-op while connected or connecting.
    pub fn connect(&self) -> Result<(), CoreError> {
        self.send(Control::Connect)
    }

    /// Drop any pending retry and the current link, then connect now.
    pub fn force_reconnect(&self) -> Result<(), CoreError> {
        self.send(Control::ForceReconnect)
    }

    /// Remember `device_id`; the request goes out now if connected and
    /// on every subsequent connect.
    pub fn subscribe(&self, device_id: impl Into<String>) -> Result<(), CoreError> {
        self.send(Control::Subscribe(device_id.into()))
    }

    pub fn unsubscribe(&self, device_id: impl Into<String>) -> Result<(), CoreError> {
        self.send(Control::Unsubscribe(device_id.into()))
    }

    /// Current state snapshot.
    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Subscribe to state changes.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Stop the driver and wait for it to close the link.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        if let Some(task) = self.task.lock().await.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "connection driver panicked");
            }
        }
    }

    fn send(&self, control: Control) -> Result<(), CoreError> {
        self.control
            .send(control)
            .map_err(|_| CoreError::Internal("connection driver stopped".into()))
    }
}

// ── Driver ───────────────────────────────────────────────────────────

type Attempt = Pin<Box<dyn Future<Output = Result<Link, CoreError>> + Send>>;

enum Step {
    Shutdown,
    Control(Control),
    Attempt(Result<Link, CoreError>),
    Inbound(Option<ServerEvent>),
    Retry,
    Heartbeat,
}

struct Driver<C> {
    connector: Arc<C>,
    config: ConnectionConfig,
    control: mpsc::UnboundedReceiver<Control>,
    events: mpsc::UnboundedSender<TransportEvent>,
    state: watch::Sender<ConnectionState>,
    link: Option<Link>,
    attempt: Option<Attempt>,
    retry_at: Option<Instant>,
    heartbeat: Option<Interval>,
    ping_sent: Option<Instant>,
    subscriptions: IndexSet<String>,
}

impl<C: Connector> Driver<C> {
    async fn run(mut self, cancel: CancellationToken) {
        loop {
            let step = tokio::select! {
                biased;
                () = cancel.cancelled() => Step::Shutdown,
                control = self.control.recv() => control.map_or(Step::Shutdown, Step::Control),
                result = next_attempt(&mut self.attempt) => Step::Attempt(result),
                event = next_inbound(&mut self.link) => Step::Inbound(event),
                () = retry_due(self.retry_at) => Step::Retry,
                () = next_tick(&mut self.heartbeat) => Step::Heartbeat,
            };

            match step {
                Step::Shutdown => break,
                Step::Control(control) => self.handle_control(control),
                Step::Attempt(Ok(link)) => self.on_connected(link),
                Step::Attempt(Err(e)) => {
                    self.attempt = None;
                    self.on_failure(&e.to_string());
                }
                Step::Inbound(Some(event)) => self.handle_event(event),
                Step::Inbound(None) => self.on_failure("link closed"),
                Step::Retry => {
                    self.retry_at = None;
                    self.start_attempt();
                }
                Step::Heartbeat => self.send_ping(),
            }
        }

        self.teardown();
        debug!("connection driver stopped");
    }

    fn handle_control(&mut self, control: Control) {
        match control {
            Control::Connect => {
                if self.link.is_none() && self.attempt.is_none() {
                    self.retry_at = None;
                    self.start_attempt();
                }
            }
            Control::ForceReconnect => {
                info!("Forced reconnect");
                self.retry_at = None;
                self.drop_link("forced reconnect");
                // replaces, and so cancels, any attempt still in flight
                self.start_attempt();
            }
            Control::Subscribe(id) => {
                if self.subscriptions.insert(id.clone()) {
                    debug!(device_id = %id, deferred = self.link.is_none(), "subscribe");
                    self.send_message(ClientMessage::SubscribeDevice(id));
                }
            }
            Control::Unsubscribe(id) => {
                if self.subscriptions.shift_remove(&id) {
                    debug!(device_id = %id, "unsubscribe");
                    self.send_message(ClientMessage::UnsubscribeDevice(id));
                }
            }
        }
    }

    fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Connect => debug!("Backend acknowledged session"),
            ServerEvent::Disconnect { reason } => self.on_failure(&reason),
            ServerEvent::ConnectError { error } => self.on_failure(&error),
            ServerEvent::DeviceData(reading) => {
                self.state
                    .send_modify(|s| s.stats.total_data_received += 1);
                self.emit(TransportEvent::Reading(Arc::new(reading)));
            }
            ServerEvent::DeviceAlerts(payload) => {
                self.emit(TransportEvent::Alerts(payload.into_records()));
            }
            ServerEvent::SystemMetrics(snapshot) => self.emit(TransportEvent::Metrics(snapshot)),
            ServerEvent::Pong => self.on_pong(),
        }
    }

    // ── Transitions ──────────────────────────────────────────────────

    fn start_attempt(&mut self) {
        let connector = Arc::clone(&self.connector);
        let timeout = self.config.connect_timeout;

        self.attempt = Some(Box::pin(async move {
            match tokio::time::timeout(timeout, connector.connect()).await {
                Ok(result) => result.map_err(CoreError::from),
                Err(_) => Err(CoreError::ConnectionTimeout {
                    timeout_secs: timeout.as_secs(),
                }),
            }
        }));

        self.state.send_modify(|s| {
            s.connecting = true;
            s.retry_in = None;
        });
        debug!("Connection attempt started");
    }

    fn on_connected(&mut self, link: Link) {
        self.attempt = None;
        self.retry_at = None;

        let mut resubscribed = Vec::with_capacity(self.subscriptions.len());
        for id in &self.subscriptions {
            if let Err(e) = link.send(ClientMessage::SubscribeDevice(id.clone())) {
                debug!(device_id = %id, error = %e, "resubscribe failed");
                continue;
            }
            resubscribed.push(id.clone());
        }
        self.link = Some(link);

        let period = self.config.heartbeat_interval;
        self.heartbeat = Some(tokio::time::interval_at(Instant::now() + period, period));
        self.ping_sent = None;

        self.state.send_modify(|s| {
            s.connected = true;
            s.connecting = false;
            s.retry_in = None;
            s.stats.reconnect_attempts = 0;
            s.stats.last_connected = Some(Utc::now());
        });

        info!(resubscribed = resubscribed.len(), "Event channel connected");
        self.emit(TransportEvent::Connected { resubscribed });
    }

    /// Any failure: close what is open and schedule exactly one retry.
    fn on_failure(&mut self, reason: &str) {
        self.attempt = None;
        self.drop_link(reason);

        let attempts = self.state.borrow().stats.reconnect_attempts;
        let delay = self.config.backoff.delay(attempts);
        self.retry_at = Some(Instant::now() + delay);

        self.state.send_modify(|s| {
            s.connecting = false;
            s.retry_in = Some(delay);
            s.stats.reconnect_attempts = attempts.saturating_add(1);
            s.stats.last_disconnected = Some(Utc::now());
        });

        warn!(
            reason,
            attempt = attempts + 1,
            delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            "Event channel unavailable, retry scheduled"
        );
    }

    /// Close the current link, if any, and announce the loss.
    fn drop_link(&mut self, reason: &str) {
        self.heartbeat = None;
        self.ping_sent = None;

        let Some(link) = self.link.take() else {
            return;
        };
        link.close();

        self.state.send_modify(|s| {
            s.connected = false;
            s.stats.last_disconnected = Some(Utc::now());
        });
        info!(reason, "Event channel disconnected");
        self.emit(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    fn teardown(&mut self) {
        self.attempt = None;
        self.retry_at = None;
        self.heartbeat = None;
        if let Some(link) = self.link.take() {
            link.close();
        }
        self.state.send_modify(|s| {
            s.connected = false;
            s.connecting = false;
            s.retry_in = None;
        });
    }

    // ── Heartbeat ────────────────────────────────────────────────────

    fn send_ping(&mut self) {
        trace!("heartbeat ping");
        self.ping_sent = Some(Instant::now());
        self.send_message(ClientMessage::Ping);
    }

    fn on_pong(&mut self) {
        let Some(sent) = self.ping_sent.take() else {
            trace!("unsolicited pong");
            return;
        };
        let rtt = Instant::now().duration_since(sent).as_secs_f64() * 1000.0;

        self.state.send_modify(|s| {
            let old = s.stats.average_latency_ms;
            s.stats.average_latency_ms = if old > 0.0 { (old + rtt) / 2.0 } else { rtt };
        });
        trace!(rtt_ms = rtt, "heartbeat pong");
    }

    // ── Helpers ──────────────────────────────────────────────────────

    fn send_message(&self, msg: ClientMessage) {
        if let Some(link) = &self.link {
            if let Err(e) = link.send(msg) {
                debug!(error = %e, "control message dropped");
            }
        }
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }
}

async fn next_attempt(attempt: &mut Option<Attempt>) -> Result<Link, CoreError> {
    match attempt {
        Some(fut) => fut.await,
        None => std::future::pending().await,
    }
}

async fn next_inbound(link: &mut Option<Link>) -> Option<ServerEvent> {
    match link {
        Some(link) => link.recv().await,
        None => std::future::pending().await,
    }
}

async fn retry_due(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
