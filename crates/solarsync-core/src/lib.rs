//! Real-time telemetry synchronization core between `solarsync-api` and
//! its consumers (CLI, UI bridges).
//!
//! - **[`TelemetryService`]**: lifecycle object. [`start()`](TelemetryService::start)
//!   rehydrates the state file, spawns the connection driver, the dispatch
//!   loop, the fallback metrics poller, and the persistence writer, then
//!   connects. [`shutdown()`](TelemetryService::shutdown) stops them all and
//!   writes a final snapshot.
//!
//! - **[`ConnectionManager`]**: single driver task owning the event channel,
//!   with exponential backoff, heartbeat latency, and subscription replay.
//!
//! - **[`TelemetryCache`]** / **[`TelemetrySync`]**: bounded per-device
//!   reading history plus the offline buffer that is flushed once per
//!   offline → online transition.
//!
//! - **[`AlertAggregator`]**: alert lifecycle, counts, and the critical
//!   alert gate.
//!
//! - **[`MetricsBroadcaster`]**: latest system snapshot behind a `watch`.

pub mod alerts;
pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod offline;
pub mod persist;
pub mod service;
pub mod sync;

// ── Primary re-exports ──────────────────────────────────────────────
pub use alerts::{Alert, AlertAggregator, AlertSummary};
pub use cache::{CacheEntry, TelemetryCache};
pub use config::{BackoffConfig, CacheConfig, OfflineConfig, SyncConfig};
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState, ConnectionStats, TransportEvent};
pub use error::CoreError;
pub use metrics::MetricsBroadcaster;
pub use offline::OfflineBuffer;
pub use persist::PersistedState;
pub use service::{ServiceEvent, SyncStatus, TelemetryService};
pub use sync::{SyncPass, TelemetrySync};

// Wire types consumers need alongside the service.
pub use solarsync_api::{Device, DeviceKind, DeviceStatus, MetricsSnapshot, Reading, Severity};
