// ── Runtime sync configuration ──
//
// These types describe how the sync core connects, caches, and persists.
// They carry the bearer token and tuning knobs but never touch disk.
// The CLI constructs a `SyncConfig` (usually via solarsync-config) and
// hands it in.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

/// Reconnect backoff: `min(base * 2^attempts, cap)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    pub base: Duration,
    pub cap: Duration,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            cap: Duration::from_secs(30),
        }
    }
}

impl BackoffConfig {
    /// Delay before the next attempt, given how many consecutive failures
    /// preceded the one just observed.
    pub fn delay(&self, attempts: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempts);
        self.base.saturating_mul(factor).min(self.cap)
    }
}

/// Caps and staleness for the telemetry cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheConfig {
    /// Max readings kept per device.
    pub per_device: usize,
    /// Max readings kept across all devices.
    pub global: usize,
    /// An entry not updated within this window reports stale.
    pub stale_after: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            per_device: 100,
            global: 1000,
            stale_after: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfflineConfig {
    /// Max readings held while offline. Oldest are dropped first.
    pub capacity: usize,
    /// POST the drained buffer to the backend on reconnect instead of
    /// only logging it.
    pub replay_upload: bool,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            replay_upload: false,
        }
    }
}

/// Configuration for one telemetry backend.
///
/// Built by the CLI and passed to `TelemetryService`; core never reads
/// config files.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Event channel URL (e.g. `wss://solar.example/events`).
    pub endpoint: Url,
    /// REST collaborator base URL.
    pub api_url: Url,
    /// Bearer token for both surfaces.
    pub token: Option<SecretString>,
    /// Upper bound on a single connection attempt.
    pub connect_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Ping cadence while connected.
    pub heartbeat_interval: Duration,
    /// Fallback metrics poll cadence while disconnected.
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    pub cache: CacheConfig,
    pub offline: OfflineConfig,
    /// Durable state file. `None` runs memory-only.
    pub state_path: Option<PathBuf>,
}

impl SyncConfig {
    /// Defaults for every knob, pointed at `endpoint` and `api_url`.
    pub fn new(endpoint: Url, api_url: Url) -> Self {
        Self {
            endpoint,
            api_url,
            token: None,
            connect_timeout: Duration::from_secs(20),
            backoff: BackoffConfig::default(),
            heartbeat_interval: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            cache: CacheConfig::default(),
            offline: OfflineConfig::default(),
            state_path: None,
        }
    }
}
