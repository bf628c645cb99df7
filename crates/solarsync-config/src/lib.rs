//! Configuration for the solarsync CLI.
//!
//! One TOML file at the platform config dir, overlaid by `SOLARSYNC_*`
//! environment variables, with bearer-token resolution (env → keyring →
//! plaintext) and translation to `solarsync_core::SyncConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use solarsync_core::{BackoffConfig, CacheConfig, OfflineConfig, SyncConfig};

/// Keyring service name for the stored bearer token.
pub const KEYRING_SERVICE: &str = "solarsync";
const KEYRING_USER: &str = "token";
const DEFAULT_TOKEN_ENV: &str = "SOLARSYNC_TOKEN";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no event channel endpoint configured")]
    MissingEndpoint,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct Config {
    /// Event channel URL, e.g. `wss://solar.example/events`.
    pub endpoint: Option<String>,

    /// REST base URL. Derived from `endpoint` when unset.
    pub api_url: Option<String>,

    /// Bearer token (plaintext; prefer keyring or env var).
    pub token: Option<String>,

    /// Environment variable holding the token.
    pub token_env: Option<String>,

    /// Extra PEM root certificate.
    pub ca_cert: Option<PathBuf>,

    /// Durable state file. Defaults to the platform data dir.
    pub state_file: Option<PathBuf>,

    /// Run memory-only, never touching the state file.
    #[serde(default)]
    pub no_persist: bool,

    #[serde(default)]
    pub connection: ConnectionSection,

    #[serde(default)]
    pub cache: CacheSection,

    #[serde(default)]
    pub offline: OfflineSection,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ConnectionSection {
    #[serde(with = "duration_str", default = "default_connect_timeout")]
    pub connect_timeout: Duration,
    #[serde(with = "duration_str", default = "default_backoff_base")]
    pub backoff_base: Duration,
    #[serde(with = "duration_str", default = "default_backoff_cap")]
    pub backoff_cap: Duration,
    #[serde(with = "duration_str", default = "default_interval")]
    pub heartbeat_interval: Duration,
    #[serde(with = "duration_str", default = "default_interval")]
    pub poll_interval: Duration,
    #[serde(with = "duration_str", default = "default_interval")]
    pub request_timeout: Duration,
}

impl Default for ConnectionSection {
    fn default() -> Self {
        Self {
            connect_timeout: default_connect_timeout(),
            backoff_base: default_backoff_base(),
            backoff_cap: default_backoff_cap(),
            heartbeat_interval: default_interval(),
            poll_interval: default_interval(),
            request_timeout: default_interval(),
        }
    }
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(20)
}
fn default_backoff_base() -> Duration {
    BackoffConfig::default().base
}
fn default_backoff_cap() -> Duration {
    BackoffConfig::default().cap
}
fn default_interval() -> Duration {
    Duration::from_secs(30)
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CacheSection {
    #[serde(default = "default_per_device")]
    pub per_device: usize,
    #[serde(default = "default_global")]
    pub global: usize,
    #[serde(with = "duration_str", default = "default_stale_after")]
    pub stale_after: Duration,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            per_device: default_per_device(),
            global: default_global(),
            stale_after: default_stale_after(),
        }
    }
}

fn default_per_device() -> usize {
    CacheConfig::default().per_device
}
fn default_global() -> usize {
    CacheConfig::default().global
}
fn default_stale_after() -> Duration {
    CacheConfig::default().stale_after
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct OfflineSection {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    /// POST buffered readings to the backend on reconnect.
    #[serde(default)]
    pub replay_upload: bool,
}

impl Default for OfflineSection {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
            replay_upload: false,
        }
    }
}

fn default_capacity() -> usize {
    OfflineConfig::default().capacity
}

/// Durations are written as humantime strings (`"30s"`, `"5m"`).
mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&humantime::format_duration(*value).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "solarsync", "solarsync")
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("solarsync");
    p
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the durable state file.
pub fn default_state_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("state.json"),
        |dirs| dirs.data_dir().join("state.json"),
    )
}

// ── Loading ─────────────────────────────────────────────────────────

/// Defaults, then the TOML file at `path`, then `SOLARSYNC_*` env vars.
///
/// Nested keys use a double underscore (`SOLARSYNC_CACHE__PER_DEVICE`).
/// The token is never read from the prefixed env here; see
/// [`resolve_token`].
pub fn build_figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(
            Env::prefixed("SOLARSYNC_")
                .split("__")
                .ignore(&["token", "config"]),
        )
}

/// Load the config from `path` + environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    Ok(build_figment(path).extract()?)
}

/// Load the config from the canonical path + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Token resolution ────────────────────────────────────────────────

/// Resolve the bearer token: env var, then system keyring, then
/// plaintext in the config. `None` means connect unauthenticated.
pub fn resolve_token(cfg: &Config) -> Option<SecretString> {
    // 1. Env var (configurable name)
    let env_name = cfg.token_env.as_deref().unwrap_or(DEFAULT_TOKEN_ENV);
    if let Ok(val) = std::env::var(env_name) {
        if !val.is_empty() {
            return Some(SecretString::from(val));
        }
    }

    // 2. System keyring
    if let Ok(entry) = keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER) {
        if let Ok(secret) = entry.get_password() {
            return Some(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    cfg.token.clone().map(SecretString::from)
}

/// Store a token in the system keyring.
pub fn store_token(token: &str) -> Result<(), ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)
        .and_then(|entry| entry.set_password(token))
        .map_err(|e| ConfigError::Validation {
            field: "token".into(),
            reason: format!("keyring unavailable: {e}"),
        })
}

// ── Translation ─────────────────────────────────────────────────────

fn parse_url(field: &str, raw: &str) -> Result<Url, ConfigError> {
    raw.parse().map_err(|e| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL '{raw}': {e}"),
    })
}

/// `wss://host/events` → `https://host/`.
fn derive_api_url(endpoint: &Url) -> Result<Url, ConfigError> {
    let mut api = endpoint.clone();
    let scheme = match endpoint.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    }
    .to_string();
    api.set_scheme(&scheme).map_err(|()| ConfigError::Validation {
        field: "api_url".into(),
        reason: format!("cannot derive from endpoint scheme '{}'", endpoint.scheme()),
    })?;
    api.set_path("/");
    api.set_query(None);
    api.set_fragment(None);
    Ok(api)
}

impl Config {
    /// Build the runtime `SyncConfig`.
    pub fn to_sync_config(&self) -> Result<SyncConfig, ConfigError> {
        let raw = self.endpoint.as_deref().ok_or(ConfigError::MissingEndpoint)?;
        let endpoint = parse_url("endpoint", raw)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(ConfigError::Validation {
                field: "endpoint".into(),
                reason: format!("expected a ws:// or wss:// URL, got '{raw}'"),
            });
        }

        let api_url = match self.api_url.as_deref() {
            Some(raw) => parse_url("api_url", raw)?,
            None => derive_api_url(&endpoint)?,
        };

        if self.connection.backoff_base > self.connection.backoff_cap {
            return Err(ConfigError::Validation {
                field: "connection.backoff_base".into(),
                reason: "must not exceed connection.backoff_cap".into(),
            });
        }

        let mut config = SyncConfig::new(endpoint, api_url);
        config.token = resolve_token(self);
        config.connect_timeout = self.connection.connect_timeout;
        config.backoff = BackoffConfig {
            base: self.connection.backoff_base,
            cap: self.connection.backoff_cap,
        };
        config.heartbeat_interval = self.connection.heartbeat_interval;
        config.poll_interval = self.connection.poll_interval;
        config.request_timeout = self.connection.request_timeout;
        config.cache = CacheConfig {
            per_device: self.cache.per_device,
            global: self.cache.global,
            stale_after: self.cache.stale_after,
        };
        config.offline = OfflineConfig {
            capacity: self.offline.capacity,
            replay_upload: self.offline.replay_upload,
        };
        config.state_path = self.state_path();
        Ok(config)
    }

    /// Effective state file, or `None` when persistence is off.
    pub fn state_path(&self) -> Option<PathBuf> {
        if self.no_persist {
            return None;
        }
        Some(self.state_file.clone().unwrap_or_else(default_state_path))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn defaults_match_core() {
        Jail::expect_with(|_jail| {
            let cfg = load_config_from(Path::new("missing.toml")).unwrap();
            assert_eq!(cfg, Config::default());
            assert_eq!(cfg.cache.per_device, 100);
            assert_eq!(cfg.connection.connect_timeout, Duration::from_secs(20));
            Ok(())
        });
    }

    #[test]
    fn toml_durations_and_env_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                endpoint = "wss://solar.example/events"

                [connection]
                heartbeat_interval = "15s"
                backoff_cap = "1m"

                [cache]
                stale_after = "2m 30s"
                "#,
            )?;
            jail.set_env("SOLARSYNC_CACHE__PER_DEVICE", "50");
            jail.set_env("SOLARSYNC_OFFLINE__REPLAY_UPLOAD", "true");

            let cfg = load_config_from(Path::new("config.toml")).unwrap();
            assert_eq!(cfg.connection.heartbeat_interval, Duration::from_secs(15));
            assert_eq!(cfg.connection.backoff_cap, Duration::from_secs(60));
            assert_eq!(cfg.cache.stale_after, Duration::from_secs(150));
            assert_eq!(cfg.cache.per_device, 50);
            assert!(cfg.offline.replay_upload);
            Ok(())
        });
    }

    #[test]
    fn endpoint_from_env() {
        Jail::expect_with(|jail| {
            jail.set_env("SOLARSYNC_ENDPOINT", "ws://127.0.0.1:8080/events");
            let cfg = load_config_from(Path::new("none.toml")).unwrap();
            let sync = cfg.to_sync_config().unwrap();
            assert_eq!(sync.endpoint.as_str(), "ws://127.0.0.1:8080/events");
            assert_eq!(sync.api_url.as_str(), "http://127.0.0.1:8080/");
            Ok(())
        });
    }

    #[test]
    fn token_env_beats_plaintext() {
        Jail::expect_with(|jail| {
            jail.set_env("SOLARSYNC_TEST_TOKEN", "from-env");
            let cfg = Config {
                token: Some("from-file".into()),
                token_env: Some("SOLARSYNC_TEST_TOKEN".into()),
                ..Config::default()
            };
            let token = resolve_token(&cfg).unwrap();
            assert_eq!(secrecy::ExposeSecret::expose_secret(&token), "from-env");
            Ok(())
        });
    }

    #[test]
    fn missing_endpoint_is_an_error() {
        assert!(matches!(
            Config::default().to_sync_config(),
            Err(ConfigError::MissingEndpoint)
        ));
    }

    #[test]
    fn http_endpoint_is_rejected() {
        let cfg = Config {
            endpoint: Some("https://solar.example/events".into()),
            ..Config::default()
        };
        assert!(matches!(
            cfg.to_sync_config(),
            Err(ConfigError::Validation { field, .. }) if field == "endpoint"
        ));
    }

    #[test]
    fn translation_carries_every_knob() {
        let cfg = Config {
            endpoint: Some("wss://solar.example/ws?v=2".into()),
            api_url: Some("https://api.solar.example/v1/".into()),
            state_file: Some(PathBuf::from("/tmp/solarsync-state.json")),
            offline: OfflineSection {
                capacity: 10,
                replay_upload: true,
            },
            ..Config::default()
        };

        let sync = cfg.to_sync_config().unwrap();
        assert_eq!(sync.api_url.as_str(), "https://api.solar.example/v1/");
        assert_eq!(sync.offline.capacity, 10);
        assert!(sync.offline.replay_upload);
        assert_eq!(sync.state_path, Some(PathBuf::from("/tmp/solarsync-state.json")));

        let memory_only = Config {
            no_persist: true,
            ..cfg
        };
        assert!(memory_only.to_sync_config().unwrap().state_path.is_none());
    }

    #[test]
    fn derived_api_url_drops_path_and_query() {
        let endpoint = Url::parse("wss://solar.example/socket/events?token=x").unwrap();
        assert_eq!(derive_api_url(&endpoint).unwrap().as_str(), "https://solar.example/");
    }

    #[test]
    fn save_then_load_round_trips_durations() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let cfg = Config {
            endpoint: Some("wss://solar.example/events".into()),
            ..Config::default()
        };
        save_config(&cfg, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("connect_timeout = \"20s\""));
        assert!(text.contains("stale_after = \"5m\""));
    }
}
