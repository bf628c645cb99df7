//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use solarsync_config::ConfigError;
use solarsync_core::CoreError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONFIG: i32 = 5;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not reach the telemetry backend: {reason}")]
    #[diagnostic(
        code(solarsync::connection_failed),
        help(
            "Check that the backend is running and the endpoint is correct.\n\
             Try: solarsync config show"
        )
    )]
    ConnectionFailed { reason: String },

    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(solarsync::timeout),
        help("Raise connection.request_timeout or check backend responsiveness.")
    )]
    Timeout { seconds: u64 },

    // ── Authentication ───────────────────────────────────────────────

    #[error("The backend rejected the bearer token (HTTP {status})")]
    #[diagnostic(
        code(solarsync::auth_failed),
        help(
            "Set SOLARSYNC_TOKEN, or store one with: solarsync config set-token"
        )
    )]
    AuthFailed { status: u16 },

    // ── Resources ────────────────────────────────────────────────────

    #[error("Device '{device}' not found")]
    #[diagnostic(
        code(solarsync::not_found),
        help("Run: solarsync devices to see available devices")
    )]
    DeviceNotFound { device: String },

    #[error("API error ({status}): {message}")]
    #[diagnostic(code(solarsync::api_error))]
    Api { status: String, message: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(solarsync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("No event channel endpoint configured")]
    #[diagnostic(
        code(solarsync::no_endpoint),
        help(
            "Pass --endpoint, set SOLARSYNC_ENDPOINT, or create a config with:\n\
             solarsync config init wss://host/events\n\
             Config path: {path}"
        )
    )]
    NoEndpoint { path: String },

    #[error("Configuration error: {0}")]
    #[diagnostic(code(solarsync::config))]
    Config(String),

    #[error("Config file already exists at {path}")]
    #[diagnostic(code(solarsync::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    // ── State file ───────────────────────────────────────────────────

    #[error("State file {path}: {message}")]
    #[diagnostic(
        code(solarsync::state_file),
        help("Delete the file to start fresh; it is rebuilt on the next watch.")
    )]
    StateFile { path: String, message: String },

    // ── IO / Serialization ────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    #[diagnostic(code(solarsync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::DeviceNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } | Self::ConfigExists { .. } => exit_code::USAGE,
            Self::NoEndpoint { .. } | Self::Config(_) => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { reason } => Self::ConnectionFailed { reason },
            CoreError::ConnectionTimeout { timeout_secs } => Self::Timeout {
                seconds: timeout_secs,
            },
            CoreError::Persistence { path, message } => Self::StateFile { path, message },
            CoreError::Api {
                status: Some(status @ (401 | 403)),
                ..
            } => Self::AuthFailed { status },
            CoreError::Api { message, status } => Self::Api {
                status: status.map_or_else(|| "-".into(), |s| s.to_string()),
                message,
            },
            CoreError::Config { message } => Self::Config(message),
            CoreError::Internal(message) => Self::Api {
                status: "internal".into(),
                message,
            },
        }
    }
}

impl From<solarsync_api::Error> for CliError {
    fn from(err: solarsync_api::Error) -> Self {
        CoreError::from(err).into()
    }
}

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::MissingEndpoint => Self::NoEndpoint {
                path: solarsync_config::config_path().display().to_string(),
            },
            ConfigError::Validation { field, reason } => Self::Validation { field, reason },
            ConfigError::Io(e) => Self::Io(e),
            other => Self::Config(other.to_string()),
        }
    }
}
