// ── Core error types ──
//
// Errors surfaced by solarsync-core. Consumers never see raw HTTP status
// codes or WebSocket frames; the `From<solarsync_api::Error>` impl folds
// transport-layer failures into these variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    /// Any failure to establish or keep the event channel. Always retried.
    #[error("Cannot connect to event channel: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection attempt timed out after {timeout_secs}s")]
    ConnectionTimeout { timeout_secs: u64 },

    // ── Persistence errors ───────────────────────────────────────────
    /// The state file could not be read or written. The service keeps
    /// running memory-only.
    #[error("State file {path}: {message}")]
    Persistence { path: String, message: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether the connection manager should schedule another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. } | Self::ConnectionTimeout { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<solarsync_api::Error> for CoreError {
    fn from(err: solarsync_api::Error) -> Self {
        use solarsync_api::Error as ApiError;

        match err {
            ApiError::Transport(ref e) => {
                if e.is_connect() {
                    CoreError::ConnectionFailed {
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Timeout { timeout_secs } => CoreError::ConnectionTimeout { timeout_secs },
            ApiError::Tls(msg) => CoreError::ConnectionFailed {
                reason: format!("TLS error: {msg}"),
            },
            ApiError::Http {
                endpoint,
                status,
                message,
            } => CoreError::Api {
                message: format!("{endpoint}: {message}"),
                status: Some(status),
            },
            ApiError::WebSocketConnect(reason) => CoreError::ConnectionFailed { reason },
            ApiError::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                reason: format!("closed (code {code}): {reason}"),
            },
            ApiError::LinkClosed => CoreError::ConnectionFailed {
                reason: "link closed".into(),
            },
            ApiError::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}
