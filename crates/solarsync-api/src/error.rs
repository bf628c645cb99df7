use thiserror::Error;

/// Top-level error type for the `solarsync-api` crate.
///
/// Covers every failure mode of the two backend surfaces: the duplex
/// event channel and the REST collaborator. `solarsync-core` folds these
/// into its own taxonomy, where every channel failure is retryable.
#[derive(Debug, Error)]
pub enum Error {
    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request or connection attempt timed out.
    #[error("Timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST ────────────────────────────────────────────────────────
    /// Non-success HTTP status from the REST collaborator.
    #[error("HTTP {status} from {endpoint}: {message}")]
    Http {
        endpoint: String,
        status: u16,
        message: String,
    },

    // ── Event channel ───────────────────────────────────────────────
    /// WebSocket handshake or stream failure.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the peer.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The local end of a duplex link was used after it was torn down.
    #[error("Link closed")]
    LinkClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            Self::Timeout { .. }
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. }
            | Self::LinkClosed => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Http { status: 404, .. } => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_failures_are_transient() {
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(Error::LinkClosed.is_transient());
        assert!(Error::Timeout { timeout_secs: 20 }.is_transient());
    }

    #[test]
    fn client_errors_are_not_transient() {
        let err = Error::Http {
            endpoint: "/api/devices".into(),
            status: 404,
            message: "missing".into(),
        };
        assert!(!err.is_transient());
        assert!(err.is_not_found());

        let err = Error::Http {
            endpoint: "/api/devices".into(),
            status: 503,
            message: "busy".into(),
        };
        assert!(err.is_transient());
    }
}
