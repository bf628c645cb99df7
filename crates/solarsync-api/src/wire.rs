// ── Event channel framing ──
//
// Every frame on the channel is a JSON object `{ "event": <name>, "data": <payload> }`.
// Inbound frames decode into [`ServerEvent`], outbound control messages
// encode from [`ClientMessage`].

use serde::Deserialize;
use serde_json::json;

use crate::models::{AlertPayload, MetricsSnapshot, Reading};

/// Inbound events pushed by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// Backend acknowledged the session.
    Connect,
    /// Backend is closing the session.
    Disconnect { reason: String },
    /// Backend rejected the session or the transport failed mid-handshake.
    ConnectError { error: String },
    DeviceData(Reading),
    DeviceAlerts(AlertPayload),
    SystemMetrics(MetricsSnapshot),
    /// Reply to a heartbeat [`ClientMessage::Ping`].
    Pong,
}

impl ServerEvent {
    /// Wire name of the event, as it appears in the `event` field.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect => "connect",
            Self::Disconnect { .. } => "disconnect",
            Self::ConnectError { .. } => "connect_error",
            Self::DeviceData(_) => "device-data",
            Self::DeviceAlerts(_) => "device-alerts",
            Self::SystemMetrics(_) => "system-metrics",
            Self::Pong => "pong",
        }
    }
}

/// Outbound control messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    SubscribeDevice(String),
    UnsubscribeDevice(String),
    Ping,
}

impl ClientMessage {
    /// Encode as a text frame.
    pub fn to_frame(&self) -> String {
        let value = match self {
            Self::SubscribeDevice(id) => json!({ "event": "subscribe-device", "data": id }),
            Self::UnsubscribeDevice(id) => json!({ "event": "unsubscribe-device", "data": id }),
            Self::Ping => json!({ "event": "ping" }),
        };
        value.to_string()
    }
}

/// Raw envelope shared by every frame.
#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: serde_json::Value,
}

/// Decode a text frame into a [`ServerEvent`].
///
/// Returns `None` for malformed frames and for event names this client
/// does not consume; both are logged at debug level and skipped.
pub fn parse_frame(text: &str) -> Option<ServerEvent> {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(error = %e, "Failed to parse channel frame");
            return None;
        }
    };

    let event = match frame.event.as_str() {
        "connect" => Ok(ServerEvent::Connect),
        "pong" => Ok(ServerEvent::Pong),
        "disconnect" => Ok(ServerEvent::Disconnect {
            reason: reason_text(&frame.data, "server disconnect"),
        }),
        "connect_error" => Ok(ServerEvent::ConnectError {
            error: reason_text(&frame.data, "connect error"),
        }),
        "device-data" => serde_json::from_value(frame.data).map(ServerEvent::DeviceData),
        "device-alerts" => serde_json::from_value(frame.data).map(ServerEvent::DeviceAlerts),
        "system-metrics" => serde_json::from_value(frame.data).map(ServerEvent::SystemMetrics),
        other => {
            tracing::debug!(event = other, "Ignoring unknown channel event");
            return None;
        }
    };

    match event {
        Ok(evt) => Some(evt),
        Err(e) => {
            tracing::debug!(error = %e, event = %frame.event, "Could not deserialize event payload");
            None
        }
    }
}

/// Disconnect/error payloads are either a bare string or `{ "message": .. }`.
fn reason_text(data: &serde_json::Value, fallback: &str) -> String {
    data.as_str()
        .or_else(|| data.get("message").and_then(serde_json::Value::as_str))
        .or_else(|| data.get("reason").and_then(serde_json::Value::as_str))
        .unwrap_or(fallback)
        .to_string()
}
