// solarsync-api: wire layer for the solar telemetry backend (event channel + REST)

pub mod error;
pub mod link;
pub mod models;
pub mod rest;
pub mod transport;
pub mod websocket;
pub mod wire;

pub use error::Error;
pub use link::{Connector, Link, RemoteEnd};
pub use models::{
    AlertPayload, AlertRecord, Device, DeviceKind, DeviceStatus, MetricsSnapshot, OfflineEntry,
    Reading, Severity,
};
pub use rest::{Backend, RestClient};
pub use transport::TransportConfig;
pub use websocket::WebSocketConnector;
pub use wire::{ClientMessage, ServerEvent};
