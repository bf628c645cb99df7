// ── Backend payload types ──
//
// Shapes shared by the event channel and the REST collaborator. Field
// names follow the backend's camelCase JSON; everything the backend sends
// beyond the core set is kept in `extra` where a type carries one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Devices ──────────────────────────────────────────────────────────

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceKind {
    Inverter,
    Panel,
    Meter,
    Battery,
    #[serde(other)]
    Other,
}

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Warning,
    Error,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A piece of monitored hardware, as listed by the REST collaborator.
///
/// The sync core only ever references devices by [`id`](Self::id); the
/// metadata is carried through for consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DeviceKind,
    #[serde(default)]
    pub status: DeviceStatus,
    #[serde(default)]
    pub manufacturer: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

// ── Telemetry ────────────────────────────────────────────────────────

/// One timestamped telemetry sample from a device.
///
/// Immutable once received. The cache orders readings by arrival, never
/// by `timestamp`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub device_id: String,
    pub timestamp: DateTime<Utc>,
    /// Instantaneous output in watts.
    pub power: f64,
    pub voltage: f64,
    pub current: f64,
    /// Degrees Celsius.
    pub temperature: f64,
    /// kWh produced since local midnight.
    pub energy_today: f64,
    /// Lifetime kWh counter.
    pub energy_total: f64,
    #[serde(default)]
    pub status: DeviceStatus,
}

/// A reading captured while the event channel was unavailable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineEntry {
    pub device_id: String,
    pub reading: Reading,
    pub captured_at: DateTime<Utc>,
}

/// System-wide aggregate pushed as `system-metrics` or fetched by polling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    /// Watts across all devices.
    pub total_power: f64,
    #[serde(default)]
    pub energy_today: f64,
    #[serde(default)]
    pub energy_total: f64,
    #[serde(default)]
    pub active_devices: u32,
    #[serde(default)]
    pub total_devices: u32,
    #[serde(default)]
    pub average_efficiency: Option<f64>,

    /// All remaining fields the backend sends.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

// ── Alerts ───────────────────────────────────────────────────────────

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Severity {
    #[serde(alias = "info")]
    Info,
    #[serde(alias = "warning")]
    Warning,
    #[serde(alias = "critical")]
    Critical,
}

/// An alert as the backend pushes it, before lifecycle flags are attached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRecord {
    pub id: String,
    #[serde(default)]
    pub device_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Payload of a `device-alerts` event: either a batch for one device or a
/// single record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AlertPayload {
    Batch {
        #[serde(rename = "deviceId")]
        device_id: String,
        alerts: Vec<AlertRecord>,
    },
    Single(AlertRecord),
}

impl AlertPayload {
    /// Flatten into records, filling a batch's device id into any record
    /// that omits it.
    pub fn into_records(self) -> Vec<AlertRecord> {
        match self {
            Self::Batch { device_id, alerts } => alerts
                .into_iter()
                .map(|mut record| {
                    if record.device_id.is_none() {
                        record.device_id = Some(device_id.clone());
                    }
                    record
                })
                .collect(),
            Self::Single(record) => vec![record],
        }
    }
}
