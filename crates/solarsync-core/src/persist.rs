// ── Durable state file ──
//
// One JSON document holding the device list, the telemetry cache, the
// offline buffer, and the last sync stamp. Writes go to a sibling temp
// file first and are renamed into place, so a crash never leaves a torn
// file behind. A background writer coalesces bursts of changes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solarsync_api::{Device, OfflineEntry, Reading};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheMeta, CacheSnapshot};
use crate::error::CoreError;

pub const STATE_VERSION: u32 = 1;

/// Quiet period after a change before the writer flushes.
const WRITE_DEBOUNCE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    /// Older or unknown versions are read best-effort.
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub devices: Vec<Device>,
    /// Readings per device, most recent first.
    #[serde(default)]
    pub device_data: BTreeMap<String, Vec<Reading>>,
    #[serde(default)]
    pub device_cache: BTreeMap<String, CacheMeta>,
    #[serde(default)]
    pub offline_buffer: Vec<OfflineEntry>,
    #[serde(default)]
    pub last_sync: Option<DateTime<Utc>>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            devices: Vec::new(),
            device_data: BTreeMap::new(),
            device_cache: BTreeMap::new(),
            offline_buffer: Vec::new(),
            last_sync: None,
        }
    }
}

impl PersistedState {
    pub fn cache_snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            device_data: self.device_data.clone(),
            device_cache: self.device_cache.clone(),
        }
    }

    pub fn reading_count(&self) -> usize {
        self.device_data.values().map(Vec::len).sum()
    }
}

fn persistence_error(path: &Path, message: impl Into<String>) -> CoreError {
    CoreError::Persistence {
        path: path.display().to_string(),
        message: message.into(),
    }
}

/// Read the state file. A missing file is `Ok(None)`.
pub async fn load(path: &Path) -> Result<Option<PersistedState>, CoreError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(persistence_error(path, e.to_string())),
    };

    let state: PersistedState = serde_json::from_slice(&bytes)
        .map_err(|e| persistence_error(path, format!("invalid state file: {e}")))?;

    if state.version != STATE_VERSION {
        warn!(
            path = %path.display(),
            version = state.version,
            "State file version differs, loading best-effort"
        );
    }
    Ok(Some(state))
}

/// Write the state file atomically.
pub async fn save(path: &Path, state: &PersistedState) -> Result<(), CoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| persistence_error(path, e.to_string()))?;
    }

    let json = serde_json::to_vec_pretty(state)
        .map_err(|e| persistence_error(path, e.to_string()))?;

    let tmp = tmp_path(path);
    tokio::fs::write(&tmp, &json)
        .await
        .map_err(|e| persistence_error(&tmp, e.to_string()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| persistence_error(path, e.to_string()))?;

    debug!(path = %path.display(), bytes = json.len(), "State file written");
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Write-behind persistence.
///
/// Waits for the revision counter to move, lets the burst settle, then
/// asks `snapshot` for the current state and writes it. Failures are
/// logged; the service keeps running from memory.
pub(crate) async fn persist_task<F, Fut>(
    path: PathBuf,
    mut revision: watch::Receiver<u64>,
    snapshot: F,
    cancel: CancellationToken,
) where
    F: Fn() -> Fut + Send,
    Fut: Future<Output = PersistedState> + Send,
{
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            changed = revision.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(WRITE_DEBOUNCE) => {}
        }
        revision.borrow_and_update();

        let state = snapshot().await;
        if let Err(e) = save(&path, &state).await {
            warn!(error = %e, "State write failed, continuing memory-only");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use solarsync_api::DeviceStatus;

    fn sample() -> PersistedState {
        let reading = Reading {
            device_id: "inv-01".into(),
            timestamp: Utc::now(),
            power: 2500.0,
            voltage: 240.0,
            current: 10.4,
            temperature: 36.0,
            energy_today: 3.3,
            energy_total: 812.0,
            status: DeviceStatus::Online,
        };
        PersistedState {
            device_data: BTreeMap::from([("inv-01".to_string(), vec![reading.clone()])]),
            device_cache: BTreeMap::from([(
                "inv-01".to_string(),
                CacheMeta {
                    last_updated: reading.timestamp,
                    is_stale: false,
                },
            )]),
            offline_buffer: vec![OfflineEntry {
                device_id: "inv-01".into(),
                captured_at: reading.timestamp,
                reading,
            }],
            last_sync: Some(Utc::now()),
            ..PersistedState::default()
        }
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.json");

        let state = sample();
        save(&path, &state).await.unwrap();

        assert!(!tmp_path(&path).exists());
        assert_eq!(load(&path).await.unwrap(), Some(state));
    }

    #[tokio::test]
    async fn missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load(&dir.path().join("absent.json")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupt_file_is_a_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{ not json").unwrap();

        assert!(matches!(
            load(&path).await,
            Err(CoreError::Persistence { .. })
        ));
    }

    #[tokio::test]
    async fn older_files_load_best_effort() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"deviceData": {}, "lastSync": null}"#).unwrap();

        let state = load(&path).await.unwrap().unwrap();
        assert_eq!(state.version, 0);
        assert!(state.devices.is_empty());
    }

    #[test]
    fn wire_field_names() {
        let json = serde_json::to_value(PersistedState::default()).unwrap();
        for key in [
            "version",
            "devices",
            "deviceData",
            "deviceCache",
            "offlineBuffer",
            "lastSync",
        ] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        assert_eq!(json["version"], STATE_VERSION);
    }
}
