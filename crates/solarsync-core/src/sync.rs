// ── Telemetry sync ──
//
// Couples the cache with the offline buffer and tracks connectivity.
// Every reading lands in the cache; readings that arrive while offline
// are also queued for replay. The offline → online edge drains the
// queue exactly once and hands it back to the caller as a `SyncPass`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use solarsync_api::{OfflineEntry, Reading};
use tracing::{debug, info};

use crate::cache::TelemetryCache;
use crate::config::{CacheConfig, OfflineConfig};
use crate::offline::OfflineBuffer;

/// The result of one offline → online transition.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPass {
    /// Drained entries in capture order.
    pub entries: Vec<OfflineEntry>,
    pub synced_at: DateTime<Utc>,
}

pub struct TelemetrySync {
    cache: TelemetryCache,
    buffer: OfflineBuffer,
    online: bool,
    last_sync: Option<DateTime<Utc>>,
}

impl TelemetrySync {
    /// Starts offline; the first `set_online(true)` performs a sync pass.
    pub fn new(cache: CacheConfig, offline: OfflineConfig) -> Self {
        Self {
            cache: TelemetryCache::new(cache),
            buffer: OfflineBuffer::new(offline.capacity),
            online: false,
            last_sync: None,
        }
    }

    /// Cache a reading. Returns `true` if it was also queued for replay.
    pub fn append(&mut self, device_id: &str, reading: Arc<Reading>) -> bool {
        self.cache.append(device_id, Arc::clone(&reading));

        if self.online {
            return false;
        }

        self.buffer.push(OfflineEntry {
            device_id: device_id.to_string(),
            reading: Reading::clone(&reading),
            captured_at: Utc::now(),
        });
        debug!(device_id, pending = self.buffer.len(), "Reading buffered while offline");
        true
    }

    /// Update connectivity. Returns the drained buffer on the offline →
    /// online edge and `None` otherwise.
    pub fn set_online(&mut self, online: bool) -> Option<SyncPass> {
        if self.online == online {
            return None;
        }
        self.online = online;

        if !online {
            info!("Telemetry sync offline; buffering readings");
            return None;
        }

        let entries = self.buffer.drain();
        let synced_at = Utc::now();
        self.last_sync = Some(synced_at);
        info!(entries = entries.len(), "Telemetry sync online; offline buffer flushed");
        Some(SyncPass { entries, synced_at })
    }

    pub fn is_online(&self) -> bool {
        self.online
    }

    pub fn last_sync(&self) -> Option<DateTime<Utc>> {
        self.last_sync
    }

    /// Readings waiting for the next sync pass.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut TelemetryCache {
        &mut self.cache
    }

    pub fn buffer(&self) -> &OfflineBuffer {
        &self.buffer
    }

    /// Rehydrate buffer and sync stamp from persisted state.
    pub fn restore(&mut self, buffer: Vec<OfflineEntry>, last_sync: Option<DateTime<Utc>>) {
        self.buffer.restore(buffer);
        self.last_sync = last_sync;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use solarsync_api::DeviceStatus;

    fn reading(device: &str) -> Arc<Reading> {
        Arc::new(Reading {
            device_id: device.into(),
            timestamp: Utc::now(),
            power: 1.0,
            voltage: 1.0,
            current: 1.0,
            temperature: 1.0,
            energy_today: 1.0,
            energy_total: 1.0,
            status: DeviceStatus::Online,
        })
    }

    fn sync() -> TelemetrySync {
        TelemetrySync::new(CacheConfig::default(), OfflineConfig::default())
    }

    #[test]
    fn offline_appends_are_cached_and_buffered() {
        let mut sync = sync();
        assert!(sync.append("inv", reading("inv")));
        assert_eq!(sync.pending(), 1);
        assert_eq!(sync.cache().len(), 1);
    }

    #[test]
    fn online_appends_skip_the_buffer() {
        let mut sync = sync();
        sync.set_online(true);
        assert!(!sync.append("inv", reading("inv")));
        assert_eq!(sync.pending(), 0);
        assert_eq!(sync.cache().len(), 1);
    }

    #[test]
    fn reconnect_flushes_exactly_once() {
        let mut sync = sync();
        sync.append("a", reading("a"));
        sync.append("b", reading("b"));

        let pass = sync.set_online(true).unwrap();
        assert_eq!(pass.entries.len(), 2);
        assert_eq!(pass.entries[0].device_id, "a");
        assert_eq!(sync.pending(), 0);
        assert_eq!(sync.last_sync(), Some(pass.synced_at));

        // repeated online signal is a no-op
        assert!(sync.set_online(true).is_none());
        assert_eq!(sync.last_sync(), Some(pass.synced_at));
    }

    #[test]
    fn every_offline_online_cycle_gets_its_own_pass() {
        let mut sync = sync();
        assert!(sync.set_online(true).unwrap().entries.is_empty());

        for _ in 0..3 {
            assert!(sync.set_online(false).is_none());
            sync.append("a", reading("a"));
            let pass = sync.set_online(true).unwrap();
            assert_eq!(pass.entries.len(), 1);
            assert_eq!(sync.pending(), 0);
        }
    }
}
