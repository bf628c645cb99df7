// ── Telemetry cache ──
//
// Per-device ring of recent readings, most recent first, with a second
// cap across all devices. Every reading carries a global arrival
// sequence number so the globally oldest one can be found when the
// total cap is exceeded. Staleness is evaluated lazily on read.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use solarsync_api::Reading;

use crate::config::CacheConfig;

/// Point-in-time view of one device's cached readings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    /// Most recent first.
    pub readings: Vec<Arc<Reading>>,
    pub last_updated: DateTime<Utc>,
    pub is_stale: bool,
}

/// Persisted per-device metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheMeta {
    pub last_updated: DateTime<Utc>,
    #[serde(default)]
    pub is_stale: bool,
}

/// Everything the state file needs to rebuild the cache.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    /// Readings per device, most recent first.
    pub device_data: BTreeMap<String, Vec<Reading>>,
    pub device_cache: BTreeMap<String, CacheMeta>,
}

struct Slot {
    /// `(arrival seq, reading)`, front is most recent.
    readings: VecDeque<(u64, Arc<Reading>)>,
    last_updated: DateTime<Utc>,
    is_stale: bool,
}

/// Bounded per-device reading store.
pub struct TelemetryCache {
    config: CacheConfig,
    slots: HashMap<String, Slot>,
    next_seq: u64,
    total: usize,
}

impl TelemetryCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            slots: HashMap::new(),
            next_seq: 0,
            total: 0,
        }
    }

    /// Record a reading for `device_id`, stamping the entry with the
    /// current wall-clock time.
    pub fn append(&mut self, device_id: &str, reading: Arc<Reading>) {
        self.append_at(device_id, reading, Utc::now());
    }

    /// [`append`](Self::append) with an explicit update time.
    pub fn append_at(&mut self, device_id: &str, reading: Arc<Reading>, now: DateTime<Utc>) {
        let seq = self.next_seq;
        self.next_seq += 1;

        let slot = self
            .slots
            .entry(device_id.to_string())
            .or_insert_with(|| Slot {
                readings: VecDeque::new(),
                last_updated: now,
                is_stale: false,
            });

        slot.readings.push_front((seq, reading));
        self.total += 1;
        while slot.readings.len() > self.config.per_device {
            slot.readings.pop_back();
            self.total -= 1;
        }
        slot.last_updated = now;
        slot.is_stale = false;

        self.enforce_global_cap();
    }

    /// Snapshot of one device's readings, or `None` if nothing is cached.
    ///
    /// Marks the entry stale if it has not been updated within
    /// `stale_after`.
    pub fn get_cached(&mut self, device_id: &str) -> Option<CacheEntry> {
        self.get_cached_at(device_id, Utc::now())
    }

    /// [`get_cached`](Self::get_cached) evaluated at `now`.
    pub fn get_cached_at(&mut self, device_id: &str, now: DateTime<Utc>) -> Option<CacheEntry> {
        let stale_after =
            TimeDelta::from_std(self.config.stale_after).unwrap_or(TimeDelta::MAX);
        let slot = self.slots.get_mut(device_id)?;

        if now.signed_duration_since(slot.last_updated) > stale_after {
            slot.is_stale = true;
        }

        Some(CacheEntry {
            readings: slot.readings.iter().map(|(_, r)| Arc::clone(r)).collect(),
            last_updated: slot.last_updated,
            is_stale: slot.is_stale,
        })
    }

    /// Most recent reading for a device.
    pub fn latest(&self, device_id: &str) -> Option<Arc<Reading>> {
        self.slots
            .get(device_id)
            .and_then(|slot| slot.readings.front())
            .map(|(_, r)| Arc::clone(r))
    }

    /// Mark one device, or every device, stale. Data is kept.
    pub fn invalidate(&mut self, device_id: Option<&str>) {
        match device_id {
            Some(id) => {
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.is_stale = true;
                }
            }
            None => {
                for slot in self.slots.values_mut() {
                    slot.is_stale = true;
                }
            }
        }
    }

    /// Devices with at least one cached reading, sorted.
    pub fn device_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .slots
            .iter()
            .filter(|(_, slot)| !slot.readings.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Total readings across all devices.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    // ── Persistence ──────────────────────────────────────────────────

    pub fn export(&self) -> CacheSnapshot {
        let mut snapshot = CacheSnapshot::default();
        for (id, slot) in &self.slots {
            snapshot.device_data.insert(
                id.clone(),
                slot.readings.iter().map(|(_, r)| Reading::clone(r)).collect(),
            );
            snapshot.device_cache.insert(
                id.clone(),
                CacheMeta {
                    last_updated: slot.last_updated,
                    is_stale: slot.is_stale,
                },
            );
        }
        snapshot
    }

    /// Replace the cache contents with a persisted snapshot.
    ///
    /// Each device keeps its stored order. Arrival order across devices
    /// is not persisted, so global sequence numbers are rebuilt by
    /// interleaving devices on the timestamp of their oldest remaining
    /// reading. Caps are re-applied.
    pub fn restore(&mut self, snapshot: CacheSnapshot) {
        self.slots.clear();
        self.total = 0;
        self.next_seq = 0;

        let per_device = self.config.per_device;
        // oldest first per device
        let mut pending: Vec<(String, VecDeque<Reading>)> = snapshot
            .device_data
            .into_iter()
            .filter(|(_, readings)| !readings.is_empty())
            .map(|(id, mut readings)| {
                readings.truncate(per_device);
                (id, readings.into_iter().rev().collect())
            })
            .collect();

        while let Some(idx) = pending
            .iter()
            .enumerate()
            .filter_map(|(i, (_, queue))| queue.front().map(|r| (r.timestamp, i)))
            .min()
            .map(|(_, i)| i)
        {
            let (id, queue) = &mut pending[idx];
            let Some(reading) = queue.pop_front() else {
                break;
            };
            let seq = self.next_seq;
            self.next_seq += 1;

            let meta = snapshot.device_cache.get(id.as_str());
            let slot = self.slots.entry(id.clone()).or_insert_with(|| Slot {
                readings: VecDeque::new(),
                last_updated: meta.map_or_else(Utc::now, |m| m.last_updated),
                is_stale: meta.is_some_and(|m| m.is_stale),
            });
            slot.readings.push_front((seq, Arc::new(reading)));
            self.total += 1;
        }

        self.enforce_global_cap();
    }

    // ── Internals ────────────────────────────────────────────────────

    fn enforce_global_cap(&mut self) {
        while self.total > self.config.global {
            let oldest = self
                .slots
                .iter()
                .filter_map(|(id, slot)| slot.readings.back().map(|(seq, _)| (*seq, id)))
                .min_by_key(|(seq, _)| *seq)
                .map(|(_, id)| id.clone());

            let Some(id) = oldest else { break };
            if let Some(slot) = self.slots.get_mut(&id) {
                slot.readings.pop_back();
                self.total -= 1;
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use solarsync_api::DeviceStatus;
    use std::time::Duration;

    fn reading(device: &str, n: i64) -> Arc<Reading> {
        let base = DateTime::parse_from_rfc3339("2026-06-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Arc::new(Reading {
            device_id: device.into(),
            timestamp: base + TimeDelta::seconds(n),
            power: f64::from(u32::try_from(n).unwrap_or(0)),
            voltage: 240.0,
            current: 1.0,
            temperature: 30.0,
            energy_today: 0.0,
            energy_total: 0.0,
            status: DeviceStatus::Online,
        })
    }

    fn power(entry: &CacheEntry, idx: usize) -> f64 {
        entry.readings[idx].power
    }

    #[test]
    fn keeps_latest_hundred_of_one_fifty() {
        let mut cache = TelemetryCache::new(CacheConfig::default());
        for n in 0..150 {
            cache.append("X", reading("X", n));
        }

        let entry = cache.get_cached("X").unwrap();
        assert_eq!(entry.readings.len(), 100);
        // most recent first: 149 down to 50
        assert!((power(&entry, 0) - 149.0).abs() < f64::EPSILON);
        assert!((power(&entry, 99) - 50.0).abs() < f64::EPSILON);
        assert_eq!(cache.len(), 100);
    }

    #[test]
    fn order_is_most_recent_first_and_never_exceeds_cap() {
        let config = CacheConfig {
            per_device: 5,
            global: 1000,
            ..CacheConfig::default()
        };
        let mut cache = TelemetryCache::new(config);

        for n in 0..40 {
            let device = ["a", "b", "c"][usize::try_from(n % 3).unwrap()];
            cache.append(device, reading(device, n));

            for id in cache.device_ids() {
                let entry = cache.get_cached(&id).unwrap();
                assert!(entry.readings.len() <= 5);
                assert!(
                    entry
                        .readings
                        .windows(2)
                        .all(|w| w[0].timestamp > w[1].timestamp)
                );
            }
        }
    }

    #[test]
    fn global_cap_evicts_oldest_arrival_across_devices() {
        let config = CacheConfig {
            per_device: 10,
            global: 4,
            ..CacheConfig::default()
        };
        let mut cache = TelemetryCache::new(config);

        cache.append("a", reading("a", 0));
        cache.append("b", reading("b", 1));
        cache.append("a", reading("a", 2));
        cache.append("b", reading("b", 3));
        cache.append("c", reading("c", 4));

        assert_eq!(cache.len(), 4);
        let a = cache.get_cached("a").unwrap();
        assert_eq!(a.readings.len(), 1);
        assert!((power(&a, 0) - 2.0).abs() < f64::EPSILON);
        assert_eq!(cache.get_cached("b").unwrap().readings.len(), 2);
    }

    #[test]
    fn staleness_is_lazy_and_cleared_by_append() {
        let mut cache = TelemetryCache::new(CacheConfig::default());
        let t0 = Utc::now();
        cache.append_at("inv", reading("inv", 0), t0);

        let fresh = cache
            .get_cached_at("inv", t0 + TimeDelta::minutes(4))
            .unwrap();
        assert!(!fresh.is_stale);

        let stale = cache
            .get_cached_at("inv", t0 + TimeDelta::minutes(6))
            .unwrap();
        assert!(stale.is_stale);

        cache.append_at("inv", reading("inv", 1), t0 + TimeDelta::minutes(6));
        let again = cache
            .get_cached_at("inv", t0 + TimeDelta::minutes(6))
            .unwrap();
        assert!(!again.is_stale);
    }

    #[test]
    fn invalidate_marks_without_clearing() {
        let mut cache = TelemetryCache::new(CacheConfig::default());
        cache.append("a", reading("a", 0));
        cache.append("b", reading("b", 1));

        cache.invalidate(Some("a"));
        assert!(cache.get_cached("a").unwrap().is_stale);
        assert!(!cache.get_cached("b").unwrap().is_stale);

        cache.invalidate(None);
        let b = cache.get_cached("b").unwrap();
        assert!(b.is_stale);
        assert_eq!(b.readings.len(), 1);
    }

    #[test]
    fn unknown_device_is_absent() {
        let mut cache = TelemetryCache::new(CacheConfig::default());
        assert!(cache.get_cached("nope").is_none());
        assert!(cache.latest("nope").is_none());
    }

    #[test]
    fn export_restore_preserves_order_and_meta() {
        let mut cache = TelemetryCache::new(CacheConfig {
            stale_after: Duration::from_secs(60),
            ..CacheConfig::default()
        });
        for n in 0..5 {
            cache.append("a", reading("a", n));
        }
        cache.append("b", reading("b", 10));
        cache.invalidate(Some("b"));

        let snapshot = cache.export();
        let mut restored = TelemetryCache::new(CacheConfig::default());
        restored.restore(snapshot.clone());

        assert_eq!(restored.len(), 6);
        assert_eq!(restored.latest("a").unwrap().timestamp, reading("a", 4).timestamp);
        pretty_assertions::assert_eq!(restored.export(), snapshot);
    }

    fn with_power(device: &str, n: i64, power: f64) -> Arc<Reading> {
        Arc::new(Reading {
            power,
            ..Reading::clone(&reading(device, n))
        })
    }

    fn powers(cache: &mut TelemetryCache, device: &str) -> Vec<f64> {
        cache
            .get_cached(device)
            .unwrap()
            .readings
            .iter()
            .map(|r| r.power)
            .collect()
    }

    #[test]
    fn restore_keeps_arrival_order_when_timestamps_go_backwards() {
        let mut cache = TelemetryCache::new(CacheConfig::default());
        cache.append("X", with_power("X", 100, 1.0));
        cache.append("X", with_power("X", 50, 2.0));
        assert_eq!(powers(&mut cache, "X"), vec![2.0, 1.0]);

        let mut restored = TelemetryCache::new(CacheConfig::default());
        restored.restore(cache.export());

        assert_eq!(powers(&mut restored, "X"), vec![2.0, 1.0]);
        assert_eq!(restored.latest("X").unwrap().timestamp, reading("X", 50).timestamp);
        pretty_assertions::assert_eq!(restored.export(), cache.export());
    }

    #[test]
    fn restore_into_smaller_caps_drops_oldest() {
        let mut cache = TelemetryCache::new(CacheConfig::default());
        for n in 0..4 {
            cache.append("a", reading("a", n));
        }
        cache.append("b", reading("b", 10));
        cache.append("b", reading("b", 11));

        let mut restored = TelemetryCache::new(CacheConfig {
            per_device: 3,
            global: 4,
            ..CacheConfig::default()
        });
        restored.restore(cache.export());

        assert_eq!(restored.len(), 4);
        // a keeps 3 of 4, then the oldest remaining a reading goes globally
        assert_eq!(powers(&mut restored, "a"), vec![3.0, 2.0]);
        assert_eq!(powers(&mut restored, "b"), vec![11.0, 10.0]);
    }
}
