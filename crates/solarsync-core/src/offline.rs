// ── Offline buffer ──
//
// Bounded FIFO of readings captured while the event channel is down.
// When full, the oldest entry is dropped to make room.

use std::collections::VecDeque;

use solarsync_api::OfflineEntry;

#[derive(Debug, Clone)]
pub struct OfflineBuffer {
    entries: VecDeque<OfflineEntry>,
    capacity: usize,
    /// Entries dropped to overflow since creation.
    dropped: u64,
}

impl OfflineBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            dropped: 0,
        }
    }

    /// Append an entry, evicting the oldest if the buffer is full.
    pub fn push(&mut self, entry: OfflineEntry) {
        if self.capacity == 0 {
            self.dropped += 1;
            return;
        }
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.dropped += 1;
        }
        self.entries.push_back(entry);
    }

    /// Remove and return every entry in capture order.
    pub fn drain(&mut self) -> Vec<OfflineEntry> {
        self.entries.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Entries in capture order.
    pub fn iter(&self) -> impl Iterator<Item = &OfflineEntry> {
        self.entries.iter()
    }

    /// Replace the contents with persisted entries, keeping the newest
    /// `capacity` of them.
    pub fn restore(&mut self, entries: Vec<OfflineEntry>) {
        self.entries.clear();
        for entry in entries {
            self.push(entry);
        }
        self.dropped = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use solarsync_api::{DeviceStatus, Reading};

    fn entry(n: u32) -> OfflineEntry {
        let now = Utc::now();
        OfflineEntry {
            device_id: format!("dev-{n}"),
            reading: Reading {
                device_id: format!("dev-{n}"),
                timestamp: now,
                power: f64::from(n),
                voltage: 0.0,
                current: 0.0,
                temperature: 0.0,
                energy_today: 0.0,
                energy_total: 0.0,
                status: DeviceStatus::Online,
            },
            captured_at: now,
        }
    }

    #[test]
    fn drops_oldest_when_full() {
        let mut buffer = OfflineBuffer::new(3);
        for n in 0..5 {
            buffer.push(entry(n));
        }

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.dropped(), 2);
        let ids: Vec<&str> = buffer.iter().map(|e| e.device_id.as_str()).collect();
        assert_eq!(ids, ["dev-2", "dev-3", "dev-4"]);
    }

    #[test]
    fn drain_empties_in_capture_order() {
        let mut buffer = OfflineBuffer::new(10);
        buffer.push(entry(1));
        buffer.push(entry(2));

        let drained = buffer.drain();
        assert_eq!(drained[0].device_id, "dev-1");
        assert_eq!(drained[1].device_id, "dev-2");
        assert!(buffer.is_empty());
    }

    #[test]
    fn zero_capacity_keeps_nothing() {
        let mut buffer = OfflineBuffer::new(0);
        buffer.push(entry(1));
        assert!(buffer.is_empty());
        assert_eq!(buffer.dropped(), 1);
    }
}
