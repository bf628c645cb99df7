// ── Alert aggregator ──
//
// Keeps every alert the backend pushed, newest first, with read and
// acknowledged flags. Counts are recomputed on every mutation so readers
// always see a consistent `AlertSummary`. Critical alerts are surfaced
// one at a time through a gate: the next one appears only after the
// current one is dismissed, acknowledged, or removed.

use std::collections::{BTreeMap, VecDeque};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use solarsync_api::{AlertRecord, Severity};
use strum::IntoEnumIterator;
use tracing::debug;

/// An alert with its lifecycle flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    pub device_id: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub acknowledged: bool,
    pub read: bool,
    /// Set on arrival, cleared once the alert is read or acknowledged.
    pub is_new: bool,
}

impl From<AlertRecord> for Alert {
    fn from(record: AlertRecord) -> Self {
        Self {
            id: record.id,
            device_id: record.device_id,
            severity: record.severity,
            message: record.message,
            timestamp: record.timestamp,
            acknowledged: false,
            read: false,
            is_new: true,
        }
    }
}

/// Aggregate counts over the current alert set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertSummary {
    pub total: usize,
    /// Alerts not yet acknowledged.
    pub unread: usize,
    /// Unacknowledged alerts per severity. Every severity has a key.
    pub by_severity: BTreeMap<Severity, usize>,
}

impl AlertSummary {
    pub fn count(&self, severity: Severity) -> usize {
        self.by_severity.get(&severity).copied().unwrap_or(0)
    }
}

#[derive(Debug, Default)]
pub struct AlertAggregator {
    /// Newest first.
    alerts: IndexMap<String, Alert>,
    summary: AlertSummary,
    current_critical: Option<String>,
    pending_critical: VecDeque<String>,
}

impl AlertAggregator {
    pub fn new() -> Self {
        let mut aggregator = Self::default();
        aggregator.recount();
        aggregator
    }

    /// Add an alert. Returns `false` if an alert with the same id exists.
    pub fn add_alert(&mut self, alert: impl Into<Alert>) -> bool {
        let alert = alert.into();
        if self.alerts.contains_key(&alert.id) {
            debug!(id = %alert.id, "Ignoring duplicate alert");
            return false;
        }

        let id = alert.id.clone();
        let critical = alert.severity == Severity::Critical && !alert.acknowledged;
        self.alerts.shift_insert(0, id.clone(), alert);

        if critical {
            if self.current_critical.is_none() {
                self.current_critical = Some(id);
            } else {
                self.pending_critical.push_back(id);
            }
        }

        self.recount();
        true
    }

    pub fn mark_as_read(&mut self, id: &str) -> bool {
        let Some(alert) = self.alerts.get_mut(id) else {
            return false;
        };
        alert.read = true;
        alert.is_new = false;
        self.recount();
        true
    }

    pub fn mark_all_as_read(&mut self) {
        for alert in self.alerts.values_mut() {
            alert.read = true;
            alert.is_new = false;
        }
        self.recount();
    }

    pub fn acknowledge_alert(&mut self, id: &str) -> bool {
        let Some(alert) = self.alerts.get_mut(id) else {
            return false;
        };
        alert.acknowledged = true;
        alert.is_new = false;
        self.release_critical(id);
        self.recount();
        true
    }

    pub fn acknowledge_all_alerts(&mut self) {
        for alert in self.alerts.values_mut() {
            alert.acknowledged = true;
            alert.is_new = false;
        }
        self.current_critical = None;
        self.pending_critical.clear();
        self.recount();
    }

    pub fn remove_alert(&mut self, id: &str) -> Option<Alert> {
        let removed = self.alerts.shift_remove(id)?;
        self.release_critical(id);
        self.recount();
        Some(removed)
    }

    /// Alerts newest first, optionally restricted to one severity.
    pub fn alerts_by_severity(&self, severity: Option<Severity>) -> Vec<Alert> {
        self.alerts
            .values()
            .filter(|a| severity.is_none_or(|s| a.severity == s))
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<&Alert> {
        self.alerts.get(id)
    }

    pub fn unread_count(&self) -> usize {
        self.summary.unread
    }

    pub fn summary(&self) -> &AlertSummary {
        &self.summary
    }

    pub fn len(&self) -> usize {
        self.alerts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.is_empty()
    }

    // ── Critical gate ────────────────────────────────────────────────

    /// The critical alert currently surfaced, if any.
    pub fn current_critical(&self) -> Option<&Alert> {
        self.current_critical
            .as_deref()
            .and_then(|id| self.alerts.get(id))
    }

    /// Dismiss the surfaced critical alert without acknowledging it and
    /// surface the next one.
    pub fn dismiss_critical(&mut self) -> Option<&Alert> {
        self.current_critical = None;
        self.advance_critical();
        self.current_critical()
    }

    fn release_critical(&mut self, id: &str) {
        self.pending_critical.retain(|pending| pending != id);
        if self.current_critical.as_deref() == Some(id) {
            self.current_critical = None;
            self.advance_critical();
        }
    }

    fn advance_critical(&mut self) {
        while let Some(next) = self.pending_critical.pop_front() {
            if self.alerts.get(&next).is_some_and(|a| !a.acknowledged) {
                self.current_critical = Some(next);
                return;
            }
        }
    }

    fn recount(&mut self) {
        let mut by_severity: BTreeMap<Severity, usize> =
            Severity::iter().map(|s| (s, 0)).collect();
        let mut unread = 0;

        for alert in self.alerts.values().filter(|a| !a.acknowledged) {
            unread += 1;
            *by_severity.entry(alert.severity).or_default() += 1;
        }

        self.summary = AlertSummary {
            total: self.alerts.len(),
            unread,
            by_severity,
        };
    }
}
