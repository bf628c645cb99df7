//! `status`: summarize the durable state file without connecting.

use chrono::{DateTime, Utc};
use serde::Serialize;
use solarsync_config::Config;
use solarsync_core::{CacheConfig, TelemetryCache, persist};
use tabled::Tabled;

use crate::cli::{GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusReport {
    path: String,
    exists: bool,
    version: Option<u32>,
    devices: usize,
    readings: usize,
    buffered: usize,
    last_sync: Option<DateTime<Utc>>,
    cache: Vec<DeviceCache>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DeviceCache {
    device_id: String,
    readings: usize,
    latest_power: Option<f64>,
    last_updated: DateTime<Utc>,
    is_stale: bool,
}

#[derive(Tabled)]
struct DeviceCacheRow {
    #[tabled(rename = "Device")]
    device: String,
    #[tabled(rename = "Readings")]
    readings: usize,
    #[tabled(rename = "Power (W)")]
    power: String,
    #[tabled(rename = "Updated")]
    updated: String,
    #[tabled(rename = "Stale")]
    stale: String,
}

impl From<&DeviceCache> for DeviceCacheRow {
    fn from(c: &DeviceCache) -> Self {
        Self {
            device: c.device_id.clone(),
            readings: c.readings,
            power: c.latest_power.map_or_else(|| "-".into(), |p| format!("{p:.0}")),
            updated: c.last_updated.format("%Y-%m-%d %H:%M:%S").to_string(),
            stale: if c.is_stale { "yes" } else { "no" }.into(),
        }
    }
}

pub async fn handle(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let path = cfg.state_path().ok_or_else(|| CliError::Validation {
        field: "no_persist".into(),
        reason: "persistence is disabled, there is no state file to inspect".into(),
    })?;

    let mut report = StatusReport {
        path: path.display().to_string(),
        exists: false,
        version: None,
        devices: 0,
        readings: 0,
        buffered: 0,
        last_sync: None,
        cache: Vec::new(),
    };

    if let Some(state) = persist::load(&path).await? {
        let mut cache = TelemetryCache::new(CacheConfig {
            per_device: cfg.cache.per_device,
            global: cfg.cache.global,
            stale_after: cfg.cache.stale_after,
        });
        cache.restore(state.cache_snapshot());

        report.exists = true;
        report.version = Some(state.version);
        report.devices = state.devices.len();
        report.readings = cache.len();
        report.buffered = state.offline_buffer.len();
        report.last_sync = state.last_sync;
        report.cache = cache
            .device_ids()
            .into_iter()
            .filter_map(|id| {
                let entry = cache.get_cached(&id)?;
                Some(DeviceCache {
                    latest_power: entry.readings.first().map(|r| r.power),
                    readings: entry.readings.len(),
                    last_updated: entry.last_updated,
                    is_stale: entry.is_stale,
                    device_id: id,
                })
            })
            .collect();
    }

    let rendered = match global.output {
        OutputFormat::Table => render_table(&report),
        OutputFormat::Plain => report
            .cache
            .iter()
            .map(|c| c.device_id.clone())
            .collect::<Vec<_>>()
            .join("\n"),
        format => output::render_single(format, &report, |_| String::new(), |_| String::new())?,
    };
    output::print_output(&rendered, global.quiet);
    Ok(())
}

fn render_table(report: &StatusReport) -> String {
    if !report.exists {
        return format!("No state file at {}", report.path);
    }

    let summary = output::detail(&[
        ("State file", report.path.clone()),
        (
            "Version",
            report.version.map_or_else(|| "-".into(), |v| v.to_string()),
        ),
        ("Devices", report.devices.to_string()),
        ("Cached readings", report.readings.to_string()),
        ("Offline buffer", report.buffered.to_string()),
        (
            "Last sync",
            report
                .last_sync
                .map_or_else(|| "never".into(), |t| t.to_rfc3339()),
        ),
    ]);

    if report.cache.is_empty() {
        return summary;
    }
    let table = output::render_list(
        OutputFormat::Table,
        &report.cache,
        |c| DeviceCacheRow::from(c),
        |c| c.device_id.clone(),
    )
    .unwrap_or_default();
    format!("{summary}\n\n{table}")
}
