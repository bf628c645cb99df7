//! `watch`: run the live service and stream what it sees until Ctrl-C.

use std::collections::BTreeSet;

use serde::Serialize;
use solarsync_api::WebSocketConnector;
use solarsync_config::Config;
use solarsync_core::{
    Alert, ConnectionState, MetricsSnapshot, Reading, ServiceEvent, Severity, TelemetryService,
};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::error::CliError;
use crate::output;

/// One line of `watch` output in the JSON formats.
#[derive(Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
enum WatchLine<'a> {
    Reading(&'a Reading),
    Alert(&'a Alert),
    Metrics(&'a MetricsSnapshot),
    Synced { entries: usize, uploaded: bool },
    Connection(&'a ConnectionState),
}

struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
    min_severity: Option<Severity>,
}

impl Printer {
    fn line(&self, line: &WatchLine<'_>) -> Result<(), CliError> {
        if self.quiet {
            return Ok(());
        }
        if let (WatchLine::Alert(alert), Some(min)) = (line, self.min_severity) {
            if alert.severity < min {
                return Ok(());
            }
        }

        let text = match self.format {
            OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(line)?,
            OutputFormat::Table | OutputFormat::Plain => self.text(line),
        };
        output::print_output(&text, false);
        Ok(())
    }

    fn text(&self, line: &WatchLine<'_>) -> String {
        match line {
            WatchLine::Reading(r) => format!(
                "{} {:<12} {:>8.0} W {:>6.1} V {:>6.2} A {:>5.1} °C {:>8.2} kWh  {}",
                r.timestamp.format("%H:%M:%S"),
                r.device_id,
                r.power,
                r.voltage,
                r.current,
                r.temperature,
                r.energy_today,
                r.status,
            ),
            WatchLine::Alert(a) => format!(
                "{} {:<12} {} {}",
                a.timestamp.format("%H:%M:%S"),
                a.device_id.as_deref().unwrap_or("-"),
                output::severity_label(a.severity, self.color),
                a.message,
            ),
            WatchLine::Metrics(m) => format!(
                "{} {:<12} {:>8.0} W total, {:.2} kWh today, {}/{} devices active",
                m.timestamp.format("%H:%M:%S"),
                "system",
                m.total_power,
                m.energy_today,
                m.active_devices,
                m.total_devices,
            ),
            WatchLine::Synced { entries, uploaded } => {
                let verb = if *uploaded { "uploaded" } else { "reconciled" };
                format!("back online, {verb} {entries} buffered readings")
            }
            WatchLine::Connection(state) => describe_connection(state),
        }
    }
}

fn describe_connection(state: &ConnectionState) -> String {
    if state.connected {
        let latency = state.stats.average_latency_ms;
        if latency > 0.0 {
            format!("connected ({latency:.0} ms)")
        } else {
            "connected".into()
        }
    } else if let Some(delay) = state.retry_in {
        format!(
            "disconnected, retry {} in {}s",
            state.stats.reconnect_attempts,
            delay.as_secs()
        )
    } else if state.connecting {
        "connecting...".into()
    } else {
        "disconnected".into()
    }
}

pub async fn handle(args: WatchArgs, cfg: Config, global: &GlobalOpts) -> Result<(), CliError> {
    let sync = cfg.to_sync_config()?;
    let backend = super::rest_client(&cfg, &sync)?;
    let connector = WebSocketConnector::new(sync.endpoint.clone(), sync.token.clone());

    let service = TelemetryService::start(sync, connector, backend).await?;

    let follow_all = args.devices.is_empty();
    let mut subscribed = BTreeSet::new();
    for device in args.devices {
        service.subscribe_device(device.clone())?;
        subscribed.insert(device);
    }

    let printer = Printer {
        format: global.output,
        color: output::should_color(global.color),
        quiet: global.quiet,
        min_severity: args.min_severity,
    };

    let mut events = service.events();
    let mut connection = service.connection().watch_state();
    let mut devices = service.watch_devices();
    let mut readings = 0usize;

    let result = loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!(error = %e, "Cannot listen for Ctrl-C");
                }
                break Ok(());
            }
            changed = connection.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let state = connection.borrow_and_update().clone();
                if !global.quiet && !matches!(printer.format, OutputFormat::Plain) {
                    if let Err(e) = printer.line(&WatchLine::Connection(&state)) {
                        break Err(e);
                    }
                }
            }
            changed = devices.changed(), if follow_all => {
                if changed.is_err() {
                    continue;
                }
                let known = devices.borrow_and_update().clone();
                for device in known.iter() {
                    if subscribed.insert(device.id.clone()) {
                        debug!(device_id = %device.id, "Following device");
                        if let Err(e) = service.subscribe_device(device.id.clone()) {
                            warn!(device_id = %device.id, error = %e, "Subscribe failed");
                        }
                    }
                }
            }
            event = events.recv() => {
                let printed = match event {
                    Ok(ServiceEvent::Reading(reading)) => {
                        readings += 1;
                        printer.line(&WatchLine::Reading(&reading))
                    }
                    Ok(ServiceEvent::Alert(alert)) => printer.line(&WatchLine::Alert(&alert)),
                    Ok(ServiceEvent::Metrics(metrics)) => printer.line(&WatchLine::Metrics(&metrics)),
                    Ok(ServiceEvent::Synced { entries, uploaded }) => {
                        printer.line(&WatchLine::Synced { entries, uploaded })
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Output fell behind, events dropped");
                        Ok(())
                    }
                    Err(RecvError::Closed) => break Ok(()),
                };
                if let Err(e) = printed {
                    break Err(e);
                }
                if args.count.is_some_and(|n| readings >= n) {
                    break Ok(());
                }
            }
        }
    };

    service.shutdown().await;
    result
}
