//! `history`: recent readings for one device from the REST collaborator.

use solarsync_api::Backend;
use solarsync_config::Config;
use solarsync_core::Reading;
use tabled::Tabled;

use crate::cli::{GlobalOpts, HistoryArgs};
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct ReadingRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Power (W)")]
    power: String,
    #[tabled(rename = "Voltage (V)")]
    voltage: String,
    #[tabled(rename = "Current (A)")]
    current: String,
    #[tabled(rename = "Temp (°C)")]
    temperature: String,
    #[tabled(rename = "Today (kWh)")]
    energy_today: String,
    #[tabled(rename = "Status")]
    status: String,
}

impl From<&Reading> for ReadingRow {
    fn from(r: &Reading) -> Self {
        Self {
            time: r.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            power: format!("{:.0}", r.power),
            voltage: format!("{:.1}", r.voltage),
            current: format!("{:.2}", r.current),
            temperature: format!("{:.1}", r.temperature),
            energy_today: format!("{:.2}", r.energy_today),
            status: r.status.to_string(),
        }
    }
}

pub async fn handle(args: HistoryArgs, cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    if args.limit == 0 {
        return Err(CliError::Validation {
            field: "limit".into(),
            reason: "must be at least 1".into(),
        });
    }

    let sync = cfg.to_sync_config()?;
    let client = super::rest_client(cfg, &sync)?;

    let readings = client
        .device_history(&args.device, args.limit)
        .await
        .map_err(|e| {
            if e.is_not_found() {
                CliError::DeviceNotFound {
                    device: args.device.clone(),
                }
            } else {
                e.into()
            }
        })?;

    let rendered = output::render_list(global.output, &readings, |r| ReadingRow::from(r), |r| {
        r.timestamp.to_rfc3339()
    })?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
