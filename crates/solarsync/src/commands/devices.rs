//! `devices`: list devices from the REST collaborator.

use solarsync_api::Backend;
use solarsync_config::Config;
use solarsync_core::Device;
use tabled::Tabled;

use crate::cli::GlobalOpts;
use crate::error::CliError;
use crate::output;

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
    #[tabled(rename = "Type")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Model")]
    model: String,
    #[tabled(rename = "Location")]
    location: String,
}

impl From<&Device> for DeviceRow {
    fn from(d: &Device) -> Self {
        let model = match (&d.manufacturer, &d.model) {
            (Some(m), Some(model)) => format!("{m} {model}"),
            (Some(v), None) | (None, Some(v)) => v.clone(),
            (None, None) => String::new(),
        };
        Self {
            id: d.id.clone(),
            name: d.name.clone(),
            kind: d.kind.to_string(),
            status: d.status.to_string(),
            model,
            location: d.location.clone().unwrap_or_default(),
        }
    }
}

pub async fn handle(cfg: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    let sync = cfg.to_sync_config()?;
    let client = super::rest_client(cfg, &sync)?;

    let devices = client.list_devices().await?;
    let rendered = output::render_list(global.output, &devices, |d| DeviceRow::from(d), |d| d.id.clone())?;
    output::print_output(&rendered, global.quiet);
    Ok(())
}
