//! Command dispatch: loads configuration, builds the REST client or the
//! live service, and hands off to the per-command handlers.

pub mod config_cmd;
pub mod devices;
pub mod history;
pub mod status;
pub mod watch;

use std::path::PathBuf;

use solarsync_api::{RestClient, TransportConfig};
use solarsync_config::Config;
use solarsync_core::SyncConfig;

use crate::cli::{Command, GlobalOpts};
use crate::error::CliError;

/// Config file in effect: `--config` / `SOLARSYNC_CONFIG`, else the
/// platform default.
pub fn config_file(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(solarsync_config::config_path)
}

/// Load config from file + env, then apply command-line overrides.
pub fn load_config(global: &GlobalOpts) -> Result<Config, CliError> {
    let mut cfg = solarsync_config::load_config_from(&config_file(global))?;
    if let Some(ref endpoint) = global.endpoint {
        cfg.endpoint = Some(endpoint.clone());
    }
    if let Some(ref path) = global.state_file {
        cfg.state_file = Some(path.clone());
        cfg.no_persist = false;
    }
    Ok(cfg)
}

/// REST client sharing the token and timeout of the live service.
pub fn rest_client(cfg: &Config, sync: &SyncConfig) -> Result<RestClient, CliError> {
    let transport = TransportConfig {
        timeout: sync.request_timeout,
        ca_cert: cfg.ca_cert.clone(),
        token: sync.token.clone(),
    };
    Ok(RestClient::new(sync.api_url.clone(), &transport)?)
}

/// Dispatch a command to its handler.
pub async fn dispatch(cmd: Command, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Config(args) => config_cmd::handle(args, global),
        Command::Status => status::handle(&load_config(global)?, global).await,
        Command::Devices => devices::handle(&load_config(global)?, global).await,
        Command::History(args) => history::handle(args, &load_config(global)?, global).await,
        Command::Watch(args) => watch::handle(args, load_config(global)?, global).await,
    }
}
