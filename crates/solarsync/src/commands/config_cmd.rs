//! Config subcommand handlers.

use std::io::BufRead;

use solarsync_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

const REDACTED: &str = "********";

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&super::config_file(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Show => {
            let mut cfg = super::load_config(global)?;
            if cfg.token.is_some() {
                cfg.token = Some(REDACTED.into());
            }
            let rendered = match global.output {
                OutputFormat::Json => serde_json::to_string_pretty(&cfg)?,
                OutputFormat::JsonCompact => serde_json::to_string(&cfg)?,
                OutputFormat::Table | OutputFormat::Plain => {
                    toml::to_string_pretty(&cfg).map_err(|e| CliError::Config(e.to_string()))?
                }
            };
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::Init { url, force } => {
            let path = super::config_file(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            validate_endpoint(&url)?;

            let cfg = Config {
                endpoint: Some(url),
                ..Config::default()
            };
            solarsync_config::save_config(&cfg, &path)?;
            if !global.quiet {
                eprintln!("Wrote {}", path.display());
            }
            Ok(())
        }

        ConfigCommand::SetToken => {
            let mut line = String::new();
            std::io::stdin().lock().read_line(&mut line)?;
            let token = line.trim();
            if token.is_empty() {
                return Err(CliError::Validation {
                    field: "token".into(),
                    reason: "expected a token on stdin".into(),
                });
            }
            solarsync_config::store_token(token)?;
            if !global.quiet {
                eprintln!("Token stored in the system keyring");
            }
            Ok(())
        }
    }
}

fn validate_endpoint(raw: &str) -> Result<(), CliError> {
    let invalid = |reason: String| CliError::Validation {
        field: "endpoint".into(),
        reason,
    };
    let url: url::Url = raw
        .parse()
        .map_err(|e| invalid(format!("invalid URL '{raw}': {e}")))?;
    if matches!(url.scheme(), "ws" | "wss") {
        Ok(())
    } else {
        Err(invalid(format!("expected a ws:// or wss:// URL, got '{raw}'")))
    }
}
