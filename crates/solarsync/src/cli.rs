//! Clap derive structures for the `solarsync` CLI.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use solarsync_core::Severity;

// ── Top-Level CLI ────────────────────────────────────────────────────

/// solarsync -- live solar telemetry from the command line
#[derive(Debug, Parser)]
#[command(
    name = "solarsync",
    version,
    about = "Stream and inspect solar telemetry",
    long_about = "Connects to a solar monitoring backend's event channel, keeps a\n\
        bounded local cache of device readings, buffers while offline, and\n\
        persists everything to a local state file.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Config file (defaults to the platform config dir)
    #[arg(long, env = "SOLARSYNC_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Event channel URL (overrides config)
    #[arg(long, short = 'e', global = true)]
    pub endpoint: Option<String>,

    /// State file (overrides config)
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table", global = true)]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Connect and stream live readings, alerts, and metrics
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// Show what the local state file holds
    #[command(alias = "st")]
    Status,

    /// List devices known to the backend
    #[command(alias = "dev", alias = "d")]
    Devices,

    /// Fetch recent readings for one device
    History(HistoryArgs),

    /// Inspect and manage configuration
    Config(ConfigArgs),
}

// ── Watch ────────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Devices to subscribe to (repeatable)
    #[arg(long = "device", short = 'd')]
    pub devices: Vec<String>,

    /// Only print alerts at or above this severity (info, warning, critical)
    #[arg(long)]
    pub min_severity: Option<Severity>,

    /// Stop after this many readings
    #[arg(long, short = 'n')]
    pub count: Option<usize>,
}

// ── History ──────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct HistoryArgs {
    /// Device ID
    pub device: String,

    /// Maximum number of readings
    #[arg(long, short = 'l', default_value = "50")]
    pub limit: usize,
}

// ── Config ───────────────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Print the config file location
    Path,

    /// Show the effective configuration (token redacted)
    Show,

    /// Write a starter config file
    Init {
        /// Event channel URL (ws:// or wss://)
        url: String,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Store a bearer token (read from stdin) in the system keyring
    SetToken,
}
