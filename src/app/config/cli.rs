use super::LogLevel;
use clap::Parser;
use std::path::PathBuf;

/// Command-line surface of the `frappe-otel` binary.
///
/// Telemetry settings come from the `OTEL_*` environment; flags only steer
/// the process itself.
#[derive(Parser, Debug, Clone)]
#[command(name = "frappe-otel", author, version, about, long_about = None)]
pub struct Cli {
    /// Validate the environment configuration, print a summary and exit
    #[arg(long)]
    pub check: bool,

    /// Override the console log level from LOG_LEVEL
    #[arg(long)]
    pub log_level: Option<LogLevel>,

    /// Emit console logs as JSON (also enabled by RUST_LOG_FORMAT=json)
    #[arg(long)]
    pub json_logs: bool,

    /// Registry file with tenants and log sources (overrides OTEL_REGISTRY_FILE)
    #[arg(long)]
    pub registry_file: Option<PathBuf>,
}
