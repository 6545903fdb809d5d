//! CLI argument definitions for the admission gateway.

use admission_core::observability::LogFormat;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(version, about)]
pub struct GatewayArgs {
    /// Path to the TOML config file that sets the rate limit budget.
    #[arg(long, env = "ADMISSION_GATEWAY_CONFIG_FILE")]
    pub config_file: PathBuf,

    /// Sets the log format used for all gateway logs.
    #[arg(long)]
    #[arg(value_enum)]
    #[clap(default_value_t = LogFormat::default())]
    pub log_format: LogFormat,

    /// Socket address to listen on. Incompatible with `[gateway].bind_address` in the config file.
    #[arg(long)]
    pub bind_address: Option<SocketAddr>,
}
