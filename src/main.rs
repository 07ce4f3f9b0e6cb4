//! Dynamic Reverse Proxy
//!
//! # Architecture Overview
//!
//! ```text
//!   ┌───────────┐  ┌───────────┐
//!   │ provider  │  │ provider  │   (static, file, ...)
//!   └─────┬─────┘  └─────┬─────┘
//!         │ events       │
//!         ▼              ▼
//!   ┌──────────────────────────┐
//!   │  aggregator (debounce)   │
//!   └────────────┬─────────────┘
//!                │ RebuildTrigger
//!                ▼
//!   ┌──────────────────────────┐      ┌──────────────────────────┐
//!   │ rebuild loop → compiler  │─────▶│ switchboard              │
//!   └──────────────────────────┘      │ active gen + draining    │
//!                                     └────────────┬─────────────┘
//!   Client ──▶ http server ──admit──────────────────┘
//!                 │
//!                 ▼
//!        route table → middleware chain → server pool ──▶ Backend
//! ```

use std::path::PathBuf;

use clap::Parser;
use dynamic_proxy::config::{load_config, ProxyConfig};
use dynamic_proxy::lifecycle;
use dynamic_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "dynamic-proxy")]
#[command(about = "Reverse proxy with provider-driven hot reconfiguration", long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `observability.log_level`.
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = ?cli.config, "dynamic-proxy starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        request_timeout_secs = config.timeouts.request_secs,
        file_providers = config.providers.file.len(),
        static_services = config.providers.static_services.len(),
        "Configuration loaded"
    );

    lifecycle::run(config).await?;
    Ok(())
}
