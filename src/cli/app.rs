use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_config, LoadedConfig};
use crate::metrics;

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    let LoadedConfig {
        config,
        path,
        found,
    } = load_config(cli.config.as_deref()).await?;

    let _log_guard = init_logging(&config.logging, cli.log_level.as_deref(), cli.debug)?;

    info!("Starting timegate v{}", env!("CARGO_PKG_VERSION"));
    if found {
        info!("Loaded configuration from: {}", path.display());
    } else {
        warn!("Config file not found, using defaults: {}", path.display());
    }

    let metrics_port = cli.metrics_port.unwrap_or(config.metrics_port);
    let _metrics_server = metrics::spawn_metrics_server(metrics_port);

    let cli_context = CliContext::new(config, path, cli.output);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {}", err);
            Err(err)
        }
    }
}
