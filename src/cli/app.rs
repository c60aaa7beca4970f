use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::runtime::{init_logging, load_local_env_overrides};
use crate::config::load_config;

pub async fn run() -> Result<()> {
    load_local_env_overrides();
    let cli = CliArgs::parse();
    init_logging(&cli.log_level, cli.debug, cli.log_format)?;

    info!("Starting FlowPilot v{}", env!("CARGO_PKG_VERSION"));

    let loaded = load_config(cli.config.as_deref()).await?;
    let cli_context = CliContext::new(loaded, cli.output);

    match dispatch(&cli, &cli_context).await {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
