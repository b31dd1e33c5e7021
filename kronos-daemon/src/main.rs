//! KronosKeeper daemon - Main entry point
//!
//! Schedules one backup job per configured unit and runs until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use kronos_daemon::{config::Config, daemon::shutdown::ShutdownCoordinator, daemon::KeeperDaemon, utils};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "configs/kronoskeeper.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error), overrides the config file
    #[arg(short, long)]
    log_level: Option<String>,

    /// Run this unit once and exit instead of scheduling
    #[arg(long, value_name = "UNIT")]
    run_once: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level, config.log.file.as_deref())?;

    tracing::info!(
        "Starting kronosd v{} with {} unit(s) from {}",
        env!("CARGO_PKG_VERSION"),
        config.units.len(),
        args.config.display()
    );

    let daemon = KeeperDaemon::new(config).await?;

    if let Some(unit) = args.run_once {
        let report = daemon.run_unit(&unit).await?;
        tracing::info!("{}", report.summary(&unit));
        if let Some(e) = report.combined_error() {
            return Err(e.into());
        }
        return Ok(());
    }

    daemon.start().await.context("starting scheduled backups")?;

    let shutdown_coordinator = ShutdownCoordinator::new();
    shutdown_coordinator.wait_for_signal().await;

    if let Err(e) = daemon.stop().await {
        tracing::error!("Error while stopping the daemon: {}", e);
    }

    Ok(())
}
