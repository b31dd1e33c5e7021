//! kk - operator CLI for KronosKeeper backups

mod commands;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use kronos_daemon::config::Config;
use kronos_daemon::remote::build_backends;
use kronos_daemon::remote::drive::DriveBackend;
use kronos_daemon::utils::logger;
use std::io::BufRead;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "configs/kronoskeeper.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List configured backup units
    Units,

    /// Show the backups of a unit on its remote targets
    List {
        #[arg(short, long)]
        unit: String,

        /// Only this backend (gdrive, gcloud, share)
        #[arg(short, long)]
        backend: Option<String>,
    },

    /// Download one backup by its backend identifier
    Download {
        #[arg(short, long)]
        backend: String,

        #[arg(short, long)]
        file_id: String,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Authorize Drive access and save the token file
    Authorize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logger::init(&cli.log_level, None)?;

    let config = Config::from_file(&cli.config)
        .with_context(|| format!("loading configuration from {}", cli.config.display()))?;
    tracing::debug!("Loaded {} unit(s) from {}", config.units.len(), cli.config.display());

    match cli.command {
        Command::Units => println!("{}", commands::list_units(&config)),
        Command::List { unit, backend } => {
            let backends = build_backends(&config.storage);
            let out = commands::list_backups(&config, &backends, &unit, backend.as_deref()).await?;
            println!("{}", out);
        }
        Command::Download {
            backend,
            file_id,
            output,
        } => {
            let backends = build_backends(&config.storage);
            commands::download(&backends, &backend, &file_id, &output).await?;
            println!("Saved {} to {}", file_id, output.display());
        }
        Command::Authorize => authorize(&config).await?,
    }

    Ok(())
}

/// Interactive consent: print the URL, read the code back from stdin.
async fn authorize(config: &Config) -> Result<()> {
    let drive = config
        .storage
        .gdrive
        .clone()
        .ok_or_else(|| anyhow!("no [storage.gdrive] section in the configuration"))?;
    let backend = DriveBackend::new(drive, reqwest::Client::new());

    println!("Open this link in a browser and grant access:\n\n{}\n", backend.authorization_url()?);
    println!("Paste the authorization code:");

    let mut code = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut code)
        .context("reading authorization code")?;
    let code = code.trim();
    if code.is_empty() {
        return Err(anyhow!("no authorization code entered"));
    }

    backend.complete_authorization(code).await?;
    println!("Drive access authorized");
    Ok(())
}
