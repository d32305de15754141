//! RemoteView CLI
//!
//! Drives live capture sessions end to end against the simulated platform.
//!
//! # Usage
//!
//! ```bash
//! # List capture devices and the profile that would be negotiated
//! remoteview devices
//!
//! # Record with compositing and audio for ten seconds
//! remoteview run --mrc --audio --duration 10
//!
//! # Write a default config file
//! remoteview config init
//! ```

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use remoteview_core::config::ConfigFile;
use remoteview_core::logging;
use std::path::PathBuf;
use tracing::warn;

/// RemoteView - live capture sessions streamed to a network sink
#[derive(Parser)]
#[command(name = "remoteview")]
#[command(version)]
#[command(about = "Live capture sessions streamed to a network sink", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Increase logging verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Also write logs to this file
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List capture devices and their profiles
    #[command(alias = "ls")]
    Devices,

    /// Run a capture session until interrupted
    Run(commands::RunArgs),

    /// Manage the configuration file
    Config(commands::ConfigArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // A broken config file must not block `config init --force`
    let file = match &cli.config {
        Some(path) => ConfigFile::load_from(path.clone()),
        None => ConfigFile::load(),
    };

    let mut settings = file
        .as_ref()
        .map(ConfigFile::logging_settings)
        .unwrap_or_default();
    settings = match (cli.quiet, cli.verbose) {
        (true, _) => settings.with_level("warn"),
        (false, 0) => settings,
        (false, 1) => settings.with_level("info"),
        (false, 2) => settings.with_level("debug"),
        (false, _) => settings.with_level("trace"),
    };
    if let Some(path) = &cli.log_file {
        settings = settings.with_file(path.clone());
    }
    let _logging = logging::init(&settings).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Devices => {
            let config = file
                .context("Failed to load configuration")?
                .to_capture_config()
                .context("Invalid configuration")?;
            commands::devices(config).await?
        }
        Commands::Run(args) => {
            let config = file
                .context("Failed to load configuration")?
                .to_capture_config()
                .context("Invalid configuration")?;
            commands::run(args, config).await?
        }
        Commands::Config(args) => {
            if let Err(e) = &file {
                warn!("Current configuration is unusable: {}", e);
            }
            commands::config(args, cli.config).await?
        }
    }

    Ok(())
}
