//! Config command - manage configuration files

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use remoteview_core::config::{sample_config, ConfigFile};
use std::path::PathBuf;

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show the path to the config file
    Path,

    /// Show the current configuration
    Show,

    /// Generate a default config file
    Init {
        /// Force overwrite if file exists
        #[arg(short, long)]
        force: bool,
    },

    /// Print a sample configuration to stdout
    Sample,
}

/// Run config subcommand
///
/// `path` overrides the default config location.
pub async fn config(args: ConfigArgs, path: Option<PathBuf>) -> Result<()> {
    let path = path.unwrap_or_else(ConfigFile::default_path);

    match args.command {
        ConfigCommand::Path => {
            println!("{}", path.display());
            if path.exists() {
                println!("(file exists)");
            } else {
                println!("(file does not exist)");
            }
        }
        ConfigCommand::Show => {
            if !path.exists() {
                println!("No configuration file found at: {}", path.display());
                println!();
                println!("Using default settings:\n");
                let defaults = toml::to_string_pretty(&ConfigFile::default())
                    .context("Failed to serialize default config")?;
                println!("{}", defaults);
                println!("Create a config file with:");
                println!("  remoteview config init");
                return Ok(());
            }

            let loaded = ConfigFile::load_from(path.clone()).context("Failed to load config file")?;
            let capture = loaded
                .to_capture_config()
                .context("Config file has invalid values")?;

            println!("Configuration file: {}\n", path.display());
            println!("{}", toml::to_string_pretty(&loaded).context("Failed to serialize config")?);

            let warnings = capture.validate();
            if !warnings.is_empty() {
                println!("Warnings:");
                for warning in warnings {
                    println!("  - {}", warning);
                }
            }
        }
        ConfigCommand::Init { force } => {
            if path.exists() && !force {
                println!("Configuration file already exists: {}", path.display());
                println!();
                println!("Use --force to overwrite, or edit the existing file.");
                return Ok(());
            }

            if path == ConfigFile::default_path() && !force {
                ConfigFile::create_default_if_missing().context("Failed to write config file")?;
            } else {
                if let Some(parent) = path.parent() {
                    if !parent.exists() {
                        std::fs::create_dir_all(parent)
                            .context("Failed to create config directory")?;
                    }
                }
                std::fs::write(&path, sample_config()).context("Failed to write config file")?;
            }

            println!("Created configuration file: {}", path.display());
            println!();
            println!("Edit this file to customize capture and effect settings.");
        }
        ConfigCommand::Sample => {
            print!("{}", sample_config());
        }
    }

    Ok(())
}
