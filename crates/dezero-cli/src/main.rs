//! DeZero CLI - host runner for the payload runtime.
//!
//! `dezero run` boots the device runtime over a directory store and serves
//! newline-delimited JSON commands on stdin. The remaining subcommands manage
//! the same store directly.

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use dezero_config::Config;

mod commands;
mod config_bridge;
mod theme;

use commands::{config, payloads, run};
use theme::Theme;

/// DeZero - payload runtime for the handheld
#[derive(Parser)]
#[command(name = "dezero")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file to load instead of the user config
    #[arg(short, long, global = true, env = "DEZERO_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the device, reading JSON commands from stdin
    Run,

    /// List installed payloads
    List,

    /// Install a payload from a manifest and artifact
    Install {
        /// Path to manifest.json
        manifest: PathBuf,

        /// Path to the payload artifact (omit for built-ins)
        #[arg(short, long)]
        artifact: Option<PathBuf>,
    },

    /// Remove an installed payload
    Uninstall {
        /// Payload id
        id: String,
    },

    /// Execute a payload and wait for it to finish
    Exec {
        /// Payload id
        id: String,

        /// Parameters as key=value
        params: Vec<String>,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show the resolved configuration
    Show {
        /// Output format: toml, json or sources
        #[arg(short, long, default_value = "toml")]
        format: String,
    },
    /// Check that the configuration loads
    Validate,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run_cli().await {
        eprintln!("{}", Theme::error(&format!("{e:#}")));
        std::process::exit(1);
    }
}

async fn run_cli() -> Result<()> {
    let cli = Cli::parse();

    let resolved = Config::load(cli.config.as_deref())?;
    let mut log_config = config_bridge::to_log_config(&resolved.config);
    if cli.verbose {
        "debug".clone_into(&mut log_config.level);
    }
    let _log_guard = match dezero_telemetry::setup_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        },
    };
    let cfg = &resolved.config;

    match cli.command {
        Commands::Run => run::run_device(cfg).await,
        Commands::List => payloads::list_payloads(cfg).await,
        Commands::Install { manifest, artifact } => {
            payloads::install_payload(cfg, &manifest, artifact.as_deref()).await
        },
        Commands::Uninstall { id } => payloads::uninstall_payload(cfg, &id).await,
        Commands::Exec { id, params } => payloads::exec_payload(cfg, &id, &params).await,
        Commands::Config { command } => match command {
            ConfigCommands::Show { format } => config::show_config(&resolved, &format),
            ConfigCommands::Validate => {
                config::validate_config(&resolved);
                Ok(())
            },
        },
    }
}
