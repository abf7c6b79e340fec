// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! colony control-plane CLI
//!
//! Usage:
//!   colony controller run [--manifests DIR]   Run the reconcilers in the foreground
//!   colony config show|validate|generate      Inspect controller configuration
//!   colony manifest validate FILE             Validate Cluster/Task manifests

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use colony_orchestrator::commands::{self, ConfigCommand, ControllerCommand, ManifestCommand};

/// colony - declarative control plane for multi-agent clusters
#[derive(Parser)]
#[command(name = "colony")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to controller configuration file
    #[arg(short, long, global = true, env = "COLONY_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (overrides the configured level; RUST_LOG overrides both)
    #[arg(long, global = true, env = "COLONY_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: text or json
    #[arg(long, global = true, value_name = "FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run and manage the controllers
    #[command(subcommand)]
    Controller(ControllerCommand),

    /// Configuration management
    #[command(subcommand)]
    Config(ConfigCommand),

    /// Cluster and Task manifests
    #[command(subcommand)]
    Manifest(ManifestCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (level, format) = commands::config::logging_settings(cli.config.clone());
    let level = cli.log_level.clone().unwrap_or(level);
    let format = cli.log_format.clone().unwrap_or(format);
    init_logging(&level, &format)?;

    match cli.command {
        Commands::Controller(cmd) => commands::controller::handle_command(cmd, cli.config).await,
        Commands::Config(cmd) => commands::config::handle_command(cmd, cli.config).await,
        Commands::Manifest(cmd) => commands::manifest::handle_command(cmd).await,
    }
}

fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match format {
        "json" => builder
            .json()
            .with_current_span(false)
            .with_target(true)
            .init(),
        _ => builder
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .compact()
            .init(),
    }

    Ok(())
}
