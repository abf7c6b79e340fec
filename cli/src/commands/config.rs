// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use colony_core::domain::config::ControllerConfigManifest;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate a configuration file with every default spelled out
    Generate {
        /// Output path
        #[arg(short, long, default_value = "./colony-config.yaml")]
        output: PathBuf,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output } => generate(output).await,
    }
}

/// Configured log level and format, falling back to defaults when the file is unreadable.
pub fn logging_settings(config_override: Option<PathBuf>) -> (String, String) {
    match ControllerConfigManifest::load_or_default(config_override) {
        Ok(config) => {
            let logging = config.spec.observability.logging;
            (logging.level, logging.format)
        }
        Err(_) => ("info".to_string(), "text".to_string()),
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = ControllerConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. COLONY_CONFIG_PATH: {}",
            std::env::var("COLONY_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./colony-config.yaml");
        println!("  4. ~/.colony/config.yaml");
        println!("  5. /etc/colony/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!("  Name: {}", config.metadata.name);
    println!();

    let spec = &config.spec;
    println!("{}", "Controller:".bold());
    println!("  Workers per controller: {}", spec.controller.workers);
    println!("  Resync interval: {:?}", spec.controller.resync_interval);
    println!(
        "  Transient backoff: {:?} .. {:?}",
        spec.controller.backoff_base, spec.controller.backoff_max
    );
    println!("  External call timeout: {:?}", spec.controller.external_call_timeout);
    println!();

    println!("{}", "Agents:".bold());
    println!("  Heartbeat interval: {:?}", spec.agents.heartbeat_interval);
    println!("  Heartbeat timeout: {:?}", spec.agents.heartbeat_timeout());
    println!("  Recovery cooldown: {:?}", spec.agents.recovery_cooldown);
    println!("  Max recovery attempts: {}", spec.agents.max_recovery_attempts);
    println!();

    println!("{}", "Tasks:".bold());
    println!("  Max resume attempts: {}", spec.tasks.max_resume_attempts);
    println!("  Default failure policy: {:?}", spec.tasks.default_failure_policy);
    println!();

    println!("{}", "Autoscaling:".bold());
    println!("  Evaluation interval: {:?}", spec.autoscaling.evaluation_interval);
    println!("  Stabilization window: {:?}", spec.autoscaling.stabilization_window);
    println!();

    println!("{}", "Observability:".bold());
    println!(
        "  Logging: {} ({})",
        spec.observability.logging.level, spec.observability.logging.format
    );
    if spec.observability.metrics.enabled {
        println!("  Metrics: enabled on port {}", spec.observability.metrics.port);
    } else {
        println!("  Metrics: {}", "disabled".dimmed());
    }

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = ControllerConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf) -> Result<()> {
    let yaml = ControllerConfigManifest::default().to_yaml_string()?;

    std::fs::write(&output, yaml)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
