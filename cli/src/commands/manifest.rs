// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Manifest commands
//!
//! Commands: validate

use anyhow::{bail, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use colony_core::domain::dag::TaskGraph;
use colony_swarm::domain::topology::{compute_population, ratios_for};

use crate::manifests::{self, Manifest};

#[derive(Subcommand)]
pub enum ManifestCommand {
    /// Validate Cluster and Task manifests without running anything
    Validate {
        /// Manifest file (may hold several YAML documents)
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },
}

pub async fn handle_command(command: ManifestCommand) -> Result<()> {
    match command {
        ManifestCommand::Validate { file } => validate(file).await,
    }
}

async fn validate(file: PathBuf) -> Result<()> {
    let manifests = manifests::load_file(&file)?;
    if manifests.is_empty() {
        bail!("{} contains no manifests", file.display());
    }

    let mut failures = 0usize;
    for manifest in &manifests {
        match check(manifest) {
            Ok(summary) => println!("{} {}: {}", "✓".green(), manifest.describe(), summary),
            Err(e) => {
                failures += 1;
                println!("{} {}: {}", "✗".red(), manifest.describe(), e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} manifests are invalid", failures, manifests.len());
    }
    Ok(())
}

/// Validate one manifest and describe what it would produce.
pub fn check(manifest: &Manifest) -> Result<String> {
    match manifest {
        Manifest::Cluster(cluster) => {
            let spec = &cluster.spec;
            spec.validate()?;
            let population = compute_population(
                spec.topology,
                spec.min_agents,
                spec.max_agents,
                Some(&ratios_for(spec)),
            )?;
            let types: Vec<String> = population
                .iter()
                .map(|(agent_type, count)| format!("{agent_type}={count}"))
                .collect();
            Ok(format!("{} topology, initial population {}", spec.topology, types.join(" ")))
        }
        Manifest::Task(task) => {
            let graph = TaskGraph::build(&task.spec)?;
            Ok(format!(
                "{} subtasks, {} dependencies",
                graph.subtasks().len(),
                task.spec.dependencies.len()
            ))
        }
    }
}
