// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Controller commands
//!
//! Commands: run

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use colony_core::domain::agent::Agent;
use colony_core::domain::checkpoint::CheckpointStore;
use colony_core::domain::clock::{Clock, SystemClock};
use colony_core::domain::cluster::Cluster;
use colony_core::domain::config::ControllerConfigManifest;
use colony_core::domain::store::ObjectStore;
use colony_core::domain::task::Task;
use colony_core::infrastructure::checkpoint::{InMemoryCheckpointStore, LocalCheckpointStore};
use colony_core::infrastructure::event_bus::{DomainEvent, EventBus, EventBusError};
use colony_core::infrastructure::membership::InMemoryMembershipRegistry;
use colony_core::infrastructure::metric_source::StaticMetricSource;
use colony_core::infrastructure::repositories::InMemoryStore;
use colony_core::infrastructure::runtime::InMemoryAgentRuntime;
use colony_core::infrastructure::secrets_manager::StaticSecretStore;
use colony_swarm::application::{Collaborators, ControllerManager, Stores};

use crate::manifests::{self, Manifest};
use crate::simulator::LocalAgentSimulator;

#[derive(Subcommand)]
pub enum ControllerCommand {
    /// Run every controller in the foreground until Ctrl+C / SIGTERM
    Run {
        /// Directory of Cluster/Task manifests loaded at startup
        #[arg(long, value_name = "DIR")]
        manifests: Option<PathBuf>,

        /// Persist checkpoints under this directory (default: in memory)
        #[arg(long, value_name = "DIR")]
        checkpoint_dir: Option<PathBuf>,

        /// Secret names reported as available to agents
        #[arg(long = "secret", value_name = "NAME")]
        secrets: Vec<String>,

        /// Static metric readings for the autoscaler, as NAME=VALUE
        #[arg(long = "metric", value_name = "NAME=VALUE", value_parser = parse_metric)]
        metrics: Vec<(String, f64)>,

        /// Heartbeat every agent and complete dispatched subtasks locally
        #[arg(long)]
        simulate: bool,
    },
}

pub async fn handle_command(
    command: ControllerCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ControllerCommand::Run {
            manifests,
            checkpoint_dir,
            secrets,
            metrics,
            simulate,
        } => {
            run(RunOptions {
                config_override,
                manifests,
                checkpoint_dir,
                secrets,
                metrics,
                simulate,
            })
            .await
        }
    }
}

struct RunOptions {
    config_override: Option<PathBuf>,
    manifests: Option<PathBuf>,
    checkpoint_dir: Option<PathBuf>,
    secrets: Vec<String>,
    metrics: Vec<(String, f64)>,
    simulate: bool,
}

fn parse_metric(raw: &str) -> Result<(String, f64), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected NAME=VALUE, got '{raw}'"))?;
    let value: f64 = value
        .parse()
        .map_err(|_| format!("metric value '{value}' is not a number"))?;
    Ok((name.to_string(), value))
}

async fn run(options: RunOptions) -> Result<()> {
    let config = ControllerConfigManifest::load_or_default(options.config_override)
        .context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    info!(name = %config.metadata.name, "Configuration loaded");

    if config.spec.observability.metrics.enabled {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.spec.observability.metrics.port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("Failed to install Prometheus exporter")?;
        info!(%addr, "Prometheus exporter listening");
    }

    let clusters: Arc<InMemoryStore<Cluster>> = Arc::new(InMemoryStore::new());
    let agents: Arc<InMemoryStore<Agent>> = Arc::new(InMemoryStore::new());
    let tasks: Arc<InMemoryStore<Task>> = Arc::new(InMemoryStore::new());

    if let Some(dir) = &options.manifests {
        let loaded = manifests::load_dir(dir)?;
        for manifest in loaded {
            let description = manifest.describe();
            match manifest {
                Manifest::Cluster(cluster) => {
                    clusters.create(cluster).await.with_context(|| description.clone())?;
                }
                Manifest::Task(task) => {
                    tasks.create(task).await.with_context(|| description.clone())?;
                }
            }
            info!(manifest = %description, "Manifest loaded");
        }
    }

    let runtime = InMemoryAgentRuntime::new();
    let checkpoints: Arc<dyn CheckpointStore> = match &options.checkpoint_dir {
        Some(dir) => Arc::new(LocalCheckpointStore::new(dir.clone())),
        None => Arc::new(InMemoryCheckpointStore::new()),
    };
    let secrets = StaticSecretStore::default();
    for name in options.secrets {
        secrets.insert(name);
    }
    let metric_source = StaticMetricSource::new();
    for (name, value) in options.metrics {
        metric_source.set(name, BTreeMap::new(), value);
    }

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let stores = Stores {
        clusters: clusters.clone(),
        agents: agents.clone(),
        tasks: tasks.clone(),
    };
    let collaborators = Collaborators {
        runtime: Arc::new(runtime.clone()),
        checkpoints,
        metrics: Arc::new(metric_source),
        secrets: Arc::new(secrets),
        membership: Arc::new(InMemoryMembershipRegistry::new()),
    };

    let heartbeat_interval = config.spec.agents.heartbeat_interval;
    let manager = ControllerManager::new(config.spec, stores, collaborators, clock.clone());
    let shutdown = CancellationToken::new();

    let event_log = tokio::spawn(log_events(manager.event_bus(), shutdown.clone()));
    let simulator = options.simulate.then(|| {
        let simulator = LocalAgentSimulator::new(runtime, agents, tasks, clock);
        // Tick faster than the heartbeat interval so agents never look silent.
        let tick = (heartbeat_interval / 2).max(Duration::from_millis(100));
        tokio::spawn(simulator.run(tick, shutdown.clone()))
    });

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_token.cancel();
    });

    println!("{}", "colony controllers running (Ctrl+C to stop)".green());
    manager.run(shutdown.clone()).await?;

    shutdown.cancel();
    let _ = event_log.await;
    if let Some(handle) = simulator {
        let _ = handle.await;
    }
    println!("{}", "colony controllers stopped".yellow());
    Ok(())
}

/// Structured trail of every domain event.
async fn log_events(event_bus: EventBus, shutdown: CancellationToken) {
    let mut events = event_bus.subscribe();
    loop {
        let event = tokio::select! {
            _ = shutdown.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Ok(event) => {
                let kind = match &event {
                    DomainEvent::Cluster(_) => "cluster",
                    DomainEvent::AgentLifecycle(_) => "agent",
                    DomainEvent::Task(_) => "task",
                };
                match serde_json::to_string(&event) {
                    Ok(json) => {
                        info!(target: "colony::events", kind, event = %json, "Domain event")
                    }
                    Err(_) => {
                        info!(target: "colony::events", kind, event = ?event, "Domain event")
                    }
                }
            }
            Err(EventBusError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_metric() {
        assert_eq!(parse_metric("cpu=140").unwrap(), ("cpu".to_string(), 140.0));
        assert!(parse_metric("cpu").is_err());
        assert!(parse_metric("cpu=high").is_err());
    }
}
