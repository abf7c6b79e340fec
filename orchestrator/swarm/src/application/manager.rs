// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Controller Manager
//!
//! Wires the three reconcilers to the object stores and to each other:
//!
//! | Change | Enqueues |
//! |--------|----------|
//! | cluster | the cluster |
//! | agent | the agent, its owning cluster |
//! | agent became `Ready`/`Busy` | every unfinished task (capacity appeared) |
//! | agent failed / released subtasks | the affected tasks, enqueued by the lifecycle reconciler |
//! | task | the task, every agent named in its subtasks |
//!
//! The capacity ledger is rebuilt from task statuses before any worker starts.

use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use colony_core::application::agent_lifecycle::{AgentReconciler, LifecycleSettings};
use colony_core::application::controller::Controller;
use colony_core::application::scheduler::{SchedulerSettings, TaskScheduler};
use colony_core::domain::agent::{Agent, AgentPhase};
use colony_core::domain::checkpoint::CheckpointStore;
use colony_core::domain::clock::Clock;
use colony_core::domain::cluster::Cluster;
use colony_core::domain::config::ControllerConfigSpec;
use colony_core::domain::events::AgentLifecycleEvent;
use colony_core::domain::membership::MembershipRegistry;
use colony_core::domain::meta::ObjectKey;
use colony_core::domain::metrics::MetricSource;
use colony_core::domain::runtime::AgentRuntime;
use colony_core::domain::secrets::SecretStore;
use colony_core::domain::store::{ObjectStore, WatchEvent};
use colony_core::domain::task::Task;
use colony_core::infrastructure::event_bus::{DomainEvent, EventBus};
use colony_core::infrastructure::slot_ledger::SlotLedger;
use colony_core::infrastructure::telemetry;
use colony_core::infrastructure::work_queue::WorkQueue;

use crate::application::cluster_reconciler::{ClusterReconciler, ClusterSettings};

/// Object stores for the three kinds.
#[derive(Clone)]
pub struct Stores {
    pub clusters: Arc<dyn ObjectStore<Cluster>>,
    pub agents: Arc<dyn ObjectStore<Agent>>,
    pub tasks: Arc<dyn ObjectStore<Task>>,
}

/// External collaborators behind their ports.
#[derive(Clone)]
pub struct Collaborators {
    pub runtime: Arc<dyn AgentRuntime>,
    pub checkpoints: Arc<dyn CheckpointStore>,
    pub metrics: Arc<dyn MetricSource>,
    pub secrets: Arc<dyn SecretStore>,
    pub membership: Arc<dyn MembershipRegistry>,
}

pub struct ControllerManager {
    config: ControllerConfigSpec,
    stores: Stores,
    collaborators: Collaborators,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
    ledger: Arc<SlotLedger>,
}

impl ControllerManager {
    pub fn new(
        config: ControllerConfigSpec,
        stores: Stores,
        collaborators: Collaborators,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            stores,
            collaborators,
            clock,
            event_bus: EventBus::with_default_capacity(),
            ledger: Arc::new(SlotLedger::new()),
        }
    }

    pub fn event_bus(&self) -> EventBus {
        self.event_bus.clone()
    }

    pub fn ledger(&self) -> Arc<SlotLedger> {
        self.ledger.clone()
    }

    /// Run every controller until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> anyhow::Result<()> {
        telemetry::describe_metrics();

        let tasks = self.stores.tasks.list(None).await?;
        self.ledger.rebuild(tasks.iter());
        info!(tasks = tasks.len(), "Capacity ledger rebuilt");

        let controller_settings = self.config.controller.clone();

        let scheduler = TaskScheduler::new(
            self.stores.tasks.clone(),
            self.stores.agents.clone(),
            self.collaborators.runtime.clone(),
            self.collaborators.checkpoints.clone(),
            self.ledger.clone(),
            self.event_bus.clone(),
            self.clock.clone(),
            SchedulerSettings::from_config(&self.config),
        );
        let task_controller = Controller::new(Arc::new(scheduler), controller_settings.clone());

        let lifecycle = AgentReconciler::new(
            self.stores.agents.clone(),
            self.stores.tasks.clone(),
            self.stores.clusters.clone(),
            self.collaborators.runtime.clone(),
            self.event_bus.clone(),
            self.clock.clone(),
            LifecycleSettings::from_config(&self.config),
        )
        .with_task_queue(task_controller.queue());
        let agent_controller = Controller::new(Arc::new(lifecycle), controller_settings.clone());

        let cluster_reconciler = ClusterReconciler::new(
            self.stores.clusters.clone(),
            self.stores.agents.clone(),
            self.collaborators.metrics.clone(),
            self.collaborators.secrets.clone(),
            self.collaborators.membership.clone(),
            self.event_bus.clone(),
            self.clock.clone(),
            ClusterSettings::from_config(&self.config),
        );
        let cluster_controller = Controller::new(Arc::new(cluster_reconciler), controller_settings);

        let mut watches = vec![
            cluster_controller.watch(self.stores.clusters.watch(), own_key, shutdown.clone()),
            cluster_controller.watch(self.stores.agents.watch(), owning_cluster, shutdown.clone()),
            agent_controller.watch(self.stores.agents.watch(), own_key, shutdown.clone()),
            agent_controller.watch(self.stores.tasks.watch(), assigned_agents, shutdown.clone()),
            task_controller.watch(self.stores.tasks.watch(), own_key, shutdown.clone()),
        ];
        watches.push(spawn_capacity_trigger(
            self.event_bus.clone(),
            self.stores.tasks.clone(),
            task_controller.queue(),
            shutdown.clone(),
        ));

        info!("Controller manager started");
        tokio::join!(
            cluster_controller.run(shutdown.clone()),
            agent_controller.run(shutdown.clone()),
            task_controller.run(shutdown.clone()),
        );
        join_all(watches).await;
        info!("Controller manager stopped");
        Ok(())
    }
}

fn own_key<T: colony_core::domain::meta::Resource>(event: &WatchEvent<T>) -> Vec<ObjectKey> {
    vec![event.object().meta().key()]
}

fn owning_cluster(event: &WatchEvent<Agent>) -> Vec<ObjectKey> {
    let agent = event.object();
    agent
        .cluster_name()
        .map(|cluster| vec![ObjectKey::new(agent.metadata.namespace.clone(), cluster)])
        .unwrap_or_default()
}

fn assigned_agents(event: &WatchEvent<Task>) -> Vec<ObjectKey> {
    let task = event.object();
    let agents: BTreeSet<&str> = task
        .status
        .subtasks
        .values()
        .filter_map(|s| s.assigned_agent.as_ref().map(|a| a.as_str()))
        .collect();
    agents
        .into_iter()
        .map(|name| ObjectKey::new(task.metadata.namespace.clone(), name))
        .collect()
}

/// Requeue unfinished tasks whenever an agent becomes schedulable.
fn spawn_capacity_trigger(
    event_bus: EventBus,
    tasks: Arc<dyn ObjectStore<Task>>,
    queue: WorkQueue<ObjectKey>,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => break,
                event = events.recv() => event,
            };
            let capacity_appeared = match event {
                Ok(DomainEvent::AgentLifecycle(AgentLifecycleEvent::PhaseChanged { to, .. })) => {
                    matches!(to, AgentPhase::Ready)
                }
                Ok(_) => false,
                // Missed events: treat as possible capacity change.
                Err(colony_core::infrastructure::event_bus::EventBusError::Lagged(_)) => true,
                Err(_) => break,
            };
            if !capacity_appeared {
                continue;
            }
            match tasks.list(None).await {
                Ok(all) => {
                    let pending: Vec<ObjectKey> = all
                        .iter()
                        .filter(|t| !t.status.phase.is_terminal())
                        .map(|t| t.metadata.key())
                        .collect();
                    debug!(tasks = pending.len(), "Agent became ready, requeueing tasks");
                    for key in pending {
                        queue.add(key);
                    }
                }
                Err(e) => debug!(error = %e, "Could not list tasks for capacity trigger"),
            }
        }
    })
}
