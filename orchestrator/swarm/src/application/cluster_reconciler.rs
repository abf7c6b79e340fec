// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Reconciler
//!
//! Keeps a cluster's owned agents converged to the desired population:
//!
//! 1. Deletion: delete every owned agent, wait for them to go, deregister the
//!    hive-mind membership, drop the finalizer.
//! 2. Validate the spec. Invalid clusters go `Failed` and are not requeued.
//! 3. Resolve template secrets. Missing ones hold the cluster with
//!    `SecretsReady=False`.
//! 4. Decide the desired total (bounds, then autoscaler) and split it by ratio.
//! 5. Create, update or delete agents so each type matches. Each agent's spec is
//!    computed in full (including its peer list) and written only on change.
//! 6. Sync hive-mind membership and record the observed population.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use colony_core::application::agent_lifecycle::REASON_RECOVERY_EXHAUSTED;
use colony_core::application::reconciler::{with_timeout, Action, Reconciler};
use colony_core::domain::agent::{
    Agent, AgentId, AgentPhase, AgentSpec, AgentStatus, AgentType, CognitivePattern,
    AGENT_TYPE_LABEL, CLUSTER_LABEL,
};
use colony_core::domain::clock::{elapsed, Clock};
use colony_core::domain::cluster::{Cluster, ClusterPhase, ClusterStatus, CLUSTER_FINALIZER};
use colony_core::domain::config::ControllerConfigSpec;
use colony_core::domain::errors::ReconcileError;
use colony_core::domain::events::ClusterEvent;
use colony_core::domain::membership::MembershipRegistry;
use colony_core::domain::meta::{
    set_condition, ConditionStatus, ObjectKey, ObjectMeta, OwnerReference, Resource,
};
use colony_core::domain::metrics::MetricSource;
use colony_core::domain::secrets::{SecretReference, SecretStore};
use colony_core::domain::store::{ObjectStore, StoreError};
use colony_core::infrastructure::event_bus::EventBus;
use colony_core::infrastructure::telemetry;

use crate::domain::autoscaler::{self, HoldReason, MetricReading, ScaleDecision, ScalingInput};
use crate::domain::topology::{distribute, ratios_for, PeerLayout};

pub const CONDITION_VALIDATED: &str = "Validated";
pub const CONDITION_SECRETS_READY: &str = "SecretsReady";
pub const CONDITION_STABILIZING: &str = "ScaleDownStabilizing";
pub const REASON_INVALID_SPEC: &str = "InvalidSpec";

#[derive(Debug, Clone)]
pub struct ClusterSettings {
    pub resync_interval: Duration,
    pub evaluation_interval: Duration,
    pub stabilization_window: Duration,
    pub external_call_timeout: Duration,
}

impl ClusterSettings {
    pub fn from_config(spec: &ControllerConfigSpec) -> Self {
        Self {
            resync_interval: spec.controller.resync_interval,
            evaluation_interval: spec.autoscaling.evaluation_interval,
            stabilization_window: spec.autoscaling.stabilization_window,
            external_call_timeout: spec.controller.external_call_timeout,
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfigSpec::default())
    }
}

pub struct ClusterReconciler {
    clusters: Arc<dyn ObjectStore<Cluster>>,
    agents: Arc<dyn ObjectStore<Agent>>,
    metrics: Arc<dyn MetricSource>,
    secrets: Arc<dyn SecretStore>,
    membership: Arc<dyn MembershipRegistry>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings: ClusterSettings,
}

impl ClusterReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clusters: Arc<dyn ObjectStore<Cluster>>,
        agents: Arc<dyn ObjectStore<Agent>>,
        metrics: Arc<dyn MetricSource>,
        secrets: Arc<dyn SecretStore>,
        membership: Arc<dyn MembershipRegistry>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        settings: ClusterSettings,
    ) -> Self {
        Self {
            clusters,
            agents,
            metrics,
            secrets,
            membership,
            event_bus,
            clock,
            settings,
        }
    }

    async fn reconcile_cluster(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(mut cluster) = self.clusters.get(key).await? else {
            return Ok(Action::AwaitChange);
        };
        let now = self.clock.now();

        if cluster.metadata.is_deleting() {
            return self.teardown(cluster, now).await;
        }

        if !cluster.metadata.has_finalizer(CLUSTER_FINALIZER) {
            cluster.metadata.add_finalizer(CLUSTER_FINALIZER);
            cluster = self.clusters.update(&cluster).await?;
        }

        let mut status = cluster.status.clone();
        let mut events = Vec::new();
        if status.phase == ClusterPhase::Pending {
            transition(key, &mut status, ClusterPhase::Initializing, now, &mut events);
        }

        if let Err(e) = cluster.spec.validate() {
            let message = e.to_string();
            set_condition(
                &mut status.conditions,
                CONDITION_VALIDATED,
                ConditionStatus::False,
                REASON_INVALID_SPEC,
                &message,
                now,
            );
            status.reason = Some(REASON_INVALID_SPEC.to_string());
            status.message = Some(message.clone());
            status.observed_generation = cluster.metadata.generation;
            if status.phase != ClusterPhase::Failed {
                events.push(ClusterEvent::ValidationFailed {
                    cluster: key.clone(),
                    message: message.clone(),
                    failed_at: now,
                });
            }
            transition(key, &mut status, ClusterPhase::Failed, now, &mut events);
            self.persist(&cluster, status, events).await?;
            return Err(ReconcileError::Validation(message));
        }
        set_condition(
            &mut status.conditions,
            CONDITION_VALIDATED,
            ConditionStatus::True,
            "SpecValid",
            "",
            now,
        );
        status.observed_generation = cluster.metadata.generation;

        let secrets = match self.resolve_secrets(&cluster).await? {
            Ok(secrets) => {
                set_condition(
                    &mut status.conditions,
                    CONDITION_SECRETS_READY,
                    ConditionStatus::True,
                    "Resolved",
                    "",
                    now,
                );
                secrets
            }
            Err(missing) => {
                let message = format!("missing secrets: {}", missing.join(", "));
                set_condition(
                    &mut status.conditions,
                    CONDITION_SECRETS_READY,
                    ConditionStatus::False,
                    "SecretNotFound",
                    &message,
                    now,
                );
                status.message = Some(message);
                self.persist(&cluster, status, events).await?;
                return Ok(Action::Requeue(self.settings.resync_interval));
            }
        };

        let owned = self.owned_agents(&cluster).await?;
        let (deleting, mut live): (Vec<Agent>, Vec<Agent>) =
            owned.into_iter().partition(|a| a.metadata.is_deleting());

        // Agents that ran out of recovery attempts are replaced.
        let mut removed = Vec::new();
        live.retain(|a| {
            let exhausted = a.status.phase == AgentPhase::Failed
                && a.status.reason.as_deref() == Some(REASON_RECOVERY_EXHAUSTED);
            if exhausted {
                removed.push(a.metadata.key());
            }
            !exhausted
        });

        let desired = self
            .desired_population(&cluster, live.len() as u32, &mut status, now, &mut events)
            .await?;

        // Scale down per type.
        let mut by_type: BTreeMap<AgentType, Vec<Agent>> = BTreeMap::new();
        for agent in live {
            by_type.entry(agent.spec.agent_type).or_default().push(agent);
        }
        let mut kept: Vec<Agent> = Vec::new();
        for (agent_type, mut agents) in by_type {
            let want = desired.get(&agent_type).copied().unwrap_or(0) as usize;
            if agents.len() > want {
                agents.sort_by_key(removal_rank);
                for agent in agents.drain(want..) {
                    removed.push(agent.metadata.key());
                }
            }
            kept.extend(agents);
        }

        // Scale up with the lowest free indices.
        let mut taken: BTreeSet<u32> = kept
            .iter()
            .chain(deleting.iter())
            .map(|a| a.spec.index)
            .collect();
        for key in &removed {
            if let Some(index) = index_of(&cluster.metadata.name, &key.name) {
                taken.insert(index);
            }
        }
        let mut planned: Vec<Agent> = Vec::new();
        for (agent_type, want) in &desired {
            let have = kept.iter().filter(|a| a.spec.agent_type == *agent_type).count() as u32;
            for _ in have..*want {
                let index = (0u32..).find(|i| !taken.contains(i)).unwrap_or(0);
                taken.insert(index);
                planned.push(self.new_agent(&cluster, *agent_type, index, &secrets));
            }
        }

        let layout = PeerLayout::from_agents(kept.iter().chain(planned.iter()));
        let peers = layout.peers(cluster.spec.topology);

        for agent_key in &removed {
            match self.agents.delete(agent_key).await {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            info!(cluster = %key, agent = %agent_key, "Removing agent");
            events.push(ClusterEvent::AgentRemoved {
                cluster: key.clone(),
                agent: AgentId::new(agent_key.name.clone()),
                removed_at: now,
            });
        }

        for mut agent in planned {
            agent.spec.peers = Some(peers.get(&agent.id()).cloned().unwrap_or_default());
            let agent_type = agent.spec.agent_type;
            let id = agent.id();
            match self.agents.create(agent).await {
                Ok(_) => {
                    info!(cluster = %key, agent = %id, agent_type = %agent_type, "Created agent");
                    events.push(ClusterEvent::AgentCreated {
                        cluster: key.clone(),
                        agent: id,
                        agent_type,
                        created_at: now,
                    });
                }
                Err(StoreError::AlreadyExists { .. }) => {
                    debug!(agent = %id, "Agent already exists")
                }
                Err(e) => return Err(e.into()),
            }
        }

        let mut peers_updated = 0usize;
        for agent in &kept {
            let mut wanted =
                self.desired_spec(&cluster, agent.spec.agent_type, agent.spec.index, &secrets);
            wanted.peers = Some(peers.get(&agent.id()).cloned().unwrap_or_default());
            if wanted == agent.spec {
                continue;
            }
            if wanted.peers != agent.spec.peers {
                peers_updated += 1;
            }
            let mut updated = agent.clone();
            updated.spec = wanted;
            self.agents.update(&updated).await?;
        }
        if peers_updated > 0 {
            events.push(ClusterEvent::PeersRecomputed {
                cluster: key.clone(),
                topology: cluster.spec.topology,
                agents_updated: peers_updated,
                recomputed_at: now,
            });
        }

        if cluster.spec.hive_mind.enabled {
            with_timeout(
                self.settings.external_call_timeout,
                "membership sync",
                self.membership
                    .sync_members(key, cluster.spec.hive_mind.consensus, layout.members()),
            )
            .await?;
        }

        // Observed population after this pass.
        let mut counts: BTreeMap<AgentType, u32> = BTreeMap::new();
        for agent_type in layout_types(&kept, &desired) {
            *counts.entry(agent_type).or_insert(0) += 1;
        }
        let active = kept.iter().filter(|a| a.status.phase.is_active()).count() as u32;
        status.agent_counts = counts;
        status.active_agents = active;
        status.desired_agents = desired.clone();
        status.reason = None;
        status.message = None;

        let desired_total: u32 = desired.values().sum();
        let converged = removed.is_empty()
            && deleting.is_empty()
            && kept.len() as u32 == desired_total
            && active == desired_total;
        let phase = if converged { ClusterPhase::Running } else { ClusterPhase::Scaling };
        transition(key, &mut status, phase, now, &mut events);
        telemetry::record_cluster_population(&key.to_string(), desired_total, active);

        self.persist(&cluster, status, events).await?;

        let mut action = Action::Requeue(self.settings.resync_interval);
        if cluster.spec.autoscaling.enabled && !cluster.spec.autoscaling.metrics.is_empty() {
            action = action.sooner(Action::Requeue(self.settings.evaluation_interval));
        }
        Ok(action)
    }

    /// Desired per-type population: bounds first, then the autoscaler.
    async fn desired_population(
        &self,
        cluster: &Cluster,
        current: u32,
        status: &mut ClusterStatus,
        now: DateTime<Utc>,
        events: &mut Vec<ClusterEvent>,
    ) -> Result<BTreeMap<AgentType, u32>, ReconcileError> {
        let key = cluster.metadata.key();
        let spec = &cluster.spec;
        let ratios = ratios_for(spec);
        let previous: u32 = status.desired_agents.values().sum();
        let base = if status.desired_agents.is_empty() { spec.min_agents } else { previous };
        let mut total = base.clamp(spec.min_agents, spec.max_agents).max(1);

        let due = status
            .last_scale_time
            .map_or(true, |last| elapsed(now, last, self.settings.evaluation_interval));
        if spec.autoscaling.enabled && !spec.autoscaling.metrics.is_empty() && due {
            let readings = self.read_metrics(cluster).await;
            let input = ScalingInput {
                current_total: if current == 0 { total } else { current },
                min_agents: spec.min_agents,
                max_agents: spec.max_agents,
                last_scale_time: status.last_scale_time,
                stabilization_window: spec
                    .autoscaling
                    .stabilization_window
                    .unwrap_or(self.settings.stabilization_window),
                now,
            };
            match autoscaler::decide(&input, &readings) {
                ScaleDecision::Scale {
                    direction,
                    factor,
                    from_total,
                    to_total,
                } => {
                    info!(
                        cluster = %key,
                        from = from_total,
                        to = to_total,
                        factor,
                        direction = ?direction,
                        "Autoscaling"
                    );
                    total = to_total;
                    status.last_scale_time = Some(now);
                    status.last_scale_direction = Some(direction);
                    set_condition(
                        &mut status.conditions,
                        CONDITION_STABILIZING,
                        ConditionStatus::False,
                        "Scaled",
                        "",
                        now,
                    );
                    events.push(ClusterEvent::Scaled {
                        cluster: key.clone(),
                        from_total,
                        to_total,
                        scale_factor: factor,
                        scaled_at: now,
                    });
                }
                ScaleDecision::Suppressed {
                    desired_total,
                    remaining,
                } => {
                    debug!(
                        cluster = %key,
                        desired = desired_total,
                        remaining_secs = remaining.as_secs(),
                        "Scale-down held by stabilization window"
                    );
                    let message =
                        format!("scale down to {desired_total} deferred by stabilization window");
                    let changed = set_condition(
                        &mut status.conditions,
                        CONDITION_STABILIZING,
                        ConditionStatus::True,
                        "WindowActive",
                        &message,
                        now,
                    );
                    if changed {
                        events.push(ClusterEvent::ScaleDownSuppressed {
                            cluster: key.clone(),
                            desired_total,
                            current_total: input.current_total,
                            window_remaining_secs: remaining.as_secs(),
                        });
                    }
                }
                ScaleDecision::Hold { reason: HoldReason::NoMetrics } => {
                    warn!(
                        cluster = %key,
                        "No metric readings available, keeping current population"
                    );
                }
                ScaleDecision::Hold { reason: HoldReason::Steady } => {}
            }
        }

        Ok(distribute(total, &ratios))
    }

    /// Query every configured metric. Failures are skipped with a warning.
    async fn read_metrics(&self, cluster: &Cluster) -> Vec<MetricReading> {
        let mut readings = Vec::new();
        for metric in &cluster.spec.autoscaling.metrics {
            let mut selector = metric.selector.clone();
            selector.insert(CLUSTER_LABEL.to_string(), cluster.metadata.name.clone());
            let result = with_timeout(
                self.settings.external_call_timeout,
                "metric query",
                self.metrics.query(&metric.name, &selector),
            )
            .await;
            match result {
                Ok(Some(observed)) => readings.push(MetricReading {
                    name: metric.name.clone(),
                    observed,
                    target: metric.target,
                }),
                Ok(None) => warn!(
                    cluster = %cluster.metadata.key(),
                    metric = %metric.name,
                    "Metric unavailable, skipping"
                ),
                Err(e) => warn!(
                    cluster = %cluster.metadata.key(),
                    metric = %metric.name,
                    error = %e,
                    "Metric query failed, skipping"
                ),
            }
        }
        readings
    }

    /// `Ok(Err(missing))` when some template secrets do not exist.
    async fn resolve_secrets(
        &self,
        cluster: &Cluster,
    ) -> Result<Result<Vec<SecretReference>, Vec<String>>, ReconcileError> {
        let mut refs = Vec::new();
        let mut missing = Vec::new();
        for name in &cluster.spec.agent_template.secrets {
            let exists = with_timeout(
                self.settings.external_call_timeout,
                "secret lookup",
                self.secrets.exists(name),
            )
            .await?;
            if !exists {
                missing.push(name.clone());
                continue;
            }
            let reference = with_timeout(
                self.settings.external_call_timeout,
                "secret mount",
                self.secrets.mount_spec(name),
            )
            .await?;
            refs.push(reference);
        }
        Ok(if missing.is_empty() { Ok(refs) } else { Err(missing) })
    }

    async fn owned_agents(&self, cluster: &Cluster) -> Result<Vec<Agent>, ReconcileError> {
        let name = &cluster.metadata.name;
        let uid = cluster.metadata.uid;
        Ok(self
            .agents
            .list(Some(&cluster.metadata.namespace))
            .await?
            .into_iter()
            .filter(|a| a.metadata.is_owned_by(Cluster::KIND, name, uid))
            .collect())
    }

    async fn teardown(
        &self,
        cluster: Cluster,
        now: DateTime<Utc>,
    ) -> Result<Action, ReconcileError> {
        let key = cluster.metadata.key();
        let mut status = cluster.status.clone();
        let mut events = Vec::new();
        transition(&key, &mut status, ClusterPhase::Terminating, now, &mut events);

        let owned = self.owned_agents(&cluster).await?;
        for agent in owned.iter().filter(|a| !a.metadata.is_deleting()) {
            match self.agents.delete(&agent.metadata.key()).await {
                Ok(()) | Err(StoreError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            events.push(ClusterEvent::AgentRemoved {
                cluster: key.clone(),
                agent: agent.id(),
                removed_at: now,
            });
        }
        status.active_agents = owned.iter().filter(|a| a.status.phase.is_active()).count() as u32;
        let cluster = self.persist(&cluster, status, events).await?;

        if !owned.is_empty() {
            debug!(
                cluster = %key,
                remaining = owned.len(),
                "Waiting for owned agents to terminate"
            );
            return Ok(Action::Requeue(self.settings.resync_interval));
        }

        if cluster.spec.hive_mind.enabled {
            with_timeout(
                self.settings.external_call_timeout,
                "membership deregister",
                self.membership.deregister(&key),
            )
            .await?;
        }
        let mut cluster = cluster;
        if cluster.metadata.remove_finalizer(CLUSTER_FINALIZER) {
            self.clusters.update(&cluster).await?;
            info!(cluster = %key, "Cluster torn down, finalizer removed");
        }
        Ok(Action::AwaitChange)
    }

    fn new_agent(
        &self,
        cluster: &Cluster,
        agent_type: AgentType,
        index: u32,
        secrets: &[SecretReference],
    ) -> Agent {
        let id = AgentId::for_index(&cluster.metadata.name, index);
        let mut metadata = ObjectMeta::new(cluster.metadata.namespace.clone(), id.as_str());
        metadata.creation_timestamp = self.clock.now();
        metadata.owner = Some(OwnerReference {
            kind: Cluster::KIND.to_string(),
            name: cluster.metadata.name.clone(),
            uid: cluster.metadata.uid,
        });
        metadata.labels.insert(CLUSTER_LABEL.to_string(), cluster.metadata.name.clone());
        metadata.labels.insert(AGENT_TYPE_LABEL.to_string(), agent_type.to_string());
        Agent {
            metadata,
            spec: self.desired_spec(cluster, agent_type, index, secrets),
            status: AgentStatus::default(),
        }
    }

    /// Spec an agent of `agent_type` at `index` should carry, without peers.
    fn desired_spec(
        &self,
        cluster: &Cluster,
        agent_type: AgentType,
        index: u32,
        secrets: &[SecretReference],
    ) -> AgentSpec {
        let template = &cluster.spec.agent_template;
        let mut capabilities = template.capabilities.clone();
        capabilities.extend(agent_type.default_capabilities().iter().map(|c| c.to_string()));
        AgentSpec {
            agent_type,
            cognitive_pattern: template
                .cognitive_pattern
                .unwrap_or_else(|| CognitivePattern::for_type(agent_type)),
            capabilities,
            max_concurrent_tasks: template.max_concurrent_tasks,
            index,
            peers: None,
            secrets: secrets.to_vec(),
            env: template.env.clone(),
        }
    }

    async fn persist(
        &self,
        cluster: &Cluster,
        status: ClusterStatus,
        events: Vec<ClusterEvent>,
    ) -> Result<Cluster, ReconcileError> {
        if status == cluster.status {
            return Ok(cluster.clone());
        }
        let mut updated = cluster.clone();
        updated.status = status;
        let stored = self.clusters.update_status(&updated).await?;
        for event in events {
            if let ClusterEvent::PhaseChanged { cluster, from, to, .. } = &event {
                info!(cluster = %cluster, from = ?from, to = ?to, "Cluster phase transition");
            }
            self.event_bus.publish_cluster_event(event);
        }
        Ok(stored)
    }
}

#[async_trait]
impl Reconciler for ClusterReconciler {
    fn name(&self) -> &'static str {
        "cluster"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.reconcile_cluster(key).await
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, ReconcileError> {
        Ok(self.clusters.list(None).await?.iter().map(|c| c.metadata.key()).collect())
    }
}

fn transition(
    key: &ObjectKey,
    status: &mut ClusterStatus,
    to: ClusterPhase,
    now: DateTime<Utc>,
    events: &mut Vec<ClusterEvent>,
) {
    if status.phase == to {
        return;
    }
    events.push(ClusterEvent::PhaseChanged {
        cluster: key.clone(),
        from: status.phase,
        to,
        changed_at: now,
    });
    status.phase = to;
}

/// Sort key for scale-down. The tail of the sorted list is removed: failed agents
/// first, then idle ones, then the highest index.
fn removal_rank(agent: &Agent) -> (u8, u32) {
    let rank = match agent.status.phase {
        AgentPhase::Failed => 2,
        _ if agent.is_idle() => 1,
        _ => 0,
    };
    (rank, agent.spec.index)
}

fn index_of(cluster: &str, agent: &str) -> Option<u32> {
    agent
        .strip_prefix(cluster)
        .and_then(|rest| rest.strip_prefix("-agent-"))
        .and_then(|i| i.parse().ok())
}

/// Types of the agents that will exist once this pass's creations land.
fn layout_types(kept: &[Agent], desired: &BTreeMap<AgentType, u32>) -> Vec<AgentType> {
    let mut types: Vec<AgentType> = kept.iter().map(|a| a.spec.agent_type).collect();
    for (agent_type, want) in desired {
        let have = kept.iter().filter(|a| a.spec.agent_type == *agent_type).count() as u32;
        types.extend(std::iter::repeat(*agent_type).take(want.saturating_sub(have) as usize));
    }
    types
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(index: u32, phase: AgentPhase, busy: bool) -> Agent {
        let mut spec: AgentSpec = serde_json::from_str(r#"{"type":"coder"}"#).unwrap();
        spec.index = index;
        let mut status = AgentStatus {
            phase,
            ..AgentStatus::default()
        };
        if busy {
            status.assigned_subtasks.push(colony_core::domain::task::SubtaskRef::new(
                ObjectKey::new("default", "t"),
                "a",
            ));
        }
        Agent {
            metadata: ObjectMeta::new("default", format!("c-agent-{index}")),
            spec,
            status,
        }
    }

    #[test]
    fn test_removal_order_prefers_failed_then_idle_then_highest_index() {
        let mut agents = vec![
            agent(0, AgentPhase::Busy, true),
            agent(1, AgentPhase::Ready, false),
            agent(2, AgentPhase::Failed, false),
            agent(3, AgentPhase::Busy, true),
            agent(4, AgentPhase::Ready, false),
        ];
        agents.sort_by_key(removal_rank);
        let order: Vec<u32> = agents.iter().map(|a| a.spec.index).collect();
        // Keep from the front, remove from the back.
        assert_eq!(order, vec![0, 3, 1, 4, 2]);
    }

    #[test]
    fn test_index_parsing() {
        assert_eq!(index_of("swarm", "swarm-agent-12"), Some(12));
        assert_eq!(index_of("swarm", "other-agent-1"), None);
    }
}
