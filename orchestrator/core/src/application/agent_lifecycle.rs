// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Lifecycle
//!
//! Drives one `Agent` through its phases:
//!
//! ```text
//! Pending ──(peers computed)──▶ Initializing ──(heartbeat)──▶ Ready ◀──▶ Busy
//!                                    ▲                          │         │
//!                                    │ cooldown                 ▼         ▼
//!                                    └───────────────────────  Failed ◀───┘
//!                                                (heartbeat timeout)
//! ```
//!
//! `assigned_subtasks` is derived from the task view: the scheduler owns task
//! status, this reconciler only mirrors it. On heartbeat timeout the agent
//! goes `Failed`, its subtasks are listed in the `AgentFailed` event and every
//! affected task is enqueued so the scheduler requeues them in its next pass.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::application::reconciler::{with_timeout, Action, Reconciler};
use crate::domain::agent::{
    Agent, AgentId, AgentPhase, AgentStatus, PerformanceCounters, AGENT_FINALIZER,
};
use crate::domain::clock::{after, elapsed, Clock};
use crate::domain::cluster::Cluster;
use crate::domain::config::ControllerConfigSpec;
use crate::domain::errors::ReconcileError;
use crate::domain::events::AgentLifecycleEvent;
use crate::domain::meta::{ObjectKey, Resource};
use crate::domain::runtime::AgentRuntime;
use crate::domain::store::ObjectStore;
use crate::domain::task::{SubtaskRef, Task};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::telemetry;
use crate::infrastructure::work_queue::WorkQueue;

pub const REASON_HEARTBEAT_TIMEOUT: &str = "HeartbeatTimeout";
pub const REASON_RECOVERING: &str = "Recovering";
pub const REASON_RECOVERY_EXHAUSTED: &str = "RecoveryExhausted";
pub const REASON_DELETING: &str = "Deleting";

#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub recovery_cooldown: Duration,
    pub max_recovery_attempts: u32,
    pub external_call_timeout: Duration,
}

impl LifecycleSettings {
    pub fn from_config(spec: &ControllerConfigSpec) -> Self {
        Self {
            heartbeat_interval: spec.agents.heartbeat_interval,
            heartbeat_timeout: spec.agents.heartbeat_timeout(),
            recovery_cooldown: spec.agents.recovery_cooldown,
            max_recovery_attempts: spec.agents.max_recovery_attempts,
            external_call_timeout: spec.controller.external_call_timeout,
        }
    }
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfigSpec::default())
    }
}

pub struct AgentReconciler {
    agents: Arc<dyn ObjectStore<Agent>>,
    tasks: Arc<dyn ObjectStore<Task>>,
    clusters: Arc<dyn ObjectStore<Cluster>>,
    runtime: Arc<dyn AgentRuntime>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings: LifecycleSettings,
    task_queue: Option<WorkQueue<ObjectKey>>,
}

impl AgentReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        agents: Arc<dyn ObjectStore<Agent>>,
        tasks: Arc<dyn ObjectStore<Task>>,
        clusters: Arc<dyn ObjectStore<Cluster>>,
        runtime: Arc<dyn AgentRuntime>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        settings: LifecycleSettings,
    ) -> Self {
        Self {
            agents,
            tasks,
            clusters,
            runtime,
            event_bus,
            clock,
            settings,
            task_queue: None,
        }
    }

    /// Enqueue tasks into `queue` whenever this reconciler releases their subtasks.
    pub fn with_task_queue(mut self, queue: WorkQueue<ObjectKey>) -> Self {
        self.task_queue = Some(queue);
        self
    }

    async fn reconcile_agent(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(mut agent) = self.agents.get(key).await? else {
            return Ok(Action::AwaitChange);
        };
        let id = agent.id();
        let now = self.clock.now();

        let tasks = self.tasks.list(Some(&key.namespace)).await?;
        let mut assigned: Vec<SubtaskRef> = tasks.iter().flat_map(|t| t.running_on(&id)).collect();
        assigned.sort();
        let performance = tasks.iter().fold(PerformanceCounters::default(), |mut acc, t| {
            let (completed, failed) = t.outcomes_for(&id);
            acc.completed_subtasks += completed;
            acc.failed_subtasks += failed;
            acc
        });

        let mut status = agent.status.clone();
        status.performance = performance;
        let mut events = Vec::new();

        if agent.metadata.is_deleting() {
            transition(
                &id,
                &mut status,
                AgentPhase::Terminating,
                Some(REASON_DELETING),
                now,
                &mut events,
            );
            status.assigned_subtasks = assigned.clone();
            let mut agent = self.persist(&agent, status, events).await?;
            if !assigned.is_empty() {
                // Tasks see a terminating agent as lost and requeue its work.
                self.enqueue_tasks(&assigned);
                debug!(
                    agent = %id,
                    pending = assigned.len(),
                    "Waiting for subtasks to drain before removal"
                );
                return Ok(Action::Requeue(self.settings.heartbeat_interval));
            }
            if agent.metadata.remove_finalizer(AGENT_FINALIZER) {
                self.agents.update(&agent).await?;
                info!(agent = %id, "Agent released, finalizer removed");
            }
            return Ok(Action::AwaitChange);
        }

        if self.is_orphaned(&agent).await? {
            warn!(agent = %id, "Owning cluster is gone, deleting orphaned agent");
            self.agents.delete(key).await?;
            return Ok(Action::AwaitChange);
        }

        if !agent.metadata.has_finalizer(AGENT_FINALIZER) {
            agent.metadata.add_finalizer(AGENT_FINALIZER);
            agent = self.agents.update(&agent).await?;
        }

        let beat = with_timeout(
            self.settings.external_call_timeout,
            "heartbeat lookup",
            self.runtime.last_heartbeat(key),
        )
        .await?;
        if let Some(beat) = beat {
            if status.last_heartbeat.map_or(true, |seen| beat > seen) {
                status.last_heartbeat = Some(beat);
            }
        }

        if status.phase == AgentPhase::Pending && agent.spec.peers.is_some() {
            transition(&id, &mut status, AgentPhase::Initializing, None, now, &mut events);
        }

        let mut released = Vec::new();
        let action = match status.phase {
            AgentPhase::Pending | AgentPhase::Terminating => Action::AwaitChange,
            AgentPhase::Failed => self.recover(&id, &mut status, now, &mut events),
            _ => {
                status.assigned_subtasks = assigned;
                self.drive_active(&agent, &mut status, now, &mut released, &mut events)
            }
        };

        self.persist(&agent, status, events).await?;
        if !released.is_empty() {
            telemetry::record_agent_failure();
            self.enqueue_tasks(&released);
        }
        Ok(action)
    }

    /// Heartbeat timeout and the Initializing → Ready ↔ Busy transitions.
    fn drive_active(
        &self,
        agent: &Agent,
        status: &mut AgentStatus,
        now: DateTime<Utc>,
        released: &mut Vec<SubtaskRef>,
        events: &mut Vec<AgentLifecycleEvent>,
    ) -> Action {
        let id = agent.id();
        status.peers = agent.spec.peers.clone().unwrap_or_default();

        let fresh_beat = status
            .last_heartbeat
            .filter(|beat| status.last_failure_time.map_or(true, |failed| *beat > failed));
        let reference = fresh_beat.or(status.phase_since).unwrap_or(now);

        if elapsed(now, reference, self.settings.heartbeat_timeout) {
            *released = std::mem::take(&mut status.assigned_subtasks);
            status.last_failure_time = Some(now);
            status.message = Some(format!(
                "no heartbeat for {}s",
                (now - reference).num_seconds().max(0)
            ));
            warn!(agent = %id, released = released.len(), "Heartbeat timeout, failing agent");
            events.push(AgentLifecycleEvent::AgentFailed {
                agent: id.clone(),
                last_seen: fresh_beat,
                released: released.clone(),
                failed_at: now,
            });
            let reason = Some(REASON_HEARTBEAT_TIMEOUT);
            transition(&id, status, AgentPhase::Failed, reason, now, events);
            return Action::Requeue(self.settings.recovery_cooldown);
        }

        if status.phase == AgentPhase::Initializing
            && agent.spec.peers.is_some()
            && fresh_beat.is_some()
        {
            transition(&id, status, AgentPhase::Ready, None, now, events);
        }
        match (status.phase, status.assigned_subtasks.is_empty()) {
            (AgentPhase::Ready, false) => {
                transition(&id, status, AgentPhase::Busy, None, now, events)
            }
            (AgentPhase::Busy, true) => {
                transition(&id, status, AgentPhase::Ready, None, now, events)
            }
            _ => {}
        }

        let deadline = after(reference, self.settings.heartbeat_timeout);
        let remaining = (deadline - now).to_std().unwrap_or(Duration::ZERO);
        Action::Requeue(remaining.min(self.settings.heartbeat_interval))
    }

    /// Failed → Initializing after the cooldown, bounded by the recovery ceiling.
    fn recover(
        &self,
        id: &AgentId,
        status: &mut AgentStatus,
        now: DateTime<Utc>,
        events: &mut Vec<AgentLifecycleEvent>,
    ) -> Action {
        if status.recovery_attempts >= self.settings.max_recovery_attempts {
            if status.reason.as_deref() != Some(REASON_RECOVERY_EXHAUSTED) {
                status.reason = Some(REASON_RECOVERY_EXHAUSTED.to_string());
                status.message = Some(format!(
                    "gave up after {} recovery attempts",
                    status.recovery_attempts
                ));
                events.push(AgentLifecycleEvent::RecoveryExhausted {
                    agent: id.clone(),
                    attempts: status.recovery_attempts,
                });
            }
            return Action::AwaitChange;
        }

        let since = status.last_failure_time.or(status.phase_since).unwrap_or(now);
        if !elapsed(now, since, self.settings.recovery_cooldown) {
            let remaining = (after(since, self.settings.recovery_cooldown) - now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            return Action::Requeue(remaining);
        }

        status.recovery_attempts += 1;
        status.message = None;
        events.push(AgentLifecycleEvent::RecoveryAttempted {
            agent: id.clone(),
            attempt: status.recovery_attempts,
            attempted_at: now,
        });
        transition(id, status, AgentPhase::Initializing, Some(REASON_RECOVERING), now, events);
        Action::Requeue(self.settings.heartbeat_timeout)
    }

    async fn is_orphaned(&self, agent: &Agent) -> Result<bool, ReconcileError> {
        let Some(owner) = &agent.metadata.owner else {
            return Ok(false);
        };
        let cluster_key = ObjectKey::new(agent.metadata.namespace.clone(), owner.name.clone());
        Ok(match self.clusters.get(&cluster_key).await? {
            Some(cluster) => cluster.meta().uid != owner.uid,
            None => true,
        })
    }

    fn enqueue_tasks(&self, subtasks: &[SubtaskRef]) {
        let Some(queue) = &self.task_queue else {
            return;
        };
        let tasks: BTreeSet<&ObjectKey> = subtasks.iter().map(|s| &s.task).collect();
        for task in tasks {
            queue.add(task.clone());
        }
    }

    /// Write status if it changed. Returns the stored object.
    async fn persist(
        &self,
        agent: &Agent,
        status: AgentStatus,
        events: Vec<AgentLifecycleEvent>,
    ) -> Result<Agent, ReconcileError> {
        if status == agent.status {
            return Ok(agent.clone());
        }
        let mut updated = agent.clone();
        updated.status = status;
        let stored = self.agents.update_status(&updated).await?;
        for event in events {
            if let AgentLifecycleEvent::PhaseChanged { agent, from, to, reason, .. } = &event {
                info!(
                    agent = %agent,
                    from = ?from,
                    to = ?to,
                    reason = ?reason,
                    "Agent phase transition"
                );
            }
            self.event_bus.publish_agent_event(event);
        }
        Ok(stored)
    }
}

#[async_trait]
impl Reconciler for AgentReconciler {
    fn name(&self) -> &'static str {
        "agent-lifecycle"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.reconcile_agent(key).await
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, ReconcileError> {
        Ok(self.agents.list(None).await?.iter().map(|a| a.metadata.key()).collect())
    }
}

fn transition(
    id: &AgentId,
    status: &mut AgentStatus,
    to: AgentPhase,
    reason: Option<&str>,
    now: DateTime<Utc>,
    events: &mut Vec<AgentLifecycleEvent>,
) {
    if status.phase == to {
        return;
    }
    events.push(AgentLifecycleEvent::PhaseChanged {
        agent: id.clone(),
        from: status.phase,
        to,
        reason: reason.map(str::to_string),
        changed_at: now,
    });
    status.phase = to;
    status.phase_since = Some(now);
    status.reason = reason.map(str::to_string);
}
