// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Scheduler
//!
//! Reconciler for `Task` objects. One pass:
//!
//! 1. Validate the dependency graph. An invalid graph fails the task with
//!    `InvalidDependencyGraph` before anything is assigned, and is never retried.
//! 2. Apply agent runtime reports for the current attempt of each running subtask.
//! 3. Treat running subtasks on missing, failed or terminating agents as failed
//!    attempts (`AgentLost`).
//! 4. Honour cancellation and the task timeout.
//! 5. Gate `Pending` subtasks on their dependencies (completion / data / conditional).
//! 6. Decide terminal outcome under the task's failure policy.
//! 7. Dispatch ready subtasks to the least-loaded qualifying agent.
//! 8. Checkpoint when the completed set grew, then write status once.
//!
//! Failed tasks with `resume: true` come back through [`TaskScheduler::resume`],
//! which restores completed subtasks from the last checkpoint.
//!
//! Capacity is enforced through the process-wide [`SlotLedger`]; if the status write
//! loses an optimistic-concurrency race the ledger is rolled back to the stored
//! status and the pass is retried.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::application::reconciler::{with_timeout, Action, Reconciler};
use crate::domain::agent::{Agent, AgentId, AgentPhase};
use crate::domain::checkpoint::{Checkpoint, CheckpointStore};
use crate::domain::clock::{after, Clock};
use crate::domain::config::ControllerConfigSpec;
use crate::domain::dag::TaskGraph;
use crate::domain::errors::ReconcileError;
use crate::domain::events::TaskEvent;
use crate::domain::meta::{set_condition, ConditionStatus, ObjectKey};
use crate::domain::runtime::{AgentRuntime, SubtaskOutcome, SubtaskReport};
use crate::domain::store::ObjectStore;
use crate::domain::task::{
    DependencyKind, ExecutionStrategy, FailurePolicy, RetryPolicy, SubtaskPhase, SubtaskRef,
    SubtaskSpec, SubtaskStatus, Task, TaskPhase, TaskStatus, REASON_AGENT_LOST,
    REASON_BRANCHES_FAILED, REASON_CANCELLED, REASON_INVALID_GRAPH, REASON_NO_CAPACITY,
    REASON_RETRY_EXHAUSTED, REASON_TASK_TIMEOUT, TASK_FINALIZER,
};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::slot_ledger::SlotLedger;
use crate::infrastructure::telemetry;

pub const CONDITION_VALIDATED: &str = "Validated";
pub const CONDITION_SCHEDULABLE: &str = "Schedulable";

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub resync_interval: Duration,
    pub external_call_timeout: Duration,
    pub max_resume_attempts: u32,
    pub default_failure_policy: FailurePolicy,
}

impl SchedulerSettings {
    pub fn from_config(spec: &ControllerConfigSpec) -> Self {
        Self {
            resync_interval: spec.controller.resync_interval,
            external_call_timeout: spec.controller.external_call_timeout,
            max_resume_attempts: spec.tasks.max_resume_attempts,
            default_failure_policy: spec.tasks.default_failure_policy,
        }
    }
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&ControllerConfigSpec::default())
    }
}

pub struct TaskScheduler {
    tasks: Arc<dyn ObjectStore<Task>>,
    agents: Arc<dyn ObjectStore<Agent>>,
    runtime: Arc<dyn AgentRuntime>,
    checkpoints: Arc<dyn CheckpointStore>,
    ledger: Arc<SlotLedger>,
    event_bus: EventBus,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
}

/// Dependency verdict for one pending subtask. Later variants dominate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Gate {
    Ready,
    Wait,
    Skip,
    Dead,
}

impl TaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tasks: Arc<dyn ObjectStore<Task>>,
        agents: Arc<dyn ObjectStore<Agent>>,
        runtime: Arc<dyn AgentRuntime>,
        checkpoints: Arc<dyn CheckpointStore>,
        ledger: Arc<SlotLedger>,
        event_bus: EventBus,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            tasks,
            agents,
            runtime,
            checkpoints,
            ledger,
            event_bus,
            clock,
            settings,
        }
    }

    pub fn ledger(&self) -> &Arc<SlotLedger> {
        &self.ledger
    }

    async fn reconcile_task(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        let Some(mut task) = self.tasks.get(key).await? else {
            self.ledger.release_task(key);
            return Ok(Action::AwaitChange);
        };

        if task.metadata.is_deleting() {
            self.ledger.release_task(key);
            if task.metadata.remove_finalizer(TASK_FINALIZER) {
                self.tasks.update(&task).await?;
                info!(task = %key, "Task slots released, finalizer removed");
            }
            return Ok(Action::AwaitChange);
        }

        if !task.metadata.has_finalizer(TASK_FINALIZER) {
            task.metadata.add_finalizer(TASK_FINALIZER);
            task = self.tasks.update(&task).await?;
        }

        let now = self.clock.now();
        let mut status = task.status.clone();
        let mut events = Vec::new();

        let graph = match TaskGraph::build(&task.spec) {
            Ok(graph) => graph,
            Err(e) => {
                let message = e.to_string();
                self.ledger.release_task(key);
                set_condition(
                    &mut status.conditions,
                    CONDITION_VALIDATED,
                    ConditionStatus::False,
                    REASON_INVALID_GRAPH,
                    &message,
                    now,
                );
                if !status.phase.is_terminal() {
                    transition(
                        key,
                        &mut status,
                        TaskPhase::Failed,
                        Some(REASON_INVALID_GRAPH),
                        Some(message.clone()),
                        now,
                        &mut events,
                    );
                    status.completion_time = Some(now);
                }
                self.persist(&task, status, events).await?;
                return Err(ReconcileError::Validation(message));
            }
        };
        set_condition(
            &mut status.conditions,
            CONDITION_VALIDATED,
            ConditionStatus::True,
            "Acyclic",
            "",
            now,
        );

        self.ledger.sync_task(&task);
        for name in graph.subtasks() {
            status.subtasks.entry(name.clone()).or_default();
        }
        status.subtasks.retain(|name, _| graph.subtasks().contains(name));

        let action = match status.phase {
            TaskPhase::Completed => {
                self.ledger.release_task(key);
                Action::AwaitChange
            }
            TaskPhase::Failed => self.resume(&task, &graph, &mut status, now, &mut events).await?,
            _ => self.drive(&task, &graph, &mut status, now, &mut events).await?,
        };

        summarize(&mut status);
        self.checkpoint_if_grown(key, &mut status, now, &mut events).await?;
        self.persist(&task, status, events).await?;
        Ok(action)
    }

    /// Non-terminal pass: reports, liveness, cancellation, timeout, gating, dispatch.
    async fn drive(
        &self,
        task: &Task,
        graph: &TaskGraph,
        status: &mut TaskStatus,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) -> Result<Action, ReconcileError> {
        let key = task.metadata.key();
        let policy = task.spec.failure_policy.unwrap_or(self.settings.default_failure_policy);
        let cancelled = status.phase == TaskPhase::Cancelled;
        status.start_time.get_or_insert(now);

        let wants_reports = status.subtasks.values().any(|s| {
            s.phase == SubtaskPhase::Running
                || (s.phase == SubtaskPhase::Completed && !s.artifact_available)
        });
        if wants_reports {
            let reports = with_timeout(
                self.settings.external_call_timeout,
                "runtime reports",
                self.runtime.subtask_reports(&key),
            )
            .await?;
            for report in reports {
                let retry = &task.spec.retry_policy;
                self.apply_report(&key, retry, !cancelled, status, report, now, events);
            }
        }

        let agents: BTreeMap<AgentId, Agent> = self
            .agents
            .list(Some(&key.namespace))
            .await?
            .into_iter()
            .map(|a| (a.id(), a))
            .collect();
        self.release_lost_agents(
            &key,
            &task.spec.retry_policy,
            !cancelled,
            &agents,
            status,
            now,
            events,
        );

        if task.spec.cancel && !cancelled {
            for st in status.subtasks.values_mut() {
                if matches!(st.phase, SubtaskPhase::Pending | SubtaskPhase::Queued) {
                    st.phase = SubtaskPhase::Cancelled;
                    st.finished_at = Some(now);
                }
            }
            transition(
                &key,
                status,
                TaskPhase::Cancelled,
                Some(REASON_CANCELLED),
                Some("cancelled by request".into()),
                now,
                events,
            );
            status.completion_time = Some(now);
        }
        if status.phase == TaskPhase::Cancelled {
            // Dispatched work keeps its slot until the runtime reports.
            return Ok(if any_running(status) {
                Action::Requeue(self.settings.resync_interval)
            } else {
                self.ledger.release_task(&key);
                Action::AwaitChange
            });
        }

        if let (Some(timeout), Some(start)) = (task.spec.timeout, status.start_time) {
            if now > after(start, timeout) {
                for (name, st) in status.subtasks.iter_mut() {
                    match st.phase {
                        SubtaskPhase::Running => {
                            if let Some(agent) = &st.assigned_agent {
                                let subtask = SubtaskRef::new(key.clone(), name.clone());
                                self.ledger.release(agent, &subtask);
                            }
                            st.phase = SubtaskPhase::Failed;
                            st.last_error = Some(REASON_TASK_TIMEOUT.to_string());
                            st.finished_at = Some(now);
                        }
                        SubtaskPhase::Pending | SubtaskPhase::Queued => {
                            st.phase = SubtaskPhase::Cancelled;
                            st.finished_at = Some(now);
                        }
                        _ => {}
                    }
                }
                let message = format!("task exceeded its timeout of {}s", timeout.as_secs());
                transition(
                    &key,
                    status,
                    TaskPhase::Failed,
                    Some(REASON_TASK_TIMEOUT),
                    Some(message),
                    now,
                    events,
                );
                status.completion_time = Some(now);
                self.ledger.release_task(&key);
                return Ok(Action::AwaitChange);
            }
        }

        gate(graph, status, policy, now);

        if let Some(action) = self.settle(task, status, policy, now, events) {
            return Ok(action);
        }

        let blocked = self.dispatch(task, &agents, status, now, events);

        let unschedulable = blocked
            .as_ref()
            .map(|name| format!("subtask '{name}' has no qualifying agent"));
        if any_running(status) {
            transition(&key, status, TaskPhase::Running, None, None, now, events);
        } else {
            let reason = unschedulable.as_ref().map(|_| REASON_NO_CAPACITY);
            let message = unschedulable.clone();
            transition(&key, status, TaskPhase::Scheduled, reason, message, now, events);
        }
        match &unschedulable {
            Some(message) => set_condition(
                &mut status.conditions,
                CONDITION_SCHEDULABLE,
                ConditionStatus::False,
                REASON_NO_CAPACITY,
                message,
                now,
            ),
            None => set_condition(
                &mut status.conditions,
                CONDITION_SCHEDULABLE,
                ConditionStatus::True,
                "AgentsAvailable",
                "",
                now,
            ),
        };
        if let Some(name) = &blocked {
            debug!(task = %key, subtask = %name, "No qualifying agent, holding task at Scheduled");
        }

        Ok(self.next_wake(task, status, blocked.is_some(), now))
    }

    /// Terminal outcome under `policy`. Returns `Some` when the task is finished.
    fn settle(
        &self,
        task: &Task,
        status: &mut TaskStatus,
        policy: FailurePolicy,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) -> Option<Action> {
        let key = task.metadata.key();
        let failed: Vec<(String, Option<String>)> = status
            .subtasks
            .iter()
            .filter(|(_, s)| s.phase == SubtaskPhase::Failed)
            .map(|(n, s)| (n.clone(), s.last_error.clone()))
            .collect();
        let all_terminal = status.subtasks.values().all(|s| s.phase.is_terminal());

        let (reason, message) = if let Some((name, error)) = failed.first() {
            match policy {
                FailurePolicy::FailFast => {
                    for (sibling, st) in status.subtasks.iter_mut() {
                        if st.phase == SubtaskPhase::Running {
                            if let Some(agent) = &st.assigned_agent {
                                let subtask = SubtaskRef::new(key.clone(), sibling.clone());
                                self.ledger.release(agent, &subtask);
                            }
                        }
                        if !st.phase.is_terminal() {
                            st.phase = SubtaskPhase::Cancelled;
                            st.finished_at = Some(now);
                        }
                    }
                    let error = error.clone().unwrap_or_default();
                    let reason = if error == REASON_AGENT_LOST {
                        REASON_AGENT_LOST
                    } else {
                        REASON_RETRY_EXHAUSTED
                    };
                    (reason, format!("subtask '{name}' failed: {error}"))
                }
                FailurePolicy::ContinueIndependent => {
                    if !all_terminal {
                        return None;
                    }
                    let names: Vec<&str> = failed.iter().map(|(n, _)| n.as_str()).collect();
                    (
                        REASON_BRANCHES_FAILED,
                        format!("{} subtask(s) failed: {}", names.len(), names.join(", ")),
                    )
                }
            }
        } else if all_terminal {
            transition(&key, status, TaskPhase::Completed, None, None, now, events);
            status.completion_time = Some(now);
            self.ledger.release_task(&key);
            return Some(Action::AwaitChange);
        } else {
            return None;
        };

        transition(&key, status, TaskPhase::Failed, Some(reason), Some(message), now, events);
        status.completion_time = Some(now);
        self.ledger.release_task(&key);
        if task.spec.resume && is_resumable(Some(reason)) {
            Some(Action::Requeue(Duration::ZERO))
        } else {
            Some(Action::AwaitChange)
        }
    }

    /// `Failed + resume` → `Resuming`: keep completed work, reset the rest.
    async fn resume(
        &self,
        task: &Task,
        graph: &TaskGraph,
        status: &mut TaskStatus,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) -> Result<Action, ReconcileError> {
        let key = task.metadata.key();
        self.ledger.release_task(&key);
        if !task.spec.resume || !is_resumable(status.reason.as_deref()) {
            return Ok(Action::AwaitChange);
        }
        if status.resume_attempts >= self.settings.max_resume_attempts {
            set_condition(
                &mut status.conditions,
                "Resumable",
                ConditionStatus::False,
                "ResumeExhausted",
                &format!("gave up after {} resume attempts", status.resume_attempts),
                now,
            );
            return Ok(Action::AwaitChange);
        }

        let checkpoint = with_timeout(
            self.settings.external_call_timeout,
            "checkpoint load",
            self.checkpoints.load(&key),
        )
        .await?;

        let mut keep: BTreeSet<String> = status
            .subtasks
            .iter()
            .filter(|(_, s)| s.phase == SubtaskPhase::Completed)
            .map(|(n, _)| n.clone())
            .collect();
        let mut restored = BTreeMap::new();
        if let Some(cp) = &checkpoint {
            for name in &cp.completed {
                if graph.subtasks().contains(name) {
                    keep.insert(name.clone());
                }
            }
            restored = cp.results.clone();
        }

        for (name, st) in status.subtasks.iter_mut() {
            if keep.contains(name) {
                if st.phase != SubtaskPhase::Completed {
                    st.phase = SubtaskPhase::Completed;
                    st.result = restored.get(name).cloned();
                    st.artifact_available = true;
                    st.last_error = None;
                }
            } else {
                *st = SubtaskStatus {
                    attempt: st.attempt,
                    ..SubtaskStatus::default()
                };
            }
        }

        status.resume_attempts += 1;
        status.start_time = None;
        status.completion_time = None;
        let from_step = checkpoint.as_ref().map(|c| c.step);
        let message = match from_step {
            Some(step) => format!("resuming from checkpoint step {step}"),
            None => "no checkpoint found, resuming from the root".to_string(),
        };
        events.push(TaskEvent::Resumed {
            task: key.clone(),
            from_step,
            attempt: status.resume_attempts,
            resumed_at: now,
        });
        transition(&key, status, TaskPhase::Resuming, None, Some(message), now, events);
        Ok(Action::Requeue(Duration::ZERO))
    }

    #[allow(clippy::too_many_arguments)]
    fn apply_report(
        &self,
        key: &ObjectKey,
        retry: &RetryPolicy,
        allow_retry: bool,
        status: &mut TaskStatus,
        report: SubtaskReport,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) {
        let Some(st) = status.subtasks.get_mut(&report.subtask) else {
            return;
        };
        if st.assigned_agent.as_ref() != Some(&report.agent) || st.attempt != report.attempt {
            return;
        }
        let subtask = SubtaskRef::new(key.clone(), report.subtask.clone());
        match (st.phase, report.outcome) {
            (SubtaskPhase::Running, SubtaskOutcome::Completed { result, artifact_available }) => {
                self.ledger.release(&report.agent, &subtask);
                st.phase = SubtaskPhase::Completed;
                st.result = result;
                st.artifact_available = artifact_available;
                st.finished_at = Some(report.reported_at);
                st.last_error = None;
                events.push(TaskEvent::SubtaskCompleted {
                    subtask,
                    agent: report.agent,
                    completed_at: report.reported_at,
                });
            }
            (SubtaskPhase::Running, SubtaskOutcome::Failed { error }) => {
                self.ledger.release(&report.agent, &subtask);
                fail_attempt(st, subtask, retry, allow_retry, error, now, events);
            }
            (
                SubtaskPhase::Completed,
                SubtaskOutcome::Completed {
                    artifact_available: true,
                    ..
                },
            ) => {
                st.artifact_available = true;
            }
            _ => {}
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn release_lost_agents(
        &self,
        key: &ObjectKey,
        retry: &RetryPolicy,
        allow_retry: bool,
        agents: &BTreeMap<AgentId, Agent>,
        status: &mut TaskStatus,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) {
        for (name, st) in status.subtasks.iter_mut() {
            if st.phase != SubtaskPhase::Running {
                continue;
            }
            let Some(agent_id) = st.assigned_agent.clone() else {
                continue;
            };
            let alive = agents
                .get(&agent_id)
                .map(|a| {
                    !a.metadata.is_deleting()
                        && !matches!(a.status.phase, AgentPhase::Failed | AgentPhase::Terminating)
                })
                .unwrap_or(false);
            if alive {
                continue;
            }
            let subtask = SubtaskRef::new(key.clone(), name.clone());
            warn!(subtask = %subtask, agent = %agent_id, "Owning agent lost, releasing subtask");
            self.ledger.release(&agent_id, &subtask);
            let error = REASON_AGENT_LOST.to_string();
            fail_attempt(st, subtask, retry, allow_retry, error, now, events);
        }
    }

    /// Assign queued subtasks. Returns the first subtask that found no agent.
    fn dispatch(
        &self,
        task: &Task,
        agents: &BTreeMap<AgentId, Agent>,
        status: &mut TaskStatus,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) -> Option<String> {
        let key = task.metadata.key();
        let mut candidates: Vec<&SubtaskSpec> = task
            .spec
            .subtasks
            .iter()
            .filter(|s| {
                status
                    .subtasks
                    .get(&s.name)
                    .map(|st| {
                        st.phase == SubtaskPhase::Queued
                            && st.not_before.map_or(true, |nb| nb <= now)
                    })
                    .unwrap_or(false)
            })
            .collect();

        match task.spec.strategy {
            ExecutionStrategy::Parallel => {}
            ExecutionStrategy::Sequential => {
                if any_running(status) {
                    candidates.clear();
                } else {
                    candidates.truncate(1);
                }
            }
            ExecutionStrategy::Adaptive => {
                candidates.sort_by(|a, b| b.estimated_duration.cmp(&a.estimated_duration));
            }
        }

        let mut blocked = None;
        for spec in candidates {
            let subtask = SubtaskRef::new(key.clone(), spec.name.clone());
            let Some(agent) = self.pick_agent(spec, agents, &subtask) else {
                blocked.get_or_insert_with(|| spec.name.clone());
                continue;
            };
            if let Some(st) = status.subtasks.get_mut(&spec.name) {
                st.phase = SubtaskPhase::Running;
                st.assigned_agent = Some(agent.clone());
                st.attempt += 1;
                st.started_at = Some(now);
                st.not_before = None;
                st.finished_at = None;
                events.push(TaskEvent::SubtaskAssigned {
                    subtask,
                    agent,
                    attempt: st.attempt,
                    assigned_at: now,
                });
            }
        }
        blocked
    }

    /// Least-loaded qualifying agent, ties broken by agent id. Reserves its slot.
    fn pick_agent(
        &self,
        spec: &SubtaskSpec,
        agents: &BTreeMap<AgentId, Agent>,
        subtask: &SubtaskRef,
    ) -> Option<AgentId> {
        let mut qualifying: Vec<(&Agent, usize)> = agents
            .values()
            .filter(|a| a.status.phase.is_schedulable() && !a.metadata.is_deleting())
            .filter(|a| a.has_capabilities(&spec.required_capabilities))
            .filter(|a| {
                spec.preferred_agent_types.is_empty()
                    || spec.preferred_agent_types.contains(&a.spec.agent_type)
            })
            .map(|a| (a, self.ledger.load(&a.metadata.key())))
            .filter(|(a, load)| *load < a.spec.max_concurrent_tasks as usize)
            .collect();

        // load_a / max_a < load_b / max_b  ⇔  load_a × max_b < load_b × max_a
        qualifying.sort_by(|(a, load_a), (b, load_b)| {
            let lhs = *load_a as u64 * b.spec.max_concurrent_tasks as u64;
            let rhs = *load_b as u64 * a.spec.max_concurrent_tasks as u64;
            lhs.cmp(&rhs).then_with(|| a.metadata.name.cmp(&b.metadata.name))
        });

        qualifying.into_iter().find_map(|(agent, _)| {
            let id = agent.id();
            self.ledger
                .try_reserve(&id, subtask.clone(), agent.spec.max_concurrent_tasks)
                .then_some(id)
        })
    }

    fn next_wake(
        &self,
        task: &Task,
        status: &TaskStatus,
        blocked: bool,
        now: DateTime<Utc>,
    ) -> Action {
        let mut action = Action::AwaitChange;
        if blocked || any_running(status) {
            action = action.sooner(Action::Requeue(self.settings.resync_interval));
        }
        for st in status.subtasks.values() {
            if let (SubtaskPhase::Queued, Some(nb)) = (st.phase, st.not_before) {
                action = action.sooner(Action::Requeue(until(now, nb)));
            }
        }
        if let (Some(timeout), Some(start)) = (task.spec.timeout, status.start_time) {
            let deadline = after(start, timeout);
            let wake = until(now, deadline) + Duration::from_millis(1);
            action = action.sooner(Action::Requeue(wake));
        }
        action
    }

    async fn checkpoint_if_grown(
        &self,
        key: &ObjectKey,
        status: &mut TaskStatus,
        now: DateTime<Utc>,
        events: &mut Vec<TaskEvent>,
    ) -> Result<(), ReconcileError> {
        let completed: BTreeSet<String> = status
            .subtasks
            .iter()
            .filter(|(_, s)| s.phase == SubtaskPhase::Completed)
            .map(|(n, _)| n.clone())
            .collect();
        let step = completed.len() as u64;
        if step == 0 || step <= status.checkpoint_step.unwrap_or(0) {
            return Ok(());
        }
        let results = status
            .subtasks
            .iter()
            .filter(|(n, _)| completed.contains(*n))
            .filter_map(|(n, s)| s.result.clone().map(|r| (n.clone(), r)))
            .collect();
        let checkpoint = Checkpoint {
            task: key.clone(),
            step,
            completed,
            results,
            saved_at: now,
        };
        with_timeout(
            self.settings.external_call_timeout,
            "checkpoint save",
            self.checkpoints.save(&checkpoint),
        )
        .await?;
        status.checkpoint_step = Some(step);
        events.push(TaskEvent::CheckpointSaved { task: key.clone(), step });
        Ok(())
    }

    /// Write status if it changed, then publish. A failed write rolls the ledger back.
    async fn persist(
        &self,
        task: &Task,
        status: TaskStatus,
        events: Vec<TaskEvent>,
    ) -> Result<(), ReconcileError> {
        if status == task.status {
            return Ok(());
        }
        let mut updated = task.clone();
        updated.status = status;
        if let Err(e) = self.tasks.update_status(&updated).await {
            self.ledger.sync_task(task);
            return Err(e.into());
        }
        for event in events {
            match &event {
                TaskEvent::PhaseChanged { task, from, to, reason, .. } => {
                    info!(
                        task = %task,
                        from = ?from,
                        to = ?to,
                        reason = ?reason,
                        "Task phase transition"
                    );
                }
                TaskEvent::SubtaskAssigned { subtask, agent, attempt, .. } => {
                    info!(subtask = %subtask, agent = %agent, attempt, "Subtask assigned");
                }
                TaskEvent::SubtaskRetryScheduled { subtask, retry_count, delay_secs, error } => {
                    telemetry::record_subtask_retry();
                    info!(
                        subtask = %subtask,
                        retry_count,
                        delay_secs,
                        error = %error,
                        "Subtask retry scheduled"
                    );
                }
                TaskEvent::SubtaskFailed { subtask, error, .. } => {
                    warn!(subtask = %subtask, error = %error, "Subtask failed terminally");
                }
                _ => debug!(event = ?event, "Task event"),
            }
            self.event_bus.publish_task_event(event);
        }
        Ok(())
    }
}

#[async_trait]
impl Reconciler for TaskScheduler {
    fn name(&self) -> &'static str {
        "task-scheduler"
    }

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError> {
        self.reconcile_task(key).await
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, ReconcileError> {
        Ok(self.tasks.list(None).await?.iter().map(|t| t.metadata.key()).collect())
    }
}

fn transition(
    key: &ObjectKey,
    status: &mut TaskStatus,
    to: TaskPhase,
    reason: Option<&str>,
    message: Option<String>,
    now: DateTime<Utc>,
    events: &mut Vec<TaskEvent>,
) {
    if status.phase != to {
        events.push(TaskEvent::PhaseChanged {
            task: key.clone(),
            from: status.phase,
            to,
            reason: reason.map(str::to_string),
            changed_at: now,
        });
        status.phase = to;
    }
    status.reason = reason.map(str::to_string);
    status.message = message;
}

/// Record a failed attempt: requeue with backoff while retries remain, else fail.
fn fail_attempt(
    st: &mut SubtaskStatus,
    subtask: SubtaskRef,
    retry: &RetryPolicy,
    allow_retry: bool,
    error: String,
    now: DateTime<Utc>,
    events: &mut Vec<TaskEvent>,
) {
    st.last_error = Some(error.clone());
    if allow_retry && st.retry_count < retry.max_retries {
        let delay = retry.delay_for(st.retry_count);
        st.retry_count += 1;
        st.phase = SubtaskPhase::Queued;
        st.assigned_agent = None;
        st.started_at = None;
        st.not_before = Some(after(now, delay));
        events.push(TaskEvent::SubtaskRetryScheduled {
            subtask,
            retry_count: st.retry_count,
            delay_secs: delay.as_secs_f64(),
            error,
        });
    } else {
        st.phase = SubtaskPhase::Failed;
        st.finished_at = Some(now);
        events.push(TaskEvent::SubtaskFailed {
            subtask,
            error,
            failed_at: now,
        });
    }
}

/// Move `Pending` subtasks to `Queued` or `Skipped` until nothing changes.
fn gate(graph: &TaskGraph, status: &mut TaskStatus, policy: FailurePolicy, now: DateTime<Utc>) {
    loop {
        let mut changed = false;
        for name in graph.subtasks() {
            if status.subtasks.get(name).map(|s| s.phase) != Some(SubtaskPhase::Pending) {
                continue;
            }
            let verdict = graph
                .upstream(name)
                .iter()
                .map(|dep| {
                    let Some(up) = status.subtasks.get(&dep.from) else {
                        return Gate::Wait;
                    };
                    match up.phase {
                        SubtaskPhase::Failed | SubtaskPhase::Cancelled => Gate::Dead,
                        SubtaskPhase::Skipped => Gate::Skip,
                        SubtaskPhase::Completed => match dep.kind {
                            DependencyKind::Completion => Gate::Ready,
                            DependencyKind::Data if up.artifact_available => Gate::Ready,
                            DependencyKind::Data => Gate::Wait,
                            DependencyKind::Conditional => match &dep.condition {
                                Some(c) if !c.evaluate(up.result.as_ref()) => Gate::Skip,
                                _ => Gate::Ready,
                            },
                        },
                        _ => Gate::Wait,
                    }
                })
                .max()
                .unwrap_or(Gate::Ready);

            let next = match verdict {
                Gate::Ready => Some((SubtaskPhase::Queued, None)),
                Gate::Skip => Some((SubtaskPhase::Skipped, Some("condition not met"))),
                Gate::Dead if policy == FailurePolicy::ContinueIndependent => {
                    Some((SubtaskPhase::Skipped, Some("upstream failed")))
                }
                _ => None,
            };
            if let (Some((phase, note)), Some(st)) = (next, status.subtasks.get_mut(name)) {
                st.phase = phase;
                if phase == SubtaskPhase::Skipped {
                    st.finished_at = Some(now);
                    st.last_error = note.map(str::to_string);
                }
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }
}

fn summarize(status: &mut TaskStatus) {
    let total = status.subtasks.len();
    let completed = status
        .subtasks
        .values()
        .filter(|s| s.phase == SubtaskPhase::Completed)
        .count();
    status.progress = if total == 0 { 100 } else { (completed * 100 / total) as u8 };
    let agents: BTreeSet<AgentId> = status
        .subtasks
        .values()
        .filter(|s| s.phase == SubtaskPhase::Running)
        .filter_map(|s| s.assigned_agent.clone())
        .collect();
    status.assigned_agents = agents.into_iter().collect();
}

fn any_running(status: &TaskStatus) -> bool {
    status.subtasks.values().any(|s| s.phase == SubtaskPhase::Running)
}

fn is_resumable(reason: Option<&str>) -> bool {
    matches!(
        reason,
        Some(REASON_RETRY_EXHAUSTED) | Some(REASON_BRANCHES_FAILED) | Some(REASON_AGENT_LOST)
    )
}

fn until(now: DateTime<Utc>, then: DateTime<Utc>) -> Duration {
    (then - now).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::task::{Dependency, TaskSpec};

    fn spec_with(edges: &[(&str, &str, DependencyKind)]) -> TaskSpec {
        let mut spec: TaskSpec = serde_yaml::from_str(
            "subtasks:\n  - name: a\n  - name: b\n  - name: c\n",
        )
        .unwrap();
        spec.dependencies = edges
            .iter()
            .map(|(f, t, k)| Dependency {
                from: f.to_string(),
                to: t.to_string(),
                kind: *k,
                condition: None,
            })
            .collect();
        spec
    }

    fn status_for(spec: &TaskSpec) -> TaskStatus {
        let mut status = TaskStatus::default();
        for s in &spec.subtasks {
            status.subtasks.insert(s.name.clone(), SubtaskStatus::default());
        }
        status
    }

    #[test]
    fn test_gate_waits_for_completion() {
        let spec = spec_with(&[("a", "b", DependencyKind::Completion)]);
        let graph = TaskGraph::build(&spec).unwrap();
        let mut status = status_for(&spec);
        gate(&graph, &mut status, FailurePolicy::FailFast, Utc::now());
        assert_eq!(status.subtasks["a"].phase, SubtaskPhase::Queued);
        assert_eq!(status.subtasks["b"].phase, SubtaskPhase::Pending);
        assert_eq!(status.subtasks["c"].phase, SubtaskPhase::Queued);

        status.subtasks.get_mut("a").unwrap().phase = SubtaskPhase::Completed;
        gate(&graph, &mut status, FailurePolicy::FailFast, Utc::now());
        assert_eq!(status.subtasks["b"].phase, SubtaskPhase::Queued);
    }

    #[test]
    fn test_gate_data_dependency_needs_artifact() {
        let spec = spec_with(&[("a", "b", DependencyKind::Data)]);
        let graph = TaskGraph::build(&spec).unwrap();
        let mut status = status_for(&spec);
        status.subtasks.get_mut("a").unwrap().phase = SubtaskPhase::Completed;
        gate(&graph, &mut status, FailurePolicy::FailFast, Utc::now());
        assert_eq!(status.subtasks["b"].phase, SubtaskPhase::Pending);

        status.subtasks.get_mut("a").unwrap().artifact_available = true;
        gate(&graph, &mut status, FailurePolicy::FailFast, Utc::now());
        assert_eq!(status.subtasks["b"].phase, SubtaskPhase::Queued);
    }

    #[test]
    fn test_gate_skips_descendants_of_failed_branch_only_when_continuing() {
        let spec = spec_with(&[
            ("a", "b", DependencyKind::Completion),
            ("b", "c", DependencyKind::Completion),
        ]);
        let graph = TaskGraph::build(&spec).unwrap();

        let mut status = status_for(&spec);
        status.subtasks.get_mut("a").unwrap().phase = SubtaskPhase::Failed;
        gate(&graph, &mut status, FailurePolicy::FailFast, Utc::now());
        assert_eq!(status.subtasks["b"].phase, SubtaskPhase::Pending);

        gate(&graph, &mut status, FailurePolicy::ContinueIndependent, Utc::now());
        assert_eq!(status.subtasks["b"].phase, SubtaskPhase::Skipped);
        assert_eq!(status.subtasks["c"].phase, SubtaskPhase::Skipped);
    }

    #[test]
    fn test_fail_attempt_backoff_sequence() {
        let retry = RetryPolicy::default();
        let now = Utc::now();
        let subtask = SubtaskRef::new(ObjectKey::new("default", "t"), "a");
        let mut st = SubtaskStatus::default();
        let mut events = Vec::new();

        let mut delays = Vec::new();
        for _ in 0..3 {
            st.phase = SubtaskPhase::Running;
            fail_attempt(&mut st, subtask.clone(), &retry, true, "boom".into(), now, &mut events);
            assert_eq!(st.phase, SubtaskPhase::Queued);
            delays.push((st.not_before.unwrap() - now).num_seconds());
        }
        assert_eq!(delays, vec![60, 120, 240]);

        st.phase = SubtaskPhase::Running;
        fail_attempt(&mut st, subtask, &retry, true, "boom".into(), now, &mut events);
        assert_eq!(st.phase, SubtaskPhase::Failed);
    }

    #[test]
    fn test_summarize_progress_and_agents() {
        let spec = spec_with(&[]);
        let mut status = status_for(&spec);
        status.subtasks.get_mut("a").unwrap().phase = SubtaskPhase::Completed;
        let b = status.subtasks.get_mut("b").unwrap();
        b.phase = SubtaskPhase::Running;
        b.assigned_agent = Some(AgentId::new("z-agent-1"));
        let c = status.subtasks.get_mut("c").unwrap();
        c.phase = SubtaskPhase::Running;
        c.assigned_agent = Some(AgentId::new("a-agent-0"));
        summarize(&mut status);
        assert_eq!(status.progress, 33);
        assert_eq!(
            status.assigned_agents,
            vec![AgentId::new("a-agent-0"), AgentId::new("z-agent-1")]
        );
    }
}
