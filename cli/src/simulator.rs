// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Local agent simulator for `controller run --simulate`.
//!
//! Plays the part of the external agent runtime: every live agent heartbeats
//! each tick, and a running subtask completes once its estimated duration has
//! passed since dispatch.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use colony_core::domain::agent::Agent;
use colony_core::domain::clock::{after, Clock};
use colony_core::domain::meta::ObjectKey;
use colony_core::domain::runtime::{SubtaskOutcome, SubtaskReport};
use colony_core::domain::store::ObjectStore;
use colony_core::domain::task::{SubtaskPhase, Task};
use colony_core::infrastructure::runtime::InMemoryAgentRuntime;

pub struct LocalAgentSimulator {
    runtime: InMemoryAgentRuntime,
    agents: Arc<dyn ObjectStore<Agent>>,
    tasks: Arc<dyn ObjectStore<Task>>,
    clock: Arc<dyn Clock>,
    /// `(task, subtask, attempt)` already reported.
    reported: HashSet<(ObjectKey, String, u32)>,
}

impl LocalAgentSimulator {
    pub fn new(
        runtime: InMemoryAgentRuntime,
        agents: Arc<dyn ObjectStore<Agent>>,
        tasks: Arc<dyn ObjectStore<Task>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            runtime,
            agents,
            tasks,
            clock,
            reported: HashSet::new(),
        }
    }

    pub async fn run(mut self, tick: Duration, shutdown: CancellationToken) {
        info!(tick = ?tick, "Local agent simulator started");
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }
            if let Err(e) = self.step().await {
                warn!(error = %e, "Simulator step failed");
            }
        }
        info!("Local agent simulator stopped");
    }

    /// One tick: heartbeat every live agent and report finished subtasks.
    pub async fn step(&mut self) -> anyhow::Result<()> {
        let now = self.clock.now();

        for agent in self.agents.list(None).await? {
            if !agent.metadata.is_deleting() {
                self.runtime.heartbeat(&agent.metadata.key(), now);
            }
        }

        for task in self.tasks.list(None).await? {
            let key = task.metadata.key();
            for (name, status) in &task.status.subtasks {
                if status.phase != SubtaskPhase::Running {
                    continue;
                }
                let Some(agent) = status.assigned_agent.clone() else {
                    continue;
                };
                let marker = (key.clone(), name.clone(), status.attempt);
                if self.reported.contains(&marker) {
                    continue;
                }
                if !finished(&task, name, status.started_at, now) {
                    continue;
                }
                debug!(
                    task = %key,
                    subtask = %name,
                    agent = %agent,
                    "Simulated subtask completion"
                );
                self.runtime.report(SubtaskReport {
                    task: key.clone(),
                    subtask: name.clone(),
                    agent: agent.clone(),
                    attempt: status.attempt,
                    outcome: SubtaskOutcome::Completed {
                        result: Some(serde_json::json!({ "completedBy": agent.as_str() })),
                        artifact_available: true,
                    },
                    reported_at: now,
                });
                self.reported.insert(marker);
            }
        }
        Ok(())
    }
}

fn finished(
    task: &Task,
    subtask: &str,
    started_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> bool {
    let estimate = task
        .subtask_spec(subtask)
        .and_then(|s| s.estimated_duration)
        .unwrap_or(Duration::ZERO);
    match started_at {
        Some(start) => now >= after(start, estimate),
        None => true,
    }
}
