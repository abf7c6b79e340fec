// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, AgentPhase, AgentType};
use crate::domain::cluster::{ClusterPhase, Topology};
use crate::domain::meta::ObjectKey;
use crate::domain::task::{SubtaskRef, TaskPhase};

/// Cluster-level events: phase changes, scaling decisions, owned agent churn.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClusterEvent {
    PhaseChanged {
        cluster: ObjectKey,
        from: ClusterPhase,
        to: ClusterPhase,
        changed_at: DateTime<Utc>,
    },
    Scaled {
        cluster: ObjectKey,
        from_total: u32,
        to_total: u32,
        scale_factor: f64,
        scaled_at: DateTime<Utc>,
    },
    ScaleDownSuppressed {
        cluster: ObjectKey,
        desired_total: u32,
        current_total: u32,
        window_remaining_secs: u64,
    },
    AgentCreated {
        cluster: ObjectKey,
        agent: AgentId,
        agent_type: AgentType,
        created_at: DateTime<Utc>,
    },
    AgentRemoved {
        cluster: ObjectKey,
        agent: AgentId,
        removed_at: DateTime<Utc>,
    },
    PeersRecomputed {
        cluster: ObjectKey,
        topology: Topology,
        agents_updated: usize,
        recomputed_at: DateTime<Utc>,
    },
    ValidationFailed {
        cluster: ObjectKey,
        message: String,
        failed_at: DateTime<Utc>,
    },
}

/// Agent state-machine events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AgentLifecycleEvent {
    PhaseChanged {
        agent: AgentId,
        from: AgentPhase,
        to: AgentPhase,
        reason: Option<String>,
        changed_at: DateTime<Utc>,
    },
    /// Heartbeat timeout. `released` are the subtasks returned to the scheduler.
    AgentFailed {
        agent: AgentId,
        last_seen: Option<DateTime<Utc>>,
        released: Vec<SubtaskRef>,
        failed_at: DateTime<Utc>,
    },
    RecoveryAttempted {
        agent: AgentId,
        attempt: u32,
        attempted_at: DateTime<Utc>,
    },
    RecoveryExhausted {
        agent: AgentId,
        attempts: u32,
    },
}

/// Scheduler events for tasks and their subtasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskEvent {
    PhaseChanged {
        task: ObjectKey,
        from: TaskPhase,
        to: TaskPhase,
        reason: Option<String>,
        changed_at: DateTime<Utc>,
    },
    SubtaskAssigned {
        subtask: SubtaskRef,
        agent: AgentId,
        attempt: u32,
        assigned_at: DateTime<Utc>,
    },
    SubtaskCompleted {
        subtask: SubtaskRef,
        agent: AgentId,
        completed_at: DateTime<Utc>,
    },
    SubtaskRetryScheduled {
        subtask: SubtaskRef,
        retry_count: u32,
        delay_secs: f64,
        error: String,
    },
    SubtaskFailed {
        subtask: SubtaskRef,
        error: String,
        failed_at: DateTime<Utc>,
    },
    CheckpointSaved {
        task: ObjectKey,
        step: u64,
    },
    Resumed {
        task: ObjectKey,
        from_step: Option<u64>,
        attempt: u32,
        resumed_at: DateTime<Utc>,
    },
}
