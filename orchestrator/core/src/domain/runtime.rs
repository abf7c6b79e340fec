// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Runtime Port
//!
//! What an agent *does* with a subtask is outside the control plane. The runtime
//! picks up assignments from agent status and reports back through its own
//! channel: heartbeats and per-subtask outcomes. The core treats both as input only.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::agent::AgentId;
use crate::domain::meta::ObjectKey;

/// Outcome of one execution attempt of a subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum SubtaskOutcome {
    #[serde(rename_all = "camelCase")]
    Completed {
        #[serde(default)]
        result: Option<serde_json::Value>,
        /// Whether the result artifact has been published for data dependencies.
        #[serde(default)]
        artifact_available: bool,
    },
    Failed {
        error: String,
    },
}

/// A report emitted by the agent runtime for one attempt of one subtask.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskReport {
    pub task: ObjectKey,
    pub subtask: String,
    pub agent: AgentId,
    /// Attempt number the report belongs to. Reports for other attempts are stale.
    pub attempt: u32,
    #[serde(flatten)]
    pub outcome: SubtaskOutcome,
    pub reported_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Agent runtime unavailable: {0}")]
    Unavailable(String),
    #[error("Malformed runtime report: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait AgentRuntime: Send + Sync {
    /// Most recent heartbeat received from the agent stored under `agent`, if any.
    async fn last_heartbeat(
        &self,
        agent: &ObjectKey,
    ) -> Result<Option<DateTime<Utc>>, RuntimeError>;

    /// All reports received for subtasks of `task`.
    async fn subtask_reports(&self, task: &ObjectKey) -> Result<Vec<SubtaskReport>, RuntimeError>;
}
