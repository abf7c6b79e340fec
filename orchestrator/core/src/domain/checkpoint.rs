// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Result Storage / Checkpoint Port
//!
//! Used exclusively for resuming failed tasks. A missing checkpoint means the
//! task resumes from the root of its DAG.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use crate::domain::meta::ObjectKey;

/// Persisted progress marker for a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub task: ObjectKey,
    /// Monotonic step number; equals the number of completed subtasks.
    pub step: u64,
    pub completed: BTreeSet<String>,
    #[serde(default)]
    pub results: BTreeMap<String, serde_json::Value>,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("Checkpoint backend unavailable: {0}")]
    Unavailable(String),
    #[error("Checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Checkpoint serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError>;

    /// Latest checkpoint for `task`, or `None` when nothing was ever saved.
    async fn load(&self, task: &ObjectKey) -> Result<Option<Checkpoint>, CheckpointError>;
}
