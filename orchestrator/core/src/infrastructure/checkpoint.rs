// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Checkpoint store adapters.
//!
//! - [`InMemoryCheckpointStore`]: process-local map, for tests and single-process runs.
//! - [`LocalCheckpointStore`]: one JSON document per task under a root directory,
//!   written to a temporary file and renamed so a crash never leaves a torn checkpoint.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::domain::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::domain::meta::ObjectKey;

#[derive(Clone, Default)]
pub struct InMemoryCheckpointStore {
    checkpoints: Arc<RwLock<HashMap<ObjectKey, Checkpoint>>>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self, task: &ObjectKey) -> Option<Checkpoint> {
        self.checkpoints.read().get(task).cloned()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        self.checkpoints
            .write()
            .insert(checkpoint.task.clone(), checkpoint.clone());
        Ok(())
    }

    async fn load(&self, task: &ObjectKey) -> Result<Option<Checkpoint>, CheckpointError> {
        Ok(self.checkpoints.read().get(task).cloned())
    }
}

pub struct LocalCheckpointStore {
    root: PathBuf,
}

impl LocalCheckpointStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, task: &ObjectKey) -> PathBuf {
        self.root
            .join(&task.namespace)
            .join(format!("{}.json", task.name))
    }
}

#[async_trait]
impl CheckpointStore for LocalCheckpointStore {
    async fn save(&self, checkpoint: &Checkpoint) -> Result<(), CheckpointError> {
        let path = self.path_for(&checkpoint.task);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let body = serde_json::to_vec_pretty(checkpoint)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(task = %checkpoint.task, step = checkpoint.step, path = ?path, "Checkpoint written");
        Ok(())
    }

    async fn load(&self, task: &ObjectKey) -> Result<Option<Checkpoint>, CheckpointError> {
        let path = self.path_for(task);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
