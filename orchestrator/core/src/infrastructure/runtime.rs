// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! In-process agent runtime channel.
//!
//! Stands in for the external runtime's status channel: whatever feeds it
//! (tests, a sidecar bridge, the CLI) records heartbeats and subtask reports, and
//! the reconcilers read them through the [`AgentRuntime`] port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::meta::ObjectKey;
use crate::domain::runtime::{AgentRuntime, RuntimeError, SubtaskReport};

#[derive(Clone, Default)]
pub struct InMemoryAgentRuntime {
    heartbeats: Arc<RwLock<HashMap<ObjectKey, DateTime<Utc>>>>,
    reports: Arc<RwLock<HashMap<ObjectKey, Vec<SubtaskReport>>>>,
}

impl InMemoryAgentRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a heartbeat. Older timestamps never overwrite newer ones.
    pub fn heartbeat(&self, agent: &ObjectKey, at: DateTime<Utc>) {
        let mut heartbeats = self.heartbeats.write();
        let entry = heartbeats.entry(agent.clone()).or_insert(at);
        if at > *entry {
            *entry = at;
        }
    }

    pub fn report(&self, report: SubtaskReport) {
        self.reports
            .write()
            .entry(report.task.clone())
            .or_default()
            .push(report);
    }
}

#[async_trait]
impl AgentRuntime for InMemoryAgentRuntime {
    async fn last_heartbeat(
        &self,
        agent: &ObjectKey,
    ) -> Result<Option<DateTime<Utc>>, RuntimeError> {
        Ok(self.heartbeats.read().get(agent).copied())
    }

    async fn subtask_reports(&self, task: &ObjectKey) -> Result<Vec<SubtaskReport>, RuntimeError> {
        Ok(self.reports.read().get(task).cloned().unwrap_or_default())
    }
}
