// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Agent Aggregate
//!
//! An `Agent` is one typed worker inside a cluster. Agents are created and destroyed
//! exclusively by the cluster reconciler; their status is written exclusively by the
//! agent lifecycle reconciler.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending ──▶ Initializing ──▶ Ready ◀──▶ Busy
//!                 ▲               │         │
//!                 │               ▼         ▼
//!                 └── (cool-down) Failed ◀──┘
//!  any ──(deletion)──▶ Terminating
//! ```
//!
//! # Invariants
//!
//! - `status.assigned_subtasks.len() <= spec.max_concurrent_tasks`
//! - An agent is owned by exactly one cluster (`meta.owner`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::domain::meta::{Condition, ObjectMeta, Resource};
use crate::domain::secrets::SecretReference;
use crate::domain::task::SubtaskRef;

/// Finalizer guarding agent removal until its assignments are released.
pub const AGENT_FINALIZER: &str = "colony.dev/agent-cleanup";

/// Label carrying the owning cluster name.
pub const CLUSTER_LABEL: &str = "colony.dev/cluster";

/// Label carrying the agent type.
pub const AGENT_TYPE_LABEL: &str = "colony.dev/agent-type";

/// Agent identifier. Equal to the agent object's name, which makes ordering stable
/// and deterministic across reconciles.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Deterministic name for the agent at `index` inside `cluster`.
    pub fn for_index(cluster: &str, index: u32) -> Self {
        Self(format!("{cluster}-agent-{index}"))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Role an agent plays within the cluster.
///
/// Declaration order is the scheduling priority: when the autoscaler has a
/// remainder to hand out, it walks this list top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentType {
    Coordinator,
    Architect,
    Researcher,
    Coder,
    Analyst,
    Tester,
    Reviewer,
    Optimizer,
    Documenter,
    Monitor,
    Specialist,
}

impl AgentType {
    /// All agent types, highest priority first.
    pub const ALL: [AgentType; 11] = [
        AgentType::Coordinator,
        AgentType::Architect,
        AgentType::Researcher,
        AgentType::Coder,
        AgentType::Analyst,
        AgentType::Tester,
        AgentType::Reviewer,
        AgentType::Optimizer,
        AgentType::Documenter,
        AgentType::Monitor,
        AgentType::Specialist,
    ];

    /// Lower value means higher priority.
    pub fn priority(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).unwrap_or(usize::MAX)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentType::Coordinator => "coordinator",
            AgentType::Architect => "architect",
            AgentType::Researcher => "researcher",
            AgentType::Coder => "coder",
            AgentType::Analyst => "analyst",
            AgentType::Tester => "tester",
            AgentType::Reviewer => "reviewer",
            AgentType::Optimizer => "optimizer",
            AgentType::Documenter => "documenter",
            AgentType::Monitor => "monitor",
            AgentType::Specialist => "specialist",
        }
    }

    /// Capabilities every agent of this type advertises in addition to the
    /// cluster template's capabilities.
    pub fn default_capabilities(self) -> &'static [&'static str] {
        match self {
            AgentType::Coordinator => &["coordination", "planning"],
            AgentType::Architect => &["design", "planning"],
            AgentType::Researcher => &["research", "analysis"],
            AgentType::Coder => &["coding", "implementation"],
            AgentType::Analyst => &["analysis", "reporting"],
            AgentType::Tester => &["testing", "validation"],
            AgentType::Reviewer => &["review", "validation"],
            AgentType::Optimizer => &["optimization", "profiling"],
            AgentType::Documenter => &["documentation"],
            AgentType::Monitor => &["monitoring"],
            AgentType::Specialist => &[],
        }
    }

    pub fn is_coordinator(self) -> bool {
        matches!(self, AgentType::Coordinator)
    }
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AgentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AgentType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown agent type '{s}'"))
    }
}

/// Behavioural pattern hint passed through to the agent runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CognitivePattern {
    #[default]
    Convergent,
    Divergent,
    Lateral,
    Systems,
    Critical,
    Abstract,
}

impl CognitivePattern {
    /// Pattern an agent type gets when the cluster template does not pick one.
    pub fn for_type(agent_type: AgentType) -> Self {
        match agent_type {
            AgentType::Coordinator | AgentType::Architect => CognitivePattern::Systems,
            AgentType::Researcher => CognitivePattern::Divergent,
            AgentType::Tester | AgentType::Reviewer => CognitivePattern::Critical,
            AgentType::Optimizer => CognitivePattern::Lateral,
            AgentType::Analyst => CognitivePattern::Abstract,
            _ => CognitivePattern::Convergent,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AgentPhase {
    #[default]
    Pending,
    Initializing,
    Ready,
    Busy,
    Terminating,
    Failed,
}

impl AgentPhase {
    /// Phases in which heartbeats are expected.
    pub fn is_active(self) -> bool {
        matches!(self, AgentPhase::Initializing | AgentPhase::Ready | AgentPhase::Busy)
    }

    /// Phases in which the scheduler may hand out work.
    pub fn is_schedulable(self) -> bool {
        matches!(self, AgentPhase::Ready | AgentPhase::Busy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentSpec {
    #[serde(rename = "type")]
    pub agent_type: AgentType,

    #[serde(default)]
    pub cognitive_pattern: CognitivePattern,

    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    #[serde(default = "default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,

    /// Name index inside the owning cluster (`<cluster>-agent-<index>`).
    #[serde(default)]
    pub index: u32,

    /// Peer list computed by the topology manager. `None` until first computed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub peers: Option<Vec<AgentId>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretReference>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

pub(crate) fn default_max_concurrent_tasks() -> u32 {
    3
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceCounters {
    pub completed_subtasks: u64,
    pub failed_subtasks: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatus {
    #[serde(default)]
    pub phase: AgentPhase,

    /// When the current phase was entered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_since: Option<DateTime<Utc>>,

    /// Peers whose connectivity has been configured.
    #[serde(default)]
    pub peers: Vec<AgentId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,

    #[serde(default)]
    pub assigned_subtasks: Vec<SubtaskRef>,

    #[serde(default)]
    pub recovery_attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub performance: PerformanceCounters,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub metadata: ObjectMeta,
    pub spec: AgentSpec,
    #[serde(default)]
    pub status: AgentStatus,
}

impl Agent {
    pub fn id(&self) -> AgentId {
        AgentId::new(self.metadata.name.clone())
    }

    /// Name of the cluster this agent belongs to, if recorded.
    pub fn cluster_name(&self) -> Option<&str> {
        self.metadata
            .owner
            .as_ref()
            .map(|o| o.name.as_str())
            .or_else(|| self.metadata.labels.get(CLUSTER_LABEL).map(String::as_str))
    }

    pub fn has_capabilities(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.spec.capabilities)
    }

    pub fn is_idle(&self) -> bool {
        self.status.assigned_subtasks.is_empty()
    }
}

impl Resource for Agent {
    const KIND: &'static str = "Agent";

    type Spec = AgentSpec;
    type Status = AgentStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &AgentSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut AgentSpec {
        &mut self.spec
    }

    fn status(&self) -> &AgentStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut AgentStatus {
        &mut self.status
    }
}
