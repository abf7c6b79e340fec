// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Cluster Aggregate
//!
//! A `Cluster` declares the shape of an agent pool: topology, population bounds,
//! autoscaling policy and an optional hive-mind (consensus) membership. The cluster
//! reconciler owns every `Agent` it creates.
//!
//! # Invariants
//!
//! - `min_agents <= active agents <= max_agents` after convergence.
//! - Topology ratios sum to 100 (±1).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::domain::agent::{AgentType, CognitivePattern};
use crate::domain::meta::{Condition, ObjectMeta, Resource};

/// Finalizer guarding cluster removal until owned agents are gone.
pub const CLUSTER_FINALIZER: &str = "colony.dev/cluster-cleanup";

/// Allowed deviation from 100 when ratios are summed.
pub const RATIO_TOLERANCE: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Topology {
    #[default]
    Mesh,
    Hierarchical,
    Ring,
    Star,
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Topology::Mesh => "mesh",
            Topology::Hierarchical => "hierarchical",
            Topology::Ring => "ring",
            Topology::Star => "star",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// CPU, memory or other per-pod resource utilisation.
    #[default]
    Resource,
    /// Any application metric (queue depth, pending subtasks, ...).
    Custom,
}

/// One metric the autoscaler tracks against a target value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricTarget {
    pub name: String,
    #[serde(default)]
    pub kind: MetricKind,
    pub target: f64,
    /// Extra selector labels. The cluster label is always added.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub selector: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalingPolicy {
    #[serde(default)]
    pub enabled: bool,

    /// Percent of the population per agent type. Defaults per topology when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology_ratios: Option<BTreeMap<AgentType, u32>>,

    #[serde(default)]
    pub metrics: Vec<MetricTarget>,

    /// Scale-down suppression window. Defaults to the controller setting.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub stabilization_window: Option<Duration>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ConsensusAlgorithm {
    #[default]
    Raft,
    Pbft,
    Gossip,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct HiveMindSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub consensus: ConsensusAlgorithm,
}

/// Settings stamped onto every agent the cluster creates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentTemplate {
    #[serde(default)]
    pub capabilities: BTreeSet<String>,

    #[serde(default = "crate::domain::agent::default_max_concurrent_tasks")]
    pub max_concurrent_tasks: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cognitive_pattern: Option<CognitivePattern>,

    /// Secret names, resolved through the secret store.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

impl Default for AgentTemplate {
    fn default() -> Self {
        Self {
            capabilities: BTreeSet::new(),
            max_concurrent_tasks: crate::domain::agent::default_max_concurrent_tasks(),
            cognitive_pattern: None,
            secrets: Vec::new(),
            env: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub topology: Topology,

    #[serde(default = "default_min_agents")]
    pub min_agents: u32,

    #[serde(default = "default_max_agents")]
    pub max_agents: u32,

    #[serde(default)]
    pub autoscaling: AutoscalingPolicy,

    #[serde(default)]
    pub hive_mind: HiveMindSpec,

    #[serde(default)]
    pub agent_template: AgentTemplate,
}

fn default_min_agents() -> u32 {
    1
}

fn default_max_agents() -> u32 {
    10
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ClusterSpecError {
    #[error("minAgents ({min}) exceeds maxAgents ({max})")]
    BoundsInverted { min: u32, max: u32 },
    #[error("maxAgents must be at least 1")]
    EmptyPool,
    #[error("topology ratios sum to {0}%, expected 100%")]
    RatioSum(u32),
    #[error("metric '{0}' must have a positive target")]
    NonPositiveTarget(String),
}

impl ClusterSpec {
    pub fn validate(&self) -> Result<(), ClusterSpecError> {
        if self.max_agents == 0 {
            return Err(ClusterSpecError::EmptyPool);
        }
        if self.min_agents > self.max_agents {
            return Err(ClusterSpecError::BoundsInverted {
                min: self.min_agents,
                max: self.max_agents,
            });
        }
        if let Some(ratios) = &self.autoscaling.topology_ratios {
            let sum: u32 = ratios.values().sum();
            if sum.abs_diff(100) > RATIO_TOLERANCE {
                return Err(ClusterSpecError::RatioSum(sum));
            }
        }
        for metric in &self.autoscaling.metrics {
            if metric.target <= 0.0 || !metric.target.is_finite() {
                return Err(ClusterSpecError::NonPositiveTarget(metric.name.clone()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum ClusterPhase {
    #[default]
    Pending,
    Initializing,
    Scaling,
    Running,
    Terminating,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleDirection {
    Up,
    Down,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub phase: ClusterPhase,

    #[serde(default)]
    pub observed_generation: u64,

    /// Desired population per agent type, as last decided.
    #[serde(default)]
    pub desired_agents: BTreeMap<AgentType, u32>,

    /// Agents currently in an active phase.
    #[serde(default)]
    pub active_agents: u32,

    /// Agents that exist, by type, regardless of phase.
    #[serde(default)]
    pub agent_counts: BTreeMap<AgentType, u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_direction: Option<ScaleDirection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub metadata: ObjectMeta,
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: ClusterStatus,
}

impl Resource for Cluster {
    const KIND: &'static str = "Cluster";

    type Spec = ClusterSpec;
    type Status = ClusterStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &ClusterSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut ClusterSpec {
        &mut self.spec
    }

    fn status(&self) -> &ClusterStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut ClusterStatus {
        &mut self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> ClusterSpec {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_defaults() {
        let spec = parse("topology: star\n");
        assert_eq!(spec.topology, Topology::Star);
        assert_eq!(spec.min_agents, 1);
        assert_eq!(spec.max_agents, 10);
        assert_eq!(spec.agent_template.max_concurrent_tasks, 3);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_bounds_and_ratios() {
        let spec = parse("minAgents: 5\nmaxAgents: 2\n");
        assert!(matches!(spec.validate(), Err(ClusterSpecError::BoundsInverted { .. })));

        let spec = parse(
            "autoscaling:\n  topologyRatios:\n    coordinator: 10\n    coder: 50\n",
        );
        assert_eq!(spec.validate(), Err(ClusterSpecError::RatioSum(60)));

        let spec = parse(
            "autoscaling:\n  topologyRatios:\n    coordinator: 33\n    coder: 33\n    tester: 33\n",
        );
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_non_positive_targets() {
        let spec = parse("autoscaling:\n  metrics:\n    - name: cpu\n      target: 0\n");
        assert_eq!(spec.validate(), Err(ClusterSpecError::NonPositiveTarget("cpu".into())));
    }
}
