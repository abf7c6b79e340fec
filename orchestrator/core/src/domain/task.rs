// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Task Aggregate
//!
//! A `Task` is authored by a user and mutated only by the task scheduler. It carries
//! a list of subtasks plus typed dependency edges that together form a DAG.
//!
//! ## Task lifecycle
//!
//! ```text
//! Pending ──▶ Scheduled ◀──▶ Running ──▶ Completed
//!    │            │             │
//!    │            └─────┬───────┘
//!    ▼                  ▼
//!  Failed ◀─────────  Failed ──(resume)──▶ Resuming ──▶ Scheduled
//!                    Cancelled
//! ```
//!
//! ## Subtask lifecycle
//!
//! | Phase | Meaning |
//! |-------|---------|
//! | `Pending` | at least one dependency is unmet |
//! | `Queued` | ready; waiting for capacity or for `not_before` backoff |
//! | `Running` | assigned to an agent for attempt `attempt` |
//! | `Completed` | runtime reported success |
//! | `Failed` | retries exhausted (terminal) |
//! | `Skipped` | condition evaluated false, or downstream of a failed branch |
//! | `Cancelled` | task cancelled before dispatch |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;

use crate::domain::agent::{AgentId, AgentType};
use crate::domain::meta::{Condition, ObjectKey, ObjectMeta, Resource};

/// Finalizer guarding task removal until its capacity slots are released.
pub const TASK_FINALIZER: &str = "colony.dev/task-cleanup";

/// Reason recorded when the dependency graph is invalid.
pub const REASON_INVALID_GRAPH: &str = "InvalidDependencyGraph";
pub const REASON_TASK_TIMEOUT: &str = "TaskTimeout";
pub const REASON_RETRY_EXHAUSTED: &str = "RetryExhausted";
pub const REASON_BRANCHES_FAILED: &str = "BranchesFailed";
pub const REASON_AGENT_LOST: &str = "AgentLost";
pub const REASON_CANCELLED: &str = "Cancelled";
pub const REASON_NO_CAPACITY: &str = "NoQualifyingAgent";

/// Identity of one subtask across the whole system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SubtaskRef {
    pub task: ObjectKey,
    pub subtask: String,
}

impl SubtaskRef {
    pub fn new(task: ObjectKey, subtask: impl Into<String>) -> Self {
        Self {
            task,
            subtask: subtask.into(),
        }
    }
}

impl fmt::Display for SubtaskRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.task, self.subtask)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

/// How ready subtasks are dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// Every ready subtask is dispatched, in declaration order.
    #[default]
    Parallel,
    /// At most one subtask runs at a time.
    Sequential,
    /// Every ready subtask is dispatched, longest estimated duration first.
    Adaptive,
}

/// What happens to the rest of the DAG once one subtask exhausts its retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FailurePolicy {
    #[default]
    FailFast,
    ContinueIndependent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_seconds() -> u64 {
    60
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_seconds: default_backoff_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryPolicy {
    /// Delay before re-queuing a subtask that has already been retried
    /// `retry_count` times: `backoff_seconds × backoff_multiplier^retry_count`.
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let secs = self.backoff_seconds as f64 * self.backoff_multiplier.powi(retry_count as i32);
        if secs.is_finite() && secs > 0.0 {
            Duration::from_secs_f64(secs)
        } else {
            Duration::ZERO
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
    #[default]
    Completion,
    Data,
    Conditional,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Exists,
    Truthy,
}

/// Predicate evaluated against the upstream subtask's result payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyCondition {
    /// JSON pointer into the upstream result (`""` is the whole result).
    #[serde(default)]
    pub path: String,
    pub operator: ConditionOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl DependencyCondition {
    pub fn evaluate(&self, result: Option<&serde_json::Value>) -> bool {
        let found = result.and_then(|r| r.pointer(&self.path));
        match self.operator {
            ConditionOperator::Equals => found.is_some() && found == self.value.as_ref(),
            ConditionOperator::NotEquals => found != self.value.as_ref(),
            ConditionOperator::Exists => found.map(|v| !v.is_null()).unwrap_or(false),
            ConditionOperator::Truthy => found.map(is_truthy).unwrap_or(false),
        }
    }
}

fn is_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// Edge `from → to`: `to` may not start until `from` satisfies `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dependency {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub kind: DependencyKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<DependencyCondition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskSpec {
    pub name: String,

    #[serde(rename = "type", default)]
    pub subtask_type: String,

    #[serde(default)]
    pub required_capabilities: BTreeSet<String>,

    /// When non-empty, only agents of these types qualify.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub preferred_agent_types: Vec<AgentType>,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub estimated_duration: Option<Duration>,

    /// Opaque payload handed to the agent runtime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSpec {
    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub priority: TaskPriority,

    #[serde(default)]
    pub strategy: ExecutionStrategy,

    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub timeout: Option<Duration>,

    #[serde(default)]
    pub retry_policy: RetryPolicy,

    /// Resume from the last checkpoint instead of failing for good.
    #[serde(default)]
    pub resume: bool,

    /// Falls back to the controller's configured default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,

    /// Advisory cancellation. Stops new dispatches; running work is left to the runtime.
    #[serde(default)]
    pub cancel: bool,

    #[serde(default)]
    pub subtasks: Vec<SubtaskSpec>,

    #[serde(default)]
    pub dependencies: Vec<Dependency>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TaskPhase {
    #[default]
    Pending,
    Scheduled,
    Running,
    Resuming,
    Completed,
    Failed,
    Cancelled,
}

impl TaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskPhase::Completed | TaskPhase::Failed | TaskPhase::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SubtaskPhase {
    #[default]
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl SubtaskPhase {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubtaskPhase::Completed
                | SubtaskPhase::Failed
                | SubtaskPhase::Skipped
                | SubtaskPhase::Cancelled
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubtaskStatus {
    #[serde(default)]
    pub phase: SubtaskPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_agent: Option<AgentId>,

    /// Number of dispatches so far. Runtime reports must quote the current value.
    #[serde(default)]
    pub attempt: u32,

    #[serde(default)]
    pub retry_count: u32,

    /// Earliest time a queued subtask may be dispatched again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_before: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,

    #[serde(default)]
    pub artifact_available: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStatus {
    #[serde(default)]
    pub phase: TaskPhase,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<DateTime<Utc>>,

    /// Completed subtasks as an integer percentage.
    #[serde(default)]
    pub progress: u8,

    /// Sorted, distinct agents currently running a subtask of this task.
    #[serde(default)]
    pub assigned_agents: Vec<AgentId>,

    #[serde(default)]
    pub subtasks: BTreeMap<String, SubtaskStatus>,

    /// Step of the last checkpoint written for this task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_step: Option<u64>,

    #[serde(default)]
    pub resume_attempts: u32,

    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub metadata: ObjectMeta,
    pub spec: TaskSpec,
    #[serde(default)]
    pub status: TaskStatus,
}

impl Task {
    /// Subtasks currently running on `agent`, as global references.
    pub fn running_on(&self, agent: &AgentId) -> Vec<SubtaskRef> {
        let key = self.metadata.key();
        self.status
            .subtasks
            .iter()
            .filter(|(_, s)| {
                s.phase == SubtaskPhase::Running && s.assigned_agent.as_ref() == Some(agent)
            })
            .map(|(name, _)| SubtaskRef::new(key.clone(), name.clone()))
            .collect()
    }

    /// `(completed, failed)` subtask counts attributed to `agent`.
    pub fn outcomes_for(&self, agent: &AgentId) -> (u64, u64) {
        self.status
            .subtasks
            .values()
            .filter(|s| s.assigned_agent.as_ref() == Some(agent))
            .fold((0, 0), |(c, f), s| match s.phase {
                SubtaskPhase::Completed => (c + 1, f),
                SubtaskPhase::Failed => (c, f + 1),
                _ => (c, f),
            })
    }

    pub fn subtask_spec(&self, name: &str) -> Option<&SubtaskSpec> {
        self.spec.subtasks.iter().find(|s| s.name == name)
    }
}

impl Resource for Task {
    const KIND: &'static str = "Task";

    type Spec = TaskSpec;
    type Status = TaskStatus;

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }

    fn spec(&self) -> &TaskSpec {
        &self.spec
    }

    fn spec_mut(&mut self) -> &mut TaskSpec {
        &mut self.spec
    }

    fn status(&self) -> &TaskStatus {
        &self.status
    }

    fn status_mut(&mut self) -> &mut TaskStatus {
        &mut self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_delays_double() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(60));
        assert_eq!(policy.delay_for(1), Duration::from_secs(120));
        assert_eq!(policy.delay_for(2), Duration::from_secs(240));
    }

    #[test]
    fn test_condition_operators() {
        let result = json!({"verdict": "pass", "score": 0, "tags": ["a"]});

        let eq = DependencyCondition {
            path: "/verdict".into(),
            operator: ConditionOperator::Equals,
            value: Some(json!("pass")),
        };
        assert!(eq.evaluate(Some(&result)));

        let truthy = DependencyCondition {
            path: "/score".into(),
            operator: ConditionOperator::Truthy,
            value: None,
        };
        assert!(!truthy.evaluate(Some(&result)));

        let exists = DependencyCondition {
            path: "/tags".into(),
            operator: ConditionOperator::Exists,
            value: None,
        };
        assert!(exists.evaluate(Some(&result)));
        assert!(!exists.evaluate(None));
    }

    #[test]
    fn test_task_manifest_parses() {
        let yaml = r#"
metadata:
  name: build-feature
spec:
  description: implement and test
  timeout: 30m
  retryPolicy:
    maxRetries: 2
  subtasks:
    - name: design
      requiredCapabilities: [design]
    - name: implement
      requiredCapabilities: [coding]
      estimatedDuration: 10m
  dependencies:
    - from: design
      to: implement
"#;
        let task: Task = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(task.metadata.namespace, "default");
        assert_eq!(task.spec.timeout, Some(Duration::from_secs(1800)));
        assert_eq!(task.spec.retry_policy.max_retries, 2);
        assert_eq!(task.spec.retry_policy.backoff_seconds, 60);
        assert_eq!(task.spec.dependencies[0].kind, DependencyKind::Completion);
        assert_eq!(task.status.phase, TaskPhase::Pending);
    }
}
