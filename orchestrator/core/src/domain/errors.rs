// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Reconcile Error Taxonomy
//!
//! | Variant | Handling |
//! |---------|----------|
//! | `Validation` | recorded on status, terminal, never requeued |
//! | `Transient` | requeued with per-key exponential backoff |
//! | `Capacity` | object held, requeued on the resync interval |
//! | `AgentLiveness` | agent forced to `Failed`, subtasks requeued |
//! | `RetryExhausted` | terminal, carries the last underlying error |
//!
//! Every collaborator error converts into `Transient`; structural problems in a
//! declared object convert into `Validation`.

use thiserror::Error;

use crate::domain::checkpoint::CheckpointError;
use crate::domain::cluster::ClusterSpecError;
use crate::domain::dag::GraphError;
use crate::domain::membership::MembershipError;
use crate::domain::metrics::MetricError;
use crate::domain::runtime::RuntimeError;
use crate::domain::secrets::SecretError;
use crate::domain::store::StoreError;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReconcileError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("transient infrastructure error: {0}")]
    Transient(String),

    #[error("no capacity: {0}")]
    Capacity(String),

    #[error("agent liveness lost: {0}")]
    AgentLiveness(String),

    #[error("retries exhausted: {0}")]
    RetryExhausted(String),
}

impl ReconcileError {
    /// Whether the controller should requeue the key with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconcileError::Transient(_) | ReconcileError::Capacity(_))
    }

    /// Short label for metrics and status reasons.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconcileError::Validation(_) => "validation",
            ReconcileError::Transient(_) => "transient",
            ReconcileError::Capacity(_) => "capacity",
            ReconcileError::AgentLiveness(_) => "agent_liveness",
            ReconcileError::RetryExhausted(_) => "retry_exhausted",
        }
    }

    pub fn timeout(what: &str) -> Self {
        ReconcileError::Transient(format!("{what} timed out"))
    }
}

impl From<StoreError> for ReconcileError {
    fn from(e: StoreError) -> Self {
        ReconcileError::Transient(e.to_string())
    }
}

impl From<GraphError> for ReconcileError {
    fn from(e: GraphError) -> Self {
        ReconcileError::Validation(e.to_string())
    }
}

impl From<ClusterSpecError> for ReconcileError {
    fn from(e: ClusterSpecError) -> Self {
        ReconcileError::Validation(e.to_string())
    }
}

macro_rules! transient_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for ReconcileError {
                fn from(e: $ty) -> Self {
                    ReconcileError::Transient(e.to_string())
                }
            }
        )*
    };
}

transient_from!(CheckpointError, MetricError, RuntimeError, SecretError, MembershipError);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::meta::ObjectKey;

    #[test]
    fn test_conflicts_are_retryable() {
        let err: ReconcileError = StoreError::Conflict {
            key: ObjectKey::new("default", "t"),
            expected: 1,
            actual: 2,
        }
        .into();
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "transient");
    }

    #[test]
    fn test_graph_errors_are_terminal() {
        let err: ReconcileError = GraphError::SelfDependency("a".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "validation");
    }
}
