// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Reconciler contract shared by every controller.
//!
//! A reconcile pass converges one object and reports what should happen next as an
//! [`Action`]. Errors never escape as panics; the controller decides from
//! [`ReconcileError::is_retryable`] whether to requeue.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::domain::errors::ReconcileError;
use crate::domain::meta::ObjectKey;

/// Follow-up requested by a successful reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Reconcile again after the delay even without a change.
    Requeue(Duration),
    /// Nothing to do until the object (or something it depends on) changes.
    AwaitChange,
}

impl Action {
    /// Keep the earlier of two requeues.
    pub fn sooner(self, other: Action) -> Action {
        match (self, other) {
            (Action::Requeue(a), Action::Requeue(b)) => Action::Requeue(a.min(b)),
            (Action::Requeue(a), Action::AwaitChange)
            | (Action::AwaitChange, Action::Requeue(a)) => Action::Requeue(a),
            (Action::AwaitChange, Action::AwaitChange) => Action::AwaitChange,
        }
    }
}

#[async_trait]
pub trait Reconciler: Send + Sync {
    /// Controller name used in logs and metric labels.
    fn name(&self) -> &'static str;

    async fn reconcile(&self, key: &ObjectKey) -> Result<Action, ReconcileError>;

    /// Every key this reconciler is responsible for. Drives the periodic resync.
    async fn list_keys(&self) -> Result<Vec<ObjectKey>, ReconcileError>;
}

/// Bound a collaborator call. Expiry becomes a transient error.
pub async fn with_timeout<T, E, F>(
    limit: Duration,
    what: &str,
    call: F,
) -> Result<T, ReconcileError>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ReconcileError>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => {
            warn!(call = what, timeout_ms = limit.as_millis() as u64, "External call timed out");
            Err(ReconcileError::timeout(what))
        }
    }
}
