// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Controller Loop
//!
//! Level-triggered runner for one [`Reconciler`]:
//!
//! | Source | Effect |
//! |--------|--------|
//! | watch event | enqueue the mapped keys |
//! | lagged watch | enqueue every key (full resync) |
//! | resync tick | enqueue every key |
//! | `Action::Requeue(d)` | enqueue after `d` |
//! | retryable error | enqueue with per-key exponential backoff |
//! | terminal error | drop until the next change |
//!
//! N workers pull from one deduplicating [`WorkQueue`], so distinct objects are
//! reconciled concurrently while a single object never is.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::application::reconciler::{Action, Reconciler};
use crate::domain::config::ControllerSettings;
use crate::domain::errors::ReconcileError;
use crate::domain::meta::{ObjectKey, Resource};
use crate::domain::store::WatchEvent;
use crate::infrastructure::telemetry;
use crate::infrastructure::work_queue::WorkQueue;

pub struct Controller<R: Reconciler + 'static> {
    reconciler: Arc<R>,
    queue: WorkQueue<ObjectKey>,
    settings: ControllerSettings,
}

impl<R: Reconciler + 'static> Controller<R> {
    pub fn new(reconciler: Arc<R>, settings: ControllerSettings) -> Self {
        let queue = WorkQueue::new(settings.backoff_base, settings.backoff_max);
        Self {
            reconciler,
            queue,
            settings,
        }
    }

    /// Handle for other components that need to enqueue keys of this kind.
    pub fn queue(&self) -> WorkQueue<ObjectKey> {
        self.queue.clone()
    }

    pub fn reconciler(&self) -> Arc<R> {
        self.reconciler.clone()
    }

    /// Feed watch events of any kind into this controller's queue.
    pub fn watch<T, F>(
        &self,
        mut events: broadcast::Receiver<WatchEvent<T>>,
        map: F,
        shutdown: CancellationToken,
    ) -> JoinHandle<()>
    where
        T: Resource,
        F: Fn(&WatchEvent<T>) -> Vec<ObjectKey> + Send + 'static,
    {
        let queue = self.queue.clone();
        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = events.recv() => match received {
                        Ok(event) => {
                            for key in map(&event) {
                                queue.add(key);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(
                                controller = reconciler.name(),
                                kind = T::KIND,
                                missed,
                                "Watch lagged, resyncing"
                            );
                            resync(reconciler.as_ref(), &queue).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        })
    }

    /// Run workers and the resync ticker until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) {
        let name = self.reconciler.name();
        info!(controller = name, workers = self.settings.workers, "Starting controller");

        resync(self.reconciler.as_ref(), &self.queue).await;

        let mut handles = Vec::with_capacity(self.settings.workers + 1);
        for _ in 0..self.settings.workers.max(1) {
            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            handles.push(tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    process(reconciler.as_ref(), &queue, &key).await;
                    queue.done(&key);
                }
            }));
        }

        {
            let reconciler = self.reconciler.clone();
            let queue = self.queue.clone();
            let interval = self.settings.resync_interval;
            let shutdown = shutdown.clone();
            handles.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = ticker.tick() => resync(reconciler.as_ref(), &queue).await,
                    }
                }
            }));
        }

        shutdown.cancelled().await;
        self.queue.shutdown();
        for handle in handles {
            let _ = handle.await;
        }
        info!(controller = name, "Controller stopped");
    }
}

async fn resync<R: Reconciler + ?Sized>(reconciler: &R, queue: &WorkQueue<ObjectKey>) {
    match reconciler.list_keys().await {
        Ok(keys) => {
            debug!(controller = reconciler.name(), count = keys.len(), "Resync");
            for key in keys {
                queue.add(key);
            }
        }
        Err(e) => warn!(controller = reconciler.name(), error = %e, "Resync listing failed"),
    }
}

/// One reconcile pass for `key`, with requeue handling and metrics.
pub async fn process<R: Reconciler + ?Sized>(
    reconciler: &R,
    queue: &WorkQueue<ObjectKey>,
    key: &ObjectKey,
) {
    let name = reconciler.name();
    let started = Instant::now();
    let result = reconciler.reconcile(key).await;
    let elapsed = started.elapsed();

    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.kind(),
    };
    telemetry::record_reconcile(name, outcome, elapsed);

    match result {
        Ok(Action::Requeue(delay)) => {
            queue.forget(key);
            debug!(controller = name, key = %key, delay_ms = delay.as_millis() as u64, "Requeue");
            queue.add_after(key.clone(), delay);
        }
        Ok(Action::AwaitChange) => queue.forget(key),
        Err(e @ ReconcileError::Capacity(_)) => {
            debug!(controller = name, key = %key, error = %e, "Waiting for capacity");
            queue.add_after(key.clone(), Duration::from_secs(5));
        }
        Err(e) if e.is_retryable() => {
            let delay = queue.add_rate_limited(key.clone());
            debug!(
                controller = name,
                key = %key,
                error = %e,
                delay_ms = delay.as_millis() as u64,
                "Transient error, backing off"
            );
        }
        Err(e) => {
            queue.forget(key);
            error!(controller = name, key = %key, error = %e, "Reconcile failed permanently");
        }
    }
}
