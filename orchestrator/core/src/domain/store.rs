// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Declarative State Store Port
//!
//! Generic over any [`Resource`]. Every write is version-checked against the
//! object's `resource_version`; a stale write fails with [`StoreError::Conflict`]
//! and the reconciler requeues instead of blocking.
//!
//! Status is a separate sub-resource: [`ObjectStore::update`] ignores the status
//! it is handed and [`ObjectStore::update_status`] ignores meta and spec.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

use crate::domain::meta::{ObjectKey, Resource};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: &'static str, key: ObjectKey },

    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: &'static str, key: ObjectKey },

    #[error("write conflict on {key}: expected version {expected}, found {actual}")]
    Conflict {
        key: ObjectKey,
        expected: u64,
        actual: u64,
    },

    #[error("state store unavailable: {0}")]
    Unavailable(String),
}

/// Change notification delivered in write order.
#[derive(Debug, Clone)]
pub enum WatchEvent<T> {
    Added(T),
    Modified(T),
    Deleted(T),
}

impl<T: Resource> WatchEvent<T> {
    pub fn object(&self) -> &T {
        match self {
            WatchEvent::Added(o) | WatchEvent::Modified(o) | WatchEvent::Deleted(o) => o,
        }
    }
}

#[async_trait]
pub trait ObjectStore<T: Resource>: Send + Sync {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, StoreError>;

    /// All objects, or only those in `namespace`, ordered by key.
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<T>, StoreError>;

    async fn create(&self, object: T) -> Result<T, StoreError>;

    /// Write meta and spec. Status on `object` is ignored.
    async fn update(&self, object: &T) -> Result<T, StoreError>;

    /// Write status only.
    async fn update_status(&self, object: &T) -> Result<T, StoreError>;

    /// Remove the object, or mark it for deletion while finalizers remain.
    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError>;

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>>;
}
