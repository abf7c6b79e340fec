// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Object Store Implementations
//!
//! Infrastructure implementations of the declarative state store defined in the
//! domain layer.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist declarative objects and stream their changes
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! ## In-Memory Store
//!
//! [`InMemoryStore`] backs the controller binary and every test:
//! - `parking_lot::RwLock<BTreeMap>` keyed by `namespace/name`, so listings are ordered
//! - a monotonically increasing `resource_version` shared by all objects of the store
//! - a `tokio::sync::broadcast` channel carrying `WatchEvent`s in write order
//!
//! Writes that change nothing are accepted without bumping the version and without
//! emitting an event.

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::meta::{ObjectKey, Resource};
use crate::domain::store::{ObjectStore, StoreError, WatchEvent};

const WATCH_CAPACITY: usize = 1024;

pub struct InMemoryStore<T: Resource> {
    objects: Arc<RwLock<BTreeMap<ObjectKey, T>>>,
    version: Arc<AtomicU64>,
    write_calls: Arc<AtomicU64>,
    events: broadcast::Sender<WatchEvent<T>>,
}

impl<T: Resource> Clone for InMemoryStore<T> {
    fn clone(&self) -> Self {
        Self {
            objects: self.objects.clone(),
            version: self.version.clone(),
            write_calls: self.write_calls.clone(),
            events: self.events.clone(),
        }
    }
}

impl<T: Resource> Default for InMemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Resource> InMemoryStore<T> {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(WATCH_CAPACITY);
        Self {
            objects: Arc::new(RwLock::new(BTreeMap::new())),
            version: Arc::new(AtomicU64::new(0)),
            write_calls: Arc::new(AtomicU64::new(0)),
            events,
        }
    }

    /// Number of write calls received (including no-op writes). Used to assert
    /// that a reconcile pass did not touch the store.
    pub fn write_calls(&self) -> u64 {
        self.write_calls.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    fn next_version(&self) -> u64 {
        self.version.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn emit(&self, event: WatchEvent<T>) {
        // No receivers is fine; nobody is watching yet.
        let _ = self.events.send(event);
    }

    fn check_version(key: &ObjectKey, stored: &T, incoming: &T) -> Result<(), StoreError> {
        let expected = incoming.meta().resource_version;
        let actual = stored.meta().resource_version;
        if expected != actual {
            return Err(StoreError::Conflict {
                key: key.clone(),
                expected,
                actual,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl<T: Resource> ObjectStore<T> for InMemoryStore<T> {
    async fn get(&self, key: &ObjectKey) -> Result<Option<T>, StoreError> {
        Ok(self.objects.read().get(key).cloned())
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<T>, StoreError> {
        let objects = self.objects.read();
        Ok(objects
            .iter()
            .filter(|(k, _)| namespace.map(|ns| k.namespace == ns).unwrap_or(true))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn create(&self, mut object: T) -> Result<T, StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let key = object.key();
        let mut objects = self.objects.write();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists { kind: T::KIND, key });
        }
        let meta = object.meta_mut();
        meta.resource_version = self.next_version();
        meta.generation = 1;
        meta.deletion_timestamp = None;
        objects.insert(key, object.clone());
        self.emit(WatchEvent::Added(object.clone()));
        Ok(object)
    }

    async fn update(&self, object: &T) -> Result<T, StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let key = object.key();
        let mut objects = self.objects.write();
        let stored = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound { kind: T::KIND, key: key.clone() })?;
        Self::check_version(&key, stored, object)?;

        let mut next = stored.clone();
        {
            let incoming = object.meta();
            let meta = next.meta_mut();
            meta.labels = incoming.labels.clone();
            meta.owner = incoming.owner.clone();
            meta.finalizers = incoming.finalizers.clone();
        }
        let spec_changed = next.spec() != object.spec();
        if spec_changed {
            *next.spec_mut() = object.spec().clone();
        }
        if !spec_changed && next.meta() == stored.meta() {
            return Ok(stored.clone());
        }

        let meta = next.meta_mut();
        meta.resource_version = self.next_version();
        if spec_changed {
            meta.generation += 1;
        }

        if next.meta().is_deleting() && next.meta().finalizers.is_empty() {
            objects.remove(&key);
            self.emit(WatchEvent::Deleted(next.clone()));
        } else {
            objects.insert(key, next.clone());
            self.emit(WatchEvent::Modified(next.clone()));
        }
        Ok(next)
    }

    async fn update_status(&self, object: &T) -> Result<T, StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let key = object.key();
        let mut objects = self.objects.write();
        let stored = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound { kind: T::KIND, key: key.clone() })?;
        Self::check_version(&key, stored, object)?;

        if stored.status() == object.status() {
            return Ok(stored.clone());
        }
        let mut next = stored.clone();
        *next.status_mut() = object.status().clone();
        next.meta_mut().resource_version = self.next_version();
        objects.insert(key, next.clone());
        self.emit(WatchEvent::Modified(next.clone()));
        Ok(next)
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), StoreError> {
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let mut objects = self.objects.write();
        let stored = objects
            .get(key)
            .ok_or_else(|| StoreError::NotFound { kind: T::KIND, key: key.clone() })?;

        if stored.meta().finalizers.is_empty() {
            if let Some(removed) = objects.remove(key) {
                self.emit(WatchEvent::Deleted(removed));
            }
            return Ok(());
        }
        if stored.meta().is_deleting() {
            return Ok(());
        }
        let mut next = stored.clone();
        let meta = next.meta_mut();
        meta.deletion_timestamp = Some(Utc::now());
        meta.resource_version = self.next_version();
        objects.insert(key.clone(), next.clone());
        self.emit(WatchEvent::Modified(next));
        Ok(())
    }

    fn watch(&self) -> broadcast::Receiver<WatchEvent<T>> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{Agent, AgentSpec, AgentStatus, AgentType};
    use crate::domain::meta::ObjectMeta;

    fn agent(name: &str) -> Agent {
        Agent {
            metadata: ObjectMeta::new("default", name),
            spec: serde_yaml::from_str::<AgentSpec>("type: coder\n").unwrap(),
            status: AgentStatus::default(),
        }
    }

    #[tokio::test]
    async fn test_create_get_and_conflict() {
        let store = InMemoryStore::<Agent>::new();
        let created = store.create(agent("a")).await.unwrap();
        assert_eq!(created.metadata.generation, 1);
        assert!(matches!(
            store.create(agent("a")).await,
            Err(StoreError::AlreadyExists { .. })
        ));

        let mut first = created.clone();
        first.spec.agent_type = AgentType::Tester;
        let updated = store.update(&first).await.unwrap();
        assert_eq!(updated.metadata.generation, 2);
        assert!(updated.metadata.resource_version > created.metadata.resource_version);

        // Stale copy is rejected.
        let mut stale = created;
        stale.spec.agent_type = AgentType::Analyst;
        assert!(matches!(store.update(&stale).await, Err(StoreError::Conflict { .. })));
    }

    #[tokio::test]
    async fn test_status_is_a_separate_subresource() {
        let store = InMemoryStore::<Agent>::new();
        let created = store.create(agent("a")).await.unwrap();

        let mut with_status = created.clone();
        with_status.status.recovery_attempts = 2;
        with_status.spec.max_concurrent_tasks = 9;
        let written = store.update_status(&with_status).await.unwrap();
        assert_eq!(written.status.recovery_attempts, 2);
        assert_eq!(written.spec.max_concurrent_tasks, 3);

        // Unchanged status is a no-op.
        let again = store.update_status(&written).await.unwrap();
        assert_eq!(again.metadata.resource_version, written.metadata.resource_version);
    }

    #[tokio::test]
    async fn test_delete_waits_for_finalizers() {
        let store = InMemoryStore::<Agent>::new();
        let mut a = agent("a");
        a.metadata.add_finalizer("colony.dev/agent-cleanup");
        let created = store.create(a).await.unwrap();
        let mut watch = store.watch();

        store.delete(&created.key()).await.unwrap();
        let marked = store.get(&created.key()).await.unwrap().unwrap();
        assert!(marked.metadata.is_deleting());
        assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Modified(_)));

        let mut released = marked;
        released.metadata.remove_finalizer("colony.dev/agent-cleanup");
        store.update(&released).await.unwrap();
        assert!(store.get(&created.key()).await.unwrap().is_none());
        assert!(matches!(watch.recv().await.unwrap(), WatchEvent::Deleted(_)));
    }

    #[tokio::test]
    async fn test_list_filters_namespace() {
        let store = InMemoryStore::<Agent>::new();
        store.create(agent("a")).await.unwrap();
        let mut other = agent("b");
        other.metadata.namespace = "other".into();
        store.create(other).await.unwrap();
        assert_eq!(store.list(Some("default")).await.unwrap().len(), 1);
        assert_eq!(store.list(None).await.unwrap().len(), 2);
    }
}
