// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Object Metadata
//!
//! Kubernetes-style metadata shared by every declarative object the control plane
//! manages (`Cluster`, `Agent`, `Task`).
//!
//! - [`ObjectKey`]: `namespace/name` identity used by work queues and stores.
//! - [`ObjectMeta`]: identity, opaque version token, ownership and finalizers.
//! - [`Condition`]: status condition with reason, message and transition time.
//! - [`Resource`]: trait binding a kind to its metadata so stores can stay generic.

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Namespace used when a manifest does not specify one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// Stable identity of an object within its kind.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Reference from a child object to the parent that created it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub kind: String,
    pub name: String,
    pub uid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    #[serde(default = "Uuid::new_v4")]
    pub uid: Uuid,

    /// Opaque optimistic-concurrency token. Assigned by the store on every write.
    #[serde(default)]
    pub resource_version: u64,

    /// Bumped by the store whenever the spec changes.
    #[serde(default)]
    pub generation: u64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<OwnerReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,

    #[serde(default = "Utc::now")]
    pub creation_timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            uid: Uuid::new_v4(),
            resource_version: 0,
            generation: 0,
            labels: BTreeMap::new(),
            owner: None,
            finalizers: Vec::new(),
            creation_timestamp: Utc::now(),
            deletion_timestamp: None,
        }
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey::new(self.namespace.clone(), self.name.clone())
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns `true` when the finalizer was not present and has been added.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.finalizers.push(finalizer.to_string());
        true
    }

    /// Returns `true` when the finalizer was present and has been removed.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let before = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        before != self.finalizers.len()
    }

    pub fn is_owned_by(&self, kind: &str, name: &str, uid: Uuid) -> bool {
        self.owner
            .as_ref()
            .map(|o| o.kind == kind && o.name == name && o.uid == uid)
            .unwrap_or(false)
    }
}

/// Status of a [`Condition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A single observation recorded on an object's status.
///
/// `last_transition_time` only moves when `status` flips, so re-recording an
/// unchanged condition never produces a write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Upsert a condition by type. Returns `true` when anything changed.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: &str,
    message: &str,
    now: DateTime<Utc>,
) -> bool {
    match conditions.iter_mut().find(|c| c.condition_type == condition_type) {
        Some(existing) => {
            let mut changed = false;
            if existing.status != status {
                existing.status = status;
                existing.last_transition_time = now;
                changed = true;
            }
            if existing.reason != reason {
                existing.reason = reason.to_string();
                changed = true;
            }
            if existing.message != message {
                existing.message = message.to_string();
                changed = true;
            }
            changed
        }
        None => {
            conditions.push(Condition {
                condition_type: condition_type.to_string(),
                status,
                reason: reason.to_string(),
                message: message.to_string(),
                last_transition_time: now,
            });
            true
        }
    }
}

pub fn find_condition<'a>(
    conditions: &'a [Condition],
    condition_type: &str,
) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.condition_type == condition_type)
}

/// A declarative object kind with separate spec and status sub-resources.
pub trait Resource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: &'static str;

    type Spec: Clone + PartialEq + Send + Sync;
    type Status: Clone + PartialEq + Send + Sync;

    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn spec(&self) -> &Self::Spec;
    fn spec_mut(&mut self) -> &mut Self::Spec;
    fn status(&self) -> &Self::Status;
    fn status_mut(&mut self) -> &mut Self::Status;

    fn key(&self) -> ObjectKey {
        self.meta().key()
    }
}
