// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Static secret catalogue.
//!
//! Knows secret *names* only. Mount references follow a fixed path layout under
//! `mount_root`; contents are never held here.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::domain::secrets::{SecretError, SecretReference, SecretStore};

pub const DEFAULT_MOUNT_ROOT: &str = "/var/run/secrets/colony";

#[derive(Clone)]
pub struct StaticSecretStore {
    names: Arc<RwLock<BTreeSet<String>>>,
    mount_root: String,
}

impl Default for StaticSecretStore {
    fn default() -> Self {
        Self::new(DEFAULT_MOUNT_ROOT)
    }
}

impl StaticSecretStore {
    pub fn new(mount_root: impl Into<String>) -> Self {
        Self {
            names: Arc::new(RwLock::new(BTreeSet::new())),
            mount_root: mount_root.into(),
        }
    }

    pub fn insert(&self, name: impl Into<String>) {
        self.names.write().insert(name.into());
    }

    pub fn remove(&self, name: &str) {
        self.names.write().remove(name);
    }
}

#[async_trait]
impl SecretStore for StaticSecretStore {
    async fn exists(&self, name: &str) -> Result<bool, SecretError> {
        Ok(self.names.read().contains(name))
    }

    async fn mount_spec(&self, name: &str) -> Result<SecretReference, SecretError> {
        if !self.names.read().contains(name) {
            return Err(SecretError::NotFound(name.to_string()));
        }
        Ok(SecretReference {
            name: name.to_string(),
            mount: format!("{}/{}", self.mount_root.trim_end_matches('/'), name),
        })
    }
}
