// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Credential / Secret Store Port
//!
//! The control plane never reads secret contents. It only checks that a named
//! secret exists and wires an opaque mount reference into agent specs; issuance
//! and rotation belong to the external secret store.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Opaque reference to a secret, as produced by [`SecretStore::mount_spec`].
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretReference {
    pub name: String,
    /// Store-specific mount descriptor (path, env var name, volume id...).
    pub mount: String,
}

#[derive(Debug, Error)]
pub enum SecretError {
    #[error("Secret not found: {0}")]
    NotFound(String),
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn exists(&self, name: &str) -> Result<bool, SecretError>;

    async fn mount_spec(&self, name: &str) -> Result<SecretReference, SecretError>;
}
