// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Hive-Mind Membership Port
//!
//! Clusters with hive-mind enabled publish their member list to a consensus layer.
//! No particular protocol is implemented here; the algorithm name is passed through
//! so the backend can pick one.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::agent::AgentId;
use crate::domain::cluster::ConsensusAlgorithm;
use crate::domain::meta::ObjectKey;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("Membership backend unavailable: {0}")]
    Unavailable(String),
    #[error("Membership rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait MembershipRegistry: Send + Sync {
    /// Replace the member set for `cluster`. Must be idempotent.
    async fn sync_members(
        &self,
        cluster: &ObjectKey,
        algorithm: ConsensusAlgorithm,
        members: &[AgentId],
    ) -> Result<(), MembershipError>;

    async fn deregister(&self, cluster: &ObjectKey) -> Result<(), MembershipError>;
}
