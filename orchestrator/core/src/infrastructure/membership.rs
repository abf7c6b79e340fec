// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Membership registry that only records the last synced member list per cluster.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::agent::AgentId;
use crate::domain::cluster::ConsensusAlgorithm;
use crate::domain::membership::{MembershipError, MembershipRegistry};
use crate::domain::meta::ObjectKey;

#[derive(Clone, Default)]
pub struct InMemoryMembershipRegistry {
    members: Arc<RwLock<HashMap<ObjectKey, (ConsensusAlgorithm, Vec<AgentId>)>>>,
}

impl InMemoryMembershipRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn members(&self, cluster: &ObjectKey) -> Option<Vec<AgentId>> {
        self.members.read().get(cluster).map(|(_, m)| m.clone())
    }
}

#[async_trait]
impl MembershipRegistry for InMemoryMembershipRegistry {
    async fn sync_members(
        &self,
        cluster: &ObjectKey,
        algorithm: ConsensusAlgorithm,
        members: &[AgentId],
    ) -> Result<(), MembershipError> {
        self.members
            .write()
            .insert(cluster.clone(), (algorithm, members.to_vec()));
        Ok(())
    }

    async fn deregister(&self, cluster: &ObjectKey) -> Result<(), MembershipError> {
        self.members.write().remove(cluster);
        Ok(())
    }
}
