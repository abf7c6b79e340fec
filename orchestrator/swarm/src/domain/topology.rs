// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Topology Manager
//!
//! Pure functions from a topology shape and population bounds to a typed agent
//! population and a peer-connectivity graph. No I/O; identical inputs always give
//! identical outputs.
//!
//! | Topology | Peers of position `i` |
//! |----------|-----------------------|
//! | `mesh` | every other agent |
//! | `ring` | `i - 1` and `i + 1` (mod n) |
//! | `star` | the hub (position 0); the hub sees everyone |
//! | `hierarchical` | coordinators see each other and their children; others see their parent |
//!
//! Positions order coordinators first, then the remaining agents by index.

use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

use colony_core::domain::agent::{Agent, AgentId, AgentType};
use colony_core::domain::cluster::{ClusterSpec, Topology, RATIO_TOLERANCE};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("minAgents ({min}) exceeds maxAgents ({max})")]
    InvalidBounds { min: u32, max: u32 },
    #[error("topology ratios sum to {0}%, expected 100%")]
    RatioSum(u32),
}

/// Built-in percentage split per agent type for each topology.
pub fn default_ratios(topology: Topology) -> BTreeMap<AgentType, u32> {
    let split: &[(AgentType, u32)] = match topology {
        Topology::Mesh => &[
            (AgentType::Coordinator, 10),
            (AgentType::Researcher, 15),
            (AgentType::Coder, 30),
            (AgentType::Analyst, 15),
            (AgentType::Tester, 15),
            (AgentType::Reviewer, 15),
        ],
        Topology::Hierarchical => &[
            (AgentType::Coordinator, 20),
            (AgentType::Architect, 10),
            (AgentType::Coder, 30),
            (AgentType::Tester, 20),
            (AgentType::Reviewer, 20),
        ],
        Topology::Ring => &[
            (AgentType::Coordinator, 10),
            (AgentType::Coder, 30),
            (AgentType::Analyst, 20),
            (AgentType::Tester, 20),
            (AgentType::Reviewer, 20),
        ],
        Topology::Star => &[
            (AgentType::Coordinator, 20),
            (AgentType::Coder, 40),
            (AgentType::Tester, 20),
            (AgentType::Reviewer, 20),
        ],
    };
    split.iter().copied().collect()
}

/// Ratios declared on the cluster, or the topology defaults.
pub fn ratios_for(spec: &ClusterSpec) -> BTreeMap<AgentType, u32> {
    spec.autoscaling
        .topology_ratios
        .clone()
        .unwrap_or_else(|| default_ratios(spec.topology))
}

/// Split `total` agents across types.
///
/// Each type gets the floor of its share; the remainder goes out one agent at a
/// time in type-priority order. Every type ends within one agent of its exact share.
pub fn distribute(total: u32, ratios: &BTreeMap<AgentType, u32>) -> BTreeMap<AgentType, u32> {
    let weight: u64 = ratios.values().map(|r| *r as u64).sum();
    let mut out: BTreeMap<AgentType, u32> = BTreeMap::new();
    if total == 0 || weight == 0 {
        return out;
    }

    let mut assigned = 0u32;
    for (agent_type, ratio) in ratios {
        let share = (total as u64 * *ratio as u64 / weight) as u32;
        if share > 0 {
            out.insert(*agent_type, share);
        }
        assigned += share;
    }

    let eligible: Vec<AgentType> = AgentType::ALL
        .iter()
        .copied()
        .filter(|t| ratios.get(t).copied().unwrap_or(0) > 0)
        .collect();
    let mut remainder = total.saturating_sub(assigned);
    for agent_type in eligible.iter().cycle() {
        if remainder == 0 {
            break;
        }
        *out.entry(*agent_type).or_insert(0) += 1;
        remainder -= 1;
    }
    out
}

/// Initial population for a cluster: `min_agents` spread over the ratios.
pub fn compute_population(
    topology: Topology,
    min_agents: u32,
    max_agents: u32,
    ratios: Option<&BTreeMap<AgentType, u32>>,
) -> Result<BTreeMap<AgentType, u32>, TopologyError> {
    if max_agents == 0 || min_agents > max_agents {
        return Err(TopologyError::InvalidBounds {
            min: min_agents,
            max: max_agents,
        });
    }
    let defaults;
    let ratios = match ratios {
        Some(r) => r,
        None => {
            defaults = default_ratios(topology);
            &defaults
        }
    };
    let sum: u32 = ratios.values().sum();
    if sum.abs_diff(100) > RATIO_TOLERANCE {
        return Err(TopologyError::RatioSum(sum));
    }
    Ok(distribute(min_agents.max(1), ratios))
}

/// Peer positions of `position` in a population of `total`, `coordinators` of
/// which occupy the first positions.
pub fn compute_peers(
    topology: Topology,
    position: usize,
    total: usize,
    coordinators: usize,
) -> Vec<usize> {
    if position >= total {
        return Vec::new();
    }
    let mut peers: BTreeSet<usize> = BTreeSet::new();
    match topology {
        Topology::Mesh => peers.extend(0..total),
        Topology::Ring => {
            if total > 1 {
                peers.insert((position + total - 1) % total);
                peers.insert((position + 1) % total);
            }
        }
        Topology::Star => {
            if position == 0 {
                peers.extend(1..total);
            } else {
                peers.insert(0);
            }
        }
        Topology::Hierarchical => {
            let hubs = coordinators.clamp(1, total);
            if position < hubs {
                peers.extend(0..hubs);
                peers.extend((hubs..total).filter(|child| (child - hubs) % hubs == position));
            } else {
                peers.insert((position - hubs) % hubs);
            }
        }
    }
    peers.remove(&position);
    peers.into_iter().collect()
}

/// Agents in peer-position order plus the coordinator count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerLayout {
    members: Vec<AgentId>,
    coordinators: usize,
}

impl PeerLayout {
    pub fn from_agents<'a>(agents: impl IntoIterator<Item = &'a Agent>) -> Self {
        let mut ordered: Vec<(bool, u32, AgentId)> = agents
            .into_iter()
            .map(|a| (!a.spec.agent_type.is_coordinator(), a.spec.index, a.id()))
            .collect();
        ordered.sort();
        let coordinators = ordered.iter().filter(|(not_coord, _, _)| !not_coord).count();
        Self {
            members: ordered.into_iter().map(|(_, _, id)| id).collect(),
            coordinators,
        }
    }

    pub fn members(&self) -> &[AgentId] {
        &self.members
    }

    /// Peer list for every member.
    pub fn peers(&self, topology: Topology) -> BTreeMap<AgentId, Vec<AgentId>> {
        let total = self.members.len();
        self.members
            .iter()
            .enumerate()
            .map(|(position, id)| {
                let peers = compute_peers(topology, position, total, self.coordinators)
                    .into_iter()
                    .map(|p| self.members[p].clone())
                    .collect();
                (id.clone(), peers)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mesh_connects_everyone() {
        assert_eq!(compute_peers(Topology::Mesh, 1, 4, 1), vec![0, 2, 3]);
    }

    #[test]
    fn test_ring_neighbours() {
        assert_eq!(compute_peers(Topology::Ring, 0, 5, 1), vec![1, 4]);
        assert_eq!(compute_peers(Topology::Ring, 0, 2, 1), vec![1]);
        assert!(compute_peers(Topology::Ring, 0, 1, 1).is_empty());
    }

    #[test]
    fn test_star_hub_and_spokes() {
        assert_eq!(compute_peers(Topology::Star, 0, 4, 1), vec![1, 2, 3]);
        assert_eq!(compute_peers(Topology::Star, 3, 4, 1), vec![0]);
    }

    #[test]
    fn test_hierarchical_parents() {
        // Two coordinators, four workers assigned round-robin.
        assert_eq!(compute_peers(Topology::Hierarchical, 0, 6, 2), vec![1, 2, 4]);
        assert_eq!(compute_peers(Topology::Hierarchical, 1, 6, 2), vec![0, 3, 5]);
        assert_eq!(compute_peers(Topology::Hierarchical, 3, 6, 2), vec![1]);
        // Without coordinators position 0 acts as the root.
        assert_eq!(compute_peers(Topology::Hierarchical, 2, 3, 0), vec![0]);
    }

    #[test]
    fn test_default_ratios_sum_to_100() {
        for topology in [Topology::Mesh, Topology::Hierarchical, Topology::Ring, Topology::Star] {
            assert_eq!(default_ratios(topology).values().sum::<u32>(), 100, "{topology}");
        }
    }

    #[test]
    fn test_distribute_stays_within_one_agent() {
        let ratios = default_ratios(Topology::Mesh);
        for total in 1..=40u32 {
            let population = distribute(total, &ratios);
            assert_eq!(population.values().sum::<u32>(), total);
            for (agent_type, ratio) in &ratios {
                let exact = total as f64 * *ratio as f64 / 100.0;
                let got = population.get(agent_type).copied().unwrap_or(0) as f64;
                assert!((got - exact).abs() <= 1.0, "{agent_type} total={total}");
            }
        }
    }

    #[test]
    fn test_remainder_goes_to_highest_priority() {
        let population = distribute(2, &default_ratios(Topology::Star));
        assert_eq!(population.get(&AgentType::Coordinator), Some(&1));
        assert_eq!(population.get(&AgentType::Coder), Some(&1));
        assert_eq!(population.values().sum::<u32>(), 2);
    }

    #[test]
    fn test_population_is_deterministic_and_validated() {
        let a = compute_population(Topology::Hierarchical, 5, 10, None).unwrap();
        let b = compute_population(Topology::Hierarchical, 5, 10, None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.values().sum::<u32>(), 5);
        assert_eq!(
            compute_population(Topology::Mesh, 4, 2, None),
            Err(TopologyError::InvalidBounds { min: 4, max: 2 })
        );
    }
}
