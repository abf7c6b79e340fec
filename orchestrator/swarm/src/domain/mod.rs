// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure decision functions. No I/O dependencies.
//!
//! | Module | Key Items |
//! |--------|-----------|
//! | [`topology`] | `compute_population`, `compute_peers`, `PeerLayout`, `default_ratios` |
//! | [`autoscaler`] | `decide`, `scale_factor`, `ScaleDecision` |

pub mod autoscaler;
pub mod topology;

pub use autoscaler::{decide, scale_factor, MetricReading, ScaleDecision, ScalingInput};
pub use topology::{
    compute_peers, compute_population, default_ratios, distribute, PeerLayout, TopologyError,
};
