// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `colony-swarm`: Cluster Topology and Scaling
//!
//! Keeps agent pools converged to their declared shape and wires every
//! reconciler of the control plane into one running process.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | topology manager, autoscaler decision |
//! | [`application`] | Application | `ClusterReconciler`, `ControllerManager` |
//!
//! ## Key Concepts
//!
//! - **Topology**: mesh, ring, star or hierarchical peer graph over a cluster's agents.
//! - **Population**: per-type agent counts derived from a total and topology ratios.
//! - **Stabilization window**: scale-down hysteresis after a scale event.

pub mod application;
pub mod domain;

pub use domain::*;
