// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod cluster_reconciler;
pub mod manager;

pub use cluster_reconciler::{ClusterReconciler, ClusterSettings};
pub use manager::{Collaborators, ControllerManager, Stores};
