// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain layer: declarative object kinds, their invariants and the ports the
//! reconcilers talk to.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Cluster, agent and task aggregates plus collaborator contracts

pub mod agent;
pub mod checkpoint;
pub mod clock;
pub mod cluster;
pub mod config;
pub mod dag;
pub mod errors;
pub mod events;
pub mod membership;
pub mod meta;
pub mod metrics;
pub mod runtime;
pub mod secrets;
pub mod store;
pub mod task;
