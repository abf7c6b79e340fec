// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Colony orchestrator core
//!
//! Reconciliation engine for pools of cooperating agents: the declarative
//! object model, the task scheduler, the agent lifecycle state machine and the
//! controller loop that drives them.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Domain model, reconcilers and in-process adapters

pub mod application;
pub mod domain;
pub mod infrastructure;

pub use domain::*;
