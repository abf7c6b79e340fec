// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod agent_lifecycle;
pub mod controller;
pub mod reconciler;
pub mod scheduler;

pub use agent_lifecycle::{AgentReconciler, LifecycleSettings};
pub use controller::Controller;
pub use reconciler::{Action, Reconciler};
pub use scheduler::{SchedulerSettings, TaskScheduler};
