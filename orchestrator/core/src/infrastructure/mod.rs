// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod checkpoint;
pub mod event_bus;
pub mod membership;
pub mod metric_source;
pub mod repositories;
pub mod runtime;
pub mod secrets_manager;
pub mod slot_ledger;
pub mod telemetry;
pub mod work_queue;

pub use event_bus::{DomainEvent, EventBus};
pub use repositories::InMemoryStore;
pub use slot_ledger::SlotLedger;
pub use work_queue::WorkQueue;
