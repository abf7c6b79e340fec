// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Capacity ledger shared by all task reconciles in this process.
//!
//! Holds, per agent, the set of subtasks currently running on it. Agents are keyed
//! by namespace and name; a subtask always runs on an agent in its task's
//! namespace. Reservations are atomic under one mutex, so two tasks reconciled
//! concurrently can never push an agent past its `max_concurrent_tasks`.

use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::agent::AgentId;
use crate::domain::meta::ObjectKey;
use crate::domain::task::{SubtaskRef, Task};

#[derive(Debug, Default)]
pub struct SlotLedger {
    slots: Mutex<BTreeMap<ObjectKey, BTreeSet<SubtaskRef>>>,
}

impl SlotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from the running subtasks recorded in task statuses.
    pub fn rebuild<'a>(&self, tasks: impl IntoIterator<Item = &'a Task>) {
        let mut slots = self.slots.lock();
        slots.clear();
        for task in tasks {
            for (agent, subtask) in running_entries(task) {
                slots.entry(agent).or_default().insert(subtask);
            }
        }
    }

    /// Running subtasks on the agent stored under `agent`.
    pub fn load(&self, agent: &ObjectKey) -> usize {
        self.slots.lock().get(agent).map(BTreeSet::len).unwrap_or(0)
    }

    pub fn holds(&self, agent: &AgentId, subtask: &SubtaskRef) -> bool {
        self.slots
            .lock()
            .get(&agent_key(agent, subtask))
            .map(|s| s.contains(subtask))
            .unwrap_or(false)
    }

    /// Reserve one slot on `agent`. Returns `false` when the agent is full.
    pub fn try_reserve(&self, agent: &AgentId, subtask: SubtaskRef, capacity: u32) -> bool {
        let mut slots = self.slots.lock();
        let entry = slots.entry(agent_key(agent, &subtask)).or_default();
        if entry.contains(&subtask) {
            return true;
        }
        if entry.len() >= capacity as usize {
            return false;
        }
        entry.insert(subtask);
        true
    }

    pub fn release(&self, agent: &AgentId, subtask: &SubtaskRef) {
        let key = agent_key(agent, subtask);
        let mut slots = self.slots.lock();
        if let Some(entry) = slots.get_mut(&key) {
            entry.remove(subtask);
            if entry.is_empty() {
                slots.remove(&key);
            }
        }
    }

    /// Drop every slot held by `task`.
    pub fn release_task(&self, task: &ObjectKey) {
        let mut slots = self.slots.lock();
        for entry in slots.values_mut() {
            entry.retain(|s| &s.task != task);
        }
        slots.retain(|_, e| !e.is_empty());
    }

    /// Replace the slots held by `task` with what its status says is running.
    pub fn sync_task(&self, task: &Task) {
        let key = task.metadata.key();
        let mut slots = self.slots.lock();
        for entry in slots.values_mut() {
            entry.retain(|s| s.task != key);
        }
        for (agent, subtask) in running_entries(task) {
            slots.entry(agent).or_default().insert(subtask);
        }
        slots.retain(|_, e| !e.is_empty());
    }
}

fn agent_key(agent: &AgentId, subtask: &SubtaskRef) -> ObjectKey {
    ObjectKey::new(subtask.task.namespace.clone(), agent.as_str())
}

fn running_entries(task: &Task) -> Vec<(ObjectKey, SubtaskRef)> {
    let key = task.metadata.key();
    task.status
        .subtasks
        .iter()
        .filter(|(_, s)| s.phase == crate::domain::task::SubtaskPhase::Running)
        .filter_map(|(name, s)| {
            s.assigned_agent.as_ref().map(|a| {
                let subtask = SubtaskRef::new(key.clone(), name.clone());
                (agent_key(a, &subtask), subtask)
            })
        })
        .collect()
}
