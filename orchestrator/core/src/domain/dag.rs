// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Subtask Dependency Graph
//!
//! Adjacency list plus in-degree table over the subtasks of one task. Validation
//! runs Kahn's algorithm; a graph that cannot be fully drained contains a cycle.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use thiserror::Error;

use crate::domain::task::{Dependency, TaskSpec};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("dependency cycle among subtasks: {}", .0.join(", "))]
    Cycle(Vec<String>),
    #[error("dependency references unknown subtask '{0}'")]
    UnknownSubtask(String),
    #[error("subtask '{0}' is declared more than once")]
    DuplicateSubtask(String),
    #[error("subtask '{0}' depends on itself")]
    SelfDependency(String),
}

/// Validated DAG over subtask names.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    /// Subtask names in declaration order.
    order: Vec<String>,
    /// `to` → incoming edges.
    upstream: BTreeMap<String, Vec<Dependency>>,
    /// `from` → dependent subtask names.
    downstream: BTreeMap<String, Vec<String>>,
}

impl TaskGraph {
    pub fn build(spec: &TaskSpec) -> Result<Self, GraphError> {
        let mut order = Vec::with_capacity(spec.subtasks.len());
        let mut seen = BTreeSet::new();
        for subtask in &spec.subtasks {
            if !seen.insert(subtask.name.clone()) {
                return Err(GraphError::DuplicateSubtask(subtask.name.clone()));
            }
            order.push(subtask.name.clone());
        }

        let mut upstream: BTreeMap<String, Vec<Dependency>> = BTreeMap::new();
        let mut downstream: BTreeMap<String, Vec<String>> = BTreeMap::new();
        let mut in_degree: BTreeMap<&str, usize> = order.iter().map(|n| (n.as_str(), 0)).collect();

        for dep in &spec.dependencies {
            for end in [&dep.from, &dep.to] {
                if !seen.contains(end) {
                    return Err(GraphError::UnknownSubtask(end.clone()));
                }
            }
            if dep.from == dep.to {
                return Err(GraphError::SelfDependency(dep.from.clone()));
            }
            upstream.entry(dep.to.clone()).or_default().push(dep.clone());
            downstream.entry(dep.from.clone()).or_default().push(dep.to.clone());
            if let Some(degree) = in_degree.get_mut(dep.to.as_str()) {
                *degree += 1;
            }
        }

        let mut queue: VecDeque<&str> = order
            .iter()
            .map(String::as_str)
            .filter(|n| in_degree.get(n) == Some(&0))
            .collect();
        let mut drained = 0usize;
        while let Some(node) = queue.pop_front() {
            drained += 1;
            if let Some(children) = downstream.get(node) {
                for child in children {
                    if let Some(degree) = in_degree.get_mut(child.as_str()) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(child.as_str());
                        }
                    }
                }
            }
        }

        if drained < order.len() {
            let cyclic = in_degree
                .iter()
                .filter(|(_, d)| **d > 0)
                .map(|(n, _)| n.to_string())
                .collect();
            return Err(GraphError::Cycle(cyclic));
        }

        Ok(Self {
            order,
            upstream,
            downstream,
        })
    }

    pub fn subtasks(&self) -> &[String] {
        &self.order
    }

    pub fn upstream(&self, subtask: &str) -> &[Dependency] {
        self.upstream.get(subtask).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Every subtask reachable from `subtask` (excluding itself).
    pub fn descendants(&self, subtask: &str) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        let mut stack = vec![subtask.to_string()];
        while let Some(node) = stack.pop() {
            if let Some(children) = self.downstream.get(&node) {
                for child in children {
                    if out.insert(child.clone()) {
                        stack.push(child.clone());
                    }
                }
            }
        }
        out
    }
}
