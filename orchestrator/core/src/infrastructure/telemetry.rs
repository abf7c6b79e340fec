// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Metric names and recording helpers for the `metrics` facade.
//!
//! Recording is a no-op until the binary installs an exporter.

use std::time::Duration;

pub const RECONCILE_TOTAL: &str = "colony_reconcile_total";
pub const RECONCILE_DURATION_SECONDS: &str = "colony_reconcile_duration_seconds";
pub const AGENTS_DESIRED: &str = "colony_agents_desired";
pub const AGENTS_ACTIVE: &str = "colony_agents_active";
pub const SUBTASK_RETRIES_TOTAL: &str = "colony_subtask_retries_total";
pub const AGENT_FAILURES_TOTAL: &str = "colony_agent_failures_total";

/// Register descriptions with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(RECONCILE_TOTAL, "Reconcile passes by controller and outcome");
    metrics::describe_histogram!(
        RECONCILE_DURATION_SECONDS,
        metrics::Unit::Seconds,
        "Wall time of a single reconcile pass"
    );
    metrics::describe_gauge!(AGENTS_DESIRED, "Desired agent population per cluster");
    metrics::describe_gauge!(AGENTS_ACTIVE, "Agents in an active phase per cluster");
    metrics::describe_counter!(SUBTASK_RETRIES_TOTAL, "Subtask retries scheduled");
    metrics::describe_counter!(AGENT_FAILURES_TOTAL, "Agents failed on heartbeat timeout");
}

pub fn record_reconcile(controller: &'static str, outcome: &'static str, elapsed: Duration) {
    metrics::counter!(RECONCILE_TOTAL, "controller" => controller, "outcome" => outcome)
        .increment(1);
    metrics::histogram!(RECONCILE_DURATION_SECONDS, "controller" => controller)
        .record(elapsed.as_secs_f64());
}

pub fn record_cluster_population(cluster: &str, desired: u32, active: u32) {
    metrics::gauge!(AGENTS_DESIRED, "cluster" => cluster.to_string()).set(desired as f64);
    metrics::gauge!(AGENTS_ACTIVE, "cluster" => cluster.to_string()).set(active as f64);
}

pub fn record_subtask_retry() {
    metrics::counter!(SUBTASK_RETRIES_TOTAL).increment(1);
}

pub fn record_agent_failure() {
    metrics::counter!(AGENT_FAILURES_TOTAL).increment(1);
}
