// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Metric Source Port
//!
//! Feeds the autoscaler. Any backend (Prometheus, custom metrics API, ...) plugs in
//! behind [`MetricSource`]; an unavailable reading is reported as `Ok(None)` and is
//! never fatal.

use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("Metric backend unavailable: {0}")]
    Unavailable(String),
    #[error("Invalid metric query '{name}': {reason}")]
    InvalidQuery { name: String, reason: String },
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Current value of `metric` for objects matching `selector`.
    async fn query(
        &self,
        metric: &str,
        selector: &BTreeMap<String, String>,
    ) -> Result<Option<f64>, MetricError>;
}
