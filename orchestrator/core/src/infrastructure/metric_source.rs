// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Static metric readings.
//!
//! A reading is registered for a metric name plus a label selector; a query
//! matches when every label of the registered selector is present in the query
//! selector. No metrics backend is implemented.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::metrics::{MetricError, MetricSource};

type Selector = BTreeMap<String, String>;

#[derive(Clone, Default)]
pub struct StaticMetricSource {
    readings: Arc<RwLock<Vec<(String, Selector, f64)>>>,
}

impl StaticMetricSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set (or replace) the reading for `metric` under `selector`.
    pub fn set(&self, metric: impl Into<String>, selector: Selector, value: f64) {
        let metric = metric.into();
        let mut readings = self.readings.write();
        readings.retain(|(m, s, _)| !(m == &metric && s == &selector));
        readings.push((metric, selector, value));
    }

    pub fn clear(&self, metric: &str) {
        self.readings.write().retain(|(m, _, _)| m != metric);
    }
}

#[async_trait]
impl MetricSource for StaticMetricSource {
    async fn query(&self, metric: &str, selector: &Selector) -> Result<Option<f64>, MetricError> {
        let readings = self.readings.read();
        Ok(readings
            .iter()
            .filter(|(m, _, _)| m == metric)
            .find(|(_, s, _)| s.iter().all(|(k, v)| selector.get(k) == Some(v)))
            .map(|(_, _, v)| *v))
    }
}
