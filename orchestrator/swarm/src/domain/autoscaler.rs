// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Autoscaler
//!
//! Pure scaling decision. The most constrained metric dominates:
//!
//! ```text
//! pressure     = observed / target               (per metric)
//! scale factor = ceil(max pressure)  if max pressure > 1
//!                max pressure        otherwise
//! desired      = clamp(round(current × factor), min, max)
//! ```
//!
//! Scale-up applies immediately. Scale-down waits until the stabilization window
//! has passed since the last scale event. With no readings at all the current
//! population is retained.

use chrono::{DateTime, Utc};
use std::time::Duration;

use colony_core::domain::clock::{after, elapsed};
use colony_core::domain::cluster::ScaleDirection;

#[derive(Debug, Clone, PartialEq)]
pub struct MetricReading {
    pub name: String,
    pub observed: f64,
    pub target: f64,
}

impl MetricReading {
    pub fn pressure(&self) -> f64 {
        self.observed / self.target
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScalingInput {
    pub current_total: u32,
    pub min_agents: u32,
    pub max_agents: u32,
    pub last_scale_time: Option<DateTime<Utc>>,
    pub stabilization_window: Duration,
    pub now: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ScaleDecision {
    /// Keep the current population.
    Hold { reason: HoldReason },
    Scale {
        direction: ScaleDirection,
        factor: f64,
        from_total: u32,
        to_total: u32,
    },
    /// Scale-down wanted but still inside the stabilization window.
    Suppressed {
        desired_total: u32,
        remaining: Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldReason {
    NoMetrics,
    Steady,
}

/// Scale factor from the readings, or `None` when there are none usable.
pub fn scale_factor(readings: &[MetricReading]) -> Option<f64> {
    let max = readings
        .iter()
        .map(MetricReading::pressure)
        .filter(|p| p.is_finite() && *p >= 0.0)
        .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))))?;
    Some(if max > 1.0 { max.ceil() } else { max })
}

pub fn decide(input: &ScalingInput, readings: &[MetricReading]) -> ScaleDecision {
    let Some(factor) = scale_factor(readings) else {
        return ScaleDecision::Hold {
            reason: HoldReason::NoMetrics,
        };
    };

    let current = input.current_total;
    let desired = (current as f64 * factor).round();
    let desired = if desired.is_finite() { desired.max(0.0) as u32 } else { input.max_agents };
    let desired = desired.clamp(input.min_agents, input.max_agents.max(input.min_agents));

    if desired == current {
        return ScaleDecision::Hold {
            reason: HoldReason::Steady,
        };
    }
    if desired > current {
        return ScaleDecision::Scale {
            direction: ScaleDirection::Up,
            factor,
            from_total: current,
            to_total: desired,
        };
    }

    if let Some(last) = input.last_scale_time {
        if !elapsed(input.now, last, input.stabilization_window) {
            let remaining = (after(last, input.stabilization_window) - input.now)
                .to_std()
                .unwrap_or(Duration::ZERO);
            return ScaleDecision::Suppressed {
                desired_total: desired,
                remaining,
            };
        }
    }
    ScaleDecision::Scale {
        direction: ScaleDirection::Down,
        factor,
        from_total: current,
        to_total: desired,
    }
}
