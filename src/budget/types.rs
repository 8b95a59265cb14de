//! Budget configuration and usage types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Capacity model of a points-based API quota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BudgetConfig {
    /// Maximum points the bucket holds
    pub max_capacity: f64,

    /// Points regenerated per second
    #[serde(default)]
    pub restore_rate: Option<f64>,

    /// Fixed recharge window in seconds (bucket refills fully at each boundary)
    #[serde(default)]
    pub recharge_window_secs: Option<u64>,

    /// Delay between requests while capacity is comfortable
    #[serde(default = "default_baseline_delay_ms")]
    pub baseline_delay_ms: u64,

    /// Cost assumed for a query when the response carries no usage metadata
    #[serde(default = "default_fallback_cost")]
    pub fallback_cost: f64,

    /// Fraction of max below which requests slow down
    #[serde(default = "default_slowdown_ratio")]
    pub slowdown_ratio: f64,

    /// Fraction of max below which a low-water warning is logged
    #[serde(default = "default_low_water_ratio")]
    pub low_water_ratio: f64,

    /// Ceiling on any single wait
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_baseline_delay_ms() -> u64 {
    250
}

fn default_fallback_cost() -> f64 {
    100.0
}

fn default_slowdown_ratio() -> f64 {
    0.5
}

fn default_low_water_ratio() -> f64 {
    0.2
}

fn default_max_wait_secs() -> u64 {
    300
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_capacity: 1000.0,
            restore_rate: Some(50.0),
            recharge_window_secs: None,
            baseline_delay_ms: default_baseline_delay_ms(),
            fallback_cost: default_fallback_cost(),
            slowdown_ratio: default_slowdown_ratio(),
            low_water_ratio: default_low_water_ratio(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl BudgetConfig {
    /// Rate-based budget (points regenerate continuously)
    pub fn with_restore_rate(max_capacity: f64, restore_rate: f64) -> Self {
        Self {
            max_capacity,
            restore_rate: Some(restore_rate),
            recharge_window_secs: None,
            ..Self::default()
        }
    }

    /// Window-based budget (bucket refills at fixed boundaries)
    pub fn with_recharge_window(max_capacity: f64, window: Duration) -> Self {
        Self {
            max_capacity,
            restore_rate: None,
            recharge_window_secs: Some(window.as_secs()),
            ..Self::default()
        }
    }

    /// Set the baseline delay
    #[must_use]
    pub fn baseline_delay(mut self, delay: Duration) -> Self {
        self.baseline_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the wait ceiling
    #[must_use]
    pub fn max_wait(mut self, ceiling: Duration) -> Self {
        self.max_wait_secs = ceiling.as_secs();
        self
    }

    /// Set the fallback query cost
    #[must_use]
    pub fn fallback_cost(mut self, cost: f64) -> Self {
        self.fallback_cost = cost;
        self
    }

    /// Baseline delay as a duration
    pub fn baseline(&self) -> Duration {
        Duration::from_millis(self.baseline_delay_ms)
    }

    /// Wait ceiling as a duration
    pub fn ceiling(&self) -> Duration {
        Duration::from_secs(self.max_wait_secs)
    }

    /// Recharge model derived from the configured fields
    pub fn recharge(&self) -> Recharge {
        match (self.restore_rate, self.recharge_window_secs) {
            (Some(rate), _) => Recharge::Rate(rate),
            (None, Some(secs)) => Recharge::Window(Duration::from_secs(secs)),
            (None, None) => Recharge::Rate(self.max_capacity / 60.0),
        }
    }
}

/// How spent capacity comes back
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Recharge {
    /// Points per second
    Rate(f64),
    /// Full refill at each window boundary
    Window(Duration),
}

/// Provider-reported usage attached to a response
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    /// Points the query declared up front
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requested: Option<f64>,
    /// Points actually charged
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed: Option<f64>,
    /// Points left after the query
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available: Option<f64>,
    /// Bucket size
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    /// Points restored per second
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restore_rate: Option<f64>,
}

impl Usage {
    /// True when the response carried no usage metadata at all
    pub fn is_empty(&self) -> bool {
        self.requested.is_none()
            && self.consumed.is_none()
            && self.available.is_none()
            && self.max.is_none()
            && self.restore_rate.is_none()
    }

    /// Best estimate of what the query cost
    pub fn cost(&self) -> Option<f64> {
        self.consumed.or(self.requested)
    }
}

/// Outcome of `before_request`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Wait {
    /// How long to wait, already clamped to the ceiling
    pub duration: Duration,
    /// Delay before clamping
    pub required: Duration,
    /// The uncapped delay exceeded the ceiling
    pub capped: bool,
    /// Available capacity is under the low-water mark
    pub low_water: bool,
}
