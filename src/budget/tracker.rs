//! Budget tracker implementation
//!
//! Keeps a running estimate of the provider's points bucket and turns it into
//! a delay before each request. Provider metadata always wins over the local
//! estimate; the estimate only fills gaps between observations.

use super::types::{BudgetConfig, Recharge, Usage, Wait};
use crate::clock::{to_chrono, Clock};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Remaining-capacity estimate for one source
#[derive(Debug)]
pub struct BudgetTracker {
    config: BudgetConfig,
    recharge: Recharge,
    max: f64,
    available: f64,
    expected_cost: f64,
    last_update: DateTime<Utc>,
    window_start: DateTime<Utc>,
    clock: Arc<dyn Clock>,
}

impl BudgetTracker {
    /// Create a tracker that starts with a full bucket
    pub fn new(config: BudgetConfig, clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        let max = config.max_capacity.max(0.0);
        Self {
            recharge: config.recharge(),
            expected_cost: config.fallback_cost,
            max,
            available: max,
            last_update: now,
            window_start: now,
            config,
            clock,
        }
    }

    /// Current estimate of available points (regeneration included)
    pub fn available(&self) -> f64 {
        self.projected(self.clock.now()).0
    }

    /// Current bucket size
    pub fn max(&self) -> f64 {
        self.max
    }

    /// Cost the next query is expected to have
    pub fn expected_cost(&self) -> f64 {
        self.expected_cost
    }

    /// Tracker configuration
    pub fn config(&self) -> &BudgetConfig {
        &self.config
    }

    /// Update from a response's usage metadata
    pub fn observe(&mut self, usage: &Usage) {
        if let Some(rate) = usage.restore_rate.filter(|r| *r > 0.0) {
            self.recharge = Recharge::Rate(rate);
        }
        self.record_usage(usage.cost(), usage.available, usage.max);
    }

    /// Record points consumed and, when reported, the provider's own numbers
    pub fn record_usage(&mut self, consumed: Option<f64>, available: Option<f64>, max: Option<f64>) {
        self.regenerate();

        if let Some(max) = max {
            self.max = max.max(0.0);
        }
        if let Some(cost) = consumed {
            self.expected_cost = cost.max(0.0);
        }

        match available {
            Some(reported) => self.available = reported,
            None => self.available -= consumed.unwrap_or(self.config.fallback_cost),
        }
        self.available = self.available.clamp(0.0, self.max);

        debug!(
            available = self.available,
            max = self.max,
            expected_cost = self.expected_cost,
            "Budget updated"
        );
    }

    /// Decide how long to wait before the next request
    pub fn before_request(&mut self) -> Wait {
        self.regenerate();

        let baseline = self.config.baseline();
        let ceiling = self.config.ceiling();
        let available = self.available;
        let max = self.max;

        let low_water = available < max * self.config.low_water_ratio;
        if low_water {
            warn!(
                available,
                max,
                low_water_ratio = self.config.low_water_ratio,
                "Budget below low-water mark"
            );
        }

        let mut delay = baseline;

        let slowdown_level = max * self.config.slowdown_ratio;
        if available <= slowdown_level {
            delay += self.refill_time(slowdown_level - available);
        }

        let shortfall = self.expected_cost.min(max) - available;
        if shortfall > 0.0 {
            delay = delay.max(baseline + self.refill_time(shortfall));
        }

        if delay > ceiling {
            warn!(
                required_ms = delay.as_millis() as u64,
                ceiling_ms = ceiling.as_millis() as u64,
                "Budget wait exceeds ceiling"
            );
            return Wait {
                duration: ceiling,
                required: delay,
                capped: true,
                low_water,
            };
        }

        Wait {
            duration: delay,
            required: delay,
            capped: false,
            low_water,
        }
    }

    /// Time for `points` to come back under the current recharge model
    fn refill_time(&self, points: f64) -> Duration {
        if points <= 0.0 {
            return Duration::ZERO;
        }
        match self.recharge {
            Recharge::Rate(rate) if rate > 0.0 => secs(points / rate),
            Recharge::Rate(_) => self.config.ceiling() + Duration::from_secs(1),
            Recharge::Window(window) => {
                let elapsed = (self.clock.now() - self.window_start)
                    .to_std()
                    .unwrap_or_default();
                let remaining = window.saturating_sub(elapsed);
                let fraction = if self.max > 0.0 {
                    (points / self.max).min(1.0)
                } else {
                    1.0
                };
                remaining.mul_f64(fraction)
            }
        }
    }

    fn regenerate(&mut self) {
        let now = self.clock.now();
        let (available, window_start) = self.projected(now);
        self.available = available;
        self.window_start = window_start;
        self.last_update = now;
    }

    fn projected(&self, now: DateTime<Utc>) -> (f64, DateTime<Utc>) {
        match self.recharge {
            Recharge::Rate(rate) => {
                let elapsed = (now - self.last_update).to_std().unwrap_or_default();
                let restored = rate.max(0.0) * elapsed.as_secs_f64();
                ((self.available + restored).clamp(0.0, self.max), self.window_start)
            }
            Recharge::Window(window) => {
                let window = to_chrono(window);
                if window > chrono::Duration::zero() && now >= self.window_start + window {
                    let mut start = self.window_start;
                    while now >= start + window {
                        start += window;
                    }
                    (self.max, start)
                } else {
                    (self.available, self.window_start)
                }
            }
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::MAX)
}
