//! Rolling statistics — exponentially weighted mean and deviation.
//!
//! One implementation shared by drive baselines and the instability
//! health guard.

use serde::{Deserialize, Serialize};

/// Default smoothing factor.
pub const DEFAULT_ALPHA: f64 = 0.1;

/// Exponentially weighted mean and variance of a scalar stream.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RollingStats {
    mean: f64,
    variance: f64,
    count: u64,
    alpha: f64,
}

impl RollingStats {
    pub fn new(alpha: f64) -> Self {
        Self {
            mean: 0.0,
            variance: 0.0,
            count: 0,
            alpha: alpha.clamp(f64::EPSILON, 1.0),
        }
    }

    /// Fold one observation in. Non-finite values are ignored.
    pub fn observe(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        if self.count == 0 {
            self.mean = x;
            self.variance = 0.0;
        } else {
            let diff = x - self.mean;
            let incr = self.alpha * diff;
            self.mean += incr;
            self.variance = (1.0 - self.alpha) * (self.variance + diff * incr);
        }
        self.count += 1;
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn std_dev(&self) -> f64 {
        self.variance.max(0.0).sqrt()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn has_history(&self) -> bool {
        self.count > 0
    }

    /// Standardized deviation of `x`, or `None` without history.
    pub fn z_score(&self, x: f64, epsilon: f64) -> Option<f64> {
        if !self.has_history() {
            return None;
        }
        Some((x - self.mean) / (self.std_dev() + epsilon))
    }
}

impl Default for RollingStats {
    fn default() -> Self {
        Self::new(DEFAULT_ALPHA)
    }
}
