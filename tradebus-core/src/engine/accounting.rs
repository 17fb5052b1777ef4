//! Equity curve, drawdown statistics and the equity sanity guard.

use crate::config::EquityGuardConfig;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One point on the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: f64,
    pub cash: f64,
    pub positions_value: f64,
}

/// Equity curve with running peak and drawdown.
///
/// Drawdown percentages are stored in percent (0 to 100), relative to the
/// running peak.
#[derive(Debug, Clone)]
pub struct EquityTracker {
    initial_equity: f64,
    curve: Vec<EquityPoint>,
    peak_equity: f64,
    current_drawdown: f64,
    current_drawdown_pct: f64,
    max_drawdown: f64,
    max_drawdown_pct: f64,
}

impl EquityTracker {
    pub fn new(initial_equity: f64) -> Self {
        Self {
            initial_equity,
            curve: Vec::new(),
            peak_equity: initial_equity,
            current_drawdown: 0.0,
            current_drawdown_pct: 0.0,
            max_drawdown: 0.0,
            max_drawdown_pct: 0.0,
        }
    }

    /// Append a point and update peak and drawdown.
    pub fn record(&mut self, point: EquityPoint) {
        if point.equity > self.peak_equity {
            self.peak_equity = point.equity;
        }

        self.current_drawdown = (self.peak_equity - point.equity).max(0.0);
        self.current_drawdown_pct = if self.peak_equity > 0.0 {
            self.current_drawdown / self.peak_equity * 100.0
        } else {
            0.0
        };

        if self.current_drawdown > self.max_drawdown {
            self.max_drawdown = self.current_drawdown;
        }
        if self.current_drawdown_pct > self.max_drawdown_pct {
            self.max_drawdown_pct = self.current_drawdown_pct;
        }

        self.curve.push(point);
    }

    pub fn curve(&self) -> &[EquityPoint] {
        &self.curve
    }

    pub fn last(&self) -> Option<&EquityPoint> {
        self.curve.last()
    }

    pub fn peak_equity(&self) -> f64 {
        self.peak_equity
    }

    pub fn current_drawdown(&self) -> f64 {
        self.current_drawdown
    }

    pub fn current_drawdown_pct(&self) -> f64 {
        self.current_drawdown_pct
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn max_drawdown_pct(&self) -> f64 {
        self.max_drawdown_pct
    }

    /// Point-to-point simple returns along the curve, starting from the initial equity.
    pub fn returns(&self) -> Vec<f64> {
        let mut previous = self.initial_equity;
        let mut returns = Vec::with_capacity(self.curve.len());
        for point in &self.curve {
            returns.push(if previous != 0.0 {
                point.equity / previous - 1.0
            } else {
                0.0
            });
            previous = point.equity;
        }
        returns
    }

    pub fn reset(&mut self, initial_equity: f64) {
        *self = Self::new(initial_equity);
    }
}

/// Applies [`EquityGuardConfig`] bounds to a freshly computed equity value.
#[derive(Debug, Clone)]
pub struct EquityGuard {
    config: EquityGuardConfig,
    clamps: u64,
}

impl EquityGuard {
    pub fn new(config: EquityGuardConfig) -> Self {
        Self { config, clamps: 0 }
    }

    /// Clamp `proposed` against the previous value and the absolute bounds
    /// derived from `initial_cash`. Every adjustment is logged.
    pub fn apply(&mut self, proposed: f64, previous: f64, initial_cash: f64) -> f64 {
        if !self.config.enabled {
            return proposed;
        }

        let mut equity = proposed;

        let bound = (self.config.max_change_pct * previous.abs()).max(self.config.change_floor);
        let change = equity - previous;
        if change.abs() > bound {
            let clamped = previous + bound.copysign(change);
            warn!(proposed = equity, previous, bound, clamped, "equity change clamped");
            equity = clamped;
            self.clamps += 1;
        }

        if initial_cash > 0.0 {
            let floor = self.config.floor_ratio * initial_cash;
            let ceiling = self.config.ceiling_ratio * initial_cash;
            if equity < floor {
                warn!(equity, floor, "equity clamped to floor");
                equity = floor;
                self.clamps += 1;
            } else if equity > ceiling {
                warn!(equity, ceiling, "equity clamped to ceiling");
                equity = ceiling;
                self.clamps += 1;
            }
        }

        equity
    }

    /// Number of adjustments made since construction or the last reset.
    pub fn clamps(&self) -> u64 {
        self.clamps
    }

    pub fn reset(&mut self) {
        self.clamps = 0;
    }
}
