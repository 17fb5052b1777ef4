//! Serializable simulation configuration.
//!
//! Every section has defaults, so an empty TOML document is a valid config.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Dispatch engine settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Drop events whose dedup key was already seen this run.
    pub deduplication: bool,

    /// Collect per-kind metrics in addition to the plain counters.
    pub enable_metrics: bool,

    /// Record dispatched events so they can be replayed.
    pub enable_replay: bool,

    /// Replay log capacity; the oldest event is dropped when full.
    pub max_replay_events: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            deduplication: true,
            enable_metrics: false,
            enable_replay: false,
            max_replay_events: 100_000,
        }
    }
}

/// Bounds applied to every equity recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquityGuardConfig {
    pub enabled: bool,

    /// Largest allowed change per update, as a fraction of the previous equity.
    pub max_change_pct: f64,

    /// Minimum allowed change bound in currency units, so small accounts can still move.
    pub change_floor: f64,

    /// Equity never reported below `floor_ratio * initial_cash`.
    pub floor_ratio: f64,

    /// Equity never reported above `ceiling_ratio * initial_cash`.
    pub ceiling_ratio: f64,
}

impl Default for EquityGuardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_change_pct: 0.25,
            change_floor: 1_000.0,
            floor_ratio: 0.0,
            ceiling_ratio: 100.0,
        }
    }
}

impl EquityGuardConfig {
    /// Guard that never clamps.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Portfolio accountant settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub initial_cash: f64,

    /// Subscription priority used by `PortfolioManager::attach`.
    pub priority: i32,

    pub equity_guard: EquityGuardConfig,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
            initial_cash: 100_000.0,
            priority: 0,
            equity_guard: EquityGuardConfig::default(),
        }
    }
}

impl PortfolioConfig {
    pub fn with_initial_cash(initial_cash: f64) -> Self {
        Self {
            initial_cash,
            ..Self::default()
        }
    }
}

/// Top-level configuration for one simulation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub bus: BusConfig,
    pub portfolio: PortfolioConfig,
}

impl SimulationConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SimulationConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let portfolio = &self.portfolio;
        if !portfolio.initial_cash.is_finite() || portfolio.initial_cash < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "initial_cash must be finite and >= 0, got {}",
                portfolio.initial_cash
            )));
        }

        let guard = &portfolio.equity_guard;
        if !(guard.max_change_pct > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "equity_guard.max_change_pct must be > 0, got {}",
                guard.max_change_pct
            )));
        }
        if !(guard.change_floor >= 0.0) {
            return Err(ConfigError::Invalid(format!(
                "equity_guard.change_floor must be >= 0, got {}",
                guard.change_floor
            )));
        }
        if !(guard.floor_ratio >= 0.0) || !(guard.ceiling_ratio > guard.floor_ratio) {
            return Err(ConfigError::Invalid(format!(
                "equity_guard requires 0 <= floor_ratio < ceiling_ratio, got {} and {}",
                guard.floor_ratio, guard.ceiling_ratio
            )));
        }

        if self.bus.enable_replay && self.bus.max_replay_events == 0 {
            return Err(ConfigError::Invalid(
                "bus.max_replay_events must be > 0 when replay is enabled".into(),
            ));
        }
        Ok(())
    }
}
