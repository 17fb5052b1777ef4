//! tradebus core: event dispatch, positions and portfolio accounting.
//!
//! This crate contains:
//! - Typed events with per-kind deduplication keys
//! - A synchronous, priority-ordered, re-entrant event bus
//! - Single-instrument positions with cost-basis and realized-PnL accounting
//! - A position tracker and a portfolio accountant driven by FILL and BAR events
//! - TOML-backed configuration

pub mod bus;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod event;

pub use bus::{EventBus, EventHandler, HandlerRef, SubscriptionId};
pub use config::{BusConfig, EquityGuardConfig, PortfolioConfig, SimulationConfig};
pub use error::{BusError, ConfigError, HandlerError};
pub use event::{Event, EventKind, EventPayload};
