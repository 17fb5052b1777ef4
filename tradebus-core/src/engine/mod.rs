//! Bookkeeping components driven by the bus.

pub mod accounting;
pub mod portfolio;
pub mod trade_ledger;
pub mod tracker;

pub use accounting::{EquityGuard, EquityPoint, EquityTracker};
pub use portfolio::{FillOutcome, FillStats, PortfolioManager, PortfolioSummary};
pub use trade_ledger::{LedgerFill, LedgerUpdate, TradeLedger};
pub use tracker::{ClosedPosition, ClosedPositionStats, PositionTracker};
