//! Trade records: reporting view of an economic trade, one record per opening fill.
//!
//! Trade records are independent of the cost-basis lot accounting in
//! [`Position`](super::Position); they exist for external reporting only.

use super::position::PositionSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Sequential trade identifier, unique within one accountant run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TradeId(pub u64);

impl fmt::Display for TradeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TradeStatus {
    Open,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRecord {
    // ── Identification ──
    pub id: TradeId,
    pub symbol: String,
    pub side: PositionSide,
    pub status: TradeStatus,
    pub rule_id: Option<String>,

    // ── Entry ──
    pub entry_time: DateTime<Utc>,
    pub entry_price: f64,
    pub entry_commission: f64,

    // ── Exit ──
    pub exit_time: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_commission: f64,

    // ── Size ──
    pub quantity: f64,

    // ── PnL ──
    /// Gross PnL on close, before commissions.
    pub pnl: Option<f64>,
}

impl TradeRecord {
    pub fn is_open(&self) -> bool {
        self.status == TradeStatus::Open
    }

    /// Gross PnL less entry and exit commission. `None` while open.
    pub fn net_pnl(&self) -> Option<f64> {
        self.pnl
            .map(|pnl| pnl - self.entry_commission - self.exit_commission)
    }

    /// Return on the trade as a fraction of entry cost.
    pub fn return_pct(&self) -> Option<f64> {
        if self.entry_price == 0.0 || self.quantity == 0.0 {
            return None;
        }
        self.net_pnl()
            .map(|net| net / (self.entry_price * self.quantity))
    }

    pub fn is_winner(&self) -> bool {
        self.net_pnl().is_some_and(|net| net > 0.0)
    }

    pub fn holding_period(&self) -> Option<chrono::Duration> {
        self.exit_time.map(|exit| exit - self.entry_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_trade() -> TradeRecord {
        TradeRecord {
            id: TradeId(1),
            symbol: "SPY".into(),
            side: PositionSide::Long,
            status: TradeStatus::Closed,
            rule_id: Some("breakout".into()),
            entry_time: Utc.with_ymd_and_hms(2024, 1, 5, 16, 0, 0).unwrap(),
            entry_price: 100.0,
            entry_commission: 10.0,
            exit_time: Some(Utc.with_ymd_and_hms(2024, 1, 11, 16, 0, 0).unwrap()),
            exit_price: Some(110.0),
            exit_commission: 5.0,
            quantity: 50.0,
            pnl: Some(500.0),
        }
    }

    #[test]
    fn return_pct_calculation() {
        let trade = sample_trade();
        let expected = 485.0 / (100.0 * 50.0);
        assert!((trade.return_pct().unwrap() - expected).abs() < 1e-10);
    }

    #[test]
    fn is_winner() {
        assert!(sample_trade().is_winner());
    }

    #[test]
    fn open_trade_has_no_pnl() {
        let mut trade = sample_trade();
        trade.status = TradeStatus::Open;
        trade.exit_time = None;
        trade.exit_price = None;
        trade.pnl = None;
        assert!(trade.is_open());
        assert!(trade.net_pnl().is_none());
        assert!(!trade.is_winner());
        assert!(trade.holding_period().is_none());
    }

    #[test]
    fn holding_period_spans_entry_to_exit() {
        assert_eq!(sample_trade().holding_period(), Some(chrono::Duration::days(6)));
    }
}
