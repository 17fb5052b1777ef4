//! Position tracker: owns every position, applies fills, marks to market and
//! keeps the closed-position history.

use crate::domain::{Position, PositionSide, PositionSnapshot};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// A round trip that ended flat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedPosition {
    pub symbol: String,
    /// Direction of the position that was closed.
    pub side: PositionSide,
    pub entry_time: Option<DateTime<Utc>>,
    pub entry_price: f64,
    pub exit_time: DateTime<Utc>,
    pub exit_price: f64,
    /// Quantity closed by the final transaction.
    pub quantity: f64,
    pub realized_pnl: f64,
}

impl ClosedPosition {
    pub fn is_winner(&self) -> bool {
        self.realized_pnl > 0.0
    }
}

/// Aggregate over [`ClosedPosition`] records.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClosedPositionStats {
    pub count: usize,
    pub wins: usize,
    pub losses: usize,
    pub gross_profit: f64,
    pub gross_loss: f64,
    pub win_rate: f64,
    /// Gross profit over gross loss; `None` when there were no losing closes.
    pub profit_factor: Option<f64>,
    pub total_pnl: f64,
}

#[derive(Debug, Clone, Default)]
pub struct PositionTracker {
    positions: BTreeMap<String, Position>,
    closed: Vec<ClosedPosition>,
    history: BTreeMap<String, Vec<PositionSnapshot>>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a signed quantity change to `symbol`, creating the position on
    /// first sight. Returns the updated position and the PnL realized by this
    /// transaction.
    pub fn update_position(
        &mut self,
        symbol: &str,
        quantity_change: f64,
        price: f64,
        timestamp: DateTime<Utc>,
    ) -> (&Position, f64) {
        let position = self
            .positions
            .entry(symbol.to_string())
            .or_insert_with(|| Position::new(symbol));

        let side_before = position.side();
        let entry_time = position.entry_time();
        let entry_price = position.cost_basis();
        let realized = position.update(quantity_change, price, timestamp);

        self.history
            .entry(symbol.to_string())
            .or_default()
            .push(position.snapshot());

        if position.is_flat() && side_before != PositionSide::Flat && realized != 0.0 {
            let quantity = position
                .last_transaction()
                .map_or(0.0, |tx| tx.closed_quantity);
            debug!(symbol, realized, "position closed");
            self.closed.push(ClosedPosition {
                symbol: symbol.to_string(),
                side: side_before,
                entry_time,
                entry_price,
                exit_time: timestamp,
                exit_price: price,
                quantity,
                realized_pnl: realized,
            });
        }

        (&*position, realized)
    }

    /// Revalue every held symbol that has a price in `prices`.
    pub fn mark_to_market(&mut self, prices: &BTreeMap<String, f64>, timestamp: DateTime<Utc>) {
        for (symbol, position) in self.positions.iter_mut() {
            if position.is_flat() {
                continue;
            }
            if let Some(&price) = prices.get(symbol) {
                position.mark_to_market(price);
                self.history
                    .entry(symbol.clone())
                    .or_default()
                    .push(position.snapshot());
            }
        }
        debug!(%timestamp, symbols = prices.len(), "marked to market");
    }

    /// Revalue a single symbol and record a history snapshot, like
    /// [`mark_to_market`](Self::mark_to_market). Returns false if it is not held.
    pub fn mark_symbol(&mut self, symbol: &str, price: f64) -> bool {
        match self.positions.get_mut(symbol) {
            Some(position) if !position.is_flat() => {
                position.mark_to_market(price);
                self.history
                    .entry(symbol.to_string())
                    .or_default()
                    .push(position.snapshot());
                true
            }
            _ => false,
        }
    }

    pub fn get_position(&self, symbol: &str) -> Option<&Position> {
        self.positions.get(symbol)
    }

    /// Non-flat positions, ordered by symbol.
    pub fn get_all_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.values().filter(|p| !p.is_flat())
    }

    /// Every position ever traded, including flat ones.
    pub fn all_traded(&self) -> impl Iterator<Item = &Position> {
        self.positions.values()
    }

    pub fn total_market_value(&self) -> f64 {
        self.positions.values().map(Position::market_value).sum()
    }

    pub fn long_exposure(&self) -> f64 {
        self.positions
            .values()
            .filter(|p| p.is_long())
            .map(Position::market_value)
            .sum()
    }

    /// Absolute value of short market value.
    pub fn short_exposure(&self) -> f64 {
        self.positions
            .values()
            .filter(|p| p.is_short())
            .map(|p| p.market_value().abs())
            .sum()
    }

    pub fn gross_exposure(&self) -> f64 {
        self.long_exposure() + self.short_exposure()
    }

    pub fn net_exposure(&self) -> f64 {
        self.long_exposure() - self.short_exposure()
    }

    pub fn total_unrealized_pnl(&self) -> f64 {
        self.positions.values().map(Position::unrealized_pnl).sum()
    }

    /// Realized PnL over every position ever traded.
    pub fn total_realized_pnl(&self) -> f64 {
        self.positions.values().map(Position::realized_pnl).sum()
    }

    pub fn closed_positions(&self) -> &[ClosedPosition] {
        &self.closed
    }

    pub fn history(&self, symbol: &str) -> &[PositionSnapshot] {
        self.history.get(symbol).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn snapshots(&self) -> Vec<PositionSnapshot> {
        self.get_all_positions().map(Position::snapshot).collect()
    }

    pub fn closed_stats(&self) -> ClosedPositionStats {
        let mut stats = ClosedPositionStats {
            count: self.closed.len(),
            ..Default::default()
        };
        for closed in &self.closed {
            stats.total_pnl += closed.realized_pnl;
            if closed.realized_pnl > 0.0 {
                stats.wins += 1;
                stats.gross_profit += closed.realized_pnl;
            } else if closed.realized_pnl < 0.0 {
                stats.losses += 1;
                stats.gross_loss += closed.realized_pnl.abs();
            }
        }
        if stats.count > 0 {
            stats.win_rate = stats.wins as f64 / stats.count as f64;
        }
        if stats.gross_loss > 0.0 {
            stats.profit_factor = Some(stats.gross_profit / stats.gross_loss);
        }
        stats
    }

    pub fn reset(&mut self) {
        self.positions.clear();
        self.closed.clear();
        self.history.clear();
    }
}
