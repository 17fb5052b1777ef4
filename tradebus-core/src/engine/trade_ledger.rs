//! Trade ledger: one record per opening fill, FIFO-matched against closing fills.
//!
//! The ledger is a reporting view. Position cost basis and realized PnL come
//! from [`Position`](crate::domain::Position), which uses average cost, so a
//! trade's FIFO PnL can differ from the position's realized PnL on a partial
//! close.

use crate::domain::position::QUANTITY_EPSILON;
use crate::domain::{PositionSide, Side, TradeId, TradeRecord, TradeStatus};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, VecDeque};

/// Trade records touched by one fill.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerUpdate {
    pub closed: Vec<TradeRecord>,
    pub opened: Option<TradeRecord>,
}

/// Fill fields the ledger needs.
#[derive(Debug, Clone, Copy)]
pub struct LedgerFill<'a> {
    pub symbol: &'a str,
    pub side: Side,
    pub quantity: f64,
    pub price: f64,
    pub commission: f64,
    pub rule_id: Option<&'a str>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TradeLedger {
    next_id: u64,
    open: BTreeMap<String, VecDeque<TradeRecord>>,
    closed: Vec<TradeRecord>,
}

impl Default for TradeLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl TradeLedger {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            open: BTreeMap::new(),
            closed: Vec::new(),
        }
    }

    fn next_id(&mut self) -> TradeId {
        let id = TradeId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Match `fill` against open trades of the opposite direction, oldest
    /// first, and open a new trade for whatever quantity is left.
    ///
    /// When a fill closes only part of an open trade, the closed part is split
    /// off under a fresh id and the remainder keeps the original id.
    /// Commission is allocated pro rata by quantity.
    pub fn apply(&mut self, fill: LedgerFill<'_>) -> LedgerUpdate {
        let mut update = LedgerUpdate::default();
        if fill.quantity <= 0.0 {
            return update;
        }

        let opening_side = match fill.side {
            Side::Buy => PositionSide::Long,
            Side::Sell => PositionSide::Short,
        };
        let commission_per_unit = fill.commission / fill.quantity;
        let mut remaining = fill.quantity;

        let mut closed_now = Vec::new();
        if let Some(queue) = self.open.get_mut(fill.symbol) {
            while remaining > QUANTITY_EPSILON {
                let Some(front) = queue.front_mut() else {
                    break;
                };
                if front.side == opening_side {
                    break;
                }

                let take = remaining.min(front.quantity);
                let full = front.quantity - take <= QUANTITY_EPSILON;

                let mut record = if full {
                    match queue.pop_front() {
                        Some(record) => record,
                        None => break,
                    }
                } else {
                    let ratio = take / front.quantity;
                    let entry_commission = front.entry_commission * ratio;
                    front.entry_commission -= entry_commission;
                    front.quantity -= take;
                    let mut split = front.clone();
                    split.id = TradeId(self.next_id);
                    self.next_id += 1;
                    split.quantity = take;
                    split.entry_commission = entry_commission;
                    split
                };

                let per_unit = match record.side {
                    PositionSide::Long => fill.price - record.entry_price,
                    PositionSide::Short => record.entry_price - fill.price,
                    PositionSide::Flat => 0.0,
                };
                record.status = TradeStatus::Closed;
                record.exit_time = Some(fill.timestamp);
                record.exit_price = Some(fill.price);
                record.exit_commission = commission_per_unit * take;
                record.pnl = Some(per_unit * take);

                closed_now.push(record);
                remaining -= take;
            }
            if queue.is_empty() {
                self.open.remove(fill.symbol);
            }
        }

        self.closed.extend(closed_now.iter().cloned());
        update.closed = closed_now;

        if remaining > QUANTITY_EPSILON {
            let record = TradeRecord {
                id: self.next_id(),
                symbol: fill.symbol.to_string(),
                side: opening_side,
                status: TradeStatus::Open,
                rule_id: fill.rule_id.map(str::to_string),
                entry_time: fill.timestamp,
                entry_price: fill.price,
                entry_commission: commission_per_unit * remaining,
                exit_time: None,
                exit_price: None,
                exit_commission: 0.0,
                quantity: remaining,
                pnl: None,
            };
            self.open
                .entry(fill.symbol.to_string())
                .or_default()
                .push_back(record.clone());
            update.opened = Some(record);
        }

        update
    }

    /// Open trades, ordered by symbol then entry.
    pub fn open_trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.open.values().flatten()
    }

    pub fn open_count(&self) -> usize {
        self.open.values().map(VecDeque::len).sum()
    }

    pub fn closed_trades(&self) -> &[TradeRecord] {
        &self.closed
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
