//! Single-instrument holding with cost-basis and realized PnL accounting.
//!
//! All state transitions (open, add, reduce, close, flip) happen inside
//! [`Position::update`]. Marking to market only touches valuation fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Price differences smaller than this are treated as exactly zero.
pub const PRICE_EPSILON: f64 = 1e-10;

/// Remaining quantities smaller than this snap to flat.
pub const QUANTITY_EPSILON: f64 = 1e-10;

/// Direction of a holding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionSide {
    Long,
    Short,
    Flat,
}

impl PositionSide {
    pub fn from_quantity(quantity: f64) -> Self {
        if quantity > 0.0 {
            PositionSide::Long
        } else if quantity < 0.0 {
            PositionSide::Short
        } else {
            PositionSide::Flat
        }
    }
}

/// What a single update did to the position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Flat → long/short.
    Open,
    /// Same-sign increase.
    Add,
    /// Opposite-sign decrease that leaves the direction unchanged.
    Reduce,
    /// Opposite-sign decrease to exactly flat.
    Close,
    /// Closes the whole position and opens the excess in the other direction.
    Flip,
}

impl TransactionKind {
    /// Whether the transaction closed any quantity (and therefore realized PnL).
    pub fn is_closing(self) -> bool {
        matches!(
            self,
            TransactionKind::Reduce | TransactionKind::Close | TransactionKind::Flip
        )
    }
}

/// Audit record of one [`Position::update`] call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub timestamp: DateTime<Utc>,
    pub quantity_change: f64,
    pub price: f64,
    pub kind: TransactionKind,
    /// Quantity of the pre-existing position closed by this transaction.
    pub closed_quantity: f64,
    /// Cost basis the closed quantity was carried at.
    pub closed_cost_basis: f64,
    pub realized_pnl: f64,
    /// Signed quantity after the transaction.
    pub quantity_after: f64,
}

/// Point-in-time copy of a position, used for history and outbound events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub symbol: String,
    pub side: PositionSide,
    pub quantity: f64,
    pub cost_basis: f64,
    pub current_price: f64,
    pub market_value: f64,
    pub unrealized_pnl: f64,
    pub realized_pnl: f64,
    pub entry_time: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

/// Single-instrument holding.
///
/// `quantity` is signed: positive long, negative short, zero flat.
/// `cost_basis` is always the volume-weighted average entry price of the
/// currently open quantity; reductions leave it untouched and a flip resets it
/// to the flip price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    symbol: String,
    quantity: f64,
    cost_basis: f64,
    /// `|quantity| * cost_basis`, maintained incrementally.
    open_cost: f64,
    realized_pnl: f64,
    current_price: f64,
    entry_time: Option<DateTime<Utc>>,
    last_update: Option<DateTime<Utc>>,
    transactions: Vec<Transaction>,
}

impl Position {
    /// A flat position with no history.
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: 0.0,
            cost_basis: 0.0,
            open_cost: 0.0,
            realized_pnl: 0.0,
            current_price: 0.0,
            entry_time: None,
            last_update: None,
            transactions: Vec::new(),
        }
    }

    /// Apply a signed quantity change at `price`. Returns the PnL realized by
    /// this transaction (zero for opens and adds).
    pub fn update(&mut self, quantity_change: f64, price: f64, timestamp: DateTime<Utc>) -> f64 {
        if quantity_change == 0.0 {
            return 0.0;
        }

        self.current_price = price;
        self.last_update = Some(timestamp);

        let mut closed_quantity = 0.0;
        let mut closed_cost_basis = 0.0;
        let mut realized = 0.0;

        let kind = if self.is_flat() {
            self.quantity = quantity_change;
            self.cost_basis = price;
            self.open_cost = quantity_change.abs() * price;
            self.entry_time = Some(timestamp);
            TransactionKind::Open
        } else if self.quantity.signum() == quantity_change.signum() {
            self.open_cost += quantity_change.abs() * price;
            self.quantity += quantity_change;
            self.cost_basis = self.open_cost / self.quantity.abs();
            TransactionKind::Add
        } else {
            closed_quantity = quantity_change.abs().min(self.quantity.abs());
            closed_cost_basis = self.cost_basis;

            let mut price_diff = if self.quantity > 0.0 {
                price - self.cost_basis
            } else {
                self.cost_basis - price
            };
            if price_diff.abs() < PRICE_EPSILON {
                price_diff = 0.0;
            }

            realized = closed_quantity * price_diff;
            self.realized_pnl += realized;

            let mut remaining = self.quantity + quantity_change;
            if remaining.abs() < QUANTITY_EPSILON {
                remaining = 0.0;
            }

            if remaining == 0.0 {
                self.quantity = 0.0;
                self.cost_basis = 0.0;
                self.open_cost = 0.0;
                self.entry_time = None;
                TransactionKind::Close
            } else if remaining.signum() == self.quantity.signum() {
                self.open_cost *= remaining.abs() / self.quantity.abs();
                self.quantity = remaining;
                TransactionKind::Reduce
            } else {
                self.quantity = remaining;
                self.cost_basis = price;
                self.open_cost = remaining.abs() * price;
                self.entry_time = Some(timestamp);
                TransactionKind::Flip
            }
        };

        self.transactions.push(Transaction {
            timestamp,
            quantity_change,
            price,
            kind,
            closed_quantity,
            closed_cost_basis,
            realized_pnl: realized,
            quantity_after: self.quantity,
        });

        realized
    }

    /// Revalue at `price`. Never changes quantity, cost basis or realized PnL.
    pub fn mark_to_market(&mut self, price: f64) {
        self.current_price = price;
    }

    pub fn unrealized_pnl(&self) -> f64 {
        match self.side() {
            PositionSide::Long => self.quantity * (self.current_price - self.cost_basis),
            PositionSide::Short => self.quantity.abs() * (self.cost_basis - self.current_price),
            PositionSide::Flat => 0.0,
        }
    }

    /// Unrealized PnL as a percentage of the open cost.
    pub fn unrealized_pnl_percent(&self) -> f64 {
        if self.is_flat() || self.open_cost <= 0.0 {
            return 0.0;
        }
        self.unrealized_pnl() / self.open_cost * 100.0
    }

    /// Signed market value; negative for shorts.
    pub fn market_value(&self) -> f64 {
        self.quantity * self.current_price
    }

    pub fn total_pnl(&self) -> f64 {
        self.realized_pnl + self.unrealized_pnl()
    }

    pub fn side(&self) -> PositionSide {
        PositionSide::from_quantity(self.quantity)
    }

    pub fn is_flat(&self) -> bool {
        self.quantity == 0.0
    }

    pub fn is_long(&self) -> bool {
        self.quantity > 0.0
    }

    pub fn is_short(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn quantity(&self) -> f64 {
        self.quantity
    }

    pub fn cost_basis(&self) -> f64 {
        self.cost_basis
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn current_price(&self) -> f64 {
        self.current_price
    }

    pub fn entry_time(&self) -> Option<DateTime<Utc>> {
        self.entry_time
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn last_transaction(&self) -> Option<&Transaction> {
        self.transactions.last()
    }

    pub fn snapshot(&self) -> PositionSnapshot {
        PositionSnapshot {
            symbol: self.symbol.clone(),
            side: self.side(),
            quantity: self.quantity,
            cost_basis: self.cost_basis,
            current_price: self.current_price,
            market_value: self.market_value(),
            unrealized_pnl: self.unrealized_pnl(),
            realized_pnl: self.realized_pnl,
            entry_time: self.entry_time,
            last_update: self.last_update,
        }
    }
}
