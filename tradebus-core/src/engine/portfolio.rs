//! Portfolio accountant: cash, equity and the position tracker, driven by
//! FILL and BAR events.
//!
//! Every state change is followed by a PORTFOLIO_UPDATE event. Fills that open
//! or close trade records additionally produce TRADE_OPEN / TRADE_CLOSE events.
//! Outbound events are queued while a fill or bar is applied and published by
//! the [`EventHandler`] impl once the update is complete.

use super::accounting::{EquityGuard, EquityPoint, EquityTracker};
use super::trade_ledger::{LedgerFill, TradeLedger};
use super::tracker::{ClosedPositionStats, PositionTracker};
use crate::bus::{EventBus, EventHandler, HandlerRef, SubscriptionId};
use crate::config::PortfolioConfig;
use crate::domain::{PositionSnapshot, Side, TradeRecord};
use crate::error::{BusError, HandlerError};
use crate::event::{BarPayload, Event, EventKind, EventPayload, FillPayload, PortfolioUpdatePayload};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;
use tracing::{debug, warn};

/// What happened to a fill handed to [`PortfolioManager::on_fill`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FillOutcome {
    Applied { realized_pnl: f64 },
    /// Identity already processed; nothing changed.
    Duplicate,
    /// Buy notional exceeded available cash; nothing changed.
    Rejected,
    /// Quantity or price was unusable; identity recorded, nothing else changed.
    Ignored,
}

/// Fill counters for one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FillStats {
    pub fills_processed: u64,
    pub fills_rejected: u64,
    pub fills_duplicate: u64,
    pub fills_ignored: u64,
    /// Closing transactions with positive realized PnL.
    pub winning_fills: u64,
    pub losing_fills: u64,
    pub breakeven_fills: u64,
    pub total_commission: f64,
    pub realized_pnl: f64,
}

/// Serializable end-of-run report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub initial_cash: f64,
    pub cash: f64,
    pub equity: f64,
    pub positions_value: f64,
    pub total_return_pct: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub peak_equity: f64,
    pub max_drawdown: f64,
    pub max_drawdown_pct: f64,
    pub current_drawdown_pct: f64,
    pub equity_points: usize,
    pub equity_clamps: u64,
    pub fills: FillStats,
    pub closed_positions: ClosedPositionStats,
    pub trades_open: usize,
    pub trades_closed: usize,
    pub open_positions: Vec<PositionSnapshot>,
}

pub struct PortfolioManager {
    config: PortfolioConfig,
    initial_cash: f64,
    cash: f64,
    equity: f64,
    positions_value: f64,
    tracker: PositionTracker,
    equity_tracker: EquityTracker,
    guard: EquityGuard,
    trades: TradeLedger,
    processed_fills: HashSet<String>,
    stats: FillStats,
    outbox: Vec<Event>,
}

impl PortfolioManager {
    pub fn new(config: PortfolioConfig) -> Self {
        let initial_cash = config.initial_cash;
        let guard = EquityGuard::new(config.equity_guard.clone());
        Self {
            config,
            initial_cash,
            cash: initial_cash,
            equity: initial_cash,
            positions_value: 0.0,
            tracker: PositionTracker::new(),
            equity_tracker: EquityTracker::new(initial_cash),
            guard,
            trades: TradeLedger::new(),
            processed_fills: HashSet::new(),
            stats: FillStats::default(),
            outbox: Vec::new(),
        }
    }

    pub fn with_initial_cash(initial_cash: f64) -> Self {
        Self::new(PortfolioConfig::with_initial_cash(initial_cash))
    }

    /// Subscribe `this` to FILL and BAR without keeping it alive.
    pub fn attach(this: &Rc<RefCell<Self>>, bus: &mut EventBus) -> Result<Vec<SubscriptionId>, BusError> {
        let priority = this.borrow().config.priority;
        let handler = HandlerRef::component(this);
        let fill = bus.subscribe(EventKind::Fill, handler.clone(), priority)?;
        let bar = bus.subscribe(EventKind::Bar, handler, priority)?;
        Ok(vec![fill, bar])
    }

    /// Identity used to recognise a repeated fill.
    pub fn fill_identity(fill: &FillPayload, timestamp: DateTime<Utc>) -> String {
        match &fill.fill_id {
            Some(id) => id.clone(),
            None => format!(
                "{}_{}_{}_{}_{}",
                fill.symbol,
                fill.direction,
                fill.quantity,
                fill.price,
                timestamp.to_rfc3339()
            ),
        }
    }

    /// Apply a fill to positions and cash.
    pub fn on_fill(&mut self, fill: &FillPayload, timestamp: DateTime<Utc>) -> FillOutcome {
        let identity = Self::fill_identity(fill, timestamp);
        if self.processed_fills.contains(&identity) {
            self.stats.fills_duplicate += 1;
            debug!(fill = %identity, "duplicate fill ignored");
            return FillOutcome::Duplicate;
        }

        let quantity = sanitize(fill.quantity, "quantity", &fill.symbol);
        let price = sanitize(fill.price, "price", &fill.symbol);
        let commission = fill
            .commission
            .map_or(0.0, |c| sanitize(c, "commission", &fill.symbol));

        if quantity == 0.0 || price == 0.0 {
            warn!(symbol = %fill.symbol, quantity, price, "fill has no usable size, ignored");
            self.processed_fills.insert(identity);
            self.stats.fills_ignored += 1;
            return FillOutcome::Ignored;
        }

        let notional = quantity * price;
        if fill.direction == Side::Buy && notional > self.cash {
            warn!(
                symbol = %fill.symbol,
                notional,
                cash = self.cash,
                "insufficient cash, fill rejected"
            );
            self.stats.fills_rejected += 1;
            return FillOutcome::Rejected;
        }

        self.processed_fills.insert(identity);

        let quantity_change = fill.direction.sign() * quantity;
        let (position, realized) =
            self.tracker
                .update_position(&fill.symbol, quantity_change, price, timestamp);
        let closing = position
            .last_transaction()
            .is_some_and(|tx| tx.kind.is_closing());

        match fill.direction {
            Side::Buy => self.cash -= notional,
            Side::Sell => self.cash += notional,
        }
        self.cash -= commission;

        self.stats.fills_processed += 1;
        self.stats.total_commission += commission;
        self.stats.realized_pnl += realized;
        if closing {
            if realized > 0.0 {
                self.stats.winning_fills += 1;
            } else if realized < 0.0 {
                self.stats.losing_fills += 1;
            } else {
                self.stats.breakeven_fills += 1;
            }
        }

        let update = self.trades.apply(LedgerFill {
            symbol: &fill.symbol,
            side: fill.direction,
            quantity,
            price,
            commission,
            rule_id: fill.rule_id.as_deref(),
            timestamp,
        });
        for trade in update.closed {
            self.outbox.push(Event::trade_close(trade, timestamp));
        }
        if let Some(trade) = update.opened {
            self.outbox.push(Event::trade_open(trade, timestamp));
        }

        debug!(
            symbol = %fill.symbol,
            side = %fill.direction,
            quantity,
            price,
            realized,
            cash = self.cash,
            "fill applied"
        );

        self.update_equity(timestamp);
        self.queue_portfolio_update(timestamp);
        FillOutcome::Applied {
            realized_pnl: realized,
        }
    }

    /// Mark the bar's symbol to its close and revalue the portfolio.
    pub fn on_bar(&mut self, bar: &BarPayload, timestamp: DateTime<Utc>) {
        if bar.close.is_finite() && bar.close > 0.0 {
            self.tracker.mark_symbol(&bar.symbol, bar.close);
        } else {
            warn!(symbol = %bar.symbol, close = bar.close, "bar has no usable close, not marked");
        }
        self.update_equity(timestamp);
        self.queue_portfolio_update(timestamp);
    }

    /// Recompute equity from cash and position values, apply the sanity
    /// guard and record the result on the equity curve.
    pub fn update_equity(&mut self, timestamp: DateTime<Utc>) -> f64 {
        let positions_value = self.tracker.total_market_value();
        let mut equity = self.cash + positions_value;
        if !equity.is_finite() {
            warn!(cash = self.cash, positions_value, "non-finite equity, falling back to cash");
            equity = self.cash;
        }

        let equity = self.guard.apply(equity, self.equity, self.initial_cash);

        self.positions_value = positions_value;
        self.equity = equity;
        self.equity_tracker.record(EquityPoint {
            timestamp,
            equity,
            cash: self.cash,
            positions_value,
        });
        equity
    }

    fn queue_portfolio_update(&mut self, timestamp: DateTime<Utc>) {
        let payload = PortfolioUpdatePayload {
            cash: self.cash,
            equity: self.equity,
            positions_value: self.positions_value,
            realized_pnl: self.tracker.total_realized_pnl(),
            unrealized_pnl: self.tracker.total_unrealized_pnl(),
            positions: self.tracker.snapshots(),
        };
        self.outbox.push(Event::new(payload, timestamp));
    }

    /// Events produced since the last drain, in the order they were produced.
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.outbox)
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn cash(&self) -> f64 {
        self.cash
    }

    pub fn equity(&self) -> f64 {
        self.equity
    }

    pub fn initial_cash(&self) -> f64 {
        self.initial_cash
    }

    pub fn positions_value(&self) -> f64 {
        self.positions_value
    }

    pub fn tracker(&self) -> &PositionTracker {
        &self.tracker
    }

    pub fn equity_tracker(&self) -> &EquityTracker {
        &self.equity_tracker
    }

    pub fn closed_trades(&self) -> &[TradeRecord] {
        self.trades.closed_trades()
    }

    pub fn open_trades(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.open_trades()
    }

    pub fn fill_stats(&self) -> &FillStats {
        &self.stats
    }

    pub fn config(&self) -> &PortfolioConfig {
        &self.config
    }

    pub fn total_return_pct(&self) -> f64 {
        if self.initial_cash > 0.0 {
            (self.equity - self.initial_cash) / self.initial_cash * 100.0
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> PortfolioSummary {
        PortfolioSummary {
            initial_cash: self.initial_cash,
            cash: self.cash,
            equity: self.equity,
            positions_value: self.positions_value,
            total_return_pct: self.total_return_pct(),
            realized_pnl: self.tracker.total_realized_pnl(),
            unrealized_pnl: self.tracker.total_unrealized_pnl(),
            peak_equity: self.equity_tracker.peak_equity(),
            max_drawdown: self.equity_tracker.max_drawdown(),
            max_drawdown_pct: self.equity_tracker.max_drawdown_pct(),
            current_drawdown_pct: self.equity_tracker.current_drawdown_pct(),
            equity_points: self.equity_tracker.curve().len(),
            equity_clamps: self.guard.clamps(),
            fills: self.stats.clone(),
            closed_positions: self.tracker.closed_stats(),
            trades_open: self.trades.open_count(),
            trades_closed: self.trades.closed_trades().len(),
            open_positions: self.tracker.snapshots(),
        }
    }

    /// Restore the initial state for a new run. Configuration is kept.
    pub fn reset(&mut self) {
        self.cash = self.initial_cash;
        self.equity = self.initial_cash;
        self.positions_value = 0.0;
        self.tracker.reset();
        self.equity_tracker.reset(self.initial_cash);
        self.guard.reset();
        self.trades.reset();
        self.processed_fills.clear();
        self.stats = FillStats::default();
        self.outbox.clear();
    }
}

impl EventHandler for PortfolioManager {
    fn handle(&mut self, event: &mut Event, bus: &mut EventBus) -> Result<(), HandlerError> {
        let timestamp = event.timestamp();
        match event.payload() {
            EventPayload::Fill(fill) => {
                self.on_fill(fill, timestamp);
            }
            EventPayload::Bar(bar) => self.on_bar(bar, timestamp),
            _ => return Err(HandlerError::UnexpectedEvent { kind: event.kind() }),
        }
        for outbound in self.drain_events() {
            bus.publish(outbound);
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "portfolio"
    }
}

/// Non-finite or negative inputs fall back to zero.
fn sanitize(value: f64, field: &str, symbol: &str) -> f64 {
    if value.is_finite() && value >= 0.0 {
        value
    } else {
        warn!(symbol, field, value, "invalid fill field, using 0");
        0.0
    }
}
