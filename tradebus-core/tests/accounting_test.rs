//! Portfolio accounting driven end to end through the event bus.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::cell::RefCell;
use std::rc::Rc;
use tradebus_core::bus::{EventBus, HandlerRef};
use tradebus_core::config::{BusConfig, EquityGuardConfig, PortfolioConfig};
use tradebus_core::domain::{PositionSide, Side};
use tradebus_core::engine::{FillOutcome, PortfolioManager};
use tradebus_core::event::{BarPayload, Event, EventKind, EventPayload, FillPayload};

fn t(day: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 1, 21, 0, 0).unwrap() + Duration::days(day)
}

fn wired(initial_cash: f64) -> (EventBus, Rc<RefCell<PortfolioManager>>) {
    let mut bus = EventBus::new(BusConfig::default());
    let pm = Rc::new(RefCell::new(PortfolioManager::with_initial_cash(initial_cash)));
    PortfolioManager::attach(&pm, &mut bus).unwrap();
    (bus, pm)
}

fn collect(bus: &mut EventBus, kind: EventKind) -> Rc<RefCell<Vec<Event>>> {
    let seen = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&seen);
    bus.subscribe(
        kind,
        HandlerRef::from_fn(format!("collect-{kind}"), move |event, _bus| {
            sink.borrow_mut().push(event.clone());
            Ok(())
        }),
        100,
    )
    .unwrap();
    seen
}

#[test]
fn buy_mark_sell_scenario() {
    let (mut bus, pm) = wired(100_000.0);
    let updates = collect(&mut bus, EventKind::PortfolioUpdate);

    bus.publish(Event::fill(
        FillPayload::new("SPY", Side::Buy, 100.0, 100.0).with_order_id("o-1"),
        t(0),
    ));
    bus.publish(Event::bar(BarPayload::flat("SPY", 110.0), t(1)));
    bus.publish(Event::fill(
        FillPayload::new("SPY", Side::Sell, 100.0, 110.0).with_order_id("o-2"),
        t(2),
    ));

    let pm = pm.borrow();
    assert!((pm.cash() - 101_000.0).abs() < 1e-9);
    assert!((pm.equity() - 101_000.0).abs() < 1e-9);
    assert!((pm.tracker().total_realized_pnl() - 1_000.0).abs() < 1e-9);
    assert!(pm.tracker().get_position("SPY").unwrap().is_flat());

    let updates = updates.borrow();
    assert_eq!(updates.len(), 3);
    match updates[1].payload() {
        EventPayload::PortfolioUpdate(update) => {
            assert!((update.equity - 101_000.0).abs() < 1e-9);
            assert!((update.unrealized_pnl - 1_000.0).abs() < 1e-9);
            assert_eq!(update.positions.len(), 1);
        }
        other => panic!("unexpected payload {other:?}"),
    }
}

#[test]
fn flip_scenario_realizes_and_reopens() {
    let (mut bus, pm) = wired(100_000.0);
    let closes = collect(&mut bus, EventKind::TradeClose);
    let opens = collect(&mut bus, EventKind::TradeOpen);

    bus.publish(Event::fill(FillPayload::new("SPY", Side::Buy, 100.0, 100.0), t(0)));
    bus.publish(Event::fill(FillPayload::new("SPY", Side::Sell, 150.0, 105.0), t(1)));

    let pm = pm.borrow();
    let position = pm.tracker().get_position("SPY").unwrap();
    assert_eq!(position.side(), PositionSide::Short);
    assert!((position.quantity() + 50.0).abs() < 1e-9);
    assert!((position.cost_basis() - 105.0).abs() < 1e-9);
    assert!((position.realized_pnl() - 500.0).abs() < 1e-9);

    // cash: 100000 - 10000 + 15750
    assert!((pm.cash() - 105_750.0).abs() < 1e-9);
    // equity: cash - 50 * 105
    assert!((pm.equity() - 100_500.0).abs() < 1e-9);

    assert_eq!(opens.borrow().len(), 2);
    assert_eq!(closes.borrow().len(), 1);
    match closes.borrow()[0].payload() {
        EventPayload::TradeClose(trade) => {
            assert_eq!(trade.side, PositionSide::Long);
            assert!((trade.pnl.unwrap() - 500.0).abs() < 1e-9);
        }
        other => panic!("unexpected payload {other:?}"),
    };
}

#[test]
fn redelivered_fill_without_order_id_is_idempotent() {
    let (mut bus, pm) = wired(50_000.0);
    let fill = FillPayload::new("QQQ", Side::Buy, 10.0, 400.0);

    // No order id: the bus cannot dedup, the accountant's fill identity does.
    bus.publish(Event::fill(fill.clone(), t(0)));
    bus.publish(Event::fill(fill, t(0)));

    let pm = pm.borrow();
    assert!((pm.cash() - 46_000.0).abs() < 1e-9);
    assert_eq!(pm.fill_stats().fills_processed, 1);
    assert_eq!(pm.fill_stats().fills_duplicate, 1);
}

#[test]
fn closed_book_equation_holds_after_every_event() {
    let mut bus = EventBus::default();
    let pm = Rc::new(RefCell::new(PortfolioManager::new(PortfolioConfig {
        initial_cash: 20_000.0,
        equity_guard: EquityGuardConfig::disabled(),
        ..PortfolioConfig::default()
    })));
    PortfolioManager::attach(&pm, &mut bus).unwrap();

    let script = [
        Event::fill(FillPayload::new("AAA", Side::Buy, 50.0, 100.0).with_commission(1.0), t(0)),
        Event::fill(FillPayload::new("BBB", Side::Sell, 20.0, 50.0).with_commission(1.0), t(0)),
        Event::bar(BarPayload::flat("AAA", 104.0), t(1)),
        Event::bar(BarPayload::flat("BBB", 47.5), t(1)),
        Event::fill(FillPayload::new("AAA", Side::Sell, 20.0, 103.0), t(2)),
        Event::fill(FillPayload::new("BBB", Side::Buy, 30.0, 48.0), t(3)),
        Event::bar(BarPayload::flat("BBB", 49.0), t(4)),
    ];

    for event in script {
        bus.publish(event);
        let pm = pm.borrow();
        let positions_value = pm.tracker().total_market_value();
        assert!((pm.equity() - (pm.cash() + positions_value)).abs() < 1e-9);

        let stats = pm.fill_stats();
        let book = pm.initial_cash() + stats.realized_pnl + pm.tracker().total_unrealized_pnl()
            - stats.total_commission;
        assert!((pm.equity() - book).abs() < 1e-9);
    }
}

#[test]
fn insufficient_cash_leaves_state_untouched() {
    let (mut bus, pm) = wired(1_000.0);
    let updates = collect(&mut bus, EventKind::PortfolioUpdate);

    bus.publish(Event::fill(FillPayload::new("SPY", Side::Buy, 100.0, 100.0), t(0)));

    let pm_ref = pm.borrow();
    assert_eq!(pm_ref.cash(), 1_000.0);
    assert!(pm_ref.tracker().get_position("SPY").is_none());
    assert_eq!(pm_ref.fill_stats().fills_rejected, 1);
    assert!(updates.borrow().is_empty());
    drop(pm_ref);

    let outcome = pm
        .borrow_mut()
        .on_fill(&FillPayload::new("SPY", Side::Buy, 5.0, 100.0), t(1));
    assert_eq!(outcome, FillOutcome::Applied { realized_pnl: 0.0 });
}

#[test]
fn equity_guard_clamps_corrupt_price() {
    let (mut bus, pm) = wired(100_000.0);
    bus.publish(Event::fill(FillPayload::new("SPY", Side::Buy, 100.0, 100.0), t(0)));
    // A bad print values the position at 1,000,000.
    bus.publish(Event::bar(BarPayload::flat("SPY", 10_000.0), t(1)));

    let pm = pm.borrow();
    assert!((pm.equity() - 125_000.0).abs() < 1e-9);
    assert_eq!(pm.summary().equity_clamps, 1);
}

#[test]
fn drawdown_and_summary() {
    let (mut bus, pm) = wired(10_000.0);
    bus.publish(Event::fill(FillPayload::new("SPY", Side::Buy, 10.0, 100.0), t(0)));
    bus.publish(Event::bar(BarPayload::flat("SPY", 120.0), t(1)));
    bus.publish(Event::bar(BarPayload::flat("SPY", 90.0), t(2)));

    let summary = pm.borrow().summary();
    assert!((summary.peak_equity - 10_200.0).abs() < 1e-9);
    assert!((summary.max_drawdown - 300.0).abs() < 1e-9);
    assert!((summary.max_drawdown_pct - 300.0 / 10_200.0 * 100.0).abs() < 1e-9);
    assert_eq!(summary.equity_points, 3);
    assert_eq!(summary.trades_open, 1);
    assert_eq!(summary.open_positions.len(), 1);

    let json = serde_json::to_string(&summary).unwrap();
    assert!(json.contains("\"max_drawdown_pct\""));
}

#[test]
fn dropping_the_accountant_detaches_it() {
    let (mut bus, pm) = wired(10_000.0);
    assert_eq!(bus.subscriber_count(EventKind::Fill), 1);
    drop(pm);
    assert_eq!(
        bus.publish(Event::fill(FillPayload::new("SPY", Side::Buy, 1.0, 1.0), t(0))),
        0
    );
    assert!(!bus.has_subscribers(EventKind::Fill));
}

#[test]
fn fill_published_from_portfolio_update_reaches_the_accountant() {
    let (mut bus, pm) = wired(100_000.0);
    let closes = collect(&mut bus, EventKind::TradeClose);

    // Liquidates the whole position on the first update it sees.
    let mut fired = false;
    bus.subscribe(
        EventKind::PortfolioUpdate,
        HandlerRef::from_fn("liquidator", move |event, bus| {
            if !fired {
                fired = true;
                let liquidation =
                    FillPayload::new("SPY", Side::Sell, 100.0, 100.0).with_order_id("liq-1");
                bus.publish(Event::fill(liquidation, event.timestamp()));
            }
            Ok(())
        }),
        50,
    )
    .unwrap();

    bus.publish(Event::fill(
        FillPayload::new("SPY", Side::Buy, 100.0, 100.0).with_order_id("o-1"),
        t(0),
    ));

    {
        let pm = pm.borrow();
        assert!(pm.tracker().get_position("SPY").unwrap().is_flat());
        assert!((pm.cash() - 100_000.0).abs() < 1e-9);
        assert_eq!(pm.fill_stats().fills_processed, 2);
    }
    assert_eq!(closes.borrow().len(), 1);
    assert_eq!(bus.stats().handler_failures, 0);
    assert_eq!(bus.stats().deliveries_deferred, 1);

    // Delivered exactly once: a redelivery is a bus duplicate.
    let again = FillPayload::new("SPY", Side::Sell, 100.0, 100.0).with_order_id("liq-1");
    assert_eq!(bus.publish(Event::fill(again, t(1))), 0);
    assert!((pm.borrow().cash() - 100_000.0).abs() < 1e-9);
}
