//! Criterion benchmarks for tradebus hot paths.
//!
//! Benchmarks:
//! 1. Publish throughput with a growing number of subscribers
//! 2. Deduplicated publish (order-keyed FILL events)
//! 3. Fill application through the portfolio accountant

use chrono::{DateTime, Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use std::cell::RefCell;
use std::rc::Rc;

use tradebus_core::bus::{EventBus, HandlerRef};
use tradebus_core::config::{BusConfig, EquityGuardConfig, PortfolioConfig};
use tradebus_core::domain::Side;
use tradebus_core::engine::PortfolioManager;
use tradebus_core::event::{BarPayload, Event, EventKind, FillPayload};

// ── Helpers ──────────────────────────────────────────────────────────

fn t(i: usize) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2020, 1, 2, 14, 30, 0).unwrap() + Duration::seconds(i as i64)
}

fn make_fills(n: usize) -> Vec<FillPayload> {
    (0..n)
        .map(|i| {
            let side = if i % 3 == 2 { Side::Sell } else { Side::Buy };
            let price = 100.0 + (i as f64 * 0.1).sin() * 10.0;
            FillPayload::new("SPY", side, 10.0, price)
                .with_commission(1.0)
                .with_order_id(format!("o-{i}"))
        })
        .collect()
}

// ── 1. Publish throughput ────────────────────────────────────────────

fn bench_publish(c: &mut Criterion) {
    let mut group = c.benchmark_group("publish_bar");
    for subscribers in [1usize, 8, 32] {
        group.bench_with_input(
            BenchmarkId::from_parameter(subscribers),
            &subscribers,
            |b, &n| {
                let counter = Rc::new(RefCell::new(0u64));
                let mut bus = EventBus::new(BusConfig {
                    deduplication: false,
                    ..BusConfig::default()
                });
                for i in 0..n {
                    let counter = Rc::clone(&counter);
                    bus.subscribe(
                        EventKind::Bar,
                        HandlerRef::from_fn(format!("h{i}"), move |_event, _bus| {
                            *counter.borrow_mut() += 1;
                            Ok(())
                        }),
                        i as i32,
                    )
                    .unwrap();
                }
                b.iter(|| {
                    let event = Event::bar(BarPayload::flat("SPY", 100.0), t(0));
                    black_box(bus.publish(event))
                });
            },
        );
    }
    group.finish();
}

// ── 2. Deduplicated publish ──────────────────────────────────────────

fn bench_dedup(c: &mut Criterion) {
    let fills = make_fills(1_000);
    c.bench_function("publish_fill_dedup_1000", |b| {
        b.iter(|| {
            let mut bus = EventBus::default();
            bus.subscribe(EventKind::Fill, HandlerRef::from_fn("noop", |_e, _b| Ok(())), 0)
                .unwrap();
            for (i, fill) in fills.iter().enumerate() {
                bus.publish(Event::fill(fill.clone(), t(i)));
                // Second delivery hits the dedup set.
                bus.publish(Event::fill(fill.clone(), t(i)));
            }
            black_box(bus.stats().duplicates_dropped)
        });
    });
}

// ── 3. Fill application ──────────────────────────────────────────────

fn bench_portfolio(c: &mut Criterion) {
    let fills = make_fills(1_000);
    c.bench_function("portfolio_on_fill_1000", |b| {
        b.iter(|| {
            let mut pm = PortfolioManager::new(PortfolioConfig {
                initial_cash: 1e9,
                equity_guard: EquityGuardConfig::disabled(),
                ..PortfolioConfig::default()
            });
            for (i, fill) in fills.iter().enumerate() {
                pm.on_fill(fill, t(i));
            }
            pm.drain_events();
            black_box(pm.equity())
        });
    });

    c.bench_function("portfolio_via_bus_1000", |b| {
        b.iter(|| {
            let mut bus = EventBus::default();
            let pm = Rc::new(RefCell::new(PortfolioManager::with_initial_cash(1e9)));
            PortfolioManager::attach(&pm, &mut bus).unwrap();
            for (i, fill) in fills.iter().enumerate() {
                bus.publish(Event::fill(fill.clone(), t(i)));
                if i % 10 == 0 {
                    bus.publish(Event::bar(BarPayload::flat("SPY", fill.price), t(i)));
                }
            }
            let equity = pm.borrow().equity();
            black_box(equity)
        });
    });
}

criterion_group!(benches, bench_publish, bench_dedup, bench_portfolio);
criterion_main!(benches);
