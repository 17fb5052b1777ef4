//! Synchronous, priority-ordered, re-entrant event dispatch.
//!
//! `publish` runs every matching handler on the caller's stack before it
//! returns. Handlers may publish further events, which are dispatched
//! depth-first inside the outer call. Each dispatch walks a snapshot of the
//! subscriber list, so subscribe/unsubscribe from inside a handler only affects
//! later dispatches.
//!
//! A handler that is still mid-call when a nested dispatch reaches it cannot
//! be borrowed again. Such deliveries are deferred and run as soon as that
//! handler's current call returns, still inside the outermost `publish`.
//!
//! Handler panics are caught and counted. The process panic hook still runs,
//! so the default hook prints the panic message to stderr as well.
//!
//! Per-run state (dedup keys, counters, batch queue) is cleared by
//! [`EventBus::reset`]; subscriptions survive it.

pub mod handler;
pub mod metrics;

pub use handler::{EventHandler, FnHandler, HandlerRef, SharedHandler};
pub use metrics::{BusStats, KindMetrics};

use crate::config::BusConfig;
use crate::error::{BusError, HandlerError};
use crate::event::{DedupKey, Event, EventKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use tracing::{debug, error, warn};

/// Token returned by [`EventBus::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

#[derive(Debug, Clone)]
struct Subscription {
    id: SubscriptionId,
    priority: i32,
    handler: HandlerRef,
}

/// Why a single handler invocation did not complete.
enum InvokeFailure {
    /// Handler is already mutably borrowed further up the stack.
    Busy,
    Failed(HandlerError),
    Panicked(String),
}

/// A delivery postponed because its handler was mid-call.
struct Deferred {
    handler: SharedHandler,
    subscription: SubscriptionId,
    event: Event,
}

pub struct EventBus {
    config: BusConfig,
    subscribers: BTreeMap<EventKind, Vec<Subscription>>,
    next_subscription_id: u64,
    seen: HashSet<DedupKey>,
    batching: bool,
    pending: Vec<Event>,
    stats: BusStats,
    metrics: BTreeMap<EventKind, KindMetrics>,
    replay_log: VecDeque<Event>,
    replaying: bool,
    deferred: Vec<Deferred>,
    depth: usize,
}

impl EventBus {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            subscribers: BTreeMap::new(),
            next_subscription_id: 1,
            seen: HashSet::new(),
            batching: false,
            pending: Vec::new(),
            stats: BusStats::default(),
            metrics: BTreeMap::new(),
            replay_log: VecDeque::new(),
            replaying: false,
            deferred: Vec::new(),
            depth: 0,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    // ── Subscriptions ──────────────────────────────────────────────

    /// Register `handler` for `kind`. Lower priority runs first; equal
    /// priorities run in subscribe order.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: HandlerRef,
        priority: i32,
    ) -> Result<SubscriptionId, BusError> {
        let subs = self.subscribers.entry(kind).or_default();
        if subs.iter().any(|s| s.handler.same_handler(&handler)) {
            return Err(BusError::DuplicateSubscription {
                kind,
                handler: handler.describe(),
            });
        }

        let id = SubscriptionId(self.next_subscription_id);
        self.next_subscription_id += 1;

        let pos = subs.partition_point(|s| s.priority <= priority);
        debug!(%kind, %id, priority, handler = %handler.describe(), "subscribed");
        subs.insert(pos, Subscription { id, priority, handler });
        Ok(id)
    }

    /// Remove the subscription of `handler` to `kind`, live or dead.
    pub fn unsubscribe(&mut self, kind: EventKind, handler: &HandlerRef) -> bool {
        let Some(subs) = self.subscribers.get_mut(&kind) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| !s.handler.same_handler(handler));
        before != subs.len()
    }

    /// Remove a subscription by its token.
    pub fn unsubscribe_id(&mut self, id: SubscriptionId) -> bool {
        for subs in self.subscribers.values_mut() {
            if let Some(pos) = subs.iter().position(|s| s.id == id) {
                subs.remove(pos);
                return true;
            }
        }
        false
    }

    /// Number of subscriptions (including not yet pruned dead ones) for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.subscribers.get(&kind).map_or(0, Vec::len)
    }

    pub fn has_subscribers(&self, kind: EventKind) -> bool {
        self.subscriber_count(kind) > 0
    }

    /// Drop subscriptions whose component has been destroyed. Returns how many were removed.
    pub fn prune_dead(&mut self) -> usize {
        let mut pruned = 0;
        for subs in self.subscribers.values_mut() {
            let before = subs.len();
            subs.retain(|s| s.handler.is_alive());
            pruned += before - subs.len();
        }
        if pruned > 0 {
            self.stats.subscriptions_pruned += pruned as u64;
            debug!(pruned, "pruned dead subscriptions");
        }
        pruned
    }

    // ── Dispatch ───────────────────────────────────────────────────

    /// Deliver `event` to its subscribers. Returns the number of handlers invoked.
    ///
    /// Returns 0 when the event is deferred by batch mode, dropped as a
    /// duplicate, or has no subscribers.
    pub fn publish(&mut self, event: Event) -> usize {
        if self.batching {
            self.pending.push(event);
            self.stats.events_batched += 1;
            return 0;
        }
        let dedup = self.config.deduplication && !self.replaying;
        self.dispatch(event, dedup)
    }

    fn dispatch(&mut self, event: Event, dedup: bool) -> usize {
        self.depth += 1;
        let invoked = self.deliver(event, dedup);
        self.depth -= 1;
        if self.depth == 0 && !self.deferred.is_empty() {
            self.flush_deferred();
        }
        invoked
    }

    fn deliver(&mut self, mut event: Event, dedup: bool) -> usize {
        let kind = event.kind();
        self.stats.events_published += 1;
        self.bump(kind, |m| m.published += 1);

        if dedup && !self.seen.insert(event.dedup_key()) {
            self.stats.duplicates_dropped += 1;
            self.bump(kind, |m| m.duplicates += 1);
            debug!(%kind, event_id = %event.id(), "duplicate event dropped");
            return 0;
        }

        if self.config.enable_replay && !self.replaying {
            self.record(&event);
        }

        // Snapshot: nested subscribe/unsubscribe must not disturb this walk.
        let snapshot = match self.subscribers.get(&kind) {
            Some(subs) if !subs.is_empty() => subs.clone(),
            _ => return 0,
        };
        self.stats.events_dispatched += 1;
        self.bump(kind, |m| m.dispatched += 1);

        let mut invoked = 0;
        let mut failures = 0;
        let mut dead = Vec::new();

        for sub in &snapshot {
            let Some(handler) = sub.handler.resolve() else {
                dead.push(sub.id);
                continue;
            };

            match self.invoke(&handler, &mut event) {
                Err(InvokeFailure::Busy) => {
                    self.stats.deliveries_deferred += 1;
                    debug!(%kind, subscription = %sub.id, "handler mid-call, delivery deferred");
                    self.deferred.push(Deferred {
                        handler,
                        subscription: sub.id,
                        event: event.clone(),
                    });
                }
                outcome => {
                    let (ok, failed) = self.settle(kind, sub.id, outcome);
                    invoked += ok;
                    failures += failed;
                }
            }

            if event.is_consumed() {
                self.stats.events_consumed += 1;
                self.bump(kind, |m| m.consumed += 1);
                debug!(%kind, subscription = %sub.id, "event consumed");
                break;
            }
        }

        if !dead.is_empty() {
            self.remove_subscriptions(kind, &dead);
        }

        self.count_invocations(kind, invoked, failures);
        invoked
    }

    fn invoke(&mut self, handler: &SharedHandler, event: &mut Event) -> Result<(), InvokeFailure> {
        let outcome = {
            let Ok(mut guard) = handler.try_borrow_mut() else {
                return Err(InvokeFailure::Busy);
            };
            let result = panic::catch_unwind(AssertUnwindSafe(|| guard.handle(event, self)));
            match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(err)) => Err(InvokeFailure::Failed(err)),
                Err(payload) => {
                    let message = payload
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| payload.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "unknown panic".to_string());
                    Err(InvokeFailure::Panicked(format!("{}: {message}", guard.name())))
                }
            }
        };
        self.run_deferred(handler);
        outcome
    }

    /// Log a finished invocation. Returns `(invoked, failures)`.
    fn settle(
        &self,
        kind: EventKind,
        subscription: SubscriptionId,
        outcome: Result<(), InvokeFailure>,
    ) -> (usize, u64) {
        match outcome {
            Ok(()) => (1, 0),
            Err(InvokeFailure::Failed(err)) => {
                error!(%kind, %subscription, error = %err, "handler failed");
                (1, 1)
            }
            Err(InvokeFailure::Panicked(message)) => {
                error!(%kind, %subscription, panic = %message, "handler panicked");
                (1, 1)
            }
            Err(InvokeFailure::Busy) => {
                warn!(%kind, %subscription, "handler borrowed outside the bus, delivery dropped");
                (0, 1)
            }
        }
    }

    fn count_invocations(&mut self, kind: EventKind, invoked: usize, failures: u64) {
        self.stats.handlers_invoked += invoked as u64;
        self.stats.handler_failures += failures;
        self.bump(kind, |m| {
            m.handlers_invoked += invoked as u64;
            m.handler_failures += failures;
        });
    }

    /// Run deliveries queued for `handler` while it was mid-call, in arrival order.
    fn run_deferred(&mut self, handler: &SharedHandler) {
        let target = Rc::as_ptr(handler) as *const ();
        while let Some(pos) = self
            .deferred
            .iter()
            .position(|d| std::ptr::eq(Rc::as_ptr(&d.handler) as *const (), target))
        {
            let deferred = self.deferred.remove(pos);
            self.run_one_deferred(deferred);
        }
    }

    fn run_one_deferred(&mut self, deferred: Deferred) {
        let Deferred {
            handler,
            subscription,
            mut event,
        } = deferred;
        let kind = event.kind();
        let outcome = self.invoke(&handler, &mut event);
        let (invoked, failures) = self.settle(kind, subscription, outcome);
        self.count_invocations(kind, invoked, failures);
    }

    /// Outermost dispatch is done: anything still queued belongs to a handler
    /// borrowed by the caller. Try each once.
    fn flush_deferred(&mut self) {
        self.depth += 1;
        while !self.deferred.is_empty() {
            let deferred = self.deferred.remove(0);
            self.run_one_deferred(deferred);
        }
        self.depth -= 1;
    }

    fn remove_subscriptions(&mut self, kind: EventKind, ids: &[SubscriptionId]) {
        if let Some(subs) = self.subscribers.get_mut(&kind) {
            let before = subs.len();
            subs.retain(|s| !ids.contains(&s.id));
            let pruned = before - subs.len();
            self.stats.subscriptions_pruned += pruned as u64;
            debug!(%kind, pruned, "pruned dead subscriptions");
        }
    }

    fn bump(&mut self, kind: EventKind, f: impl FnOnce(&mut KindMetrics)) {
        if self.config.enable_metrics {
            f(self.metrics.entry(kind).or_default());
        }
    }

    // ── Batching ───────────────────────────────────────────────────

    /// Start collecting published events without dispatching them.
    pub fn start_batch(&mut self) {
        if self.batching {
            debug!("batch already active");
            return;
        }
        self.batching = true;
    }

    /// Leave batch mode and publish the collected events in order.
    /// Returns the number of events replayed.
    pub fn end_batch(&mut self) -> usize {
        if !self.batching {
            return 0;
        }
        self.batching = false;
        let events = std::mem::take(&mut self.pending);
        let count = events.len();
        for event in events {
            self.publish(event);
        }
        count
    }

    /// Leave batch mode and drop the collected events. No dispatch, no dedup bookkeeping.
    pub fn discard_batch(&mut self) -> usize {
        self.batching = false;
        let count = self.pending.len();
        self.pending.clear();
        if count > 0 {
            debug!(count, "discarded batched events");
        }
        count
    }

    pub fn is_batching(&self) -> bool {
        self.batching
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    // ── Replay ─────────────────────────────────────────────────────

    fn record(&mut self, event: &Event) {
        if self.config.max_replay_events == 0 {
            return;
        }
        if self.replay_log.len() >= self.config.max_replay_events {
            self.replay_log.pop_front();
        }
        self.replay_log.push_back(event.clone());
    }

    /// Events recorded for replay, oldest first.
    pub fn recorded(&self) -> impl Iterator<Item = &Event> {
        self.replay_log.iter()
    }

    pub fn recorded_len(&self) -> usize {
        self.replay_log.len()
    }

    /// Re-dispatch every recorded event in order, bypassing deduplication.
    /// Returns the number of events replayed.
    pub fn replay(&mut self) -> usize {
        if self.replaying {
            warn!("replay requested while already replaying, ignored");
            return 0;
        }
        let events: Vec<Event> = self.replay_log.iter().cloned().collect();
        self.replaying = true;
        for mut event in events.iter().cloned() {
            event.clear_consumed();
            self.dispatch(event, false);
        }
        self.replaying = false;
        events.len()
    }

    pub fn clear_replay(&mut self) {
        self.replay_log.clear();
    }

    // ── Run state ──────────────────────────────────────────────────

    /// Clear per-run state. Subscriptions and the replay log are kept.
    pub fn reset(&mut self) {
        self.seen.clear();
        self.pending.clear();
        self.deferred.clear();
        self.batching = false;
        self.metrics.clear();
        self.prune_dead();
        self.stats = BusStats::default();
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }

    /// Per-kind metrics; empty unless `enable_metrics` is set.
    pub fn metrics(&self) -> &BTreeMap<EventKind, KindMetrics> {
        &self.metrics
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("config", &self.config)
            .field("subscribers", &self.subscribers)
            .field("batching", &self.batching)
            .field("pending", &self.pending.len())
            .field("stats", &self.stats)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{BarPayload, FillPayload};
    use crate::domain::Side;
    use chrono::{DateTime, TimeZone, Utc};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 16, 0, 0).unwrap()
    }

    fn bar() -> Event {
        Event::bar(BarPayload::flat("SPY", 100.0), ts())
    }

    fn recorder(log: &Rc<RefCell<Vec<String>>>, label: &str) -> HandlerRef {
        let log = Rc::clone(log);
        let label = label.to_string();
        HandlerRef::from_fn(label.clone(), move |_event, _bus| {
            log.borrow_mut().push(label.clone());
            Ok(())
        })
    }

    #[test]
    fn publish_without_subscribers_returns_zero() {
        let mut bus = EventBus::default();
        assert_eq!(bus.publish(bar()), 0);
        assert_eq!(bus.stats().events_published, 1);
        assert_eq!(bus.stats().events_dispatched, 0);
    }

    #[test]
    fn priority_orders_dispatch() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::default();
        bus.subscribe(EventKind::Bar, recorder(&log, "late"), 10).unwrap();
        bus.subscribe(EventKind::Bar, recorder(&log, "early"), -5).unwrap();
        bus.subscribe(EventKind::Bar, recorder(&log, "middle"), 0).unwrap();
        bus.subscribe(EventKind::Bar, recorder(&log, "middle-2"), 0).unwrap();

        assert_eq!(bus.publish(bar()), 4);
        assert_eq!(*log.borrow(), vec!["early", "middle", "middle-2", "late"]);
    }

    #[test]
    fn duplicate_subscription_rejected() {
        let mut bus = EventBus::default();
        let handler = HandlerRef::from_fn("h", |_e, _b| Ok(()));
        bus.subscribe(EventKind::Bar, handler.clone(), 0).unwrap();
        let err = bus.subscribe(EventKind::Bar, handler.clone(), 5).unwrap_err();
        assert!(matches!(err, BusError::DuplicateSubscription { kind: EventKind::Bar, .. }));

        // Same handler on another kind is fine.
        assert!(bus.subscribe(EventKind::Fill, handler, 0).is_ok());
    }

    #[test]
    fn unsubscribe_by_handler_and_token() {
        let mut bus = EventBus::default();
        let a = HandlerRef::from_fn("a", |_e, _b| Ok(()));
        let b = HandlerRef::from_fn("b", |_e, _b| Ok(()));
        bus.subscribe(EventKind::Bar, a.clone(), 0).unwrap();
        let id_b = bus.subscribe(EventKind::Bar, b, 0).unwrap();

        assert!(bus.unsubscribe(EventKind::Bar, &a));
        assert!(!bus.unsubscribe(EventKind::Bar, &a));
        assert!(!bus.unsubscribe(EventKind::Fill, &a));
        assert!(bus.unsubscribe_id(id_b));
        assert!(!bus.unsubscribe_id(id_b));
        assert_eq!(bus.subscriber_count(EventKind::Bar), 0);
    }

    #[test]
    fn consume_stops_lower_priority_handlers() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::default();
        bus.subscribe(
            EventKind::Bar,
            HandlerRef::from_fn("gate", |event, _bus| {
                event.consume();
                Ok(())
            }),
            0,
        )
        .unwrap();
        bus.subscribe(EventKind::Bar, recorder(&log, "after"), 1).unwrap();

        assert_eq!(bus.publish(bar()), 1);
        assert!(log.borrow().is_empty());
        assert_eq!(bus.stats().events_consumed, 1);
    }

    #[test]
    fn failing_handler_does_not_stop_dispatch() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::default();
        bus.subscribe(
            EventKind::Bar,
            HandlerRef::from_fn("broken", |_e, _b| Err(HandlerError::failed("boom"))),
            0,
        )
        .unwrap();
        bus.subscribe(EventKind::Bar, recorder(&log, "ok"), 1).unwrap();

        assert_eq!(bus.publish(bar()), 2);
        assert_eq!(*log.borrow(), vec!["ok"]);
        assert_eq!(bus.stats().handler_failures, 1);
    }

    // The default panic hook still prints "handler bug" to stderr here.
    #[test]
    fn panicking_handler_is_isolated() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::default();
        bus.subscribe(
            EventKind::Bar,
            HandlerRef::from_fn("panics", |_e, _b| panic!("handler bug")),
            0,
        )
        .unwrap();
        bus.subscribe(EventKind::Bar, recorder(&log, "ok"), 1).unwrap();

        assert_eq!(bus.publish(bar()), 2);
        assert_eq!(*log.borrow(), vec!["ok"]);
        assert_eq!(bus.stats().handler_failures, 1);
    }

    #[test]
    fn dedup_drops_second_fill_with_same_order_id() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::default();
        bus.subscribe(EventKind::Fill, recorder(&log, "fill"), 0).unwrap();

        let fill = FillPayload::new("SPY", Side::Buy, 1.0, 100.0).with_order_id("o-1");
        assert_eq!(bus.publish(Event::fill(fill.clone(), ts())), 1);
        assert_eq!(bus.publish(Event::fill(fill, ts())), 0);
        assert_eq!(log.borrow().len(), 1);
        assert_eq!(bus.stats().duplicates_dropped, 1);
    }

    #[test]
    fn dedup_can_be_disabled() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::new(BusConfig {
            deduplication: false,
            ..BusConfig::default()
        });
        bus.subscribe(EventKind::Fill, recorder(&log, "fill"), 0).unwrap();

        let fill = FillPayload::new("SPY", Side::Buy, 1.0, 100.0).with_order_id("o-1");
        bus.publish(Event::fill(fill.clone(), ts()));
        bus.publish(Event::fill(fill, ts()));
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn batch_defers_then_replays_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::default();
        let seen = Rc::clone(&log);
        bus.subscribe(
            EventKind::Bar,
            HandlerRef::from_fn("closes", move |event, _bus| {
                if let crate::event::EventPayload::Bar(bar) = event.payload() {
                    seen.borrow_mut().push(bar.close.to_string());
                }
                Ok(())
            }),
            0,
        )
        .unwrap();

        bus.start_batch();
        assert!(bus.is_batching());
        for close in [1.0, 2.0, 3.0] {
            assert_eq!(bus.publish(Event::bar(BarPayload::flat("SPY", close), ts())), 0);
        }
        assert!(log.borrow().is_empty());
        assert_eq!(bus.pending_len(), 3);

        assert_eq!(bus.end_batch(), 3);
        assert!(!bus.is_batching());
        assert_eq!(*log.borrow(), vec!["1", "2", "3"]);
    }

    #[test]
    fn discard_batch_skips_dedup_bookkeeping() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::default();
        bus.subscribe(EventKind::Fill, recorder(&log, "fill"), 0).unwrap();
        let fill = FillPayload::new("SPY", Side::Buy, 1.0, 100.0).with_order_id("o-7");

        bus.start_batch();
        bus.publish(Event::fill(fill.clone(), ts()));
        assert_eq!(bus.discard_batch(), 1);
        assert_eq!(bus.end_batch(), 0);

        // Key was never recorded, so the fill still goes through.
        assert_eq!(bus.publish(Event::fill(fill, ts())), 1);
    }

    #[test]
    fn dead_component_is_skipped_and_pruned() {
        struct Counter(Rc<RefCell<u32>>);
        impl EventHandler for Counter {
            fn handle(&mut self, _e: &mut Event, _b: &mut EventBus) -> Result<(), HandlerError> {
                *self.0.borrow_mut() += 1;
                Ok(())
            }
        }

        let hits = Rc::new(RefCell::new(0));
        let component = Rc::new(RefCell::new(Counter(Rc::clone(&hits))));
        let mut bus = EventBus::default();
        bus.subscribe(EventKind::Bar, HandlerRef::component(&component), 0).unwrap();

        assert_eq!(bus.publish(bar()), 1);
        drop(component);
        assert_eq!(bus.subscriber_count(EventKind::Bar), 1);
        assert_eq!(bus.publish(bar()), 0);
        assert_eq!(bus.subscriber_count(EventKind::Bar), 0);
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(bus.stats().subscriptions_pruned, 1);
    }

    #[test]
    fn reset_keeps_subscriptions_and_clears_dedup() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bus = EventBus::default();
        bus.subscribe(EventKind::Fill, recorder(&log, "fill"), 0).unwrap();
        let fill = FillPayload::new("SPY", Side::Buy, 1.0, 100.0).with_order_id("o-1");

        bus.publish(Event::fill(fill.clone(), ts()));
        bus.start_batch();
        bus.publish(bar());
        bus.reset();

        assert!(!bus.is_batching());
        assert_eq!(bus.pending_len(), 0);
        assert_eq!(bus.stats(), &BusStats::default());
        assert_eq!(bus.subscriber_count(EventKind::Fill), 1);
        assert_eq!(bus.publish(Event::fill(fill, ts())), 1);
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn metrics_only_when_enabled() {
        let mut bus = EventBus::default();
        bus.subscribe(EventKind::Bar, HandlerRef::from_fn("h", |_e, _b| Ok(())), 0)
            .unwrap();
        bus.publish(bar());
        assert!(bus.metrics().is_empty());

        let mut bus = EventBus::new(BusConfig {
            enable_metrics: true,
            ..BusConfig::default()
        });
        bus.subscribe(EventKind::Bar, HandlerRef::from_fn("h", |_e, _b| Ok(())), 0)
            .unwrap();
        bus.publish(bar());
        bus.publish(bar());
        let bar_metrics = &bus.metrics()[&EventKind::Bar];
        assert_eq!(bar_metrics.published, 2);
        assert_eq!(bar_metrics.dispatched, 2);
        assert_eq!(bar_metrics.handlers_invoked, 2);
    }

    #[test]
    fn replay_log_is_bounded() {
        let mut bus = EventBus::new(BusConfig {
            enable_replay: true,
            max_replay_events: 2,
            ..BusConfig::default()
        });
        for close in [1.0, 2.0, 3.0] {
            bus.publish(Event::bar(BarPayload::flat("SPY", close), ts()));
        }
        assert_eq!(bus.recorded_len(), 2);
        let first = bus.recorded().next().unwrap();
        match first.payload() {
            crate::event::EventPayload::Bar(bar) => assert_eq!(bar.close, 2.0),
            other => panic!("unexpected payload {other:?}"),
        }
    }
}
