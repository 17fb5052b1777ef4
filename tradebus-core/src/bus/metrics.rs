//! Dispatch counters.

use serde::{Deserialize, Serialize};

/// Run-level counters, always maintained. Cleared by [`EventBus::reset`](super::EventBus::reset).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Events that reached dispatch (after batching, before dedup).
    pub events_published: u64,
    /// Events delivered to at least one subscriber list.
    pub events_dispatched: u64,
    /// Events queued while batch mode was active.
    pub events_batched: u64,
    pub duplicates_dropped: u64,
    pub handlers_invoked: u64,
    pub handler_failures: u64,
    /// Deliveries postponed until a mid-call handler returned.
    pub deliveries_deferred: u64,
    /// Dispatches stopped early because a handler consumed the event.
    pub events_consumed: u64,
    pub subscriptions_pruned: u64,
}

/// Per-kind breakdown, collected only when metrics are enabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindMetrics {
    pub published: u64,
    pub dispatched: u64,
    pub duplicates: u64,
    pub handlers_invoked: u64,
    pub handler_failures: u64,
    pub consumed: u64,
}

impl KindMetrics {
    /// Fraction of published events dropped as duplicates.
    pub fn duplicate_rate(&self) -> f64 {
        if self.published == 0 {
            return 0.0;
        }
        self.duplicates as f64 / self.published as f64
    }
}
