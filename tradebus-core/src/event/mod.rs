//! Event envelope and per-kind deduplication keys.
//!
//! An [`Event`] is created by a publisher, read by zero or more handlers during
//! one dispatch and then dropped. Apart from the `consumed` flag it is
//! immutable once built.

pub mod payload;

pub use payload::{
    BarPayload, CustomPayload, Fields, FillPayload, OrderPayload, OrderStatus, OrderType,
    OrderUpdatePayload, PortfolioUpdatePayload, SignalDirection, SignalPayload, TickPayload,
};

use crate::domain::TradeRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Closed set of event kinds the bus routes on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Bar,
    Tick,
    Signal,
    Order,
    OrderUpdate,
    Fill,
    PortfolioUpdate,
    TradeOpen,
    TradeClose,
    Custom,
}

impl EventKind {
    pub const ALL: [EventKind; 10] = [
        EventKind::Bar,
        EventKind::Tick,
        EventKind::Signal,
        EventKind::Order,
        EventKind::OrderUpdate,
        EventKind::Fill,
        EventKind::PortfolioUpdate,
        EventKind::TradeOpen,
        EventKind::TradeClose,
        EventKind::Custom,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Bar => "BAR",
            EventKind::Tick => "TICK",
            EventKind::Signal => "SIGNAL",
            EventKind::Order => "ORDER",
            EventKind::OrderUpdate => "ORDER_UPDATE",
            EventKind::Fill => "FILL",
            EventKind::PortfolioUpdate => "PORTFOLIO_UPDATE",
            EventKind::TradeOpen => "TRADE_OPEN",
            EventKind::TradeClose => "TRADE_CLOSE",
            EventKind::Custom => "CUSTOM",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload sum type; the variant determines the event kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventPayload {
    Bar(BarPayload),
    Tick(TickPayload),
    Signal(SignalPayload),
    Order(OrderPayload),
    OrderUpdate(OrderUpdatePayload),
    Fill(FillPayload),
    PortfolioUpdate(PortfolioUpdatePayload),
    TradeOpen(TradeRecord),
    TradeClose(TradeRecord),
    Custom(CustomPayload),
}

/// A payload that could not be decoded for its declared kind.
#[derive(Debug, Error)]
#[error("invalid {kind} payload: {source}")]
pub struct PayloadError {
    pub kind: EventKind,
    #[source]
    pub source: serde_json::Error,
}

impl EventPayload {
    pub fn kind(&self) -> EventKind {
        match self {
            EventPayload::Bar(_) => EventKind::Bar,
            EventPayload::Tick(_) => EventKind::Tick,
            EventPayload::Signal(_) => EventKind::Signal,
            EventPayload::Order(_) => EventKind::Order,
            EventPayload::OrderUpdate(_) => EventKind::OrderUpdate,
            EventPayload::Fill(_) => EventKind::Fill,
            EventPayload::PortfolioUpdate(_) => EventKind::PortfolioUpdate,
            EventPayload::TradeOpen(_) => EventKind::TradeOpen,
            EventPayload::TradeClose(_) => EventKind::TradeClose,
            EventPayload::Custom(_) => EventKind::Custom,
        }
    }

    /// Decode a loosely typed JSON payload for a known kind.
    pub fn from_json(kind: EventKind, value: serde_json::Value) -> Result<Self, PayloadError> {
        let wrap = |source| PayloadError { kind, source };
        let payload = match kind {
            EventKind::Bar => EventPayload::Bar(serde_json::from_value(value).map_err(wrap)?),
            EventKind::Tick => EventPayload::Tick(serde_json::from_value(value).map_err(wrap)?),
            EventKind::Signal => EventPayload::Signal(serde_json::from_value(value).map_err(wrap)?),
            EventKind::Order => EventPayload::Order(serde_json::from_value(value).map_err(wrap)?),
            EventKind::OrderUpdate => {
                EventPayload::OrderUpdate(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::Fill => EventPayload::Fill(serde_json::from_value(value).map_err(wrap)?),
            EventKind::PortfolioUpdate => {
                EventPayload::PortfolioUpdate(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::TradeOpen => {
                EventPayload::TradeOpen(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::TradeClose => {
                EventPayload::TradeClose(serde_json::from_value(value).map_err(wrap)?)
            }
            EventKind::Custom => EventPayload::Custom(serde_json::from_value(value).map_err(wrap)?),
        };
        Ok(payload)
    }
}

macro_rules! impl_from_payload {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for EventPayload {
                fn from(payload: $ty) -> Self {
                    EventPayload::$variant(payload)
                }
            }
        )*
    };
}

impl_from_payload! {
    Bar => BarPayload,
    Tick => TickPayload,
    Signal => SignalPayload,
    Order => OrderPayload,
    OrderUpdate => OrderUpdatePayload,
    Fill => FillPayload,
    PortfolioUpdate => PortfolioUpdatePayload,
    Custom => CustomPayload,
}

/// Unique identity of one event instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key used by the bus to recognise re-delivery of the same logical event.
///
/// Keys are namespaced by kind so an ORDER and its FILL sharing an order id
/// never shadow each other.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DedupKey {
    Correlation { kind: EventKind, id: String },
    Order { kind: EventKind, id: String },
    Identity(EventId),
}

/// Message envelope routed by the [`EventBus`](crate::bus::EventBus).
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    id: EventId,
    timestamp: DateTime<Utc>,
    payload: EventPayload,
    consumed: bool,
}

impl Event {
    pub fn new(payload: impl Into<EventPayload>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: EventId::new(),
            timestamp,
            payload: payload.into(),
            consumed: false,
        }
    }

    pub fn bar(payload: BarPayload, timestamp: DateTime<Utc>) -> Self {
        Self::new(payload, timestamp)
    }

    pub fn fill(payload: FillPayload, timestamp: DateTime<Utc>) -> Self {
        Self::new(payload, timestamp)
    }

    pub fn trade_open(trade: TradeRecord, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventPayload::TradeOpen(trade), timestamp)
    }

    pub fn trade_close(trade: TradeRecord, timestamp: DateTime<Utc>) -> Self {
        Self::new(EventPayload::TradeClose(trade), timestamp)
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    pub fn id(&self) -> EventId {
        self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Stop dispatch of this event to any remaining (lower priority) handlers.
    pub fn consume(&mut self) {
        self.consumed = true;
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub(crate) fn clear_consumed(&mut self) {
        self.consumed = false;
    }

    /// Deduplication key for this event.
    ///
    /// SIGNAL keys on its correlation id, ORDER on its order id (falling back to
    /// the correlation id), FILL on its order id. Everything else, and any
    /// event missing the preferred field, keys on its identity.
    pub fn dedup_key(&self) -> DedupKey {
        let kind = self.kind();
        match &self.payload {
            EventPayload::Signal(signal) => match &signal.correlation_id {
                Some(id) => DedupKey::Correlation { kind, id: id.clone() },
                None => DedupKey::Identity(self.id),
            },
            EventPayload::Order(order) => match (&order.order_id, &order.correlation_id) {
                (Some(id), _) => DedupKey::Order { kind, id: id.clone() },
                (None, Some(id)) => DedupKey::Correlation { kind, id: id.clone() },
                (None, None) => DedupKey::Identity(self.id),
            },
            EventPayload::Fill(fill) => match &fill.order_id {
                Some(id) => DedupKey::Order { kind, id: id.clone() },
                None => DedupKey::Identity(self.id),
            },
            _ => DedupKey::Identity(self.id),
        }
    }
}
