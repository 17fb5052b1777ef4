//! Typed payloads, one struct per event kind.
//!
//! Numeric fields on inbound FILL and BAR payloads deserialize leniently:
//! numbers and numeric strings are accepted, anything else becomes NaN so the
//! consuming handler can substitute a default and log it.

use crate::domain::{PositionSnapshot, Side};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Free-form field map carried by CUSTOM events. Keys are unique by construction.
pub type Fields = BTreeMap<String, Value>;

/// OHLCV bar for one symbol. The bar time is the event timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarPayload {
    pub symbol: String,
    #[serde(default = "nan", deserialize_with = "lenient_f64")]
    pub open: f64,
    #[serde(default = "nan", deserialize_with = "lenient_f64")]
    pub high: f64,
    #[serde(default = "nan", deserialize_with = "lenient_f64")]
    pub low: f64,
    #[serde(default = "nan", deserialize_with = "lenient_f64")]
    pub close: f64,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub volume: f64,
}

impl BarPayload {
    /// Bar with identical OHLC, handy for marking a symbol to a single price.
    pub fn flat(symbol: impl Into<String>, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickPayload {
    pub symbol: String,
    pub price: f64,
    #[serde(default)]
    pub size: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SignalDirection {
    Long,
    Short,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub symbol: String,
    pub direction: SignalDirection,
    #[serde(default)]
    pub strength: f64,
    #[serde(default)]
    pub rule_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    #[default]
    Market,
    Limit,
    Stop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub symbol: String,
    pub direction: Side,
    pub quantity: f64,
    #[serde(default)]
    pub order_type: OrderType,
    #[serde(default)]
    pub limit_price: Option<f64>,
    #[serde(default)]
    pub stop_price: Option<f64>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub rule_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Submitted,
    Accepted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderUpdatePayload {
    pub order_id: String,
    pub status: OrderStatus,
    #[serde(default)]
    pub filled_quantity: f64,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Execution report from the broker collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FillPayload {
    pub symbol: String,
    pub direction: Side,
    #[serde(default = "nan", deserialize_with = "lenient_f64")]
    pub quantity: f64,
    #[serde(default = "nan", deserialize_with = "lenient_f64")]
    pub price: f64,
    #[serde(default, deserialize_with = "lenient_opt_f64")]
    pub commission: Option<f64>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub fill_id: Option<String>,
    #[serde(default)]
    pub rule_id: Option<String>,
}

impl FillPayload {
    pub fn new(symbol: impl Into<String>, direction: Side, quantity: f64, price: f64) -> Self {
        Self {
            symbol: symbol.into(),
            direction,
            quantity,
            price,
            commission: None,
            order_id: None,
            fill_id: None,
            rule_id: None,
        }
    }

    pub fn with_commission(mut self, commission: f64) -> Self {
        self.commission = Some(commission);
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_fill_id(mut self, fill_id: impl Into<String>) -> Self {
        self.fill_id = Some(fill_id.into());
        self
    }

    pub fn with_rule_id(mut self, rule_id: impl Into<String>) -> Self {
        self.rule_id = Some(rule_id.into());
        self
    }
}

/// Portfolio state published after every applied fill or bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioUpdatePayload {
    pub cash: f64,
    pub equity: f64,
    pub positions_value: f64,
    pub realized_pnl: f64,
    pub unrealized_pnl: f64,
    pub positions: Vec<PositionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomPayload {
    pub name: String,
    #[serde(default)]
    pub fields: Fields,
}

fn nan() -> f64 {
    f64::NAN
}

fn value_to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(value_to_f64(&value))
}

fn lenient_opt_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        other => Some(value_to_f64(&other)),
    })
}
