//! Domain order model shared by every transport.
//!
//! Prices are integer cents on the YES leg of a binary contract; the NO leg
//! is always the 100-complement. A caller may express intent on either leg,
//! the wire view is normalized in the mapper.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────
// Enums
// ─────────────────────────────────────────────────────────

/// Binary contract leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes,
    No,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Yes => "yes",
            Side::No => "no",
        }
    }
}

/// Order direction on the chosen leg.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Buy,
    Sell,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Buy => "buy",
            Action::Sell => "sell",
        }
    }
}

/// Observable order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Resting,
    Executed,
    Canceled,
    Rejected,
    Expired,
    Unknown,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Resting => "resting",
            OrderStatus::Executed => "executed",
            OrderStatus::Canceled => "canceled",
            OrderStatus::Rejected => "rejected",
            OrderStatus::Expired => "expired",
            OrderStatus::Unknown => "unknown",
        }
    }

    pub fn from_api(raw: &str) -> Self {
        match raw {
            "resting" => OrderStatus::Resting,
            "executed" => OrderStatus::Executed,
            "canceled" => OrderStatus::Canceled,
            "rejected" => OrderStatus::Rejected,
            "expired" => OrderStatus::Expired,
            _ => OrderStatus::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
    Fok,
}

/// Self-trade prevention mode on the exchange's FIX dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfTradePrevention {
    /// The resting order is canceled, the incoming order trades on.
    CancelResting,
    /// The incoming order is canceled, the resting order stays.
    CancelTaking,
}

// ─────────────────────────────────────────────────────────
// Order snapshot
// ─────────────────────────────────────────────────────────

/// Immutable snapshot of an order's observable state.
///
/// Invariants for non-terminal reports: `fill_count + remaining_count ==
/// initial_count` and `yes_price + no_price == 100`.
#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub exchange_order_id: String,
    pub client_order_id: String,
    pub ticker: String,
    pub action: Action,
    pub side: Side,
    /// Always "limit"; the exchange trades nothing else over this gateway.
    pub order_type: &'static str,
    pub yes_price: i64,
    pub no_price: i64,
    pub initial_count: u32,
    pub fill_count: u32,
    pub remaining_count: u32,
    pub status: OrderStatus,
    pub last_update: DateTime<Utc>,
}

// ─────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────

/// New limit order. Exactly one of `yes_price`/`no_price` is required;
/// when both are present the yes-price wins.
#[derive(Debug, Clone, Default)]
pub struct CreateOrderRequest {
    pub ticker: String,
    pub action: Option<Action>,
    pub side: Option<Side>,
    pub count: u32,
    pub yes_price: Option<i64>,
    pub no_price: Option<i64>,
    pub time_in_force: Option<TimeInForce>,
    pub post_only: bool,
    pub self_trade_prevention: Option<SelfTradePrevention>,
    pub cancel_on_pause: bool,
    pub order_group: Option<String>,
    /// Cap on total execution cost, in cents.
    pub max_execution_cost: Option<i64>,
    /// Caller-chosen correlation ID; generated when absent.
    pub client_order_id: Option<String>,
}

impl CreateOrderRequest {
    pub fn action(&self) -> Action {
        self.action.unwrap_or(Action::Buy)
    }

    pub fn side(&self) -> Side {
        self.side.unwrap_or(Side::Yes)
    }

    /// Interface-boundary validation; failures never reach the wire.
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.ticker.is_empty() {
            return Err(TransportError::Rejected("ticker is required".into()));
        }
        if self.action.is_none() || self.side.is_none() {
            return Err(TransportError::Rejected(
                "action and side are required".into(),
            ));
        }
        if self.count == 0 {
            return Err(TransportError::Rejected(
                "order count must be positive".into(),
            ));
        }
        if self.yes_price.is_none() && self.no_price.is_none() {
            return Err(TransportError::Rejected(
                "either yes_price or no_price is required".into(),
            ));
        }
        for price in [self.yes_price, self.no_price].into_iter().flatten() {
            validate_price(price)?;
        }
        if let Some(id) = &self.client_order_id {
            if id.is_empty() || id.len() > 64 {
                return Err(TransportError::Rejected(
                    "client_order_id must be 1..=64 characters".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Price and/or size change for a resting order.
#[derive(Debug, Clone, Default)]
pub struct AmendOrderRequest {
    pub yes_price: Option<i64>,
    pub no_price: Option<i64>,
    /// New total count; remaining becomes `count - fill_count`.
    pub count: Option<u32>,
}

impl AmendOrderRequest {
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.yes_price.is_none() && self.no_price.is_none() && self.count.is_none() {
            return Err(TransportError::Rejected(
                "amend must change a price or the count".into(),
            ));
        }
        for price in [self.yes_price, self.no_price].into_iter().flatten() {
            validate_price(price)?;
        }
        if self.count == Some(0) {
            return Err(TransportError::Rejected(
                "amended count must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn validate_price(price: i64) -> Result<(), TransportError> {
    if !(1..=99).contains(&price) {
        return Err(TransportError::Rejected(format!(
            "price {price} outside 1..=99 cents"
        )));
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Transport failure taxonomy
// ─────────────────────────────────────────────────────────

/// Typed failure surfaced by every transport operation.
///
/// Only `TransportUnavailable` is recoverable by a fallback wrapper; the
/// other variants are final for the request they answered.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("rejected by exchange: {0}")]
    Rejected(String),
    #[error("timed out waiting for the exchange")]
    Timeout,
    #[error("unknown order: {0}")]
    UnknownOrder(String),
    #[error("interrupted while awaiting completion")]
    Interrupted,
}
