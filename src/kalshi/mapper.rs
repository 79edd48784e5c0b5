//! Stateless translation between the domain order model and FIX wire fields.
//!
//! The exchange's dialect trades only the YES leg: both "buy yes" and
//! "sell no" are wire Buys, both "sell yes" and "buy no" are wire Sells,
//! and tag 44 always carries a YES-leg price in integer cents.

use std::collections::HashMap;

use chrono::Utc;
use quickfix::{FieldMap, Message, QuickFixError};
use uuid::Uuid;

use super::types::{
    Action, CreateOrderRequest, Order, OrderStatus, SelfTradePrevention, Side, TimeInForce,
    TransportError,
};

/// FIX tag numbers used by this dialect (FIXT.1.1 / FIX 5.0 SP2 plus the
/// exchange's custom tags above 21000).
pub mod tag {
    pub const MSG_TYPE: i32 = 35;
    pub const CL_ORD_ID: i32 = 11;
    pub const CUM_QTY: i32 = 14;
    pub const EXEC_INST: i32 = 18;
    pub const ORDER_ID: i32 = 37;
    pub const ORDER_QTY: i32 = 38;
    pub const ORD_STATUS: i32 = 39;
    pub const ORD_TYPE: i32 = 40;
    pub const ORIG_CL_ORD_ID: i32 = 41;
    pub const PRICE: i32 = 44;
    pub const SIDE: i32 = 54;
    pub const SYMBOL: i32 = 55;
    pub const TEXT: i32 = 58;
    pub const TIME_IN_FORCE: i32 = 59;
    pub const TRANSACT_TIME: i32 = 60;
    pub const ORD_REJ_REASON: i32 = 103;
    pub const EXEC_TYPE: i32 = 150;
    pub const LEAVES_QTY: i32 = 151;
    pub const SECONDARY_CL_ORD_ID: i32 = 526;
    pub const SELF_TRADE_PREVENTION: i32 = 2964;
    pub const CANCEL_ON_PAUSE: i32 = 21006;
    pub const MAX_EXECUTION_COST: i32 = 21009;
}

pub const MSG_TYPE_NEW_ORDER_SINGLE: &str = "D";
pub const MSG_TYPE_ORDER_CANCEL_REQUEST: &str = "F";
pub const MSG_TYPE_ORDER_CANCEL_REPLACE: &str = "G";
pub const MSG_TYPE_EXECUTION_REPORT: &str = "8";
pub const MSG_TYPE_ORDER_CANCEL_REJECT: &str = "9";
pub const MSG_TYPE_BUSINESS_REJECT: &str = "j";
pub const MSG_TYPE_SESSION_REJECT: &str = "3";

// ─────────────────────────────────────────────────────────
// Scalar maps
// ─────────────────────────────────────────────────────────

/// Wire side for tag 54. Buy-yes and sell-no are both wire Buys.
#[inline]
pub fn fix_side(action: Action, side: Side) -> char {
    match (action, side) {
        (Action::Buy, Side::Yes) | (Action::Sell, Side::No) => '1',
        _ => '2',
    }
}

/// YES-leg price for tag 44, from whichever leg the caller priced.
/// Yes wins when both are present.
pub fn wire_price(yes_price: Option<i64>, no_price: Option<i64>) -> Result<i64, TransportError> {
    let price = match (yes_price, no_price) {
        (Some(yes), _) => yes,
        (None, Some(no)) => 100 - no,
        (None, None) => {
            return Err(TransportError::Rejected(
                "either yes_price or no_price is required".into(),
            ))
        }
    };
    if !(1..=99).contains(&price) {
        return Err(TransportError::Rejected(format!(
            "wire price {price} outside 1..=99 cents"
        )));
    }
    Ok(price)
}

/// Inverse of the price projection: tag 44 is the YES price when the wire
/// side is Buy, the NO price otherwise. Returns `(yes_price, no_price)`.
#[inline]
pub fn prices_from_wire(wire_side: char, price: i64) -> (i64, i64) {
    let yes = if wire_side == '1' { price } else { 100 - price };
    (yes, 100 - yes)
}

/// OrdStatus (tag 39) to the domain status. Unlisted values are `Unknown`.
pub fn ord_status_to_domain(ord_status: char) -> OrderStatus {
    match ord_status {
        '0' | '1' | 'A' | '5' => OrderStatus::Resting,
        '2' => OrderStatus::Executed,
        '4' | '6' => OrderStatus::Canceled,
        '8' => OrderStatus::Rejected,
        'C' => OrderStatus::Expired,
        _ => OrderStatus::Unknown,
    }
}

/// TimeInForce for tag 59; `None` defaults to GTC.
pub fn tif_to_fix(tif: Option<TimeInForce>) -> char {
    match tif {
        Some(TimeInForce::Day) => '0',
        Some(TimeInForce::Gtc) | None => '1',
        Some(TimeInForce::Ioc) => '3',
        Some(TimeInForce::Fok) => '4',
    }
}

pub fn tif_from_fix(value: char) -> Option<TimeInForce> {
    match value {
        '0' => Some(TimeInForce::Day),
        '1' => Some(TimeInForce::Gtc),
        '3' => Some(TimeInForce::Ioc),
        '4' => Some(TimeInForce::Fok),
        _ => None,
    }
}

fn stp_to_fix(mode: SelfTradePrevention) -> char {
    match mode {
        SelfTradePrevention::CancelResting => '1',
        SelfTradePrevention::CancelTaking => '2',
    }
}

/// Fresh correlation ID: hyphenated UUID, well under the 64-char cap.
pub fn new_client_order_id() -> String {
    Uuid::new_v4().to_string()
}

/// Tag 60 timestamp: UTC `yyyyMMdd-HH:mm:ss.SSS`.
pub fn transact_time() -> String {
    Utc::now().format("%Y%m%d-%H:%M:%S%.3f").to_string()
}

// ─────────────────────────────────────────────────────────
// Outbound populators
// ─────────────────────────────────────────────────────────

/// Fill a claimed message as a NewOrderSingle ("D").
pub fn populate_new_order_single(
    msg: &mut Message,
    client_order_id: &str,
    req: &CreateOrderRequest,
    wire_side: char,
    wire_price: i64,
) -> Result<(), QuickFixError> {
    msg.set_field(tag::MSG_TYPE, MSG_TYPE_NEW_ORDER_SINGLE)?;
    msg.set_field(tag::CL_ORD_ID, client_order_id)?;
    msg.set_field(tag::SYMBOL, req.ticker.as_str())?;
    msg.set_field(tag::SIDE, wire_side.to_string())?;
    msg.set_field(tag::ORDER_QTY, req.count.to_string())?;
    msg.set_field(tag::PRICE, wire_price.to_string())?;
    msg.set_field(tag::ORD_TYPE, "2")?;
    msg.set_field(tag::TIME_IN_FORCE, tif_to_fix(req.time_in_force).to_string())?;
    msg.set_field(tag::TRANSACT_TIME, transact_time())?;
    if req.post_only {
        msg.set_field(tag::EXEC_INST, "6")?;
    }
    if let Some(mode) = req.self_trade_prevention {
        msg.set_field(tag::SELF_TRADE_PREVENTION, stp_to_fix(mode).to_string())?;
    }
    if req.cancel_on_pause {
        msg.set_field(tag::CANCEL_ON_PAUSE, "Y")?;
    }
    if let Some(group) = &req.order_group {
        msg.set_field(tag::SECONDARY_CL_ORD_ID, group.as_str())?;
    }
    if let Some(cap) = req.max_execution_cost {
        msg.set_field(tag::MAX_EXECUTION_COST, cap.to_string())?;
    }
    Ok(())
}

/// Fill a claimed message as an OrderCancelRequest ("F").
pub fn populate_cancel_request(
    msg: &mut Message,
    client_order_id: &str,
    orig_client_order_id: &str,
    ticker: &str,
    wire_side: char,
) -> Result<(), QuickFixError> {
    msg.set_field(tag::MSG_TYPE, MSG_TYPE_ORDER_CANCEL_REQUEST)?;
    msg.set_field(tag::CL_ORD_ID, client_order_id)?;
    msg.set_field(tag::ORIG_CL_ORD_ID, orig_client_order_id)?;
    msg.set_field(tag::SYMBOL, ticker)?;
    msg.set_field(tag::SIDE, wire_side.to_string())?;
    msg.set_field(tag::TRANSACT_TIME, transact_time())?;
    Ok(())
}

/// Fill a claimed message as an OrderCancelReplaceRequest ("G").
/// Omitting `price` or `count` keeps the current value on the exchange.
pub fn populate_cancel_replace(
    msg: &mut Message,
    client_order_id: &str,
    orig_client_order_id: &str,
    ticker: &str,
    wire_side: char,
    price: Option<i64>,
    count: Option<u32>,
) -> Result<(), QuickFixError> {
    msg.set_field(tag::MSG_TYPE, MSG_TYPE_ORDER_CANCEL_REPLACE)?;
    msg.set_field(tag::CL_ORD_ID, client_order_id)?;
    msg.set_field(tag::ORIG_CL_ORD_ID, orig_client_order_id)?;
    msg.set_field(tag::SYMBOL, ticker)?;
    msg.set_field(tag::SIDE, wire_side.to_string())?;
    msg.set_field(tag::ORD_TYPE, "2")?;
    if let Some(price) = price {
        msg.set_field(tag::PRICE, price.to_string())?;
    }
    if let Some(count) = count {
        msg.set_field(tag::ORDER_QTY, count.to_string())?;
    }
    msg.set_field(tag::TRANSACT_TIME, transact_time())?;
    Ok(())
}

// ─────────────────────────────────────────────────────────
// Inbound parsing
// ─────────────────────────────────────────────────────────

/// Flat tag→value view of a raw FIX message.
///
/// Accepts SOH- or pipe-delimited text so log captures paste straight into
/// tests.
#[derive(Debug, Clone, Default)]
pub struct FixFields(HashMap<i32, String>);

impl FixFields {
    pub fn parse(raw: &str) -> Self {
        let mut fields = HashMap::new();
        for pair in raw.split(|c: char| c == '\x01' || c == '|') {
            if pair.is_empty() {
                continue;
            }
            if let Some((tag, value)) = pair.split_once('=') {
                if let Ok(tag) = tag.parse::<i32>() {
                    fields.insert(tag, value.to_string());
                }
            }
        }
        Self(fields)
    }

    pub fn get(&self, tag: i32) -> Option<&str> {
        self.0.get(&tag).map(String::as_str)
    }

    pub fn get_owned(&self, tag: i32) -> Option<String> {
        self.0.get(&tag).cloned()
    }

    pub fn get_char(&self, tag: i32) -> Option<char> {
        self.get(tag).and_then(|v| v.chars().next())
    }

    /// Quantities and prices arrive as "10" or "10.0"; both parse.
    pub fn get_i64(&self, tag: i32) -> Option<i64> {
        self.get(tag)
            .and_then(|v| v.parse::<f64>().ok())
            .map(|v| v.round() as i64)
    }

    pub fn msg_type(&self) -> Option<&str> {
        self.get(tag::MSG_TYPE)
    }
}

/// Decoded ExecutionReport ("8"). Only the fields this gateway acts on.
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub exec_type: char,
    pub ord_status: char,
    pub client_order_id: Option<String>,
    pub orig_client_order_id: Option<String>,
    pub exchange_order_id: Option<String>,
    pub ticker: String,
    pub wire_side: char,
    pub price: i64,
    pub cum_qty: u32,
    pub leaves_qty: u32,
    pub ord_rej_reason: Option<String>,
    pub text: Option<String>,
}

impl ExecutionReport {
    pub fn from_fields(fields: &FixFields) -> Option<Self> {
        Some(Self {
            exec_type: fields.get_char(tag::EXEC_TYPE)?,
            ord_status: fields.get_char(tag::ORD_STATUS).unwrap_or(' '),
            client_order_id: fields.get_owned(tag::CL_ORD_ID),
            orig_client_order_id: fields.get_owned(tag::ORIG_CL_ORD_ID),
            exchange_order_id: fields.get_owned(tag::ORDER_ID),
            ticker: fields.get_owned(tag::SYMBOL).unwrap_or_default(),
            wire_side: fields.get_char(tag::SIDE).unwrap_or('1'),
            price: fields.get_i64(tag::PRICE).unwrap_or(0),
            cum_qty: fields.get_i64(tag::CUM_QTY).unwrap_or(0).max(0) as u32,
            leaves_qty: fields.get_i64(tag::LEAVES_QTY).unwrap_or(0).max(0) as u32,
            ord_rej_reason: fields.get_owned(tag::ORD_REJ_REASON),
            text: fields.get_owned(tag::TEXT),
        })
    }

    /// "OrdRejReason=<103>" plus tag 58 text; "Unknown rejection" when the
    /// report carries neither.
    pub fn rejection_reason(&self) -> String {
        let mut parts = Vec::new();
        if let Some(reason) = &self.ord_rej_reason {
            parts.push(format!("OrdRejReason={reason}"));
        }
        if let Some(text) = &self.text {
            parts.push(text.clone());
        }
        if parts.is_empty() {
            "Unknown rejection".to_string()
        } else {
            parts.join(" ")
        }
    }
}

/// Decoded OrderCancelReject ("9").
#[derive(Debug, Clone)]
pub struct CancelReject {
    pub client_order_id: Option<String>,
    pub orig_client_order_id: Option<String>,
    pub text: Option<String>,
}

impl CancelReject {
    pub fn from_fields(fields: &FixFields) -> Self {
        Self {
            client_order_id: fields.get_owned(tag::CL_ORD_ID),
            orig_client_order_id: fields.get_owned(tag::ORIG_CL_ORD_ID),
            text: fields.get_owned(tag::TEXT),
        }
    }

    pub fn reason(&self) -> String {
        self.text
            .clone()
            .unwrap_or_else(|| "Unknown rejection".to_string())
    }
}

/// Project a report onto the domain `Order`.
///
/// Mirror-the-wire convention: wire Buy parses as `action=Buy`, wire Sell
/// as `action=Sell`, side always the YES leg, prices yes-normalized. A
/// caller that placed a no-leg order keeps its own request for the intent
/// view; reports are never rewritten toward it.
pub fn execution_report_to_order(report: &ExecutionReport) -> Order {
    let (yes_price, no_price) = prices_from_wire(report.wire_side, report.price);
    let action = if report.wire_side == '1' {
        Action::Buy
    } else {
        Action::Sell
    };
    Order {
        exchange_order_id: report.exchange_order_id.clone().unwrap_or_default(),
        client_order_id: report.client_order_id.clone().unwrap_or_default(),
        ticker: report.ticker.clone(),
        action,
        side: Side::Yes,
        order_type: "limit",
        yes_price,
        no_price,
        initial_count: report.cum_qty + report.leaves_qty,
        fill_count: report.cum_qty,
        remaining_count: report.leaves_qty,
        status: ord_status_to_domain(report.ord_status),
        last_update: Utc::now(),
    }
}
