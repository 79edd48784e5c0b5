//! Order routing for a binary-options trading platform.
//!
//! The [`kalshi`] module hides whether an order operation traverses the
//! HTTP request/response path or a long-lived FIX session; callers hold a
//! [`kalshi::transport::Transport`] and never learn which wire served them.

pub mod kalshi;

pub use kalshi::transport::{AnyTransport, Transport, TransportKind, TransportMode};
pub use kalshi::types::{
    Action, AmendOrderRequest, CreateOrderRequest, Order, OrderStatus, Side, TimeInForce,
    TransportError,
};
