//! The contract every order mover implements, and the mode-selected
//! wrapper the host application holds.

use std::str::FromStr;

use tracing::warn;

use super::fallback::FallbackTransport;
use super::fix_transport::FixTransport;
use super::rest::RestTransport;
use super::types::{AmendOrderRequest, CreateOrderRequest, Order, TransportError};

/// Identity tag, used for logging and diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Rest,
    Fix,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportKind::Rest => "REST",
            TransportKind::Fix => "FIX",
        }
    }
}

/// Order-operations contract with availability semantics.
///
/// `is_available()` returning true is necessary but not sufficient for a
/// call to succeed; wrappers must also trap per-call failures.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Place a limit order; resolves with the exchange's acknowledgement.
    async fn create_order(&self, req: &CreateOrderRequest) -> Result<Order, TransportError>;

    /// Cancel by exchange order ID; resolves with the canceled order.
    /// `UnknownOrder` when this transport has no record of the ID.
    async fn cancel_order(&self, exchange_order_id: &str) -> Result<Order, TransportError>;

    /// Best-effort bulk cancel; per-implementation batching semantics.
    async fn cancel_orders(&self, exchange_order_ids: &[String]) -> Result<(), TransportError>;

    /// Amend price and/or count; resolves with the post-amend order.
    async fn amend_order(
        &self,
        exchange_order_id: &str,
        req: &AmendOrderRequest,
    ) -> Result<Order, TransportError>;

    /// Whether the transport can accept a new request right now.
    fn is_available(&self) -> bool;

    fn kind(&self) -> TransportKind;
}

// ─────────────────────────────────────────────────────────
// Mode selection
// ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportMode {
    #[default]
    Rest,
    Fix,
    FixWithRestFallback,
}

impl TransportMode {
    pub fn from_env() -> Self {
        match std::env::var("KALSHI_TRANSPORT") {
            Ok(raw) => Self::from_str(&raw).unwrap_or_else(|_| {
                warn!("unknown KALSHI_TRANSPORT '{raw}' — defaulting to rest");
                Self::Rest
            }),
            Err(_) => Self::Rest,
        }
    }

    pub fn wants_fix(&self) -> bool {
        !matches!(self, TransportMode::Rest)
    }
}

impl FromStr for TransportMode {
    type Err = ();

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_lowercase().as_str() {
            "rest" => Ok(TransportMode::Rest),
            "fix" => Ok(TransportMode::Fix),
            "fix-with-rest-fallback" | "fix_with_rest_fallback" => {
                Ok(TransportMode::FixWithRestFallback)
            }
            _ => Err(()),
        }
    }
}

/// Runtime-selected transport stack.
pub enum AnyTransport {
    Rest(RestTransport),
    Fix(FixTransport),
    Fallback(FallbackTransport<FixTransport, RestTransport>),
}

impl Transport for AnyTransport {
    async fn create_order(&self, req: &CreateOrderRequest) -> Result<Order, TransportError> {
        match self {
            AnyTransport::Rest(t) => t.create_order(req).await,
            AnyTransport::Fix(t) => t.create_order(req).await,
            AnyTransport::Fallback(t) => t.create_order(req).await,
        }
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> Result<Order, TransportError> {
        match self {
            AnyTransport::Rest(t) => t.cancel_order(exchange_order_id).await,
            AnyTransport::Fix(t) => t.cancel_order(exchange_order_id).await,
            AnyTransport::Fallback(t) => t.cancel_order(exchange_order_id).await,
        }
    }

    async fn cancel_orders(&self, exchange_order_ids: &[String]) -> Result<(), TransportError> {
        match self {
            AnyTransport::Rest(t) => t.cancel_orders(exchange_order_ids).await,
            AnyTransport::Fix(t) => t.cancel_orders(exchange_order_ids).await,
            AnyTransport::Fallback(t) => t.cancel_orders(exchange_order_ids).await,
        }
    }

    async fn amend_order(
        &self,
        exchange_order_id: &str,
        req: &AmendOrderRequest,
    ) -> Result<Order, TransportError> {
        match self {
            AnyTransport::Rest(t) => t.amend_order(exchange_order_id, req).await,
            AnyTransport::Fix(t) => t.amend_order(exchange_order_id, req).await,
            AnyTransport::Fallback(t) => t.amend_order(exchange_order_id, req).await,
        }
    }

    fn is_available(&self) -> bool {
        match self {
            AnyTransport::Rest(t) => t.is_available(),
            AnyTransport::Fix(t) => t.is_available(),
            AnyTransport::Fallback(t) => t.is_available(),
        }
    }

    fn kind(&self) -> TransportKind {
        match self {
            AnyTransport::Rest(t) => t.kind(),
            AnyTransport::Fix(t) => t.kind(),
            AnyTransport::Fallback(t) => t.kind(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_mode_parsing() {
        assert_eq!(TransportMode::from_str("rest"), Ok(TransportMode::Rest));
        assert_eq!(TransportMode::from_str("FIX"), Ok(TransportMode::Fix));
        assert_eq!(
            TransportMode::from_str("fix-with-rest-fallback"),
            Ok(TransportMode::FixWithRestFallback)
        );
        assert!(TransportMode::from_str("carrier-pigeon").is_err());
        assert_eq!(TransportMode::default(), TransportMode::Rest);
    }

    #[test]
    fn test_wants_fix() {
        assert!(!TransportMode::Rest.wants_fix());
        assert!(TransportMode::Fix.wants_fix());
        assert!(TransportMode::FixWithRestFallback.wants_fix());
    }
}
