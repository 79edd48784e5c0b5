//! Primary/secondary transport composition.
//!
//! FIX first, HTTP when the session is down. Only `TransportUnavailable`
//! degrades: the exchange refusing a request (`Rejected`), an expired
//! deadline (`Timeout`), or an unmapped ID (`UnknownOrder`) is final, and
//! replaying those on the secondary would re-submit already-decided
//! semantics. Each call retries at most once.

use tracing::warn;

use super::transport::{Transport, TransportKind};
use super::types::{AmendOrderRequest, CreateOrderRequest, Order, TransportError};

pub struct FallbackTransport<P, S> {
    primary: P,
    secondary: S,
}

impl<P: Transport, S: Transport> FallbackTransport<P, S> {
    pub fn new(primary: P, secondary: S) -> Self {
        Self { primary, secondary }
    }

    fn should_degrade(err: &TransportError) -> bool {
        matches!(err, TransportError::TransportUnavailable(_))
    }
}

macro_rules! degrade {
    ($self:expr, $op:literal, $call:ident ( $($arg:expr),* )) => {{
        if $self.primary.is_available() {
            match $self.primary.$call($($arg),*).await {
                Err(err) if Self::should_degrade(&err) => {
                    warn!(
                        "⤵️ {} degraded {} → {}: {err}",
                        $op,
                        $self.primary.kind().as_str(),
                        $self.secondary.kind().as_str(),
                    );
                    $self.secondary.$call($($arg),*).await
                }
                outcome => outcome,
            }
        } else {
            $self.secondary.$call($($arg),*).await
        }
    }};
}

impl<P: Transport, S: Transport> Transport for FallbackTransport<P, S> {
    async fn create_order(&self, req: &CreateOrderRequest) -> Result<Order, TransportError> {
        degrade!(self, "create", create_order(req))
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> Result<Order, TransportError> {
        degrade!(self, "cancel", cancel_order(exchange_order_id))
    }

    async fn cancel_orders(&self, exchange_order_ids: &[String]) -> Result<(), TransportError> {
        degrade!(self, "batch-cancel", cancel_orders(exchange_order_ids))
    }

    async fn amend_order(
        &self,
        exchange_order_id: &str,
        req: &AmendOrderRequest,
    ) -> Result<Order, TransportError> {
        degrade!(self, "amend", amend_order(exchange_order_id, req))
    }

    fn is_available(&self) -> bool {
        self.primary.is_available() || self.secondary.is_available()
    }

    /// Whichever underlying transport would serve a call right now.
    fn kind(&self) -> TransportKind {
        if self.primary.is_available() {
            self.primary.kind()
        } else {
            self.secondary.kind()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalshi::types::{Action, OrderStatus, Side};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stub_order(id: &str) -> Order {
        Order {
            exchange_order_id: id.to_string(),
            client_order_id: "cl-1".to_string(),
            ticker: "TEST-MKT".to_string(),
            action: Action::Buy,
            side: Side::Yes,
            order_type: "limit",
            yes_price: 65,
            no_price: 35,
            initial_count: 10,
            fill_count: 0,
            remaining_count: 10,
            status: OrderStatus::Resting,
            last_update: chrono::Utc::now(),
        }
    }

    fn create_request() -> CreateOrderRequest {
        CreateOrderRequest {
            ticker: "TEST-MKT".into(),
            action: Some(Action::Buy),
            side: Some(Side::Yes),
            count: 10,
            yes_price: Some(65),
            ..Default::default()
        }
    }

    struct StubTransport {
        kind: TransportKind,
        available: bool,
        responses: Mutex<Vec<Result<Order, TransportError>>>,
        calls: AtomicUsize,
    }

    impl StubTransport {
        fn new(
            kind: TransportKind,
            available: bool,
            responses: Vec<Result<Order, TransportError>>,
        ) -> Self {
            Self {
                kind,
                available,
                responses: Mutex::new(responses),
                calls: AtomicUsize::new(0),
            }
        }

        fn next(&self) -> Result<Order, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .pop()
                .unwrap_or_else(|| Err(TransportError::TransportUnavailable("exhausted".into())))
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Transport for StubTransport {
        async fn create_order(&self, _req: &CreateOrderRequest) -> Result<Order, TransportError> {
            self.next()
        }

        async fn cancel_order(&self, _id: &str) -> Result<Order, TransportError> {
            self.next()
        }

        async fn cancel_orders(&self, _ids: &[String]) -> Result<(), TransportError> {
            self.next().map(|_| ())
        }

        async fn amend_order(
            &self,
            _id: &str,
            _req: &AmendOrderRequest,
        ) -> Result<Order, TransportError> {
            self.next()
        }

        fn is_available(&self) -> bool {
            self.available
        }

        fn kind(&self) -> TransportKind {
            self.kind
        }
    }

    #[tokio::test]
    async fn test_unavailable_primary_is_skipped_entirely() {
        let primary = StubTransport::new(TransportKind::Fix, false, vec![]);
        let secondary =
            StubTransport::new(TransportKind::Rest, true, vec![Ok(stub_order("R1"))]);
        let fallback = FallbackTransport::new(primary, secondary);

        let order = fallback.create_order(&create_request()).await.unwrap();
        assert_eq!(order.exchange_order_id, "R1");
        assert_eq!(fallback.primary.call_count(), 0);
        assert_eq!(fallback.kind(), TransportKind::Rest);
        assert!(fallback.is_available());
    }

    #[tokio::test]
    async fn test_per_call_unavailability_degrades_once() {
        // Available on probe, but the populate/commit path fails: the call
        // still lands on the secondary.
        let primary = StubTransport::new(
            TransportKind::Fix,
            true,
            vec![Err(TransportError::TransportUnavailable("claim failed".into()))],
        );
        let secondary =
            StubTransport::new(TransportKind::Rest, true, vec![Ok(stub_order("R2"))]);
        let fallback = FallbackTransport::new(primary, secondary);

        let order = fallback.create_order(&create_request()).await.unwrap();
        assert_eq!(order.exchange_order_id, "R2");
        assert_eq!(fallback.primary.call_count(), 1);
        assert_eq!(fallback.secondary.call_count(), 1);
        assert_eq!(fallback.kind(), TransportKind::Fix);
    }

    #[tokio::test]
    async fn test_final_outcomes_are_not_replayed() {
        for terminal in [
            TransportError::Rejected("bad price".into()),
            TransportError::Timeout,
            TransportError::UnknownOrder("X9".into()),
        ] {
            let primary =
                StubTransport::new(TransportKind::Fix, true, vec![Err(terminal.clone())]);
            let secondary =
                StubTransport::new(TransportKind::Rest, true, vec![Ok(stub_order("R3"))]);
            let fallback = FallbackTransport::new(primary, secondary);

            let outcome = fallback.cancel_order("X9").await;
            assert_eq!(outcome, Err(terminal));
            assert_eq!(fallback.secondary.call_count(), 0);
        }
    }

    #[tokio::test]
    async fn test_healthy_primary_serves_the_call() {
        let primary =
            StubTransport::new(TransportKind::Fix, true, vec![Ok(stub_order("F1"))]);
        let secondary = StubTransport::new(TransportKind::Rest, true, vec![]);
        let fallback = FallbackTransport::new(primary, secondary);

        let order = fallback.create_order(&create_request()).await.unwrap();
        assert_eq!(order.exchange_order_id, "F1");
        assert_eq!(fallback.secondary.call_count(), 0);
        assert_eq!(fallback.kind(), TransportKind::Fix);
    }
}
