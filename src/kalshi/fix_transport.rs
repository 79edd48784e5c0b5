//! Order operations over the FIX session.
//!
//! Per operation: register a pending request with the tracker, claim a
//! fresh outbound message, populate it via the mapper, commit it through
//! the session manager, then block on the correlated reply with the
//! configured deadline. A populate failure drops the claimed message
//! before anything reaches the engine.

use std::sync::Arc;
use std::time::Duration;

use quickfix::Message;
use tokio::sync::oneshot;
use tracing::{info, warn};

use super::mapper;
use super::session::FixSessionManager;
use super::tracker::OrderTracker;
use super::transport::{Transport, TransportKind};
use super::types::{AmendOrderRequest, CreateOrderRequest, Order, TransportError};

pub const DEFAULT_ORDER_TIMEOUT: Duration = Duration::from_secs(5);

pub struct FixTransport {
    session: Arc<FixSessionManager>,
    tracker: Arc<OrderTracker>,
    order_timeout: Duration,
}

impl FixTransport {
    pub fn new(
        session: Arc<FixSessionManager>,
        tracker: Arc<OrderTracker>,
        order_timeout: Duration,
    ) -> Self {
        Self {
            session,
            tracker,
            order_timeout,
        }
    }

    /// Resolve a caller-supplied exchange order ID back to the original
    /// client ID plus the cached wire route. Only orders this process
    /// originated resolve; everything else is `UnknownOrder`.
    fn resolve_route(
        &self,
        exchange_order_id: &str,
    ) -> Result<(String, char, String), TransportError> {
        let orig = self
            .tracker
            .resolve_exchange_id(exchange_order_id)
            .ok_or_else(|| TransportError::UnknownOrder(exchange_order_id.to_string()))?;
        let (wire_side, ticker) = self
            .tracker
            .cached_route(&orig)
            .ok_or_else(|| TransportError::UnknownOrder(exchange_order_id.to_string()))?;
        Ok((orig, wire_side, ticker))
    }

    /// Commit an already-populated message, unwinding the pending entry on
    /// failure.
    fn commit(&self, msg: Message, client_order_id: &str) -> Result<(), TransportError> {
        if let Err(err) = self.session.send(msg) {
            self.tracker.remove(client_order_id);
            return Err(err);
        }
        Ok(())
    }

    async fn await_reply(
        &self,
        rx: oneshot::Receiver<Result<Order, TransportError>>,
    ) -> Result<Order, TransportError> {
        match tokio::time::timeout(self.order_timeout, rx).await {
            // The pending entry stays behind; the stale sweep collects it
            // and any late report becomes a sink update.
            Err(_) => Err(TransportError::Timeout),
            Ok(Err(_)) => Err(TransportError::Interrupted),
            Ok(Ok(result)) => result,
        }
    }
}

impl Transport for FixTransport {
    async fn create_order(&self, req: &CreateOrderRequest) -> Result<Order, TransportError> {
        req.validate()?;
        let wire_side = mapper::fix_side(req.action(), req.side());
        let wire_price = mapper::wire_price(req.yes_price, req.no_price)?;
        let client_order_id = req
            .client_order_id
            .clone()
            .unwrap_or_else(mapper::new_client_order_id);

        let rx = self
            .tracker
            .register(&client_order_id, wire_side, &req.ticker);
        if !self.session.is_logged_on() {
            self.tracker.remove(&client_order_id);
            return Err(TransportError::TransportUnavailable(
                "FIX session is not logged on".into(),
            ));
        }

        let mut msg = Message::new();
        if let Err(err) =
            mapper::populate_new_order_single(&mut msg, &client_order_id, req, wire_side, wire_price)
        {
            // Dropping the claimed message aborts it.
            self.tracker.remove(&client_order_id);
            return Err(TransportError::TransportUnavailable(format!(
                "failed to populate NewOrderSingle: {err:?}"
            )));
        }
        self.commit(msg, &client_order_id)?;
        info!(
            "📤 NewOrderSingle {} {}x{}@{} ({})",
            req.ticker, wire_side, req.count, wire_price, client_order_id
        );
        self.await_reply(rx).await
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> Result<Order, TransportError> {
        let (orig, wire_side, ticker) = self.resolve_route(exchange_order_id)?;
        let client_order_id = mapper::new_client_order_id();

        let rx = self.tracker.register(&client_order_id, wire_side, &ticker);
        if !self.session.is_logged_on() {
            self.tracker.remove(&client_order_id);
            return Err(TransportError::TransportUnavailable(
                "FIX session is not logged on".into(),
            ));
        }

        let mut msg = Message::new();
        if let Err(err) =
            mapper::populate_cancel_request(&mut msg, &client_order_id, &orig, &ticker, wire_side)
        {
            self.tracker.remove(&client_order_id);
            return Err(TransportError::TransportUnavailable(format!(
                "failed to populate OrderCancelRequest: {err:?}"
            )));
        }
        self.commit(msg, &client_order_id)?;
        info!("🗑️ OrderCancelRequest {exchange_order_id} (orig {orig})");
        self.await_reply(rx).await
    }

    async fn cancel_orders(&self, exchange_order_ids: &[String]) -> Result<(), TransportError> {
        // Best-effort: one cancel per ID, failures logged, the batch never
        // fails as a whole.
        for exchange_order_id in exchange_order_ids {
            match self.cancel_order(exchange_order_id).await {
                Ok(order) => info!("🗑️ canceled {} ({})", exchange_order_id, order.status.as_str()),
                Err(err) => warn!("cancel {exchange_order_id} failed: {err}"),
            }
        }
        Ok(())
    }

    async fn amend_order(
        &self,
        exchange_order_id: &str,
        req: &AmendOrderRequest,
    ) -> Result<Order, TransportError> {
        req.validate()?;
        let (orig, wire_side, ticker) = self.resolve_route(exchange_order_id)?;
        let price = match (req.yes_price, req.no_price) {
            (None, None) => None,
            (yes, no) => Some(mapper::wire_price(yes, no)?),
        };
        let client_order_id = mapper::new_client_order_id();

        let rx = self.tracker.register(&client_order_id, wire_side, &ticker);
        if !self.session.is_logged_on() {
            self.tracker.remove(&client_order_id);
            return Err(TransportError::TransportUnavailable(
                "FIX session is not logged on".into(),
            ));
        }

        let mut msg = Message::new();
        if let Err(err) = mapper::populate_cancel_replace(
            &mut msg,
            &client_order_id,
            &orig,
            &ticker,
            wire_side,
            price,
            req.count,
        ) {
            self.tracker.remove(&client_order_id);
            return Err(TransportError::TransportUnavailable(format!(
                "failed to populate OrderCancelReplaceRequest: {err:?}"
            )));
        }
        self.commit(msg, &client_order_id)?;
        info!("✏️ OrderCancelReplaceRequest {exchange_order_id} (orig {orig})");
        self.await_reply(rx).await
    }

    fn is_available(&self) -> bool {
        self.session.is_logged_on()
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Fix
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalshi::session::FixConfig;
    use crate::kalshi::types::{Action, Side};

    /// Transport over a constructed-but-never-started session: everything
    /// up to the wire is real, and the session is never logged on.
    fn offline_transport() -> FixTransport {
        FixTransport::new(
            Arc::new(FixSessionManager::new(FixConfig::default())),
            Arc::new(OrderTracker::new()),
            Duration::from_millis(50),
        )
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

    #[tokio::test]
    async fn test_cancel_of_unknown_order_sends_nothing() {
        let transport = offline_transport();
        let outcome = transport.cancel_order("never-seen").await;
        assert_eq!(
            outcome,
            Err(TransportError::UnknownOrder("never-seen".into()))
        );
        // No pending was registered, so nothing is left to sweep.
        assert_eq!(transport.tracker.open_requests(), 0);
    }

    #[tokio::test]
    async fn test_create_while_logged_off_unwinds_the_pending() {
        let transport = offline_transport();
        let outcome = transport.create_order(&create_request()).await;
        assert!(matches!(
            outcome,
            Err(TransportError::TransportUnavailable(_))
        ));
        assert_eq!(transport.tracker.open_requests(), 0);
        assert!(!transport.is_available());
    }

    #[tokio::test]
    async fn test_boundary_validation_never_reaches_the_session() {
        let transport = offline_transport();
        let mut req = create_request();
        req.count = 0;
        assert!(matches!(
            transport.create_order(&req).await,
            Err(TransportError::Rejected(_))
        ));

        let empty_amend = AmendOrderRequest::default();
        assert!(matches!(
            transport.amend_order("X1", &empty_amend).await,
            Err(TransportError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_cancel_is_best_effort() {
        let transport = offline_transport();
        let ids = vec!["a".to_string(), "b".to_string()];
        // Both cancels fail (unknown orders) but the batch itself succeeds.
        assert!(transport.cancel_orders(&ids).await.is_ok());
    }
}
