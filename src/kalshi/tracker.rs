//! Order state tracker: correlates inbound ExecutionReports with blocked
//! caller requests and fans post-ack updates out to the live order store.
//!
//! Runs on the engine's inbound-message thread; every handler here must
//! return quickly and never block. First-completion-wins is the atomic
//! `Option::take` of the oneshot sender under the map shard lock.

use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::mapper::{self, CancelReject, ExecutionReport, FixFields};
use super::session::MessageListener;
use super::types::{Order, TransportError};

type Completion = oneshot::Sender<Result<Order, TransportError>>;

/// One in-flight (or acknowledged) request keyed by client order ID.
///
/// The completion sender is consumed on the first terminal report; the entry
/// itself stays behind as the done-record so later cancel/amend calls can
/// read the cached wire side and ticker. Only the stale sweep removes
/// entries that never resolved.
pub struct PendingRequest {
    tx: Option<Completion>,
    created_at: Instant,
    pub exchange_order_id: Option<String>,
    pub wire_side: char,
    pub ticker: String,
}

impl PendingRequest {
    fn complete(&mut self, result: Result<Order, TransportError>) -> bool {
        match self.tx.take() {
            Some(tx) => {
                // The caller may have timed out and dropped its receiver.
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }
}

#[derive(Default)]
pub struct OrderTracker {
    requests: DashMap<String, PendingRequest>,
    client_to_exchange: DashMap<String, String>,
    exchange_to_client: DashMap<String, String>,
    update_sink: Mutex<Option<mpsc::Sender<Order>>>,
}

impl OrderTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an in-flight request before its message is committed.
    pub fn register(
        &self,
        client_order_id: &str,
        wire_side: char,
        ticker: &str,
    ) -> oneshot::Receiver<Result<Order, TransportError>> {
        let (tx, rx) = oneshot::channel();
        self.requests.insert(
            client_order_id.to_string(),
            PendingRequest {
                tx: Some(tx),
                created_at: Instant::now(),
                exchange_order_id: None,
                wire_side,
                ticker: ticker.to_string(),
            },
        );
        rx
    }

    /// Drop a registration whose message never reached the wire.
    pub fn remove(&self, client_order_id: &str) {
        self.requests.remove(client_order_id);
    }

    /// Reverse-map an exchange order ID to the client ID that placed it.
    pub fn resolve_exchange_id(&self, exchange_order_id: &str) -> Option<String> {
        self.exchange_to_client
            .get(exchange_order_id)
            .map(|entry| entry.value().clone())
    }

    pub fn exchange_id_for(&self, client_order_id: &str) -> Option<String> {
        self.client_to_exchange
            .get(client_order_id)
            .map(|entry| entry.value().clone())
    }

    /// Cached wire side and ticker from the original registration; FIX
    /// cancel/amend messages require both even though callers only supply
    /// the exchange order ID.
    pub fn cached_route(&self, client_order_id: &str) -> Option<(char, String)> {
        self.requests
            .get(client_order_id)
            .map(|entry| (entry.wire_side, entry.ticker.clone()))
    }

    /// Requests still awaiting a first terminal report.
    pub fn open_requests(&self) -> usize {
        self.requests
            .iter()
            .filter(|entry| entry.tx.is_some())
            .count()
    }

    /// At most one sink; registering again replaces the previous one.
    pub fn set_update_sink(&self, sink: mpsc::Sender<Order>) {
        *self.update_sink.lock() = Some(sink);
    }

    /// Fail unresolved requests older than `max_age` with `Timeout`. The
    /// per-call deadline in the transport is the primary mechanism; this is
    /// the backstop that reclaims entries whose caller already gave up.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let mut swept = 0;
        self.requests.retain(|client_order_id, pending| {
            if pending.tx.is_none() || pending.created_at.elapsed() <= max_age {
                return true;
            }
            warn!("⏱️ request {client_order_id} exceeded {max_age:?} — timing out");
            pending.complete(Err(TransportError::Timeout));
            swept += 1;
            false
        });
        swept
    }

    fn record_correlation(&self, report: &ExecutionReport) {
        if let (Some(client), Some(exchange)) =
            (&report.client_order_id, &report.exchange_order_id)
        {
            self.client_to_exchange
                .insert(client.clone(), exchange.clone());
            self.exchange_to_client
                .insert(exchange.clone(), client.clone());
        }
    }

    /// Key of the request this report answers: ClOrdID first, then
    /// OrigClOrdID for cancel/replace acks that rotated the ID.
    fn pending_key(&self, report: &ExecutionReport) -> Option<String> {
        [&report.client_order_id, &report.orig_client_order_id]
            .into_iter()
            .flatten()
            .find(|id| self.requests.contains_key(id.as_str()))
            .cloned()
    }

    fn emit_update(&self, order: Order) {
        let sink = self.update_sink.lock();
        let Some(sink) = sink.as_ref() else {
            debug!(
                "no update sink registered — dropping report for {}",
                order.client_order_id
            );
            return;
        };
        if let Err(err) = sink.try_send(order) {
            warn!("update sink rejected order report: {err}");
        }
    }
}

impl MessageListener for OrderTracker {
    fn on_execution_report(&self, report: &ExecutionReport) {
        self.record_correlation(report);
        let order = mapper::execution_report_to_order(report);
        let key = self.pending_key(report);

        match report.exec_type {
            // New / PendingNew: first acknowledgement of a create.
            '0' | 'A' => {
                let Some(key) = key else {
                    debug!("ack for untracked order {:?}", report.client_order_id);
                    return;
                };
                if let Some(mut pending) = self.requests.get_mut(&key) {
                    pending.exchange_order_id = report.exchange_order_id.clone();
                    if pending.complete(Ok(order)) {
                        info!(
                            "✅ ack {} → {}",
                            key,
                            report.exchange_order_id.as_deref().unwrap_or("?")
                        );
                    }
                }
            }
            // Rejected: terminal, entry is discarded.
            '8' => {
                let Some(key) = key else {
                    warn!("reject for untracked order {:?}", report.client_order_id);
                    return;
                };
                let resolved = match self.requests.get_mut(&key) {
                    Some(mut pending) => {
                        pending.complete(Err(TransportError::Rejected(report.rejection_reason())))
                    }
                    None => false,
                };
                if resolved {
                    warn!("❌ {} rejected: {}", key, report.rejection_reason());
                    self.requests.remove(&key);
                }
            }
            // Trades: answer an unresolved create, otherwise post-ack fill.
            'F' | '2' | '1' => match key {
                Some(key) => {
                    let resolved = self
                        .requests
                        .get_mut(&key)
                        .map(|mut pending| pending.complete(Ok(order.clone())))
                        .unwrap_or(false);
                    if !resolved {
                        self.emit_update(order);
                    }
                }
                None => self.emit_update(order),
            },
            // Canceled / Replaced / Expired: terminal for the request they
            // answer; unsolicited ones go to the sink.
            '4' | '5' | 'C' => match key {
                Some(key) => {
                    let resolved = self
                        .requests
                        .get_mut(&key)
                        .map(|mut pending| pending.complete(Ok(order.clone())))
                        .unwrap_or(false);
                    if resolved {
                        self.requests.remove(&key);
                    } else {
                        self.emit_update(order);
                    }
                }
                None => self.emit_update(order),
            },
            other => {
                debug!(
                    "ignoring ExecType {other} for {:?}",
                    report.client_order_id
                );
            }
        }
    }

    fn on_cancel_reject(&self, reject: &CancelReject) {
        // The only path a cancel or amend can be refused on; a rejected
        // cancel never arrives as an ExecutionReport.
        let Some(client_order_id) = &reject.client_order_id else {
            warn!("OrderCancelReject without ClOrdID: {:?}", reject.text);
            return;
        };
        let resolved = match self.requests.get_mut(client_order_id.as_str()) {
            Some(mut pending) => {
                pending.complete(Err(TransportError::Rejected(reject.reason())))
            }
            None => false,
        };
        if resolved {
            warn!("❌ cancel/amend {client_order_id} rejected: {}", reject.reason());
            self.requests.remove(client_order_id.as_str());
        } else {
            debug!("cancel reject for unknown or resolved request {client_order_id}");
        }
    }

    fn on_reject(&self, msg_type: &str, fields: &FixFields) {
        // Session-level and business rejects are logged only; a matching
        // pending either gets a proper reject report or times out.
        warn!(
            "🚫 session-level reject ({msg_type}): {}",
            fields.get(mapper::tag::TEXT).unwrap_or("no text")
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kalshi::types::OrderStatus;

    fn report(raw: &str) -> ExecutionReport {
        ExecutionReport::from_fields(&FixFields::parse(raw)).expect("parseable report")
    }

    #[tokio::test]
    async fn test_ack_completes_pending_and_populates_maps() {
        let tracker = OrderTracker::new();
        let rx = tracker.register("cl-1", '1', "TEST-MKT");

        tracker.on_execution_report(&report(
            "35=8|150=0|39=0|11=cl-1|37=X1|55=TEST-MKT|54=1|44=65|14=0|151=10",
        ));

        let order = rx.await.unwrap().unwrap();
        assert_eq!(order.exchange_order_id, "X1");
        assert_eq!(order.status, OrderStatus::Resting);
        assert_eq!(order.yes_price, 65);
        assert_eq!(order.no_price, 35);
        assert_eq!(tracker.resolve_exchange_id("X1").as_deref(), Some("cl-1"));
        assert_eq!(tracker.exchange_id_for("cl-1").as_deref(), Some("X1"));
        // Done-record survives for later cancel/amend routing.
        assert_eq!(tracker.cached_route("cl-1"), Some(('1', "TEST-MKT".into())));
        assert_eq!(tracker.open_requests(), 0);
    }

    #[tokio::test]
    async fn test_reject_fails_pending_and_discards_the_entry() {
        let tracker = OrderTracker::new();
        let rx = tracker.register("cl-2", '1', "TEST-MKT");

        tracker.on_execution_report(&report(
            "35=8|150=8|39=8|11=cl-2|55=TEST-MKT|54=1|103=7|58=insufficient funds",
        ));

        match rx.await.unwrap() {
            Err(TransportError::Rejected(reason)) => {
                assert_eq!(reason, "OrdRejReason=7 insufficient funds");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
        assert!(tracker.cached_route("cl-2").is_none());
    }

    #[tokio::test]
    async fn test_post_ack_fill_goes_to_sink_exactly_once() {
        let tracker = OrderTracker::new();
        let (sink_tx, mut sink_rx) = mpsc::channel(8);
        tracker.set_update_sink(sink_tx);

        let rx = tracker.register("cl-3", '1', "TEST-MKT");
        tracker.on_execution_report(&report(
            "35=8|150=0|39=0|11=cl-3|37=X3|55=TEST-MKT|54=1|44=40|14=0|151=10",
        ));
        // Ack resolves the caller, not the sink.
        assert!(rx.await.unwrap().is_ok());
        assert!(sink_rx.try_recv().is_err());

        // A later fill on the same ClOrdID cannot double-complete; it is a
        // sink update.
        tracker.on_execution_report(&report(
            "35=8|150=F|39=1|11=cl-3|37=X3|55=TEST-MKT|54=1|44=40|14=4|151=6",
        ));
        let update = sink_rx.try_recv().unwrap();
        assert_eq!(update.fill_count, 4);
        assert_eq!(update.remaining_count, 6);
        assert_eq!(update.initial_count, 10);
    }

    #[tokio::test]
    async fn test_cancel_reject_is_the_only_cancel_failure_path() {
        let tracker = OrderTracker::new();
        let rx = tracker.register("cl-cxl", '1', "TEST-MKT");

        tracker.on_cancel_reject(&CancelReject::from_fields(&FixFields::parse(
            "35=9|11=cl-cxl|41=cl-1|58=TOO_LATE_TO_CANCEL",
        )));

        assert_eq!(
            rx.await.unwrap(),
            Err(TransportError::Rejected("TOO_LATE_TO_CANCEL".into()))
        );
        assert!(tracker.cached_route("cl-cxl").is_none());
    }

    #[tokio::test]
    async fn test_cancel_ack_resolves_by_orig_client_order_id() {
        let tracker = OrderTracker::new();
        let rx = tracker.register("cl-old", '1', "TEST-MKT");

        // Exchange echoes a rotated ClOrdID; correlation falls back to 41.
        tracker.on_execution_report(&report(
            "35=8|150=4|39=4|11=cl-rotated|41=cl-old|37=X9|55=TEST-MKT|54=1|44=55|14=0|151=0",
        ));

        let order = rx.await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Canceled);
    }

    #[tokio::test]
    async fn test_replace_ack_completes_the_amend_request() {
        let tracker = OrderTracker::new();
        let rx = tracker.register("cl-amend", '1', "TEST-MKT");

        tracker.on_execution_report(&report(
            "35=8|150=5|39=5|11=cl-amend|41=cl-orig|37=X1|55=TEST-MKT|54=1|44=70|14=0|151=10",
        ));

        let order = rx.await.unwrap().unwrap();
        assert_eq!(order.yes_price, 70);
        assert_eq!(order.status, OrderStatus::Resting);
    }

    #[tokio::test]
    async fn test_sweep_times_out_stale_requests_and_routes_late_reports_to_sink() {
        let tracker = OrderTracker::new();
        let (sink_tx, mut sink_rx) = mpsc::channel(8);
        tracker.set_update_sink(sink_tx);

        let rx = tracker.register("cl-slow", '1', "TEST-MKT");
        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(tracker.sweep_stale(Duration::ZERO), 1);
        assert_eq!(rx.await.unwrap(), Err(TransportError::Timeout));

        // The late report finds no pending entry and becomes a sink update.
        tracker.on_execution_report(&report(
            "35=8|150=F|39=2|11=cl-slow|37=X7|55=TEST-MKT|54=1|44=60|14=10|151=0",
        ));
        let update = sink_rx.try_recv().unwrap();
        assert_eq!(update.status, OrderStatus::Executed);
    }

    #[tokio::test]
    async fn test_sweep_leaves_resolved_and_fresh_entries_alone() {
        let tracker = OrderTracker::new();
        let _rx_fresh = tracker.register("cl-fresh", '1', "TEST-MKT");
        let rx_done = tracker.register("cl-done", '1', "TEST-MKT");
        tracker.on_execution_report(&report(
            "35=8|150=0|39=0|11=cl-done|37=X5|55=TEST-MKT|54=1|44=50|14=0|151=1",
        ));
        assert!(rx_done.await.unwrap().is_ok());

        assert_eq!(tracker.sweep_stale(Duration::from_secs(60)), 0);
        assert!(tracker.cached_route("cl-done").is_some());
        assert!(tracker.cached_route("cl-fresh").is_some());
    }
}
