//! REST order transport over the exchange's trade API.
//!
//! This is the always-available collaborator the fallback degrades to.
//! Request signing is owned by the operator's credential setup; the
//! transport attaches a pre-issued bearer token and speaks plain JSON.

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::transport::{Transport, TransportKind};
use super::types::{
    Action, AmendOrderRequest, CreateOrderRequest, Order, OrderStatus, SelfTradePrevention, Side,
    TimeInForce, TransportError,
};

/// Exchange-documented cap on IDs per batched cancel call.
pub const BATCH_CANCEL_LIMIT: usize = 20;

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub request_timeout: Duration,
}

impl Default for RestConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.elections.kalshi.com/trade-api/v2".to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
        }
    }
}

impl RestConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("KALSHI_REST_URL") {
            cfg.base_url = v.trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("KALSHI_REST_TOKEN") {
            cfg.token = Some(v);
        }
        if let Ok(v) = std::env::var("KALSHI_REST_TIMEOUT_SECS") {
            if let Ok(secs) = v.parse() {
                cfg.request_timeout = Duration::from_secs(secs);
            }
        }
        cfg
    }
}

// ─────────────────────────────────────────────────────────
// Wire models
// ─────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct CreateOrderBody<'a> {
    ticker: &'a str,
    client_order_id: &'a str,
    action: Action,
    side: Side,
    count: u32,
    #[serde(rename = "type")]
    order_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_in_force: Option<TimeInForce>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    post_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    self_trade_prevention_type: Option<SelfTradePrevention>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    cancel_on_pause: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    order_group_id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_execution_cost: Option<i64>,
}

#[derive(Debug, Serialize)]
struct AmendOrderBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    yes_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    no_price: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    count: Option<u32>,
}

#[derive(Debug, Serialize)]
struct BatchCancelBody<'a> {
    ids: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OrderEnvelope {
    order: OrderModel,
}

/// Permissive order shape; cancel responses omit some fields.
#[derive(Debug, Deserialize)]
struct OrderModel {
    #[serde(default)]
    order_id: String,
    #[serde(default)]
    client_order_id: String,
    #[serde(default)]
    ticker: String,
    action: Option<Action>,
    side: Option<Side>,
    #[serde(default)]
    yes_price: Option<i64>,
    #[serde(default)]
    no_price: Option<i64>,
    #[serde(default)]
    initial_count: Option<u32>,
    #[serde(default)]
    fill_count: u32,
    #[serde(default)]
    remaining_count: u32,
    #[serde(default)]
    status: String,
}

impl OrderModel {
    fn into_order(self) -> Order {
        let yes_price = self
            .yes_price
            .or(self.no_price.map(|no| 100 - no))
            .unwrap_or(0);
        Order {
            exchange_order_id: self.order_id,
            client_order_id: self.client_order_id,
            ticker: self.ticker,
            action: self.action.unwrap_or(Action::Buy),
            side: self.side.unwrap_or(Side::Yes),
            order_type: "limit",
            yes_price,
            no_price: 100 - yes_price,
            initial_count: self
                .initial_count
                .unwrap_or(self.fill_count + self.remaining_count),
            fill_count: self.fill_count,
            remaining_count: self.remaining_count,
            status: OrderStatus::from_api(&self.status),
            last_update: chrono::Utc::now(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    error: Option<ApiErrorBody>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: String,
}

// ─────────────────────────────────────────────────────────
// Transport
// ─────────────────────────────────────────────────────────

pub struct RestTransport {
    cfg: RestConfig,
    http: reqwest::Client,
}

impl RestTransport {
    pub fn new(cfg: RestConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout)
            .build()?;
        Ok(Self { cfg, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.cfg.base_url, path)
    }

    fn authed(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.cfg.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn order_from_response(
        &self,
        response: reqwest::Response,
    ) -> Result<Order, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, &body));
        }
        let envelope: OrderEnvelope = response
            .json()
            .await
            .map_err(|err| TransportError::TransportUnavailable(format!("bad order body: {err}")))?;
        Ok(envelope.order.into_order())
    }
}

fn map_request_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::TransportUnavailable(err.to_string())
    }
}

fn map_status(status: StatusCode, body: &str) -> TransportError {
    let message = serde_json::from_str::<ApiError>(body)
        .ok()
        .and_then(|api| api.error)
        .map(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| format!("HTTP {status}"));
    match status {
        StatusCode::NOT_FOUND => TransportError::UnknownOrder(message),
        s if s.is_client_error() => TransportError::Rejected(message),
        _ => TransportError::TransportUnavailable(message),
    }
}

impl Transport for RestTransport {
    async fn create_order(&self, req: &CreateOrderRequest) -> Result<Order, TransportError> {
        req.validate()?;
        let client_order_id = req
            .client_order_id
            .clone()
            .unwrap_or_else(super::mapper::new_client_order_id);
        // Yes wins when both legs are priced, same as the FIX path.
        let (yes_price, no_price) = if req.yes_price.is_some() {
            (req.yes_price, None)
        } else {
            (None, req.no_price)
        };
        let body = CreateOrderBody {
            ticker: &req.ticker,
            client_order_id: &client_order_id,
            action: req.action(),
            side: req.side(),
            count: req.count,
            order_type: "limit",
            yes_price,
            no_price,
            time_in_force: req.time_in_force,
            post_only: req.post_only,
            self_trade_prevention_type: req.self_trade_prevention,
            cancel_on_pause: req.cancel_on_pause,
            order_group_id: req.order_group.as_deref(),
            max_execution_cost: req.max_execution_cost,
        };
        let response = self
            .authed(self.http.post(self.url("/portfolio/orders")))
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;
        let order = self.order_from_response(response).await?;
        info!("📤 REST order placed: {} ({})", order.exchange_order_id, order.status.as_str());
        Ok(order)
    }

    async fn cancel_order(&self, exchange_order_id: &str) -> Result<Order, TransportError> {
        let response = self
            .authed(
                self.http
                    .delete(self.url(&format!("/portfolio/orders/{exchange_order_id}"))),
            )
            .send()
            .await
            .map_err(map_request_error)?;
        self.order_from_response(response).await
    }

    async fn cancel_orders(&self, exchange_order_ids: &[String]) -> Result<(), TransportError> {
        // Batched endpoint, capped per call; a failed wire call fails its
        // whole chunk atomically.
        for chunk in exchange_order_ids.chunks(BATCH_CANCEL_LIMIT) {
            let response = self
                .authed(self.http.delete(self.url("/portfolio/orders/batched")))
                .json(&BatchCancelBody { ids: chunk })
                .send()
                .await
                .map_err(map_request_error)?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(map_status(status, &body));
            }
            info!("🗑️ REST batch canceled {} orders", chunk.len());
        }
        Ok(())
    }

    async fn amend_order(
        &self,
        exchange_order_id: &str,
        req: &AmendOrderRequest,
    ) -> Result<Order, TransportError> {
        req.validate()?;
        let body = AmendOrderBody {
            yes_price: req.yes_price,
            // Yes wins; never send both legs.
            no_price: if req.yes_price.is_some() {
                None
            } else {
                req.no_price
            },
            count: req.count,
        };
        let response = self
            .authed(
                self.http
                    .post(self.url(&format!("/portfolio/orders/{exchange_order_id}/amend"))),
            )
            .json(&body)
            .send()
            .await
            .map_err(map_request_error)?;
        let order = self.order_from_response(response).await;
        if let Err(err) = &order {
            warn!("REST amend {exchange_order_id} failed: {err}");
        }
        order
    }

    /// The request/response path has no session to lose.
    fn is_available(&self) -> bool {
        true
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_model_maps_to_domain() {
        let json = r#"{
            "order": {
                "order_id": "X1",
                "client_order_id": "cl-1",
                "ticker": "TEST-MKT",
                "action": "buy",
                "side": "yes",
                "yes_price": 65,
                "initial_count": 10,
                "fill_count": 0,
                "remaining_count": 10,
                "status": "resting"
            }
        }"#;
        let envelope: OrderEnvelope = serde_json::from_str(json).unwrap();
        let order = envelope.order.into_order();
        assert_eq!(order.exchange_order_id, "X1");
        assert_eq!(order.yes_price, 65);
        assert_eq!(order.no_price, 35);
        assert_eq!(order.status, OrderStatus::Resting);
        assert_eq!(order.initial_count, 10);
    }

    #[test]
    fn test_order_model_complements_a_no_leg_price() {
        let json = r#"{"order": {"order_id": "X2", "side": "no", "action": "buy", "no_price": 30, "status": "resting"}}"#;
        let envelope: OrderEnvelope = serde_json::from_str(json).unwrap();
        let order = envelope.order.into_order();
        assert_eq!(order.yes_price, 70);
        assert_eq!(order.no_price, 30);
        assert_eq!(order.side, Side::No);
    }

    #[test]
    fn test_status_mapping() {
        let not_found = map_status(StatusCode::NOT_FOUND, "");
        assert!(matches!(not_found, TransportError::UnknownOrder(_)));

        let rejected = map_status(
            StatusCode::BAD_REQUEST,
            r#"{"error": {"message": "insufficient balance"}}"#,
        );
        assert_eq!(
            rejected,
            TransportError::Rejected("insufficient balance".into())
        );

        let unavailable = map_status(StatusCode::BAD_GATEWAY, "");
        assert!(matches!(
            unavailable,
            TransportError::TransportUnavailable(_)
        ));
    }

    #[test]
    fn test_amend_body_never_sends_both_legs() {
        let body = AmendOrderBody {
            yes_price: Some(70),
            no_price: None,
            count: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value, serde_json::json!({"yes_price": 70}));
    }

    #[test]
    fn test_create_body_serializes_optional_flags() {
        let body = CreateOrderBody {
            ticker: "TEST-MKT",
            client_order_id: "cl-1",
            action: Action::Buy,
            side: Side::No,
            count: 5,
            order_type: "limit",
            yes_price: None,
            no_price: Some(30),
            time_in_force: Some(TimeInForce::Ioc),
            post_only: true,
            self_trade_prevention_type: None,
            cancel_on_pause: false,
            order_group_id: None,
            max_execution_cost: None,
        };
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["side"], "no");
        assert_eq!(value["no_price"], 30);
        assert_eq!(value["time_in_force"], "ioc");
        assert_eq!(value["post_only"], true);
        assert!(value.get("yes_price").is_none());
        assert!(value.get("cancel_on_pause").is_none());
    }
}
