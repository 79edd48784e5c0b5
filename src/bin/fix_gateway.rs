//! FIX order gateway: session-backed order routing daemon.
//!
//! Wiring: env settings → transport mode → FIX session start → logon wait
//! → stale-request sweep → serve until ctrl-c. The strategy layer embeds
//! the same transport stack; this binary runs it standalone.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{info, warn};

use kalshi_fix_router::kalshi::fallback::FallbackTransport;
use kalshi_fix_router::kalshi::fix_transport::{FixTransport, DEFAULT_ORDER_TIMEOUT};
use kalshi_fix_router::kalshi::rest::{RestConfig, RestTransport};
use kalshi_fix_router::kalshi::session::{FixConfig, FixSessionManager};
use kalshi_fix_router::kalshi::tracker::OrderTracker;
use kalshi_fix_router::kalshi::transport::{AnyTransport, Transport, TransportMode};

fn order_timeout_from_env() -> Duration {
    std::env::var("KALSHI_ORDER_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_ORDER_TIMEOUT)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("═══════════════════════════════════════════════════");
    info!("  Kalshi Order Gateway — FIX with REST fallback");
    info!("═══════════════════════════════════════════════════");

    let mut mode = TransportMode::from_env();
    let fix_cfg = FixConfig::from_env();
    let rest_cfg = RestConfig::from_env();
    let order_timeout = order_timeout_from_env();

    if mode.wants_fix() && fix_cfg.sender_comp_id.is_empty() {
        warn!("⚠️ KALSHI_FIX_SENDER_COMP_ID is not set — falling back to the REST transport");
        mode = TransportMode::Rest;
    }

    let mut session_ref: Option<Arc<FixSessionManager>> = None;
    let transport = match mode {
        TransportMode::Rest => AnyTransport::Rest(RestTransport::new(rest_cfg)?),
        _ => {
            let tracker = Arc::new(OrderTracker::new());
            let (update_tx, mut update_rx) = mpsc::channel(256);
            tracker.set_update_sink(update_tx);

            let session = Arc::new(FixSessionManager::new(fix_cfg));
            session.add_message_listener(tracker.clone());
            {
                let tracker = Arc::clone(&tracker);
                session.on_state_change(move |state| {
                    info!(
                        "📡 session → {} ({} open requests)",
                        state.as_str(),
                        tracker.open_requests()
                    );
                });
            }
            session.start()?;
            if session.await_logon(Duration::from_secs(30)).await {
                info!("✅ FIX session logged on");
            } else {
                warn!("⏱️ logon still pending after 30s — the engine keeps reconnecting");
            }

            // Backstop for requests whose caller already timed out.
            {
                let tracker = Arc::clone(&tracker);
                tokio::spawn(async move {
                    let mut tick = tokio::time::interval(Duration::from_secs(1));
                    loop {
                        tick.tick().await;
                        tracker.sweep_stale(order_timeout);
                    }
                });
            }

            // Post-ack reports feed the platform's live order store; this
            // daemon surfaces them in the log.
            tokio::spawn(async move {
                while let Some(order) = update_rx.recv().await {
                    info!(
                        "🔔 order update: {} {} fill={} remaining={}",
                        order.exchange_order_id,
                        order.status.as_str(),
                        order.fill_count,
                        order.remaining_count
                    );
                }
            });

            let fix = FixTransport::new(Arc::clone(&session), tracker, order_timeout);
            session_ref = Some(session);
            match mode {
                TransportMode::Fix => AnyTransport::Fix(fix),
                _ => AnyTransport::Fallback(FallbackTransport::new(
                    fix,
                    RestTransport::new(rest_cfg)?,
                )),
            }
        }
    };

    info!(
        "🚦 gateway ready — transport={} available={}",
        transport.kind().as_str(),
        transport.is_available()
    );

    let mut heartbeat = tokio::time::interval(Duration::from_secs(30));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = heartbeat.tick() => {
                info!(
                    "🚦 transport={} available={}",
                    transport.kind().as_str(),
                    transport.is_available()
                );
            }
        }
    }

    info!("🧹 shutting down");
    if let Some(session) = session_ref {
        session.stop();
    }
    Ok(())
}
