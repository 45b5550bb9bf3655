//! Keep-alive driver.
//!
//! A single periodic sweep over every open connection: peers with an
//! unanswered ping older than the timeout are terminated, everyone else
//! gets a fresh ping. Liveness is the only read timeout this server has;
//! the receive loops themselves never time out.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::common::time::Clock;
use crate::infrastructure::message_pusher::WebSocketMessagePusher;
use crate::infrastructure::metrics::Metrics;

/// Spawn the sweep task. Runs until aborted at shutdown.
pub fn spawn_keepalive(
    pusher: Arc<WebSocketMessagePusher>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    interval_ms: i64,
    timeout_ms: i64,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms.max(1) as u64));
        // skip the immediate first tick; fresh connections answered HELLO
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let outcome = pusher.keepalive_sweep(clock.now_unix_millis(), timeout_ms);
            if outcome.terminated > 0 {
                metrics
                    .keepalive_terminations_total
                    .inc_by(outcome.terminated as u64);
                tracing::info!(
                    "Keep-alive sweep terminated {} silent connection(s), pinged {}",
                    outcome.terminated,
                    outcome.pinged
                );
            }
        }
    })
}
