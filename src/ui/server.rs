//! Server execution logic.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;

use crate::infrastructure::keepalive::spawn_keepalive;
use crate::ui::handler::{http as http_handler, websocket::websocket_handler};
use crate::ui::signal::shutdown_signal;
use crate::ui::state::AppState;

/// How often the readiness probe pings the store.
const STORE_PROBE_INTERVAL_MS: u64 = 2_000;

/// Close code for a graceful shutdown.
const CLOSE_GOING_AWAY: u16 = 1001;

/// Blind relay server
///
/// Wires the HTTP/WebSocket surface over the shared [`AppState`] and runs
/// until a shutdown signal arrives, then drains connections within the
/// configured deadline.
pub struct Server {
    state: Arc<AppState>,
}

impl Server {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Run the relay server.
    ///
    /// # Arguments
    ///
    /// * `host` - The host address to bind to (e.g., "127.0.0.1")
    /// * `port` - The port number to bind to (e.g., 8080)
    pub async fn run(self, host: String, port: u16) -> Result<(), Box<dyn std::error::Error>> {
        let state = self.state;

        let app = Router::new()
            // WebSocket relay core
            .route("/ws", get(websocket_handler))
            // HTTP utility surface
            .route("/rooms", post(http_handler::create_room))
            .route("/rooms/{room_id}/token", get(http_handler::room_token))
            .route("/health", get(http_handler::health))
            .route("/ready", get(http_handler::ready))
            .route("/live", get(http_handler::live))
            .route("/metrics", get(http_handler::metrics))
            .layer(CorsLayer::permissive())
            .with_state(state.clone());

        let bind_addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

        tracing::info!("Relay listening on {}", listener.local_addr()?);
        tracing::info!("Connect to: ws://{}/ws", bind_addr);
        tracing::info!("Press Ctrl+C to shutdown gracefully");

        // background drivers
        let keepalive_task = spawn_keepalive(
            state.pusher.clone(),
            state.clock.clone(),
            state.metrics.clone(),
            state.config.ws_ping_interval_ms,
            state.config.ws_ping_timeout_ms,
        );
        let probe_task = spawn_store_probe(state.clone());

        // serve in its own task so shutdown can be bounded by a deadline
        let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
        let service = app.into_make_service_with_connect_info::<SocketAddr>();
        let serve_task = tokio::spawn(async move {
            axum::serve(listener, service)
                .with_graceful_shutdown(async {
                    let _ = stop_rx.await;
                })
                .await
        });

        shutdown_signal().await;

        // stop accepting, then tell every socket we are going away
        let _ = stop_tx.send(());
        let open = state.pusher.snapshot_ids();
        tracing::info!("Closing {} open connection(s)", open.len());
        for conn in open {
            state.pusher.close(&conn, CLOSE_GOING_AWAY, "going away");
        }

        let deadline = Duration::from_millis(state.config.graceful_shutdown_deadline_ms);
        match tokio::time::timeout(deadline, serve_task).await {
            Ok(joined) => {
                joined??;
                tracing::info!("Server shutdown complete");
            }
            Err(_) => {
                tracing::warn!("Shutdown deadline exceeded, abandoning in-flight tasks");
            }
        }

        keepalive_task.abort();
        probe_task.abort();
        Ok(())
    }
}

/// Keep the readiness flag in sync with actual store reachability.
fn spawn_store_probe(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(STORE_PROBE_INTERVAL_MS));
        loop {
            ticker.tick().await;
            let reachable = state.store.ping().await.is_ok();
            let was = state.store_ready.swap(reachable, Ordering::SeqCst);
            if was && !reachable {
                tracing::error!("Key-value store became unreachable; readiness is false");
            } else if !was && reachable {
                tracing::info!("Key-value store reachable again; readiness restored");
            }
        }
    })
}
