//! HTTP API endpoint handlers (utility surface; the relay core is `/ws`).

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{
    Json,
    extract::{ConnectInfo, Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};

use crate::domain::RoomId;
use crate::infrastructure::dto::http::{HealthDto, RoomCreatedDto, RoomTokenDto};
use crate::ui::state::AppState;
use crate::usecase::IssueTokenError;

/// `POST /rooms` — create an empty room. Rate-limited per IP.
pub async fn create_room(
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Result<Json<RoomCreatedDto>, StatusCode> {
    if !state.allow_http_create(addr.ip()) {
        tracing::warn!("Room create from {} rate-limited", addr.ip());
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    match state.create_room_usecase.execute_empty().await {
        Ok((rid, fingerprint)) => Ok(Json(RoomCreatedDto {
            room_id: rid.into_string(),
            fingerprint: fingerprint.into_string(),
            network_ip: None,
        })),
        Err(e) => {
            tracing::warn!("Room create failed: {e}");
            state.store_ready.store(false, Ordering::SeqCst);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

/// `GET /rooms/{room_id}/token` — mint a short-lived join token.
pub async fn room_token(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomTokenDto>, StatusCode> {
    let rid = RoomId::new(room_id).map_err(|_| StatusCode::NOT_FOUND)?;

    match state.issue_token_usecase.execute(&rid).await {
        Ok((token, exp_unix_ms)) => Ok(Json(RoomTokenDto {
            room_id: rid.into_string(),
            token,
            exp_unix_ms,
        })),
        Err(IssueTokenError::NoRoom) => Err(StatusCode::NOT_FOUND),
        Err(IssueTokenError::Store(e)) => {
            tracing::warn!("Token mint failed: {e}");
            state.store_ready.store(false, Ordering::SeqCst);
            Err(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

fn health_snapshot(state: &AppState) -> (bool, HealthDto) {
    let store_reachable = state.store_ready.load(Ordering::SeqCst);
    let connections = state.meters.total();
    let max_connections = state.config.max_total_connections;
    let healthy = store_reachable && connections < max_connections;
    let dto = HealthDto {
        status: if healthy { "ok" } else { "degraded" },
        store_reachable,
        connections,
        max_connections,
    };
    (healthy, dto)
}

/// `GET /health` — current state, always 200.
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthDto> {
    let (_healthy, dto) = health_snapshot(&state);
    Json(dto)
}

/// `GET /ready` — 503 while the store is unreachable or the process is at
/// its connection ceiling.
pub async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let (healthy, dto) = health_snapshot(&state);
    if healthy {
        Json(dto).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(dto)).into_response()
    }
}

/// `GET /live` — OK whenever the process runs.
pub async fn live() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// `GET /metrics` — aggregate counters; Prometheus text, or JSON when the
/// client asks for it. Never contains identifiers, IPs, or payload bytes.
pub async fn metrics(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    let wants_json = headers
        .get(header::ACCEPT)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"));

    if wants_json {
        Json(state.metrics.render_json()).into_response()
    } else {
        (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            state.metrics.render_text(),
        )
            .into_response()
    }
}
