//! HTTP API response DTOs.

use serde::Serialize;

/// Response of `POST /rooms`.
#[derive(Debug, Serialize)]
pub struct RoomCreatedDto {
    pub room_id: String,
    pub fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network_ip: Option<String>,
}

/// Response of `GET /rooms/{room_id}/token`.
#[derive(Debug, Serialize)]
pub struct RoomTokenDto {
    pub room_id: String,
    pub token: String,
    pub exp_unix_ms: i64,
}

/// Response of `GET /health` and `GET /ready`.
#[derive(Debug, Serialize)]
pub struct HealthDto {
    pub status: &'static str,
    pub store_reachable: bool,
    pub connections: usize,
    pub max_connections: usize,
}
