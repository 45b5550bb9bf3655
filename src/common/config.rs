//! Server configuration loaded from environment variables.
//!
//! Each option has a documented default; out-of-range values are clamped
//! into their bounds with a logged warning rather than refusing to start.
//! Only `JOIN_TOKEN_SECRET` and `KV_URL` are required.

use std::{env, fmt::Display, str::FromStr};

use tracing::{info, warn};

/// Runtime configuration for the relay server.
#[derive(Debug, Clone)]
pub struct Config {
    /// Maximum participants per room (1..=50)
    pub room_max_participants: u32,
    /// TTL applied to every room key in the external store (>= 60s)
    pub room_key_ttl_ms: i64,
    /// Interval between rotations of the per-room capability token (>= 10s)
    pub qr_rotation_ms: i64,
    /// Maximum inbound WebSocket frame size in bytes
    pub max_ws_frame_bytes: usize,
    /// Maximum ciphertext string length in an APP_MSG
    pub max_ct_bytes: usize,
    /// Message-count budget per connection per 10 seconds
    pub max_msgs_per_10s: u64,
    /// Byte budget per connection per 10 seconds
    pub max_bytes_per_10s: u64,
    /// Maximum concurrently open connections per remote IP
    pub max_conns_per_ip: usize,
    /// Process-wide connection ceiling
    pub max_total_connections: usize,
    /// Keep-alive sweep interval
    pub ws_ping_interval_ms: i64,
    /// Time allowed for a pong after a ping was dispatched
    pub ws_ping_timeout_ms: i64,
    /// Bound on the drain phase of graceful shutdown
    pub graceful_shutdown_deadline_ms: u64,
    /// Process-wide MAC secret for capability tokens (>= 32 bytes)
    pub join_token_secret: Vec<u8>,
    /// Connection URL of the external key-value store
    pub kv_url: String,
    /// Connect timeout for the store client
    pub kv_connect_timeout_ms: u64,
    /// Per-request retry budget for the store client
    pub kv_max_retries_per_request: usize,
}

impl Config {
    /// Load the configuration from the environment.
    ///
    /// Panics with a descriptive message when a required variable is
    /// missing or malformed; this runs once at startup.
    pub fn load() -> Self {
        let secret = require("JOIN_TOKEN_SECRET").into_bytes();
        if secret.len() < 32 {
            panic!("JOIN_TOKEN_SECRET must be at least 32 bytes");
        }

        Self {
            room_max_participants: clamp(
                try_load("ROOM_MAX_PARTICIPANTS", "10"),
                1,
                50,
                "ROOM_MAX_PARTICIPANTS",
            ),
            room_key_ttl_ms: clamp_min(
                try_load("ROOM_KEY_TTL_MS", "600000"),
                60_000,
                "ROOM_KEY_TTL_MS",
            ),
            qr_rotation_ms: clamp_min(try_load("QR_ROTATION_MS", "60000"), 10_000, "QR_ROTATION_MS"),
            max_ws_frame_bytes: try_load("MAX_WS_FRAME_BYTES", "262144"),
            max_ct_bytes: try_load("MAX_CT_BYTES", "65536"),
            max_msgs_per_10s: try_load("MAX_MSGS_PER_10S", "200"),
            max_bytes_per_10s: try_load("MAX_BYTES_PER_10S", "1048576"),
            max_conns_per_ip: try_load("MAX_CONNS_PER_IP", "50"),
            max_total_connections: try_load("MAX_TOTAL_CONNECTIONS", "10000"),
            ws_ping_interval_ms: try_load("WS_PING_INTERVAL_MS", "30000"),
            ws_ping_timeout_ms: try_load("WS_PING_TIMEOUT_MS", "5000"),
            graceful_shutdown_deadline_ms: try_load("GRACEFUL_SHUTDOWN_DEADLINE_MS", "30000"),
            join_token_secret: secret,
            kv_url: require("KV_URL"),
            kv_connect_timeout_ms: try_load("KV_CONNECT_TIMEOUT_MS", "1000"),
            kv_max_retries_per_request: try_load("KV_MAX_RETRIES_PER_REQUEST", "2"),
        }
    }
}

fn var(key: &str) -> Result<String, ()> {
    env::var(key).map_err(|_| ())
}

fn try_load<T: FromStr>(key: &str, default: &str) -> T
where
    T::Err: Display,
{
    var(key)
        .unwrap_or_else(|_| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e| {
            warn!("Invalid {key} value: {e}");
        })
        .expect("Environment misconfigured!")
}

fn require(key: &str) -> String {
    var(key)
        .map_err(|_| {
            warn!("Required environment variable {key} is missing");
        })
        .expect("Environment misconfigured!")
}

fn clamp<T: Ord + Display + Copy>(value: T, min: T, max: T, key: &str) -> T {
    if value < min || value > max {
        warn!("{key}={value} outside {min}..={max}, clamping");
    }
    value.max(min).min(max)
}

fn clamp_min<T: Ord + Display + Copy>(value: T, min: T, key: &str) -> T {
    if value < min {
        warn!("{key}={value} below minimum {min}, clamping");
    }
    value.max(min)
}
