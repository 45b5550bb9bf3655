//! WebSocket wire envelopes.
//!
//! Every frame in either direction is a JSON text envelope
//! `{v:1, t:<tag>, id:<opaque request id>, body:<tag-specific>}`.
//! Replies echo the request id; server-originated events carry a fresh
//! opaque id. Ciphertext and media chunks pass through these types as
//! opaque strings and are never interpreted.

use rand::RngCore;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};

use crate::domain::ErrorCode;

/// Wire protocol version. Envelopes with any other version are rejected.
pub const PROTOCOL_VERSION: u8 = 1;

// ========================================
// Client → Server
// ========================================

/// Inbound envelope.
#[derive(Debug, Deserialize)]
pub struct ClientEnvelope {
    pub v: u8,
    pub id: String,
    #[serde(flatten)]
    pub frame: ClientFrame,
}

/// Typed client frame; `t` selects the variant, `body` carries the fields.
#[derive(Debug, Deserialize)]
#[serde(tag = "t", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Ping,
    RoomCreate,
    JoinRequest {
        rid: String,
        token: String,
        #[serde(default)]
        label: Option<String>,
    },
    Leave {
        rid: String,
    },
    AppMsg {
        rid: String,
        #[serde(rename = "ciphertextB64")]
        ciphertext_b64: String,
    },
    MediaMsg {
        rid: String,
        mime: String,
        size: u64,
        chunk_size: u64,
        chunks: Vec<String>,
        #[serde(default)]
        from: Option<String>,
    },
}

// ========================================
// Server → Client
// ========================================

/// Outbound envelope.
#[derive(Debug, Serialize)]
pub struct ServerEnvelope {
    pub v: u8,
    pub id: String,
    #[serde(flatten)]
    pub frame: ServerFrame,
}

impl ServerEnvelope {
    /// Reply to a specific request, echoing its id.
    pub fn reply(request_id: &str, frame: ServerFrame) -> Self {
        Self {
            v: PROTOCOL_VERSION,
            id: request_id.to_string(),
            frame,
        }
    }

    /// Server-originated event with a fresh opaque id.
    pub fn event(frame: ServerFrame) -> Self {
        let mut buf = [0u8; 4];
        OsRng.fill_bytes(&mut buf);
        Self {
            v: PROTOCOL_VERSION,
            id: hex::encode(buf),
            frame,
        }
    }

    /// Serialize once; the same bytes are reused for every recipient.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("server frame serializes")
    }
}

/// Severity of a `SYSTEM_MSG`.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemMsgKind {
    Info,
    Warn,
    Error,
}

/// Typed server frame.
#[derive(Debug, Serialize)]
#[serde(tag = "t", content = "body", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerFrame {
    Hello {
        server_time: i64,
    },
    Pong,
    RoomCreated {
        rid: String,
        qr_token: String,
        qr_exp: i64,
        max: u32,
    },
    Joined {
        rid: String,
        participants: u32,
        max: u32,
        label: String,
        next_token: String,
        next_token_exp: i64,
    },
    Left {
        rid: String,
    },
    QrRotated {
        rid: String,
        qr_token: String,
        qr_exp: i64,
    },
    RoomStats {
        rid: String,
        participants: u32,
        max: u32,
    },
    SystemMsg {
        text: String,
        r#type: SystemMsgKind,
    },
    AppMsg {
        rid: String,
        #[serde(rename = "ciphertextB64")]
        ciphertext_b64: String,
        from: String,
    },
    MediaMsg {
        rid: String,
        mime: String,
        size: u64,
        chunk_size: u64,
        chunks: Vec<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
    },
    Error {
        code: String,
        retryable: bool,
    },
}

impl ServerFrame {
    /// Build an `ERROR` frame from a wire code.
    pub fn error(code: ErrorCode) -> Self {
        ServerFrame::Error {
            code: code.as_str().to_string(),
            retryable: code.retryable(),
        }
    }
}
