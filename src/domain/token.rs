//! Capability-token claims and verification errors.
//!
//! A token authorizes a single join of a specific room. The MAC itself is
//! computed by the infrastructure codec; this module only defines the
//! claims shape and the failure taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::error::ErrorCode;

/// Current token format version. Anything else is rejected.
pub const TOKEN_VERSION: u8 = 1;

/// Signed claims carried by a capability token.
///
/// Serialized as canonical JSON in declaration order; the serialized bytes
/// are what the MAC covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Format version (always [`TOKEN_VERSION`])
    pub v: u8,
    /// Room this token grants a join for
    pub rid: String,
    /// Absolute expiry, Unix epoch milliseconds
    pub exp: i64,
    /// Single-use token identifier
    pub jti: String,
}

/// Token verification failure.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TokenError {
    #[error("token is malformed")]
    Format,
    #[error("token MAC does not verify")]
    Mac,
    #[error("token is expired")]
    Expired,
    #[error("token was minted for a different room")]
    RoomMismatch,
}

impl TokenError {
    pub fn code(&self) -> ErrorCode {
        match self {
            TokenError::Format => ErrorCode::TokenFormat,
            TokenError::Mac => ErrorCode::TokenMac,
            TokenError::Expired => ErrorCode::TokenExpired,
            TokenError::RoomMismatch => ErrorCode::TokenRoomMismatch,
        }
    }
}
