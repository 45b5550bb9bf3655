//! Stable wire-level error codes.
//!
//! These code strings are part of the wire contract; clients match on them
//! to decide whether a retry can succeed.

use std::fmt;

/// Error code carried in an `ERROR` frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    AlreadyInRoom,
    NotInRoom,
    NoRoom,
    RoomFull,
    TokenFormat,
    TokenMac,
    TokenExpired,
    TokenReplay,
    TokenRoomMismatch,
    CiphertextTooLarge,
    MediaTooLarge,
    ServiceUnavailable,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::AlreadyInRoom => "ALREADY_IN_ROOM",
            ErrorCode::NotInRoom => "NOT_IN_ROOM",
            ErrorCode::NoRoom => "NO_ROOM",
            ErrorCode::RoomFull => "ROOM_FULL",
            ErrorCode::TokenFormat => "TOKEN_FORMAT",
            ErrorCode::TokenMac => "TOKEN_MAC",
            ErrorCode::TokenExpired => "TOKEN_EXPIRED",
            ErrorCode::TokenReplay => "TOKEN_REPLAY",
            ErrorCode::TokenRoomMismatch => "TOKEN_ROOM_MISMATCH",
            ErrorCode::CiphertextTooLarge => "CIPHERTEXT_TOO_LARGE",
            ErrorCode::MediaTooLarge => "MEDIA_TOO_LARGE",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
        }
    }

    /// Whether the client can meaningfully retry the same request.
    ///
    /// A full room may empty, a fresh token can replace an expired or
    /// replayed one, and a store outage is transient; mismatches and
    /// oversized payloads will fail the same way every time.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::RoomFull
                | ErrorCode::TokenMac
                | ErrorCode::TokenExpired
                | ErrorCode::TokenReplay
                | ErrorCode::ServiceUnavailable
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_strings_are_stable() {
        // テスト項目: ワイヤ契約のコード文字列が仕様どおり
        // given (前提条件):

        // when (操作):

        // then (期待する結果):
        assert_eq!(ErrorCode::AlreadyInRoom.as_str(), "ALREADY_IN_ROOM");
        assert_eq!(ErrorCode::NotInRoom.as_str(), "NOT_IN_ROOM");
        assert_eq!(ErrorCode::NoRoom.as_str(), "NO_ROOM");
        assert_eq!(ErrorCode::RoomFull.as_str(), "ROOM_FULL");
        assert_eq!(ErrorCode::TokenFormat.as_str(), "TOKEN_FORMAT");
        assert_eq!(ErrorCode::TokenMac.as_str(), "TOKEN_MAC");
        assert_eq!(ErrorCode::TokenExpired.as_str(), "TOKEN_EXPIRED");
        assert_eq!(ErrorCode::TokenReplay.as_str(), "TOKEN_REPLAY");
        assert_eq!(ErrorCode::TokenRoomMismatch.as_str(), "TOKEN_ROOM_MISMATCH");
        assert_eq!(ErrorCode::CiphertextTooLarge.as_str(), "CIPHERTEXT_TOO_LARGE");
        assert_eq!(ErrorCode::MediaTooLarge.as_str(), "MEDIA_TOO_LARGE");
    }

    #[test]
    fn test_retryability_matches_semantics() {
        // テスト項目: retryable 判定が意味論に従う（満室と期限切れは再試行可、
        // 不一致系は不可）
        // given (前提条件):

        // when (操作):

        // then (期待する結果):
        assert!(ErrorCode::RoomFull.retryable());
        assert!(ErrorCode::TokenExpired.retryable());
        assert!(ErrorCode::TokenReplay.retryable());
        assert!(ErrorCode::TokenMac.retryable());
        assert!(ErrorCode::ServiceUnavailable.retryable());
        assert!(!ErrorCode::TokenFormat.retryable());
        assert!(!ErrorCode::TokenRoomMismatch.retryable());
        assert!(!ErrorCode::AlreadyInRoom.retryable());
        assert!(!ErrorCode::NotInRoom.retryable());
        assert!(!ErrorCode::NoRoom.retryable());
        assert!(!ErrorCode::CiphertextTooLarge.retryable());
        assert!(!ErrorCode::MediaTooLarge.retryable());
    }
}
