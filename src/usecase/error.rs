//! UseCase 層のエラー定義
//!
//! それぞれのエラーはワイヤ契約上の安定したエラーコードに対応します。
//! close するか ERROR フレームで返すかの判断は UI 層の 1 箇所で行われ、
//! この層はコードの対応だけを知っています。

use thiserror::Error;

use crate::domain::{ErrorCode, StoreError, TokenError};

/// ルーム作成の失敗
#[derive(Debug, Error)]
pub enum CreateRoomError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CreateRoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CreateRoomError::Store(_) => ErrorCode::ServiceUnavailable,
        }
    }
}

/// 参加要求の失敗
#[derive(Debug, Error)]
pub enum JoinRoomError {
    #[error(transparent)]
    Token(TokenError),
    #[error("token was already consumed")]
    Replay,
    #[error("room does not exist")]
    NoRoom,
    #[error("room is full")]
    Full,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl JoinRoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            JoinRoomError::Token(e) => e.code(),
            JoinRoomError::Replay => ErrorCode::TokenReplay,
            JoinRoomError::NoRoom => ErrorCode::NoRoom,
            JoinRoomError::Full => ErrorCode::RoomFull,
            JoinRoomError::Store(_) => ErrorCode::ServiceUnavailable,
        }
    }
}

/// 退出の失敗
#[derive(Debug, Error)]
pub enum LeaveRoomError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LeaveRoomError {
    pub fn code(&self) -> ErrorCode {
        match self {
            LeaveRoomError::Store(_) => ErrorCode::ServiceUnavailable,
        }
    }
}

/// 中継の失敗（ペイロード上限違反）
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RelayError {
    #[error("ciphertext exceeds the configured maximum")]
    CiphertextTooLarge,
    #[error("media envelope exceeds the configured maximum")]
    MediaTooLarge,
}

impl RelayError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RelayError::CiphertextTooLarge => ErrorCode::CiphertextTooLarge,
            RelayError::MediaTooLarge => ErrorCode::MediaTooLarge,
        }
    }
}

/// HTTP トークン発行の失敗
#[derive(Debug, Error)]
pub enum IssueTokenError {
    #[error("room does not exist")]
    NoRoom,
    #[error(transparent)]
    Store(#[from] StoreError),
}
