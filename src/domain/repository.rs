//! Repository trait 定義
//!
//! ドメイン層が必要とするデータアクセスのインターフェースを定義します。
//! 具体的な実装は Infrastructure 層が提供します（依存性の逆転）。
//!
//! ルームのメンバーシップは外部 KV ストアが正であり、容量チェックと
//! メンバー変更が交錯しないよう `try_join` / `leave` / `mark_jti` は
//! ストア側で単一のアトミック操作として実行されなければなりません。

use async_trait::async_trait;
use thiserror::Error;

use super::value_object::{ConnId, Jti, RoomId};

/// Outcome of an atomic join attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The connection was added; `count` is the new room size.
    Joined { count: u32 },
    /// The connection was already a member; `count` is the current size.
    /// TTLs were refreshed.
    AlreadyMember { count: u32 },
    /// No room with this id exists (never created, or expired).
    NoRoom,
    /// The room is at its participant ceiling.
    Full,
}

/// Failure talking to the external store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store unreachable or request timed out. Transient; callers surface
    /// a retryable error and readiness flips false.
    #[error("key-value store unavailable: {0}")]
    Unavailable(String),
    /// Store reachable but returned something the adapter cannot decode.
    #[error("key-value store returned malformed data: {0}")]
    Malformed(String),
}

/// Room Store trait
///
/// ドメイン層が必要とするデータストアへのインターフェース。
/// UseCase 層はこの trait に依存し、Infrastructure 層の具体的な実装には
/// 依存しない。
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Create an empty room (HTTP create path). Idempotent on an existing
    /// room: refreshes its TTL instead of resetting it.
    async fn create_empty(&self, rid: &RoomId) -> Result<(), StoreError>;

    /// Create a room with its first member (WebSocket create path).
    async fn create_with(&self, rid: &RoomId, conn: &ConnId) -> Result<(), StoreError>;

    /// Atomically join `conn` to the room, enforcing the participant
    /// ceiling and refreshing TTLs.
    async fn try_join(&self, rid: &RoomId, conn: &ConnId) -> Result<JoinOutcome, StoreError>;

    /// Atomically remove `conn` from the room, returning the remaining
    /// member count. When it reaches zero every key belonging to the room,
    /// including all consumed-token markers, is deleted.
    async fn leave(&self, rid: &RoomId, conn: &ConnId) -> Result<u32, StoreError>;

    /// Refresh all of the room's TTLs on member activity.
    async fn touch(&self, rid: &RoomId) -> Result<(), StoreError>;

    /// Set-if-absent on the consumed-token marker for `(rid, jti)`.
    /// Returns true iff the marker was fresh (not a replay).
    async fn mark_jti(&self, rid: &RoomId, jti: &Jti, ttl_ms: i64) -> Result<bool, StoreError>;

    /// Whether the room currently exists.
    async fn exists(&self, rid: &RoomId) -> Result<bool, StoreError>;

    /// Liveness probe used by the readiness endpoint.
    async fn ping(&self) -> Result<(), StoreError>;
}
