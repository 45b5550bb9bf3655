//! MessagePusher trait 定義
//!
//! ドメイン層が必要とするメッセージ通知のインターフェースを定義します。
//! 具体的な実装（WebSocket 送信キュー）は Infrastructure 層が提供します。

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use super::value_object::ConnId;

/// Item travelling down a connection's outbound queue.
///
/// The pusher loop owning the socket sink interprets these; everything
/// else only enqueues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A pre-serialized text frame.
    Frame(String),
    /// Protocol-level ping (keep-alive sweep).
    Ping,
    /// Close the socket with the given code and reason, then stop.
    Close { code: u16, reason: &'static str },
}

/// 接続ごとの送信チャンネル
pub type PusherChannel = mpsc::UnboundedSender<Outbound>;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MessagePushError {
    #[error("connection '{0}' not found")]
    ClientNotFound(String),
    #[error("failed to push message: {0}")]
    PushFailed(String),
}

/// MessagePusher trait
///
/// UseCase 層はこの trait を通じてのみクライアントへ送信する。
/// ブロードキャストは一部の送信失敗を許容する（切断途中のソケットは
/// スキップされ、呼び出し元へは伝播しない）。
#[async_trait]
pub trait MessagePusher: Send + Sync {
    /// Send a pre-serialized frame to a single connection.
    async fn push_to(&self, conn: &ConnId, content: &str) -> Result<(), MessagePushError>;

    /// Fan a pre-serialized frame out to every target connection.
    /// Partial failures are tolerated.
    async fn broadcast(&self, targets: Vec<ConnId>, content: &str) -> Result<(), MessagePushError>;

    /// Remove a connection from the registry.
    async fn unregister(&self, conn: &ConnId);
}
