//! WebSocket を使った MessagePusher 実装（接続レジストリ）
//!
//! ## 責務
//!
//! - 接続ごとの送信チャンネルと生存状態（pong 待ちフラグ等）を管理
//! - クライアントへのメッセージ送信（push_to, broadcast）
//! - 送信バッファ閾値超過による slow consumer の切断
//!
//! ## 設計ノート
//!
//! WebSocket の生成は UI 層（`src/ui/handler/websocket.rs`）で行われます。
//! この実装は接続ごとの `UnboundedSender<Outbound>` を受け取り、送信にのみ
//! 使用します。実際のソケット書き込みは UI 層の pusher ループが行い、
//! 送信済みバイト数の減算もそこで行われます。
//!
//! ブロードキャストはフレームを 1 回だけ直列化した文字列を受け取り、
//! スナップショットした宛先へ最大 50 件ずつ enqueue して yield します。
//! これで大部屋 1 つが他のルームの進行を妨げません。

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::domain::{ConnId, MessagePushError, MessagePusher, Outbound, PusherChannel};

/// Close code for policy violations (rate limit, backpressure, admission).
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;

/// Recipients enqueued per scheduler slice during a broadcast.
const BROADCAST_BATCH: usize = 50;

/// Per-connection registry entry.
///
/// Owned by the registry; the connection's receive loop holds the matching
/// `Notify` and buffered-bytes counter.
pub struct ConnectionEntry {
    sender: PusherChannel,
    /// Bytes enqueued but not yet written to the socket.
    buffered_bytes: Arc<AtomicUsize>,
    /// Set once a close was enqueued; later enqueues are dropped.
    closing: AtomicBool,
    /// A ping is in flight and unanswered.
    awaiting_pong: AtomicBool,
    /// When the in-flight ping was dispatched.
    ping_sent_ms: AtomicI64,
    /// Last pong receipt.
    last_pong_ms: AtomicI64,
    /// Wakes the receive loop so a forced close cannot hang on a dead read.
    shutdown: Arc<Notify>,
}

/// Result of one keep-alive sweep, for logging.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SweepOutcome {
    pub pinged: usize,
    pub terminated: usize,
}

/// WebSocket 送信キューを使った MessagePusher 実装
pub struct WebSocketMessagePusher {
    clients: DashMap<ConnId, Arc<ConnectionEntry>>,
    /// Slow-consumer threshold: 4 x the maximum frame size.
    max_buffered_bytes: usize,
}

impl WebSocketMessagePusher {
    pub fn new(max_buffered_bytes: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_buffered_bytes,
        }
    }

    /// Register a freshly admitted connection.
    pub fn register(
        &self,
        conn: ConnId,
        sender: PusherChannel,
        buffered_bytes: Arc<AtomicUsize>,
        shutdown: Arc<Notify>,
        now_ms: i64,
    ) {
        let entry = Arc::new(ConnectionEntry {
            sender,
            buffered_bytes,
            closing: AtomicBool::new(false),
            awaiting_pong: AtomicBool::new(false),
            ping_sent_ms: AtomicI64::new(0),
            last_pong_ms: AtomicI64::new(now_ms),
            shutdown,
        });
        self.clients.insert(conn.clone(), entry);
        tracing::debug!("Connection '{}' registered", conn.as_str());
    }

    /// Record a pong from the peer.
    pub fn note_pong(&self, conn: &ConnId, now_ms: i64) {
        if let Some(entry) = self.clients.get(conn) {
            entry.awaiting_pong.store(false, Ordering::SeqCst);
            entry.last_pong_ms.store(now_ms, Ordering::SeqCst);
        }
    }

    /// Enqueue a close and wake the receive loop.
    pub fn close(&self, conn: &ConnId, code: u16, reason: &'static str) {
        if let Some(entry) = self.clients.get(conn) {
            Self::close_entry(&entry, code, reason);
        }
    }

    /// Currently registered connections.
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    /// Snapshot of all registered connection ids.
    pub fn snapshot_ids(&self) -> Vec<ConnId> {
        self.clients.iter().map(|e| e.key().clone()).collect()
    }

    /// One keep-alive pass over every connection.
    ///
    /// Connections whose previous ping is older than `timeout_ms` are
    /// terminated; everyone else gets a ping and the awaiting flag. Works
    /// on a snapshot, so entries vanishing mid-sweep are fine, and nothing
    /// blocks while a send is in progress (enqueue only).
    pub fn keepalive_sweep(&self, now_ms: i64, timeout_ms: i64) -> SweepOutcome {
        let snapshot: Vec<(ConnId, Arc<ConnectionEntry>)> = self
            .clients
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let mut outcome = SweepOutcome::default();
        for (conn, entry) in snapshot {
            if entry.closing.load(Ordering::SeqCst) {
                continue;
            }
            if entry.awaiting_pong.load(Ordering::SeqCst) {
                let sent = entry.ping_sent_ms.load(Ordering::SeqCst);
                if now_ms - sent >= timeout_ms {
                    tracing::debug!("Connection '{}' failed keep-alive", conn.as_str());
                    Self::close_entry(&entry, CLOSE_POLICY_VIOLATION, "keep-alive timeout");
                    outcome.terminated += 1;
                }
                continue;
            }
            entry.awaiting_pong.store(true, Ordering::SeqCst);
            entry.ping_sent_ms.store(now_ms, Ordering::SeqCst);
            let _ = entry.sender.send(Outbound::Ping);
            outcome.pinged += 1;
        }
        outcome
    }

    fn close_entry(entry: &ConnectionEntry, code: u16, reason: &'static str) {
        if entry.closing.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = entry.sender.send(Outbound::Close { code, reason });
        entry.shutdown.notify_waiters();
    }

    /// Enqueue a pre-serialized frame, enforcing the backpressure policy.
    fn enqueue_frame(&self, conn: &ConnId, entry: &ConnectionEntry, content: &str) -> bool {
        if entry.closing.load(Ordering::SeqCst) {
            return false;
        }
        let queued = entry
            .buffered_bytes
            .fetch_add(content.len(), Ordering::SeqCst)
            + content.len();
        if queued > self.max_buffered_bytes {
            entry
                .buffered_bytes
                .fetch_sub(content.len(), Ordering::SeqCst);
            tracing::warn!(
                "Connection '{}' exceeded outbound buffer ({queued} bytes), evicting",
                conn.as_str()
            );
            Self::close_entry(entry, CLOSE_POLICY_VIOLATION, "slow consumer");
            return false;
        }
        if entry.sender.send(Outbound::Frame(content.to_string())).is_err() {
            entry
                .buffered_bytes
                .fetch_sub(content.len(), Ordering::SeqCst);
            return false;
        }
        true
    }
}

#[async_trait]
impl MessagePusher for WebSocketMessagePusher {
    async fn push_to(&self, conn: &ConnId, content: &str) -> Result<(), MessagePushError> {
        let entry = self
            .clients
            .get(conn)
            .ok_or_else(|| MessagePushError::ClientNotFound(conn.as_str().to_string()))?
            .clone();
        if self.enqueue_frame(conn, &entry, content) {
            Ok(())
        } else {
            Err(MessagePushError::PushFailed(format!(
                "connection '{}' is closing",
                conn.as_str()
            )))
        }
    }

    async fn broadcast(
        &self,
        targets: Vec<ConnId>,
        content: &str,
    ) -> Result<(), MessagePushError> {
        let mut batches = targets.chunks(BROADCAST_BATCH).peekable();
        while let Some(batch) = batches.next() {
            for conn in batch {
                // skip sockets that vanished since the snapshot
                let Some(entry) = self.clients.get(conn).map(|e| e.clone()) else {
                    continue;
                };
                // enqueue failure already handled (evicted or closing)
                let _ = self.enqueue_frame(conn, &entry, content);
            }
            // keep other rooms progressing between batches
            if batches.peek().is_some() {
                tokio::task::yield_now().await;
            }
        }
        Ok(())
    }

    async fn unregister(&self, conn: &ConnId) {
        self.clients.remove(conn);
        tracing::debug!("Connection '{}' unregistered", conn.as_str());
    }
}
