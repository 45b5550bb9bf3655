//! ルームルーター（プロセス内のファンアウト集合）
//!
//! ## 責務
//!
//! - `room_id → 接続集合` のマップを保持し、ブロードキャストの宛先
//!   スナップショットを提供する
//! - ルームごとのローテーション用トークンを保持し、一定間隔で再発行して
//!   `QR_ROTATED` を配信する
//! - ローカルのメンバーが 0 になったらエントリを破棄する
//!
//! メンバーシップの正は外部ストアにあり、ここはあくまでこのプロセスに
//! 接続しているソケットの集合です。ルーターは接続 ID だけを持ち、接続の
//! 実体はレジストリ経由でのみ解決します（循環参照を作らない）。

use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use crate::common::time::Clock;
use crate::domain::{ConnId, JtiFactory, MessagePusher, RoomId, RoomStore};
use crate::infrastructure::dto::websocket::{ServerEnvelope, ServerFrame};
use crate::infrastructure::token_codec::JoinTokenCodec;

struct RoomEntry {
    conns: HashSet<ConnId>,
    qr_token: String,
    qr_exp: i64,
    rotate_task: Option<JoinHandle<()>>,
}

impl Drop for RoomEntry {
    fn drop(&mut self) {
        if let Some(task) = self.rotate_task.take() {
            task.abort();
        }
    }
}

/// In-process map of rooms to locally connected sockets, with per-room
/// rotating capability tokens.
pub struct RoomRouter {
    rooms: DashMap<RoomId, RoomEntry>,
    codec: Arc<JoinTokenCodec>,
    pusher: Arc<dyn MessagePusher>,
    store: Arc<dyn RoomStore>,
    clock: Arc<dyn Clock>,
    qr_rotation_ms: i64,
}

impl RoomRouter {
    pub fn new(
        codec: Arc<JoinTokenCodec>,
        pusher: Arc<dyn MessagePusher>,
        store: Arc<dyn RoomStore>,
        clock: Arc<dyn Clock>,
        qr_rotation_ms: i64,
    ) -> Arc<Self> {
        Arc::new(Self {
            rooms: DashMap::new(),
            codec,
            pusher,
            store,
            clock,
            qr_rotation_ms,
        })
    }

    /// Add a local connection to a room, installing the entry (and its
    /// rotation task) on first join. Returns the current rotating token.
    pub fn join(self: &Arc<Self>, rid: &RoomId, conn: ConnId) -> (String, i64) {
        let mut entry = self.rooms.entry(rid.clone()).or_insert_with(|| {
            let (qr_token, qr_exp) = self.mint_rotation_token(rid);
            RoomEntry {
                conns: HashSet::new(),
                qr_token,
                qr_exp,
                rotate_task: Some(self.spawn_rotation(rid.clone())),
            }
        });
        entry.conns.insert(conn);
        (entry.qr_token.clone(), entry.qr_exp)
    }

    /// Remove a local connection; evicts the entry when the room has no
    /// local members left. Returns the remaining local member count.
    pub fn remove(&self, rid: &RoomId, conn: &ConnId) -> usize {
        let remaining = {
            let Some(mut entry) = self.rooms.get_mut(rid) else {
                return 0;
            };
            entry.conns.remove(conn);
            entry.conns.len()
        };
        if remaining == 0 {
            self.rooms.remove_if(rid, |_, entry| entry.conns.is_empty());
        }
        remaining
    }

    /// Snapshot of the room's local connections.
    pub fn members(&self, rid: &RoomId) -> Vec<ConnId> {
        self.rooms
            .get(rid)
            .map(|entry| entry.conns.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Current rotating token of a locally tracked room.
    pub fn current_token(&self, rid: &RoomId) -> Option<(String, i64)> {
        self.rooms
            .get(rid)
            .map(|entry| (entry.qr_token.clone(), entry.qr_exp))
    }

    /// Number of locally tracked rooms.
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    /// Mint a fresh rotating token, update the entry, and notify members.
    /// Returns the targets so callers (and tests) can observe the effect;
    /// `None` when the room is no longer tracked.
    pub async fn rotate(&self, rid: &RoomId) -> Option<Vec<ConnId>> {
        let (qr_token, qr_exp) = self.mint_rotation_token(rid);
        let targets = {
            let mut entry = self.rooms.get_mut(rid)?;
            entry.qr_token = qr_token.clone();
            entry.qr_exp = qr_exp;
            entry.conns.iter().cloned().collect::<Vec<_>>()
        };

        let frame = ServerEnvelope::event(ServerFrame::QrRotated {
            rid: rid.as_str().to_string(),
            qr_token,
            qr_exp,
        })
        .to_json();
        let _ = self.pusher.broadcast(targets.clone(), &frame).await;

        // rotation counts as room activity
        if let Err(e) = self.store.touch(rid).await {
            tracing::warn!("Failed to refresh room TTL on rotation: {e}");
        }
        Some(targets)
    }

    fn mint_rotation_token(&self, rid: &RoomId) -> (String, i64) {
        let exp = self.clock.now_unix_millis() + self.qr_rotation_ms;
        let token = self.codec.mint(rid, exp, &JtiFactory::generate());
        (token, exp)
    }

    fn spawn_rotation(self: &Arc<Self>, rid: RoomId) -> JoinHandle<()> {
        let router: Weak<RoomRouter> = Arc::downgrade(self);
        let period = Duration::from_millis(self.qr_rotation_ms as u64);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // the first tick fires immediately; the entry already has a token
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = router.upgrade() else {
                    return;
                };
                if router.rotate(&rid).await.is_none() {
                    return;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::FixedClock;
    use crate::domain::{ConnIdFactory, RoomIdFactory};
    use crate::infrastructure::message_pusher::WebSocketMessagePusher;
    use crate::infrastructure::repository::inmemory::InMemoryRoomStore;

    const NOW: i64 = 1_700_000_000_000;
    const ROTATION_MS: i64 = 60_000;

    fn build_router() -> (Arc<RoomRouter>, Arc<WebSocketMessagePusher>, FixedClock) {
        let clock = FixedClock::new(NOW);
        let codec =
            Arc::new(JoinTokenCodec::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let pusher = Arc::new(WebSocketMessagePusher::new(1 << 20));
        let store = Arc::new(InMemoryRoomStore::new(
            10,
            600_000,
            Arc::new(clock.clone()),
        ));
        let router = RoomRouter::new(
            codec,
            pusher.clone(),
            store,
            Arc::new(clock.clone()),
            ROTATION_MS,
        );
        (router, pusher, clock)
    }

    #[tokio::test]
    async fn test_first_join_installs_entry_with_token() {
        // テスト項目: 最初のローカル参加でエントリとトークンが作られる
        // given (前提条件):
        let (router, _pusher, _clock) = build_router();
        let rid = RoomIdFactory::generate();

        // when (操作):
        let (token, exp) = router.join(&rid, ConnIdFactory::generate());

        // then (期待する結果):
        assert!(!token.is_empty());
        assert_eq!(exp, NOW + ROTATION_MS);
        assert_eq!(router.room_count(), 1);
        assert_eq!(router.members(&rid).len(), 1);
    }

    #[tokio::test]
    async fn test_second_join_reuses_current_token() {
        // テスト項目: 2 人目の参加は既存のローテーショントークンを受け取る
        // given (前提条件):
        let (router, _pusher, _clock) = build_router();
        let rid = RoomIdFactory::generate();
        let (first_token, _) = router.join(&rid, ConnIdFactory::generate());

        // when (操作):
        let (second_token, _) = router.join(&rid, ConnIdFactory::generate());

        // then (期待する結果):
        assert_eq!(first_token, second_token);
        assert_eq!(router.members(&rid).len(), 2);
    }

    #[tokio::test]
    async fn test_remove_last_member_evicts_entry() {
        // テスト項目: ローカルメンバーが 0 になるとエントリが破棄される
        // given (前提条件):
        let (router, _pusher, _clock) = build_router();
        let rid = RoomIdFactory::generate();
        let a = ConnIdFactory::generate();
        let b = ConnIdFactory::generate();
        router.join(&rid, a.clone());
        router.join(&rid, b.clone());

        // when (操作):
        assert_eq!(router.remove(&rid, &a), 1);
        assert_eq!(router.remove(&rid, &b), 0);

        // then (期待する結果):
        assert_eq!(router.room_count(), 0);
        assert!(router.current_token(&rid).is_none());
    }

    #[tokio::test]
    async fn test_rotate_replaces_token_and_notifies_members() {
        // テスト項目: rotate がトークンを差し替え、メンバーへ QR_ROTATED を送る
        // given (前提条件):
        let (router, pusher, clock) = build_router();
        let rid = RoomIdFactory::generate();
        let conn = ConnIdFactory::generate();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        pusher.register(
            conn.clone(),
            tx,
            Arc::new(std::sync::atomic::AtomicUsize::new(0)),
            Arc::new(tokio::sync::Notify::new()),
            NOW,
        );
        let (old_token, _) = router.join(&rid, conn.clone());

        // when (操作):
        clock.advance(ROTATION_MS);
        let targets = router.rotate(&rid).await.unwrap();

        // then (期待する結果):
        assert_eq!(targets, vec![conn]);
        let (new_token, new_exp) = router.current_token(&rid).unwrap();
        assert_ne!(new_token, old_token);
        assert_eq!(new_exp, NOW + 2 * ROTATION_MS);

        let frame = match rx.recv().await.unwrap() {
            crate::domain::Outbound::Frame(json) => json,
            other => panic!("unexpected outbound: {other:?}"),
        };
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["t"], "QR_ROTATED");
        assert_eq!(value["body"]["qr_token"], new_token);
    }

    #[tokio::test]
    async fn test_rotate_untracked_room_is_noop() {
        // テスト項目: 追跡していないルームの rotate は None
        // given (前提条件):
        let (router, _pusher, _clock) = build_router();
        let rid = RoomIdFactory::generate();

        // when (操作):
        let result = router.rotate(&rid).await;

        // then (期待する結果):
        assert!(result.is_none());
    }
}
