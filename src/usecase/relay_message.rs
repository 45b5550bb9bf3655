//! UseCase: 暗号文・メディアの中継処理
//!
//! ペイロードは不透明な文字列としてそのままファンアウトされます。この層は
//! 長さ以外の何も見ません。ログにも残しません。復号はクライアントだけが
//! できます。

use std::sync::Arc;

use crate::domain::{ConnId, Label, MessagePusher, RoomId, RoomStore};
use crate::infrastructure::dto::websocket::{ServerEnvelope, ServerFrame};
use crate::infrastructure::room_router::RoomRouter;

use super::error::RelayError;

/// Total media bytes allowed across all chunks of one envelope.
pub const MAX_MEDIA_BYTES: u64 = 14 * 1024 * 1024;

/// Chunk count bounds for one media envelope.
pub const MAX_MEDIA_CHUNKS: usize = 128;

/// 中継のユースケース
pub struct RelayMessageUseCase {
    store: Arc<dyn RoomStore>,
    router: Arc<RoomRouter>,
    pusher: Arc<dyn MessagePusher>,
    max_ct_bytes: usize,
}

impl RelayMessageUseCase {
    pub fn new(
        store: Arc<dyn RoomStore>,
        router: Arc<RoomRouter>,
        pusher: Arc<dyn MessagePusher>,
        max_ct_bytes: usize,
    ) -> Self {
        Self {
            store,
            router,
            pusher,
            max_ct_bytes,
        }
    }

    /// Fan an opaque ciphertext out to every other member of the room.
    /// Returns the number of recipients.
    pub async fn relay_app(
        &self,
        sender: &ConnId,
        sender_label: &Label,
        rid: &RoomId,
        ciphertext_b64: String,
    ) -> Result<usize, RelayError> {
        if ciphertext_b64.len() > self.max_ct_bytes {
            return Err(RelayError::CiphertextTooLarge);
        }

        let frame = ServerEnvelope::event(ServerFrame::AppMsg {
            rid: rid.as_str().to_string(),
            ciphertext_b64,
            from: sender_label.as_str().to_string(),
        })
        .to_json();

        self.fan_out(sender, rid, &frame).await
    }

    /// Fan an opaque media envelope out to every other member of the room.
    #[allow(clippy::too_many_arguments)]
    pub async fn relay_media(
        &self,
        sender: &ConnId,
        sender_label: &Label,
        rid: &RoomId,
        mime: String,
        size: u64,
        chunk_size: u64,
        chunks: Vec<String>,
        from: Option<String>,
    ) -> Result<usize, RelayError> {
        if chunks.is_empty() || chunks.len() > MAX_MEDIA_CHUNKS {
            return Err(RelayError::MediaTooLarge);
        }
        let total: u64 = chunks.iter().map(|c| c.len() as u64).sum();
        if total > MAX_MEDIA_BYTES {
            return Err(RelayError::MediaTooLarge);
        }

        let frame = ServerEnvelope::event(ServerFrame::MediaMsg {
            rid: rid.as_str().to_string(),
            mime,
            size,
            chunk_size,
            chunks,
            from: from.or_else(|| Some(sender_label.as_str().to_string())),
        })
        .to_json();

        self.fan_out(sender, rid, &frame).await
    }

    async fn fan_out(
        &self,
        sender: &ConnId,
        rid: &RoomId,
        frame: &str,
    ) -> Result<usize, RelayError> {
        let targets: Vec<ConnId> = self
            .router
            .members(rid)
            .into_iter()
            .filter(|conn| conn != sender)
            .collect();
        let recipients = targets.len();
        let _ = self.pusher.broadcast(targets, frame).await;

        // valid member activity keeps the room alive
        if let Err(e) = self.store.touch(rid).await {
            tracing::warn!("Failed to refresh room TTL on relay: {e}");
        }
        Ok(recipients)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::FixedClock;
    use crate::domain::{ConnIdFactory, Outbound, RoomIdFactory};
    use crate::infrastructure::message_pusher::WebSocketMessagePusher;
    use crate::infrastructure::repository::InMemoryRoomStore;
    use crate::infrastructure::token_codec::JoinTokenCodec;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::{Notify, mpsc};

    const NOW: i64 = 1_700_000_000_000;
    const MAX_CT: usize = 1_024;

    struct Fixture {
        usecase: RelayMessageUseCase,
        store: Arc<InMemoryRoomStore>,
        router: Arc<RoomRouter>,
        pusher: Arc<WebSocketMessagePusher>,
        clock: Arc<FixedClock>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(NOW));
        let store = Arc::new(InMemoryRoomStore::new(10, 600_000, clock.clone()));
        let codec =
            Arc::new(JoinTokenCodec::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let pusher = Arc::new(WebSocketMessagePusher::new(1 << 20));
        let router = RoomRouter::new(
            codec,
            pusher.clone(),
            store.clone(),
            clock.clone(),
            60_000,
        );
        let usecase =
            RelayMessageUseCase::new(store.clone(), router.clone(), pusher.clone(), MAX_CT);
        Fixture {
            usecase,
            store,
            router,
            pusher,
            clock,
        }
    }

    fn register(fixture: &Fixture, conn: &ConnId) -> mpsc::UnboundedReceiver<Outbound> {
        let (tx, rx) = mpsc::unbounded_channel();
        fixture.pusher.register(
            conn.clone(),
            tx,
            Arc::new(AtomicUsize::new(0)),
            Arc::new(Notify::new()),
            NOW,
        );
        rx
    }

    async fn seed_room(fixture: &Fixture, members: &[&ConnId]) -> RoomId {
        let rid = RoomIdFactory::generate();
        fixture.store.create_with(&rid, members[0]).await.unwrap();
        fixture.router.join(&rid, members[0].clone());
        for conn in &members[1..] {
            fixture.store.try_join(&rid, conn).await.unwrap();
            fixture.router.join(&rid, (*conn).clone());
        }
        rid
    }

    #[tokio::test]
    async fn test_relay_app_excludes_sender_and_preserves_bytes() {
        // テスト項目: 送信者以外の全員に同一の暗号文が届く
        // given (前提条件): 3 人のルーム
        let fixture = fixture();
        let a = ConnIdFactory::generate();
        let b = ConnIdFactory::generate();
        let c = ConnIdFactory::generate();
        let mut rx_a = register(&fixture, &a);
        let mut rx_b = register(&fixture, &b);
        let mut rx_c = register(&fixture, &c);
        let rid = seed_room(&fixture, &[&a, &b, &c]).await;

        // when (操作): a が暗号文を送る
        let delivered = fixture
            .usecase
            .relay_app(&a, &Label::participant(1), &rid, "AAA".to_string())
            .await
            .unwrap();

        // then (期待する結果):
        assert_eq!(delivered, 2);
        for rx in [&mut rx_b, &mut rx_c] {
            let frame = match rx.try_recv().unwrap() {
                Outbound::Frame(json) => json,
                other => panic!("unexpected outbound: {other:?}"),
            };
            let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
            assert_eq!(value["t"], "APP_MSG");
            assert_eq!(value["body"]["ciphertextB64"], "AAA");
            assert_eq!(value["body"]["from"], "P1");
        }
        // 送信者にはエコーされない
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_relay_app_boundary_length() {
        // テスト項目: ちょうど max_ct_bytes は成功、1 バイト超過で失敗
        // given (前提条件):
        let fixture = fixture();
        let a = ConnIdFactory::generate();
        let rid = seed_room(&fixture, &[&a]).await;

        // when (操作):
        let exact = fixture
            .usecase
            .relay_app(&a, &Label::participant(1), &rid, "x".repeat(MAX_CT))
            .await;
        let over = fixture
            .usecase
            .relay_app(&a, &Label::participant(1), &rid, "x".repeat(MAX_CT + 1))
            .await;

        // then (期待する結果):
        assert!(exact.is_ok());
        assert_eq!(over, Err(RelayError::CiphertextTooLarge));
    }

    #[tokio::test]
    async fn test_relay_refreshes_room_ttl() {
        // テスト項目: 中継がルーム TTL を更新する
        // given (前提条件):
        let fixture = fixture();
        let a = ConnIdFactory::generate();
        let rid = seed_room(&fixture, &[&a]).await;

        // when (操作): TTL ぎりぎりで中継してからさらに経過
        fixture.clock.advance(600_000 - 1);
        fixture
            .usecase
            .relay_app(&a, &Label::participant(1), &rid, "AAA".to_string())
            .await
            .unwrap();
        fixture.clock.advance(600_000 - 1);

        // then (期待する結果):
        assert!(fixture.store.exists(&rid).await.unwrap());
    }

    #[tokio::test]
    async fn test_relay_media_chunk_count_bounds() {
        // テスト項目: チャンク数 0 と 129 が MEDIA_TOO_LARGE になる
        // given (前提条件):
        let fixture = fixture();
        let a = ConnIdFactory::generate();
        let rid = seed_room(&fixture, &[&a]).await;
        let label = Label::participant(1);

        // when (操作):
        let empty = fixture
            .usecase
            .relay_media(&a, &label, &rid, "image/png".into(), 0, 0, vec![], None)
            .await;
        let too_many = fixture
            .usecase
            .relay_media(
                &a,
                &label,
                &rid,
                "image/png".into(),
                129,
                1,
                vec!["x".to_string(); MAX_MEDIA_CHUNKS + 1],
                None,
            )
            .await;

        // then (期待する結果):
        assert_eq!(empty, Err(RelayError::MediaTooLarge));
        assert_eq!(too_many, Err(RelayError::MediaTooLarge));
    }

    #[tokio::test]
    async fn test_relay_media_total_byte_bound() {
        // テスト項目: チャンク合計 14MiB 超過が MEDIA_TOO_LARGE になる
        // given (前提条件):
        let fixture = fixture();
        let a = ConnIdFactory::generate();
        let rid = seed_room(&fixture, &[&a]).await;

        // when (操作): 2 チャンクで合計が上限 + 1 バイト
        let half = (MAX_MEDIA_BYTES / 2) as usize;
        let chunks = vec!["x".repeat(half), "x".repeat(half + 1)];
        let result = fixture
            .usecase
            .relay_media(
                &a,
                &Label::participant(1),
                &rid,
                "video/webm".into(),
                MAX_MEDIA_BYTES + 1,
                half as u64,
                chunks,
                None,
            )
            .await;

        // then (期待する結果):
        assert_eq!(result, Err(RelayError::MediaTooLarge));
    }

    #[tokio::test]
    async fn test_relay_media_fills_sender_label_when_from_absent() {
        // テスト項目: from 未指定のメディアにサーバー付与ラベルが入る
        // given (前提条件):
        let fixture = fixture();
        let a = ConnIdFactory::generate();
        let b = ConnIdFactory::generate();
        let _rx_a = register(&fixture, &a);
        let mut rx_b = register(&fixture, &b);
        let rid = seed_room(&fixture, &[&a, &b]).await;

        // when (操作):
        fixture
            .usecase
            .relay_media(
                &a,
                &Label::participant(1),
                &rid,
                "image/png".into(),
                3,
                3,
                vec!["abc".to_string()],
                None,
            )
            .await
            .unwrap();

        // then (期待する結果):
        let frame = match rx_b.try_recv().unwrap() {
            Outbound::Frame(json) => json,
            other => panic!("unexpected outbound: {other:?}"),
        };
        let value: serde_json::Value = serde_json::from_str(&frame).unwrap();
        assert_eq!(value["t"], "MEDIA_MSG");
        assert_eq!(value["body"]["from"], "P1");
        assert_eq!(value["body"]["chunks"][0], "abc");
    }
}
