//! UseCase: ルーム作成処理
//!
//! WebSocket 経由（作成者が最初のメンバーになる）と HTTP 経由（空ルーム）の
//! 2 つの作成経路を提供します。どちらもルーム ID はサーバーが生成します。

use std::sync::Arc;

use crate::domain::{ConnId, Fingerprint, RoomId, RoomIdFactory, RoomStore};
use crate::infrastructure::room_router::RoomRouter;

use super::error::CreateRoomError;

/// Result of a WebSocket-path room creation.
#[derive(Debug)]
pub struct RoomCreated {
    pub rid: RoomId,
    pub qr_token: String,
    pub qr_exp: i64,
    pub max: u32,
}

/// ルーム作成のユースケース
pub struct CreateRoomUseCase {
    store: Arc<dyn RoomStore>,
    router: Arc<RoomRouter>,
    max_participants: u32,
}

impl CreateRoomUseCase {
    pub fn new(
        store: Arc<dyn RoomStore>,
        router: Arc<RoomRouter>,
        max_participants: u32,
    ) -> Self {
        Self {
            store,
            router,
            max_participants,
        }
    }

    /// Create a room whose first member is the calling connection.
    ///
    /// The store commit happens before the router entry is installed, so a
    /// store failure leaves no local state behind.
    pub async fn execute_with_creator(
        &self,
        conn: &ConnId,
    ) -> Result<RoomCreated, CreateRoomError> {
        let rid = RoomIdFactory::generate();
        self.store.create_with(&rid, conn).await?;
        let (qr_token, qr_exp) = self.router.join(&rid, conn.clone());
        tracing::info!("Room created over WebSocket (1 member)");
        Ok(RoomCreated {
            rid,
            qr_token,
            qr_exp,
            max: self.max_participants,
        })
    }

    /// Create an empty room (HTTP path).
    pub async fn execute_empty(&self) -> Result<(RoomId, Fingerprint), CreateRoomError> {
        let rid = RoomIdFactory::generate();
        self.store.create_empty(&rid).await?;
        let fingerprint = Fingerprint::of(&rid);
        tracing::info!("Empty room created over HTTP");
        Ok((rid, fingerprint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::FixedClock;
    use crate::domain::{ConnIdFactory, JoinOutcome, MessagePusher};
    use crate::infrastructure::message_pusher::WebSocketMessagePusher;
    use crate::infrastructure::repository::InMemoryRoomStore;
    use crate::infrastructure::token_codec::JoinTokenCodec;

    const NOW: i64 = 1_700_000_000_000;

    fn build_usecase() -> (CreateRoomUseCase, Arc<InMemoryRoomStore>, Arc<RoomRouter>) {
        let clock: Arc<FixedClock> = Arc::new(FixedClock::new(NOW));
        let store = Arc::new(InMemoryRoomStore::new(10, 600_000, clock.clone()));
        let codec =
            Arc::new(JoinTokenCodec::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let pusher: Arc<dyn MessagePusher> = Arc::new(WebSocketMessagePusher::new(1 << 20));
        let router = RoomRouter::new(codec, pusher, store.clone(), clock, 60_000);
        (
            CreateRoomUseCase::new(store.clone(), router.clone(), 10),
            store,
            router,
        )
    }

    #[tokio::test]
    async fn test_create_with_creator_installs_store_and_router() {
        // テスト項目: 作成者付き作成でストアとルーター両方に反映される
        // given (前提条件):
        let (usecase, store, router) = build_usecase();
        let conn = ConnIdFactory::generate();

        // when (操作):
        let created = usecase.execute_with_creator(&conn).await.unwrap();

        // then (期待する結果):
        assert_eq!(created.max, 10);
        assert_eq!(created.qr_exp, NOW + 60_000);
        assert!(store.exists(&created.rid).await.unwrap());
        assert_eq!(router.members(&created.rid), vec![conn.clone()]);

        // 作成者は既にメンバーなので再参加は AlreadyMember
        assert_eq!(
            store.try_join(&created.rid, &conn).await.unwrap(),
            JoinOutcome::AlreadyMember { count: 1 }
        );
    }

    #[tokio::test]
    async fn test_create_empty_returns_fingerprint() {
        // テスト項目: 空ルーム作成がフィンガープリントを返しストアに登録する
        // given (前提条件):
        let (usecase, store, router) = build_usecase();

        // when (操作):
        let (rid, fingerprint) = usecase.execute_empty().await.unwrap();

        // then (期待する結果):
        assert!(store.exists(&rid).await.unwrap());
        assert_eq!(fingerprint, Fingerprint::of(&rid));
        // 空ルームはローカルのルーターに現れない
        assert_eq!(router.room_count(), 0);
    }

    #[tokio::test]
    async fn test_consecutive_creates_use_distinct_ids() {
        // テスト項目: 連続作成で異なるルーム ID が割り当てられる
        // given (前提条件):
        let (usecase, _store, _router) = build_usecase();

        // when (操作):
        let a = usecase.execute_empty().await.unwrap();
        let b = usecase.execute_empty().await.unwrap();

        // then (期待する結果):
        assert_ne!(a.0, b.0);
    }
}
