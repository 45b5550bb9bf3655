//! UseCase: HTTP 経由のローテーショントークン発行
//!
//! `GET /rooms/{room_id}/token` の裏側。ルームが存在する場合のみ短命の
//! 参加トークンを発行します。

use std::sync::Arc;

use crate::common::time::Clock;
use crate::domain::{JtiFactory, RoomId, RoomStore};
use crate::infrastructure::token_codec::JoinTokenCodec;

use super::error::IssueTokenError;

/// トークン発行のユースケース
pub struct IssueTokenUseCase {
    store: Arc<dyn RoomStore>,
    codec: Arc<JoinTokenCodec>,
    clock: Arc<dyn Clock>,
    token_ttl_ms: i64,
}

impl IssueTokenUseCase {
    pub fn new(
        store: Arc<dyn RoomStore>,
        codec: Arc<JoinTokenCodec>,
        clock: Arc<dyn Clock>,
        token_ttl_ms: i64,
    ) -> Self {
        Self {
            store,
            codec,
            clock,
            token_ttl_ms,
        }
    }

    /// Mint a short-lived join token for an existing room.
    pub async fn execute(&self, rid: &RoomId) -> Result<(String, i64), IssueTokenError> {
        if !self.store.exists(rid).await? {
            return Err(IssueTokenError::NoRoom);
        }
        let exp = self.clock.now_unix_millis() + self.token_ttl_ms;
        let token = self.codec.mint(rid, exp, &JtiFactory::generate());
        Ok((token, exp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::time::FixedClock;
    use crate::domain::{ConnIdFactory, RoomIdFactory};
    use crate::infrastructure::repository::InMemoryRoomStore;

    const NOW: i64 = 1_700_000_000_000;
    const TOKEN_TTL: i64 = 60_000;

    fn fixture() -> (IssueTokenUseCase, Arc<InMemoryRoomStore>, Arc<JoinTokenCodec>) {
        let clock = Arc::new(FixedClock::new(NOW));
        let store = Arc::new(InMemoryRoomStore::new(10, 600_000, clock.clone()));
        let codec =
            Arc::new(JoinTokenCodec::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let usecase =
            IssueTokenUseCase::new(store.clone(), codec.clone(), clock, TOKEN_TTL);
        (usecase, store, codec)
    }

    #[tokio::test]
    async fn test_issue_token_for_existing_room() {
        // テスト項目: 既存ルームに対して検証可能なトークンが発行される
        // given (前提条件):
        let (usecase, store, codec) = fixture();
        let rid = RoomIdFactory::generate();
        store.create_with(&rid, &ConnIdFactory::generate()).await.unwrap();

        // when (操作):
        let (token, exp) = usecase.execute(&rid).await.unwrap();

        // then (期待する結果):
        assert_eq!(exp, NOW + TOKEN_TTL);
        let claims = codec.verify(&token, &rid, NOW).unwrap();
        assert_eq!(claims.exp, exp);
    }

    #[tokio::test]
    async fn test_issue_token_for_missing_room_fails() {
        // テスト項目: 存在しないルームへの発行が NoRoom になる
        // given (前提条件):
        let (usecase, _store, _codec) = fixture();

        // when (操作):
        let result = usecase.execute(&RoomIdFactory::generate()).await;

        // then (期待する結果):
        assert!(matches!(result, Err(IssueTokenError::NoRoom)));
    }
}
