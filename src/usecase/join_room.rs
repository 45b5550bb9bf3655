//! UseCase: 参加要求処理
//!
//! 参加は次の順で進みます（仕様上の不変条件）:
//!
//! 1. トークン検証（MAC・版・ルーム一致・期限）
//! 2. jti マーカーの set-if-absent（リプレイ防御、猶予 5 秒）
//! 3. ストアでのアトミックな参加（容量チェック込み）
//! 4. ルーターへのローカル登録
//! 5. 再接続用トークン（next_token）の発行
//!
//! 満室で失敗した場合でも消費済みの jti は戻りません。再試行には新しい
//! トークンが必要です。

use std::sync::Arc;

use crate::common::time::Clock;
use crate::domain::{
    ConnId, Jti, JoinOutcome, JtiFactory, Label, RoomId, RoomStore, TokenError,
};
use crate::infrastructure::room_router::RoomRouter;
use crate::infrastructure::token_codec::JoinTokenCodec;

use super::error::JoinRoomError;

/// Marker TTL grace beyond the token's remaining lifetime.
const REPLAY_GRACE_MS: i64 = 5_000;

/// Successful join.
#[derive(Debug)]
pub struct JoinedRoom {
    pub participants: u32,
    pub max: u32,
    pub label: Label,
    pub next_token: String,
    pub next_token_exp: i64,
}

/// 参加要求のユースケース
pub struct JoinRoomUseCase {
    store: Arc<dyn RoomStore>,
    router: Arc<RoomRouter>,
    codec: Arc<JoinTokenCodec>,
    clock: Arc<dyn Clock>,
    max_participants: u32,
    room_key_ttl_ms: i64,
}

impl JoinRoomUseCase {
    pub fn new(
        store: Arc<dyn RoomStore>,
        router: Arc<RoomRouter>,
        codec: Arc<JoinTokenCodec>,
        clock: Arc<dyn Clock>,
        max_participants: u32,
        room_key_ttl_ms: i64,
    ) -> Self {
        Self {
            store,
            router,
            codec,
            clock,
            max_participants,
            room_key_ttl_ms,
        }
    }

    pub async fn execute(
        &self,
        conn: &ConnId,
        rid: &RoomId,
        token: &str,
        requested_label: Option<&str>,
    ) -> Result<JoinedRoom, JoinRoomError> {
        let now = self.clock.now_unix_millis();

        // 1. capability check
        let claims = self
            .codec
            .verify(token, rid, now)
            .map_err(JoinRoomError::Token)?;
        let jti = Jti::new(claims.jti)
            .map_err(|_| JoinRoomError::Token(TokenError::Format))?;

        // 2. single-use defense
        let marker_ttl = (claims.exp - now) + REPLAY_GRACE_MS;
        let fresh = self.store.mark_jti(rid, &jti, marker_ttl).await?;
        if !fresh {
            return Err(JoinRoomError::Replay);
        }

        // 3. atomic membership mutation
        let count = match self.store.try_join(rid, conn).await? {
            JoinOutcome::Joined { count } => count,
            JoinOutcome::AlreadyMember { count } => count,
            JoinOutcome::NoRoom => return Err(JoinRoomError::NoRoom),
            JoinOutcome::Full => return Err(JoinRoomError::Full),
        };

        // 4. local fan-out registration
        self.router.join(rid, conn.clone());

        // 5. reconnect capability, expiring independently of the room TTL
        let next_token_exp = now + self.room_key_ttl_ms;
        let next_token = self
            .codec
            .mint(rid, next_token_exp, &JtiFactory::generate());

        let label = requested_label
            .and_then(|l| Label::client(l).ok())
            .unwrap_or_else(|| Label::participant(count));

        tracing::info!("Join succeeded ({count} participants)");
        Ok(JoinedRoom {
            participants: count,
            max: self.max_participants,
            label,
            next_token,
            next_token_exp,
        })
    }
}
