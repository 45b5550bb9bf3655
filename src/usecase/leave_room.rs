//! UseCase: 退出処理
//!
//! ルーターからのローカル削除とストアのアトミックな退出を行います。
//! 配信は `execute` から分離されています: 退出者への LEFT 応答が先、
//! 残存メンバーへの SYSTEM_MSG → ROOM_STATS がその後、という順序を
//! 呼び出し側が守れるようにするためです。
//! 最後のメンバーの退出では、ストア側スクリプトが全キーと jti マーカーを
//! 削除します。

use std::sync::Arc;

use crate::domain::{ConnId, MessagePusher, RoomId, RoomStore};
use crate::infrastructure::dto::websocket::{ServerEnvelope, ServerFrame, SystemMsgKind};
use crate::infrastructure::room_router::RoomRouter;

use super::error::LeaveRoomError;

/// Outcome of a committed leave: who is still in the room.
#[derive(Debug)]
pub struct RoomLeft {
    pub remaining: u32,
    /// Local connections still in the room at the commit point.
    pub survivors: Vec<ConnId>,
}

/// 退出のユースケース
pub struct LeaveRoomUseCase {
    store: Arc<dyn RoomStore>,
    router: Arc<RoomRouter>,
    pusher: Arc<dyn MessagePusher>,
    max_participants: u32,
}

impl LeaveRoomUseCase {
    pub fn new(
        store: Arc<dyn RoomStore>,
        router: Arc<RoomRouter>,
        pusher: Arc<dyn MessagePusher>,
        max_participants: u32,
    ) -> Self {
        Self {
            store,
            router,
            pusher,
            max_participants,
        }
    }

    /// Remove `conn` from the room. Sends nothing; the caller decides when
    /// the survivors hear about it (after the actor's own reply).
    pub async fn execute(&self, conn: &ConnId, rid: &RoomId) -> Result<RoomLeft, LeaveRoomError> {
        self.router.remove(rid, conn);
        let remaining = self.store.leave(rid, conn).await?;
        let survivors = if remaining > 0 {
            self.router.members(rid)
        } else {
            Vec::new()
        };

        tracing::info!("Leave completed ({remaining} remaining)");
        Ok(RoomLeft {
            remaining,
            survivors,
        })
    }

    /// 退出を残存メンバーへ通知する（SYSTEM_MSG → ROOM_STATS の順）。
    /// ルームが消えた場合は何も送らない。
    pub async fn broadcast_departure(&self, rid: &RoomId, left: &RoomLeft) {
        if left.remaining == 0 || left.survivors.is_empty() {
            return;
        }

        let system = ServerEnvelope::event(ServerFrame::SystemMsg {
            text: "this person has left the chat".to_string(),
            r#type: SystemMsgKind::Info,
        })
        .to_json();
        let _ = self
            .pusher
            .broadcast(left.survivors.clone(), &system)
            .await;

        let stats = ServerEnvelope::event(ServerFrame::RoomStats {
            rid: rid.as_str().to_string(),
            participants: left.remaining,
            max: self.max_participants,
        })
        .to_json();
        let _ = self.pusher.broadcast(left.survivors.clone(), &stats).await;
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

    struct Fixture {
        usecase: LeaveRoomUseCase,
        store: Arc<InMemoryRoomStore>,
        router: Arc<RoomRouter>,
        pusher: Arc<WebSocketMessagePusher>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(NOW));
        let store = Arc::new(InMemoryRoomStore::new(10, 600_000, clock.clone()));
        let codec =
            Arc::new(JoinTokenCodec::new(b"0123456789abcdef0123456789abcdef").unwrap());
        let pusher = Arc::new(WebSocketMessagePusher::new(1 << 20));
        let router = RoomRouter::new(codec, pusher.clone(), store.clone(), clock, 60_000);
        let usecase = LeaveRoomUseCase::new(store.clone(), router.clone(), pusher.clone(), 10);
        Fixture {
            usecase,
            store,
            router,
            pusher,
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

    async fn seed_two_member_room(fixture: &Fixture) -> (RoomId, ConnId, ConnId) {
        let rid = RoomIdFactory::generate();
        let a = ConnIdFactory::generate();
        let b = ConnIdFactory::generate();
        fixture.store.create_with(&rid, &a).await.unwrap();
        fixture.store.try_join(&rid, &b).await.unwrap();
        fixture.router.join(&rid, a.clone());
        fixture.router.join(&rid, b.clone());
        (rid, a, b)
    }

    fn recv_frame(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> serde_json::Value {
        match rx.try_recv().expect("a frame should be queued") {
            Outbound::Frame(json) => serde_json::from_str(&json).unwrap(),
            other => panic!("unexpected outbound: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_execute_sends_nothing_by_itself() {
        // テスト項目: execute は状態変更のみで、配信は行わない
        // given (前提条件):
        let fixture = fixture();
        let (rid, a, b) = seed_two_member_room(&fixture).await;
        let mut rx_b = register(&fixture, &b);

        // when (操作):
        let left = fixture.usecase.execute(&a, &rid).await.unwrap();

        // then (期待する結果): 残存者と人数は返るが、キューは空のまま
        assert_eq!(left.remaining, 1);
        assert_eq!(left.survivors, vec![b]);
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_broadcast_departure_notifies_survivors_in_order() {
        // テスト項目: 残存メンバーに SYSTEM_MSG → ROOM_STATS の順で届く
        // given (前提条件):
        let fixture = fixture();
        let (rid, a, b) = seed_two_member_room(&fixture).await;
        let mut rx_b = register(&fixture, &b);
        let left = fixture.usecase.execute(&a, &rid).await.unwrap();

        // when (操作):
        fixture.usecase.broadcast_departure(&rid, &left).await;

        // then (期待する結果):
        let system = recv_frame(&mut rx_b);
        assert_eq!(system["t"], "SYSTEM_MSG");
        assert_eq!(system["body"]["text"], "this person has left the chat");
        let stats = recv_frame(&mut rx_b);
        assert_eq!(stats["t"], "ROOM_STATS");
        assert_eq!(stats["body"]["participants"], 1);
    }

    #[tokio::test]
    async fn test_last_leave_destroys_room_silently() {
        // テスト項目: 最後の退出でルームが消え、配信は発生しない
        // given (前提条件):
        let fixture = fixture();
        let (rid, a, b) = seed_two_member_room(&fixture).await;
        let mut rx_a = register(&fixture, &a);
        let first = fixture.usecase.execute(&a, &rid).await.unwrap();
        fixture.usecase.broadcast_departure(&rid, &first).await;

        // when (操作):
        let left = fixture.usecase.execute(&b, &rid).await.unwrap();
        fixture.usecase.broadcast_departure(&rid, &left).await;

        // then (期待する結果):
        assert_eq!(left.remaining, 0);
        assert!(left.survivors.is_empty());
        assert!(!fixture.store.exists(&rid).await.unwrap());
        assert_eq!(fixture.store.marker_count(&rid).await, 0);
        assert_eq!(fixture.router.room_count(), 0);
        // a は既に退出済みなので、b の最後の退出では何も届かない
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leave_removes_local_router_membership() {
        // テスト項目: 退出した接続がブロードキャスト対象から外れる
        // given (前提条件):
        let fixture = fixture();
        let (rid, a, _b) = seed_two_member_room(&fixture).await;

        // when (操作):
        fixture.usecase.execute(&a, &rid).await.unwrap();

        // then (期待する結果):
        assert!(!fixture.router.members(&rid).contains(&a));
    }
}
