//! UseCase: 切断処理
//!
//! 正常終了・異常終了・keep-alive 切断のすべてがこの 1 本に合流します。
//! 呼び出し側（UI 層の受信ループの後処理）は必ず一度だけ実行します。
//! メンバーシップの除去は LeaveRoomUseCase を再利用し、最後にレジストリ
//! から接続を外します。

use std::sync::Arc;

use crate::domain::{ConnId, MessagePusher, RoomId};

use super::leave_room::LeaveRoomUseCase;

/// 切断のユースケース
pub struct DisconnectUseCase {
    leave: Arc<LeaveRoomUseCase>,
    pusher: Arc<dyn MessagePusher>,
}

impl DisconnectUseCase {
    pub fn new(leave: Arc<LeaveRoomUseCase>, pusher: Arc<dyn MessagePusher>) -> Self {
        Self { leave, pusher }
    }

    /// Tear down a connection: membership first, then the registry entry.
    ///
    /// There is no actor left to reply to, so the survivors are notified
    /// right after the leave commits. Store failures are logged, not
    /// propagated; the room TTL cleans up whatever could not be removed now.
    pub async fn execute(&self, conn: &ConnId, current_room: Option<&RoomId>) {
        if let Some(rid) = current_room {
            match self.leave.execute(conn, rid).await {
                Ok(left) => self.leave.broadcast_departure(rid, &left).await,
                Err(e) => {
                    tracing::warn!("Failed to remove membership on disconnect: {e}");
                }
            }
        }
        self.pusher.unregister(conn).await;
    }
}
