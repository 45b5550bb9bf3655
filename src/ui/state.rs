//! Server state and connection management.

use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use dashmap::DashMap;

use crate::common::config::Config;
use crate::common::time::Clock;
use crate::domain::{RoomStore, TokenBucket};
use crate::infrastructure::message_pusher::WebSocketMessagePusher;
use crate::infrastructure::meters::ConnectionMeters;
use crate::infrastructure::metrics::Metrics;
use crate::infrastructure::room_router::RoomRouter;
use crate::usecase::{
    CreateRoomUseCase, DisconnectUseCase, IssueTokenUseCase, JoinRoomUseCase, LeaveRoomUseCase,
    RelayMessageUseCase,
};

/// `POST /rooms` budget per IP: 10 creates per minute.
pub const HTTP_CREATE_BUDGET: u64 = 10;
pub const HTTP_CREATE_WINDOW_MS: i64 = 60_000;

/// Shared application state
pub struct AppState {
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    /// Repository（データアクセス層の抽象化）
    pub store: Arc<dyn RoomStore>,
    /// MessagePusher 兼 接続レジストリ
    pub pusher: Arc<WebSocketMessagePusher>,
    pub router: Arc<RoomRouter>,
    pub meters: Arc<ConnectionMeters>,
    pub metrics: Arc<Metrics>,
    /// Readiness flag maintained by the store probe.
    pub store_ready: Arc<AtomicBool>,
    /// Per-IP token buckets for the HTTP create endpoint.
    pub http_create_limiter: DashMap<IpAddr, TokenBucket>,

    pub create_room_usecase: Arc<CreateRoomUseCase>,
    pub join_room_usecase: Arc<JoinRoomUseCase>,
    pub leave_room_usecase: Arc<LeaveRoomUseCase>,
    pub relay_message_usecase: Arc<RelayMessageUseCase>,
    pub disconnect_usecase: Arc<DisconnectUseCase>,
    pub issue_token_usecase: Arc<IssueTokenUseCase>,
}

impl AppState {
    /// Charge one HTTP room-create against the caller's bucket.
    pub fn allow_http_create(&self, ip: IpAddr) -> bool {
        // bound the map: a burst of distinct IPs must not grow it forever
        if self.http_create_limiter.len() > 10_000 {
            self.http_create_limiter.clear();
        }
        let mut bucket = self.http_create_limiter.entry(ip).or_insert_with(|| {
            TokenBucket::new(
                HTTP_CREATE_BUDGET,
                HTTP_CREATE_BUDGET,
                HTTP_CREATE_WINDOW_MS,
                self.clock.clone(),
            )
        });
        bucket.take(1)
    }
}
