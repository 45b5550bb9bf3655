//! Infrastructure 層
//!
//! ドメイン層が定義する trait の具体的な実装（外部ストア、WebSocket
//! 送信、トークン署名）と、ワイヤ DTO・メーター・メトリクスを提供します。

pub mod dto;
pub mod keepalive;
pub mod message_pusher;
pub mod meters;
pub mod metrics;
pub mod repository;
pub mod room_router;
pub mod token_codec;
