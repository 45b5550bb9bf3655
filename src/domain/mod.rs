//! ドメイン層
//!
//! 値オブジェクト、純粋なポリシーオブジェクト（トークンバケット）、
//! データアクセスと通知の trait 定義を含みます。
//! この層は I/O に依存しません（依存性の逆転）。

pub mod error;
pub mod limits;
pub mod pusher;
pub mod repository;
pub mod token;
pub mod value_object;

pub use error::ErrorCode;
pub use limits::TokenBucket;
pub use pusher::{MessagePushError, MessagePusher, Outbound, PusherChannel};
pub use repository::{JoinOutcome, RoomStore, StoreError};
pub use token::{TOKEN_VERSION, TokenClaims, TokenError};
pub use value_object::{
    ConnId, ConnIdFactory, Fingerprint, InvalidValue, Jti, JtiFactory, Label, RoomId,
    RoomIdFactory,
};
