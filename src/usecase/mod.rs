//! UseCase 層
//!
//! プロトコルエンジンの各操作を 1 ユースケース 1 構造体で実装します。
//! すべて `Arc<dyn RoomStore>` / `Arc<dyn MessagePusher>` の上に構築され、
//! テストではインメモリ実装に差し替えられます。

pub mod create_room;
pub mod disconnect;
pub mod error;
pub mod issue_token;
pub mod join_room;
pub mod leave_room;
pub mod relay_message;

pub use create_room::{CreateRoomUseCase, RoomCreated};
pub use disconnect::DisconnectUseCase;
pub use error::{CreateRoomError, IssueTokenError, JoinRoomError, LeaveRoomError, RelayError};
pub use issue_token::IssueTokenUseCase;
pub use join_room::{JoinRoomUseCase, JoinedRoom};
pub use leave_room::{LeaveRoomUseCase, RoomLeft};
pub use relay_message::{MAX_MEDIA_BYTES, MAX_MEDIA_CHUNKS, RelayMessageUseCase};
