//! UI 層のハンドラ
//!
//! - `websocket`: 受付・受信ループ・プロトコル状態機械
//! - `http`: ルーム作成・トークン発行・health/metrics

pub mod http;
pub mod websocket;
