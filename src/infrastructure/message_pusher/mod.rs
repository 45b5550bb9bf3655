//! メッセージ送信（通知）の実装
//!
//! ## 概要
//!
//! このモジュールは `MessagePusher` trait の具体的な実装と、接続レジストリを
//! 提供します。
//!
//! ## 実装
//!
//! - `websocket`: WebSocket 送信キューを使った実装

pub mod websocket;

pub use websocket::{WebSocketMessagePusher, CLOSE_POLICY_VIOLATION};
