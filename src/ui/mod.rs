//! UI 層（プレゼンテーション層）
//!
//! axum の Router 配線、WebSocket/HTTP ハンドラ、共有 AppState、
//! シャットダウンシグナルを提供します。

pub mod handler;
mod server;
mod signal;
pub mod state;

pub use server::Server;
