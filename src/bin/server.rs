//! Blind WebSocket relay server for end-to-end encrypted ephemeral chat.
//!
//! Forwards opaque ciphertext between the members of a room without ever
//! being able to read it.
//!
//! Run with:
//! ```not_rust
//! JOIN_TOKEN_SECRET=... KV_URL=redis://127.0.0.1/ cargo run --bin server
//! cargo run --bin server -- --host 0.0.0.0 --port 3000
//! ```

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use clap::Parser;
use dashmap::DashMap;

use naisho::{
    common::{
        config::Config,
        logger::setup_logger,
        time::{Clock, SystemClock},
    },
    domain::{MessagePusher, RoomStore},
    infrastructure::{
        message_pusher::WebSocketMessagePusher, meters::ConnectionMeters, metrics::Metrics,
        repository::RedisRoomStore, room_router::RoomRouter, token_codec::JoinTokenCodec,
    },
    ui::{Server, state::AppState},
    usecase::{
        CreateRoomUseCase, DisconnectUseCase, IssueTokenUseCase, JoinRoomUseCase,
        LeaveRoomUseCase, RelayMessageUseCase,
    },
};

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Blind WebSocket relay for E2EE ephemeral group chat", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();

    // Initialize dependencies in order:
    // 1. Config + clock + codec
    // 2. Store (external KV)
    // 3. Registry / router / meters / metrics
    // 4. UseCases
    // 5. AppState + Server

    let config = Arc::new(Config::load());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let codec = Arc::new(
        JoinTokenCodec::new(&config.join_token_secret).expect("secret length validated at load"),
    );

    let store: Arc<dyn RoomStore> = match RedisRoomStore::connect(
        &config.kv_url,
        config.kv_connect_timeout_ms,
        config.kv_max_retries_per_request,
        config.room_max_participants,
        config.room_key_ttl_ms,
        clock.clone(),
    )
    .await
    {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!("Cannot reach the key-value store: {e}");
            std::process::exit(1);
        }
    };

    let pusher = Arc::new(WebSocketMessagePusher::new(
        config.max_ws_frame_bytes.saturating_mul(4),
    ));
    let pusher_dyn: Arc<dyn MessagePusher> = pusher.clone();
    let router = RoomRouter::new(
        codec.clone(),
        pusher_dyn.clone(),
        store.clone(),
        clock.clone(),
        config.qr_rotation_ms,
    );
    let meters = Arc::new(ConnectionMeters::new(
        config.max_total_connections,
        config.max_conns_per_ip,
    ));
    let metrics = Arc::new(Metrics::new());

    let create_room_usecase = Arc::new(CreateRoomUseCase::new(
        store.clone(),
        router.clone(),
        config.room_max_participants,
    ));
    let join_room_usecase = Arc::new(JoinRoomUseCase::new(
        store.clone(),
        router.clone(),
        codec.clone(),
        clock.clone(),
        config.room_max_participants,
        config.room_key_ttl_ms,
    ));
    let leave_room_usecase = Arc::new(LeaveRoomUseCase::new(
        store.clone(),
        router.clone(),
        pusher_dyn.clone(),
        config.room_max_participants,
    ));
    let relay_message_usecase = Arc::new(RelayMessageUseCase::new(
        store.clone(),
        router.clone(),
        pusher_dyn.clone(),
        config.max_ct_bytes,
    ));
    let disconnect_usecase = Arc::new(DisconnectUseCase::new(
        leave_room_usecase.clone(),
        pusher_dyn.clone(),
    ));
    let issue_token_usecase = Arc::new(IssueTokenUseCase::new(
        store.clone(),
        codec.clone(),
        clock.clone(),
        config.qr_rotation_ms,
    ));

    let state = Arc::new(AppState {
        config: config.clone(),
        clock,
        store,
        pusher,
        router,
        meters,
        metrics,
        store_ready: Arc::new(AtomicBool::new(true)),
        http_create_limiter: DashMap::new(),
        create_room_usecase,
        join_room_usecase,
        leave_room_usecase,
        relay_message_usecase,
        disconnect_usecase,
        issue_token_usecase,
    });

    let server = Server::new(state);
    if let Err(e) = server.run(args.host, args.port).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
