//! WebSocket connection handlers: admission, the per-connection receive
//! loop, and the protocol state machine.
//!
//! One task per connection runs the receive loop inline and spawns a
//! dedicated pusher task that owns the socket sink. Frames are processed
//! strictly in arrival order; the single cleanup path at the bottom of
//! `handle_socket` runs exactly once for every admitted socket, however it
//! ended.
//!
//! Ciphertext and media chunks are opaque here: they are moved, never
//! formatted, logged, or inspected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use axum::{
    extract::{
        ConnectInfo, State,
        ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{FutureExt, sink::SinkExt, stream::StreamExt};
use tokio::sync::{Notify, mpsc};

use crate::common::logger::Redacted;
use crate::domain::{
    ConnId, ConnIdFactory, ErrorCode, Label, MessagePusher, Outbound, RoomId, TokenBucket,
};
use crate::infrastructure::dto::websocket::{
    ClientEnvelope, ClientFrame, PROTOCOL_VERSION, ServerEnvelope, ServerFrame, SystemMsgKind,
};
use crate::infrastructure::message_pusher::CLOSE_POLICY_VIOLATION;
use crate::infrastructure::meters::RejectReason;
use crate::ui::state::AppState;

/// Close codes of the wire contract.
const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
const CLOSE_INTERNAL_ERROR: u16 = 1011;

/// Frames-per-bucket refill window.
const BUCKET_WINDOW_MS: i64 = 10_000;

/// What the receive loop should do after a frame.
enum Flow {
    Continue,
    Closed,
}

/// Room membership of this socket, with the label assigned at join.
enum Session {
    Unjoined,
    InRoom { rid: RoomId, label: Label },
}

/// State owned exclusively by the connection's task.
struct ConnectionContext {
    session: Session,
    msg_bucket: TokenBucket,
    byte_bucket: TokenBucket,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> impl IntoResponse {
    // transport backstop; the engine enforces the exact frame limit itself
    let ws = ws.max_message_size(state.config.max_ws_frame_bytes * 2);

    match state.meters.try_acquire(addr.ip()) {
        Ok(()) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, addr))
            .into_response(),
        Err(reason) => {
            state.metrics.admissions_rejected_total.inc();
            tracing::warn!("Connection from {} rejected: {}", addr.ip(), reason.as_str());
            ws.on_upgrade(move |socket| reject_socket(socket, reason))
                .into_response()
        }
    }
}

/// Close an over-quota socket without consuming any meter slot.
async fn reject_socket(mut socket: WebSocket, reason: RejectReason) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY_VIOLATION,
            reason: reason.as_str().into(),
        })))
        .await;
}

/// Forward the outbound queue into the socket sink.
///
/// The buffered-bytes counter is decremented only after a frame actually
/// left for the transport; the registry uses the same counter to evict
/// slow consumers.
fn spawn_pusher_loop(
    mut sender: futures_util::stream::SplitSink<WebSocket, Message>,
    mut rx: mpsc::UnboundedReceiver<Outbound>,
    buffered_bytes: Arc<AtomicUsize>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(item) = rx.recv().await {
            match item {
                Outbound::Frame(json) => {
                    let len = json.len();
                    let result = sender.send(Message::Text(json.into())).await;
                    buffered_bytes.fetch_sub(len, Ordering::SeqCst);
                    if result.is_err() {
                        break;
                    }
                }
                Outbound::Ping => {
                    if sender
                        .send(Message::Ping(axum::body::Bytes::new()))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
                Outbound::Close { code, reason } => {
                    let _ = sender
                        .send(Message::Close(Some(CloseFrame {
                            code,
                            reason: reason.into(),
                        })))
                        .await;
                    break;
                }
            }
        }
    })
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, addr: SocketAddr) {
    let ip = addr.ip();
    let conn_id = ConnIdFactory::generate();
    let (mut ws_sender, mut ws_receiver) = socket.split();

    // HELLO carries the server clock so clients can judge token expiries
    let hello = ServerEnvelope::event(ServerFrame::Hello {
        server_time: state.clock.now_unix_millis(),
    })
    .to_json();
    if ws_sender.send(Message::Text(hello.into())).await.is_err() {
        state.meters.release(ip);
        return;
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let buffered_bytes = Arc::new(AtomicUsize::new(0));
    let shutdown = Arc::new(Notify::new());
    state.pusher.register(
        conn_id.clone(),
        tx,
        buffered_bytes.clone(),
        shutdown.clone(),
        state.clock.now_unix_millis(),
    );
    state.metrics.connections_total.inc();
    state.metrics.active_connections.inc();
    tracing::info!("Connection admitted");

    let push_task = spawn_pusher_loop(ws_sender, rx, buffered_bytes);

    let mut ctx = ConnectionContext {
        session: Session::Unjoined,
        msg_bucket: TokenBucket::new(
            state.config.max_msgs_per_10s,
            state.config.max_msgs_per_10s,
            BUCKET_WINDOW_MS,
            state.clock.clone(),
        ),
        byte_bucket: TokenBucket::new(
            state.config.max_bytes_per_10s,
            state.config.max_bytes_per_10s,
            BUCKET_WINDOW_MS,
            state.clock.clone(),
        ),
    };

    loop {
        tokio::select! {
            // forced termination (keep-alive, slow consumer, shutdown)
            _ = shutdown.notified() => break,
            incoming = ws_receiver.next() => {
                match incoming {
                    Some(Ok(message)) => {
                        match handle_message(&state, &conn_id, &mut ctx, message).await {
                            Flow::Continue => {}
                            Flow::Closed => break,
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket read error: {e}");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    // the single cleanup path: membership, registry, meters — exactly once
    let current_room = match &ctx.session {
        Session::InRoom { rid, .. } => Some(rid.clone()),
        Session::Unjoined => None,
    };
    state
        .disconnect_usecase
        .execute(&conn_id, current_room.as_ref())
        .await;
    state.meters.release(ip);
    state.metrics.active_connections.dec();
    state
        .metrics
        .active_rooms
        .set(state.router.room_count() as i64);
    push_task.abort();
    tracing::info!("Connection closed");
}

async fn handle_message(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    ctx: &mut ConnectionContext,
    message: Message,
) -> Flow {
    match message {
        Message::Text(text) => process_frame(state, conn_id, ctx, text.as_str()).await,
        Message::Pong(_) => {
            state
                .pusher
                .note_pong(conn_id, state.clock.now_unix_millis());
            Flow::Continue
        }
        // the transport answers pings for us
        Message::Ping(_) => Flow::Continue,
        Message::Close(_) => Flow::Closed,
        Message::Binary(_) => {
            close(state, conn_id, CLOSE_UNSUPPORTED_DATA, "text frames only")
        }
    }
}

/// Size and rate checks precede parsing; parsing precedes dispatch.
async fn process_frame(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    ctx: &mut ConnectionContext,
    text: &str,
) -> Flow {
    if text.len() > state.config.max_ws_frame_bytes {
        return close(state, conn_id, CLOSE_POLICY_VIOLATION, "oversized frame");
    }
    if !ctx.msg_bucket.take(1) || !ctx.byte_bucket.take(text.len() as u64) {
        return close(state, conn_id, CLOSE_POLICY_VIOLATION, "rate limit exceeded");
    }
    state.metrics.frames_in_total.inc();

    let envelope: ClientEnvelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(_) => {
            // serde's message can embed client text; log the frame redacted
            tracing::debug!("Schema violation in frame {}", Redacted(text));
            return close(state, conn_id, CLOSE_UNSUPPORTED_DATA, "schema violation");
        }
    };
    if envelope.v != PROTOCOL_VERSION {
        return close(state, conn_id, CLOSE_UNSUPPORTED_DATA, "unsupported version");
    }

    // a bug in one handler must cost one socket, never the process
    match std::panic::AssertUnwindSafe(dispatch(state, conn_id, ctx, envelope))
        .catch_unwind()
        .await
    {
        Ok(flow) => flow,
        Err(_) => {
            tracing::error!("Handler panicked on a frame");
            close(state, conn_id, CLOSE_INTERNAL_ERROR, "internal error")
        }
    }
}

async fn dispatch(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    ctx: &mut ConnectionContext,
    envelope: ClientEnvelope,
) -> Flow {
    let request_id = envelope.id;
    match envelope.frame {
        ClientFrame::Ping => {
            if let Session::InRoom { rid, .. } = &ctx.session {
                touch_room(state, rid).await;
            }
            reply(state, conn_id, &request_id, ServerFrame::Pong).await
        }

        ClientFrame::RoomCreate => handle_room_create(state, conn_id, ctx, &request_id).await,

        ClientFrame::JoinRequest { rid, token, label } => {
            handle_join_request(state, conn_id, ctx, &request_id, rid, token, label).await
        }

        ClientFrame::Leave { rid } => {
            handle_leave(state, conn_id, ctx, &request_id, rid).await
        }

        ClientFrame::AppMsg {
            rid,
            ciphertext_b64,
        } => handle_app_msg(state, conn_id, ctx, &request_id, rid, ciphertext_b64).await,

        ClientFrame::MediaMsg {
            rid,
            mime,
            size,
            chunk_size,
            chunks,
            from,
        } => {
            handle_media_msg(
                state, conn_id, ctx, &request_id, rid, mime, size, chunk_size, chunks, from,
            )
            .await
        }
    }
}

async fn handle_room_create(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    ctx: &mut ConnectionContext,
    request_id: &str,
) -> Flow {
    if matches!(ctx.session, Session::InRoom { .. }) {
        return error_reply(state, conn_id, request_id, ErrorCode::AlreadyInRoom).await;
    }

    match state.create_room_usecase.execute_with_creator(conn_id).await {
        Ok(created) => {
            state.metrics.rooms_created_total.inc();
            state
                .metrics
                .active_rooms
                .set(state.router.room_count() as i64);

            let flow = reply(
                state,
                conn_id,
                request_id,
                ServerFrame::RoomCreated {
                    rid: created.rid.as_str().to_string(),
                    qr_token: created.qr_token,
                    qr_exp: created.qr_exp,
                    max: created.max,
                },
            )
            .await;

            broadcast_room_stats(state, &created.rid, 1).await;
            ctx.session = Session::InRoom {
                rid: created.rid,
                label: Label::participant(1),
            };
            flow
        }
        Err(e) => {
            tracing::warn!("Room create failed: {e}");
            error_reply(state, conn_id, request_id, e.code()).await
        }
    }
}

async fn handle_join_request(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    ctx: &mut ConnectionContext,
    request_id: &str,
    rid: String,
    token: String,
    label: Option<String>,
) -> Flow {
    if matches!(ctx.session, Session::InRoom { .. }) {
        return error_reply(state, conn_id, request_id, ErrorCode::AlreadyInRoom).await;
    }
    let Ok(rid) = RoomId::new(rid) else {
        return close(state, conn_id, CLOSE_UNSUPPORTED_DATA, "malformed room id");
    };

    match state
        .join_room_usecase
        .execute(conn_id, &rid, &token, label.as_deref())
        .await
    {
        Ok(joined) => {
            state.metrics.joins_total.inc();
            state
                .metrics
                .active_rooms
                .set(state.router.room_count() as i64);

            let flow = reply(
                state,
                conn_id,
                request_id,
                ServerFrame::Joined {
                    rid: rid.as_str().to_string(),
                    participants: joined.participants,
                    max: joined.max,
                    label: joined.label.as_str().to_string(),
                    next_token: joined.next_token,
                    next_token_exp: joined.next_token_exp,
                },
            )
            .await;

            // announcement to the others, then fresh stats to everyone
            let others: Vec<ConnId> = state
                .router
                .members(&rid)
                .into_iter()
                .filter(|c| c != conn_id)
                .collect();
            let system = ServerEnvelope::event(ServerFrame::SystemMsg {
                text: format!(
                    "this person has entered the chat with the name {}",
                    joined.label.as_str()
                ),
                r#type: SystemMsgKind::Info,
            })
            .to_json();
            let _ = state.pusher.broadcast(others, &system).await;
            broadcast_room_stats(state, &rid, joined.participants).await;

            ctx.session = Session::InRoom {
                rid,
                label: joined.label,
            };
            flow
        }
        Err(e) => {
            let code = e.code();
            if code == ErrorCode::ServiceUnavailable {
                state.store_ready.store(false, Ordering::SeqCst);
            }
            tracing::info!("Join rejected: {}", code.as_str());
            error_reply(state, conn_id, request_id, code).await
        }
    }
}

async fn handle_leave(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    ctx: &mut ConnectionContext,
    request_id: &str,
    rid: String,
) -> Flow {
    match std::mem::replace(&mut ctx.session, Session::Unjoined) {
        Session::InRoom { rid: current, .. } if current.as_str() == rid => {
            match state.leave_room_usecase.execute(conn_id, &current).await {
                Ok(left) => {
                    state
                        .metrics
                        .active_rooms
                        .set(state.router.room_count() as i64);

                    // the actor's reply first, then the survivors hear it
                    let flow = reply(
                        state,
                        conn_id,
                        request_id,
                        ServerFrame::Left {
                            rid: current.as_str().to_string(),
                        },
                    )
                    .await;
                    state
                        .leave_room_usecase
                        .broadcast_departure(&current, &left)
                        .await;
                    flow
                }
                Err(e) => {
                    tracing::warn!("Leave failed: {e}");
                    state.store_ready.store(false, Ordering::SeqCst);
                    error_reply(state, conn_id, request_id, e.code()).await
                }
            }
        }
        other => {
            // not in that room; whatever state we had stays
            ctx.session = other;
            error_reply(state, conn_id, request_id, ErrorCode::NotInRoom).await
        }
    }
}

async fn handle_app_msg(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    ctx: &mut ConnectionContext,
    request_id: &str,
    rid: String,
    ciphertext_b64: String,
) -> Flow {
    let Session::InRoom { rid: current, label } = &ctx.session else {
        return error_reply(state, conn_id, request_id, ErrorCode::NotInRoom).await;
    };
    if current.as_str() != rid {
        return error_reply(state, conn_id, request_id, ErrorCode::NotInRoom).await;
    }

    match state
        .relay_message_usecase
        .relay_app(conn_id, label, current, ciphertext_b64)
        .await
    {
        Ok(_) => {
            state.metrics.frames_relayed_total.inc();
            Flow::Continue
        }
        Err(e) => error_reply(state, conn_id, request_id, e.code()).await,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_media_msg(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    ctx: &mut ConnectionContext,
    request_id: &str,
    rid: String,
    mime: String,
    size: u64,
    chunk_size: u64,
    chunks: Vec<String>,
    from: Option<String>,
) -> Flow {
    let Session::InRoom { rid: current, label } = &ctx.session else {
        return error_reply(state, conn_id, request_id, ErrorCode::NotInRoom).await;
    };
    if current.as_str() != rid {
        return error_reply(state, conn_id, request_id, ErrorCode::NotInRoom).await;
    }

    match state
        .relay_message_usecase
        .relay_media(
            conn_id, label, current, mime, size, chunk_size, chunks, from,
        )
        .await
    {
        Ok(_) => {
            state.metrics.frames_relayed_total.inc();
            Flow::Continue
        }
        Err(e) => error_reply(state, conn_id, request_id, e.code()).await,
    }
}

// ========================================
// Close vs error-frame decision helpers
// ========================================

/// Enqueue a reply frame for the actor. A dead queue closes the loop.
async fn reply(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    request_id: &str,
    frame: ServerFrame,
) -> Flow {
    let json = ServerEnvelope::reply(request_id, frame).to_json();
    match state.pusher.push_to(conn_id, &json).await {
        Ok(()) => Flow::Continue,
        Err(_) => Flow::Closed,
    }
}

/// The client can act on these: emit an `ERROR` frame and keep the socket.
async fn error_reply(
    state: &Arc<AppState>,
    conn_id: &ConnId,
    request_id: &str,
    code: ErrorCode,
) -> Flow {
    reply(state, conn_id, request_id, ServerFrame::error(code)).await
}

/// Continuing would violate an invariant or a limit: close the socket.
fn close(state: &Arc<AppState>, conn_id: &ConnId, code: u16, reason: &'static str) -> Flow {
    state.pusher.close(conn_id, code, reason);
    Flow::Closed
}

async fn broadcast_room_stats(state: &Arc<AppState>, rid: &RoomId, participants: u32) {
    let stats = ServerEnvelope::event(ServerFrame::RoomStats {
        rid: rid.as_str().to_string(),
        participants,
        max: state.config.room_max_participants,
    })
    .to_json();
    let members = state.router.members(rid);
    let _ = state.pusher.broadcast(members, &stats).await;
}

async fn touch_room(state: &Arc<AppState>, rid: &RoomId) {
    if let Err(e) = state.store.touch(rid).await {
        tracing::warn!("Failed to refresh room TTL: {e}");
    }
}
