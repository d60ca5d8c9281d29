//! WebSocket upgrade handler and per-connection event loop.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::time::{self, Instant};

use crate::auth::middleware::ClientIp;
use crate::auth::tokens::Identity;
use crate::error::{ApiError, ChatError, FieldError};
use crate::models::comment::{Comment, PublicComment};
use crate::AppState;

use super::events::{
    BlockIpPayload, ClientMessage, CloseReason, DeleteCommentPayload, EventName, GatewayMessage,
    MatchInfoPayload, SubmitCommentPayload, OP_BLOCK_IP, OP_CLEAR_MATCH_INFO, OP_DELETE_COMMENT,
    OP_HEARTBEAT, OP_REQUEST_MATCH_INFO, OP_REQUEST_VIEWER_COUNT, OP_SUBMIT_COMMENT,
    OP_UPDATE_MATCH_INFO,
};
use super::handler::Submitter;
use super::registry::{SessionHandle, SessionOutlet};
use super::resume::History;
use super::session::ViewerSession;

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Floor for how often idle sessions are checked.
const MIN_IDLE_CHECK: Duration = Duration::from_millis(100);

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway", get(ws_upgrade))
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    /// Bearer token from the auth service. Anonymous viewers omit it.
    #[serde(default)]
    token: Option<String>,
    /// Last comment id the client saw, when reconnecting.
    #[serde(default)]
    after: Option<i64>,
}

async fn ws_upgrade(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    Query(params): Query<ConnectParams>,
) -> Response {
    let identity = match params.token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => match state.tokens.verify(token) {
            Ok(identity) => Some(identity),
            Err(e) => {
                tracing::debug!(ip = %ip, error = %e, "gateway token rejected");
                return ApiError::unauthorized("Invalid or expired token").into_response();
            }
        },
        None => None,
    };

    if state.moderation.is_blocked(&ip) {
        tracing::debug!(ip = %ip, "connection from blocked ip refused");
        return ApiError::from(ChatError::Blocked).into_response();
    }

    let after = params.after;
    ws.on_upgrade(move |socket| handle_connection(socket, state, ip, identity, after))
}

async fn handle_connection(
    socket: WebSocket,
    state: AppState,
    ip: String,
    identity: Option<Identity>,
    after: Option<i64>,
) {
    let (mut ws_tx, ws_rx) = socket.split();

    let session = Arc::new(ViewerSession::new(ip, identity));
    let (handle, outlet) = SessionHandle::channel(session.clone(), state.config.session_buffer);

    // Register before reading history so nothing published in between is missed.
    if let Err(e) = state.hub.connect(handle).await {
        let reason = match e {
            ChatError::Blocked => CloseReason::BLOCKED,
            _ => CloseReason::UNKNOWN_ERROR,
        };
        tracing::debug!(session_id = %session.session_id, error = %e, "session not admitted");
        session.begin_close();
        let _ = send_close(&mut ws_tx, reason).await;
        session.mark_closed();
        return;
    }

    tracing::info!(
        session_id = %session.session_id,
        ip = %session.ip_address,
        admin = session.is_admin(),
        "viewer connected"
    );

    let history = match state.gateway.history(after).await {
        Ok(history) => history,
        Err(e) => {
            tracing::error!(session_id = %session.session_id, error = %e, "failed to load history");
            History::default()
        }
    };

    let match_info = match state.gateway.match_info().await {
        Ok(info) => info,
        Err(e) => {
            tracing::error!(session_id = %session.session_id, error = %e, "failed to load match info");
            None
        }
    };

    let ready = GatewayMessage::dispatch(
        EventName::READY,
        None,
        json!({
            "session_id": session.session_id,
            "heartbeat_interval": state.config.idle_timeout().as_millis() as u64 / 2,
            "is_admin": session.is_admin(),
            "channel_active": state.gateway.is_channel_active(),
            "viewer_count": state.hub.viewer_count(),
            "resumed": history.resumed,
            "comments": history.render(session.is_admin()),
            "match_info": match_info,
        }),
    );

    if ws_tx.send(Message::Text(ready.to_text())).await.is_ok() {
        run_session(&state, &session, &history, ws_tx, ws_rx, outlet).await;
    }

    session.begin_close();
    state.hub.disconnect(&session.session_id);

    tracing::info!(session_id = %session.session_id, "viewer disconnected");
}

/// Main session loop: read client messages, forward hub frames, enforce idle timeout.
async fn run_session(
    state: &AppState,
    session: &ViewerSession,
    history: &History,
    mut ws_tx: WsSink,
    mut ws_rx: WsStream,
    mut outlet: SessionOutlet,
) {
    let idle_timeout = state.config.idle_timeout();
    let mut idle_check = time::interval((idle_timeout / 4).max(MIN_IDLE_CHECK));
    idle_check.tick().await; // First tick fires immediately; skip it.
    let mut last_seen = Instant::now();

    loop {
        tokio::select! {
            // Client sends us a message.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        last_seen = Instant::now();
                        let client_msg: ClientMessage = match serde_json::from_str(&text) {
                            Ok(m) => m,
                            Err(_) => {
                                let _ = send_close(&mut ws_tx, CloseReason::DECODE_ERROR).await;
                                break;
                            }
                        };

                        match handle_op(state, session, client_msg).await {
                            Ok(reply) => {
                                if ws_tx.send(Message::Text(reply.to_text())).await.is_err() {
                                    break;
                                }
                            }
                            Err(reason) => {
                                let _ = send_close(&mut ws_tx, reason).await;
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_seen = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(?e, session_id = %session.session_id, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // Frame queued by the hub.
            frame = outlet.frames.recv() => {
                match frame {
                    Some(frame) => {
                        if history.repeats(&frame) {
                            continue;
                        }
                        if ws_tx.send(Message::Text(frame.text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // The hub dropped this session (blocked or too slow).
            reason = outlet.termination.requested() => {
                while let Ok(frame) = outlet.frames.try_recv() {
                    if history.repeats(&frame) {
                        continue;
                    }
                    if ws_tx.send(Message::Text(frame.text)).await.is_err() {
                        break;
                    }
                }
                tracing::debug!(
                    session_id = %session.session_id,
                    code = reason.code,
                    "session closed by hub"
                );
                let _ = send_close(&mut ws_tx, reason).await;
                break;
            }

            // Idle timeout check.
            _ = idle_check.tick() => {
                if last_seen.elapsed() >= idle_timeout {
                    tracing::debug!(session_id = %session.session_id, "idle timeout, closing connection");
                    let _ = send_close(&mut ws_tx, CloseReason::IDLE_TIMEOUT).await;
                    break;
                }
            }
        }
    }
}

/// Handle one client opcode. Returns the reply to send, or a close reason
/// for opcodes the gateway does not speak.
async fn handle_op(
    state: &AppState,
    session: &ViewerSession,
    msg: ClientMessage,
) -> Result<GatewayMessage, CloseReason> {
    let nonce = msg.n;
    let actor = session.identity.as_ref();

    let result: Result<Value, ChatError> = match msg.op {
        OP_HEARTBEAT => return Ok(GatewayMessage::heartbeat_ack()),
        OP_SUBMIT_COMMENT => match parse::<SubmitCommentPayload>(msg.d) {
            Ok(payload) => {
                let from = Submitter {
                    ip: &session.ip_address,
                    identity: actor,
                };
                state
                    .gateway
                    .submit(from, payload)
                    .await
                    .map(|c| json!({ "comment": comment_view(&c, session.is_admin()) }))
            }
            Err(e) => Err(e),
        },
        OP_DELETE_COMMENT => match parse::<DeleteCommentPayload>(msg.d) {
            Ok(payload) => state
                .gateway
                .delete(actor, payload.comment_id)
                .await
                .map(|d| json!({ "comment_id": d.comment.id, "newly_deleted": d.newly_deleted })),
            Err(e) => Err(e),
        },
        OP_BLOCK_IP => match parse::<BlockIpPayload>(msg.d) {
            Ok(payload) => state
                .gateway
                .block(actor, payload)
                .await
                .map(|entry| json!({ "blocked": entry })),
            Err(e) => Err(e),
        },
        OP_REQUEST_VIEWER_COUNT => Ok(json!({ "count": state.hub.viewer_count() })),
        OP_UPDATE_MATCH_INFO => match parse::<MatchInfoPayload>(msg.d) {
            Ok(payload) => state
                .gateway
                .update_match_info(actor, payload)
                .await
                .map(|info| json!({ "match_info": info })),
            Err(e) => Err(e),
        },
        OP_CLEAR_MATCH_INFO => state
            .gateway
            .clear_match_info(actor)
            .await
            .map(|()| json!({ "match_info": null })),
        OP_REQUEST_MATCH_INFO => state
            .gateway
            .match_info()
            .await
            .map(|info| json!({ "match_info": info })),
        op => {
            tracing::debug!(op, session_id = %session.session_id, "unknown opcode");
            return Err(CloseReason::UNKNOWN_OPCODE);
        }
    };

    Ok(match result {
        Ok(data) => GatewayMessage::reply_ok(nonce, data),
        Err(e) => GatewayMessage::reply_err(nonce, &e),
    })
}

fn parse<T: DeserializeOwned>(d: Value) -> Result<T, ChatError> {
    serde_json::from_value(d)
        .map_err(|e| ChatError::Validation(vec![FieldError::new("d", e.to_string())]))
}

fn comment_view(comment: &Comment, admin: bool) -> Value {
    if admin {
        json!(comment)
    } else {
        json!(PublicComment::from(comment))
    }
}

/// Send a WebSocket close frame with a code and reason.
async fn send_close(ws_tx: &mut WsSink, reason: CloseReason) -> Result<(), axum::Error> {
    let close_msg = Message::Close(Some(CloseFrame {
        code: reason.code,
        reason: reason.reason.into(),
    }));
    ws_tx.send(close_msg).await
}
