//! Connection lifecycle for the realtime channel.
//!
//! Per-connection state machine: the credential is verified before the
//! upgrade completes (rejected connections never join a room and receive no
//! protocol traffic), then the connection is registered with the router,
//! acknowledged with a `connected` event, and driven by a single select
//! loop until the transport closes.

use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::api::SharedState;
use crate::auth::{self, Identity};
use crate::errors::AuthError;

use super::events::{ClientEvent, ServerEvent};

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Deserialize)]
pub struct WsAuthQuery {
    token: Option<String>,
}

/// Extract the presented credential: `?token=` query parameter or
/// `Authorization: Bearer` header.
fn presented_token(query: &WsAuthQuery, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = &query.token {
        return Some(token.clone());
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsAuthQuery>,
    headers: HeaderMap,
    State(state): State<SharedState>,
) -> Response {
    let verified = match presented_token(&query, &headers) {
        None => Err(AuthError::MissingToken),
        Some(token) => auth::verify_token(&token, &state.config.jwt_secret),
    };

    match verified {
        Ok(identity) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, identity))
            .into_response(),
        Err(e) => {
            warn!(reason = %e, "websocket connection rejected");
            (
                StatusCode::UNAUTHORIZED,
                axum::Json(serde_json::json!({ "error": e.to_string() })),
            )
                .into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: SharedState, identity: Identity) {
    let socket_id = Uuid::new_v4();
    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let rooms = state.router.register(socket_id, identity.clone(), tx);

    state.router.emit_to_connection(
        socket_id,
        &ServerEvent::Connected {
            user_id: identity.user_id,
            email: identity.email.clone(),
            role: identity.role,
            socket_id,
            rooms,
            timestamp: Utc::now(),
        },
    );

    let (mut sender, mut receiver) = socket.split();

    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;
    let mut close_reason = "transport closed";

    loop {
        tokio::select! {
            // ── Keepalive ───────────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    close_reason = "keepalive timeout";
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Outbound events from the router ─────────────────────
            outbound = rx.recv() => {
                match outbound {
                    Some(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            // ── Inbound client messages ─────────────────────────────
            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<ClientEvent>(text.as_str()) {
                            Ok(ClientEvent::Ping) => {
                                state.router.emit_to_connection(
                                    socket_id,
                                    &ServerEvent::Pong { timestamp: Utc::now() },
                                );
                            }
                            Err(_) => {
                                debug!(socket = %socket_id, "ignoring unrecognized client message");
                            }
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) => {
                        close_reason = "client disconnect";
                        break;
                    }
                    None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        // Non-closure transport errors do not change state;
                        // a dead stream surfaces as Close/None on a later turn.
                        warn!(socket = %socket_id, error = %e, "transport error while active");
                    }
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;

    state.router.remove(socket_id);
    info!(
        socket = %socket_id,
        email = %identity.email,
        reason = close_reason,
        "client disconnected"
    );
}
