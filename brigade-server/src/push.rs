//! Push-channel WebSocket handler.
//!
//! Session lifecycle:
//! 1. Wait for a `Hello { user_id }` frame.
//! 2. Reply `Connected`, register the session, queue the current snapshot.
//! 3. Read `location_update` / `ping_user` frames until the socket closes.
//! 4. Unregister; if this was the member's last session and it reported a
//!    location, drop the location and broadcast the new snapshot.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use brigade_proto::codec::{self, CodecError};
use brigade_proto::push::{ClientEvent, ServerEvent};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::hub::{ConnectionId, encode_frame};
use crate::server::ServerState;

/// Text delivered with every `ping_received`.
pub const PING_MESSAGE: &str = "Ping from fellow firefighter!";

/// axum handler that upgrades an HTTP request to a push-channel session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<ServerState>>,
) -> impl IntoResponse {
    let max = state.max_frame_size();
    ws.max_message_size(max.saturating_mul(2))
        .on_upgrade(move |socket| handle_socket(socket, state))
}

/// Runs one push-channel session to completion.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(user_id) = wait_for_hello(&mut ws_receiver, state.max_frame_size()).await else {
        tracing::warn!("connection closed before hello");
        return;
    };

    let Some(ack) = encode_frame(&ServerEvent::Connected {
        user_id: user_id.clone(),
    }) else {
        return;
    };
    if let Err(e) = ws_sender.send(ack).await {
        tracing::warn!(user_id = %user_id, error = %e, "failed to send connected ack");
        return;
    }

    let conn_id: ConnectionId = Uuid::now_v7();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    state.hub.register(conn_id, &user_id, tx).await;
    tracing::info!(user_id = %user_id, connection = %conn_id, "push session opened");

    let snapshot = state.presence.snapshot(chrono::Utc::now()).await;
    state
        .hub
        .send_to_connection(conn_id, &ServerEvent::UserLocations(snapshot))
        .await;

    let writer_user = user_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if ws_sender.send(msg).await.is_err() {
                tracing::debug!(user_id = %writer_user, "push write failed");
                break;
            }
            if closing {
                break;
            }
        }
    });

    let reader_user = user_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_frame(&reader_state, conn_id, &reader_user, &data).await;
                }
                Message::Close(_) => {
                    tracing::debug!(user_id = %reader_user, "received close frame");
                    break;
                }
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => write_task.abort(),
        _ = &mut write_task => read_task.abort(),
    }

    if let Some(departure) = state.hub.unregister(conn_id).await {
        tracing::info!(user_id = %user_id, connection = %conn_id, "push session closed");
        if departure.reported_location && !departure.other_sessions {
            state.forget_location(&departure.user_id).await;
        }
    }
}

/// Waits for the opening `Hello` frame and returns its `user_id`.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    max_frame_size: usize,
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match codec::decode_bounded::<ClientEvent>(&data, max_frame_size) {
                    Ok(ClientEvent::Hello { user_id }) if !user_id.trim().is_empty() => {
                        Some(user_id)
                    }
                    Ok(ClientEvent::Hello { .. }) => {
                        tracing::warn!("hello with empty user_id");
                        None
                    }
                    Ok(other) => {
                        tracing::warn!(event = ?other, "expected hello");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode hello");
                        None
                    }
                };
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Handles one binary frame from an established session.
async fn handle_frame(state: &Arc<ServerState>, conn_id: ConnectionId, user_id: &str, data: &[u8]) {
    let event = match codec::decode_bounded::<ClientEvent>(data, state.max_frame_size()) {
        Ok(event) => event,
        Err(e) => {
            tracing::warn!(user_id = %user_id, error = %e, "rejecting push frame");
            let reason = match e {
                CodecError::FrameTooLarge { size, max } => {
                    format!("frame too large: {size} bytes (max {max})")
                }
                CodecError::Serialization(_) => "malformed frame".to_string(),
            };
            state
                .hub
                .send_to_connection(conn_id, &ServerEvent::Error { reason })
                .await;
            return;
        }
    };

    match event {
        ClientEvent::LocationUpdate(coordinate) => {
            if !coordinate.is_valid() {
                let reason = format!("invalid coordinate {coordinate}");
                state
                    .hub
                    .send_to_connection(conn_id, &ServerEvent::Error { reason })
                    .await;
                return;
            }
            state.hub.mark_reported(conn_id).await;
            state.ingest_location(user_id, coordinate).await;
        }
        ClientEvent::PingUser { target_user_id } => {
            let ping = ServerEvent::PingReceived {
                from_user_id: user_id.to_string(),
                message: PING_MESSAGE.to_string(),
            };
            let delivered = state.hub.send_to_user(&target_user_id, &ping).await;
            tracing::debug!(from = %user_id, to = %target_user_id, delivered, "ping routed");
        }
        ClientEvent::Hello { user_id: again } => {
            tracing::warn!(user_id = %user_id, new_id = %again, "duplicate hello ignored");
        }
    }
}
