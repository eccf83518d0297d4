//! Registry of live push-channel connections and event fan-out.
//!
//! Each WebSocket session gets a [`ConnectionId`] and an unbounded channel
//! feeding its writer task. A member may hold several sessions at once
//! (phone and dashboard); events addressed to a member reach all of them.

use std::collections::HashMap;

use axum::extract::ws::Message;
use brigade_proto::codec;
use brigade_proto::push::ServerEvent;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

/// Identifier of one push-channel session.
pub type ConnectionId = Uuid;

/// One registered push-channel session.
#[derive(Debug)]
struct Connection {
    user_id: String,
    sender: mpsc::UnboundedSender<Message>,
    reported_location: bool,
}

/// What [`Hub::unregister`] learned about the session it removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Departure {
    /// Member the session belonged to.
    pub user_id: String,
    /// Whether this session ever sent a `location_update`.
    pub reported_location: bool,
    /// Whether the member still has other live sessions.
    pub other_sessions: bool,
}

/// Live push-channel sessions keyed by [`ConnectionId`].
#[derive(Default)]
pub struct Hub {
    connections: RwLock<HashMap<ConnectionId, Connection>>,
}

impl Hub {
    /// Creates an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for `user_id`.
    pub async fn register(
        &self,
        id: ConnectionId,
        user_id: &str,
        sender: mpsc::UnboundedSender<Message>,
    ) {
        let mut conns = self.connections.write().await;
        conns.insert(
            id,
            Connection {
                user_id: user_id.to_string(),
                sender,
                reported_location: false,
            },
        );
    }

    /// Removes a session, reporting who it belonged to.
    pub async fn unregister(&self, id: ConnectionId) -> Option<Departure> {
        let mut conns = self.connections.write().await;
        let conn = conns.remove(&id)?;
        let other_sessions = conns.values().any(|c| c.user_id == conn.user_id);
        Some(Departure {
            user_id: conn.user_id,
            reported_location: conn.reported_location,
            other_sessions,
        })
    }

    /// Remembers that session `id` has reported a location.
    pub async fn mark_reported(&self, id: ConnectionId) {
        if let Some(conn) = self.connections.write().await.get_mut(&id) {
            conn.reported_location = true;
        }
    }

    /// Number of live sessions.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Returns `true` if `user_id` has at least one live session.
    pub async fn is_online(&self, user_id: &str) -> bool {
        self.connections
            .read()
            .await
            .values()
            .any(|c| c.user_id == user_id)
    }

    /// Sends `event` to every session, optionally skipping one member's.
    ///
    /// Returns the number of sessions the event was queued for.
    pub async fn broadcast(&self, event: &ServerEvent, except_user: Option<&str>) -> usize {
        let Some(frame) = encode_frame(event) else {
            return 0;
        };
        let conns = self.connections.read().await;
        let mut delivered = 0;
        for (id, conn) in conns.iter() {
            if except_user.is_some_and(|u| u == conn.user_id) {
                continue;
            }
            if conn.sender.send(frame.clone()).is_ok() {
                delivered += 1;
            } else {
                tracing::debug!(connection = %id, "writer gone, skipping broadcast");
            }
        }
        drop(conns);
        tracing::debug!(event = event.name(), delivered, "broadcast");
        delivered
    }

    /// Sends `event` to every session of `user_id`.
    ///
    /// Returns the number of sessions the event was queued for.
    pub async fn send_to_user(&self, user_id: &str, event: &ServerEvent) -> usize {
        let Some(frame) = encode_frame(event) else {
            return 0;
        };
        let conns = self.connections.read().await;
        conns
            .values()
            .filter(|c| c.user_id == user_id)
            .filter(|c| c.sender.send(frame.clone()).is_ok())
            .count()
    }

    /// Sends `event` to a single session.
    pub async fn send_to_connection(&self, id: ConnectionId, event: &ServerEvent) -> bool {
        let Some(frame) = encode_frame(event) else {
            return false;
        };
        self.connections
            .read()
            .await
            .get(&id)
            .is_some_and(|c| c.sender.send(frame).is_ok())
    }
}

/// Encodes an event into a binary WebSocket frame.
pub fn encode_frame(event: &ServerEvent) -> Option<Message> {
    match codec::encode(event) {
        Ok(bytes) => Some(Message::Binary(bytes.into())),
        Err(e) => {
            tracing::error!(event = event.name(), error = %e, "failed to encode server event");
            None
        }
    }
}
