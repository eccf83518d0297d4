//! Push-channel events exchanged over the `/ws` WebSocket.
//!
//! Every event travels as one binary frame encoded with [`crate::codec`].
//! The first frame a client sends must be [`ClientEvent::Hello`]; the server
//! answers with [`ServerEvent::Connected`] followed by the current
//! [`ServerEvent::UserLocations`] snapshot.

use serde::{Deserialize, Serialize};

use crate::chat::MessageSummary;
use crate::location::Coordinate;
use crate::presence::PresenceSnapshot;

/// Events emitted by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientEvent {
    /// Opens the session for `user_id`. Must be the first frame.
    Hello {
        /// The member this connection belongs to.
        user_id: String,
    },

    /// The sender's current position (`location_update`).
    LocationUpdate(Coordinate),

    /// Nudge another member (`ping_user`).
    PingUser {
        /// Member to ping.
        target_user_id: String,
    },
}

/// Events emitted by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerEvent {
    /// Connection confirmation, sent once after a valid `Hello`.
    Connected {
        /// The member id the session was opened for.
        user_id: String,
    },

    /// Full presence snapshot (`user_locations`). Replaces, never patches.
    UserLocations(PresenceSnapshot),

    /// Another member pinged this one (`ping_received`).
    PingReceived {
        /// Who sent the ping.
        from_user_id: String,
        /// Text to show.
        message: String,
    },

    /// A private message arrived for this member (`new_message`).
    NewMessage(MessageSummary),

    /// A message was posted to the brigade chat (`new_chat_message`).
    NewChatMessage(MessageSummary),

    /// The server rejected the previous frame.
    Error {
        /// Human-readable reason.
        reason: String,
    },
}

impl ServerEvent {
    /// Short event name, as used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::UserLocations(_) => "user_locations",
            Self::PingReceived { .. } => "ping_received",
            Self::NewMessage(_) => "new_message",
            Self::NewChatMessage(_) => "new_chat_message",
            Self::Error { .. } => "error",
        }
    }
}
