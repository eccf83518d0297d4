//! Push-channel transport for Brigade.
//!
//! Defines the [`Connector`] / [`PushLink`] seam the
//! [`selector::TransportSelector`] supervises. Concrete implementations:
//! - [`ws::WsConnector`]: WebSocket connection to the Brigade server
//! - [`loopback::LoopbackConnector`]: in-process channel pair for testing

pub mod loopback;
pub mod selector;
pub mod ws;

use std::fmt;
use std::future::Future;

use brigade_proto::chat::MessageSummary;
use brigade_proto::presence::PresenceSnapshot;
use brigade_proto::push::{ClientEvent, ServerEvent};

/// Lifecycle of the push channel as seen by the rest of the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// First attempt in progress after `connect()`.
    Connecting,
    /// Handshake acknowledged; events are flowing.
    Connected,
    /// Idle. Either never connected, shut down, or out of retries.
    Disconnected,
    /// Lost the channel (or failed to open it) and retrying.
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Disconnected => write!(f, "disconnected"),
            Self::Reconnecting => write!(f, "reconnecting"),
        }
    }
}

/// Events the selector delivers to subscribers.
///
/// There is no ordering guarantee across event kinds; consumers must treat
/// every event idempotently.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// The handshake completed for `user_id`.
    Connected {
        /// Member the channel was opened for.
        user_id: String,
    },
    /// A complete presence snapshot (`user_locations`).
    PresenceUpdate(PresenceSnapshot),
    /// A private message arrived (`new_message`).
    DirectNotification(MessageSummary),
    /// A brigade chat message arrived (`new_chat_message`).
    ChatMessage(MessageSummary),
    /// Another member pinged us.
    PingReceived {
        /// Who pinged.
        from_user_id: String,
        /// Text to show.
        message: String,
    },
    /// The connection state changed.
    StateChanged(ConnectionState),
}

impl PushEvent {
    /// Maps a server event to what subscribers see.
    ///
    /// Returns `None` for events that are handled inside the transport
    /// (handshake confirmations and error reports).
    #[must_use]
    pub fn from_server(event: ServerEvent) -> Option<Self> {
        match event {
            ServerEvent::UserLocations(snapshot) => Some(Self::PresenceUpdate(snapshot)),
            ServerEvent::NewMessage(summary) => Some(Self::DirectNotification(summary)),
            ServerEvent::NewChatMessage(summary) => Some(Self::ChatMessage(summary)),
            ServerEvent::PingReceived {
                from_user_id,
                message,
            } => Some(Self::PingReceived {
                from_user_id,
                message,
            }),
            ServerEvent::Connected { .. } => None,
            ServerEvent::Error { reason } => {
                tracing::warn!(reason = %reason, "server rejected push frame");
                None
            }
        }
    }
}

/// Errors that can occur during transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection has been closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// Connecting or the handshake did not finish in time.
    #[error("transport operation timed out")]
    Timeout,

    /// The server could not be reached.
    #[error("server {0} is unreachable")]
    Unreachable(String),

    /// The server answered the handshake with something else.
    #[error("handshake rejected: {0}")]
    Handshake(String),

    /// Nothing is connected right now; the event was dropped.
    #[error("push channel is not connected")]
    NotConnected,

    /// A frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] brigade_proto::codec::CodecError),

    /// An underlying I/O error occurred.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opens push-channel links.
///
/// The selector calls [`Connector::connect`] once per attempt; a returned
/// link has already completed the `Hello` / `Connected` handshake.
pub trait Connector: Send + Sync + 'static {
    /// The link type this connector produces.
    type Link: PushLink;

    /// Open a link to `endpoint` for `user_id` and complete the handshake.
    fn connect(
        &self,
        endpoint: &str,
        user_id: &str,
    ) -> impl Future<Output = Result<Self::Link, TransportError>> + Send;
}

/// An established push channel.
///
/// Owned by exactly one supervisor task; dropping it releases the
/// underlying resource.
pub trait PushLink: Send + 'static {
    /// Send one event to the server.
    fn send(
        &mut self,
        event: &ClientEvent,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next event from the server.
    ///
    /// Malformed frames are skipped. Must be cancel-safe.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::ConnectionClosed`] once the link is gone.
    fn recv(&mut self) -> impl Future<Output = Result<ServerEvent, TransportError>> + Send;

    /// Close the link gracefully.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
