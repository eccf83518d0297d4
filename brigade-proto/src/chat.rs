//! Message notifications and unread counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum number of characters carried in a [`MessageSummary::preview`].
pub const PREVIEW_CHARS: usize = 80;

/// Unique, time-ordered identifier of a chat message (UUID v7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Generates a new identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a push notification says about a newly arrived message.
///
/// Carries just enough to show a toast; the authoritative unread count is
/// always fetched separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSummary {
    /// Identifier of the message.
    pub message_id: MessageId,
    /// Member who sent it.
    pub from_user_id: String,
    /// The first [`PREVIEW_CHARS`] characters of the text.
    pub preview: String,
    /// When the server accepted the message.
    pub timestamp: DateTime<Utc>,
}

impl MessageSummary {
    /// Builds a summary, truncating `text` to the preview length.
    pub fn new(from_user_id: impl Into<String>, text: &str, timestamp: DateTime<Utc>) -> Self {
        Self {
            message_id: MessageId::new(),
            from_user_id: from_user_id.into(),
            preview: text.chars().take(PREVIEW_CHARS).collect(),
            timestamp,
        }
    }
}

/// Body of `POST /api/chat/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendMessageRequest {
    /// Recipient of a private message; `None` posts to the brigade chat.
    #[serde(default)]
    pub to_user_id: Option<String>,
    /// Message text.
    pub text: String,
}

/// One message as listed by `GET /api/chat/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Identifier of the message.
    pub message_id: MessageId,
    /// Sender.
    pub from_user_id: String,
    /// Recipient of a private message; `None` for the brigade chat.
    pub to_user_id: Option<String>,
    /// Full text.
    pub text: String,
    /// When the server accepted the message.
    pub timestamp: DateTime<Utc>,
}

/// Body of `GET /api/chat/unread-count`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnreadCount {
    /// Pending private messages for the authenticated member.
    pub unread_private: u32,
}
