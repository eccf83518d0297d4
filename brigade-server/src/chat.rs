//! In-memory chat store with per-member unread counters.
//!
//! Private messages bump the recipient's unread counter; brigade-wide
//! messages do not. History is a bounded FIFO: when the cap is exceeded the
//! oldest message is dropped.

use std::collections::{HashMap, VecDeque};

use brigade_proto::chat::{ChatEntry, MessageSummary};
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

/// Default number of messages kept in history.
const DEFAULT_MAX_HISTORY: usize = 1000;

/// A message accepted by the server.
#[derive(Debug, Clone)]
pub struct StoredMessage {
    /// Notification-sized view of the message.
    pub summary: MessageSummary,
    /// Recipient of a private message; `None` for the brigade chat.
    pub to_user_id: Option<String>,
    /// Full text.
    pub text: String,
}

impl From<StoredMessage> for ChatEntry {
    fn from(m: StoredMessage) -> Self {
        Self {
            message_id: m.summary.message_id,
            from_user_id: m.summary.from_user_id,
            to_user_id: m.to_user_id,
            text: m.text,
            timestamp: m.summary.timestamp,
        }
    }
}

/// Chat history plus unread counters.
pub struct ChatStore {
    history: RwLock<VecDeque<StoredMessage>>,
    unread: RwLock<HashMap<String, u32>>,
    max_history: usize,
}

impl Default for ChatStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatStore {
    /// Creates an empty store with the default history cap.
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY)
    }

    /// Creates an empty store with a custom history cap.
    #[must_use]
    pub fn with_max_history(max_history: usize) -> Self {
        Self {
            history: RwLock::new(VecDeque::new()),
            unread: RwLock::new(HashMap::new()),
            max_history,
        }
    }

    /// Stores a message from `from_user_id` and returns its summary.
    ///
    /// A private message increments the recipient's unread counter.
    pub async fn post(
        &self,
        from_user_id: &str,
        to_user_id: Option<&str>,
        text: &str,
        now: DateTime<Utc>,
    ) -> MessageSummary {
        let summary = MessageSummary::new(from_user_id, text, now);

        if let Some(to) = to_user_id {
            let mut unread = self.unread.write().await;
            let count = unread.entry(to.to_string()).or_default();
            *count = count.saturating_add(1);
        }

        let mut history = self.history.write().await;
        history.push_back(StoredMessage {
            summary: summary.clone(),
            to_user_id: to_user_id.map(str::to_string),
            text: text.to_string(),
        });
        if history.len() > self.max_history {
            history.pop_front();
        }
        drop(history);

        summary
    }

    /// Current unread private-message count for `user_id`.
    pub async fn unread(&self, user_id: &str) -> u32 {
        self.unread.read().await.get(user_id).copied().unwrap_or(0)
    }

    /// Resets `user_id`'s unread counter, returning the previous value.
    pub async fn mark_read(&self, user_id: &str) -> u32 {
        self.unread.write().await.remove(user_id).unwrap_or(0)
    }

    /// Number of messages in history.
    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }

    /// Most recent messages visible to `user_id` (brigade chat plus private
    /// messages to or from them), newest last.
    pub async fn recent_for(&self, user_id: &str, limit: usize) -> Vec<StoredMessage> {
        let history = self.history.read().await;
        let mut visible: Vec<StoredMessage> = history
            .iter()
            .rev()
            .filter(|m| match &m.to_user_id {
                None => true,
                Some(to) => to == user_id || m.summary.from_user_id == user_id,
            })
            .take(limit)
            .cloned()
            .collect();
        drop(history);
        visible.reverse();
        visible
    }
}
