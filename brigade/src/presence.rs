//! Client-side presence store.
//!
//! Holds the single current [`PresenceSnapshot`] for a session. Both feeds
//! (push `presence_update` and the HTTP poller) write through
//! [`PresenceStore::replace_snapshot`]; whichever write lands last wins.
//! Renderers read through a [`PresenceView`].

use std::sync::Arc;

use brigade_proto::presence::PresenceSnapshot;
use tokio::sync::watch;

/// Where a snapshot came from. Only used for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Push-channel `user_locations`.
    Push,
    /// `GET /api/locations/active`.
    Poll,
}

impl std::fmt::Display for SnapshotSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Push => write!(f, "push"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Authoritative client-side presence state.
#[derive(Debug)]
pub struct PresenceStore {
    current: watch::Sender<Arc<PresenceSnapshot>>,
}

impl Default for PresenceStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceStore {
    /// Creates a store holding an empty snapshot.
    #[must_use]
    pub fn new() -> Self {
        let (current, _) = watch::channel(Arc::new(PresenceSnapshot::empty()));
        Self { current }
    }

    /// Replaces the whole snapshot. Never merges.
    pub fn replace_snapshot(&self, snapshot: PresenceSnapshot, source: SnapshotSource) {
        tracing::debug!(
            source = %source,
            members = snapshot.len(),
            active = snapshot.active_count(),
            "presence snapshot replaced"
        );
        self.current.send_replace(Arc::new(snapshot));
    }

    /// The current snapshot (possibly empty).
    #[must_use]
    pub fn get(&self) -> Arc<PresenceSnapshot> {
        Arc::clone(&self.current.borrow())
    }

    /// Receiver notified on every replacement.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Arc<PresenceSnapshot>> {
        self.current.subscribe()
    }

    /// A read-only handle for renderers.
    #[must_use]
    pub fn view(&self) -> PresenceView {
        PresenceView {
            rx: self.current.subscribe(),
        }
    }
}

/// Read-only access to a [`PresenceStore`].
#[derive(Debug, Clone)]
pub struct PresenceView {
    rx: watch::Receiver<Arc<PresenceSnapshot>>,
}

impl PresenceView {
    /// The current snapshot.
    #[must_use]
    pub fn get(&self) -> Arc<PresenceSnapshot> {
        Arc::clone(&self.rx.borrow())
    }

    /// Waits for the next replacement and returns it.
    ///
    /// Returns `None` once the store has been dropped.
    pub async fn changed(&mut self) -> Option<Arc<PresenceSnapshot>> {
        self.rx.changed().await.ok()?;
        Some(Arc::clone(&self.rx.borrow_and_update()))
    }
}
