//! HTTP presence poller.
//!
//! Pulls `GET /api/locations/active` on a fixed cadence and writes the
//! result into the [`PresenceStore`]. In [`PollMode::Fallback`] ticks are
//! skipped while the push channel is connected.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::BackendApi;
use crate::presence::{PresenceStore, SnapshotSource};
use crate::session::MIN_CADENCE;
use crate::transport::ConnectionState;

/// When the poller runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum PollMode {
    /// Poll on every tick, alongside the push channel.
    Always,
    /// Poll only while the push channel is not connected.
    Fallback,
}

/// Periodically replaces the presence snapshot from the REST API.
pub struct PresencePoller<B> {
    backend: Arc<B>,
    store: Arc<PresenceStore>,
    interval: Duration,
    mode: PollMode,
    connection: watch::Receiver<ConnectionState>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<B: BackendApi> PresencePoller<B> {
    /// Creates a stopped poller.
    ///
    /// `connection` is consulted only in [`PollMode::Fallback`]. `interval`
    /// is raised to [`MIN_CADENCE`] if shorter.
    pub fn new(
        backend: Arc<B>,
        store: Arc<PresenceStore>,
        interval: Duration,
        mode: PollMode,
        connection: watch::Receiver<ConnectionState>,
    ) -> Self {
        Self {
            backend,
            store,
            interval: interval.max(MIN_CADENCE),
            mode,
            connection,
            task: Mutex::new(None),
        }
    }

    /// Start polling. The first poll happens immediately. No-op if running.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let backend = Arc::clone(&self.backend);
        let store = Arc::clone(&self.store);
        let connection = self.connection.clone();
        let (interval, mode) = (self.interval, self.mode);

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if mode == PollMode::Fallback
                    && *connection.borrow() == ConnectionState::Connected
                {
                    tracing::trace!("push channel connected, skipping presence poll");
                    continue;
                }
                poll_once(backend.as_ref(), &store).await;
            }
        }));
        tracing::debug!(interval = ?self.interval, mode = ?self.mode, "presence poller started");
    }

    /// Stop polling and wait for the task to end. No-op if stopped.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        task.abort();
        let _ = task.await;
        tracing::debug!("presence poller stopped");
    }

    /// Returns `true` while the poll loop runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Poll once now, outside the cadence.
    ///
    /// Returns `true` if the store was replaced.
    pub async fn poll_now(&self) -> bool {
        poll_once(self.backend.as_ref(), &self.store).await
    }
}

impl<B> Drop for PresencePoller<B> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}

/// One poll. A failure leaves the store untouched.
async fn poll_once<B: BackendApi>(backend: &B, store: &PresenceStore) -> bool {
    match backend.active_locations().await {
        Ok(snapshot) => {
            store.replace_snapshot(snapshot, SnapshotSource::Poll);
            true
        }
        Err(e) => {
            tracing::warn!(err = %e, "presence poll failed");
            false
        }
    }
}
