//! Unread private-message counter.
//!
//! Polls `GET /api/chat/unread-count` on its own cadence. A push
//! notification calls [`NotificationCounter::nudge`], which triggers an
//! immediate poll without waiting for the next tick. The latest successful
//! poll is authoritative; a failed poll keeps the previous value.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::api::BackendApi;
use crate::session::MIN_CADENCE;

struct Inner<B> {
    backend: Arc<B>,
    value: watch::Sender<u32>,
    nudge: Notify,
}

impl<B: BackendApi> Inner<B> {
    async fn poll(&self) -> Option<u32> {
        match self.backend.unread_count().await {
            Ok(count) => {
                let previous = self.value.send_replace(count.unread_private);
                if previous != count.unread_private {
                    tracing::debug!(
                        previous,
                        unread = count.unread_private,
                        "unread count changed"
                    );
                }
                Some(count.unread_private)
            }
            Err(e) => {
                tracing::warn!(err = %e, "unread count poll failed");
                None
            }
        }
    }
}

/// Tracks the unread private-message count for one session.
pub struct NotificationCounter<B> {
    inner: Arc<Inner<B>>,
    interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<B: BackendApi> NotificationCounter<B> {
    /// Creates a stopped counter with value zero.
    pub fn new(backend: Arc<B>, interval: Duration) -> Self {
        let (value, _) = watch::channel(0);
        Self {
            inner: Arc::new(Inner {
                backend,
                value,
                nudge: Notify::new(),
            }),
            interval: interval.max(MIN_CADENCE),
            task: Mutex::new(None),
        }
    }

    /// Start the poll loop. The first poll happens immediately.
    pub fn start(&self) {
        let mut task = self.task.lock();
        if task.is_some() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let interval = self.interval;
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    () = inner.nudge.notified() => {
                        tracing::debug!("unread count nudged");
                    }
                }
                inner.poll().await;
            }
        }));
    }

    /// Stop the poll loop and wait for it to end.
    pub async fn stop(&self) {
        let Some(task) = self.task.lock().take() else {
            return;
        };
        task.abort();
        let _ = task.await;
    }

    /// Returns `true` while the poll loop runs.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Request an out-of-cadence poll from the running loop.
    ///
    /// Nudges that arrive while a poll is in flight coalesce into one.
    pub fn nudge(&self) {
        self.inner.nudge.notify_one();
    }

    /// Poll now and replace the stored value.
    ///
    /// Returns the new value, or `None` if the poll failed.
    pub async fn poll(&self) -> Option<u32> {
        self.inner.poll().await
    }

    /// The latest known count.
    #[must_use]
    pub fn get(&self) -> u32 {
        *self.inner.value.borrow()
    }

    /// Receiver notified whenever a poll stores a value.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u32> {
        self.inner.value.subscribe()
    }
}

impl<B> Drop for NotificationCounter<B> {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
