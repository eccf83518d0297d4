//! Push-channel supervisor.
//!
//! [`TransportSelector`] owns the single push channel of a session. It runs
//! one supervisor task that connects, pumps events in both directions, and
//! on failure retries with a fixed delay until the attempt budget is spent.
//! Exhaustion is only ever visible as [`ConnectionState::Disconnected`].
//!
//! ```text
//! connect() ─► Connecting ─ok─► Connected ─lost─► Reconnecting ─ok─► Connected
//!                  │                                  │
//!                  └─fail─► Reconnecting ─budget spent─► Disconnected
//! ```

use std::sync::Arc;
use std::time::Duration;

use brigade_proto::push::ClientEvent;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::{ConnectionState, Connector, PushEvent, PushLink, TransportError};

/// Default number of reconnect attempts after a failure.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default fixed delay between reconnect attempts.
const DEFAULT_DELAY: Duration = Duration::from_millis(1000);

/// Default capacity of the event and outbound channels.
const DEFAULT_EVENT_BUFFER: usize = 256;

/// How long `disconnect()` waits for a graceful close before aborting.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Bounded, fixed-delay retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after a failure before giving up.
    pub max_attempts: u32,
    /// Delay before each reconnect attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_DELAY,
        }
    }
}

/// Handles to a running supervisor task.
struct Supervisor {
    handle: JoinHandle<()>,
    outbound: mpsc::Sender<ClientEvent>,
    shutdown: oneshot::Sender<()>,
}

/// Supervises the push channel of one session.
///
/// Dropping the selector aborts its supervisor task, which drops the link.
pub struct TransportSelector<C: Connector> {
    connector: Arc<C>,
    user_id: String,
    policy: ReconnectPolicy,
    buffer: usize,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<PushEvent>,
    supervisor: Mutex<Option<Supervisor>>,
}

impl<C: Connector> TransportSelector<C> {
    /// Creates an idle selector for `user_id`.
    ///
    /// Nothing happens until [`connect`](Self::connect) is called.
    pub fn new(connector: C, user_id: impl Into<String>, policy: ReconnectPolicy) -> Self {
        Self::with_buffer(connector, user_id, policy, DEFAULT_EVENT_BUFFER)
    }

    /// Like [`new`](Self::new) with an explicit channel capacity.
    pub fn with_buffer(
        connector: C,
        user_id: impl Into<String>,
        policy: ReconnectPolicy,
        buffer: usize,
    ) -> Self {
        let buffer = buffer.max(1);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(buffer);
        Self {
            connector: Arc::new(connector),
            user_id: user_id.into(),
            policy,
            buffer,
            state,
            events,
            supervisor: Mutex::new(None),
        }
    }

    /// Current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Subscribe to push events. Each subscriber sees every event sent after
    /// it subscribed.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.events.subscribe()
    }

    /// The retry policy in effect.
    #[must_use]
    pub const fn policy(&self) -> ReconnectPolicy {
        self.policy
    }

    /// Returns `true` while a supervisor task is alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.supervisor
            .lock()
            .as_ref()
            .is_some_and(|s| !s.handle.is_finished())
    }

    /// Begin connecting to `endpoint`.
    ///
    /// A no-op while a supervisor is already running. After the budget has
    /// been exhausted this starts over with a fresh budget.
    pub fn connect(&self, endpoint: impl Into<String>) {
        let mut slot = self.supervisor.lock();
        if slot.as_ref().is_some_and(|s| !s.handle.is_finished()) {
            tracing::debug!(user_id = %self.user_id, "connect ignored, supervisor already running");
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(self.buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        set_state(&self.state, &self.events, ConnectionState::Connecting);

        let task = SupervisorTask {
            connector: Arc::clone(&self.connector),
            endpoint: endpoint.into(),
            user_id: self.user_id.clone(),
            policy: self.policy,
            state: self.state.clone(),
            events: self.events.clone(),
            outbound: outbound_rx,
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(task.run());

        *slot = Some(Supervisor {
            handle,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
        });
    }

    /// Close the channel and stop retrying.
    ///
    /// Waits briefly for a graceful close, then aborts the task. Either way
    /// the link is released and the state ends `Disconnected`.
    pub async fn disconnect(&self) {
        let Some(supervisor) = self.supervisor.lock().take() else {
            return;
        };
        let _ = supervisor.shutdown.send(());
        let mut handle = supervisor.handle;
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle)
            .await
            .is_err()
        {
            tracing::warn!(user_id = %self.user_id, "supervisor did not stop in time, aborting");
            handle.abort();
            let _ = handle.await;
        }
        set_state(&self.state, &self.events, ConnectionState::Disconnected);
    }

    /// Queue an event for the server. Fire-and-forget.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] (and drops the event) when the
    /// channel is not `Connected` or the outbound queue is full.
    pub fn send(&self, event: ClientEvent) -> Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            tracing::debug!(user_id = %self.user_id, "push channel not connected, dropping event");
            return Err(TransportError::NotConnected);
        }
        let slot = self.supervisor.lock();
        let Some(supervisor) = slot.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        supervisor.outbound.try_send(event).map_err(|e| {
            tracing::debug!(user_id = %self.user_id, err = %e, "outbound queue rejected event");
            TransportError::NotConnected
        })
    }
}

impl<C: Connector> Drop for TransportSelector<C> {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get_mut().take() {
            supervisor.handle.abort();
        }
    }
}

fn set_state(
    state: &watch::Sender<ConnectionState>,
    events: &broadcast::Sender<PushEvent>,
    next: ConnectionState,
) {
    let previous = state.send_replace(next);
    if previous != next {
        tracing::info!(from = %previous, to = %next, "push connection state changed");
        let _ = events.send(PushEvent::StateChanged(next));
    }
}

/// Why the pump stopped.
enum PumpEnd {
    Shutdown,
    Lost(TransportError),
}

struct SupervisorTask<C: Connector> {
    connector: Arc<C>,
    endpoint: String,
    user_id: String,
    policy: ReconnectPolicy,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<PushEvent>,
    outbound: mpsc::Receiver<ClientEvent>,
    shutdown: oneshot::Receiver<()>,
}

impl<C: Connector> SupervisorTask<C> {
    async fn run(mut self) {
        let mut retries: u32 = 0;
        loop {
            let attempt = tokio::select! {
                result = self.connector.connect(&self.endpoint, &self.user_id) => result,
                _ = &mut self.shutdown => break,
            };

            match attempt {
                Ok(mut link) => {
                    retries = 0;
                    set_state(&self.state, &self.events, ConnectionState::Connected);
                    let _ = self.events.send(PushEvent::Connected {
                        user_id: self.user_id.clone(),
                    });
                    match self.pump(&mut link).await {
                        PumpEnd::Shutdown => {
                            link.close().await;
                            break;
                        }
                        PumpEnd::Lost(e) => {
                            tracing::warn!(user_id = %self.user_id, err = %e, "push channel lost");
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %self.user_id,
                        attempt = retries,
                        err = %e,
                        "push connect attempt failed"
                    );
                }
            }

            if retries >= self.policy.max_attempts {
                tracing::warn!(
                    user_id = %self.user_id,
                    attempts = retries,
                    "reconnect budget exhausted"
                );
                break;
            }
            retries += 1;
            set_state(&self.state, &self.events, ConnectionState::Reconnecting);

            tokio::select! {
                () = tokio::time::sleep(self.policy.delay) => {}
                _ = &mut self.shutdown => break,
            }
            // Events queued while offline are stale by now.
            while self.outbound.try_recv().is_ok() {}
        }
        set_state(&self.state, &self.events, ConnectionState::Disconnected);
    }

    async fn pump(&mut self, link: &mut C::Link) -> PumpEnd {
        loop {
            tokio::select! {
                _ = &mut self.shutdown => return PumpEnd::Shutdown,
                incoming = link.recv() => match incoming {
                    Ok(event) => {
                        if let Some(push) = PushEvent::from_server(event) {
                            let _ = self.events.send(push);
                        }
                    }
                    Err(e) => return PumpEnd::Lost(e),
                },
                Some(event) = self.outbound.recv() => {
                    if let Err(e) = link.send(&event).await {
                        return PumpEnd::Lost(e);
                    }
                }
            }
        }
    }
}
