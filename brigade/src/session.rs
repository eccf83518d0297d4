//! One signed-in member's sync session.
//!
//! A [`Session`] builds every component explicitly and wires them together:
//!
//! ```text
//!                  ┌──────────────────┐ presence_update ┌───────────────┐
//!   /ws ─────────► │ TransportSelector│ ──────────────► │ PresenceStore │
//!                  └──────────────────┘                 └───────────────┘
//!                          │ direct_notification                ▲
//!                          ▼                                    │
//!              NotificationCounter::nudge             PresencePoller
//!                          │                                    │
//!                          ▼                                    │
//!              GET /api/chat/unread-count      GET /api/locations/active
//!
//!   LocationSource ──► LocationReporter ──► POST /api/locations/update
//! ```
//!
//! Everything it starts is released by [`Session::shutdown`], or aborted on
//! drop.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::api::BackendApi;
use crate::location::LocationSource;
use crate::notify::NotificationCounter;
use crate::poller::{PollMode, PresencePoller};
use crate::presence::{PresenceStore, PresenceView, SnapshotSource};
use crate::reporter::{LocationReporter, ReporterConfig};
use crate::transport::selector::{ReconnectPolicy, TransportSelector};
use crate::transport::ws::WsConnector;
use crate::transport::{ConnectionState, Connector, PushEvent};

/// Shortest cadence any periodic component runs at. Shorter (or zero)
/// intervals are raised to this.
pub const MIN_CADENCE: Duration = Duration::from_millis(100);

/// Everything a session needs, fully resolved.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Member identity sent in the push handshake.
    pub user_id: String,
    /// Bearer token for the REST API.
    pub token: String,
    /// HTTP base URL.
    pub server_url: Url,
    /// Push endpoint.
    pub ws_url: String,
    /// Timeout for opening the push channel.
    pub connect_timeout: Duration,
    /// Timeout for the push handshake.
    pub handshake_timeout: Duration,
    /// Timeout for each HTTP request.
    pub request_timeout: Duration,
    /// Push event buffer capacity.
    pub event_buffer: usize,
    /// Push reconnect policy.
    pub reconnect: ReconnectPolicy,
    /// Presence poll cadence.
    pub presence_poll: Duration,
    /// Presence poll mode.
    pub poll_mode: PollMode,
    /// Unread-count poll cadence.
    pub unread_poll: Duration,
    /// Location reporter settings.
    pub reporter: ReporterConfig,
}

impl SessionConfig {
    /// Defaults for `user_id` against the server at `server_url`.
    #[must_use]
    pub fn new(user_id: impl Into<String>, server_url: Url, ws_url: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            token: user_id.clone(),
            user_id,
            server_url,
            ws_url: ws_url.into(),
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(5),
            request_timeout: Duration::from_secs(10),
            event_buffer: 256,
            reconnect: ReconnectPolicy::default(),
            presence_poll: Duration::from_secs(3),
            poll_mode: PollMode::Always,
            unread_poll: Duration::from_secs(10),
            reporter: ReporterConfig::default(),
        }
    }

    /// The production push connector for these settings.
    #[must_use]
    pub const fn ws_connector(&self) -> WsConnector {
        WsConnector::new(self.connect_timeout, self.handshake_timeout)
    }
}

/// A running session.
pub struct Session<C: Connector, B, L> {
    user_id: String,
    selector: Arc<TransportSelector<C>>,
    store: Arc<PresenceStore>,
    counter: Arc<NotificationCounter<B>>,
    poller: PresencePoller<B>,
    reporter: LocationReporter<B, L>,
    router: Option<JoinHandle<()>>,
}

impl<C: Connector, B: BackendApi, L: LocationSource> Session<C, B, L> {
    /// Builds all components, connects the push channel, and starts the
    /// poller, the counter and the reporter.
    pub fn start(config: &SessionConfig, connector: C, backend: Arc<B>, source: Arc<L>) -> Self {
        let selector = Arc::new(TransportSelector::with_buffer(
            connector,
            config.user_id.clone(),
            config.reconnect,
            config.event_buffer,
        ));
        let store = Arc::new(PresenceStore::new());
        let counter = Arc::new(NotificationCounter::new(
            Arc::clone(&backend),
            config.unread_poll,
        ));
        let poller = PresencePoller::new(
            Arc::clone(&backend),
            Arc::clone(&store),
            config.presence_poll,
            config.poll_mode,
            selector.watch_state(),
        );
        let reporter = LocationReporter::new(backend, source, config.reporter);

        // Subscribe before connecting so the first snapshot is not missed.
        let events = selector.subscribe();
        let router = tokio::spawn(route_events(
            events,
            Arc::clone(&store),
            Arc::clone(&counter),
        ));

        selector.connect(config.ws_url.clone());
        poller.start();
        counter.start();
        reporter.enable();

        tracing::info!(user_id = %config.user_id, endpoint = %config.ws_url, "session started");
        Self {
            user_id: config.user_id.clone(),
            selector,
            store,
            counter,
            poller,
            reporter,
            router: Some(router),
        }
    }

    /// The member this session belongs to.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Read-only presence for renderers.
    #[must_use]
    pub fn presence(&self) -> PresenceView {
        self.store.view()
    }

    /// The presence store itself.
    #[must_use]
    pub const fn store(&self) -> &Arc<PresenceStore> {
        &self.store
    }

    /// The push channel supervisor.
    #[must_use]
    pub const fn selector(&self) -> &Arc<TransportSelector<C>> {
        &self.selector
    }

    /// The unread counter.
    #[must_use]
    pub const fn counter(&self) -> &Arc<NotificationCounter<B>> {
        &self.counter
    }

    /// The location reporter.
    #[must_use]
    pub const fn reporter(&self) -> &LocationReporter<B, L> {
        &self.reporter
    }

    /// Current push channel state.
    #[must_use]
    pub fn connection_state(&self) -> ConnectionState {
        self.selector.state()
    }

    /// Unread count changes.
    #[must_use]
    pub fn unread(&self) -> watch::Receiver<u32> {
        self.counter.subscribe()
    }

    /// Stop every component and close the push channel.
    ///
    /// Returns once all tasks have ended. Safe to call twice.
    pub async fn shutdown(&mut self) {
        self.reporter.disable().await;
        self.poller.stop().await;
        self.counter.stop().await;
        self.selector.disconnect().await;
        if let Some(router) = self.router.take() {
            router.abort();
            let _ = router.await;
        }
        tracing::info!(user_id = %self.user_id, "session shut down");
    }
}

impl<C: Connector, B, L> Drop for Session<C, B, L> {
    fn drop(&mut self) {
        if let Some(router) = self.router.take() {
            router.abort();
        }
    }
}

/// Applies push events to the store and the counter.
async fn route_events<B: BackendApi>(
    mut events: broadcast::Receiver<PushEvent>,
    store: Arc<PresenceStore>,
    counter: Arc<NotificationCounter<B>>,
) {
    loop {
        match events.recv().await {
            Ok(PushEvent::PresenceUpdate(snapshot)) => {
                store.replace_snapshot(snapshot, SnapshotSource::Push);
            }
            Ok(PushEvent::DirectNotification(summary)) => {
                tracing::info!(
                    from = %summary.from_user_id,
                    preview = %summary.preview,
                    "new private message"
                );
                counter.nudge();
            }
            Ok(PushEvent::ChatMessage(summary)) => {
                tracing::info!(
                    from = %summary.from_user_id,
                    preview = %summary.preview,
                    "brigade chat"
                );
            }
            Ok(PushEvent::PingReceived {
                from_user_id,
                message,
            }) => {
                tracing::info!(from = %from_user_id, message = %message, "ping received");
            }
            Ok(PushEvent::Connected { user_id }) => {
                tracing::info!(user_id = %user_id, "push channel confirmed");
            }
            Ok(PushEvent::StateChanged(state)) => {
                tracing::info!(state = %state, "push channel state");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // Snapshots are complete, so the next one repairs the store.
                tracing::warn!(skipped, "push event consumer lagged");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
