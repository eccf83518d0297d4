//! Shared server state, router assembly, and startup.
//!
//! Both ingest paths (HTTP `POST /api/locations/update` and the push
//! channel's `location_update`) go through [`ServerState::ingest_location`],
//! which stores the report and fans the full snapshot out to every push
//! subscriber.

use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use brigade_proto::chat::MessageSummary;
use brigade_proto::codec::DEFAULT_MAX_FRAME_SIZE;
use brigade_proto::location::Coordinate;
use brigade_proto::presence::{PresenceRecord, PresenceSnapshot};
use brigade_proto::push::ServerEvent;
use chrono::Utc;
use tokio::time::MissedTickBehavior;

use crate::chat::ChatStore;
use crate::config::ServerConfig;
use crate::hub::Hub;
use crate::registry::PresenceRegistry;
use crate::{api, push};

/// Default interval between expiry sweeps.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Everything the handlers share.
pub struct ServerState {
    /// Live push-channel sessions.
    pub hub: Hub,
    /// Latest position per member.
    pub presence: PresenceRegistry,
    /// Chat history and unread counters.
    pub chat: ChatStore,
    max_frame_size: usize,
    sweep_interval: Duration,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates state with default limits and presence policy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            hub: Hub::new(),
            presence: PresenceRegistry::new(),
            chat: ChatStore::new(),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }

    /// Creates state from a resolved [`ServerConfig`].
    #[must_use]
    pub fn with_config(config: &ServerConfig) -> Self {
        Self {
            hub: Hub::new(),
            presence: PresenceRegistry::with_policy(config.presence_policy()),
            chat: ChatStore::with_max_history(config.max_history),
            max_frame_size: config.max_frame_size,
            sweep_interval: config.sweep_interval(),
        }
    }

    /// Overrides the expiry sweep interval.
    #[must_use]
    pub const fn sweep_every(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Largest accepted push-channel frame in bytes.
    #[must_use]
    pub const fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    /// Stores a report for `user_id` and broadcasts the new snapshot.
    ///
    /// Returns the caller's stored record and the snapshot that was sent.
    pub async fn ingest_location(
        &self,
        user_id: &str,
        coordinate: Coordinate,
    ) -> (PresenceRecord, PresenceSnapshot) {
        let now = Utc::now();
        let record = self.presence.ingest(user_id, coordinate, now).await;
        tracing::debug!(
            user_id = %user_id,
            position = %coordinate,
            status = %record.status,
            "location ingested"
        );
        let snapshot = self.broadcast_presence().await;
        (record, snapshot)
    }

    /// Sends the current snapshot to every push subscriber.
    pub async fn broadcast_presence(&self) -> PresenceSnapshot {
        let snapshot = self.presence.snapshot(Utc::now()).await;
        self.hub
            .broadcast(&ServerEvent::UserLocations(snapshot.clone()), None)
            .await;
        snapshot
    }

    /// Drops `user_id`'s position and broadcasts the new snapshot.
    pub async fn forget_location(&self, user_id: &str) {
        if self.presence.remove(user_id).await {
            tracing::info!(user_id = %user_id, "location removed after disconnect");
            self.broadcast_presence().await;
        }
    }

    /// Stores a chat message and notifies the audience.
    ///
    /// A private message goes to the recipient's sessions as `new_message`;
    /// a brigade message goes to everyone except the sender as
    /// `new_chat_message`.
    pub async fn post_message(
        &self,
        from_user_id: &str,
        to_user_id: Option<&str>,
        text: &str,
    ) -> MessageSummary {
        let summary = self
            .chat
            .post(from_user_id, to_user_id, text, Utc::now())
            .await;
        match to_user_id {
            Some(to) => {
                let delivered = self
                    .hub
                    .send_to_user(to, &ServerEvent::NewMessage(summary.clone()))
                    .await;
                tracing::debug!(
                    from = %from_user_id,
                    to = %to,
                    delivered,
                    "private message stored"
                );
            }
            None => {
                self.hub
                    .broadcast(
                        &ServerEvent::NewChatMessage(summary.clone()),
                        Some(from_user_id),
                    )
                    .await;
            }
        }
        summary
    }
}

/// Builds the full router: REST endpoints under `/api` and the push channel
/// at `/ws`.
pub fn router(state: Arc<ServerState>) -> axum::Router {
    api::routes()
        .route("/ws", axum::routing::get(push::ws_handler))
        .with_state(state)
}

/// Starts the server on the given address and returns the bound address
/// and a join handle.
///
/// This is the primary entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts the server with a pre-configured [`ServerState`].
///
/// The returned task runs the HTTP server and the expiry sweeper; aborting
/// it stops both.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        tokio::select! {
            result = axum::serve(listener, app).into_future() => {
                if let Err(e) = result {
                    tracing::error!(error = %e, "server error");
                }
            }
            () = run_sweeper(state) => {}
        }
    });

    Ok((bound_addr, handle))
}

/// Periodically drops expired reports, broadcasting when anything changed.
async fn run_sweeper(state: Arc<ServerState>) {
    let mut ticker = tokio::time::interval(state.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let removed = state.presence.prune(Utc::now()).await;
        if removed > 0 {
            tracing::info!(removed, "expired location reports swept");
            state.broadcast_presence().await;
        }
    }
}

/// Starts the server in-process for testing.
///
/// Binds to `127.0.0.1:0` (OS-assigned port) and returns the bound address
/// and a [`tokio::task::JoinHandle`] for cleanup.
#[cfg(test)]
pub async fn start_test_server() -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server("127.0.0.1:0")
        .await
        .expect("failed to start test server")
}
