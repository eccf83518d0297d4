//! Loopback push channel for testing.
//!
//! Uses in-process [`tokio::sync::mpsc`] channels in place of a network
//! connection. Created via [`loopback`], which returns a [`LoopbackConnector`]
//! for the client side and a [`LoopbackServer`] that hands each accepted
//! connection to the test as a [`LoopbackPeer`].
//!
//! The connector counts attempts and can be told to refuse connections,
//! which is how reconnect policy is exercised without sockets.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use brigade_proto::push::{ClientEvent, ServerEvent};
use tokio::sync::mpsc;

use super::{Connector, PushLink, TransportError};

/// Create a connected connector / server pair.
///
/// # Example
///
/// ```rust,no_run
/// use brigade::transport::loopback::loopback;
/// use brigade::transport::{Connector, PushLink};
/// use brigade_proto::push::ServerEvent;
/// use brigade_proto::presence::PresenceSnapshot;
///
/// # async fn example() {
/// let (connector, mut server) = loopback();
/// let mut link = connector.connect("loopback", "igi").await.unwrap();
/// let peer = server.accept().await.unwrap();
/// peer.push(ServerEvent::UserLocations(PresenceSnapshot::empty()));
/// let event = link.recv().await.unwrap();
/// # }
/// ```
#[must_use]
pub fn loopback() -> (LoopbackConnector, LoopbackServer) {
    let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
    let connector = LoopbackConnector {
        shared: Arc::new(Shared {
            attempts: AtomicUsize::new(0),
            fail_next: AtomicUsize::new(0),
            refusing: AtomicBool::new(false),
            accepted: accepted_tx,
        }),
    };
    let server = LoopbackServer {
        accepted: accepted_rx,
    };
    (connector, server)
}

struct Shared {
    attempts: AtomicUsize,
    fail_next: AtomicUsize,
    refusing: AtomicBool,
    accepted: mpsc::UnboundedSender<LoopbackPeer>,
}

/// Client side of the loopback. Cheap to clone; clones share counters.
#[derive(Clone)]
pub struct LoopbackConnector {
    shared: Arc<Shared>,
}

impl LoopbackConnector {
    /// Number of connection attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    /// Fail the next `n` attempts.
    pub fn fail_next(&self, n: usize) {
        self.shared.fail_next.store(n, Ordering::SeqCst);
    }

    /// Refuse (or stop refusing) every attempt.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    fn should_fail(&self) -> bool {
        if self.shared.refusing.load(Ordering::SeqCst) {
            return true;
        }
        self.shared
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Connector for LoopbackConnector {
    type Link = LoopbackLink;

    async fn connect(
        &self,
        _endpoint: &str,
        user_id: &str,
    ) -> Result<LoopbackLink, TransportError> {
        let attempt = self.shared.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if self.should_fail() {
            tracing::debug!(attempt, "loopback refusing connection");
            return Err(TransportError::Unreachable("loopback".to_string()));
        }

        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        let peer = LoopbackPeer {
            user_id: user_id.to_string(),
            to_client,
            from_client,
        };
        self.shared
            .accepted
            .send(peer)
            .map_err(|_| TransportError::Unreachable("loopback".to_string()))?;

        Ok(LoopbackLink { incoming, outgoing })
    }
}

/// Client end of one loopback connection.
pub struct LoopbackLink {
    incoming: mpsc::UnboundedReceiver<ServerEvent>,
    outgoing: mpsc::UnboundedSender<ClientEvent>,
}

impl PushLink for LoopbackLink {
    async fn send(&mut self, event: &ClientEvent) -> Result<(), TransportError> {
        self.outgoing
            .send(event.clone())
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&mut self) -> Result<ServerEvent, TransportError> {
        self.incoming
            .recv()
            .await
            .ok_or(TransportError::ConnectionClosed)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

/// Test-side acceptor of loopback connections.
pub struct LoopbackServer {
    accepted: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl LoopbackServer {
    /// Waits for the next connection.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.accepted.recv().await
    }

    /// Returns a connection if one is already waiting.
    pub fn try_accept(&mut self) -> Option<LoopbackPeer> {
        self.accepted.try_recv().ok()
    }
}

/// Server end of one loopback connection. Dropping it severs the link.
pub struct LoopbackPeer {
    user_id: String,
    to_client: mpsc::UnboundedSender<ServerEvent>,
    from_client: mpsc::UnboundedReceiver<ClientEvent>,
}

impl LoopbackPeer {
    /// The member that said hello.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Deliver an event to the client. Returns `false` if the client is gone.
    pub fn push(&self, event: ServerEvent) -> bool {
        self.to_client.send(event).is_ok()
    }

    /// Next event the client sent, or `None` once the client end is dropped.
    pub async fn next_event(&mut self) -> Option<ClientEvent> {
        self.from_client.recv().await
    }

    /// Returns `true` once the client has released its end of the link.
    #[must_use]
    pub fn is_client_gone(&self) -> bool {
        self.to_client.is_closed()
    }
}
