// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::needless_continue,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for push-channel reconnection.
//!
//! Validates that the `TransportSelector` supervisor:
//! - detects a severed WebSocket and enters `reconnecting`
//! - reconnects once the server is reachable again and resumes delivery
//! - gives up after the attempt budget and settles in `disconnected`
//! - stops retrying when disconnected during a reconnect
//!
//! ## Disconnect simulation
//!
//! Aborting the server's `JoinHandle` does not close existing WebSocket
//! connections (they run on independently spawned tasks). Instead a **TCP
//! proxy** sits between the client and the real server. Killing the proxy
//! aborts every proxied connection task, which drops both TCP streams and
//! makes the client's WebSocket layer see the disconnect.

use std::sync::Arc;
use std::time::{Duration, Instant};

use brigade::api::{BackendApi, HttpBackend};
use brigade::location::UnavailableSource;
use brigade::session::{Session, SessionConfig};
use brigade::transport::selector::{ReconnectPolicy, TransportSelector};
use brigade::transport::ws::WsConnector;
use brigade::transport::{ConnectionState, PushEvent};
use brigade_proto::location::Coordinate;
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use url::Url;

// =============================================================================
// TCP Proxy helper
// =============================================================================

/// A TCP proxy forwarding a client-facing port to the real server.
/// Calling `kill()` aborts all tracked connection tasks.
struct TcpProxy {
    /// Address clients should connect to (127.0.0.1:<proxy_port>).
    client_addr: String,
    /// The acceptor task handle.
    accept_handle: tokio::task::JoinHandle<()>,
    /// All per-connection task handles. Aborting these kills the TCP streams.
    conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl TcpProxy {
    /// Create a new TCP proxy from `proxy_port` to `backend_addr`.
    async fn new(proxy_port: u16, backend_addr: &str) -> Self {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{proxy_port}"))
            .await
            .unwrap_or_else(|e| panic!("proxy: failed to bind to port {proxy_port}: {e}"));
        let client_addr = format!("127.0.0.1:{}", listener.local_addr().unwrap().port());
        let backend = backend_addr.to_string();
        let conn_handles: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>> =
            Arc::new(Mutex::new(Vec::new()));
        let tracked = Arc::clone(&conn_handles);

        let accept_handle = tokio::spawn(async move {
            while let Ok((mut client_stream, _)) = listener.accept().await {
                let backend = backend.clone();
                let conn_handle = tokio::spawn(async move {
                    let Ok(mut backend_stream) = tokio::net::TcpStream::connect(&backend).await
                    else {
                        return;
                    };
                    // No sub-tasks, so aborting this task drops both streams.
                    let _ = tokio::io::copy_bidirectional(&mut client_stream, &mut backend_stream)
                        .await;
                });
                tracked.lock().push(conn_handle);
            }
        });

        Self {
            client_addr,
            accept_handle,
            conn_handles,
        }
    }

    /// Kill the proxy, severing all connections immediately.
    fn kill(self) {
        self.accept_handle.abort();
        for h in self.conn_handles.lock().iter() {
            h.abort();
        }
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Find a free port by binding to 0 and recording the port.
async fn find_free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("failed to bind to port 0");
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    // Brief pause to let the OS release the port.
    tokio::time::sleep(Duration::from_millis(50)).await;
    port
}

/// Start the server on port 0, return (bound_addr_string, handle).
async fn start_brigade_server() -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) = brigade_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start brigade server");
    (addr.to_string(), handle)
}

/// Fast reconnect settings for testing.
const fn fast_policy(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        delay: Duration::from_millis(200),
    }
}

fn selector_for(user: &str, policy: ReconnectPolicy) -> TransportSelector<WsConnector> {
    let connector = WsConnector::new(Duration::from_secs(2), Duration::from_secs(2));
    TransportSelector::new(connector, user, policy)
}

fn http_for(server_addr: &str, user: &str) -> HttpBackend {
    let base = Url::parse(&format!("http://{server_addr}")).unwrap();
    HttpBackend::new(&base, user, Duration::from_secs(5)).unwrap()
}

/// Wait until the connection state satisfies `pred`.
async fn wait_for_state(
    rx: &mut watch::Receiver<ConnectionState>,
    timeout: Duration,
    expected: ConnectionState,
) {
    let result = tokio::time::timeout(timeout, rx.wait_for(|s| *s == expected)).await;
    assert!(
        matches!(result, Ok(Ok(_))),
        "timeout waiting for state {expected}"
    );
}

/// Wait for a `PushEvent` matching `pred`, skipping others.
async fn wait_for_event<F>(
    rx: &mut broadcast::Receiver<PushEvent>,
    timeout: Duration,
    description: &str,
    pred: F,
) -> PushEvent
where
    F: Fn(&PushEvent) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        let remaining = deadline - tokio::time::Instant::now();
        match tokio::time::timeout(remaining, rx.recv()).await {
            Ok(Ok(evt)) if pred(&evt) => return evt,
            Ok(Ok(_)) | Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
            Ok(Err(broadcast::error::RecvError::Closed)) => {
                panic!("event channel closed while waiting for {description}")
            }
            Err(_) => break,
        }
    }
    panic!("timeout waiting for {description}");
}

// =============================================================================
// Test 1: Reconnect after the path to the server is restored
// =============================================================================

#[tokio::test]
async fn reconnects_after_proxy_restart() {
    let (server_addr, _server) = start_brigade_server().await;
    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &server_addr).await;

    let selector = selector_for("igi", fast_policy(20));
    let mut state = selector.watch_state();
    let mut events = selector.subscribe();
    selector.connect(format!("ws://{}/ws", proxy.client_addr));
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Connected).await;

    proxy.kill();
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Reconnecting).await;

    let _proxy2 = TcpProxy::new(proxy_port, &server_addr).await;
    wait_for_state(&mut state, Duration::from_secs(15), ConnectionState::Connected).await;

    // Delivery resumes on the new channel.
    http_for(&server_addr, "medo")
        .report_location(Coordinate::new(46.2508, 16.3755))
        .await
        .unwrap();
    wait_for_event(&mut events, Duration::from_secs(5), "medo presence", |evt| {
        matches!(evt, PushEvent::PresenceUpdate(s) if s.get("medo").is_some())
    })
    .await;

    selector.disconnect().await;
    assert_eq!(selector.state(), ConnectionState::Disconnected);
}

// =============================================================================
// Test 2: Bounded retry
// =============================================================================

#[tokio::test]
async fn gives_up_after_attempt_budget() {
    let (server_addr, _server) = start_brigade_server().await;
    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &server_addr).await;

    let selector = selector_for("igi", fast_policy(3));
    let mut state = selector.watch_state();
    selector.connect(format!("ws://{}/ws", proxy.client_addr));
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Connected).await;

    let lost_at = Instant::now();
    proxy.kill();
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Reconnecting).await;
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Disconnected).await;

    // Three retries, 200 ms apart.
    assert!(
        lost_at.elapsed() >= Duration::from_millis(600),
        "gave up too early: {:?}",
        lost_at.elapsed()
    );

    // Stays down: no hidden retries after exhaustion.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(selector.state(), ConnectionState::Disconnected);
    assert!(!selector.is_running());

    // A manual connect starts over.
    let proxy2 = TcpProxy::new(proxy_port, &server_addr).await;
    selector.connect(format!("ws://{}/ws", proxy2.client_addr));
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Connected).await;
    selector.disconnect().await;
}

// =============================================================================
// Test 3: Disconnect during reconnection
// =============================================================================

#[tokio::test]
async fn disconnect_during_reconnect_stops_supervisor() {
    let (server_addr, _server) = start_brigade_server().await;
    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &server_addr).await;

    let selector = selector_for("igi", fast_policy(50));
    let mut state = selector.watch_state();
    selector.connect(format!("ws://{}/ws", proxy.client_addr));
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Connected).await;

    proxy.kill();
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Reconnecting).await;

    tokio::time::timeout(Duration::from_secs(5), selector.disconnect())
        .await
        .expect("disconnect should not hang");
    assert_eq!(selector.state(), ConnectionState::Disconnected);
    assert!(!selector.is_running());
}

// =============================================================================
// Test 4: A session's store is repaired after reconnecting
// =============================================================================

/// Presence that changed while the channel was down arrives with the
/// snapshot sent after the new handshake.
#[tokio::test]
async fn session_store_catches_up_after_reconnect() {
    let (server_addr, _server) = start_brigade_server().await;
    let proxy_port = find_free_port().await;
    let proxy = TcpProxy::new(proxy_port, &server_addr).await;

    let base = Url::parse(&format!("http://{server_addr}")).unwrap();
    let mut config = SessionConfig::new("igi", base, format!("ws://{}/ws", proxy.client_addr));
    config.reconnect = fast_policy(20);
    // Keep the poller out of the way so only the push feed repairs the store.
    config.presence_poll = Duration::from_secs(600);
    let mut session = Session::start(
        &config,
        config.ws_connector(),
        Arc::new(http_for(&server_addr, "igi")),
        Arc::new(UnavailableSource),
    );
    let mut state = session.selector().watch_state();
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Connected).await;

    proxy.kill();
    wait_for_state(&mut state, Duration::from_secs(10), ConnectionState::Reconnecting).await;

    http_for(&server_addr, "kata")
        .report_location(Coordinate::new(46.31, 16.34))
        .await
        .unwrap();

    let _proxy2 = TcpProxy::new(proxy_port, &server_addr).await;
    wait_for_state(&mut state, Duration::from_secs(15), ConnectionState::Connected).await;

    let mut view = session.presence();
    let caught_up = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if view.get().get("kata").is_some() {
                return;
            }
            if view.changed().await.is_none() {
                return;
            }
        }
    })
    .await;
    assert!(caught_up.is_ok(), "kata never reached the store");
    assert!(session.store().get().get("kata").is_some());

    session.shutdown().await;
}
