// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for presence sync between members.
//!
//! A real server runs in-process on an OS-assigned port. Members report
//! through the REST API or through a full [`Session`], and others learn
//! about them over both feeds:
//! - the HTTP pull (`GET /api/locations/active`)
//! - the push channel (`user_locations` fan-out)

use std::sync::Arc;
use std::time::Duration;

use brigade::api::{BackendApi, HttpBackend};
use brigade::location::{StaticSource, UnavailableSource};
use brigade::poller::PollMode;
use brigade::presence::PresenceView;
use brigade::session::{Session, SessionConfig};
use brigade::transport::ConnectionState;
use brigade_proto::location::Coordinate;
use brigade_proto::presence::{PresenceSnapshot, PresenceStatus};
use url::Url;

const STATION: Coordinate = Coordinate::new(46.2508, 16.3755);
const RIVERBANK: Coordinate = Coordinate::new(46.3040, 16.3380);

// =============================================================================
// Helpers
// =============================================================================

/// Start the server on port 0, return (http base URL, handle).
async fn start_brigade_server() -> (Url, tokio::task::JoinHandle<()>) {
    let (addr, handle) = brigade_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start brigade server");
    (Url::parse(&format!("http://{addr}")).unwrap(), handle)
}

fn http_for(base: &Url, user: &str) -> HttpBackend {
    HttpBackend::new(base, user, Duration::from_secs(5)).unwrap()
}

fn session_config(base: &Url, user: &str) -> SessionConfig {
    let ws_url = format!("ws://{}:{}/ws", base.host_str().unwrap(), base.port().unwrap());
    SessionConfig::new(user, base.clone(), ws_url)
}

/// Wait until the view holds a snapshot matching `pred`.
async fn wait_for_snapshot<F>(
    view: &mut PresenceView,
    timeout: Duration,
    description: &str,
    pred: F,
) where
    F: Fn(&PresenceSnapshot) -> bool,
{
    let result = tokio::time::timeout(timeout, async {
        if pred(&view.get()) {
            return;
        }
        while let Some(snapshot) = view.changed().await {
            if pred(&snapshot) {
                return;
            }
        }
        panic!("presence store dropped while waiting for {description}");
    })
    .await;
    assert!(result.is_ok(), "timeout waiting for {description}");
}

// =============================================================================
// Test 1: HTTP report, HTTP poll
// =============================================================================

/// A reports the station coordinate; B polls three seconds later and sees
/// A's record with matching coordinates and `active` status.
#[tokio::test]
async fn reported_location_is_visible_to_later_poll() {
    let (base, _server) = start_brigade_server().await;
    let ranac = http_for(&base, "ranac");
    let igi = http_for(&base, "igi");

    let response = ranac.report_location(STATION).await.unwrap();
    assert!(response.active_count >= 1);

    tokio::time::sleep(Duration::from_secs(3)).await;

    let snapshot = igi.active_locations().await.unwrap();
    let record = snapshot.get("ranac").expect("ranac should be listed");
    assert_eq!(record.coordinate(), STATION);
    assert_eq!(record.status, PresenceStatus::Active);
}

// =============================================================================
// Test 2: Session to session over the push channel
// =============================================================================

/// Two full sessions: each one's reporter feeds the server, and the other
/// one's store picks the record up.
#[tokio::test]
async fn sessions_see_each_other() {
    let (base, _server) = start_brigade_server().await;

    let config_a = session_config(&base, "ranac");
    let mut a = Session::start(
        &config_a,
        config_a.ws_connector(),
        Arc::new(http_for(&base, "ranac")),
        Arc::new(StaticSource::new(STATION)),
    );
    let config_b = session_config(&base, "medo");
    let mut b = Session::start(
        &config_b,
        config_b.ws_connector(),
        Arc::new(http_for(&base, "medo")),
        Arc::new(StaticSource::new(RIVERBANK)),
    );

    let mut view_b = b.presence();
    wait_for_snapshot(&mut view_b, Duration::from_secs(10), "ranac in medo's store", |s| {
        s.get("ranac").is_some_and(|r| r.coordinate() == STATION)
    })
    .await;

    let mut view_a = a.presence();
    wait_for_snapshot(&mut view_a, Duration::from_secs(10), "medo in ranac's store", |s| {
        s.get("medo").is_some_and(|r| r.coordinate() == RIVERBANK)
    })
    .await;

    assert_eq!(a.connection_state(), ConnectionState::Connected);
    assert_eq!(b.connection_state(), ConnectionState::Connected);

    a.shutdown().await;
    b.shutdown().await;
}

/// A report made directly over HTTP is fanned out to connected sessions
/// without waiting for their next poll.
#[tokio::test]
async fn http_report_is_pushed_to_connected_sessions() {
    let (base, _server) = start_brigade_server().await;

    let mut config = session_config(&base, "kata");
    // Poll rarely so only the push feed can deliver in time.
    config.presence_poll = Duration::from_secs(60);
    let mut kata = Session::start(
        &config,
        config.ws_connector(),
        Arc::new(http_for(&base, "kata")),
        Arc::new(UnavailableSource),
    );
    let mut state = kata.selector().watch_state();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("timeout waiting for connected")
    .unwrap();

    http_for(&base, "luka").report_location(RIVERBANK).await.unwrap();

    let mut view = kata.presence();
    wait_for_snapshot(&mut view, Duration::from_secs(5), "pushed luka record", |s| {
        s.get("luka").is_some()
    })
    .await;

    kata.shutdown().await;
}

// =============================================================================
// Test 3: Polling as fallback
// =============================================================================

/// With the push endpoint unreachable the selector gives up, and a
/// fallback-mode poller keeps the store current on its own.
#[tokio::test]
async fn fallback_poller_covers_unreachable_push_channel() {
    let (base, _server) = start_brigade_server().await;

    let dead = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let mut config = session_config(&base, "igi");
    config.ws_url = format!("ws://{dead_addr}/ws");
    config.poll_mode = PollMode::Fallback;
    config.presence_poll = Duration::from_millis(500);
    config.reconnect.max_attempts = 1;
    config.reconnect.delay = Duration::from_millis(100);

    let mut igi = Session::start(
        &config,
        config.ws_connector(),
        Arc::new(http_for(&base, "igi")),
        Arc::new(UnavailableSource),
    );

    let mut state = igi.selector().watch_state();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Disconnected),
    )
    .await
    .expect("selector should give up")
    .unwrap();

    http_for(&base, "ranac").report_location(STATION).await.unwrap();

    let mut view = igi.presence();
    wait_for_snapshot(&mut view, Duration::from_secs(5), "polled ranac record", |s| {
        s.get("ranac").is_some()
    })
    .await;

    igi.shutdown().await;
}
