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

//! Integration tests for notifications: unread counts, chat fan-out and
//! pings.
//!
//! Validates that:
//! - a private message pushes `new_message` and the session's counter polls
//!   right away instead of waiting for its cadence
//! - reading messages resets the count on the next poll
//! - brigade chat messages reach every other member but not the sender, and
//!   leave unread counts alone
//! - `ping_user` is routed to the target's push channel

use std::sync::Arc;
use std::time::Duration;

use brigade::api::{BackendApi, HttpBackend};
use brigade::location::UnavailableSource;
use brigade::session::{Session, SessionConfig};
use brigade::transport::selector::{ReconnectPolicy, TransportSelector};
use brigade::transport::ws::WsConnector;
use brigade::transport::{ConnectionState, PushEvent};
use brigade_proto::push::ClientEvent;
use tokio::sync::broadcast;
use url::Url;

// =============================================================================
// Helpers
// =============================================================================

async fn start_brigade_server() -> (String, tokio::task::JoinHandle<()>) {
    let (addr, handle) = brigade_server::server::start_server("127.0.0.1:0")
        .await
        .expect("failed to start brigade server");
    (addr.to_string(), handle)
}

fn http_for(server_addr: &str, user: &str) -> HttpBackend {
    let base = Url::parse(&format!("http://{server_addr}")).unwrap();
    HttpBackend::new(&base, user, Duration::from_secs(5)).unwrap()
}

/// A connected selector for `user` with an event subscription.
async fn connected(
    server_addr: &str,
    user: &str,
) -> (TransportSelector<WsConnector>, broadcast::Receiver<PushEvent>) {
    let selector = TransportSelector::new(WsConnector::default(), user, ReconnectPolicy::default());
    let events = selector.subscribe();
    selector.connect(format!("ws://{server_addr}/ws"));
    let mut state = selector.watch_state();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("timeout waiting for connected")
    .unwrap();
    (selector, events)
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

/// Returns `true` if an event matching `pred` shows up within `window`.
async fn saw_event<F>(rx: &mut broadcast::Receiver<PushEvent>, window: Duration, pred: F) -> bool
where
    F: Fn(&PushEvent) -> bool,
{
    tokio::time::timeout(window, async {
        loop {
            match rx.recv().await {
                Ok(evt) if pred(&evt) => return,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => std::future::pending::<()>().await,
            }
        }
    })
    .await
    .is_ok()
}

// =============================================================================
// Test 1: Private message nudges the counter
// =============================================================================

#[tokio::test]
async fn private_message_updates_unread_before_next_tick() {
    let (server_addr, _server) = start_brigade_server().await;

    let base = Url::parse(&format!("http://{server_addr}")).unwrap();
    let mut config = SessionConfig::new("medo", base, format!("ws://{server_addr}/ws"));
    // A cadence far longer than the test: only the nudge can update in time.
    config.unread_poll = Duration::from_secs(600);
    let mut medo = Session::start(
        &config,
        config.ws_connector(),
        Arc::new(http_for(&server_addr, "medo")),
        Arc::new(UnavailableSource),
    );
    let mut state = medo.selector().watch_state();
    tokio::time::timeout(
        Duration::from_secs(10),
        state.wait_for(|s| *s == ConnectionState::Connected),
    )
    .await
    .expect("timeout waiting for connected")
    .unwrap();

    let mut unread = medo.unread();
    http_for(&server_addr, "igi")
        .send_message(Some("medo"), "Intervencija, javi se!")
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(5), unread.wait_for(|v| *v == 1))
        .await
        .expect("unread count should follow the push notification")
        .unwrap();

    // Reading resets the server-side count; the next poll is authoritative.
    http_for(&server_addr, "medo").mark_read().await.unwrap();
    assert_eq!(medo.counter().poll().await, Some(0));
    assert_eq!(medo.counter().get(), 0);

    medo.shutdown().await;
}

// =============================================================================
// Test 2: Direct notification payload
// =============================================================================

#[tokio::test]
async fn direct_notification_carries_summary() {
    let (server_addr, _server) = start_brigade_server().await;
    let (medo, mut events) = connected(&server_addr, "medo").await;

    let sent = http_for(&server_addr, "igi")
        .send_message(Some("medo"), "Sastanak u domu u 19h")
        .await
        .unwrap();

    let evt = wait_for_event(&mut events, Duration::from_secs(5), "direct notification", |evt| {
        matches!(evt, PushEvent::DirectNotification(_))
    })
    .await;
    match evt {
        PushEvent::DirectNotification(summary) => {
            assert_eq!(summary.message_id, sent.message_id);
            assert_eq!(summary.from_user_id, "igi");
            assert_eq!(summary.preview, "Sastanak u domu u 19h");
        }
        other => panic!("expected DirectNotification, got: {other:?}"),
    }

    let count = http_for(&server_addr, "medo").unread_count().await.unwrap();
    assert_eq!(count.unread_private, 1);
    medo.disconnect().await;
}

// =============================================================================
// Test 3: Brigade chat fan-out
// =============================================================================

#[tokio::test]
async fn chat_message_reaches_others_but_not_sender() {
    let (server_addr, _server) = start_brigade_server().await;
    let (igi, mut igi_events) = connected(&server_addr, "igi").await;
    let (kata, mut kata_events) = connected(&server_addr, "kata").await;

    http_for(&server_addr, "igi")
        .send_message(None, "Svi na vježbu!")
        .await
        .unwrap();

    let evt = wait_for_event(&mut kata_events, Duration::from_secs(5), "chat message", |evt| {
        matches!(evt, PushEvent::ChatMessage(_))
    })
    .await;
    assert!(matches!(evt, PushEvent::ChatMessage(s) if s.from_user_id == "igi"));

    assert!(
        !saw_event(&mut igi_events, Duration::from_millis(500), |evt| {
            matches!(evt, PushEvent::ChatMessage(_))
        })
        .await,
        "sender should not receive its own chat message"
    );

    let count = http_for(&server_addr, "kata").unread_count().await.unwrap();
    assert_eq!(count.unread_private, 0, "group chat is not a private message");

    let history = http_for(&server_addr, "kata").recent_messages(10).await.unwrap();
    assert_eq!(history.len(), 1);

    igi.disconnect().await;
    kata.disconnect().await;
}

// =============================================================================
// Test 4: Ping routing
// =============================================================================

#[tokio::test]
async fn ping_reaches_target_only() {
    let (server_addr, _server) = start_brigade_server().await;
    let (igi, _igi_events) = connected(&server_addr, "igi").await;
    let (luka, mut luka_events) = connected(&server_addr, "luka").await;
    let (ranac, mut ranac_events) = connected(&server_addr, "ranac").await;

    igi.send(ClientEvent::PingUser {
        target_user_id: "luka".to_string(),
    })
    .unwrap();

    let evt = wait_for_event(&mut luka_events, Duration::from_secs(5), "ping", |evt| {
        matches!(evt, PushEvent::PingReceived { .. })
    })
    .await;
    match evt {
        PushEvent::PingReceived {
            from_user_id,
            message,
        } => {
            assert_eq!(from_user_id, "igi");
            assert!(!message.is_empty());
        }
        other => panic!("expected PingReceived, got: {other:?}"),
    }

    assert!(
        !saw_event(&mut ranac_events, Duration::from_millis(500), |evt| {
            matches!(evt, PushEvent::PingReceived { .. })
        })
        .await
    );

    igi.disconnect().await;
    luka.disconnect().await;
    ranac.disconnect().await;
}
