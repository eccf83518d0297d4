//! HTTP side of the Brigade server API.
//!
//! [`BackendApi`] is the seam the poller, reporter and notification counter
//! talk through. [`HttpBackend`] is the reqwest implementation;
//! [`ScriptedBackend`] is an in-memory stand-in for tests.

use std::future::Future;
use std::time::Duration;

use brigade_proto::api::{ErrorBody, LocationUpdateResponse};
use brigade_proto::chat::{ChatEntry, MessageSummary, SendMessageRequest, UnreadCount};
use brigade_proto::location::Coordinate;
use brigade_proto::presence::PresenceSnapshot;
use parking_lot::Mutex;
use url::Url;

/// Errors returned by [`BackendApi`] calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport, timeout, or body decoding failure.
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("server returned {status}: {detail}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// `detail` from the error body, or the reason phrase.
        detail: String,
    },
}

/// The REST calls the client depends on.
pub trait BackendApi: Send + Sync + 'static {
    /// `GET /api/locations/active`.
    fn active_locations(&self) -> impl Future<Output = Result<PresenceSnapshot, ApiError>> + Send;

    /// `POST /api/locations/update` for the authenticated member.
    fn report_location(
        &self,
        coordinate: Coordinate,
    ) -> impl Future<Output = Result<LocationUpdateResponse, ApiError>> + Send;

    /// `GET /api/chat/unread-count`.
    fn unread_count(&self) -> impl Future<Output = Result<UnreadCount, ApiError>> + Send;
}

/// [`BackendApi`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl HttpBackend {
    /// Creates a client for the server at `base` authenticating with `token`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(base: &Url, token: impl Into<String>, timeout: Duration) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base: base.as_str().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/{path}", self.base)
    }

    /// `POST /api/chat/messages`. `None` posts to the brigade chat.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn send_message(
        &self,
        to_user_id: Option<&str>,
        text: &str,
    ) -> Result<MessageSummary, ApiError> {
        let request = self
            .http
            .post(self.url("chat/messages"))
            .bearer_auth(&self.token)
            .json(&SendMessageRequest {
                to_user_id: to_user_id.map(str::to_string),
                text: text.to_string(),
            });
        read_json(request.send().await?).await
    }

    /// `GET /api/chat/messages?limit=N`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn recent_messages(&self, limit: usize) -> Result<Vec<ChatEntry>, ApiError> {
        let request = self
            .http
            .get(self.url("chat/messages"))
            .query(&[("limit", limit)])
            .bearer_auth(&self.token);
        read_json(request.send().await?).await
    }

    /// `POST /api/chat/read`: resets the caller's unread count.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError`] on transport failure or a non-success status.
    pub async fn mark_read(&self) -> Result<UnreadCount, ApiError> {
        let request = self
            .http
            .post(self.url("chat/read"))
            .bearer_auth(&self.token);
        read_json(request.send().await?).await
    }
}

impl BackendApi for HttpBackend {
    async fn active_locations(&self) -> Result<PresenceSnapshot, ApiError> {
        let response = self.http.get(self.url("locations/active")).send().await?;
        read_json(response).await
    }

    async fn report_location(
        &self,
        coordinate: Coordinate,
    ) -> Result<LocationUpdateResponse, ApiError> {
        let response = self
            .http
            .post(self.url("locations/update"))
            .bearer_auth(&self.token)
            .json(&coordinate)
            .send()
            .await?;
        read_json(response).await
    }

    async fn unread_count(&self) -> Result<UnreadCount, ApiError> {
        let response = self
            .http
            .get(self.url("chat/unread-count"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        read_json(response).await
    }
}

/// Decodes a success body, or turns the error body into [`ApiError::Status`].
async fn read_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, ApiError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let detail = match response.json::<ErrorBody>().await {
        Ok(body) => body.detail,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    };
    Err(ApiError::Status {
        status: status.as_u16(),
        detail,
    })
}

/// In-memory [`BackendApi`] for testing.
///
/// Serves a configurable snapshot and unread count, records every reported
/// coordinate, and can be switched into a failing mode.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    inner: Mutex<Scripted>,
}

#[derive(Debug, Default)]
struct Scripted {
    snapshot: PresenceSnapshot,
    unread: u32,
    failing: bool,
    report_delay: Duration,
    reports: Vec<Coordinate>,
    presence_polls: usize,
    unread_polls: usize,
}

impl ScriptedBackend {
    /// An empty, healthy backend.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot served by `active_locations`.
    pub fn set_snapshot(&self, snapshot: PresenceSnapshot) {
        self.inner.lock().snapshot = snapshot;
    }

    /// Value served by `unread_count`.
    pub fn set_unread(&self, unread: u32) {
        self.inner.lock().unread = unread;
    }

    /// Make every call fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.inner.lock().failing = failing;
    }

    /// Make every `report_location` call take `delay` before answering.
    pub fn set_report_delay(&self, delay: Duration) {
        self.inner.lock().report_delay = delay;
    }

    /// Every coordinate passed to `report_location`, including failed calls.
    #[must_use]
    pub fn reports(&self) -> Vec<Coordinate> {
        self.inner.lock().reports.clone()
    }

    /// Number of `active_locations` calls so far.
    #[must_use]
    pub fn presence_polls(&self) -> usize {
        self.inner.lock().presence_polls
    }

    /// Number of `unread_count` calls so far.
    #[must_use]
    pub fn unread_polls(&self) -> usize {
        self.inner.lock().unread_polls
    }
}

/// The error a failing [`ScriptedBackend`] answers with: a 503 like a server
/// behind a proxy that lost its upstream.
fn scripted_outage() -> ApiError {
    ApiError::Status {
        status: 503,
        detail: "service unavailable".to_string(),
    }
}

impl BackendApi for ScriptedBackend {
    async fn active_locations(&self) -> Result<PresenceSnapshot, ApiError> {
        let mut inner = self.inner.lock();
        inner.presence_polls += 1;
        if inner.failing {
            return Err(scripted_outage());
        }
        Ok(inner.snapshot.clone())
    }

    async fn report_location(
        &self,
        coordinate: Coordinate,
    ) -> Result<LocationUpdateResponse, ApiError> {
        let (failing, delay) = {
            let mut inner = self.inner.lock();
            inner.reports.push(coordinate);
            (inner.failing, inner.report_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if failing {
            return Err(scripted_outage());
        }
        let record = brigade_proto::presence::PresenceRecord::new(
            "scripted",
            coordinate,
            chrono::Utc::now(),
        );
        Ok(LocationUpdateResponse {
            active_count: 1,
            record,
        })
    }

    async fn unread_count(&self) -> Result<UnreadCount, ApiError> {
        let mut inner = self.inner.lock();
        inner.unread_polls += 1;
        if inner.failing {
            return Err(scripted_outage());
        }
        Ok(UnreadCount {
            unread_private: inner.unread,
        })
    }
}
