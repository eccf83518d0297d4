//! REST endpoints under `/api`.
//!
//! Authenticated endpoints take an [`AuthUser`] extractor. The bearer token
//! is the member id; nothing else about authentication is modelled here.

use std::sync::Arc;

use axum::extract::{FromRequestParts, Query, State};
use axum::http::StatusCode;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use brigade_proto::api::{ErrorBody, LocationUpdateResponse, ServiceInfo};
use brigade_proto::chat::{ChatEntry, MessageSummary, SendMessageRequest, UnreadCount};
use brigade_proto::location::Coordinate;
use brigade_proto::presence::PresenceSnapshot;
use chrono::Utc;
use serde::Deserialize;

use crate::server::ServerState;

/// Banner returned by `GET /api/`.
pub const SERVICE_BANNER: &str = "Brigade presence API";

/// Messages returned by `GET /api/chat/messages` when no limit is given.
const DEFAULT_HISTORY_LIMIT: usize = 50;

/// Errors surfaced by REST handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No usable `Authorization: Bearer` header.
    #[error("not authenticated")]
    Unauthorized,

    /// Latitude or longitude out of range.
    #[error("invalid coordinate {0}")]
    InvalidCoordinate(Coordinate),

    /// Chat message without text.
    #[error("message text must not be empty")]
    EmptyMessage,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::InvalidCoordinate(_) | Self::EmptyMessage => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// The member a request was made on behalf of.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser(pub String);

impl<S: Send + Sync> FromRequestParts<S> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(ApiError::Unauthorized)?;
        Ok(Self(token.to_string()))
    }
}

/// Query string of `GET /api/chat/messages`.
#[derive(Debug, Default, Deserialize)]
struct HistoryQuery {
    limit: Option<usize>,
}

/// REST routes, still waiting for their state.
pub fn routes() -> Router<Arc<ServerState>> {
    Router::new()
        .route("/api/", get(service_info))
        .route("/api/locations/active", get(active_locations))
        .route("/api/locations/update", post(update_location))
        .route("/api/chat/unread-count", get(unread_count))
        .route("/api/chat/messages", get(list_messages).post(send_message))
        .route("/api/chat/read", post(mark_read))
}

async fn service_info() -> Json<ServiceInfo> {
    Json(ServiceInfo {
        message: SERVICE_BANNER.to_string(),
    })
}

async fn active_locations(State(state): State<Arc<ServerState>>) -> Json<PresenceSnapshot> {
    Json(state.presence.snapshot(Utc::now()).await)
}

async fn update_location(
    State(state): State<Arc<ServerState>>,
    AuthUser(user_id): AuthUser,
    Json(coordinate): Json<Coordinate>,
) -> Result<Json<LocationUpdateResponse>, ApiError> {
    if !coordinate.is_valid() {
        tracing::warn!(user_id = %user_id, position = %coordinate, "rejecting invalid coordinate");
        return Err(ApiError::InvalidCoordinate(coordinate));
    }
    let (record, snapshot) = state.ingest_location(&user_id, coordinate).await;
    Ok(Json(LocationUpdateResponse {
        active_count: snapshot.active_count(),
        record,
    }))
}

async fn unread_count(
    State(state): State<Arc<ServerState>>,
    AuthUser(user_id): AuthUser,
) -> Json<UnreadCount> {
    Json(UnreadCount {
        unread_private: state.chat.unread(&user_id).await,
    })
}

async fn send_message(
    State(state): State<Arc<ServerState>>,
    AuthUser(user_id): AuthUser,
    Json(request): Json<SendMessageRequest>,
) -> Result<Json<MessageSummary>, ApiError> {
    if request.text.trim().is_empty() {
        return Err(ApiError::EmptyMessage);
    }
    let summary = state
        .post_message(&user_id, request.to_user_id.as_deref(), &request.text)
        .await;
    Ok(Json(summary))
}

async fn list_messages(
    State(state): State<Arc<ServerState>>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<ChatEntry>> {
    let limit = query.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let entries = state
        .chat
        .recent_for(&user_id, limit)
        .await
        .into_iter()
        .map(ChatEntry::from)
        .collect();
    Json(entries)
}

async fn mark_read(
    State(state): State<Arc<ServerState>>,
    AuthUser(user_id): AuthUser,
) -> Json<UnreadCount> {
    let cleared = state.chat.mark_read(&user_id).await;
    tracing::debug!(user_id = %user_id, cleared, "unread counter reset");
    Json(UnreadCount::default())
}
