//! JSON bodies of the REST endpoints that are not covered by other modules.

use serde::{Deserialize, Serialize};

use crate::presence::PresenceRecord;

/// Response of `POST /api/locations/update`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationUpdateResponse {
    /// Number of members currently reporting with `active` status.
    pub active_count: usize,
    /// The record the server stored for the caller.
    pub record: PresenceRecord,
}

/// Error body returned by every endpoint on failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human-readable reason.
    pub detail: String,
}

/// Response of `GET /api/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceInfo {
    /// Service banner.
    pub message: String,
}
