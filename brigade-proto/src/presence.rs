//! Presence records and snapshots for the live member map.
//!
//! A [`PresenceSnapshot`] is a complete state transfer: receivers replace
//! whatever they held before with it, never merge. Within a snapshot there
//! is at most one [`PresenceRecord`] per `user_id`.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::location::Coordinate;

/// Recency status of a reporting member, decided by the server.
///
/// Clients treat it as opaque and only display it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    /// Reported recently (and inside the geofence, when one is configured).
    Active,
    /// Stale, or outside the geofence.
    Inactive,
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Inactive => write!(f, "inactive"),
        }
    }
}

/// The last known position of one member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    /// Opaque identifier of the reporting member.
    pub user_id: String,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
    /// Server-assigned recency status.
    pub status: PresenceStatus,
    /// Instant the position was recorded.
    pub timestamp: DateTime<Utc>,
}

impl PresenceRecord {
    /// Creates an `active` record for `user_id` at `coordinate`.
    pub fn new(
        user_id: impl Into<String>,
        coordinate: Coordinate,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            latitude: coordinate.latitude,
            longitude: coordinate.longitude,
            status: PresenceStatus::Active,
            timestamp,
        }
    }

    /// The recorded position.
    #[must_use]
    pub const fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }

    /// Returns `true` if this record should replace `other`.
    ///
    /// Last-write-wins by timestamp; ties go to the newcomer.
    #[must_use]
    pub fn supersedes(&self, other: &Self) -> bool {
        self.user_id == other.user_id && self.timestamp >= other.timestamp
    }
}

/// One complete version of "who is online and where".
///
/// Constructed through [`PresenceSnapshot::new`] (or deserialization, which
/// goes through the same path) so the one-record-per-member invariant always
/// holds. Records are kept sorted by `user_id`, which makes equality
/// independent of the order the server listed them in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<PresenceRecord>", into = "Vec<PresenceRecord>")]
pub struct PresenceSnapshot {
    records: Vec<PresenceRecord>,
}

impl PresenceSnapshot {
    /// Builds a snapshot, keeping only the newest record for each member.
    #[must_use]
    pub fn new(records: impl IntoIterator<Item = PresenceRecord>) -> Self {
        let mut latest: HashMap<String, PresenceRecord> = HashMap::new();
        for record in records {
            match latest.get(&record.user_id) {
                Some(current) if !record.supersedes(current) => {}
                _ => {
                    latest.insert(record.user_id.clone(), record);
                }
            }
        }
        let mut records: Vec<PresenceRecord> = latest.into_values().collect();
        records.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        Self { records }
    }

    /// An empty snapshot.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            records: Vec::new(),
        }
    }

    /// All records, sorted by `user_id`.
    #[must_use]
    pub fn records(&self) -> &[PresenceRecord] {
        &self.records
    }

    /// Looks up the record for `user_id`.
    #[must_use]
    pub fn get(&self, user_id: &str) -> Option<&PresenceRecord> {
        self.records
            .binary_search_by(|r| r.user_id.as_str().cmp(user_id))
            .ok()
            .map(|i| &self.records[i])
    }

    /// Number of members in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if nobody is reporting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Number of records with [`PresenceStatus::Active`].
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.records
            .iter()
            .filter(|r| r.status == PresenceStatus::Active)
            .count()
    }

    /// Iterates over the records.
    pub fn iter(&self) -> std::slice::Iter<'_, PresenceRecord> {
        self.records.iter()
    }
}

impl From<Vec<PresenceRecord>> for PresenceSnapshot {
    fn from(records: Vec<PresenceRecord>) -> Self {
        Self::new(records)
    }
}

impl From<PresenceSnapshot> for Vec<PresenceRecord> {
    fn from(snapshot: PresenceSnapshot) -> Self {
        snapshot.records
    }
}

impl<'a> IntoIterator for &'a PresenceSnapshot {
    type Item = &'a PresenceRecord;
    type IntoIter = std::slice::Iter<'a, PresenceRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
