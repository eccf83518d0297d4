//! In-memory registry of the latest reported position per member.
//!
//! The registry holds one entry per `user_id` (last write wins by report
//! time) and derives each member's [`PresenceStatus`] when a snapshot is
//! taken: fresh reports are `active`, reports older than the active window
//! are `inactive`, and reports older than the TTL are dropped.

use std::collections::HashMap;

use brigade_proto::location::Coordinate;
use brigade_proto::presence::{PresenceRecord, PresenceSnapshot, PresenceStatus};
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::RwLock;

/// Default window in which a report counts as `active` (60 s).
const DEFAULT_ACTIVE_WINDOW: TimeDelta = TimeDelta::seconds(60);

/// Default age after which a report is dropped entirely (5 min).
const DEFAULT_TTL: TimeDelta = TimeDelta::seconds(300);

/// Circular area around the operations base.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geofence {
    /// Centre of the fence.
    pub center: Coordinate,
    /// Radius in kilometres.
    pub radius_km: f64,
}

impl Geofence {
    /// Returns `true` if `point` lies inside the fence (boundary included).
    #[must_use]
    pub fn contains(&self, point: &Coordinate) -> bool {
        self.center.distance_km(point) <= self.radius_km
    }
}

/// Rules that turn a stored report into a [`PresenceRecord`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresencePolicy {
    /// Reports younger than this are `active`.
    pub active_window: TimeDelta,
    /// Reports older than this are removed.
    pub ttl: TimeDelta,
    /// Optional geofence; reports outside it are `inactive`.
    pub geofence: Option<Geofence>,
}

impl Default for PresencePolicy {
    fn default() -> Self {
        Self {
            active_window: DEFAULT_ACTIVE_WINDOW,
            ttl: DEFAULT_TTL,
            geofence: None,
        }
    }
}

impl PresencePolicy {
    /// Status of a report of `coordinate` taken at `reported_at`, seen at `now`.
    #[must_use]
    pub fn status(
        &self,
        coordinate: &Coordinate,
        reported_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> PresenceStatus {
        let fresh = now - reported_at <= self.active_window;
        let inside = self.geofence.is_none_or(|fence| fence.contains(coordinate));
        if fresh && inside {
            PresenceStatus::Active
        } else {
            PresenceStatus::Inactive
        }
    }

    /// Returns `true` if a report taken at `reported_at` has aged out at `now`.
    #[must_use]
    pub fn is_expired(&self, reported_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        now - reported_at > self.ttl
    }
}

#[derive(Debug, Clone, Copy)]
struct StoredReport {
    coordinate: Coordinate,
    reported_at: DateTime<Utc>,
}

/// Latest position per member, shared by the HTTP and push ingest paths.
pub struct PresenceRegistry {
    reports: RwLock<HashMap<String, StoredReport>>,
    policy: PresencePolicy,
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceRegistry {
    /// Creates an empty registry with the default policy.
    #[must_use]
    pub fn new() -> Self {
        Self::with_policy(PresencePolicy::default())
    }

    /// Creates an empty registry with a custom policy.
    #[must_use]
    pub fn with_policy(policy: PresencePolicy) -> Self {
        Self {
            reports: RwLock::new(HashMap::new()),
            policy,
        }
    }

    /// The policy this registry applies.
    #[must_use]
    pub const fn policy(&self) -> &PresencePolicy {
        &self.policy
    }

    /// Records a position report and returns the resulting record.
    ///
    /// A report older than the one already stored for the member is ignored
    /// and the stored record is returned instead.
    pub async fn ingest(
        &self,
        user_id: &str,
        coordinate: Coordinate,
        reported_at: DateTime<Utc>,
    ) -> PresenceRecord {
        let mut reports = self.reports.write().await;
        let stored = match reports.get(user_id) {
            Some(current) if current.reported_at > reported_at => {
                tracing::debug!(user_id = %user_id, "ignoring out-of-order location report");
                *current
            }
            _ => {
                let report = StoredReport {
                    coordinate,
                    reported_at,
                };
                reports.insert(user_id.to_string(), report);
                report
            }
        };
        drop(reports);
        self.to_record(user_id, &stored, reported_at)
    }

    /// Removes a member's report. Returns `true` if one existed.
    pub async fn remove(&self, user_id: &str) -> bool {
        self.reports.write().await.remove(user_id).is_some()
    }

    /// Builds the current snapshot as seen at `now`, skipping expired reports.
    pub async fn snapshot(&self, now: DateTime<Utc>) -> PresenceSnapshot {
        let reports = self.reports.read().await;
        PresenceSnapshot::new(
            reports
                .iter()
                .filter(|(_, r)| !self.policy.is_expired(r.reported_at, now))
                .map(|(user_id, r)| self.to_record(user_id, r, now)),
        )
    }

    /// Drops every report that has aged out at `now`, returning how many
    /// were removed.
    pub async fn prune(&self, now: DateTime<Utc>) -> usize {
        let mut reports = self.reports.write().await;
        let before = reports.len();
        reports.retain(|_, r| !self.policy.is_expired(r.reported_at, now));
        before - reports.len()
    }

    /// Number of stored reports, expired or not.
    pub async fn len(&self) -> usize {
        self.reports.read().await.len()
    }

    /// Returns `true` if no reports are stored.
    pub async fn is_empty(&self) -> bool {
        self.reports.read().await.is_empty()
    }

    fn to_record(
        &self,
        user_id: &str,
        report: &StoredReport,
        now: DateTime<Utc>,
    ) -> PresenceRecord {
        PresenceRecord {
            user_id: user_id.to_string(),
            latitude: report.coordinate.latitude,
            longitude: report.coordinate.longitude,
            status: self
                .policy
                .status(&report.coordinate, report.reported_at, now),
            timestamp: report.reported_at,
        }
    }
}
