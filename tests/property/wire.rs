//! Property tests for the push-channel wire format and snapshot invariants.
//!
//! 1. Random bytes never cause a panic in `decode` (returns `Err` gracefully).
//! 2. A snapshot built from arbitrary records holds one record per member,
//!    and that record is the newest one supplied.
//! 3. `UserLocations` frames survive encode → decode.

use brigade_proto::codec;
use brigade_proto::presence::{PresenceRecord, PresenceSnapshot, PresenceStatus};
use brigade_proto::push::{ClientEvent, ServerEvent};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

/// Strategy for a record drawn from a small pool of members so that
/// duplicates are common.
fn arb_record() -> impl Strategy<Value = PresenceRecord> {
    (
        prop::sample::select(vec!["ranac", "igi", "medo", "kata", "luka"]),
        -90.0f64..=90.0,
        -180.0f64..=180.0,
        prop::bool::ANY,
        0i64..1_000_000,
    )
        .prop_map(|(user, lat, lng, active, secs)| PresenceRecord {
            user_id: user.to_string(),
            latitude: lat,
            longitude: lng,
            status: if active {
                PresenceStatus::Active
            } else {
                PresenceStatus::Inactive
            },
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        })
}

proptest! {
    #[test]
    fn random_bytes_never_panic(bytes in prop::collection::vec(any::<u8>(), 0..512)) {
        let _ = codec::decode::<ServerEvent>(&bytes);
        let _ = codec::decode::<ClientEvent>(&bytes);
    }

    #[test]
    fn snapshot_holds_newest_record_per_member(
        records in prop::collection::vec(arb_record(), 0..40)
    ) {
        let snapshot = PresenceSnapshot::new(records.clone());

        let mut members: Vec<&str> = records.iter().map(|r| r.user_id.as_str()).collect();
        members.sort_unstable();
        members.dedup();
        prop_assert_eq!(snapshot.len(), members.len());

        for member in members {
            let newest = records
                .iter()
                .filter(|r| r.user_id == member)
                .map(|r| r.timestamp)
                .max()
                .unwrap();
            prop_assert_eq!(snapshot.get(member).unwrap().timestamp, newest);
        }
    }

    #[test]
    fn user_locations_frame_round_trips(records in prop::collection::vec(arb_record(), 0..20)) {
        let event = ServerEvent::UserLocations(PresenceSnapshot::new(records));
        let bytes = codec::encode(&event).unwrap();
        let decoded: ServerEvent = codec::decode(&bytes).unwrap();
        prop_assert_eq!(decoded, event);
    }
}
