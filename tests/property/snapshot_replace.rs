//! Property tests for the client presence store.
//!
//! 1. After any sequence of replacements the store holds exactly the last
//!    snapshot applied, regardless of which feed supplied it.
//! 2. Nothing from an earlier snapshot survives a replacement unless the
//!    new snapshot itself contains it.
//! 3. A snapshot parsed from the REST body replaces the store the same way
//!    a pushed one does.

use brigade::presence::{PresenceStore, SnapshotSource};
use brigade_proto::location::Coordinate;
use brigade_proto::presence::{PresenceRecord, PresenceSnapshot};
use chrono::{TimeZone, Utc};
use proptest::prelude::*;

fn arb_snapshot() -> impl Strategy<Value = PresenceSnapshot> {
    prop::collection::vec(
        (
            prop::sample::select(vec!["ranac", "igi", "medo", "kata", "luka", "ana"]),
            -90.0f64..=90.0,
            -180.0f64..=180.0,
            0i64..100_000,
        ),
        0..8,
    )
    .prop_map(|entries| {
        PresenceSnapshot::new(entries.into_iter().map(|(user, lat, lng, secs)| {
            PresenceRecord::new(
                user,
                Coordinate::new(lat, lng),
                Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            )
        }))
    })
}

fn arb_source() -> impl Strategy<Value = SnapshotSource> {
    prop_oneof![Just(SnapshotSource::Push), Just(SnapshotSource::Poll)]
}

proptest! {
    #[test]
    fn store_holds_last_applied_snapshot(
        writes in prop::collection::vec((arb_snapshot(), arb_source()), 1..20)
    ) {
        let store = PresenceStore::new();
        for (snapshot, source) in &writes {
            store.replace_snapshot(snapshot.clone(), *source);
        }
        let (last, _) = writes.last().unwrap();
        prop_assert_eq!(&*store.get(), last);
    }

    #[test]
    fn replacement_never_merges(first in arb_snapshot(), second in arb_snapshot()) {
        let store = PresenceStore::new();
        store.replace_snapshot(first.clone(), SnapshotSource::Push);
        store.replace_snapshot(second.clone(), SnapshotSource::Poll);

        let current = store.get();
        for record in first.iter() {
            prop_assert_eq!(
                current.get(&record.user_id).is_some(),
                second.get(&record.user_id).is_some()
            );
        }
        prop_assert_eq!(current.len(), second.len());
    }

    #[test]
    fn polled_body_replaces_like_a_push(pushed in arb_snapshot(), polled in arb_snapshot()) {
        let body = serde_json::to_string(&polled).unwrap();
        let parsed: PresenceSnapshot = serde_json::from_str(&body).unwrap();

        let store = PresenceStore::new();
        store.replace_snapshot(pushed, SnapshotSource::Push);
        store.replace_snapshot(parsed, SnapshotSource::Poll);
        prop_assert_eq!(store.get().len(), polled.len());
        for record in polled.iter() {
            let stored = store.get();
            let got = stored.get(&record.user_id).unwrap();
            prop_assert_eq!(got.timestamp, record.timestamp);
        }
    }
}
