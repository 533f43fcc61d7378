//! Property tests for the append, replay, partitioning and retention paths.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use innkeeper_core::aggregate::SchemaRegistry;
use innkeeper_core::event::{Actor, AggregateKey, NewEvent};
use innkeeper_event_store::config::AuditStoreConfig;
use innkeeper_event_store::snapshot::SnapshotPolicy;
use innkeeper_event_store::{AuditStore, InMemoryAuditStorage};
use innkeeper_reservation::domain::events::{
    GuestCheckedIn, ReservationCancelled, ReservationConfirmed,
};
use innkeeper_reservation::{Reservation, ReservationEvent};
use innkeeper_test_support::{FixedClock, ManualClock, utc};
use proptest::prelude::*;

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn store_at(
    now: DateTime<Utc>,
    policy: SnapshotPolicy,
) -> AuditStore<InMemoryAuditStorage> {
    AuditStore::with_clock(
        Arc::new(InMemoryAuditStorage::new()),
        SchemaRegistry::new().with::<Reservation>(),
        AuditStoreConfig {
            snapshot_policy: policy,
            ..AuditStoreConfig::default()
        },
        Arc::new(FixedClock(now)),
    )
}

/// Reservation payloads whose fold does not depend on a prior `created`.
fn payload() -> impl Strategy<Value = ReservationEvent> {
    prop_oneof![
        "[A-Z]{3}-[0-9]{4}".prop_map(|code| ReservationEvent::Confirmed(ReservationConfirmed {
            confirmation_code: Some(code),
        })),
        "[1-9][0-9]{2}".prop_map(|room_number| {
            ReservationEvent::CheckedIn(GuestCheckedIn { room_number })
        }),
        Just(ReservationEvent::CheckedOut),
        "[a-z ]{1,20}".prop_map(|reason| ReservationEvent::Cancelled(ReservationCancelled {
            reason,
        })),
    ]
}

fn event(reservation: &str, payload: ReservationEvent, occurred_at: DateTime<Utc>) -> NewEvent {
    payload.into_new_event(reservation, occurred_at, Actor::system("property-test"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_reconstruct_replays_every_appended_event(
        history in prop::collection::vec((0..4usize, payload()), 1..40),
    ) {
        let rt = runtime();
        let now = utc(2026, 10, 14, 9, 0);
        let store = store_at(now, SnapshotPolicy::Never);

        let expected = rt.block_on(async {
            let mut counts: HashMap<String, u64> = HashMap::new();
            for (n, (reservation, payload)) in history.into_iter().enumerate() {
                let id = format!("R{reservation}");
                let minutes = i64::try_from(n).unwrap();
                let recorded = store
                    .append(event(&id, payload, now - Duration::hours(1) + Duration::minutes(minutes)))
                    .await
                    .unwrap();
                let count = counts.entry(id).or_default();
                *count += 1;
                assert_eq!(recorded.sequence, *count);
            }
            counts
        });

        for (id, count) in expected {
            let reconstruction = rt
                .block_on(store.reconstruct(&AggregateKey::new("reservation", &id)))
                .unwrap();
            prop_assert_eq!(reconstruction.through_sequence, count);
            prop_assert_eq!(u64::try_from(reconstruction.events_replayed).unwrap(), count);
        }
    }

    #[test]
    fn prop_snapshot_never_changes_reconstructed_state(
        history in prop::collection::vec(payload(), 1..30),
        every in 1..10u64,
    ) {
        let rt = runtime();
        let now = utc(2026, 10, 14, 9, 0);
        let with_snapshots = store_at(now, SnapshotPolicy::EveryEvents(every));
        let without = store_at(now, SnapshotPolicy::Never);
        let key = AggregateKey::new("reservation", "R1");

        let (resumed, full) = rt.block_on(async {
            for (n, payload) in (0..).zip(history) {
                let e = event("R1", payload, now - Duration::minutes(60 - n));
                with_snapshots.append(e.clone()).await.unwrap();
                without.append(e).await.unwrap();
                with_snapshots.flush_snapshots().await;
            }
            (
                with_snapshots.reconstruct(&key).await.unwrap(),
                without.reconstruct(&key).await.unwrap(),
            )
        });

        prop_assert_eq!(&resumed.state, &full.state);
        prop_assert_eq!(resumed.through_sequence, full.through_sequence);
        prop_assert!(resumed.events_replayed < usize::try_from(every).unwrap());
    }

    #[test]
    fn prop_event_lands_in_exactly_the_partition_covering_it(
        offset_minutes in 0..(3 * 31 * 24 * 60i64),
    ) {
        let rt = runtime();
        let recorded_at = utc(2026, 9, 1, 0, 0) + Duration::minutes(offset_minutes);
        let clock = Arc::new(ManualClock::new(recorded_at));
        let store = AuditStore::with_clock(
            Arc::new(InMemoryAuditStorage::new()),
            SchemaRegistry::new().with::<Reservation>(),
            AuditStoreConfig::default(),
            clock,
        );

        let recorded = rt
            .block_on(store.append(event("R1", ReservationEvent::CheckedOut, recorded_at)))
            .unwrap();
        let partitions = rt.block_on(store.partitions()).unwrap();

        let covering: Vec<_> = partitions
            .iter()
            .filter(|p| p.range.contains(recorded.recorded_at))
            .collect();
        prop_assert_eq!(covering.len(), 1);
        let stored = store.storage().partition_events(&covering[0].name);
        prop_assert_eq!(stored, vec![recorded]);
    }

    #[test]
    fn prop_sweep_only_touches_expired_sensitive_payloads(
        deadlines in prop::collection::vec((prop::option::of(0..120i64), any::<bool>()), 1..25),
        sweep_day in 0..150i64,
    ) {
        let rt = runtime();
        let recorded_at = utc(2026, 9, 15, 12, 0);
        let store = store_at(recorded_at, SnapshotPolicy::Never);
        let now = utc(2026, 10, 1, 0, 0) + Duration::days(sweep_day);

        let appended = rt.block_on(async {
            let mut appended = Vec::new();
            for (n, (deadline, sensitive)) in deadlines.into_iter().enumerate() {
                let mut e = event(&format!("R{n}"), ReservationEvent::CheckedOut, recorded_at);
                e.event_data = serde_json::json!({ "note": n });
                e.is_sensitive = sensitive;
                e.retention_until = deadline.map(|days| recorded_at + Duration::days(days));
                appended.push(store.append(e).await.unwrap());
            }
            store.sweep(now).await.unwrap();
            appended
        });

        let stored = store.storage().partition_events("audit_events_p202609");
        prop_assert_eq!(stored.len(), appended.len());
        for (before, after) in appended.iter().zip(&stored) {
            prop_assert_eq!(before.event_id, after.event_id);
            if before.is_redactable(now) {
                prop_assert!(after.event_data.is_null());
                prop_assert_eq!(after.redacted_at, Some(now));
            } else {
                prop_assert_eq!(before, after);
            }
        }
    }
}

