//! Retention & Compliance Enforcer.
//!
//! Runs beside the write and read paths. Only partitions lying entirely
//! before `now` are considered: a retired partition with nothing left under
//! retention is dropped whole, otherwise expired sensitive payloads are
//! redacted in place. Both actions are idempotent, so an interrupted sweep is
//! finished by the next one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use innkeeper_core::error::StorageError;
use innkeeper_core::partition::PartitionState;
use innkeeper_core::storage::{EventLog, PartitionCatalog};
use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::partition::PartitionManager;

/// Events redacted per storage call.
const REDACT_BATCH: usize = 500;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Partitions whose retention state was examined.
    pub partitions_scanned: usize,
    /// Partitions dropped with all their events.
    pub partitions_dropped: Vec<String>,
    /// Payloads replaced by `null` during this sweep.
    pub events_redacted: u64,
}

/// Purges and redacts events past their retention deadline.
pub struct RetentionEnforcer<S> {
    storage: Arc<S>,
    partitions: Arc<PartitionManager<S>>,
}

impl<S: EventLog + PartitionCatalog> RetentionEnforcer<S> {
    /// Creates an enforcer over `storage`.
    #[must_use]
    pub fn new(storage: Arc<S>, partitions: Arc<PartitionManager<S>>) -> Self {
        Self {
            storage,
            partitions,
        }
    }

    /// Applies retention as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on the first failed storage call; work already
    /// done stays done.
    #[instrument(skip(self))]
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StorageError> {
        let mut report = SweepReport::default();
        for partition in self.partitions.list().await? {
            if !partition.is_past(now) {
                continue;
            }
            let scan = self.storage.retention_scan(&partition.name, now).await?;
            report.partitions_scanned += 1;
            debug!(
                partition = %partition.name,
                total = scan.total,
                live = scan.live,
                redactable = scan.redactable.len(),
                "partition scanned"
            );

            if partition.state == PartitionState::ReadOnly && scan.live == 0 {
                if self.storage.drop_partition(&partition.name).await? {
                    info!(partition = %partition.name, events = scan.total, "partition purged");
                    report.partitions_dropped.push(partition.name.clone());
                }
                self.partitions.forget(&partition.name);
                continue;
            }

            for batch in scan.redactable.chunks(REDACT_BATCH) {
                let redacted = self
                    .storage
                    .redact_events(&partition.name, batch, now)
                    .await?;
                report.events_redacted += redacted;
            }
            if !scan.redactable.is_empty() {
                info!(
                    partition = %partition.name,
                    redacted = scan.redactable.len(),
                    "expired sensitive payloads redacted"
                );
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryAuditStorage;
    use crate::partition::PartitionInterval;
    use chrono::Duration;
    use innkeeper_core::event::{AggregateKey, EventId, RecordedEvent};
    use innkeeper_test_support::{FixedClock, event_at, utc};

    struct Harness {
        storage: Arc<InMemoryAuditStorage>,
        partitions: Arc<PartitionManager<InMemoryAuditStorage>>,
        enforcer: RetentionEnforcer<InMemoryAuditStorage>,
    }

    fn harness() -> Harness {
        let storage = Arc::new(InMemoryAuditStorage::new());
        let partitions = Arc::new(PartitionManager::new(
            Arc::clone(&storage),
            PartitionInterval::MONTHLY,
            Arc::new(FixedClock(utc(2027, 6, 1, 0, 0))),
        ));
        let enforcer = RetentionEnforcer::new(Arc::clone(&storage), Arc::clone(&partitions));
        Harness {
            storage,
            partitions,
            enforcer,
        }
    }

    /// Stores an event for its own aggregate directly, bypassing the pipeline.
    async fn store(
        h: &Harness,
        id: &str,
        retention_until: Option<DateTime<Utc>>,
        sensitive: bool,
    ) -> RecordedEvent {
        let at = utc(2026, 9, 10, 8, 0);
        let mut event = event_at("reservation", id, "reservation.checked_in", at);
        event.event_data = serde_json::json!({ "room_number": "412" });
        event.retention_until = retention_until;
        event.is_sensitive = sensitive;
        let recorded = event.into_recorded(EventId::generate(), at, 1);
        let partition = h.partitions.ensure_partition(at).await.unwrap();
        h.storage
            .append_event(&partition.name, &recorded, 0)
            .await
            .unwrap();
        recorded
    }

    fn stored(h: &Harness, event_id: EventId) -> RecordedEvent {
        h.storage
            .partition_events("audit_events_p202609")
            .into_iter()
            .find(|e| e.event_id == event_id)
            .unwrap()
    }

    #[tokio::test]
    async fn test_mixed_partition_redacts_only_expired_sensitive_events() {
        // Arrange
        let h = harness();
        let now = utc(2027, 1, 1, 0, 0);
        let expired = store(&h, "R1", Some(now - Duration::days(1)), true).await;
        let expired_public = store(&h, "R2", Some(now - Duration::days(1)), false).await;
        let live = store(&h, "R3", Some(now + Duration::days(30)), true).await;
        let forever = store(&h, "R4", None, true).await;

        // Act
        let report = h.enforcer.sweep(now).await.unwrap();

        // Assert
        assert_eq!(report.partitions_scanned, 1);
        assert_eq!(report.events_redacted, 1);
        assert!(report.partitions_dropped.is_empty());
        let redacted = stored(&h, expired.event_id);
        assert_eq!(redacted.event_data, serde_json::Value::Null);
        assert_eq!(redacted.redacted_at, Some(now));
        assert_eq!(redacted.key, expired.key);
        assert_eq!(stored(&h, expired_public.event_id), expired_public);
        assert_eq!(stored(&h, live.event_id), live);
        assert_eq!(stored(&h, forever.event_id), forever);
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let h = harness();
        let now = utc(2027, 1, 1, 0, 0);
        store(&h, "R1", Some(now), true).await;

        let first = h.enforcer.sweep(now).await.unwrap();
        let second = h.enforcer.sweep(now).await.unwrap();

        assert_eq!(first.events_redacted, 1);
        assert_eq!(second.events_redacted, 0);
    }

    #[tokio::test]
    async fn test_retired_partition_without_live_events_is_dropped() {
        // Arrange
        let h = harness();
        let now = utc(2027, 1, 1, 0, 0);
        let gone = store(&h, "R1", Some(now - Duration::days(3)), true).await;
        store(&h, "R2", Some(now - Duration::days(3)), false).await;
        h.partitions.retire(utc(2026, 10, 1, 0, 0)).await.unwrap();

        // Act
        let report = h.enforcer.sweep(now).await.unwrap();
        let again = h.enforcer.sweep(now).await.unwrap();

        // Assert
        assert_eq!(report.partitions_dropped, vec!["audit_events_p202609"]);
        assert_eq!(report.events_redacted, 0);
        assert_eq!(again, SweepReport::default());
        assert!(!h.storage.event_exists(gone.event_id).await.unwrap());
        let head = h
            .storage
            .stream_head(&AggregateKey::new("reservation", "R1"))
            .await
            .unwrap();
        assert_eq!(head.map(|h| h.sequence), Some(1));
    }

    #[tokio::test]
    async fn test_open_partition_is_never_dropped() {
        let h = harness();
        let now = utc(2027, 1, 1, 0, 0);
        store(&h, "R1", Some(now - Duration::days(3)), false).await;

        let report = h.enforcer.sweep(now).await.unwrap();

        assert!(report.partitions_dropped.is_empty());
        assert_eq!(h.storage.event_count(), 1);
    }

    #[tokio::test]
    async fn test_retired_partition_with_live_event_is_kept() {
        // Arrange
        let h = harness();
        let now = utc(2027, 1, 1, 0, 0);
        store(&h, "R1", Some(now - Duration::days(3)), true).await;
        store(&h, "R2", None, false).await;
        h.partitions.retire(utc(2026, 10, 1, 0, 0)).await.unwrap();

        // Act
        let report = h.enforcer.sweep(now).await.unwrap();

        // Assert
        assert!(report.partitions_dropped.is_empty());
        assert_eq!(report.events_redacted, 1);
        assert_eq!(h.storage.event_count(), 2);
    }

    #[tokio::test]
    async fn test_partition_still_in_progress_is_skipped() {
        let h = harness();
        store(&h, "R1", Some(utc(2026, 9, 11, 0, 0)), true).await;

        let report = h.enforcer.sweep(utc(2026, 9, 20, 0, 0)).await.unwrap();

        assert_eq!(report.partitions_scanned, 0);
        assert_eq!(report.events_redacted, 0);
    }
}
