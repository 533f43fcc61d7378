//! Append Pipeline.
//!
//! The single write path: assign identity and ingestion time, validate,
//! sequence within the aggregate, resolve the partition and persist. The
//! per-aggregate slot is held from validation through the durable write, so
//! one aggregate's events are never interleaved.

use std::sync::Arc;

use innkeeper_core::aggregate::SchemaRegistry;
use innkeeper_core::error::{AuditError, StorageError};
use innkeeper_core::event::{EventId, NewEvent, RecordedEvent};
use innkeeper_core::partition::PartitionState;
use innkeeper_core::storage::{AuditStorage, StreamHead};
use innkeeper_core::time::Clock;
use innkeeper_core::validate::{ValidationContext, ValidationError, validate};
use tokio::sync::OwnedMutexGuard;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, instrument, warn};

use crate::locks::{AggregateLocks, StreamCursor};
use crate::partition::PartitionManager;

/// An event ready for the durable write.
struct Prepared {
    cursor: OwnedMutexGuard<StreamCursor>,
    partition: String,
    expected_sequence: u64,
    event: RecordedEvent,
}

/// Validates, sequences and persists events.
pub struct AppendPipeline<S> {
    storage: Arc<S>,
    partitions: Arc<PartitionManager<S>>,
    schemas: Arc<SchemaRegistry>,
    clock: Arc<dyn Clock>,
    locks: AggregateLocks,
}

impl<S: AuditStorage> AppendPipeline<S> {
    /// Creates a pipeline writing through `storage`.
    #[must_use]
    pub fn new(
        storage: Arc<S>,
        partitions: Arc<PartitionManager<S>>,
        schemas: Arc<SchemaRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            storage,
            partitions,
            schemas,
            clock,
            locks: AggregateLocks::default(),
        }
    }

    /// Appends one event and returns it as recorded.
    ///
    /// `deadline` bounds waiting for the aggregate's slot, validation and
    /// partition resolution. Once the durable write starts it runs to
    /// completion, so a timeout never leaves a partial write behind.
    ///
    /// # Errors
    ///
    /// - `InvalidEvent` if the event breaks the event contract
    /// - `DuplicateEvent` if its id is already recorded
    /// - `AppendFailed` if storage or partition creation failed
    /// - `Timeout` if the deadline elapsed before the write started
    #[instrument(
        skip(self, event, deadline),
        fields(key = %event.key, event_type = %event.event_type)
    )]
    pub async fn append(
        &self,
        event: NewEvent,
        deadline: Option<Instant>,
    ) -> Result<RecordedEvent, AuditError> {
        let event_id = event.event_id.unwrap_or_else(EventId::generate);
        let key = event.key.clone();
        let lease = self.locks.lease(&key);

        let preparing = self.prepare(event_id, event, lease.slot());
        let prepared = match deadline {
            Some(deadline) => timeout_at(deadline, preparing)
                .await
                .map_err(|_| AuditError::Timeout {
                    operation: "append",
                    key: key.clone(),
                })??,
            None => preparing.await?,
        };

        let Prepared {
            mut cursor,
            partition,
            expected_sequence,
            event,
        } = prepared;
        match self
            .storage
            .append_event(&partition, &event, expected_sequence)
            .await
        {
            Ok(()) => {
                cursor.head = Some(Some(StreamHead {
                    sequence: event.sequence,
                    recorded_at: event.recorded_at,
                }));
                debug!(
                    event_id = %event.event_id,
                    sequence = event.sequence,
                    partition = %partition,
                    "event appended"
                );
                Ok(event)
            }
            Err(StorageError::DuplicateEvent(id)) => Err(AuditError::DuplicateEvent(id)),
            Err(error) => {
                cursor.invalidate();
                if matches!(error, StorageError::PartitionMissing(_)) {
                    self.partitions.forget(&partition);
                }
                warn!(%error, event_id = %event_id, partition = %partition, "append failed");
                Err(AuditError::AppendFailed {
                    key,
                    event_id,
                    partition: Some(partition),
                    reason: error.to_string(),
                })
            }
        }
    }

    async fn prepare(
        &self,
        event_id: EventId,
        event: NewEvent,
        slot: Arc<tokio::sync::Mutex<StreamCursor>>,
    ) -> Result<Prepared, AuditError> {
        let mut cursor = slot.lock_owned().await;
        let now = self.clock.now();
        let failed = |error: StorageError| AuditError::AppendFailed {
            key: event.key.clone(),
            event_id,
            partition: None,
            reason: error.to_string(),
        };
        let invalid = |reason: ValidationError| AuditError::InvalidEvent { event_id, reason };

        if event.event_id.is_some()
            && self
                .storage
                .event_exists(event_id)
                .await
                .map_err(&failed)?
        {
            return Err(AuditError::DuplicateEvent(event_id));
        }

        let causation_found = match event.causation_id {
            Some(cause) => self
                .storage
                .event_exists(cause)
                .await
                .map_err(&failed)?,
            None => false,
        };
        let context = ValidationContext {
            now,
            schema: self.schemas.get(&event.key.aggregate_type),
            causation_found,
        };
        validate(&event, &context).map_err(invalid)?;

        let head = match cursor.head {
            Some(head) => head,
            None => {
                let head = self
                    .storage
                    .stream_head(&event.key)
                    .await
                    .map_err(&failed)?;
                cursor.head = Some(head);
                head
            }
        };

        let recorded_at = match (event.recorded_at, head) {
            (Some(pinned), Some(head)) if pinned < head.recorded_at => {
                return Err(invalid(ValidationError::RecordedBeforeHead {
                    recorded_at: pinned,
                    head: head.recorded_at,
                }));
            }
            (Some(pinned), _) => pinned,
            (None, Some(head)) => now.max(head.recorded_at),
            (None, None) => now,
        };

        let partition = self
            .partitions
            .ensure_partition(recorded_at)
            .await
            .map_err(&failed)?;
        if partition.state == PartitionState::ReadOnly {
            return Err(invalid(ValidationError::ReadOnlyPartition(partition.name)));
        }

        let expected_sequence = head.map_or(0, |head| head.sequence);
        Ok(Prepared {
            cursor,
            partition: partition.name,
            expected_sequence,
            event: event.into_recorded(event_id, recorded_at, expected_sequence + 1),
        })
    }

    /// Number of aggregates with an append in flight.
    #[cfg(test)]
    fn active_slots(&self) -> usize {
        self.locks.len()
    }
}
