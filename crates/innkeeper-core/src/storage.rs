//! Storage abstractions the audit store is written against.
//!
//! A backend implements all three traits: [`EventLog`] for the partitioned
//! append-only log, [`PartitionCatalog`] for segment lifecycle and
//! [`SnapshotStore`] for the snapshot keyspace.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::event::{AggregateKey, EventId, RecordedEvent};
use crate::partition::{PartitionRange, PartitionRecord};

/// Latest position of an aggregate stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHead {
    /// Sequence of the latest event (never decreases, even after purges).
    pub sequence: u64,
    /// Ingestion time of the latest event.
    pub recorded_at: DateTime<Utc>,
}

/// Retention facts about one partition at a given instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionScan {
    /// Events stored in the partition.
    pub total: u64,
    /// Events still under retention (deadline unset or in the future).
    pub live: u64,
    /// Expired, sensitive, not yet redacted events.
    pub redactable: Vec<EventId>,
}

/// A point-in-time materialization of an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// The aggregate this snapshot belongs to.
    pub key: AggregateKey,
    /// Materialized state.
    pub snapshot_data: serde_json::Value,
    /// Sequence of the last event folded into `snapshot_data`.
    pub through_sequence: u64,
    /// When the snapshot was taken.
    pub created_at: DateTime<Utc>,
}

/// Result of a conditional snapshot write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotWrite {
    /// The snapshot is now the current one.
    Written,
    /// A snapshot at the same or a later sequence already existed.
    Superseded,
}

/// The partitioned append-only event log.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Atomically writes `event` into `partition`, records its id in the
    /// global index and advances the stream head from `expected_sequence`.
    async fn append_event(
        &self,
        partition: &str,
        event: &RecordedEvent,
        expected_sequence: u64,
    ) -> Result<(), StorageError>;

    /// Whether an event with this id has been recorded.
    async fn event_exists(&self, event_id: EventId) -> Result<bool, StorageError>;

    /// Current head of a stream, if any event was ever recorded for it.
    async fn stream_head(&self, key: &AggregateKey) -> Result<Option<StreamHead>, StorageError>;

    /// Events of a stream with `sequence > after_sequence`, across partitions.
    async fn load_stream(
        &self,
        key: &AggregateKey,
        after_sequence: u64,
    ) -> Result<Vec<RecordedEvent>, StorageError>;

    /// Retention facts for one partition.
    async fn retention_scan(
        &self,
        partition: &str,
        now: DateTime<Utc>,
    ) -> Result<RetentionScan, StorageError>;

    /// Replaces the payload of the given events with `null`, stamping
    /// `redacted_at`. Already redacted events are left untouched. Returns the
    /// number of events changed.
    async fn redact_events(
        &self,
        partition: &str,
        event_ids: &[EventId],
        redacted_at: DateTime<Utc>,
    ) -> Result<u64, StorageError>;
}

/// Partition lifecycle bookkeeping.
#[async_trait]
pub trait PartitionCatalog: Send + Sync {
    /// Creates the partition if absent and returns its catalog entry.
    /// Concurrent creation of the same range must not fail.
    async fn create_partition(
        &self,
        range: PartitionRange,
        created_at: DateTime<Utc>,
    ) -> Result<PartitionRecord, StorageError>;

    /// All partitions, ordered by range start.
    async fn list_partitions(&self) -> Result<Vec<PartitionRecord>, StorageError>;

    /// Marks a partition read-only. Returns whether its state changed.
    async fn mark_read_only(&self, name: &str) -> Result<bool, StorageError>;

    /// Drops a partition with all its events. Returns whether it existed.
    async fn drop_partition(&self, name: &str) -> Result<bool, StorageError>;
}

/// The snapshot keyspace, one current snapshot per aggregate.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Stores `snapshot` unless one with an equal or higher
    /// `through_sequence` already exists.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<SnapshotWrite, StorageError>;

    /// The current snapshot for `key`.
    async fn load_snapshot(&self, key: &AggregateKey) -> Result<Option<Snapshot>, StorageError>;
}

/// A complete storage backend.
pub trait AuditStorage: EventLog + PartitionCatalog + SnapshotStore {}

impl<T: EventLog + PartitionCatalog + SnapshotStore + ?Sized> AuditStorage for T {}
