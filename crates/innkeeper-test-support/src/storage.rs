//! Fault-injecting storage wrapper.

use std::collections::HashSet;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeeper_core::error::StorageError;
use innkeeper_core::event::{AggregateKey, EventId, RecordedEvent};
use innkeeper_core::partition::{PartitionRange, PartitionRecord};
use innkeeper_core::storage::{
    EventLog, PartitionCatalog, RetentionScan, Snapshot, SnapshotStore, SnapshotWrite, StreamHead,
};

/// An operation that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Fault {
    /// `append_event` returns `Unavailable`.
    Append,
    /// `create_partition` returns `Unavailable`.
    CreatePartition,
    /// `save_snapshot` returns `Unavailable`.
    SaveSnapshot,
    /// `load_snapshot` returns `Unavailable`.
    LoadSnapshot,
    /// `redact_events` returns `Unavailable`.
    Redact,
}

/// Wraps a backend and fails selected operations with
/// `StorageError::Unavailable` while their fault is armed. Everything else is
/// forwarded unchanged.
#[derive(Debug)]
pub struct FaultyStorage<S> {
    inner: S,
    armed: Mutex<HashSet<Fault>>,
    injected: Mutex<Vec<Fault>>,
}

impl<S> FaultyStorage<S> {
    /// Wraps `inner` with no faults armed.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            armed: Mutex::new(HashSet::new()),
            injected: Mutex::new(Vec::new()),
        }
    }

    /// The wrapped backend.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Makes `fault` fire on every matching call until disarmed.
    pub fn arm(&self, fault: Fault) {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(fault);
    }

    /// Stops `fault` from firing.
    pub fn disarm(&self, fault: Fault) {
        self.armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&fault);
    }

    /// Every fault that fired, in order.
    #[must_use]
    pub fn injected(&self) -> Vec<Fault> {
        self.injected
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn check(&self, fault: Fault) -> Result<(), StorageError> {
        let armed = self
            .armed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&fault);
        if armed {
            self.injected
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(fault);
            return Err(StorageError::Unavailable(format!("injected {fault:?} fault")));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: EventLog> EventLog for FaultyStorage<S> {
    async fn append_event(
        &self,
        partition: &str,
        event: &RecordedEvent,
        expected_sequence: u64,
    ) -> Result<(), StorageError> {
        self.check(Fault::Append)?;
        self.inner
            .append_event(partition, event, expected_sequence)
            .await
    }

    async fn event_exists(&self, event_id: EventId) -> Result<bool, StorageError> {
        self.inner.event_exists(event_id).await
    }

    async fn stream_head(&self, key: &AggregateKey) -> Result<Option<StreamHead>, StorageError> {
        self.inner.stream_head(key).await
    }

    async fn load_stream(
        &self,
        key: &AggregateKey,
        after_sequence: u64,
    ) -> Result<Vec<RecordedEvent>, StorageError> {
        self.inner.load_stream(key, after_sequence).await
    }

    async fn retention_scan(
        &self,
        partition: &str,
        now: DateTime<Utc>,
    ) -> Result<RetentionScan, StorageError> {
        self.inner.retention_scan(partition, now).await
    }

    async fn redact_events(
        &self,
        partition: &str,
        event_ids: &[EventId],
        redacted_at: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        self.check(Fault::Redact)?;
        self.inner
            .redact_events(partition, event_ids, redacted_at)
            .await
    }
}

#[async_trait]
impl<S: PartitionCatalog> PartitionCatalog for FaultyStorage<S> {
    async fn create_partition(
        &self,
        range: PartitionRange,
        created_at: DateTime<Utc>,
    ) -> Result<PartitionRecord, StorageError> {
        self.check(Fault::CreatePartition)?;
        self.inner.create_partition(range, created_at).await
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionRecord>, StorageError> {
        self.inner.list_partitions().await
    }

    async fn mark_read_only(&self, name: &str) -> Result<bool, StorageError> {
        self.inner.mark_read_only(name).await
    }

    async fn drop_partition(&self, name: &str) -> Result<bool, StorageError> {
        self.inner.drop_partition(name).await
    }
}

#[async_trait]
impl<S: SnapshotStore> SnapshotStore for FaultyStorage<S> {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<SnapshotWrite, StorageError> {
        self.check(Fault::SaveSnapshot)?;
        self.inner.save_snapshot(snapshot).await
    }

    async fn load_snapshot(&self, key: &AggregateKey) -> Result<Option<Snapshot>, StorageError> {
        self.check(Fault::LoadSnapshot)?;
        self.inner.load_snapshot(key).await
    }
}
