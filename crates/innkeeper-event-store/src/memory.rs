//! In-memory storage backend.
//!
//! A complete, mutex-guarded implementation of the storage traits with the
//! same atomicity guarantees as the PostgreSQL backend: an append either
//! writes the event, its id and the new stream head together, or nothing.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeeper_core::error::StorageError;
use innkeeper_core::event::{AggregateKey, EventId, RecordedEvent};
use innkeeper_core::partition::{PartitionRange, PartitionRecord, PartitionState};
use innkeeper_core::storage::{
    EventLog, PartitionCatalog, RetentionScan, Snapshot, SnapshotStore, SnapshotWrite, StreamHead,
};

#[derive(Debug)]
struct Segment {
    record: PartitionRecord,
    events: Vec<RecordedEvent>,
}

#[derive(Debug, Default)]
struct Inner {
    segments: BTreeMap<DateTime<Utc>, Segment>,
    index: HashMap<EventId, DateTime<Utc>>,
    /// Ids of events whose partition was purged; they stay claimed.
    purged: HashSet<EventId>,
    heads: HashMap<AggregateKey, StreamHead>,
    snapshots: HashMap<AggregateKey, Snapshot>,
}

impl Inner {
    fn segment_mut(&mut self, name: &str) -> Result<&mut Segment, StorageError> {
        self.segments
            .values_mut()
            .find(|segment| segment.record.name == name)
            .ok_or_else(|| StorageError::PartitionMissing(name.to_owned()))
    }

    fn is_claimed(&self, event_id: EventId) -> bool {
        self.index.contains_key(&event_id) || self.purged.contains(&event_id)
    }

    fn segment(&self, name: &str) -> Result<&Segment, StorageError> {
        self.segments
            .values()
            .find(|segment| segment.record.name == name)
            .ok_or_else(|| StorageError::PartitionMissing(name.to_owned()))
    }
}

/// Storage backend holding everything in process memory.
#[derive(Debug, Default)]
pub struct InMemoryAuditStorage {
    inner: Mutex<Inner>,
}

impl InMemoryAuditStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Events stored in a partition, in insertion order. Empty if the
    /// partition does not exist.
    #[must_use]
    pub fn partition_events(&self, name: &str) -> Vec<RecordedEvent> {
        self.lock()
            .segment(name)
            .map(|segment| segment.events.clone())
            .unwrap_or_default()
    }

    /// Total number of stored events across partitions.
    #[must_use]
    pub fn event_count(&self) -> usize {
        self.lock().index.len()
    }
}

#[async_trait]
impl EventLog for InMemoryAuditStorage {
    async fn append_event(
        &self,
        partition: &str,
        event: &RecordedEvent,
        expected_sequence: u64,
    ) -> Result<(), StorageError> {
        let mut inner = self.lock();
        if inner.is_claimed(event.event_id) {
            return Err(StorageError::DuplicateEvent(event.event_id));
        }
        let actual = inner.heads.get(&event.key).map_or(0, |head| head.sequence);
        if actual != expected_sequence {
            return Err(StorageError::SequenceConflict {
                key: event.key.clone(),
                expected: expected_sequence,
                actual,
            });
        }
        let segment = inner.segment_mut(partition)?;
        if !segment.record.range.contains(event.recorded_at) {
            return Err(StorageError::PartitionMissing(format!(
                "{partition} does not cover {}",
                event.recorded_at
            )));
        }
        let start = segment.record.range.start();
        segment.events.push(event.clone());
        inner.index.insert(event.event_id, start);
        inner.heads.insert(
            event.key.clone(),
            StreamHead {
                sequence: event.sequence,
                recorded_at: event.recorded_at,
            },
        );
        Ok(())
    }

    async fn event_exists(&self, event_id: EventId) -> Result<bool, StorageError> {
        Ok(self.lock().is_claimed(event_id))
    }

    async fn stream_head(&self, key: &AggregateKey) -> Result<Option<StreamHead>, StorageError> {
        Ok(self.lock().heads.get(key).copied())
    }

    async fn load_stream(
        &self,
        key: &AggregateKey,
        after_sequence: u64,
    ) -> Result<Vec<RecordedEvent>, StorageError> {
        let inner = self.lock();
        Ok(inner
            .segments
            .values()
            .flat_map(|segment| segment.events.iter())
            .filter(|event| &event.key == key && event.sequence > after_sequence)
            .cloned()
            .collect())
    }

    async fn retention_scan(
        &self,
        partition: &str,
        now: DateTime<Utc>,
    ) -> Result<RetentionScan, StorageError> {
        let inner = self.lock();
        let segment = inner.segment(partition)?;
        let mut scan = RetentionScan::default();
        for event in &segment.events {
            scan.total += 1;
            if !event.is_expired(now) {
                scan.live += 1;
            }
            if event.is_redactable(now) {
                scan.redactable.push(event.event_id);
            }
        }
        Ok(scan)
    }

    async fn redact_events(
        &self,
        partition: &str,
        event_ids: &[EventId],
        redacted_at: DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let targets: HashSet<_> = event_ids.iter().copied().collect();
        let mut inner = self.lock();
        let segment = inner.segment_mut(partition)?;
        let mut changed = 0;
        for event in &mut segment.events {
            if targets.contains(&event.event_id) && !event.is_redacted() {
                event.redact(redacted_at);
                changed += 1;
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl PartitionCatalog for InMemoryAuditStorage {
    async fn create_partition(
        &self,
        range: PartitionRange,
        created_at: DateTime<Utc>,
    ) -> Result<PartitionRecord, StorageError> {
        let mut inner = self.lock();
        if let Some(existing) = inner.segments.get(&range.start()) {
            if existing.record.range == range {
                return Ok(existing.record.clone());
            }
        }
        if let Some(overlap) = inner.segments.values().find(|segment| {
            segment.record.range.start() < range.end() && range.start() < segment.record.range.end()
        }) {
            return Err(StorageError::PartitionOverlap {
                requested: range.to_string(),
                existing: overlap.record.name.clone(),
            });
        }
        let record = PartitionRecord::open(range, created_at);
        inner.segments.insert(
            range.start(),
            Segment {
                record: record.clone(),
                events: Vec::new(),
            },
        );
        Ok(record)
    }

    async fn list_partitions(&self) -> Result<Vec<PartitionRecord>, StorageError> {
        Ok(self
            .lock()
            .segments
            .values()
            .map(|segment| segment.record.clone())
            .collect())
    }

    async fn mark_read_only(&self, name: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let segment = inner.segment_mut(name)?;
        let changed = segment.record.state == PartitionState::Open;
        segment.record.state = PartitionState::ReadOnly;
        Ok(changed)
    }

    async fn drop_partition(&self, name: &str) -> Result<bool, StorageError> {
        let mut inner = self.lock();
        let Some(start) = inner
            .segments
            .iter()
            .find(|(_, segment)| segment.record.name == name)
            .map(|(start, _)| *start)
        else {
            return Ok(false);
        };
        if let Some(segment) = inner.segments.remove(&start) {
            for event in &segment.events {
                inner.index.remove(&event.event_id);
                inner.purged.insert(event.event_id);
            }
        }
        Ok(true)
    }
}

#[async_trait]
impl SnapshotStore for InMemoryAuditStorage {
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<SnapshotWrite, StorageError> {
        let mut inner = self.lock();
        if inner
            .snapshots
            .get(&snapshot.key)
            .is_some_and(|current| current.through_sequence >= snapshot.through_sequence)
        {
            return Ok(SnapshotWrite::Superseded);
        }
        inner.snapshots.insert(snapshot.key.clone(), snapshot.clone());
        Ok(SnapshotWrite::Written)
    }

    async fn load_snapshot(&self, key: &AggregateKey) -> Result<Option<Snapshot>, StorageError> {
        Ok(self.lock().snapshots.get(key).cloned())
    }
}
