//! Snapshot Manager.
//!
//! Decides when an aggregate deserves a fresh snapshot and persists it with
//! last-sequence-wins semantics. Appends only note candidates in memory; the
//! actual materialization happens off the write path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use innkeeper_core::error::StorageError;
use innkeeper_core::event::AggregateKey;
use innkeeper_core::storage::{Snapshot, SnapshotStore, SnapshotWrite};
use innkeeper_core::time::Clock;
use tracing::{debug, info, instrument};

/// When a new snapshot is worth taking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotPolicy {
    /// Never snapshot; every reconstruction replays the full history.
    Never,
    /// Snapshot once this many events accumulated since the last snapshot.
    EveryEvents(u64),
    /// Snapshot once the last snapshot is at least this old.
    Elapsed(Duration),
    /// Snapshot when either threshold is crossed.
    Either {
        /// Event threshold.
        events: u64,
        /// Age threshold.
        elapsed: Duration,
    },
}

impl SnapshotPolicy {
    /// Whether a snapshot through `head_sequence` should be taken now.
    ///
    /// Always false when no event was appended since `last`.
    #[must_use]
    pub fn is_due(self, last: Option<&Snapshot>, head_sequence: u64, now: DateTime<Utc>) -> bool {
        let covered = last.map_or(0, |snapshot| snapshot.through_sequence);
        if head_sequence <= covered {
            return false;
        }
        let pending = head_sequence - covered;
        let events_due = |threshold: u64| pending >= threshold.max(1);
        let age_due = |threshold: Duration| match last {
            None => true,
            Some(snapshot) => (now - snapshot.created_at)
                .to_std()
                .is_ok_and(|age| age >= threshold),
        };
        match self {
            Self::Never => false,
            Self::EveryEvents(events) => events_due(events),
            Self::Elapsed(elapsed) => age_due(elapsed),
            Self::Either { events, elapsed } => events_due(events) || age_due(elapsed),
        }
    }

    /// Whether a snapshot not due now may become due with no further
    /// appends, because the policy has an age threshold.
    #[must_use]
    pub const fn waits_on_time(self) -> bool {
        matches!(self, Self::Elapsed(_) | Self::Either { .. })
    }
}

/// Persists snapshots and tracks aggregates that may need one.
pub struct SnapshotManager<S> {
    storage: Arc<S>,
    policy: SnapshotPolicy,
    clock: Arc<dyn Clock>,
    candidates: Mutex<HashMap<AggregateKey, u64>>,
}

impl<S: SnapshotStore> SnapshotManager<S> {
    /// Creates a manager with no pending candidates.
    #[must_use]
    pub fn new(storage: Arc<S>, policy: SnapshotPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            storage,
            policy,
            clock,
            candidates: Mutex::new(HashMap::new()),
        }
    }

    /// Configured policy.
    #[must_use]
    pub const fn policy(&self) -> SnapshotPolicy {
        self.policy
    }

    /// Records that `key` advanced to `sequence`. Never performs I/O.
    pub fn note_append(&self, key: &AggregateKey, sequence: u64) {
        if self.policy == SnapshotPolicy::Never {
            return;
        }
        let mut candidates = self.candidates.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = candidates.entry(key.clone()).or_insert(sequence);
        *entry = (*entry).max(sequence);
    }

    /// Removes and returns every pending candidate, ordered by key.
    pub fn take_candidates(&self) -> Vec<(AggregateKey, u64)> {
        let mut drained: Vec<_> = self
            .candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        drained.sort_by(|a, b| a.0.cmp(&b.0));
        drained
    }

    /// Puts a candidate back after a failed attempt, unless a newer one was
    /// noted meanwhile.
    pub fn requeue(&self, key: AggregateKey, sequence: u64) {
        let mut candidates = self.candidates.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = candidates.entry(key).or_insert(sequence);
        *entry = (*entry).max(sequence);
    }

    /// Number of aggregates waiting for a snapshot decision.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.candidates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether a snapshot through `head_sequence` is due under the policy.
    #[must_use]
    pub fn is_due(&self, last: Option<&Snapshot>, head_sequence: u64) -> bool {
        self.policy.is_due(last, head_sequence, self.clock.now())
    }

    /// Whether a candidate that is not due yet must stay queued: events
    /// past `last` exist and only the passage of time is missing.
    #[must_use]
    pub fn should_wait(&self, last: Option<&Snapshot>, head_sequence: u64) -> bool {
        let covered = last.map_or(0, |snapshot| snapshot.through_sequence);
        self.policy.waits_on_time() && head_sequence > covered
    }

    /// The current snapshot for `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot keyspace cannot be read.
    pub async fn latest_snapshot(&self, key: &AggregateKey) -> Result<Option<Snapshot>, StorageError> {
        self.storage.load_snapshot(key).await
    }

    /// Persists a snapshot; an existing snapshot at the same or a later
    /// sequence is left in place.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the write fails.
    #[instrument(skip(self, state), fields(key = %key))]
    pub async fn write_snapshot(
        &self,
        key: &AggregateKey,
        state: serde_json::Value,
        through_sequence: u64,
    ) -> Result<SnapshotWrite, StorageError> {
        let snapshot = Snapshot {
            key: key.clone(),
            snapshot_data: state,
            through_sequence,
            created_at: self.clock.now(),
        };
        let outcome = self.storage.save_snapshot(&snapshot).await?;
        match outcome {
            SnapshotWrite::Written => info!(through_sequence, "snapshot written"),
            SnapshotWrite::Superseded => {
                debug!(through_sequence, "snapshot superseded by a newer one");
            }
        }
        Ok(outcome)
    }
}
