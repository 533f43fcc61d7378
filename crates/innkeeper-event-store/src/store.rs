//! The audit store facade.
//!
//! [`AuditStore`] wires the pipeline, partition manager, snapshot manager,
//! replayer and retention enforcer around one storage backend and exposes
//! the producer, consumer and administrative operations.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use innkeeper_core::aggregate::{Aggregate, SchemaRegistry};
use innkeeper_core::error::{AuditError, StorageError};
use innkeeper_core::event::{AggregateKey, NewEvent, RecordedEvent};
use innkeeper_core::partition::PartitionRecord;
use innkeeper_core::storage::{AuditStorage, Snapshot, SnapshotWrite};
use innkeeper_core::time::{Clock, SystemClock};
use serde::Serialize;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, instrument, warn};

use crate::append::AppendPipeline;
use crate::config::AuditStoreConfig;
use crate::partition::{PartitionManager, PrecreateReport, RetireReport};
use crate::replay::{Reconstruction, Replayer};
use crate::retention::{RetentionEnforcer, SweepReport};
use crate::snapshot::SnapshotManager;

/// Outcome of draining the snapshot candidates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlushReport {
    /// Candidates examined.
    pub examined: usize,
    /// Snapshots written.
    pub written: usize,
    /// Candidates that failed and were requeued.
    pub failed: usize,
}

/// What a snapshot decision did with one candidate.
enum SnapshotDecision {
    Attempted(SnapshotWrite),
    /// Not due yet, but will become due as time passes.
    Wait,
    /// Nothing to do until the next append.
    Settled,
}

/// Time-partitioned audit event store.
pub struct AuditStore<S> {
    storage: Arc<S>,
    config: AuditStoreConfig,
    clock: Arc<dyn Clock>,
    partitions: Arc<PartitionManager<S>>,
    pipeline: AppendPipeline<S>,
    snapshots: SnapshotManager<S>,
    replayer: Replayer<S>,
    retention: RetentionEnforcer<S>,
}

impl<S: AuditStorage + 'static> AuditStore<S> {
    /// Creates a store reading the system clock.
    #[must_use]
    pub fn new(storage: S, schemas: SchemaRegistry, config: AuditStoreConfig) -> Self {
        Self::with_clock(Arc::new(storage), schemas, config, Arc::new(SystemClock))
    }

    /// Creates a store with an explicit clock.
    #[must_use]
    pub fn with_clock(
        storage: Arc<S>,
        schemas: SchemaRegistry,
        config: AuditStoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let schemas = Arc::new(schemas);
        let partitions = Arc::new(PartitionManager::new(
            Arc::clone(&storage),
            config.partition_interval,
            Arc::clone(&clock),
        ));
        Self {
            pipeline: AppendPipeline::new(
                Arc::clone(&storage),
                Arc::clone(&partitions),
                Arc::clone(&schemas),
                Arc::clone(&clock),
            ),
            snapshots: SnapshotManager::new(
                Arc::clone(&storage),
                config.snapshot_policy,
                Arc::clone(&clock),
            ),
            replayer: Replayer::new(Arc::clone(&storage), schemas),
            retention: RetentionEnforcer::new(Arc::clone(&storage), Arc::clone(&partitions)),
            partitions,
            storage,
            config,
            clock,
        }
    }

    /// The storage backend.
    #[must_use]
    pub fn storage(&self) -> &Arc<S> {
        &self.storage
    }

    /// The store configuration.
    #[must_use]
    pub const fn config(&self) -> &AuditStoreConfig {
        &self.config
    }

    /// Current reading of the store's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Appends an event with no deadline.
    ///
    /// # Errors
    ///
    /// Returns `InvalidEvent`, `DuplicateEvent` or `AppendFailed`.
    pub async fn append(&self, event: NewEvent) -> Result<RecordedEvent, AuditError> {
        self.append_at(event, None).await
    }

    /// Appends an event, giving up with `Timeout` if it cannot start the
    /// durable write within `budget`.
    ///
    /// # Errors
    ///
    /// As [`AuditStore::append`], plus `Timeout`.
    pub async fn append_within(
        &self,
        event: NewEvent,
        budget: Duration,
    ) -> Result<RecordedEvent, AuditError> {
        self.append_at(event, Some(Instant::now() + budget)).await
    }

    async fn append_at(
        &self,
        event: NewEvent,
        deadline: Option<Instant>,
    ) -> Result<RecordedEvent, AuditError> {
        let recorded = self.pipeline.append(event, deadline).await?;
        self.snapshots.note_append(&recorded.key, recorded.sequence);
        Ok(recorded)
    }

    /// Current state of an aggregate.
    ///
    /// # Errors
    ///
    /// Returns `AggregateNotFound`, `CorruptAggregate` or `Storage`.
    pub async fn reconstruct(&self, key: &AggregateKey) -> Result<Reconstruction, AuditError> {
        self.replayer.reconstruct(key).await
    }

    /// Reconstructs, aborting with `Timeout` after `budget`. Reconstruction
    /// has no side effects, so an aborted call leaves nothing behind.
    ///
    /// # Errors
    ///
    /// As [`AuditStore::reconstruct`], plus `Timeout`.
    pub async fn reconstruct_within(
        &self,
        key: &AggregateKey,
        budget: Duration,
    ) -> Result<Reconstruction, AuditError> {
        timeout(budget, self.replayer.reconstruct(key))
            .await
            .map_err(|_| AuditError::Timeout {
                operation: "reconstruct",
                key: key.clone(),
            })?
    }

    /// Reconstructs and decodes into the typed aggregate state.
    ///
    /// # Errors
    ///
    /// As [`AuditStore::reconstruct`]; a state that does not decode into `A`
    /// is `CorruptAggregate`.
    pub async fn reconstruct_as<A: Aggregate>(&self, aggregate_id: &str) -> Result<A, AuditError> {
        let key = AggregateKey::new(A::AGGREGATE_TYPE, aggregate_id);
        let reconstruction = self.reconstruct(&key).await?;
        A::deserialize(&reconstruction.state).map_err(|e| AuditError::CorruptAggregate {
            key,
            event_id: None,
            reason: e.to_string(),
        })
    }

    /// Provisions partitions `lookahead_months` ahead, or the configured
    /// lookahead when `None`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be updated.
    pub async fn precreate(
        &self,
        lookahead_months: Option<u32>,
    ) -> Result<PrecreateReport, StorageError> {
        self.partitions
            .precreate(lookahead_months.unwrap_or(self.config.lookahead_months))
            .await
    }

    /// Marks partitions ending at or before `older_than` read-only.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be updated.
    pub async fn retire(&self, older_than: DateTime<Utc>) -> Result<RetireReport, StorageError> {
        self.partitions.retire(older_than).await
    }

    /// Applies retention as of `now`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on the first failed storage call.
    pub async fn sweep(&self, now: DateTime<Utc>) -> Result<SweepReport, StorageError> {
        self.retention.sweep(now).await
    }

    /// All partitions, ordered by range start.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    pub async fn partitions(&self) -> Result<Vec<PartitionRecord>, StorageError> {
        self.partitions.list().await
    }

    /// The current snapshot for `key`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the snapshot keyspace cannot be read.
    pub async fn latest_snapshot(&self, key: &AggregateKey) -> Result<Option<Snapshot>, StorageError> {
        self.snapshots.latest_snapshot(key).await
    }

    /// Materializes `key` through its current head and stores the snapshot.
    ///
    /// # Errors
    ///
    /// Returns the reconstruction error, or `Storage` if the write fails.
    pub async fn write_snapshot(&self, key: &AggregateKey) -> Result<SnapshotWrite, AuditError> {
        let reconstruction = self.reconstruct(key).await?;
        Ok(self
            .snapshots
            .write_snapshot(key, reconstruction.state, reconstruction.through_sequence)
            .await?)
    }

    /// Snapshots `key` if the policy says one is due at `through_sequence`.
    /// Returns `None` when no snapshot was attempted.
    ///
    /// # Errors
    ///
    /// Returns the reconstruction or storage error of the attempt.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn maybe_snapshot(
        &self,
        key: &AggregateKey,
        through_sequence: u64,
    ) -> Result<Option<SnapshotWrite>, AuditError> {
        match self.snapshot_if_due(key, through_sequence).await? {
            SnapshotDecision::Attempted(outcome) => Ok(Some(outcome)),
            SnapshotDecision::Wait | SnapshotDecision::Settled => Ok(None),
        }
    }

    async fn snapshot_if_due(
        &self,
        key: &AggregateKey,
        through_sequence: u64,
    ) -> Result<SnapshotDecision, AuditError> {
        let last = self.snapshots.latest_snapshot(key).await?;
        if !self.snapshots.is_due(last.as_ref(), through_sequence) {
            debug!(through_sequence, "snapshot not due");
            if self.snapshots.should_wait(last.as_ref(), through_sequence) {
                return Ok(SnapshotDecision::Wait);
            }
            return Ok(SnapshotDecision::Settled);
        }
        let reconstruction = self.replayer.reconstruct_from(key, last).await?;
        let outcome = self
            .snapshots
            .write_snapshot(key, reconstruction.state, reconstruction.through_sequence)
            .await?;
        Ok(SnapshotDecision::Attempted(outcome))
    }

    /// Aggregates noted for a snapshot decision.
    #[must_use]
    pub fn pending_snapshots(&self) -> usize {
        self.snapshots.pending()
    }

    /// Drains the snapshot candidates, deciding and writing each. Failures
    /// are logged and requeued; they never propagate.
    #[instrument(skip(self))]
    pub async fn flush_snapshots(&self) -> FlushReport {
        let mut report = FlushReport::default();
        for (key, sequence) in self.snapshots.take_candidates() {
            report.examined += 1;
            match self.snapshot_if_due(&key, sequence).await {
                Ok(SnapshotDecision::Attempted(SnapshotWrite::Written)) => report.written += 1,
                Ok(SnapshotDecision::Wait) => self.snapshots.requeue(key, sequence),
                Ok(_) => {}
                Err(error) => {
                    warn!(key = %key, sequence, %error, "snapshot attempt failed, requeued");
                    report.failed += 1;
                    self.snapshots.requeue(key, sequence);
                }
            }
        }
        if report.examined > 0 {
            info!(
                examined = report.examined,
                written = report.written,
                failed = report.failed,
                "snapshot candidates flushed"
            );
        }
        report
    }
}
