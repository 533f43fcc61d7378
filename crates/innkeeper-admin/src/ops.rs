//! Operations the admin surface drives.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use innkeeper_core::error::AuditError;
use innkeeper_core::event::AggregateKey;
use innkeeper_core::partition::PartitionRecord;
use innkeeper_core::storage::AuditStorage;
use innkeeper_event_store::AuditStore;
use innkeeper_event_store::partition::{PrecreateReport, RetireReport};
use innkeeper_event_store::replay::Reconstruction;
use innkeeper_event_store::retention::SweepReport;
use innkeeper_event_store::store::FlushReport;

/// Administrative operations over one audit store, independent of its
/// storage backend.
#[async_trait]
pub trait AdminOps: Send + Sync {
    /// All partitions, ordered by range start.
    async fn partitions(&self) -> Result<Vec<PartitionRecord>, AuditError>;

    /// Provisions partitions ahead of the clock.
    async fn precreate(
        &self,
        lookahead_months: Option<u32>,
    ) -> Result<PrecreateReport, AuditError>;

    /// Marks partitions ending at or before `older_than` read-only.
    async fn retire(&self, older_than: DateTime<Utc>) -> Result<RetireReport, AuditError>;

    /// Applies retention as of `now`, or the store's clock when `None`.
    async fn sweep(&self, now: Option<DateTime<Utc>>) -> Result<SweepReport, AuditError>;

    /// Drains pending snapshot candidates.
    async fn flush_snapshots(&self) -> FlushReport;

    /// Current state of one aggregate.
    async fn reconstruct(&self, key: &AggregateKey) -> Result<Reconstruction, AuditError>;
}

#[async_trait]
impl<S: AuditStorage + 'static> AdminOps for AuditStore<S> {
    async fn partitions(&self) -> Result<Vec<PartitionRecord>, AuditError> {
        Ok(AuditStore::partitions(self).await?)
    }

    async fn precreate(
        &self,
        lookahead_months: Option<u32>,
    ) -> Result<PrecreateReport, AuditError> {
        Ok(AuditStore::precreate(self, lookahead_months).await?)
    }

    async fn retire(&self, older_than: DateTime<Utc>) -> Result<RetireReport, AuditError> {
        Ok(AuditStore::retire(self, older_than).await?)
    }

    async fn sweep(&self, now: Option<DateTime<Utc>>) -> Result<SweepReport, AuditError> {
        let now = now.unwrap_or_else(|| self.now());
        Ok(AuditStore::sweep(self, now).await?)
    }

    async fn flush_snapshots(&self) -> FlushReport {
        AuditStore::flush_snapshots(self).await
    }

    async fn reconstruct(&self, key: &AggregateKey) -> Result<Reconstruction, AuditError> {
        AuditStore::reconstruct(self, key).await
    }
}
