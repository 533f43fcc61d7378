//! Partition Lifecycle Manager.
//!
//! Owns the time-bounded segmentation of the log: resolving the segment an
//! instant belongs to (creating it just in time if needed), creating future
//! segments ahead of the write frontier, and retiring segments that lie fully
//! in the past.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use innkeeper_core::error::StorageError;
use innkeeper_core::partition::{PartitionRange, PartitionRecord, PartitionState};
use innkeeper_core::storage::PartitionCatalog;
use innkeeper_core::time::{Clock, month_index, month_start, shift_months};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

/// Width of one partition, in calendar months.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInterval {
    months: u32,
}

impl PartitionInterval {
    /// One partition per calendar month.
    pub const MONTHLY: Self = Self { months: 1 };
    /// One partition per calendar quarter.
    pub const QUARTERLY: Self = Self { months: 3 };
    /// One partition per calendar year.
    pub const YEARLY: Self = Self { months: 12 };

    /// A custom width; `None` for zero.
    #[must_use]
    pub const fn months(months: u32) -> Option<Self> {
        if months == 0 {
            None
        } else {
            Some(Self { months })
        }
    }

    /// Months per partition.
    #[must_use]
    pub const fn as_months(self) -> u32 {
        self.months
    }

    /// The aligned range containing `instant`. Ranges start on month indexes
    /// divisible by the interval, so every instant maps to exactly one range.
    #[must_use]
    pub fn range_for(self, instant: DateTime<Utc>) -> Option<PartitionRange> {
        let width = i64::from(self.months);
        let first = month_index(instant).div_euclid(width) * width;
        PartitionRange::new(month_start(first)?, month_start(first + width)?)
    }
}

impl Default for PartitionInterval {
    fn default() -> Self {
        Self::MONTHLY
    }
}

/// Outcome of [`PartitionManager::precreate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrecreateReport {
    /// Partitions that did not exist before this run.
    pub created: Vec<String>,
    /// Partitions covering the window that already existed.
    pub existing: usize,
}

/// Outcome of [`PartitionManager::retire`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetireReport {
    /// Partitions switched to read-only by this run.
    pub retired: Vec<String>,
}

/// Creates, resolves and retires partitions through a [`PartitionCatalog`].
///
/// Known partitions are cached by range start; the catalog stays the source
/// of truth and is re-read by `list`, `precreate` and `retire`.
pub struct PartitionManager<S> {
    catalog: Arc<S>,
    interval: PartitionInterval,
    clock: Arc<dyn Clock>,
    known: RwLock<BTreeMap<DateTime<Utc>, PartitionRecord>>,
}

impl<S: PartitionCatalog> PartitionManager<S> {
    /// Creates a manager with an empty cache.
    #[must_use]
    pub fn new(catalog: Arc<S>, interval: PartitionInterval, clock: Arc<dyn Clock>) -> Self {
        Self {
            catalog,
            interval,
            clock,
            known: RwLock::new(BTreeMap::new()),
        }
    }

    /// Configured partition width.
    #[must_use]
    pub const fn interval(&self) -> PartitionInterval {
        self.interval
    }

    fn range_for(&self, instant: DateTime<Utc>) -> Result<PartitionRange, StorageError> {
        self.interval.range_for(instant).ok_or_else(|| {
            StorageError::PartitionMissing(format!("no representable partition for {instant}"))
        })
    }

    fn cached(&self, start: DateTime<Utc>) -> Option<PartitionRecord> {
        self.known
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&start)
            .cloned()
    }

    fn remember(&self, record: PartitionRecord) {
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(record.range.start(), record);
    }

    fn replace_all(&self, records: &[PartitionRecord]) {
        let mut known = self.known.write().unwrap_or_else(PoisonError::into_inner);
        known.clear();
        known.extend(records.iter().map(|r| (r.range.start(), r.clone())));
    }

    /// Drops a partition from the cache after it was purged.
    pub fn forget(&self, name: &str) {
        self.known
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|_, record| record.name != name);
    }

    /// Returns the partition covering `instant`, creating it if absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot create the partition.
    #[instrument(skip(self))]
    pub async fn ensure_partition(
        &self,
        instant: DateTime<Utc>,
    ) -> Result<PartitionRecord, StorageError> {
        let range = self.range_for(instant)?;
        if let Some(record) = self.cached(range.start()) {
            return Ok(record);
        }
        let record = self
            .catalog
            .create_partition(range, self.clock.now())
            .await?;
        debug!(partition = %record.name, range = %record.range, "partition resolved");
        self.remember(record.clone());
        Ok(record)
    }

    /// Ensures every partition from the current one through `lookahead_months`
    /// ahead exists.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read or written.
    #[instrument(skip(self))]
    pub async fn precreate(&self, lookahead_months: u32) -> Result<PrecreateReport, StorageError> {
        let now = self.clock.now();
        self.list().await?;
        let horizon = shift_months(now, i64::from(lookahead_months)).ok_or_else(|| {
            StorageError::PartitionMissing(format!(
                "lookahead of {lookahead_months} months is not representable"
            ))
        })?;

        let mut report = PrecreateReport::default();
        let mut range = self.range_for(now)?;
        loop {
            if self.cached(range.start()).is_some() {
                report.existing += 1;
            } else {
                let record = self.catalog.create_partition(range, now).await?;
                info!(partition = %record.name, range = %record.range, "partition precreated");
                report.created.push(record.name.clone());
                self.remember(record);
            }
            if range.end() > horizon {
                break;
            }
            range = self.range_for(range.end())?;
        }
        Ok(report)
    }

    /// Marks every open partition ending at or before `older_than` read-only.
    /// A cutoff later than the clock is clamped to it, so the active and
    /// precreated partitions stay open.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read or written.
    #[instrument(skip(self))]
    pub async fn retire(&self, older_than: DateTime<Utc>) -> Result<RetireReport, StorageError> {
        let cutoff = older_than.min(self.clock.now());
        let mut report = RetireReport::default();
        for mut record in self.list().await? {
            if record.state != PartitionState::Open || record.range.end() > cutoff {
                continue;
            }
            if self.catalog.mark_read_only(&record.name).await? {
                info!(partition = %record.name, "partition retired");
                report.retired.push(record.name.clone());
            }
            record.state = PartitionState::ReadOnly;
            self.remember(record);
        }
        Ok(report)
    }

    /// All partitions, refreshed from the catalog.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the catalog cannot be read.
    pub async fn list(&self) -> Result<Vec<PartitionRecord>, StorageError> {
        let records = self.catalog.list_partitions().await?;
        self.replace_all(&records);
        Ok(records)
    }
}
