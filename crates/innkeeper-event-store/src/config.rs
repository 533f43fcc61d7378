//! Audit store configuration.

use crate::partition::PartitionInterval;
use crate::snapshot::SnapshotPolicy;

/// Tunables of an [`AuditStore`](crate::AuditStore).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditStoreConfig {
    /// Width of each partition.
    pub partition_interval: PartitionInterval,
    /// How many months ahead `precreate` provisions by default.
    pub lookahead_months: u32,
    /// When a noted append should produce a new snapshot.
    pub snapshot_policy: SnapshotPolicy,
}

impl Default for AuditStoreConfig {
    fn default() -> Self {
        Self {
            partition_interval: PartitionInterval::MONTHLY,
            lookahead_months: 3,
            snapshot_policy: SnapshotPolicy::EveryEvents(100),
        }
    }
}
