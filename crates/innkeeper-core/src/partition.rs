//! Time-bounded partition descriptors.

use std::fmt;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// A half-open `[start, end)` range of `recorded_at` instants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl PartitionRange {
    /// Creates a range; returns `None` unless `start < end`.
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    /// Inclusive lower bound.
    #[must_use]
    pub const fn start(&self) -> DateTime<Utc> {
        self.start
    }

    /// Exclusive upper bound.
    #[must_use]
    pub const fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Whether `instant` falls inside the range.
    #[must_use]
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Storage name of the segment, derived from the start month.
    #[must_use]
    pub fn name(&self) -> String {
        format!(
            "audit_events_p{:04}{:02}",
            self.start.year(),
            self.start.month()
        )
    }
}

impl fmt::Display for PartitionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Whether a partition still accepts appends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionState {
    /// Accepts appends.
    Open,
    /// Retired; safe to archive or purge.
    ReadOnly,
}

impl PartitionState {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::ReadOnly => "read_only",
        }
    }

    /// Parses the storage representation.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "open" => Some(Self::Open),
            "read_only" => Some(Self::ReadOnly),
            _ => None,
        }
    }
}

/// Catalog entry for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRecord {
    /// Storage name.
    pub name: String,
    /// Covered `recorded_at` range.
    pub range: PartitionRange,
    /// Lifecycle state.
    pub state: PartitionState,
    /// When the partition was created.
    pub created_at: DateTime<Utc>,
}

impl PartitionRecord {
    /// A freshly created, open partition.
    #[must_use]
    pub fn open(range: PartitionRange, created_at: DateTime<Utc>) -> Self {
        Self {
            name: range.name(),
            range,
            state: PartitionState::Open,
            created_at,
        }
    }

    /// Whether this is the current write target at `now`.
    #[must_use]
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.state == PartitionState::Open && self.range.contains(now)
    }

    /// Whether the whole range lies before `now`.
    #[must_use]
    pub fn is_past(&self, now: DateTime<Utc>) -> bool {
        self.range.end() <= now
    }
}
