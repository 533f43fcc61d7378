//! Audit store error types.

use thiserror::Error;

use crate::event::{AggregateKey, EventId};
use crate::validate::ValidationError;

/// Errors reported by storage backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// The backend could not be reached or the operation failed transiently.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// An event with this id is already recorded.
    #[error("event {0} already recorded")]
    DuplicateEvent(EventId),

    /// The stream head moved underneath the writer.
    #[error("sequence conflict on {key}: expected head {expected}, found {actual}")]
    SequenceConflict {
        /// The stream that conflicted.
        key: AggregateKey,
        /// Head the writer expected.
        expected: u64,
        /// Head found in storage.
        actual: u64,
    },

    /// The named partition does not exist.
    #[error("partition {0} does not exist")]
    PartitionMissing(String),

    /// A requested partition overlaps an existing one with different bounds.
    #[error("partition range {requested} overlaps existing partition {existing}")]
    PartitionOverlap {
        /// The requested range.
        requested: String,
        /// Name of the partition already covering part of it.
        existing: String,
    },

    /// A stored row could not be decoded.
    #[error("stored record cannot be decoded: {0}")]
    Serialization(String),
}

/// Top-level audit store error type.
#[derive(Debug, Error)]
pub enum AuditError {
    /// Malformed input; never retried as-is.
    #[error("invalid event {event_id}: {reason}")]
    InvalidEvent {
        /// The rejected event's (possibly generated) id.
        event_id: EventId,
        /// What was wrong with it.
        #[source]
        reason: ValidationError,
    },

    /// The event id is already recorded; a retry of a previous append.
    #[error("event {0} already recorded")]
    DuplicateEvent(EventId),

    /// Transient failure; the event was not recorded.
    #[error("append of event {event_id} to {key} failed: {reason}")]
    AppendFailed {
        /// The stream being appended to.
        key: AggregateKey,
        /// The event that was not recorded.
        event_id: EventId,
        /// Target partition, when it had been resolved.
        partition: Option<String>,
        /// Underlying failure.
        reason: String,
    },

    /// Neither events nor a snapshot exist for the aggregate.
    #[error("aggregate not found: {0}")]
    AggregateNotFound(AggregateKey),

    /// The aggregate's history cannot be folded.
    #[error("aggregate {key} is corrupt: {reason}")]
    CorruptAggregate {
        /// The affected aggregate.
        key: AggregateKey,
        /// The offending event, when one can be named.
        event_id: Option<EventId>,
        /// What went wrong.
        reason: String,
    },

    /// The caller's deadline elapsed before the operation completed.
    #[error("{operation} on {key} timed out")]
    Timeout {
        /// `append` or `reconstruct`.
        operation: &'static str,
        /// The aggregate involved.
        key: AggregateKey,
    },

    /// Storage failure outside the append path.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuditError {
    /// Whether the caller may retry the same request with backoff.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AppendFailed { .. }
                | Self::Timeout { .. }
                | Self::Storage(StorageError::Unavailable(_))
        )
    }
}
