//! Pure validation of events before they enter the append pipeline.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::aggregate::AggregateSchema;
use crate::event::{EventId, NewEvent};
use crate::payload::PayloadError;

/// Why an event was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// A required identifier is blank.
    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    /// `event_type` is not of the form `segment.segment`.
    #[error("event type {0:?} is not dot-namespaced")]
    MalformedEventType(String),

    /// `event_version` is zero.
    #[error("event version must be at least 1")]
    ZeroVersion,

    /// `occurred_at` lies after the ingestion clock.
    #[error("occurred_at {occurred_at} is in the future (now {now})")]
    OccurredInFuture {
        /// Declared business time.
        occurred_at: DateTime<Utc>,
        /// Ingestion clock reading.
        now: DateTime<Utc>,
    },

    /// `retention_until` precedes `occurred_at`.
    #[error("retention deadline precedes occurrence")]
    RetentionBeforeOccurrence,

    /// No schema is registered for the aggregate type.
    #[error("no schema registered for aggregate type {0:?}")]
    UnknownAggregateType(String),

    /// The payload does not decode under its declared version.
    #[error(transparent)]
    Payload(#[from] PayloadError),

    /// `causation_id` refers to an event that was never recorded.
    #[error("causation event {0} does not exist")]
    UnknownCausation(EventId),

    /// A pinned `recorded_at` would go back in time for this aggregate.
    #[error("recorded_at {recorded_at} precedes the stream head at {head}")]
    RecordedBeforeHead {
        /// Requested ingestion time.
        recorded_at: DateTime<Utc>,
        /// Ingestion time of the aggregate's latest event.
        head: DateTime<Utc>,
    },

    /// The target partition has been retired.
    #[error("partition {0} is read-only")]
    ReadOnlyPartition(String),
}

/// Facts the caller resolved before validating.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    /// Ingestion clock reading.
    pub now: DateTime<Utc>,
    /// Schema for the event's aggregate type, if registered.
    pub schema: Option<&'a dyn AggregateSchema>,
    /// Whether the event named by `causation_id` has been durably appended.
    /// Ignored when the event has no causation.
    pub causation_found: bool,
}

/// Whether `event_type` looks like `reservation.created`.
#[must_use]
pub fn is_namespaced(event_type: &str) -> bool {
    let mut segments = 0;
    for segment in event_type.split('.') {
        if segment.is_empty()
            || !segment
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
        {
            return false;
        }
        segments += 1;
    }
    segments >= 2
}

/// Validates the event contract.
///
/// # Errors
///
/// Returns the first `ValidationError` found.
pub fn validate(event: &NewEvent, ctx: &ValidationContext<'_>) -> Result<(), ValidationError> {
    if event.key.aggregate_type.trim().is_empty() {
        return Err(ValidationError::EmptyField("aggregate_type"));
    }
    if event.key.aggregate_id.trim().is_empty() {
        return Err(ValidationError::EmptyField("aggregate_id"));
    }
    if event.event_type.trim().is_empty() {
        return Err(ValidationError::EmptyField("event_type"));
    }
    if !is_namespaced(&event.event_type) {
        return Err(ValidationError::MalformedEventType(event.event_type.clone()));
    }
    if event.event_version == 0 {
        return Err(ValidationError::ZeroVersion);
    }
    if event.occurred_at > ctx.now {
        return Err(ValidationError::OccurredInFuture {
            occurred_at: event.occurred_at,
            now: ctx.now,
        });
    }
    if event
        .retention_until
        .is_some_and(|until| until < event.occurred_at)
    {
        return Err(ValidationError::RetentionBeforeOccurrence);
    }

    let schema = ctx
        .schema
        .ok_or_else(|| ValidationError::UnknownAggregateType(event.key.aggregate_type.clone()))?;
    schema.check_payload(&event.event_type, event.event_version, &event.event_data)?;

    if let Some(cause) = event.causation_id {
        if !ctx.causation_found {
            return Err(ValidationError::UnknownCausation(cause));
        }
    }
    Ok(())
}
