//! Replay / Reconstruction Engine.
//!
//! Folds the newest snapshot plus every later event of an aggregate into its
//! current state. Events are folded in `(recorded_at, sequence, event_id)`
//! order and must form a gap-free run of sequences.

use std::sync::Arc;

use innkeeper_core::aggregate::{AggregateSchema, FoldError, SchemaRegistry};
use innkeeper_core::error::AuditError;
use innkeeper_core::event::{AggregateKey, EventId, RecordedEvent};
use innkeeper_core::storage::{EventLog, Snapshot, SnapshotStore};
use serde::Serialize;
use tracing::{debug, instrument, warn};

/// Current state of an aggregate and how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reconstruction {
    /// The reconstructed aggregate.
    pub key: AggregateKey,
    /// Folded state, in the aggregate's serialized form.
    pub state: serde_json::Value,
    /// Sequence of the last event reflected in `state`.
    pub through_sequence: u64,
    /// Snapshot the fold started from, if one was used.
    pub snapshot_sequence: Option<u64>,
    /// Number of events folded on top of the starting point.
    pub events_replayed: usize,
}

/// Reconstructs aggregates from storage.
pub struct Replayer<S> {
    storage: Arc<S>,
    schemas: Arc<SchemaRegistry>,
}

impl<S: EventLog + SnapshotStore> Replayer<S> {
    /// Creates a replayer over `storage`.
    #[must_use]
    pub fn new(storage: Arc<S>, schemas: Arc<SchemaRegistry>) -> Self {
        Self { storage, schemas }
    }

    /// Reconstructs from the latest snapshot, falling back to the full
    /// history when the snapshot cannot be read.
    ///
    /// # Errors
    ///
    /// Returns `AggregateNotFound` when nothing is stored for `key`,
    /// `CorruptAggregate` when the history cannot be folded and `Storage`
    /// when events cannot be loaded.
    #[instrument(skip(self), fields(key = %key))]
    pub async fn reconstruct(&self, key: &AggregateKey) -> Result<Reconstruction, AuditError> {
        let snapshot = match self.storage.load_snapshot(key).await {
            Ok(snapshot) => snapshot,
            Err(error) => {
                warn!(%error, "snapshot unavailable, replaying full history");
                None
            }
        };
        self.reconstruct_from(key, snapshot).await
    }

    /// Reconstructs starting from `snapshot`, or from the beginning.
    ///
    /// # Errors
    ///
    /// See [`Replayer::reconstruct`].
    pub async fn reconstruct_from(
        &self,
        key: &AggregateKey,
        snapshot: Option<Snapshot>,
    ) -> Result<Reconstruction, AuditError> {
        let schema = self.schemas.get(&key.aggregate_type);
        let had_snapshot = snapshot.is_some();

        if let Some(snapshot) = snapshot {
            let schema = schema.ok_or_else(|| unregistered(key))?;
            let events = self.load(key, snapshot.through_sequence).await?;
            match fold(key, schema, Some(&snapshot), &events) {
                Err(Unfoldable::Snapshot(reason)) => {
                    warn!(%reason, "snapshot cannot be folded, replaying full history");
                }
                result => return result.map_err(|e| e.into_error(key)),
            }
        }

        let events = self.load(key, 0).await?;
        if events.is_empty() {
            if had_snapshot {
                return Err(AuditError::CorruptAggregate {
                    key: key.clone(),
                    event_id: None,
                    reason: "snapshot is unreadable and no events remain".into(),
                });
            }
            return Err(AuditError::AggregateNotFound(key.clone()));
        }
        let schema = schema.ok_or_else(|| unregistered(key))?;
        fold(key, schema, None, &events).map_err(|e| e.into_error(key))
    }

    async fn load(
        &self,
        key: &AggregateKey,
        after_sequence: u64,
    ) -> Result<Vec<RecordedEvent>, AuditError> {
        let mut events = self.storage.load_stream(key, after_sequence).await?;
        events.sort_by_key(RecordedEvent::replay_order);
        debug!(after_sequence, loaded = events.len(), "stream loaded");
        Ok(events)
    }
}

fn unregistered(key: &AggregateKey) -> AuditError {
    AuditError::CorruptAggregate {
        key: key.clone(),
        event_id: None,
        reason: format!("no schema registered for aggregate type {:?}", key.aggregate_type),
    }
}

/// Why a fold attempt stopped.
#[derive(Debug)]
enum Unfoldable {
    /// The starting snapshot is unusable; the full history may still fold.
    Snapshot(String),
    /// The event history itself is broken.
    History {
        event_id: Option<EventId>,
        reason: String,
    },
}

impl Unfoldable {
    fn into_error(self, key: &AggregateKey) -> AuditError {
        match self {
            Self::Snapshot(reason) => AuditError::CorruptAggregate {
                key: key.clone(),
                event_id: None,
                reason,
            },
            Self::History { event_id, reason } => AuditError::CorruptAggregate {
                key: key.clone(),
                event_id,
                reason,
            },
        }
    }
}

/// Checks contiguity and folds `events` on top of `snapshot`.
fn fold(
    key: &AggregateKey,
    schema: &dyn AggregateSchema,
    snapshot: Option<&Snapshot>,
    events: &[RecordedEvent],
) -> Result<Reconstruction, Unfoldable> {
    if let (Some(snapshot), Some(first)) = (snapshot, events.first()) {
        if first.sequence != snapshot.through_sequence + 1 {
            // Retention may have purged events the snapshot was built from.
            return Err(Unfoldable::Snapshot(format!(
                "snapshot through {} is followed by sequence {}",
                snapshot.through_sequence, first.sequence
            )));
        }
    }
    for pair in events.windows(2) {
        let expected = pair[0].sequence + 1;
        if pair[1].sequence != expected {
            return Err(Unfoldable::History {
                event_id: Some(pair[1].event_id),
                reason: format!("sequence gap: expected {expected}, found {}", pair[1].sequence),
            });
        }
    }

    let state = schema
        .fold(snapshot.map(|s| &s.snapshot_data), events)
        .map_err(|error| match error {
            FoldError::Snapshot(reason) => Unfoldable::Snapshot(reason),
            FoldError::Payload { event_id, .. } => Unfoldable::History {
                event_id: Some(event_id),
                reason: error.to_string(),
            },
            FoldError::State(_) => Unfoldable::History {
                event_id: None,
                reason: error.to_string(),
            },
        })?;

    let snapshot_sequence = snapshot.map(|s| s.through_sequence);
    let through_sequence = events
        .last()
        .map(|event| event.sequence)
        .or(snapshot_sequence)
        .unwrap_or_default();
    Ok(Reconstruction {
        key: key.clone(),
        state,
        through_sequence,
        snapshot_sequence,
        events_replayed: events.len(),
    })
}
