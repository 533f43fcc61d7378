//! Aggregate abstraction and the schema registry.
//!
//! An [`Aggregate`] is a typed fold over its decoded events. The store itself
//! is heterogeneous, so each aggregate type is registered behind the
//! type-erased [`AggregateSchema`], which validates payloads on append and
//! folds JSON state on replay.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::event::{EventId, RecordedEvent};
use crate::payload::{PayloadError, VersionedPayload};

/// Trait for aggregates that reconstitute from event history.
pub trait Aggregate: Default + Serialize + DeserializeOwned + Send + Sync + 'static {
    /// The `aggregate_type` this state belongs to.
    const AGGREGATE_TYPE: &'static str;

    /// Every payload this aggregate consumes.
    type Event: VersionedPayload;

    /// Apply one decoded event to the state.
    fn apply(&mut self, event: &Self::Event);

    /// Called in place of [`Aggregate::apply`] for an event whose payload was
    /// redacted by retention enforcement.
    fn apply_redacted(&mut self, _event_type: &str) {}
}

/// Failure while folding an event stream.
#[derive(Debug, Error)]
pub enum FoldError {
    /// An event payload could not be decoded.
    #[error("event {event_id} cannot be decoded: {source}")]
    Payload {
        /// The offending event.
        event_id: EventId,
        /// Decoder failure.
        #[source]
        source: PayloadError,
    },

    /// The snapshot state does not deserialize into the aggregate.
    #[error("snapshot state cannot be decoded: {0}")]
    Snapshot(String),

    /// The folded state could not be encoded.
    #[error("state cannot be encoded: {0}")]
    State(String),
}

/// Type-erased view of an aggregate, as held by the store.
pub trait AggregateSchema: Send + Sync {
    /// The aggregate type this schema answers for.
    fn aggregate_type(&self) -> &'static str;

    /// Checks that a payload decodes under its declared type and version.
    ///
    /// # Errors
    ///
    /// Returns the decoder's `PayloadError`.
    fn check_payload(
        &self,
        event_type: &str,
        event_version: u32,
        data: &serde_json::Value,
    ) -> Result<(), PayloadError>;

    /// Folds `events` (already in replay order) on top of `snapshot`, or on
    /// top of the default state when there is no snapshot.
    ///
    /// # Errors
    ///
    /// Returns `FoldError` if the snapshot or any payload cannot be decoded.
    fn fold(
        &self,
        snapshot: Option<&serde_json::Value>,
        events: &[RecordedEvent],
    ) -> Result<serde_json::Value, FoldError>;
}

/// Adapter exposing a typed [`Aggregate`] as an [`AggregateSchema`].
pub struct TypedSchema<A>(PhantomData<fn() -> A>);

impl<A> TypedSchema<A> {
    /// Creates the adapter.
    #[must_use]
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<A> Default for TypedSchema<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: Aggregate> TypedSchema<A> {
    /// Folds into the typed state.
    ///
    /// # Errors
    ///
    /// Returns `FoldError` if the snapshot or any payload cannot be decoded.
    pub fn fold_typed(
        snapshot: Option<&serde_json::Value>,
        events: &[RecordedEvent],
    ) -> Result<A, FoldError> {
        let mut state = match snapshot {
            Some(data) => A::deserialize(data).map_err(|e| FoldError::Snapshot(e.to_string()))?,
            None => A::default(),
        };
        for event in events {
            if event.is_redacted() {
                state.apply_redacted(&event.event_type);
                continue;
            }
            let payload = A::Event::decode(&event.event_type, event.event_version, &event.event_data)
                .map_err(|source| FoldError::Payload {
                    event_id: event.event_id,
                    source,
                })?;
            state.apply(&payload);
        }
        Ok(state)
    }
}

impl<A: Aggregate> AggregateSchema for TypedSchema<A> {
    fn aggregate_type(&self) -> &'static str {
        A::AGGREGATE_TYPE
    }

    fn check_payload(
        &self,
        event_type: &str,
        event_version: u32,
        data: &serde_json::Value,
    ) -> Result<(), PayloadError> {
        A::Event::decode(event_type, event_version, data).map(|_| ())
    }

    fn fold(
        &self,
        snapshot: Option<&serde_json::Value>,
        events: &[RecordedEvent],
    ) -> Result<serde_json::Value, FoldError> {
        let state = Self::fold_typed(snapshot, events)?;
        serde_json::to_value(&state).map_err(|e| FoldError::State(e.to_string()))
    }
}

/// Registered aggregate schemas, keyed by `aggregate_type`.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<&'static str, Arc<dyn AggregateSchema>>,
}

impl SchemaRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a typed aggregate, replacing any schema with the same type.
    #[must_use]
    pub fn with<A: Aggregate>(mut self) -> Self {
        self.register(Arc::new(TypedSchema::<A>::new()));
        self
    }

    /// Registers a schema, replacing any schema with the same type.
    pub fn register(&mut self, schema: Arc<dyn AggregateSchema>) {
        self.schemas.insert(schema.aggregate_type(), schema);
    }

    /// Looks up the schema for `aggregate_type`.
    #[must_use]
    pub fn get(&self, aggregate_type: &str) -> Option<&dyn AggregateSchema> {
        self.schemas.get(aggregate_type).map(AsRef::as_ref)
    }

    /// Registered aggregate types, sorted.
    #[must_use]
    pub fn aggregate_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.schemas.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("aggregate_types", &self.aggregate_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Actor, AggregateKey, NewEvent};
    use crate::payload::decode_as;
    use chrono::{TimeZone, Utc};
    use serde::Deserialize;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Tally {
        total: i64,
        redactions: u32,
    }

    #[derive(Debug, Deserialize)]
    struct Added {
        by: i64,
    }

    enum TallyEvent {
        Added(Added),
    }

    impl VersionedPayload for TallyEvent {
        fn decode(
            event_type: &str,
            event_version: u32,
            data: &serde_json::Value,
        ) -> Result<Self, PayloadError> {
            match (event_type, event_version) {
                ("tally.added", 1) => Ok(Self::Added(decode_as(event_type, event_version, data)?)),
                ("tally.added", v) => Err(crate::payload::unsupported(event_type, v)),
                (other, _) => Err(PayloadError::UnknownEventType(other.to_owned())),
            }
        }
    }

    impl Aggregate for Tally {
        const AGGREGATE_TYPE: &'static str = "tally";
        type Event = TallyEvent;

        fn apply(&mut self, event: &Self::Event) {
            match event {
                TallyEvent::Added(added) => self.total += added.by,
            }
        }

        fn apply_redacted(&mut self, _event_type: &str) {
            self.redactions += 1;
        }
    }

    fn added(sequence: u64, by: i64) -> RecordedEvent {
        let at = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        NewEvent::new(
            AggregateKey::new("tally", "T1"),
            "tally.added",
            serde_json::json!({ "by": by }),
            at,
            Actor::system("test"),
        )
        .into_recorded(EventId::generate(), at, sequence)
    }

    #[test]
    fn test_fold_from_default_state() {
        // Arrange
        let schema = TypedSchema::<Tally>::new();
        let events = vec![added(1, 2), added(2, 5)];

        // Act
        let state = schema.fold(None, &events).unwrap();

        // Assert
        assert_eq!(state, serde_json::json!({"total": 7, "redactions": 0}));
    }

    #[test]
    fn test_fold_on_top_of_snapshot_matches_full_fold() {
        // Arrange
        let schema = TypedSchema::<Tally>::new();
        let events = vec![added(1, 2), added(2, 5), added(3, 11)];
        let snapshot = schema.fold(None, &events[..2]).unwrap();

        // Act
        let from_snapshot = schema.fold(Some(&snapshot), &events[2..]).unwrap();
        let full = schema.fold(None, &events).unwrap();

        // Assert
        assert_eq!(from_snapshot, full);
    }

    #[test]
    fn test_fold_reports_offending_event() {
        // Arrange
        let schema = TypedSchema::<Tally>::new();
        let mut bad = added(1, 1);
        bad.event_version = 9;
        let bad_id = bad.event_id;

        // Act
        let result = schema.fold(None, &[bad]);

        // Assert
        match result {
            Err(FoldError::Payload { event_id, source }) => {
                assert_eq!(event_id, bad_id);
                assert!(matches!(source, PayloadError::UnsupportedVersion { version: 9, .. }));
            }
            other => panic!("expected Payload error, got {other:?}"),
        }
    }

    #[test]
    fn test_fold_skips_redacted_payloads() {
        let schema = TypedSchema::<Tally>::new();
        let mut redacted = added(2, 100);
        redacted.redact(redacted.recorded_at);

        let state = schema.fold(None, &[added(1, 3), redacted]).unwrap();

        assert_eq!(state, serde_json::json!({"total": 3, "redactions": 1}));
    }

    #[test]
    fn test_fold_rejects_undecodable_snapshot() {
        let schema = TypedSchema::<Tally>::new();
        let result = schema.fold(Some(&serde_json::json!("not a tally")), &[]);
        assert!(matches!(result, Err(FoldError::Snapshot(_))));
    }

    #[test]
    fn test_registry_lookup_by_aggregate_type() {
        let registry = SchemaRegistry::new().with::<Tally>();

        assert!(registry.get("tally").is_some());
        assert!(registry.get("guest").is_none());
        assert_eq!(registry.aggregate_types(), vec!["tally"]);
    }
}
