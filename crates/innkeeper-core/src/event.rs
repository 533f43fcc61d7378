//! Audit event record model.
//!
//! A [`NewEvent`] is what producers hand to the append pipeline. Once it has
//! been sequenced and durably written it becomes a [`RecordedEvent`], which is
//! never mutated again except for retention redaction.

use std::fmt;
use std::net::IpAddr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Globally unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(Uuid);

impl EventId {
    /// Generates a new time-ordered (UUID v7) identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7())
    }

    /// Wraps an existing UUID, e.g. one supplied by a client for idempotent retries.
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl From<Uuid> for EventId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Identifies the entity an event applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AggregateKey {
    /// Kind of aggregate, e.g. `reservation`.
    pub aggregate_type: String,
    /// Identifier of the aggregate instance.
    pub aggregate_id: String,
}

impl AggregateKey {
    /// Creates a new key.
    #[must_use]
    pub fn new(aggregate_type: impl Into<String>, aggregate_id: impl Into<String>) -> Self {
        Self {
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
        }
    }
}

impl fmt::Display for AggregateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.aggregate_type, self.aggregate_id)
    }
}

/// What kind of principal produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// An authenticated end user or staff member.
    User,
    /// An internal service or scheduled job.
    System,
    /// A partner integration authenticated with an API key.
    ApiKey,
}

impl ActorKind {
    /// Stable storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::System => "system",
            Self::ApiKey => "api_key",
        }
    }

    /// Parses the storage representation produced by [`ActorKind::as_str`].
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "user" => Some(Self::User),
            "system" => Some(Self::System),
            "api_key" => Some(Self::ApiKey),
            _ => None,
        }
    }
}

/// Who or what produced an event, plus origin metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    /// Principal kind.
    pub kind: ActorKind,
    /// Principal identifier (user id, service name, key id).
    pub id: String,
    /// Originating IP address, when known.
    pub ip_address: Option<IpAddr>,
    /// Originating user agent, when known.
    pub user_agent: Option<String>,
}

impl Actor {
    /// An actor with no origin metadata.
    #[must_use]
    pub fn new(kind: ActorKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            ip_address: None,
            user_agent: None,
        }
    }

    /// Shorthand for an internal system actor.
    #[must_use]
    pub fn system(id: impl Into<String>) -> Self {
        Self::new(ActorKind::System, id)
    }

    /// Shorthand for a user actor.
    #[must_use]
    pub fn user(id: impl Into<String>) -> Self {
        Self::new(ActorKind::User, id)
    }

    /// Attaches the originating IP address.
    #[must_use]
    pub fn with_ip(mut self, ip: IpAddr) -> Self {
        self.ip_address = Some(ip);
        self
    }

    /// Attaches the originating user agent.
    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }
}

/// An event as submitted by a producer, before sequencing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEvent {
    /// Client-generated id for idempotent retries; generated when absent.
    pub event_id: Option<EventId>,
    /// Dot-namespaced type, e.g. `reservation.created`.
    pub event_type: String,
    /// The aggregate this event applies to.
    pub key: AggregateKey,
    /// Payload, decoded according to `event_type` and `event_version`.
    pub event_data: serde_json::Value,
    /// Schema version of `event_data`.
    pub event_version: u32,
    /// Ties together events from one logical operation.
    pub correlation_id: Uuid,
    /// The event that triggered this one, if any.
    pub causation_id: Option<EventId>,
    /// Business time of the change.
    pub occurred_at: DateTime<Utc>,
    /// Ingestion time; assigned by the pipeline when absent.
    pub recorded_at: Option<DateTime<Utc>>,
    /// Producer of the event.
    pub actor: Actor,
    /// Compliance deadline after which the event may be purged or redacted.
    pub retention_until: Option<DateTime<Utc>>,
    /// Whether the payload holds personal or otherwise sensitive data.
    pub is_sensitive: bool,
}

impl NewEvent {
    /// Creates a version 1 event with a fresh correlation id and no compliance flags.
    #[must_use]
    pub fn new(
        key: AggregateKey,
        event_type: impl Into<String>,
        event_data: serde_json::Value,
        occurred_at: DateTime<Utc>,
        actor: Actor,
    ) -> Self {
        Self {
            event_id: None,
            event_type: event_type.into(),
            key,
            event_data,
            event_version: 1,
            correlation_id: Uuid::now_v7(),
            causation_id: None,
            occurred_at,
            recorded_at: None,
            actor,
            retention_until: None,
            is_sensitive: false,
        }
    }

    /// Sets a client-generated event id.
    #[must_use]
    pub fn with_event_id(mut self, event_id: EventId) -> Self {
        self.event_id = Some(event_id);
        self
    }

    /// Sets the payload schema version.
    #[must_use]
    pub fn with_version(mut self, event_version: u32) -> Self {
        self.event_version = event_version;
        self
    }

    /// Sets the correlation id.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Links this event to the event that caused it.
    #[must_use]
    pub fn caused_by(mut self, causation_id: EventId) -> Self {
        self.causation_id = Some(causation_id);
        self
    }

    /// Pins the ingestion timestamp instead of letting the pipeline assign it.
    #[must_use]
    pub fn with_recorded_at(mut self, recorded_at: DateTime<Utc>) -> Self {
        self.recorded_at = Some(recorded_at);
        self
    }

    /// Sets the retention deadline.
    #[must_use]
    pub fn retain_until(mut self, retention_until: DateTime<Utc>) -> Self {
        self.retention_until = Some(retention_until);
        self
    }

    /// Flags the payload as sensitive.
    #[must_use]
    pub fn sensitive(mut self) -> Self {
        self.is_sensitive = true;
        self
    }

    /// Converts into the stored form once the pipeline has assigned identity,
    /// ingestion time and stream position.
    #[must_use]
    pub fn into_recorded(
        self,
        event_id: EventId,
        recorded_at: DateTime<Utc>,
        sequence: u64,
    ) -> RecordedEvent {
        RecordedEvent {
            event_id,
            event_type: self.event_type,
            key: self.key,
            event_data: self.event_data,
            event_version: self.event_version,
            correlation_id: self.correlation_id,
            causation_id: self.causation_id,
            occurred_at: self.occurred_at,
            recorded_at,
            sequence,
            actor: self.actor,
            retention_until: self.retention_until,
            is_sensitive: self.is_sensitive,
            redacted_at: None,
        }
    }
}

/// A durably stored event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    /// Unique event identifier.
    pub event_id: EventId,
    /// Dot-namespaced event type.
    pub event_type: String,
    /// The aggregate this event applies to.
    pub key: AggregateKey,
    /// Payload; JSON `null` once redacted.
    pub event_data: serde_json::Value,
    /// Schema version of `event_data`.
    pub event_version: u32,
    /// Correlation ID for tracing a logical operation.
    pub correlation_id: Uuid,
    /// Causing event, if any.
    pub causation_id: Option<EventId>,
    /// Business time of the change.
    pub occurred_at: DateTime<Utc>,
    /// Ingestion time; determines the partition.
    pub recorded_at: DateTime<Utc>,
    /// 1-based position within the aggregate stream.
    pub sequence: u64,
    /// Producer of the event.
    pub actor: Actor,
    /// Compliance deadline.
    pub retention_until: Option<DateTime<Utc>>,
    /// Whether the payload is sensitive.
    pub is_sensitive: bool,
    /// When the payload was redacted by retention enforcement.
    pub redacted_at: Option<DateTime<Utc>>,
}

impl RecordedEvent {
    /// Whether retention enforcement has removed the payload.
    #[must_use]
    pub const fn is_redacted(&self) -> bool {
        self.redacted_at.is_some()
    }

    /// Whether the retention deadline has passed at `now`. Events without a
    /// deadline never expire.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.retention_until.is_some_and(|until| until <= now)
    }

    /// Whether the sweep at `now` should strip this event's payload.
    #[must_use]
    pub fn is_redactable(&self, now: DateTime<Utc>) -> bool {
        self.is_sensitive && !self.is_redacted() && self.is_expired(now)
    }

    /// Deterministic replay ordering key.
    #[must_use]
    pub fn replay_order(&self) -> (DateTime<Utc>, u64, EventId) {
        (self.recorded_at, self.sequence, self.event_id)
    }

    /// Removes the payload while keeping all metadata.
    pub fn redact(&mut self, redacted_at: DateTime<Utc>) {
        self.event_data = serde_json::Value::Null;
        self.redacted_at = Some(redacted_at);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn sample(now: DateTime<Utc>) -> RecordedEvent {
        NewEvent::new(
            AggregateKey::new("reservation", "R1"),
            "reservation.created",
            serde_json::json!({"guest_id": "G1"}),
            now,
            Actor::system("booking-engine"),
        )
        .into_recorded(EventId::generate(), now, 1)
    }

    #[test]
    fn test_aggregate_key_displays_type_and_id() {
        let key = AggregateKey::new("reservation", "R1");
        assert_eq!(key.to_string(), "reservation/R1");
    }

    #[test]
    fn test_actor_kind_round_trips_through_storage_form() {
        for kind in [ActorKind::User, ActorKind::System, ActorKind::ApiKey] {
            assert_eq!(ActorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ActorKind::parse("robot"), None);
    }

    #[test]
    fn test_event_without_retention_never_expires() {
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let event = sample(now);
        assert!(!event.is_expired(now + Duration::days(36_500)));
    }

    #[test]
    fn test_retention_deadline_is_inclusive() {
        // Arrange
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let mut event = sample(now);
        event.retention_until = Some(now);
        event.is_sensitive = true;

        // Assert
        assert!(event.is_expired(now));
        assert!(event.is_redactable(now));
        assert!(!event.is_expired(now - Duration::seconds(1)));
    }

    #[test]
    fn test_redact_keeps_metadata() {
        // Arrange
        let now = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let cause = EventId::generate();
        let mut event = sample(now);
        event.causation_id = Some(cause);
        let id = event.event_id;

        // Act
        event.redact(now);

        // Assert
        assert!(event.is_redacted());
        assert_eq!(event.event_data, serde_json::Value::Null);
        assert_eq!(event.event_id, id);
        assert_eq!(event.causation_id, Some(cause));
        assert!(!event.is_redactable(now));
    }

    #[test]
    fn test_generated_event_ids_are_unique() {
        let a = EventId::generate();
        let b = EventId::generate();
        assert_ne!(a, b);
    }
}
