//! Audit events for the reservation aggregate.
//!
//! Each variant has one decoder per stored schema version. Older versions are
//! upcast into the current payload shape while decoding, so the fold only ever
//! sees current payloads.

use chrono::{DateTime, NaiveDate, Utc};
use innkeeper_core::event::{Actor, AggregateKey, NewEvent};
use innkeeper_core::payload::{PayloadError, VersionedPayload, decode_as, unsupported};
use serde::{Deserialize, Serialize};

/// Aggregate type under which reservations are stored.
pub const AGGREGATE_TYPE: &str = "reservation";

/// Emitted when a booking is placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCreated {
    /// Guest holding the reservation.
    pub guest_id: String,
    /// Property the room belongs to.
    pub property_id: String,
    /// Booked room type.
    pub room_type_id: String,
    /// Arrival date.
    pub check_in: NaiveDate,
    /// Departure date.
    pub check_out: NaiveDate,
    /// Sales channel (`direct`, an OTA code, …). Added in v2.
    pub channel: String,
    /// Quoted total in minor units. Added in v2.
    pub total_amount_cents: Option<i64>,
}

/// Schema v1 of `reservation.created`, before channel attribution existed.
#[derive(Debug, Deserialize)]
struct ReservationCreatedV1 {
    guest_id: String,
    property_id: String,
    room_type_id: String,
    check_in: NaiveDate,
    check_out: NaiveDate,
}

impl From<ReservationCreatedV1> for ReservationCreated {
    fn from(v1: ReservationCreatedV1) -> Self {
        Self {
            guest_id: v1.guest_id,
            property_id: v1.property_id,
            room_type_id: v1.room_type_id,
            check_in: v1.check_in,
            check_out: v1.check_out,
            channel: "direct".to_owned(),
            total_amount_cents: None,
        }
    }
}

/// Emitted when the property accepts the booking.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ReservationConfirmed {
    /// Code shared with the guest.
    #[serde(default)]
    pub confirmation_code: Option<String>,
}

/// Emitted when stay dates or room type change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationModified {
    /// New arrival date.
    pub check_in: NaiveDate,
    /// New departure date.
    pub check_out: NaiveDate,
    /// New room type, if changed.
    #[serde(default)]
    pub room_type_id: Option<String>,
}

/// Emitted at front-desk check-in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuestCheckedIn {
    /// Assigned room.
    pub room_number: String,
}

/// Emitted when the booking is cancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCancelled {
    /// Free-text reason.
    pub reason: String,
}

/// Event payload variants for the reservation aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReservationEvent {
    /// The booking was placed.
    Created(ReservationCreated),
    /// The booking was confirmed.
    Confirmed(ReservationConfirmed),
    /// The stay was changed.
    Modified(ReservationModified),
    /// The guest checked in.
    CheckedIn(GuestCheckedIn),
    /// The guest checked out.
    CheckedOut,
    /// The booking was cancelled.
    Cancelled(ReservationCancelled),
}

impl ReservationEvent {
    /// Dot-namespaced event type.
    #[must_use]
    pub const fn event_type(&self) -> &'static str {
        match self {
            Self::Created(_) => "reservation.created",
            Self::Confirmed(_) => "reservation.confirmed",
            Self::Modified(_) => "reservation.modified",
            Self::CheckedIn(_) => "reservation.checked_in",
            Self::CheckedOut => "reservation.checked_out",
            Self::Cancelled(_) => "reservation.cancelled",
        }
    }

    /// Schema version written for this variant.
    #[must_use]
    pub const fn event_version(&self) -> u32 {
        match self {
            Self::Created(_) => 2,
            _ => 1,
        }
    }

    /// Whether the payload carries guest personal data.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(self, Self::Created(_) | Self::CheckedIn(_))
    }

    /// Serializes the payload at its current version.
    #[must_use]
    pub fn to_payload(&self) -> serde_json::Value {
        // Serializing plain derived structs to a Value cannot fail.
        let encoded = match self {
            Self::Created(p) => serde_json::to_value(p),
            Self::Confirmed(p) => serde_json::to_value(p),
            Self::Modified(p) => serde_json::to_value(p),
            Self::CheckedIn(p) => serde_json::to_value(p),
            Self::CheckedOut => Ok(serde_json::json!({})),
            Self::Cancelled(p) => serde_json::to_value(p),
        };
        encoded.unwrap_or(serde_json::Value::Null)
    }

    /// Wraps this payload into an event ready for `append`.
    #[must_use]
    pub fn into_new_event(
        self,
        reservation_id: &str,
        occurred_at: DateTime<Utc>,
        actor: Actor,
    ) -> NewEvent {
        let event = NewEvent::new(
            AggregateKey::new(AGGREGATE_TYPE, reservation_id),
            self.event_type(),
            self.to_payload(),
            occurred_at,
            actor,
        )
        .with_version(self.event_version());
        if self.is_sensitive() {
            event.sensitive()
        } else {
            event
        }
    }
}

impl VersionedPayload for ReservationEvent {
    fn decode(
        event_type: &str,
        event_version: u32,
        data: &serde_json::Value,
    ) -> Result<Self, PayloadError> {
        match (event_type, event_version) {
            ("reservation.created", 1) => Ok(Self::Created(
                decode_as::<ReservationCreatedV1>(event_type, event_version, data)?.into(),
            )),
            ("reservation.created", 2) => {
                Ok(Self::Created(decode_as(event_type, event_version, data)?))
            }
            ("reservation.confirmed", 1) => {
                Ok(Self::Confirmed(decode_as(event_type, event_version, data)?))
            }
            ("reservation.modified", 1) => {
                Ok(Self::Modified(decode_as(event_type, event_version, data)?))
            }
            ("reservation.checked_in", 1) => {
                Ok(Self::CheckedIn(decode_as(event_type, event_version, data)?))
            }
            ("reservation.checked_out", 1) => Ok(Self::CheckedOut),
            ("reservation.cancelled", 1) => {
                Ok(Self::Cancelled(decode_as(event_type, event_version, data)?))
            }
            (
                "reservation.created"
                | "reservation.confirmed"
                | "reservation.modified"
                | "reservation.checked_in"
                | "reservation.checked_out"
                | "reservation.cancelled",
                version,
            ) => Err(unsupported(event_type, version)),
            (other, _) => Err(PayloadError::UnknownEventType(other.to_owned())),
        }
    }
}
