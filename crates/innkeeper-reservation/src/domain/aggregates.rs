//! Reservation aggregate state.

use chrono::NaiveDate;
use innkeeper_core::aggregate::Aggregate;
use serde::{Deserialize, Serialize};

use super::events::{AGGREGATE_TYPE, ReservationEvent};

/// Lifecycle status of a reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Placed but not yet accepted by the property.
    #[default]
    Pending,
    /// Accepted by the property.
    Confirmed,
    /// Guest is in house.
    CheckedIn,
    /// Stay completed.
    CheckedOut,
    /// Booking cancelled.
    Cancelled,
}

impl ReservationStatus {
    /// Status implied by an event type alone, used when a payload has been
    /// redacted and only metadata survives.
    #[must_use]
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "reservation.created" => Some(Self::Pending),
            "reservation.confirmed" => Some(Self::Confirmed),
            "reservation.checked_in" => Some(Self::CheckedIn),
            "reservation.checked_out" => Some(Self::CheckedOut),
            "reservation.cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Current state of one reservation, reconstructed from its audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Reservation {
    /// Lifecycle status.
    pub status: ReservationStatus,
    /// Guest holding the reservation.
    pub guest_id: Option<String>,
    /// Property of the booked room.
    pub property_id: Option<String>,
    /// Booked room type.
    pub room_type_id: Option<String>,
    /// Arrival date.
    pub check_in: Option<NaiveDate>,
    /// Departure date.
    pub check_out: Option<NaiveDate>,
    /// Sales channel.
    pub channel: Option<String>,
    /// Quoted total in minor units.
    pub total_amount_cents: Option<i64>,
    /// Code shared with the guest on confirmation.
    pub confirmation_code: Option<String>,
    /// Room assigned at check-in.
    pub room_number: Option<String>,
    /// Reason given on cancellation.
    pub cancellation_reason: Option<String>,
    /// Number of events folded.
    pub version: u64,
    /// Number of folded events whose payload was redacted.
    pub redacted_events: u64,
}

impl Reservation {
    /// Length of stay in nights, when both dates are known.
    #[must_use]
    pub fn nights(&self) -> Option<i64> {
        Some((self.check_out? - self.check_in?).num_days())
    }
}

impl Aggregate for Reservation {
    const AGGREGATE_TYPE: &'static str = AGGREGATE_TYPE;
    type Event = ReservationEvent;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReservationEvent::Created(payload) => {
                self.status = ReservationStatus::Pending;
                self.guest_id = Some(payload.guest_id.clone());
                self.property_id = Some(payload.property_id.clone());
                self.room_type_id = Some(payload.room_type_id.clone());
                self.check_in = Some(payload.check_in);
                self.check_out = Some(payload.check_out);
                self.channel = Some(payload.channel.clone());
                self.total_amount_cents = payload.total_amount_cents;
            }
            ReservationEvent::Confirmed(payload) => {
                self.status = ReservationStatus::Confirmed;
                self.confirmation_code.clone_from(&payload.confirmation_code);
            }
            ReservationEvent::Modified(payload) => {
                self.check_in = Some(payload.check_in);
                self.check_out = Some(payload.check_out);
                if let Some(room_type_id) = &payload.room_type_id {
                    self.room_type_id = Some(room_type_id.clone());
                }
            }
            ReservationEvent::CheckedIn(payload) => {
                self.status = ReservationStatus::CheckedIn;
                self.room_number = Some(payload.room_number.clone());
            }
            ReservationEvent::CheckedOut => {
                self.status = ReservationStatus::CheckedOut;
            }
            ReservationEvent::Cancelled(payload) => {
                self.status = ReservationStatus::Cancelled;
                self.cancellation_reason = Some(payload.reason.clone());
            }
        }
        self.version += 1;
    }

    fn apply_redacted(&mut self, event_type: &str) {
        if let Some(status) = ReservationStatus::from_event_type(event_type) {
            self.status = status;
        }
        self.version += 1;
        self.redacted_events += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::{
        GuestCheckedIn, ReservationCancelled, ReservationConfirmed, ReservationCreated,
    };

    fn created() -> ReservationEvent {
        ReservationEvent::Created(ReservationCreated {
            guest_id: "G1".into(),
            property_id: "P1".into(),
            room_type_id: "KING".into(),
            check_in: NaiveDate::from_ymd_opt(2026, 11, 2).unwrap(),
            check_out: NaiveDate::from_ymd_opt(2026, 11, 5).unwrap(),
            channel: "direct".into(),
            total_amount_cents: Some(54_000),
        })
    }

    #[test]
    fn test_created_then_confirmed_is_confirmed() {
        // Arrange
        let mut reservation = Reservation::default();

        // Act
        reservation.apply(&created());
        reservation.apply(&ReservationEvent::Confirmed(ReservationConfirmed {
            confirmation_code: Some("HX42".into()),
        }));

        // Assert
        assert_eq!(reservation.status, ReservationStatus::Confirmed);
        assert_eq!(reservation.confirmation_code.as_deref(), Some("HX42"));
        assert_eq!(reservation.nights(), Some(3));
        assert_eq!(reservation.version, 2);
    }

    #[test]
    fn test_full_stay_lifecycle() {
        let mut reservation = Reservation::default();

        reservation.apply(&created());
        reservation.apply(&ReservationEvent::CheckedIn(GuestCheckedIn {
            room_number: "412".into(),
        }));
        reservation.apply(&ReservationEvent::CheckedOut);

        assert_eq!(reservation.status, ReservationStatus::CheckedOut);
        assert_eq!(reservation.room_number.as_deref(), Some("412"));
    }

    #[test]
    fn test_cancellation_records_reason() {
        let mut reservation = Reservation::default();

        reservation.apply(&created());
        reservation.apply(&ReservationEvent::Cancelled(ReservationCancelled {
            reason: "guest request".into(),
        }));

        assert_eq!(reservation.status, ReservationStatus::Cancelled);
        assert_eq!(
            reservation.cancellation_reason.as_deref(),
            Some("guest request")
        );
    }

    #[test]
    fn test_redacted_event_still_moves_status() {
        // Arrange
        let mut reservation = Reservation::default();
        reservation.apply(&created());

        // Act
        reservation.apply_redacted("reservation.checked_in");

        // Assert
        assert_eq!(reservation.status, ReservationStatus::CheckedIn);
        assert_eq!(reservation.room_number, None);
        assert_eq!(reservation.version, 2);
        assert_eq!(reservation.redacted_events, 1);
    }

    #[test]
    fn test_status_serializes_in_snake_case() {
        let value = serde_json::to_value(ReservationStatus::CheckedIn).unwrap();
        assert_eq!(value, serde_json::json!("checked_in"));
    }
}
