//! Event builders.

use chrono::{DateTime, TimeZone, Utc};
use innkeeper_core::event::{Actor, AggregateKey, NewEvent};

/// A UTC instant from calendar fields, for terse fixtures.
///
/// # Panics
///
/// Panics if the fields do not form a valid date and time.
#[must_use]
pub fn utc(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(year, month, day, hour, minute, 0)
        .single()
        .unwrap_or_else(|| panic!("invalid fixture instant {year}-{month}-{day} {hour}:{minute}"))
}

/// A version 1 event with an empty-object payload, produced by the
/// `test-suite` system actor.
#[must_use]
pub fn event_at(
    aggregate_type: &str,
    aggregate_id: &str,
    event_type: &str,
    occurred_at: DateTime<Utc>,
) -> NewEvent {
    NewEvent::new(
        AggregateKey::new(aggregate_type, aggregate_id),
        event_type,
        serde_json::json!({}),
        occurred_at,
        Actor::system("test-suite"),
    )
}
