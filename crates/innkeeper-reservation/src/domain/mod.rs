//! Reservation domain model.

pub mod aggregates;
pub mod events;
