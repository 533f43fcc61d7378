//! Innkeeper reservation aggregate.
//!
//! Defines the `reservation.*` audit events, their per-version decoders and
//! the fold that reconstructs a reservation's current state.

pub mod domain;

pub use domain::aggregates::{Reservation, ReservationStatus};
pub use domain::events::ReservationEvent;
