//! Shared test clocks, fault injection and event builders for Innkeeper.

mod clock;
mod events;
mod storage;

pub use clock::{FixedClock, ManualClock};
pub use events::{event_at, utc};
pub use storage::{Fault, FaultyStorage};
