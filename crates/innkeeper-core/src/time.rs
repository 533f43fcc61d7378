//! Clock abstraction and calendar-month arithmetic.
//!
//! Partition boundaries are aligned to calendar months, so everything here
//! works on a "month index": `year * 12 + (month - 1)`.

use chrono::{DateTime, Datelike, TimeZone, Utc};

/// Abstraction over system time for deterministic behavior.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Month index of the month containing `instant`.
#[must_use]
pub fn month_index(instant: DateTime<Utc>) -> i64 {
    i64::from(instant.year()) * 12 + i64::from(instant.month0())
}

/// Midnight UTC on the first day of the month with the given index.
///
/// Returns `None` outside chrono's representable range.
#[must_use]
pub fn month_start(index: i64) -> Option<DateTime<Utc>> {
    let year = i32::try_from(index.div_euclid(12)).ok()?;
    let month = u32::try_from(index.rem_euclid(12)).ok()? + 1;
    Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).single()
}

/// Shifts `instant` to the start of its month, then by `months`.
#[must_use]
pub fn shift_months(instant: DateTime<Utc>, months: i64) -> Option<DateTime<Utc>> {
    month_start(month_index(instant).checked_add(months)?)
}
