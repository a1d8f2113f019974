//! Time-related utilities.

use chrono::{DateTime, TimeZone, Utc};

/// Convert a Unix timestamp (seconds) into a UTC `DateTime`.
///
/// Returns `None` when the value is outside the range chrono can represent.
pub fn unix_seconds_to_datetime(seconds: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(seconds, 0).single()
}
