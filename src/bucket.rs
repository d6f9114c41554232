//! Ten-minute time bucketing.
//!
//! Readings are assigned to the window boundary that follows them: a reading
//! at `t` lands in the bucket `600 * (floor(t / 600) + 1)`, so a reading taken
//! exactly on a boundary rolls forward to the next one.

use crate::error::{Error, Result};
use chrono::{NaiveDate, NaiveTime};

/// Width of one bucket in seconds.
pub const BUCKET_SECONDS: i64 = 600;

/// Drops any sub-minute component (`"00:09:59.5"` becomes `"00:09"`).
pub fn truncate_to_minute(time: &str) -> &str {
    match time.match_indices(':').nth(1) {
        Some((idx, _)) => &time[..idx],
        None => time,
    }
}

/// Returns the bucket boundary for a Unix timestamp in seconds.
pub fn bucket_of(timestamp: i64) -> i64 {
    BUCKET_SECONDS * (timestamp.div_euclid(BUCKET_SECONDS) + 1)
}

/// Maps a UTC `YYYY-MM-DD` date and `HH:MM` time to its bucket boundary.
///
/// # Errors
///
/// Returns [`Error::Field`] if either string is malformed.
pub fn bucket(date: &str, time: &str) -> Result<i64> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d").map_err(|_| Error::Field {
        field: "date",
        value: date.to_string(),
        line: None,
    })?;
    let minute = NaiveTime::parse_from_str(time, "%H:%M").map_err(|_| Error::Field {
        field: "time",
        value: time.to_string(),
        line: None,
    })?;

    Ok(bucket_of(day.and_time(minute).and_utc().timestamp()))
}
