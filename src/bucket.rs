//! Time-of-day bucketing for historical readings.
//!
//! Readings are stamped in local civil time (no UTC offset is stored), so
//! bucketing works directly on the wall clock: a day is split into 96
//! fifteen-minute slots and each timestamp also yields its calendar weekday.
//! Both mappings are pure; "now" only enters through [`local_now`].

use chrono::{DateTime, Datelike, NaiveDateTime, NaiveTime, TimeZone, Timelike, Weekday};
use chrono_tz::Tz;

use crate::error::{PipelineError, Result};

/// Width of one bucket in minutes.
pub const BUCKET_MINUTES: u32 = 15;

/// Number of buckets in a civil day.
pub const BUCKETS_PER_DAY: u8 = (24 * 60 / BUCKET_MINUTES) as u8;

/// On-disk timestamp layout (minute precision, local time).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

/// Index of a fifteen-minute slot, in `[0, BUCKETS_PER_DAY)`.
pub type BucketIndex = u8;

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

// ---

/// Parse a stored timestamp.
///
/// Accepts `YYYY-MM-DD HH:MM` and, for rows written by older tooling,
/// `YYYY-MM-DD HH:MM:SS` (seconds are dropped). Anything else is a
/// [`PipelineError::MalformedTimestamp`].
pub fn parse_timestamp(raw: &str) -> Result<NaiveDateTime> {
    // ---
    let trimmed = raw.trim();
    NaiveDateTime::parse_from_str(trimmed, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
        .map(truncate_to_minute)
        .map_err(|_| PipelineError::MalformedTimestamp(raw.to_string()))
}

/// Render a timestamp in the on-disk layout.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Drop seconds and sub-second precision.
pub fn truncate_to_minute(ts: NaiveDateTime) -> NaiveDateTime {
    // ---
    match NaiveTime::from_hms_opt(ts.hour(), ts.minute(), 0) {
        Some(time) => ts.date().and_time(time),
        None => ts,
    }
}

/// Current civil time in `tz`, truncated to the minute.
pub fn local_now(tz: Tz) -> NaiveDateTime {
    local_time_of(chrono::Utc::now(), tz)
}

/// Civil time in `tz` for an absolute instant, truncated to the minute.
///
/// During a DST fall-back the repeated hour maps to the same civil minutes,
/// so both passes land in the same buckets.
pub fn local_time_of<Z: TimeZone>(instant: DateTime<Z>, tz: Tz) -> NaiveDateTime {
    truncate_to_minute(instant.with_timezone(&tz).naive_local())
}

/// Fifteen-minute slot of the day for `ts`: `floor((hour * 60 + minute) / 15)`.
pub fn bucket_of(ts: &NaiveDateTime) -> BucketIndex {
    // ---
    let minutes = ts.hour() * 60 + ts.minute();
    (minutes / BUCKET_MINUTES) as BucketIndex
}

/// Start-of-slot label such as `"08:15"`, or `None` outside the day.
pub fn bucket_label(index: BucketIndex) -> Option<String> {
    // ---
    if index >= BUCKETS_PER_DAY {
        return None;
    }
    let minutes = u32::from(index) * BUCKET_MINUTES;
    Some(format!("{:02}:{:02}", minutes / 60, minutes % 60))
}

/// Calendar weekday of the civil date of `ts`.
pub fn weekday_of(ts: &NaiveDateTime) -> Weekday {
    ts.weekday()
}

/// Canonical English label (`"Monday"` … `"Sunday"`).
pub fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Inverse of [`weekday_label`], case-insensitive.
pub fn parse_weekday_label(label: &str) -> Option<Weekday> {
    // ---
    let wanted = label.trim();
    WEEKDAYS
        .into_iter()
        .find(|d| weekday_label(*d).eq_ignore_ascii_case(wanted))
}
