//! Timestamp text used by `backup.ini` and the file list.
//!
//! Times are Unix seconds rendered in local time as `YYYY-MM-DD HH:MM:SS`.

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const ACCEPTED_FORMATS: &[&str] = &[TIMESTAMP_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

/// Render Unix seconds as local time.
pub fn format_timestamp(secs: i64) -> String {
    DateTime::from_timestamp(secs, 0)
        .unwrap_or_default()
        .with_timezone(&Local)
        .format(TIMESTAMP_FORMAT)
        .to_string()
}

/// Parse a local timestamp back to Unix seconds.
///
/// Accepts the written form plus a `T` separator, minute precision and a
/// bare date (midnight).
pub fn parse_timestamp(text: &str) -> Option<i64> {
    let text = text.trim();

    for format in ACCEPTED_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(local_to_epoch(naive));
        }
    }

    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()?;
    Some(local_to_epoch(date.and_hms_opt(0, 0, 0)?))
}

/// Local wall-clock time to Unix seconds. A time repeated by a DST
/// fall-back maps to its first occurrence, so such a time written from
/// the second occurrence reads back one hour early.
fn local_to_epoch(naive: NaiveDateTime) -> i64 {
    match Local.from_local_datetime(&naive).earliest() {
        Some(dt) => dt.timestamp(),
        // Skipped by a DST jump; read it as UTC rather than fail.
        None => naive.and_utc().timestamp(),
    }
}
