//! Date/time utilities for feedwatch.
//!
//! Timestamps are stored in SQLite as UTC text in `YYYY-MM-DD HH:MM:SS` form,
//! the same shape `datetime('now')` produces, so range comparisons in SQL are
//! plain string comparisons.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Tz;

/// Storage format for timestamps.
pub const SQL_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Format a UTC timestamp for storage.
pub fn to_sql(dt: &DateTime<Utc>) -> String {
    dt.format(SQL_DATETIME_FORMAT).to_string()
}

/// Current time in storage format.
pub fn now_sql() -> String {
    to_sql(&Utc::now())
}

/// Storage-format timestamp `secs` seconds before now.
pub fn sql_seconds_ago(secs: i64) -> String {
    to_sql(&(Utc::now() - chrono::Duration::seconds(secs)))
}

/// Parse a stored timestamp (SQLite format or RFC3339).
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, SQL_DATETIME_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Calendar day (`YYYY-MM-DD`) of `now` in the given timezone.
///
/// Unknown timezone names fall back to UTC.
pub fn quota_day(now: &DateTime<Utc>, timezone: &str) -> String {
    match timezone.parse::<Tz>() {
        Ok(tz) => now.with_timezone(&tz).format("%Y-%m-%d").to_string(),
        Err(_) => now.format("%Y-%m-%d").to_string(),
    }
}

/// Best-effort parse of a date found in scraped HTML.
///
/// Accepts RFC3339, RFC2822, ISO dates with or without time, and the
/// common English long forms ("March 5, 2024", "5 March 2024").
pub fn parse_loose(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    for fmt in ["%Y-%m-%d", "%B %d, %Y", "%b %d, %Y", "%d %B %Y", "%d %b %Y", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
        }
    }
    None
}
