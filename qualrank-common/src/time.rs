//! Timestamp utilities
//!
//! Timestamps are persisted as INTEGER unix milliseconds so that SQL ordering
//! on `created_at` is exact.

use chrono::{DateTime, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Convert a timestamp to its persisted form (unix milliseconds)
pub fn to_millis(timestamp: DateTime<Utc>) -> i64 {
    timestamp.timestamp_millis()
}

/// Convert persisted unix milliseconds back to a timestamp
///
/// Out-of-range values clamp to the unix epoch.
pub fn from_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Prefix used for every audit-log line: `[2026-03-14 09:30]`
pub fn audit_stamp(timestamp: DateTime<Utc>) -> String {
    format!("[{}]", timestamp.format("%Y-%m-%d %H:%M"))
}
