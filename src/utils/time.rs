//! Timestamp utilities

use chrono::{DateTime, SecondsFormat, Utc};

/// Current UTC time as ISO-8601 with millisecond fraction, e.g.
/// `2024-05-01T12:30:45.123Z`
pub fn iso8601_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an ISO-8601 / RFC 3339 timestamp
pub fn parse_iso8601(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
