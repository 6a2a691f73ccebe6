//! Timestamp formatting.

use chrono::{DateTime, SecondsFormat, Utc};

/// ISO-8601 UTC timestamp with second precision and a `Z` suffix,
/// e.g. `2025-03-01T04:05:06Z`.
pub fn iso_utc(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// `iso_utc` for the current instant.
pub fn iso_utc_now() -> String {
    iso_utc(Utc::now())
}

/// Compact run timestamp used to name result directories, e.g.
/// `20250301-0405`.
pub fn run_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d-%H%M").to_string()
}

/// Parse an ISO-8601 timestamp (`Z` or explicit offset) into UTC.
pub fn parse_iso(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
