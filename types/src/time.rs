//! Wire timestamp helpers.
//!
//! Timestamps travel as fixed-width ISO-8601 UTC strings with second precision
//! (`2024-10-29T10:22:25Z`). Because every value has the same width and the
//! same `Z` suffix, comparing the strings byte-wise orders them
//! chronologically. The store indexes and the backfill cursor rely on that.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::TypesError;

/// `strftime`-style description of the wire format.
pub const WIRE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Format a UTC instant in the wire format, truncating sub-second precision.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an RFC3339 timestamp. Any offset is normalised to UTC.
pub fn parse_timestamp(value: &str) -> Result<DateTime<Utc>, TypesError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| TypesError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}

/// The four-digit year prefix of a wire timestamp, if present.
pub fn year_of(timestamp: &str) -> Option<&str> {
    let year = timestamp.get(..4)?;
    year.bytes().all(|b| b.is_ascii_digit()).then_some(year)
}
