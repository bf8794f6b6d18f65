//! Timestamp helpers for persisted run-state records.
//!
//! Run timestamps are stored as fixed-width UTC strings so that ordering the
//! records lexicographically (e.g. `ORDER BY r.startedAt DESC` in Cypher)
//! matches chronological order.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

/// Format a timestamp as `2024-01-15T10:30:00.000000000Z`.
pub fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string()
}

/// Parse a persisted timestamp.
///
/// Accepts RFC 3339 (with any offset, any sub-second precision) and the
/// offset-less `YYYY-MM-DDTHH:MM:SS[.f]` form written by older tooling,
/// which is taken as UTC. Returns `None` for empty or unrecognised input.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S"))
        .ok()
        .map(|ndt| Utc.from_utc_datetime(&ndt))
}
