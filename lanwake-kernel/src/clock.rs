//! Wall clock and timestamp helpers.
//!
//! Timestamps are stored as ISO-8601 strings with second precision and an
//! explicit UTC offset (`2024-05-01T21:03:11+09:00`). The local offset must be
//! detected before the tokio runtime spawns its worker threads, so the clock
//! is built once in `main` and injected everywhere else.

use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};

/// Source of "now" for the registry and the log store.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

pub type SharedClock = Arc<dyn Clock>;

/// Real clock pinned to the offset detected at startup.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: UtcOffset,
}

impl SystemClock {
    /// Detects the local offset; falls back to UTC when the platform refuses
    /// (e.g. when other threads are already running).
    pub fn detect() -> Self {
        let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
        Self { offset }
    }

    pub fn offset(&self) -> UtcOffset {
        self.offset
    }
}

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc().to_offset(self.offset)
    }
}

/// Formats `dt` as `YYYY-MM-DDTHH:MM:SS±HH:MM`.
pub fn format_ts(dt: OffsetDateTime) -> String {
    dt.format(format_description!(
        "[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory]:[offset_minute]"
    ))
    .unwrap_or_default()
}

/// Lenient ISO-8601 parser.
///
/// Accepts RFC 3339 (fractional seconds, `Z` or `±HH:MM`), compact `±HHMM`
/// offsets, and naive timestamps which are read as UTC.
pub fn parse_ts(value: &str) -> Option<OffsetDateTime> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Ok(dt) = OffsetDateTime::parse(value, &Rfc3339) {
        return Some(dt);
    }
    if let Ok(dt) = OffsetDateTime::parse(
        value,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second][offset_hour sign:mandatory][offset_minute]"),
    ) {
        return Some(dt);
    }
    if let Ok(dt) = OffsetDateTime::parse(
        value,
        format_description!(
            "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond][offset_hour sign:mandatory][offset_minute]"
        ),
    ) {
        return Some(dt);
    }
    if let Ok(dt) = PrimitiveDateTime::parse(value, format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]")) {
        return Some(dt.assume_utc());
    }
    PrimitiveDateTime::parse(
        value,
        format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond]"),
    )
    .ok()
    .map(PrimitiveDateTime::assume_utc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{datetime, offset};

    #[test]
    fn formats_with_offset_and_second_precision() {
        let dt = datetime!(2024-05-01 21:03:11.987 +09:00);
        assert_eq!(format_ts(dt), "2024-05-01T21:03:11+09:00");
        assert_eq!(format_ts(datetime!(2024-01-02 03:04:05 UTC)), "2024-01-02T03:04:05+00:00");
    }

    #[test]
    fn parses_common_shapes() {
        let expected = datetime!(2024-05-01 12:03:11 UTC);
        assert_eq!(parse_ts("2024-05-01T21:03:11+09:00"), Some(expected));
        assert_eq!(parse_ts("2024-05-01T21:03:11+0900"), Some(expected));
        assert_eq!(parse_ts("2024-05-01T12:03:11Z"), Some(expected));
        assert_eq!(parse_ts("2024-05-01T12:03:11"), Some(expected));
        assert!(parse_ts("2024-05-01T12:03:11.250+00:00").is_some());
        assert!(parse_ts("2024-05-01T12:03:11.250").is_some());
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_ts(""), None);
        assert_eq!(parse_ts("yesterday"), None);
        assert_eq!(parse_ts("2024-13-01T00:00:00Z"), None);
    }

    #[test]
    fn round_trip_keeps_instant() {
        let dt = datetime!(2023-11-30 23:59:59 -05:00);
        let back = parse_ts(&format_ts(dt)).unwrap();
        assert_eq!(back, dt);
        assert_eq!(back.offset(), offset!(-5));
    }
}
