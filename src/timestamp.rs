//! Wall-clock helpers.
//!
//! Acquisition timestamps are microseconds since the Unix epoch (`i64`). All
//! formatting is UTC.

use chrono::{DateTime, TimeZone, Timelike, Utc};

/// Current time in microseconds since the Unix epoch.
pub fn now_us() -> i64 {
    Utc::now().timestamp_micros()
}

/// Converts epoch microseconds to a UTC `DateTime`, clamping unrepresentable values
/// to the epoch.
pub fn datetime_from_us(ts_us: i64) -> DateTime<Utc> {
    Utc.timestamp_micros(ts_us).single().unwrap_or_default()
}

/// ISO-8601 with microseconds and a `Z` suffix, e.g. `2024-05-01T04:00:00.000000Z`.
pub fn utc_iso(ts_us: i64) -> String {
    datetime_from_us(ts_us)
        .format("%Y-%m-%dT%H:%M:%S%.6fZ")
        .to_string()
}

/// `YYYY-MM-DD`
pub fn utc_date(ts_us: i64) -> String {
    datetime_from_us(ts_us).format("%Y-%m-%d").to_string()
}

/// `HH:MM:SS.ffffff`
pub fn utc_time(ts_us: i64) -> String {
    datetime_from_us(ts_us).format("%H:%M:%S%.6f").to_string()
}

/// Compact stamp used in output file names: `YYYYmmdd_HHMMSS`.
pub fn file_stamp(ts_us: i64) -> String {
    datetime_from_us(ts_us).format("%Y%m%d_%H%M%S").to_string()
}

/// Seconds elapsed since UTC midnight.
pub fn seconds_since_midnight(now: DateTime<Utc>) -> u32 {
    now.num_seconds_from_midnight()
}

#[cfg(test)]
mod tests {
    use super::*;

    const TS: i64 = 1_714_536_000_123_456; // 2024-05-01T04:00:00.123456Z

    #[test]
    fn formats_iso_with_microseconds() {
        assert_eq!(utc_iso(TS), "2024-05-01T04:00:00.123456Z");
        assert_eq!(utc_date(TS), "2024-05-01");
        assert_eq!(utc_time(TS), "04:00:00.123456");
        assert_eq!(file_stamp(TS), "20240501_040000");
    }

    #[test]
    fn counts_seconds_from_midnight() {
        let t = Utc.with_ymd_and_hms(2024, 5, 1, 19, 30, 1).unwrap();
        assert_eq!(seconds_since_midnight(t), 19 * 3600 + 30 * 60 + 1);
    }
}
