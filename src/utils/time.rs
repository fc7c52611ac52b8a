// Wall-clock helpers. Per-sample timestamps inside sample matrices are f64
// unix milliseconds; everything crossing an API boundary is DateTime<Utc>.

use chrono::{DateTime, TimeZone, Utc};

/// Convert a UTC instant to unix milliseconds.
pub fn unixts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert unix milliseconds back to a UTC instant.
pub fn from_unixts(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).unwrap()
}

/// Hour bucket index since epoch, the cache key's time component.
pub fn hour_index(dt: DateTime<Utc>) -> i64 {
    unixts(dt).div_euclid(1000 * 3600)
}

pub fn floor_hour(dt: DateTime<Utc>) -> DateTime<Utc> {
    from_unixts(hour_index(dt) * 3600 * 1000)
}

pub fn floor_day(dt: DateTime<Utc>) -> DateTime<Utc> {
    dt.date_naive()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

pub fn is_hour_aligned(dt: DateTime<Utc>) -> bool {
    unixts(dt) % (3600 * 1000) == 0
}
