// Sensor device identity as seen by the cache layer.

use chrono::{DateTime, Utc};

/// One wearable motion sensor. `last_record_timestamp` is the wall-clock
/// time of the newest sample received from it, driving the cache key's
/// freshness window factor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensorDevice {
    pub id: i64,
    pub last_record_timestamp: Option<DateTime<Utc>>,
}

impl SensorDevice {
    pub fn new(id: i64, last_record_timestamp: Option<DateTime<Utc>>) -> Self {
        Self {
            id,
            last_record_timestamp,
        }
    }
}
