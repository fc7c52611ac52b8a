// Cache and queue rows plus the deterministic cache key construction.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::core::constants::{
    FRESHNESS_PAD_AFTER_S, FRESHNESS_PAD_BEFORE_S, FRESHNESS_SATURATED_S,
};
use crate::core::error::{Error, Result};
use crate::models::algorithm::AlgorithmDescriptor;
use crate::models::device::SensorDevice;
use crate::utils::time::hour_index;

/// Placement role -> sensor device, the unit the cache and worker operate on.
pub type SensorMap = HashMap<String, SensorDevice>;

/// Freshness window factor for one sensor relative to an hour bucket.
///
/// 0 when the sensor's newest data is more than 30 minutes before the hour
/// start (historical, stable key) or absent; saturated at 7200 once it is
/// more than 90 minutes past the hour start (bucket fully covered); otherwise
/// the elapsed seconds since the padded window opened. Folding this into the
/// cache key makes entries for the current hour go stale implicitly as new
/// data arrives, without an invalidation write.
pub fn sensor_window_factor(device: &SensorDevice, start_hour: DateTime<Utc>) -> i64 {
    let start_padded = start_hour - Duration::seconds(FRESHNESS_PAD_BEFORE_S);
    let end_padded = start_hour + Duration::seconds(FRESHNESS_PAD_AFTER_S);
    match device.last_record_timestamp {
        None => 0,
        Some(t) if t > end_padded => FRESHNESS_SATURATED_S,
        Some(t) if t < start_padded => 0,
        Some(t) => (t - start_padded).num_seconds(),
    }
}

/// Sensor ids in the algorithm's role order, colon-joined.
pub fn sensor_map_string(sensor_map: &SensorMap, descriptor: &AlgorithmDescriptor) -> String {
    descriptor
        .places
        .iter()
        .filter_map(|place| sensor_map.get(place))
        .map(|device| device.id.to_string())
        .collect::<Vec<_>>()
        .join(":")
}

fn sensor_window_factor_string(
    sensor_map: &SensorMap,
    descriptor: &AlgorithmDescriptor,
    start_hour: DateTime<Utc>,
) -> String {
    descriptor
        .places
        .iter()
        .filter_map(|place| sensor_map.get(place))
        .map(|device| sensor_window_factor(device, start_hour).to_string())
        .collect::<Vec<_>>()
        .join(":")
}

/// Deterministic primary key of one hour's derived artifact:
/// `S.<shard>.<hour index>.<profile id>.<freshness factors>.<sensor ids><version hash>`.
/// The same construction at a midnight-floored hour yields the
/// day-granularity key used for queue deduplication.
pub fn make_cache_id(
    sensor_map: &SensorMap,
    profile_id: i64,
    descriptor: &AlgorithmDescriptor,
    start_hour: DateTime<Utc>,
    shard: i32,
) -> String {
    format!(
        "S.{}.{:07}.{:07}.{}.{}{}",
        shard,
        hour_index(start_hour),
        profile_id,
        sensor_window_factor_string(sensor_map, descriptor, start_hour),
        sensor_map_string(sensor_map, descriptor),
        descriptor.version_hash,
    )
}

/// Persisted cache row. `id` is the full cache key; the remaining columns
/// exist for statistics and manual cleanup.
#[derive(Debug, Clone, PartialEq)]
pub struct DerivedRow {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub shard: i32,
    pub sensor_ids: String,
    pub measurement_id: Option<i64>,
    pub alg_profile_id: i64,
    pub parameter_hash: String,
    pub created: DateTime<Utc>,
    pub timeout: DateTime<Utc>,
    pub invalidated: bool,
    pub data: Vec<u8>,
}

impl DerivedRow {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        !self.invalidated && self.timeout > now
    }
}

/// Pending day-granularity recompute job.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueRow {
    pub id: String,
    pub priority: i32,
    pub start_time: DateTime<Utc>,
    pub shard: i32,
    pub sensor_ids: String,
    pub measurement_id: Option<i64>,
    pub alg_profile_id: i64,
    pub parameters: String,
    pub scheduled: DateTime<Utc>,
}

impl QueueRow {
    pub fn parameters_json(&self) -> Result<Value> {
        if self.parameters.is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&self.parameters)
            .map_err(|e| Error::DataFormat(format!("queue parameters: {}", e)))
    }

    pub fn sensor_id_list(&self) -> Result<Vec<i64>> {
        self.sensor_ids
            .split(':')
            .map(|s| {
                s.parse::<i64>()
                    .map_err(|e| Error::DataFormat(format!("sensor id list: {}", e)))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::algorithm::AnalysisFunction;
    use crate::models::sensor_data::SensorData;
    use chrono::TimeZone;
    use std::sync::Arc;

    fn descriptor(version: &str) -> AlgorithmDescriptor {
        let noop: Arc<dyn AnalysisFunction> = Arc::new(
            |_: &HashMap<String, SensorData>, _: &Value| Ok(Vec::new()),
        );
        AlgorithmDescriptor::new(
            "person/activity",
            version,
            vec!["person/thigh".into(), "person/chest".into()],
            vec!["activity/walking/time".into()],
            64,
            noop,
        )
    }

    fn hour() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap()
    }

    #[test]
    fn test_window_factor_regions() {
        let h = hour();
        let dev = |t| SensorDevice::new(1, t);

        assert_eq!(sensor_window_factor(&dev(None), h), 0);
        // Historical: data long before the bucket.
        assert_eq!(
            sensor_window_factor(&dev(Some(h - Duration::hours(2))), h),
            0
        );
        // Saturated: data well past the bucket.
        assert_eq!(
            sensor_window_factor(&dev(Some(h + Duration::hours(2))), h),
            FRESHNESS_SATURATED_S
        );
        // In the window: seconds since start - 30 min.
        assert_eq!(
            sensor_window_factor(&dev(Some(h + Duration::minutes(10))), h),
            40 * 60
        );
        assert_eq!(
            sensor_window_factor(&dev(Some(h - Duration::minutes(30))), h),
            0
        );
    }

    fn sensor_map() -> SensorMap {
        let mut map = SensorMap::new();
        map.insert("person/thigh".into(), SensorDevice::new(42, None));
        map.insert("person/chest".into(), SensorDevice::new(7, None));
        map
    }

    #[test]
    fn test_cache_id_format_and_determinism() {
        let desc = descriptor("2.1.0");
        let map = sensor_map();
        let id = make_cache_id(&map, 12, &desc, hour(), 5);
        assert_eq!(
            id,
            format!("S.5.{:07}.0000012.0:0.42:7{}", hour_index(hour()), desc.version_hash)
        );
        assert_eq!(id, make_cache_id(&map, 12, &desc, hour(), 5));
    }

    #[test]
    fn test_cache_id_changes_with_version_and_freshness() {
        let map = sensor_map();
        let base = make_cache_id(&map, 12, &descriptor("2.1.0"), hour(), 5);
        assert_ne!(base, make_cache_id(&map, 12, &descriptor("2.2.0"), hour(), 5));

        let mut fresh = sensor_map();
        fresh.get_mut("person/thigh").unwrap().last_record_timestamp =
            Some(hour() + Duration::minutes(5));
        assert_ne!(base, make_cache_id(&fresh, 12, &descriptor("2.1.0"), hour(), 5));
    }

    #[test]
    fn test_cache_id_ignores_roles_missing_from_map() {
        let desc = descriptor("2.1.0");
        let mut map = sensor_map();
        map.remove("person/chest");
        let id = make_cache_id(&map, 12, &desc, hour(), 5);
        assert!(id.contains(".42"));
        assert!(!id.contains("42:7"));
    }

    #[test]
    fn test_queue_row_parsing() {
        let row = QueueRow {
            id: "q".into(),
            priority: 0,
            start_time: hour(),
            shard: 5,
            sensor_ids: "42:7".into(),
            measurement_id: None,
            alg_profile_id: 12,
            parameters: String::new(),
            scheduled: hour(),
        };
        assert_eq!(row.sensor_id_list().unwrap(), vec![42, 7]);
        assert_eq!(row.parameters_json().unwrap(), serde_json::json!({}));

        let bad = QueueRow {
            sensor_ids: "42:x".into(),
            ..row
        };
        assert!(bad.sensor_id_list().is_err());
    }
}
