// Folds hourly derived-data artifacts into fixed-width summary bins for
// presentation layers.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::debug;

use crate::core::error::{Error, Result};
use crate::models::algorithm::AlgProfile;
use crate::models::cache::SensorMap;
use crate::query::derived::{CacheLookup, DerivedCache};
use crate::utils::time::{is_hour_aligned, unixts};

// Precision slack when checking that /time fields fill a bin: up to 15
// seconds of drift is corrected by rescaling.
const FUDGE_MINUTES: f64 = 15.0 / 60.0;
const COUNT_DIVISOR: f64 = 10.0;
pub const NODATA_FIELD: &str = "general/nodata";

/// One aggregated sub-hour interval. `ts` is the bin start in unix ms.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryBin {
    pub ts: i64,
    pub summary: BTreeMap<String, f64>,
}

/// Whole-window result. A single unready hour makes the entire window
/// `NotReady`: partial windows are never returned.
#[must_use]
#[derive(Debug)]
pub enum BinsResult {
    Ready(Vec<SummaryBin>),
    NotReady,
}

impl BinsResult {
    pub fn is_ready(&self) -> bool {
        matches!(self, BinsResult::Ready(_))
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Aggregate `[start_time, start_time + hours)` into `bins_per_hour` bins
/// per hour.
///
/// Every hour is probed even after a miss so that all missing hours get
/// their recompute scheduled in one pass, but any miss discards the bins
/// already computed and yields `NotReady` for the whole window. With
/// `override_cache` the hours are computed directly, bypassing the cache.
pub fn fetch_derived_data_bins(
    cache: &DerivedCache,
    sensor_map: &SensorMap,
    profile: &AlgProfile,
    start_time: DateTime<Utc>,
    hours: u32,
    bins_per_hour: u32,
    override_cache: bool,
    now: DateTime<Utc>,
) -> Result<BinsResult> {
    if !is_hour_aligned(start_time) {
        return Err(Error::UnalignedWindow);
    }
    debug_assert!(bins_per_hour > 0 && 60 % bins_per_hour == 0);

    let descriptor = cache.registry().resolve(&profile.algorithm)?;
    let bin_width_mins = 60.0 / bins_per_hour as f64;
    let bin_width = Duration::milliseconds(3_600_000 / bins_per_hour as i64);

    let mut out = Vec::with_capacity((hours * bins_per_hour) as usize);
    let mut not_ready = false;

    for h in 0..hours {
        let hour_start = start_time + Duration::hours(h as i64);
        let derived = if override_cache {
            CacheLookup::Ready(cache.fetch_hour(sensor_map, profile, hour_start)?)
        } else {
            cache.fetch_cached_hour(sensor_map, profile, hour_start, now)?
        };
        let derived = match derived {
            CacheLookup::Ready(d) => d,
            CacheLookup::NotReady => {
                not_ready = true;
                continue;
            }
        };

        for b in 0..bins_per_hour {
            let bin_start = hour_start + bin_width * b as i32;
            let mut values: BTreeMap<String, f64> = BTreeMap::new();
            let mut time_sum = 0.0;

            if derived.has_data() {
                let summed = derived.window_sum(bin_start, bin_start + bin_width);
                let per_row_mins = derived.sample_ts() / 60_000.0;
                for (field, total) in descriptor.outputs.iter().zip(summed) {
                    let value = if field.ends_with("/time") {
                        let v = total * per_row_mins;
                        time_sum += v;
                        v
                    } else if field.ends_with("/count") {
                        total / COUNT_DIVISOR
                    } else {
                        total
                    };
                    values.insert(field.clone(), value);
                }
            } else {
                for field in &descriptor.outputs {
                    values.insert(field.clone(), 0.0);
                }
            }

            let mut nodata = (bin_width_mins - time_sum).max(0.0);
            // Precision drift can leave the /time fields summing slightly
            // off the bin width; rescale them to fill the bin exactly.
            if (nodata < FUDGE_MINUTES || time_sum > bin_width_mins) && time_sum > 0.0 {
                nodata = 0.0;
                for (field, value) in values.iter_mut() {
                    if field.ends_with("/time") {
                        *value *= bin_width_mins / time_sum;
                    }
                }
            }
            values.insert(NODATA_FIELD.to_string(), nodata);

            for value in values.values_mut() {
                *value = round3(*value);
            }
            out.push(SummaryBin {
                ts: unixts(bin_start),
                summary: values,
            });
        }
    }

    if not_ready {
        debug!(start = %start_time, hours, "bin window not ready");
        return Ok(BinsResult::NotReady);
    }
    Ok(BinsResult::Ready(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::artifact;
    use crate::core::constants::CompressionType;
    use crate::models::algorithm::{AlgorithmDescriptor, AlgorithmRegistry, AnalysisFunction};
    use crate::models::cache::{make_cache_id, DerivedRow};
    use crate::models::device::SensorDevice;
    use crate::models::derived_data::DerivedData;
    use crate::models::sensor_data::{SensorData, SensorDataBundle, StreamType};
    use crate::state::store::{
        DerivedDataStore, MemoryDerivedStore, MemoryQueueStore, QueueStore, SensorDataSource,
    };
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    const ROWS_PER_HOUR: usize = 3600; // one chunk per second
    const CHUNK: usize = 4;

    // Every chunk row reports: 1 x active/time, 20 x steps/count, 3 x score.
    fn registry() -> AlgorithmRegistry {
        let runner: Arc<dyn AnalysisFunction> = Arc::new(
            |chunked: &HashMap<String, SensorData>, _: &Value| {
                let rows = chunked["person/thigh"].chunk_count();
                let mut matrix = Vec::with_capacity(rows * 3);
                for _ in 0..rows {
                    matrix.extend_from_slice(&[1, 20, 3]);
                }
                Ok(matrix)
            },
        );
        let mut registry = AlgorithmRegistry::new();
        registry.register(AlgorithmDescriptor::new(
            "person/activity",
            "3.0.0",
            vec!["person/thigh".into()],
            vec![
                "activity/active/time".into(),
                "activity/steps/count".into(),
                "activity/score".into(),
            ],
            CHUNK,
            runner,
        ));
        registry
    }

    struct HourSource;

    impl SensorDataSource for HourSource {
        fn device(&self, id: i64) -> Result<SensorDevice> {
            Ok(SensorDevice::new(id, None))
        }

        fn profile(&self, _id: i64) -> Result<AlgProfile> {
            Ok(profile())
        }

        fn fetch_bundle(
            &self,
            _device: &SensorDevice,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            stream_type: StreamType,
        ) -> Result<SensorDataBundle> {
            // Ignore the pad so chunk rows land exactly on the hour grid.
            let start = start + Duration::minutes(5);
            let end = end - Duration::minutes(5);
            let mut bundle = SensorDataBundle::new(Some(start), Some(end), stream_type);
            bundle.add(SensorData::from_continuous(
                unixts(start) as f64,
                unixts(end) as f64,
                stream_type,
                vec![0i16; ROWS_PER_HOUR * CHUNK * 3],
                3,
            ));
            Ok(bundle)
        }
    }

    fn profile() -> AlgProfile {
        AlgProfile {
            id: 12,
            name: "default".into(),
            algorithm: "person/activity".into(),
            parameters: json!({}),
        }
    }

    fn sensor_map() -> SensorMap {
        let mut map = SensorMap::new();
        map.insert("person/thigh".into(), SensorDevice::new(42, None));
        map
    }

    fn seed_hour(
        store: &dyn DerivedDataStore,
        registry: &AlgorithmRegistry,
        map: &SensorMap,
        hour: DateTime<Utc>,
        now: DateTime<Utc>,
        data: &DerivedData,
    ) {
        let descriptor = registry.resolve("person/activity").unwrap();
        let id = make_cache_id(map, 12, descriptor, hour, 5);
        store
            .upsert(DerivedRow {
                id,
                start_time: hour,
                shard: 5,
                sensor_ids: "42".into(),
                measurement_id: None,
                alg_profile_id: 12,
                parameter_hash: "00000000".into(),
                created: now,
                timeout: now + Duration::days(14),
                invalidated: false,
                data: artifact::seal(data, CompressionType::default()).unwrap(),
            })
            .unwrap();
    }

    #[test]
    fn test_bin_conservation_over_one_hour() {
        let registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = HourSource;
        let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);

        let hour = Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap();
        let now = hour + Duration::hours(3);

        let result = fetch_derived_data_bins(
            &cache,
            &sensor_map(),
            &profile(),
            hour,
            1,
            4,
            true, // direct computation
            now,
        )
        .unwrap();

        let bins = match result {
            BinsResult::Ready(bins) => bins,
            BinsResult::NotReady => panic!("override path is always ready"),
        };
        assert_eq!(bins.len(), 4);

        let mut time_total = 0.0;
        for bin in &bins {
            let active = bin.summary["activity/active/time"];
            time_total += active;
            // Each bin is exactly filled; nodata corrected to zero.
            assert_eq!(bin.summary[NODATA_FIELD], 0.0);
            assert!((active - 15.0).abs() < 0.01, "active = {}", active);
            // ~900 chunk rows/bin * 20 steps / 10; the last bin holds one
            // row less than the others.
            assert!((bin.summary["activity/steps/count"] - 1800.0).abs() < 5.0);
            assert!((bin.summary["activity/score"] - 2700.0).abs() < 5.0);
        }
        assert!((time_total - 60.0).abs() < FUDGE_MINUTES);
    }

    #[test]
    fn test_all_or_nothing_window() {
        let registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = HourSource;
        let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);

        let map = sensor_map();
        let prof = profile();
        let day = Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap();
        let now = day + Duration::days(2);

        // Seed all hours except hour 13.
        for h in 0..24 {
            if h == 13 {
                continue;
            }
            let hour = day + Duration::hours(h);
            let data = cache.fetch_hour(&map, &prof, hour).unwrap();
            seed_hour(&derived, &registry, &map, hour, now, &data);
        }

        let result =
            fetch_derived_data_bins(&cache, &map, &prof, day, 24, 4, false, now).unwrap();
        assert!(!result.is_ready());
        // The miss scheduled the day job.
        assert_eq!(queue.count_for_shard(5).unwrap(), 1);

        // Once hour 13 is present the full window is returned.
        let hour13 = day + Duration::hours(13);
        let data = cache.fetch_hour(&map, &prof, hour13).unwrap();
        seed_hour(&derived, &registry, &map, hour13, now, &data);
        let result =
            fetch_derived_data_bins(&cache, &map, &prof, day, 24, 4, false, now).unwrap();
        match result {
            BinsResult::Ready(bins) => assert_eq!(bins.len(), 24 * 4),
            BinsResult::NotReady => panic!("all hours were seeded"),
        }
    }

    #[test]
    fn test_empty_hour_is_all_nodata() {
        let registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = HourSource;
        let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);

        let map = sensor_map();
        let prof = profile();
        let hour = Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap();
        let now = hour + Duration::hours(3);

        let descriptor = registry.resolve("person/activity").unwrap();
        let empty = DerivedData::empty(
            "person/activity",
            &descriptor.version_hash,
            &descriptor.outputs,
        );
        seed_hour(&derived, &registry, &map, hour, now, &empty);

        let result =
            fetch_derived_data_bins(&cache, &map, &prof, hour, 1, 4, false, now).unwrap();
        let bins = match result {
            BinsResult::Ready(bins) => bins,
            BinsResult::NotReady => panic!("hour was seeded"),
        };
        for bin in bins {
            assert_eq!(bin.summary[NODATA_FIELD], 15.0);
            assert_eq!(bin.summary["activity/active/time"], 0.0);
        }
    }

    #[test]
    fn test_unaligned_start_rejected() {
        let registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = HourSource;
        let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);

        let start = Utc.with_ymd_and_hms(2024, 5, 17, 13, 30, 0).unwrap();
        let err = fetch_derived_data_bins(
            &cache,
            &sensor_map(),
            &profile(),
            start,
            1,
            4,
            false,
            start,
        );
        assert!(matches!(err, Err(Error::UnalignedWindow)));
    }

    #[test]
    fn test_bin_timestamps() {
        let registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = HourSource;
        let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);

        let hour = Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap();
        let result = fetch_derived_data_bins(
            &cache,
            &sensor_map(),
            &profile(),
            hour,
            1,
            4,
            true,
            hour,
        )
        .unwrap();
        let bins = match result {
            BinsResult::Ready(bins) => bins,
            BinsResult::NotReady => unreachable!(),
        };
        let expected: Vec<i64> = (0..4).map(|b| unixts(hour) + b * 15 * 60 * 1000).collect();
        let got: Vec<i64> = bins.iter().map(|b| b.ts).collect();
        assert_eq!(got, expected);
    }
}
