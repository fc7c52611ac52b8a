// Freshness-aware derived-data cache: read path and direct computation.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info};

use crate::core::artifact;
use crate::core::constants::CompressionType;
use crate::core::error::Result;
use crate::models::algorithm::{AlgProfile, AlgorithmRegistry};
use crate::models::cache::{make_cache_id, sensor_map_string, QueueRow, SensorMap};
use crate::models::derived_data::DerivedData;
use crate::models::sensor_data::StreamType;
use crate::state::store::{DerivedDataStore, QueueStore, SensorDataSource};
use crate::utils::time::floor_day;

// Raw data fetched around an hour is padded so chunk boundaries near the
// edges see their full context.
const FETCH_PAD_MINUTES: i64 = 5;

/// Result of a cache probe. `NotReady` is a sentinel, not an error: the
/// artifact is missing and a recompute job has been scheduled.
#[must_use]
#[derive(Debug)]
pub enum CacheLookup {
    Ready(DerivedData),
    NotReady,
}

impl CacheLookup {
    pub fn is_ready(&self) -> bool {
        matches!(self, CacheLookup::Ready(_))
    }
}

/// The derived-data cache over its storage and collaborator seams. `shard`
/// partitions cache keys and the work queue between servers.
pub struct DerivedCache<'a> {
    pub shard: i32,
    pub compression: CompressionType,
    registry: &'a AlgorithmRegistry,
    derived: &'a dyn DerivedDataStore,
    queue: &'a dyn QueueStore,
    source: &'a dyn SensorDataSource,
}

impl<'a> DerivedCache<'a> {
    pub fn new(
        shard: i32,
        registry: &'a AlgorithmRegistry,
        derived: &'a dyn DerivedDataStore,
        queue: &'a dyn QueueStore,
        source: &'a dyn SensorDataSource,
    ) -> Self {
        Self {
            shard,
            compression: CompressionType::default(),
            registry,
            derived,
            queue,
            source,
        }
    }

    pub fn registry(&self) -> &AlgorithmRegistry {
        self.registry
    }

    pub fn derived_store(&self) -> &dyn DerivedDataStore {
        self.derived
    }

    pub fn queue_store(&self) -> &dyn QueueStore {
        self.queue
    }

    pub fn sensor_source(&self) -> &dyn SensorDataSource {
        self.source
    }

    /// True if a fresh artifact exists for this hour. Never schedules work.
    pub fn hour_is_cached(
        &self,
        sensor_map: &SensorMap,
        profile: &AlgProfile,
        start_hour: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let descriptor = self.registry.resolve(&profile.algorithm)?;
        let id = make_cache_id(sensor_map, profile.id, descriptor, start_hour, self.shard);
        Ok(self
            .derived
            .get(&id)?
            .map_or(false, |row| row.is_fresh(now)))
    }

    /// Cache read path. On a hit the stored artifact is decompressed and
    /// deserialized; on a miss (including stale or invalidated rows) a
    /// day-granularity recompute job is scheduled idempotently and
    /// `NotReady` is returned. Never blocks on recomputation.
    pub fn fetch_cached_hour(
        &self,
        sensor_map: &SensorMap,
        profile: &AlgProfile,
        start_hour: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<CacheLookup> {
        let descriptor = self.registry.resolve(&profile.algorithm)?;
        let id = make_cache_id(sensor_map, profile.id, descriptor, start_hour, self.shard);

        if let Some(row) = self.derived.get(&id)? {
            if row.is_fresh(now) {
                debug!(cache_id = %id, "derived data cache hit");
                return Ok(CacheLookup::Ready(artifact::unseal(&row.data)?));
            }
            debug!(cache_id = %id, "derived data cache entry stale");
        }

        let day = floor_day(start_hour);
        let queue_id = make_cache_id(sensor_map, profile.id, descriptor, day, self.shard);
        let inserted = self.queue.insert_if_absent(QueueRow {
            id: queue_id.clone(),
            priority: 0,
            start_time: day,
            shard: self.shard,
            sensor_ids: sensor_map_string(sensor_map, descriptor),
            measurement_id: None,
            alg_profile_id: profile.id,
            parameters: profile.parameters.to_string(),
            scheduled: now,
        })?;
        if inserted {
            info!(queue_id = %queue_id, day = %day, "scheduled derived data recompute");
        }
        Ok(CacheLookup::NotReady)
    }

    /// Compute one hour directly, bypassing the cache.
    pub fn fetch_hour(
        &self,
        sensor_map: &SensorMap,
        profile: &AlgProfile,
        start_hour: DateTime<Utc>,
    ) -> Result<DerivedData> {
        self.generate(
            sensor_map,
            profile,
            start_hour,
            start_hour + Duration::hours(1),
        )
    }

    fn generate(
        &self,
        sensor_map: &SensorMap,
        profile: &AlgProfile,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<DerivedData> {
        let descriptor = self.registry.resolve(&profile.algorithm)?;
        let pad = Duration::minutes(FETCH_PAD_MINUTES);

        let mut any_empty = sensor_map.is_empty();
        let mut data_map = std::collections::HashMap::new();
        for (place, device) in sensor_map {
            let bundle =
                self.source
                    .fetch_bundle(device, start - pad, end + pad, StreamType::Acc3Ax4G)?;
            any_empty |= !bundle.has_data();
            data_map.insert(place.clone(), bundle);
        }

        if any_empty {
            return Ok(DerivedData::empty(
                &descriptor.name,
                &descriptor.version_hash,
                &descriptor.outputs,
            ));
        }
        descriptor.analyse_data(&data_map, &profile.parameters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::CACHE_TTL_DAYS;
    use crate::models::algorithm::{AlgorithmDescriptor, AnalysisFunction};
    use crate::models::cache::DerivedRow;
    use crate::models::device::SensorDevice;
    use crate::models::sensor_data::{SensorData, SensorDataBundle};
    use crate::state::store::{MemoryDerivedStore, MemoryQueueStore};
    use crate::utils::time::unixts;
    use chrono::TimeZone;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Arc;

    struct StubSource;

    impl SensorDataSource for StubSource {
        fn device(&self, id: i64) -> Result<SensorDevice> {
            Ok(SensorDevice::new(id, None))
        }

        fn profile(&self, id: i64) -> Result<AlgProfile> {
            Ok(profile_with_id(id))
        }

        fn fetch_bundle(
            &self,
            _device: &SensorDevice,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
            stream_type: StreamType,
        ) -> Result<SensorDataBundle> {
            let mut bundle = SensorDataBundle::new(Some(start), Some(end), stream_type);
            let start_ts = unixts(start) as f64;
            let end_ts = unixts(end) as f64;
            // 64 rows of 3 channels, enough for one chunk.
            bundle.add(SensorData::from_continuous(
                start_ts,
                end_ts,
                stream_type,
                vec![5i16; 64 * 3],
                3,
            ));
            Ok(bundle)
        }
    }

    fn registry() -> AlgorithmRegistry {
        let runner: Arc<dyn AnalysisFunction> = Arc::new(
            |chunked: &HashMap<String, SensorData>, _: &Value| {
                let rows = chunked["person/thigh"].chunk_count();
                Ok(vec![1; rows])
            },
        );
        let mut registry = AlgorithmRegistry::new();
        registry.register(AlgorithmDescriptor::new(
            "person/activity",
            "3.0.0",
            vec!["person/thigh".into()],
            vec!["activity/active/time".into()],
            64,
            runner,
        ));
        registry
    }

    fn profile_with_id(id: i64) -> AlgProfile {
        AlgProfile {
            id,
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

    #[test]
    fn test_miss_schedules_day_job_once() {
        let registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = StubSource;
        let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);

        let now = Utc.with_ymd_and_hms(2024, 5, 17, 15, 0, 0).unwrap();
        let hour = Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap();
        let profile = profile_with_id(12);
        let map = sensor_map();

        let lookup = cache.fetch_cached_hour(&map, &profile, hour, now).unwrap();
        assert!(!lookup.is_ready());
        assert_eq!(queue.count_for_shard(5).unwrap(), 1);

        // Second miss for another hour of the same day reuses the job.
        let hour2 = Utc.with_ymd_and_hms(2024, 5, 17, 14, 0, 0).unwrap();
        let lookup = cache.fetch_cached_hour(&map, &profile, hour2, now).unwrap();
        assert!(!lookup.is_ready());
        assert_eq!(queue.count_for_shard(5).unwrap(), 1);

        let entry = queue.first_for_shard(5).unwrap().unwrap();
        assert_eq!(
            entry.start_time,
            Utc.with_ymd_and_hms(2024, 5, 17, 0, 0, 0).unwrap()
        );
        assert_eq!(entry.sensor_ids, "42");
    }

    #[test]
    fn test_hit_returns_artifact() {
        let registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = StubSource;
        let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);

        let now = Utc.with_ymd_and_hms(2024, 5, 17, 15, 0, 0).unwrap();
        let hour = Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap();
        let profile = profile_with_id(12);
        let map = sensor_map();

        let data = cache.fetch_hour(&map, &profile, hour).unwrap();
        assert!(data.has_data());

        let descriptor = registry.resolve("person/activity").unwrap();
        let id = make_cache_id(&map, profile.id, descriptor, hour, 5);
        derived
            .upsert(DerivedRow {
                id: id.clone(),
                start_time: hour,
                shard: 5,
                sensor_ids: "42".into(),
                measurement_id: None,
                alg_profile_id: 12,
                parameter_hash: "00000000".into(),
                created: now,
                timeout: now + Duration::days(CACHE_TTL_DAYS),
                invalidated: false,
                data: artifact::seal(&data, CompressionType::default()).unwrap(),
            })
            .unwrap();

        assert!(cache.hour_is_cached(&map, &profile, hour, now).unwrap());
        match cache.fetch_cached_hour(&map, &profile, hour, now).unwrap() {
            CacheLookup::Ready(fetched) => assert_eq!(fetched, data),
            CacheLookup::NotReady => panic!("expected a cache hit"),
        }
        // A hit schedules nothing.
        assert_eq!(queue.count_for_shard(5).unwrap(), 0);
    }

    #[test]
    fn test_stale_and_invalidated_rows_miss() {
        let registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = StubSource;
        let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);

        let now = Utc.with_ymd_and_hms(2024, 5, 17, 15, 0, 0).unwrap();
        let hour = Utc.with_ymd_and_hms(2024, 5, 10, 13, 0, 0).unwrap();
        let profile = profile_with_id(12);
        let map = sensor_map();
        let data = cache.fetch_hour(&map, &profile, hour).unwrap();

        let descriptor = registry.resolve("person/activity").unwrap();
        let id = make_cache_id(&map, profile.id, descriptor, hour, 5);
        let row = DerivedRow {
            id,
            start_time: hour,
            shard: 5,
            sensor_ids: "42".into(),
            measurement_id: None,
            alg_profile_id: 12,
            parameter_hash: "00000000".into(),
            created: now - Duration::days(20),
            timeout: now - Duration::days(6), // expired
            invalidated: false,
            data: artifact::seal(&data, CompressionType::default()).unwrap(),
        };
        derived.upsert(row.clone()).unwrap();
        let lookup = cache.fetch_cached_hour(&map, &profile, hour, now).unwrap();
        assert!(!lookup.is_ready());

        let mut fresh_but_invalidated = row;
        fresh_but_invalidated.timeout = now + Duration::days(1);
        fresh_but_invalidated.invalidated = true;
        derived.upsert(fresh_but_invalidated).unwrap();
        let lookup = cache.fetch_cached_hour(&map, &profile, hour, now).unwrap();
        assert!(!lookup.is_ready());
    }

    #[test]
    fn test_version_change_changes_key() {
        let mut registry = registry();
        let derived = MemoryDerivedStore::new();
        let queue = MemoryQueueStore::new();
        let source = StubSource;

        let hour = Utc.with_ymd_and_hms(2024, 5, 17, 13, 0, 0).unwrap();
        let map = sensor_map();
        let id_v3 = {
            let cache = DerivedCache::new(5, &registry, &derived, &queue, &source);
            let d = cache.registry().resolve("person/activity").unwrap();
            make_cache_id(&map, 12, d, hour, 5)
        };

        let runner: Arc<dyn AnalysisFunction> =
            Arc::new(|_: &HashMap<String, SensorData>, _: &Value| Ok(Vec::new()));
        registry.register(AlgorithmDescriptor::new(
            "person/activity",
            "3.1.0",
            vec!["person/thigh".into()],
            vec!["activity/active/time".into()],
            64,
            runner,
        ));
        let d = registry.resolve("person/activity").unwrap();
        assert_ne!(id_v3, make_cache_id(&map, 12, d, hour, 5));
    }
}
