// Background recompute worker. Drains the day-granularity queue for one
// shard, materializing 24 hourly artifacts per entry.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use crate::core::artifact;
use crate::core::constants::{CACHE_TTL_DAYS, WORKER_POLL_BUSY_S, WORKER_POLL_IDLE_S};
use crate::core::error::Result;
use crate::models::algorithm::content_hash;
use crate::models::cache::{make_cache_id, DerivedRow, QueueRow, SensorMap};
use crate::query::derived::DerivedCache;
use crate::state::store::{DerivedDataStore, QueueStore, SensorDataSource};

/// What one worker pass did and how soon the next pass should run.
#[derive(Debug)]
pub struct WorkerOutcome {
    /// Queue id of the processed entry, if any.
    pub processed: Option<String>,
    /// Entries still pending for this shard after the pass.
    pub pending: usize,
    pub poll_hint: StdDuration,
}

/// Process at most one queue entry for the cache's shard.
///
/// All 24 hours of the entry's day are recomputed, skipping hours whose
/// cached artifact is still fresh, so a re-run of the same entry is
/// idempotent. The entry is deleted only after every hour succeeded; on
/// failure it stays queued and the error propagates to the caller's
/// retry loop.
pub fn run_step(cache: &DerivedCache, now: DateTime<Utc>) -> Result<WorkerOutcome> {
    let entry = match cache.queue_store().first_for_shard(cache.shard)? {
        Some(entry) => entry,
        None => {
            return Ok(WorkerOutcome {
                processed: None,
                pending: 0,
                poll_hint: StdDuration::from_secs(WORKER_POLL_IDLE_S),
            });
        }
    };

    if let Err(e) = process_entry(cache, &entry, now) {
        warn!(queue_id = %entry.id, error = %e, "recompute failed, entry retained");
        return Err(e);
    }
    cache.queue_store().delete(&entry.id)?;
    info!(queue_id = %entry.id, day = %entry.start_time, "recompute finished");

    let pending = cache.queue_store().count_for_shard(cache.shard)?;
    Ok(WorkerOutcome {
        processed: Some(entry.id),
        pending,
        poll_hint: StdDuration::from_secs(if pending > 0 {
            WORKER_POLL_BUSY_S
        } else {
            WORKER_POLL_IDLE_S
        }),
    })
}

fn process_entry(cache: &DerivedCache, entry: &QueueRow, now: DateTime<Utc>) -> Result<()> {
    let profile = cache.sensor_source().profile(entry.alg_profile_id)?;
    let descriptor = cache.registry().resolve(&profile.algorithm)?;

    let mut sensor_map = SensorMap::new();
    for (place, id) in descriptor.places.iter().zip(entry.sensor_id_list()?) {
        sensor_map.insert(place.clone(), cache.sensor_source().device(id)?);
    }

    let parameter_hash = content_hash(&entry.parameters);
    for h in 0..24 {
        let hour = entry.start_time + Duration::hours(h);
        let id = make_cache_id(&sensor_map, profile.id, descriptor, hour, cache.shard);
        if let Some(row) = cache.derived_store().get(&id)? {
            if row.is_fresh(now) {
                continue;
            }
        }

        let data = cache.fetch_hour(&sensor_map, &profile, hour)?;
        cache.derived_store().upsert(DerivedRow {
            id,
            start_time: hour,
            shard: cache.shard,
            sensor_ids: entry.sensor_ids.clone(),
            measurement_id: entry.measurement_id,
            alg_profile_id: entry.alg_profile_id,
            parameter_hash: parameter_hash.clone(),
            created: now,
            timeout: now + Duration::days(CACHE_TTL_DAYS),
            invalidated: false,
            data: artifact::seal(&data, cache.compression)?,
        })?;
    }
    Ok(())
}
