// Storage seams. The persistence technology is out of scope; the core only
// relies on atomic upsert-by-primary-key and insert-if-absent semantics.
// In-memory implementations back the tests and small deployments.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::core::error::Result;
use crate::models::algorithm::AlgProfile;
use crate::models::cache::{DerivedRow, QueueRow};
use crate::models::device::SensorDevice;
use crate::models::sensor_data::{SensorDataBundle, StreamType};

pub trait DerivedDataStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Option<DerivedRow>>;
    /// Create or overwrite the row with this primary key, atomically.
    fn upsert(&self, row: DerivedRow) -> Result<()>;
}

pub trait QueueStore: Send + Sync {
    /// Insert unless a row with this id already exists. Returns whether a
    /// row was inserted. Must be atomic: two concurrent callers observing
    /// the same miss may both call this, only one row may result.
    fn insert_if_absent(&self, row: QueueRow) -> Result<bool>;
    /// Oldest pending entry for this shard, in insertion order.
    fn first_for_shard(&self, shard: i32) -> Result<Option<QueueRow>>;
    fn delete(&self, id: &str) -> Result<()>;
    fn count_for_shard(&self, shard: i32) -> Result<usize>;
}

/// Resolves sensor devices, algorithm profiles and raw sample bundles.
/// Backed by the session/record storage, an external collaborator.
pub trait SensorDataSource: Send + Sync {
    fn device(&self, id: i64) -> Result<SensorDevice>;
    fn profile(&self, id: i64) -> Result<AlgProfile>;
    fn fetch_bundle(
        &self,
        device: &SensorDevice,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        stream_type: StreamType,
    ) -> Result<SensorDataBundle>;
}

#[derive(Default)]
pub struct MemoryDerivedStore {
    rows: RwLock<HashMap<String, DerivedRow>>,
}

impl MemoryDerivedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DerivedDataStore for MemoryDerivedStore {
    fn get(&self, id: &str) -> Result<Option<DerivedRow>> {
        Ok(self.rows.read().unwrap().get(id).cloned())
    }

    fn upsert(&self, row: DerivedRow) -> Result<()> {
        self.rows.write().unwrap().insert(row.id.clone(), row);
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryQueueStore {
    // Insertion order doubles as FIFO order.
    rows: RwLock<Vec<QueueRow>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl QueueStore for MemoryQueueStore {
    fn insert_if_absent(&self, row: QueueRow) -> Result<bool> {
        let mut rows = self.rows.write().unwrap();
        if rows.iter().any(|r| r.id == row.id) {
            return Ok(false);
        }
        rows.push(row);
        Ok(true)
    }

    fn first_for_shard(&self, shard: i32) -> Result<Option<QueueRow>> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .find(|r| r.shard == shard)
            .cloned())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.rows.write().unwrap().retain(|r| r.id != id);
        Ok(())
    }

    fn count_for_shard(&self, shard: i32) -> Result<usize> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.shard == shard)
            .count())
    }
}
