// Cached algorithm output for one hour: an integer matrix aligned to chunk
// start timestamps, carrying its own algorithm identity.

use chrono::{DateTime, Utc};

use crate::models::sensor_data::window;
use crate::utils::time::{from_unixts, unixts};

#[derive(Debug, Clone, PartialEq)]
pub struct DerivedData {
    pub start_ts: f64,
    pub end_ts: f64,
    /// Algorithm name and content-version hash the matrix was produced by.
    pub algorithm: String,
    pub version_hash: String,
    /// Output field names, fixing the matrix width and column order.
    pub fields: Vec<String>,
    /// Unix-ms timestamp per row (chunk start).
    pub ts: Vec<f64>,
    /// Row-major matrix, `ts.len()` rows by `fields.len()` columns.
    pub data: Vec<i32>,
}

impl DerivedData {
    pub fn empty(algorithm: &str, version_hash: &str, fields: &[String]) -> Self {
        Self {
            start_ts: 0.0,
            end_ts: 0.0,
            algorithm: algorithm.to_string(),
            version_hash: version_hash.to_string(),
            fields: fields.to_vec(),
            ts: Vec::new(),
            data: Vec::new(),
        }
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn rows(&self) -> usize {
        self.ts.len()
    }

    /// Milliseconds covered by one row, derived from the timestamp vector.
    pub fn sample_ts(&self) -> f64 {
        if self.ts.len() < 2 {
            return 0.0;
        }
        (self.ts[self.ts.len() - 1] - self.ts[0]) / self.rows() as f64
    }

    /// Per-field sums of the rows inside `[start, end)`.
    pub fn window_sum(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<f64> {
        let (first, last) = window(&self.ts, unixts(start) as f64, unixts(end) as f64);
        let width = self.fields.len();
        let mut sums = vec![0.0; width];
        for row in first..last {
            for (col, sum) in sums.iter_mut().enumerate() {
                *sum += self.data[row * width + col] as f64;
            }
        }
        sums
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        from_unixts(self.start_ts as i64)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        from_unixts(self.end_ts as i64)
    }
}
