// Pluggable analysis algorithms: descriptors, an explicit registry value and
// the profile rows that select an algorithm + parameter set.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use flate2::Crc;
use serde_json::Value;

use crate::core::error::{Error, Result};
use crate::models::derived_data::DerivedData;
use crate::models::sensor_data::{SensorData, SensorDataBundle};

/// crc32 of a content string, formatted as 8 hex digits. Used for algorithm
/// version hashes and stored parameter hashes; identity only, never security.
pub fn content_hash(content: &str) -> String {
    let mut crc = Crc::new();
    crc.update(content.as_bytes());
    format!("{:08x}", crc.sum())
}

/// The analysis function proper: a pure function over chunked per-role
/// sample views, returning a row-major integer matrix with one row per chunk
/// of the primary role and one column per declared output field.
///
/// Failures are plain strings; the caller wraps them as `AnalysisFailed`.
pub trait AnalysisFunction: Send + Sync {
    fn analyse(
        &self,
        chunked: &HashMap<String, SensorData>,
        parameters: &Value,
    ) -> std::result::Result<Vec<i32>, String>;
}

impl<F> AnalysisFunction for F
where
    F: Fn(&HashMap<String, SensorData>, &Value) -> std::result::Result<Vec<i32>, String>
        + Send
        + Sync,
{
    fn analyse(
        &self,
        chunked: &HashMap<String, SensorData>,
        parameters: &Value,
    ) -> std::result::Result<Vec<i32>, String> {
        self(chunked, parameters)
    }
}

/// Identity and contract of one registered algorithm.
#[derive(Clone)]
pub struct AlgorithmDescriptor {
    pub name: String,
    pub version: String,
    /// Content-version hash folded into every cache key; changing the
    /// version string invalidates all cached artifacts of this algorithm.
    pub version_hash: String,
    /// Sensor placement roles, in order. The first role is primary: its
    /// chunk timestamps become the output row timestamps.
    pub places: Vec<String>,
    /// Output field names; suffix conventions `/time` and `/count` drive the
    /// bin aggregator's unit conversion.
    pub outputs: Vec<String>,
    /// Samples per analysis chunk.
    pub chunk_samples: usize,
    runner: Arc<dyn AnalysisFunction>,
}

impl fmt::Debug for AlgorithmDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlgorithmDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("version_hash", &self.version_hash)
            .field("places", &self.places)
            .field("outputs", &self.outputs)
            .field("chunk_samples", &self.chunk_samples)
            .finish()
    }
}

impl AlgorithmDescriptor {
    pub fn new(
        name: &str,
        version: &str,
        places: Vec<String>,
        outputs: Vec<String>,
        chunk_samples: usize,
        runner: Arc<dyn AnalysisFunction>,
    ) -> Self {
        Self {
            name: name.to_string(),
            version: version.to_string(),
            version_hash: content_hash(version),
            places,
            outputs,
            chunk_samples,
            runner,
        }
    }

    /// Run the algorithm over one bundle per role, chunking each role's
    /// primary stream. Returns an empty artifact when any role has no data.
    pub fn analyse_data(
        &self,
        data_map: &HashMap<String, SensorDataBundle>,
        parameters: &Value,
    ) -> Result<DerivedData> {
        if data_map.len() != self.places.len() {
            return Err(Error::AnalysisFailed(format!(
                "algorithm {} expects {} roles, got {}",
                self.name,
                self.places.len(),
                data_map.len()
            )));
        }

        if data_map.values().any(|bundle| !bundle.has_data()) {
            return Ok(DerivedData::empty(
                &self.name,
                &self.version_hash,
                &self.outputs,
            ));
        }

        let mut chunked: HashMap<String, SensorData> = HashMap::new();
        for place in &self.places {
            let bundle = data_map
                .get(place)
                .ok_or_else(|| Error::AnalysisFailed(format!("missing role {}", place)))?;
            // todo: merge multiple session parts instead of using the first
            let part = bundle.primary().expect("bundle has data");
            chunked.insert(place.clone(), part.chunked_view(self.chunk_samples));
        }

        let primary = &chunked[&self.places[0]];
        let rows = primary.chunk_count();
        let ts = primary.ts.clone();
        let (start_ts, end_ts) = (primary.start_ts, primary.end_ts);

        let matrix = self
            .runner
            .analyse(&chunked, parameters)
            .map_err(Error::AnalysisFailed)?;
        if matrix.len() != rows * self.outputs.len() {
            return Err(Error::AnalysisFailed(format!(
                "algorithm {} returned {} values, expected {}x{}",
                self.name,
                matrix.len(),
                rows,
                self.outputs.len()
            )));
        }

        Ok(DerivedData {
            start_ts,
            end_ts,
            algorithm: self.name.clone(),
            version_hash: self.version_hash.clone(),
            fields: self.outputs.clone(),
            ts,
            data: matrix,
        })
    }
}

/// Explicit name-to-descriptor mapping, constructed once and passed into the
/// cache and worker components. No global mutable state.
#[derive(Debug, Clone, Default)]
pub struct AlgorithmRegistry {
    algorithms: HashMap<String, AlgorithmDescriptor>,
}

impl AlgorithmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, descriptor: AlgorithmDescriptor) {
        self.algorithms.insert(descriptor.name.clone(), descriptor);
    }

    pub fn get(&self, name: &str) -> Option<&AlgorithmDescriptor> {
        self.algorithms.get(name)
    }

    pub fn resolve(&self, name: &str) -> Result<&AlgorithmDescriptor> {
        self.get(name)
            .ok_or_else(|| Error::AlgorithmNotFound(name.to_string()))
    }
}

/// A stored algorithm selection: which algorithm to run and with which
/// parameter blob. Referenced by cache and queue rows through `id`.
#[derive(Debug, Clone, PartialEq)]
pub struct AlgProfile {
    pub id: i64,
    pub name: String,
    pub algorithm: String,
    pub parameters: Value,
}
