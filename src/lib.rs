// Actimetry core
// Main library entry point

pub mod core;
pub mod models;
pub mod query;
pub mod state;
pub mod utils;
pub mod worker;

// Re-export main types
pub use crate::core::codec::{analyze, compress, decompress, marker_frame, EncodeOptions, Encoder};
pub use crate::core::error::{Error, Result};
pub use crate::models::algorithm::{AlgProfile, AlgorithmDescriptor, AlgorithmRegistry};
pub use crate::models::cache::{make_cache_id, SensorMap};
pub use crate::models::sensor_data::{SensorData, SensorDataBundle, StreamType};
pub use crate::query::bins::{fetch_derived_data_bins, BinsResult, SummaryBin};
pub use crate::query::derived::{CacheLookup, DerivedCache};
pub use crate::worker::{run_step, WorkerOutcome};
