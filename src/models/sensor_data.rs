// In-memory view over decoded sensor samples: unit scaling, time windowing
// and chunked reshaping for chunk-oriented algorithms.

use std::sync::OnceLock;

use chrono::{DateTime, Utc};

use crate::utils::time::{from_unixts, unixts};

/// Stream type tag. Fixes the channel semantics and the raw-to-physical
/// scale factor of a sample matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Tri-axial accelerometer, +-4g range, raw units of 1/125 g.
    Acc3Ax4G,
    /// Die temperature, 0.1 degree units.
    TempAccScalar,
    /// System voltage in millivolts.
    VoltSystemMv,
    /// Capacitive stretch sensor, scalar.
    CapStretchScalar,
    /// Algorithm output rows.
    Derived,
}

impl StreamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamType::Acc3Ax4G => "acc/3ax/4g",
            StreamType::TempAccScalar => "temp/acc/scalar",
            StreamType::VoltSystemMv => "volt/system/mv",
            StreamType::CapStretchScalar => "cap/stretch/scalar",
            StreamType::Derived => "derived",
        }
    }

    pub fn parse(s: &str) -> Option<StreamType> {
        match s {
            "acc/3ax/4g" => Some(StreamType::Acc3Ax4G),
            "temp/acc/scalar" => Some(StreamType::TempAccScalar),
            "volt/system/mv" => Some(StreamType::VoltSystemMv),
            "cap/stretch/scalar" => Some(StreamType::CapStretchScalar),
            "derived" => Some(StreamType::Derived),
            _ => None,
        }
    }

    /// Multiplier from raw integer units to the physical unit.
    pub fn scale(&self) -> f64 {
        match self {
            StreamType::Acc3Ax4G => 4.0 / 500.0,
            StreamType::TempAccScalar => 0.1,
            StreamType::VoltSystemMv => 0.001,
            StreamType::CapStretchScalar => 5.0,
            StreamType::Derived => 1.0,
        }
    }
}

/// Binary search for the index range of timestamps inside `(start, end]`.
/// Returns `(first, last)` suitable for slicing; either may equal `ts.len()`.
pub fn window(ts: &[f64], start_ts: f64, end_ts: f64) -> (usize, usize) {
    if ts.is_empty() {
        return (0, 0);
    }
    let first = ts.partition_point(|&t| t <= start_ts);
    let last = ts.partition_point(|&t| t <= end_ts);
    (first, last)
}

/// One sensor's decoded samples over a contiguous time span.
///
/// `data` is a flat row-major matrix of `channels` columns; `ts` holds one
/// unix-ms timestamp per row (per chunk when chunked). The scaled view is
/// memoized and only invalidated through `replace_raw`.
#[derive(Debug)]
pub struct SensorData {
    pub start_ts: f64,
    pub end_ts: f64,
    pub ts: Vec<f64>,
    pub stream_type: StreamType,
    data: Vec<i16>,
    channels: usize,
    chunk_size: Option<usize>,
    scaled: OnceLock<Vec<f64>>,
}

impl SensorData {
    pub fn new(
        start_ts: f64,
        end_ts: f64,
        ts: Vec<f64>,
        stream_type: StreamType,
        data: Vec<i16>,
        channels: usize,
    ) -> Self {
        debug_assert!(channels > 0 && data.len() % channels == 0);
        Self {
            start_ts,
            end_ts,
            ts,
            stream_type,
            data,
            channels,
            chunk_size: None,
            scaled: OnceLock::new(),
        }
    }

    pub fn empty(stream_type: StreamType) -> Self {
        Self::new(0.0, 0.0, Vec::new(), stream_type, Vec::new(), 1)
    }

    /// Build a view with evenly spaced timestamps over `[start_ts, end_ts)`.
    pub fn from_continuous(
        start_ts: f64,
        end_ts: f64,
        stream_type: StreamType,
        data: Vec<i16>,
        channels: usize,
    ) -> Self {
        let rows = if channels > 0 { data.len() / channels } else { 0 };
        let ts = (0..rows)
            .map(|i| i as f64 / rows as f64 * (end_ts - start_ts) + start_ts)
            .collect();
        Self::new(start_ts, end_ts, ts, stream_type, data, channels)
    }

    pub fn raw(&self) -> &[i16] {
        &self.data
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Swap the raw matrix, dropping the memoized scaled view.
    pub fn replace_raw(&mut self, data: Vec<i16>) {
        debug_assert!(data.len() % self.channels == 0);
        self.data = data;
        self.scaled = OnceLock::new();
    }

    /// Unit-scaled samples, memoized on first access.
    pub fn samples(&self) -> &[f64] {
        self.scaled.get_or_init(|| {
            let scale = self.stream_type.scale();
            self.data.iter().map(|&v| v as f64 * scale).collect()
        })
    }

    pub fn has_data(&self) -> bool {
        !self.data.is_empty()
    }

    /// Total sample rows, regardless of chunking.
    pub fn sample_count(&self) -> usize {
        self.data.len() / self.channels
    }

    pub fn is_chunked(&self) -> bool {
        self.chunk_size.is_some()
    }

    pub fn chunk_count(&self) -> usize {
        match self.chunk_size {
            Some(size) => self.sample_count() / size,
            None => 1,
        }
    }

    pub fn chunk_len(&self) -> Option<usize> {
        self.chunk_size
    }

    /// Raw rows of one chunk.
    pub fn chunk_raw(&self, idx: usize) -> &[i16] {
        let size = self.chunk_size.expect("not a chunked view") * self.channels;
        &self.data[idx * size..(idx + 1) * size]
    }

    /// Scaled rows of one chunk.
    pub fn chunk_samples(&self, idx: usize) -> &[f64] {
        let size = self.chunk_size.expect("not a chunked view") * self.channels;
        &self.samples()[idx * size..(idx + 1) * size]
    }

    /// Slice out the samples inside `[start, end)` by timestamp.
    pub fn windowed_view(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> SensorData {
        if !self.has_data() {
            return SensorData::empty(self.stream_type);
        }
        let start_ts = unixts(start) as f64;
        let end_ts = unixts(end) as f64;
        let (first, last) = window(&self.ts, start_ts, end_ts);
        SensorData::new(
            start_ts,
            end_ts,
            self.ts[first..last].to_vec(),
            self.stream_type,
            self.data[first * self.channels..last * self.channels].to_vec(),
            self.channels,
        )
    }

    /// Regroup into fixed-size chunks, dropping the trailing remainder.
    /// The timestamp vector keeps one entry per chunk (the chunk start).
    pub fn chunked_view(&self, sample_count: usize) -> SensorData {
        let rows = self.sample_count();
        let keep = rows - rows % sample_count;
        let ts = self.ts[..keep].iter().step_by(sample_count).copied().collect();
        let mut view = SensorData::new(
            self.start_ts,
            self.end_ts,
            ts,
            self.stream_type,
            self.data[..keep * self.channels].to_vec(),
            self.channels,
        );
        view.chunk_size = Some(sample_count);
        view
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        from_unixts(self.start_ts as i64)
    }

    pub fn end_time(&self) -> DateTime<Utc> {
        from_unixts(self.end_ts as i64)
    }
}

/// Possibly-disjoint `SensorData` parts (e.g. separate recording sessions)
/// covering one logical request window.
#[derive(Debug)]
pub struct SensorDataBundle {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub stream_type: StreamType,
    parts: Vec<SensorData>,
}

impl SensorDataBundle {
    pub fn new(
        start_time: Option<DateTime<Utc>>,
        end_time: Option<DateTime<Utc>>,
        stream_type: StreamType,
    ) -> Self {
        Self {
            start_time,
            end_time,
            stream_type,
            parts: Vec::new(),
        }
    }

    /// Attach one part, widening the bundle's covering time bounds. Parts
    /// without samples are dropped.
    pub fn add(&mut self, sensor_data: SensorData) {
        if !sensor_data.has_data() {
            return;
        }
        let start = sensor_data.start_time();
        let end = sensor_data.end_time();
        if self.start_time.map_or(true, |t| t > start) {
            self.start_time = Some(start);
        }
        if self.end_time.map_or(true, |t| t < end) {
            self.end_time = Some(end);
        }
        self.parts.push(sensor_data);
    }

    pub fn has_data(&self) -> bool {
        !self.parts.is_empty()
    }

    pub fn data_parts(&self) -> usize {
        self.parts.len()
    }

    pub fn parts(&self) -> &[SensorData] {
        &self.parts
    }

    pub fn primary(&self) -> Option<&SensorData> {
        self.parts.first()
    }
}
