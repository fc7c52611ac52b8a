// Error handling for the actimetry core

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Corrupt frame: unknown tag byte 0x{0:02X} at offset {1}")]
    CorruptFrame(u8, usize),

    #[error("Truncated frame at offset {0}")]
    TruncatedFrame(usize),

    #[error("Sample component {0} outside the 11-bit absolute range")]
    SampleOutOfRange(i32),

    #[error("Invalid magic bytes: expected {expected:?}, got {got:?}")]
    InvalidMagic { expected: Vec<u8>, got: Vec<u8> },

    #[error("Unsupported artifact version: {0}")]
    UnsupportedVersion(u8),

    #[error("Unsupported compression type: {0}")]
    UnsupportedCompression(u8),

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("Corrupted data: {0}")]
    DataFormat(String),

    #[error("Timestamp out of range: tick {tx} relative to sync tick {reference}")]
    TimestampOutOfRange { tx: i64, reference: i64 },

    #[error("Analysis failed: {0}")]
    AnalysisFailed(String),

    #[error("Unknown algorithm: {0}")]
    AlgorithmNotFound(String),

    #[error("Unknown algorithm profile: {0}")]
    ProfileNotFound(i64),

    #[error("Unknown sensor device: {0}")]
    SensorNotFound(i64),

    #[error("Window start is not aligned to an hour boundary")]
    UnalignedWindow,

    #[error("Store error: {0}")]
    Store(String),

    #[error("Invalid UTF-8 string")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}
