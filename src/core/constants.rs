// Wire and cache constants

// Delta codec frame tags (mask, value) on the first byte, in decode priority
// order. A first byte matching none of these (0xFE in practice) is corrupt.
pub const TAG_DELTA5_MASK: u8 = 0x80; // 0xxxxxxx, 2 bytes
pub const TAG_DELTA5: u8 = 0x00;
pub const TAG_DELTA10_MASK: u8 = 0xC0; // 10xxxxxx, 4 bytes
pub const TAG_DELTA10: u8 = 0x80;
pub const TAG_DELTA7_MASK: u8 = 0xE0; // 110xxxxx, 3 bytes
pub const TAG_DELTA7: u8 = 0xC0;
pub const TAG_IDLE_SHORT_MASK: u8 = 0xF0; // 1110xxxx, 1 byte, run = val + 6
pub const TAG_IDLE_SHORT: u8 = 0xE0;
pub const TAG_IDLE_LONG_MASK: u8 = 0xF8; // 11110xxx + 1 byte, run = val + 1
pub const TAG_IDLE_LONG: u8 = 0xF0;
pub const TAG_ABSOLUTE_MASK: u8 = 0xFC; // 111110xx, 5 bytes, 3x11 bit absolute
pub const TAG_ABSOLUTE: u8 = 0xF8;
pub const TAG_MARKER_MASK: u8 = 0xFE; // 1111110x + length byte + payload
pub const TAG_MARKER: u8 = 0xFC;
pub const TAG_PADDING: u8 = 0xFF; // packet boundary fill

// Encoder tuning. An idle run is only worth a frame once it reaches
// IDLE_MIN_LEN samples; every sample in the run must stay within
// +-IDLE_WINDOW raw units of the reference vector.
pub const IDLE_MIN_LEN: usize = 12;
pub const IDLE_WINDOW: i32 = 8;
pub const IDLE_MAX_RUN: usize = 2048;

pub const DEFAULT_MAX_SAMPLES: usize = 4000;
pub const DEFAULT_MAX_PACKETSIZE: usize = 1024;

// Derived-data artifact framing
pub const ARTIFACT_MAGIC: &[u8; 4] = b"ADRV";
pub const ARTIFACT_VERSION: u8 = 1;

// Device tick counter resolution (seconds per tick)
pub const TX_TICK_SECONDS: f64 = 0.01;
// Ticks may jitter slightly behind the sync reference; anything earlier than
// this margin is implausible.
pub const TX_REWIND_LIMIT_S: i64 = 60;
// Upper clock-skew bound for a single recording session.
pub const TX_AHEAD_LIMIT_S: i64 = 45 * 24 * 3600;

// Cache freshness window (seconds): data more than 30 minutes before the hour
// bucket contributes 0, more than 90 minutes after saturates at 7200.
pub const FRESHNESS_PAD_BEFORE_S: i64 = 30 * 60;
pub const FRESHNESS_PAD_AFTER_S: i64 = 90 * 60;
pub const FRESHNESS_SATURATED_S: i64 = 120 * 60;

pub const CACHE_TTL_DAYS: i64 = 14;
pub const WORKER_POLL_BUSY_S: u64 = 1;
pub const WORKER_POLL_IDLE_S: u64 = 15;

// Compression codes stored in the artifact's leading byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    None = 0,
    Zlib = 1,
    Lz4 = 2,
    Zstd = 3,
}

impl CompressionType {
    pub fn from_u8(val: u8) -> Option<Self> {
        match val {
            0 => Some(CompressionType::None),
            1 => Some(CompressionType::Zlib),
            2 => Some(CompressionType::Lz4),
            3 => Some(CompressionType::Zstd),
            _ => None,
        }
    }
}

impl Default for CompressionType {
    #[cfg(feature = "lz4")]
    fn default() -> Self {
        CompressionType::Lz4
    }

    #[cfg(not(feature = "lz4"))]
    fn default() -> Self {
        CompressionType::Zlib
    }
}
