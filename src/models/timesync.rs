// Maps device tick counters to wall-clock time via per-session sync points.

use chrono::{DateTime, Duration, Utc};

use crate::core::constants::{TX_AHEAD_LIMIT_S, TX_REWIND_LIMIT_S, TX_TICK_SECONDS};
use crate::core::error::{Error, Result};

/// One observed pairing of a device tick counter with server time. Devices
/// keep a free-running 100 Hz counter; each upload carries such a pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeSync {
    pub session_id: i64,
    /// Device tick counter at the sync point.
    pub timestamp_tx: i64,
    /// Server wall clock at the sync point.
    pub server_time: DateTime<Utc>,
}

impl TimeSync {
    pub fn new(session_id: i64, timestamp_tx: i64, server_time: DateTime<Utc>) -> Self {
        Self {
            session_id,
            timestamp_tx,
            server_time,
        }
    }

    /// Convert a device tick to UTC relative to this sync point.
    ///
    /// Ticks slightly behind the reference occur when a packet was captured
    /// just before the sync upload; beyond a small rewind margin, or further
    /// ahead than a session can plausibly last, the tick is rejected.
    pub fn tx_to_utc(&self, tx: i64) -> Result<DateTime<Utc>> {
        let ticks = tx - self.timestamp_tx;
        let tick_ms = (TX_TICK_SECONDS * 1000.0) as i64;
        let offset_ms = ticks * tick_ms;
        if offset_ms < -TX_REWIND_LIMIT_S * 1000 || offset_ms > TX_AHEAD_LIMIT_S * 1000 {
            return Err(Error::TimestampOutOfRange {
                tx,
                reference: self.timestamp_tx,
            });
        }
        Ok(self.server_time + Duration::milliseconds(offset_ms))
    }
}
