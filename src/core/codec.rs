// Variable-width delta codec for tri-axial sensor samples.
//
// Frame layout (first-byte tags, MSB first):
//   0xxxxxxx                2 bytes   3x5-bit signed delta
//   10xxxxxx                4 bytes   3x10-bit signed delta
//   110xxxxx                3 bytes   3x7-bit signed delta
//   1110xxxx                1 byte    idle run, 4-bit value + 6 samples
//   11110xxx + 1 byte       2 bytes   idle run, 11-bit value + 1 samples
//   111110xx                5 bytes   3x11-bit absolute (new reference)
//   1111110x + len + data   variable  marker, first 4 payload bytes = tick
//   11111111                1 byte    packet boundary fill
//
// Delta frames add to a running reference vector, idle frames repeat it,
// absolute frames replace it. The byte layout must be reproduced exactly for
// interoperability with deployed device firmware.

use crate::core::constants::*;
use crate::core::error::{Error, Result};
use crate::core::pack::{packvals, unpackvals, within};

const ABSOLUTE_LIMIT: i32 = 1 << 10;
const ABSOLUTE_VALUE_BITS: u64 = (1 << 33) - 1;

fn delta(cur: [i16; 3], prev: [i16; 3]) -> [i32; 3] {
    [
        cur[0] as i32 - prev[0] as i32,
        cur[1] as i32 - prev[1] as i32,
        cur[2] as i32 - prev[2] as i32,
    ]
}

fn frame_delta5(diff: [i32; 3]) -> [u8; 2] {
    (packvals(diff, 5) as u16).to_be_bytes()
}

fn frame_delta7(diff: [i32; 3]) -> [u8; 3] {
    let v = 0xC0_0000u32 | packvals(diff, 7) as u32;
    [(v >> 16) as u8, (v >> 8) as u8, v as u8]
}

fn frame_delta10(diff: [i32; 3]) -> [u8; 4] {
    (0x8000_0000u32 | packvals(diff, 10) as u32).to_be_bytes()
}

fn frame_absolute(cur: [i16; 3]) -> [u8; 5] {
    let packed = packvals([cur[0] as i32, cur[1] as i32, cur[2] as i32], 11);
    let v = 0xF8_0000_0000u64 | packed;
    [
        (v >> 32) as u8,
        (v >> 24) as u8,
        (v >> 16) as u8,
        (v >> 8) as u8,
        v as u8,
    ]
}

fn frame_idle(run: usize) -> [u8; 2] {
    debug_assert!(run >= 1 && run <= IDLE_MAX_RUN);
    (0xF000u16 | (run as u16 - 1)).to_be_bytes()
}

/// Build an out-of-band timestamp marker carrying a device tick counter.
/// Produced by gateway firmware; provided here for tooling and tests.
pub fn marker_frame(timestamp_tx: u32) -> Vec<u8> {
    let mut frame = vec![TAG_MARKER, 4];
    frame.extend_from_slice(&timestamp_tx.to_be_bytes());
    frame
}

#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    pub max_samples: usize,
    pub max_packetsize: usize,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            max_samples: DEFAULT_MAX_SAMPLES,
            max_packetsize: DEFAULT_MAX_PACKETSIZE,
        }
    }
}

/// Lazy packet encoder. Each `next()` yields one radio packet; every packet
/// starts with an absolute frame so packets decode independently. The
/// encoder holds no state across calls to `encode`.
pub struct Encoder<'a> {
    samples: &'a [[i16; 3]],
    opts: EncodeOptions,
    i: usize,
    i_returned: usize,
    prev: [i16; 3],
}

impl<'a> Encoder<'a> {
    pub fn new(samples: &'a [[i16; 3]], opts: EncodeOptions) -> Result<Self> {
        for s in samples {
            for &v in s {
                let v = v as i32;
                if v >= ABSOLUTE_LIMIT || v < -ABSOLUTE_LIMIT {
                    return Err(Error::SampleOutOfRange(v));
                }
            }
        }
        Ok(Self {
            samples,
            opts,
            i: 0,
            i_returned: 0,
            prev: [0; 3],
        })
    }

    /// Length of an idle run starting at `self.i`, bounded by the remaining
    /// input, the per-packet sample budget and `IDLE_MAX_RUN`.
    fn idle_run(&self, packet_len: usize) -> usize {
        if packet_len >= self.opts.max_packetsize - 6 {
            return 0;
        }
        let mut l = 0;
        while self.i + l < self.samples.len()
            && (self.i - self.i_returned + l) < self.opts.max_samples
            && l < IDLE_MAX_RUN
        {
            let d = delta(self.samples[self.i + l], self.prev);
            if d.iter().any(|v| v.abs() > IDLE_WINDOW) {
                break;
            }
            l += 1;
        }
        l
    }
}

impl<'a> Iterator for Encoder<'a> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Vec<u8>> {
        if self.i >= self.samples.len() {
            return None;
        }

        let mut data: Vec<u8> = Vec::new();
        while self.i < self.samples.len() {
            let cur = self.samples[self.i];
            let mut did_idle = false;

            if data.is_empty() {
                data.extend_from_slice(&frame_absolute(cur));
            } else {
                let diff = delta(cur, self.prev);
                let run = self.idle_run(data.len());
                if run >= IDLE_MIN_LEN {
                    data.extend_from_slice(&frame_idle(run));
                    self.i += run - 1;
                    did_idle = true;
                } else if within(diff, 5) {
                    data.extend_from_slice(&frame_delta5(diff));
                } else if within(diff, 7) {
                    data.extend_from_slice(&frame_delta7(diff));
                } else if within(diff, 10) {
                    data.extend_from_slice(&frame_delta10(diff));
                } else {
                    data.extend_from_slice(&frame_absolute(cur));
                }
            }

            if !did_idle {
                self.prev = self.samples[self.i];
            }
            self.i += 1;

            if (self.i - self.i_returned) >= self.opts.max_samples
                || data.len() >= self.opts.max_packetsize - 4
            {
                break;
            }
        }

        self.i_returned = self.i;
        Some(data)
    }
}

/// Encode with default packet limits, collecting all packets.
pub fn compress(samples: &[[i16; 3]]) -> Result<Vec<Vec<u8>>> {
    Ok(Encoder::new(samples, EncodeOptions::default())?.collect())
}

fn read_be(data: &[u8], offset: usize, len: usize) -> Result<u64> {
    if offset + len > data.len() {
        return Err(Error::TruncatedFrame(offset));
    }
    let mut val = 0u64;
    for &b in &data[offset..offset + len] {
        val = (val << 8) | b as u64;
    }
    Ok(val)
}

/// Decode a compressed byte stream back to raw samples.
///
/// Unknown tag bytes fail with `CorruptFrame`; a frame running past the end
/// of the buffer fails with `TruncatedFrame`. Marker and padding frames are
/// skipped without producing samples.
pub fn decompress(data: &[u8]) -> Result<Vec<[i16; 3]>> {
    let mut out: Vec<[i16; 3]> = Vec::new();
    let mut reference = [0i16; 3];
    let mut i = 0;

    while i < data.len() {
        let d = data[i];
        if d & TAG_DELTA5_MASK == TAG_DELTA5 {
            let diff = unpackvals(read_be(data, i, 2)?, 5);
            apply_delta(&mut reference, diff);
            out.push(reference);
            i += 2;
        } else if d & TAG_DELTA10_MASK == TAG_DELTA10 {
            let diff = unpackvals(read_be(data, i, 4)?, 10);
            apply_delta(&mut reference, diff);
            out.push(reference);
            i += 4;
        } else if d & TAG_DELTA7_MASK == TAG_DELTA7 {
            let diff = unpackvals(read_be(data, i, 3)?, 7);
            apply_delta(&mut reference, diff);
            out.push(reference);
            i += 3;
        } else if d & TAG_IDLE_SHORT_MASK == TAG_IDLE_SHORT {
            let run = (d & 0x0F) as usize + 6;
            out.extend(std::iter::repeat(reference).take(run));
            i += 1;
        } else if d & TAG_IDLE_LONG_MASK == TAG_IDLE_LONG {
            let run = (read_be(data, i, 2)? & 0x7FF) as usize + 1;
            out.extend(std::iter::repeat(reference).take(run));
            i += 2;
        } else if d & TAG_ABSOLUTE_MASK == TAG_ABSOLUTE {
            let abs = unpackvals(read_be(data, i, 5)? & ABSOLUTE_VALUE_BITS, 11);
            reference = [abs[0] as i16, abs[1] as i16, abs[2] as i16];
            out.push(reference);
            i += 5;
        } else if d & TAG_MARKER_MASK == TAG_MARKER {
            let len = read_be(data, i, 2)? as usize & 0xFF;
            if i + 2 + len > data.len() {
                return Err(Error::TruncatedFrame(i));
            }
            i += 2 + len;
        } else if d == TAG_PADDING {
            i += 1;
        } else {
            return Err(Error::CorruptFrame(d, i));
        }
    }
    Ok(out)
}

fn apply_delta(reference: &mut [i16; 3], diff: [i32; 3]) {
    for c in 0..3 {
        reference[c] = reference[c].wrapping_add(diff[c] as i16);
    }
}

/// One stretch of compressed stream between timestamp markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketSegment {
    pub timestamp_tx: u32,
    pub sample_count: usize,
    pub byte_len: usize,
}

/// Scan a compressed stream for timestamp markers without reconstructing
/// samples, reporting per-segment device tick, sample count and byte length.
pub fn analyze(data: &[u8]) -> Result<Vec<PacketSegment>> {
    let mut segments = Vec::new();
    let mut i = 0;
    let mut segment_start = 0;
    let mut samples = 0usize;
    let mut tx = 0u32;

    while i < data.len() {
        let d = data[i];
        if d & TAG_DELTA5_MASK == TAG_DELTA5 {
            read_be(data, i, 2)?;
            i += 2;
            samples += 1;
        } else if d & TAG_DELTA10_MASK == TAG_DELTA10 {
            read_be(data, i, 4)?;
            i += 4;
            samples += 1;
        } else if d & TAG_DELTA7_MASK == TAG_DELTA7 {
            read_be(data, i, 3)?;
            i += 3;
            samples += 1;
        } else if d & TAG_IDLE_SHORT_MASK == TAG_IDLE_SHORT {
            samples += (d & 0x0F) as usize + 6;
            i += 1;
        } else if d & TAG_IDLE_LONG_MASK == TAG_IDLE_LONG {
            samples += (read_be(data, i, 2)? & 0x7FF) as usize + 1;
            i += 2;
        } else if d & TAG_ABSOLUTE_MASK == TAG_ABSOLUTE {
            read_be(data, i, 5)?;
            i += 5;
            samples += 1;
        } else if d & TAG_MARKER_MASK == TAG_MARKER {
            let len = read_be(data, i, 2)? as usize & 0xFF;
            if len < 4 || i + 2 + len > data.len() {
                return Err(Error::TruncatedFrame(i));
            }
            if tx != 0 {
                segments.push(PacketSegment {
                    timestamp_tx: tx,
                    sample_count: samples,
                    byte_len: i - segment_start,
                });
                samples = 0;
                segment_start = i;
            }
            tx = read_be(data, i + 2, 4)? as u32;
            i += 2 + len;
        } else if d == TAG_PADDING {
            i += 1;
        } else {
            return Err(Error::CorruptFrame(d, i));
        }
    }

    segments.push(PacketSegment {
        timestamp_tx: tx,
        sample_count: samples,
        byte_len: i - segment_start,
    });
    Ok(segments)
}
