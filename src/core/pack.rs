// Bit-field packing helpers shared by the delta codec and the raw 10-bit
// stream unpacker.

use crate::core::error::{Error, Result};

/// Pack a signed `width`-bit value into two's complement at `offset`.
///
/// The caller guarantees `val` is inside `[-2^(width-1), 2^(width-1) - 1]`;
/// the encoder checks ranges before selecting a frame width.
pub(crate) fn packval(val: i32, offset: u32, width: u32) -> u64 {
    let limit = 1i64 << (width - 1);
    debug_assert!((val as i64) < limit && (val as i64) >= -limit);
    let bits = if val < 0 {
        (limit * 2 + val as i64) as u64
    } else {
        val as u64
    };
    bits << offset
}

/// Pack an (x, y, z) triple into `3 * width` bits, x in the highest field.
pub(crate) fn packvals(xyz: [i32; 3], width: u32) -> u64 {
    packval(xyz[0], width * 2, width) | packval(xyz[1], width, width) | packval(xyz[2], 0, width)
}

/// Extract a signed `width`-bit field from `raw` at `offset`.
pub(crate) fn unpackval(raw: u64, offset: u32, width: u32) -> i32 {
    let signbit = 1u64 << (width - 1);
    let valbits = signbit - 1;
    let field = raw >> offset;
    ((field & valbits) as i64 - (field & signbit) as i64) as i32
}

/// Extract an (x, y, z) triple packed by `packvals`.
pub(crate) fn unpackvals(raw: u64, width: u32) -> [i32; 3] {
    [
        unpackval(raw, width * 2, width),
        unpackval(raw, width, width),
        unpackval(raw, 0, width),
    ]
}

/// True if every component fits a signed `width`-bit field.
pub(crate) fn within(xyz: [i32; 3], width: u32) -> bool {
    let limit = 1i32 << (width - 1);
    xyz.iter().all(|&v| v < limit && v >= -limit)
}

/// Decode the gateway's raw 10-bit packing: each big-endian 4-byte word
/// carries three 10-bit two's-complement samples in its low 30 bits.
pub fn unpack_10bit(data: &[u8]) -> Result<Vec<i16>> {
    if data.len() % 4 != 0 {
        return Err(Error::DataFormat(format!(
            "10-bit stream length {} is not a multiple of 4",
            data.len()
        )));
    }

    let mut out = Vec::with_capacity(data.len() / 4 * 3);
    for word in data.chunks_exact(4) {
        let val = u32::from_be_bytes(word.try_into().unwrap()) as u64;
        out.push(unpackval(val, 20, 10) as i16);
        out.push(unpackval(val, 10, 10) as i16);
        out.push(unpackval(val, 0, 10) as i16);
    }
    Ok(out)
}
