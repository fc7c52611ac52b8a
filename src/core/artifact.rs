// Versioned binary serialization of derived-data artifacts.
//
// Stored layout: one compression-code byte, then the compressed body:
//   MAGIC(4) version(u8)
//   algorithm(str) version_hash(str)
//   field_count(u16) field names(str...)
//   row_count(u32) start_ts(f64) end_ts(f64)
//   ts(f64 x rows) data(i32 x rows x fields)
// Strings are u16 length + UTF-8 bytes; all integers little-endian.

use crate::core::compression;
use crate::core::constants::{CompressionType, ARTIFACT_MAGIC, ARTIFACT_VERSION};
use crate::core::error::{Error, Result};
use crate::models::derived_data::DerivedData;

fn write_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u16).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.data.len() {
            return Err(Error::DataFormat(format!(
                "artifact truncated at byte {}",
                self.pos
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()))
    }

    fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        Ok(String::from_utf8(self.take(len)?.to_vec())?)
    }
}

pub fn encode(data: &DerivedData) -> Vec<u8> {
    let rows = data.rows();
    let mut out = Vec::with_capacity(64 + rows * (8 + data.fields.len() * 4));
    out.extend_from_slice(ARTIFACT_MAGIC);
    out.push(ARTIFACT_VERSION);
    write_string(&mut out, &data.algorithm);
    write_string(&mut out, &data.version_hash);
    out.extend_from_slice(&(data.fields.len() as u16).to_le_bytes());
    for field in &data.fields {
        write_string(&mut out, field);
    }
    out.extend_from_slice(&(rows as u32).to_le_bytes());
    out.extend_from_slice(&data.start_ts.to_le_bytes());
    out.extend_from_slice(&data.end_ts.to_le_bytes());
    for &t in &data.ts {
        out.extend_from_slice(&t.to_le_bytes());
    }
    for &v in &data.data {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

pub fn decode(bytes: &[u8]) -> Result<DerivedData> {
    let mut cur = Cursor {
        data: bytes,
        pos: 0,
    };

    let magic = cur.take(4)?;
    if magic != ARTIFACT_MAGIC {
        return Err(Error::InvalidMagic {
            expected: ARTIFACT_MAGIC.to_vec(),
            got: magic.to_vec(),
        });
    }
    let version = cur.read_u8()?;
    if version != ARTIFACT_VERSION {
        return Err(Error::UnsupportedVersion(version));
    }

    let algorithm = cur.read_string()?;
    let version_hash = cur.read_string()?;
    let field_count = cur.read_u16()? as usize;
    let mut fields = Vec::with_capacity(field_count);
    for _ in 0..field_count {
        fields.push(cur.read_string()?);
    }

    let rows = cur.read_u32()? as usize;
    let start_ts = cur.read_f64()?;
    let end_ts = cur.read_f64()?;
    let mut ts = Vec::with_capacity(rows);
    for _ in 0..rows {
        ts.push(cur.read_f64()?);
    }
    let mut data = Vec::with_capacity(rows * field_count);
    for _ in 0..rows * field_count {
        data.push(cur.read_i32()?);
    }

    if cur.pos != bytes.len() {
        return Err(Error::DataFormat(format!(
            "artifact has {} trailing bytes",
            bytes.len() - cur.pos
        )));
    }

    Ok(DerivedData {
        start_ts,
        end_ts,
        algorithm,
        version_hash,
        fields,
        ts,
        data,
    })
}

/// Serialize and compress an artifact for storage.
pub fn seal(data: &DerivedData, compression: CompressionType) -> Result<Vec<u8>> {
    let body = encode(data);
    let mut out = vec![compression as u8];
    out.extend(compression::compress(&body, compression)?);
    Ok(out)
}

/// Decompress and deserialize a stored artifact.
pub fn unseal(bytes: &[u8]) -> Result<DerivedData> {
    let code = *bytes
        .first()
        .ok_or_else(|| Error::DataFormat("empty artifact payload".into()))?;
    let compression =
        CompressionType::from_u8(code).ok_or(Error::UnsupportedCompression(code))?;
    let body = compression::decompress(&bytes[1..], compression)?;
    decode(&body)
}
