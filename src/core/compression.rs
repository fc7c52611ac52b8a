// Compression backend implementations for cached artifact payloads

use crate::core::constants::CompressionType;
use crate::core::error::{Error, Result};
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use std::io::{Read, Write};

pub fn compress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),

        CompressionType::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .and_then(|_| encoder.finish())
                .map_err(|e| Error::CompressionFailed(format!("Zlib: {}", e)))
        }

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => lz4::block::compress(data, None, true)
            .map_err(|e| Error::CompressionFailed(format!("LZ4: {}", e))),

        #[cfg(not(feature = "lz4"))]
        CompressionType::Lz4 => Err(Error::UnsupportedCompression(CompressionType::Lz4 as u8)),

        #[cfg(feature = "zstd")]
        CompressionType::Zstd => zstd::encode_all(data, 0)
            .map_err(|e| Error::CompressionFailed(format!("Zstd: {}", e))),

        #[cfg(not(feature = "zstd"))]
        CompressionType::Zstd => Err(Error::UnsupportedCompression(CompressionType::Zstd as u8)),
    }
}

pub fn decompress(data: &[u8], compression: CompressionType) -> Result<Vec<u8>> {
    match compression {
        CompressionType::None => Ok(data.to_vec()),

        CompressionType::Zlib => {
            let mut decoder = ZlibDecoder::new(data);
            let mut decompressed = Vec::new();
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| Error::DecompressionFailed(format!("Zlib: {}", e)))?;
            Ok(decompressed)
        }

        #[cfg(feature = "lz4")]
        CompressionType::Lz4 => lz4::block::decompress(data, None)
            .map_err(|e| Error::DecompressionFailed(format!("LZ4: {}", e))),

        #[cfg(not(feature = "lz4"))]
        CompressionType::Lz4 => Err(Error::UnsupportedCompression(CompressionType::Lz4 as u8)),

        #[cfg(feature = "zstd")]
        CompressionType::Zstd => zstd::decode_all(data)
            .map_err(|e| Error::DecompressionFailed(format!("Zstd: {}", e))),

        #[cfg(not(feature = "zstd"))]
        CompressionType::Zstd => Err(Error::UnsupportedCompression(CompressionType::Zstd as u8)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_none() {
        let data = b"hello world";
        let packed = compress(data, CompressionType::None).unwrap();
        assert_eq!(packed, data);
        assert_eq!(decompress(&packed, CompressionType::None).unwrap(), data);
    }

    #[test]
    fn test_round_trip_zlib() {
        let data = vec![7u8; 4096];
        let packed = compress(&data, CompressionType::Zlib).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed, CompressionType::Zlib).unwrap(), data);
    }

    #[cfg(feature = "lz4")]
    #[test]
    fn test_round_trip_lz4() {
        let data = vec![42u8; 4096];
        let packed = compress(&data, CompressionType::Lz4).unwrap();
        assert!(packed.len() < data.len());
        assert_eq!(decompress(&packed, CompressionType::Lz4).unwrap(), data);
    }
}
