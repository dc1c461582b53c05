//! Command stream compression.
//!
//! The algorithm is not written on the wire; the `COMPRESSED` header flag only
//! says that the bytes after the header went through the configured
//! compressor. Both ends must therefore be configured with the same algorithm.

use std::io::{self, Read, Write};

use flate2::{read::ZlibDecoder, write::ZlibEncoder, Compression};
use relnet_core::config::CompressionAlgorithm;

/// Compresses `data` with `algorithm`.
///
/// Returns `None` when compression is disabled or would not shrink the data,
/// in which case the datagram goes out uncompressed.
pub fn compress(data: &[u8], algorithm: CompressionAlgorithm) -> io::Result<Option<Vec<u8>>> {
    let compressed = match algorithm {
        CompressionAlgorithm::None => return Ok(None),
        CompressionAlgorithm::Zlib => {
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
            encoder.write_all(data)?;
            encoder.finish()?
        }
        // The uncompressed size is prepended as a little-endian i32
        CompressionAlgorithm::Lz4 => lz4::block::compress(data, None, true)?,
    };

    // Only use compression if it actually reduces size
    if compressed.len() < data.len() {
        Ok(Some(compressed))
    } else {
        Ok(None)
    }
}

/// Inflates a command stream compressed with `algorithm`.
///
/// Output larger than `limit` bytes is rejected before it is materialized.
pub fn decompress(data: &[u8], algorithm: CompressionAlgorithm, limit: usize) -> io::Result<Vec<u8>> {
    match algorithm {
        CompressionAlgorithm::None => {
            Err(io::Error::new(io::ErrorKind::InvalidData, "Compressed datagram without compressor"))
        }
        CompressionAlgorithm::Zlib => {
            let mut decompressed = Vec::new();
            ZlibDecoder::new(data).take(limit as u64 + 1).read_to_end(&mut decompressed)?;
            if decompressed.len() > limit {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "Decompressed size over limit"));
            }
            Ok(decompressed)
        }
        CompressionAlgorithm::Lz4 => {
            if data.len() < 4 {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "LZ4 payload too short"));
            }
            let uncompressed_size = i32::from_le_bytes([data[0], data[1], data[2], data[3]]);
            if uncompressed_size < 0 || uncompressed_size as usize > limit {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("LZ4 uncompressed size {} over limit", uncompressed_size),
                ));
            }
            lz4::block::decompress(&data[4..], Some(uncompressed_size))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repetitive() -> Vec<u8> {
        b"relnet command stream ".iter().cycle().take(1000).copied().collect()
    }

    #[test]
    fn test_none_never_compresses() {
        assert_eq!(compress(&repetitive(), CompressionAlgorithm::None).unwrap(), None);
    }

    #[test]
    fn test_zlib_shrinks_and_restores() {
        let data = repetitive();
        let compressed = compress(&data, CompressionAlgorithm::Zlib).unwrap().unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed, CompressionAlgorithm::Zlib, 4096).unwrap(), data);
    }

    #[test]
    fn test_lz4_shrinks_and_restores() {
        let data = repetitive();
        let compressed = compress(&data, CompressionAlgorithm::Lz4).unwrap().unwrap();
        assert!(compressed.len() < data.len());
        assert_eq!(decompress(&compressed, CompressionAlgorithm::Lz4, 4096).unwrap(), data);
    }

    #[test]
    fn test_incompressible_data_is_left_alone() {
        let data = [7u8, 3, 250, 1];
        assert_eq!(compress(&data, CompressionAlgorithm::Zlib).unwrap(), None);
        assert_eq!(compress(&data, CompressionAlgorithm::Lz4).unwrap(), None);
    }

    #[test]
    fn test_decompression_limit() {
        let data = repetitive();
        let zlib = compress(&data, CompressionAlgorithm::Zlib).unwrap().unwrap();
        assert!(decompress(&zlib, CompressionAlgorithm::Zlib, 100).is_err());

        let lz4 = compress(&data, CompressionAlgorithm::Lz4).unwrap().unwrap();
        assert!(decompress(&lz4, CompressionAlgorithm::Lz4, 100).is_err());
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(decompress(&[1, 2], CompressionAlgorithm::Lz4, 4096).is_err());
        assert!(decompress(&[0xDE, 0xAD, 0xBE, 0xEF], CompressionAlgorithm::Zlib, 4096).is_err());
    }
}
