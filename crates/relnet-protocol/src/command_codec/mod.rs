//! Command serialization and deserialization.
//!
//! # Module Organization
//!
//! - [`encoder`] - Command encoding to binary format
//! - [`decoder`] - Bounds-checked command decoding
//! - [`checksum`] - CRC32 datagram trailer
//! - [`compression`] - Command stream compression (Zlib, LZ4)

pub mod checksum;
pub mod compression;
pub mod decoder;
pub mod encoder;

#[cfg(test)]
mod tests;

pub use checksum::{append_checksum, validate_and_strip_checksum, CHECKSUM_SIZE};
pub use compression::{compress, decompress};
pub use decoder::{CommandDecoder, DecodedCommand};
pub use encoder::CommandEncoder;
