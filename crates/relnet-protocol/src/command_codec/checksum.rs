//! CRC32 datagram trailer.

use std::io;

/// Size of the checksum trailer.
pub const CHECKSUM_SIZE: usize = 4;

/// Appends the CRC32 of everything already in `datagram`.
pub fn append_checksum(datagram: &mut Vec<u8>) {
    let checksum = crc32fast::hash(datagram);
    datagram.extend_from_slice(&checksum.to_be_bytes());
}

/// Verifies and strips the CRC32 trailer.
/// Returns the datagram without checksum if valid, or an error if it does not match.
pub fn validate_and_strip_checksum(datagram: &[u8]) -> io::Result<&[u8]> {
    if datagram.len() < CHECKSUM_SIZE {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "Data too short for checksum"));
    }

    let (payload, trailer) = datagram.split_at(datagram.len() - CHECKSUM_SIZE);
    let received = u32::from_be_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let computed = crc32fast::hash(payload);

    if received != computed {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("CRC32 checksum mismatch: expected {:08x}, got {:08x}", computed, received),
        ));
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_trailer_is_stripped() {
        let mut datagram = vec![0x8F, 0xFF, 0x00, 0x01, 2, 3, 4];
        append_checksum(&mut datagram);
        assert_eq!(datagram.len(), 7 + CHECKSUM_SIZE);
        assert_eq!(validate_and_strip_checksum(&datagram).unwrap(), &[0x8F, 0xFF, 0x00, 0x01, 2, 3, 4]);
    }

    #[test]
    fn test_corruption_is_detected() {
        let mut datagram = vec![1, 2, 3, 4, 5];
        append_checksum(&mut datagram);
        datagram[2] ^= 0x01;
        assert!(validate_and_strip_checksum(&datagram).is_err());
    }

    #[test]
    fn test_short_datagram() {
        assert!(validate_and_strip_checksum(&[1, 2, 3]).is_err());
    }
}
