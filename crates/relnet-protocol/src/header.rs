//! Datagram header.
//!
//! ```text
//!  15   14   13 12  11                       0
//! +----+----+-----+---------------------------+
//! | ST | CO | SES |          peer id          |   [sent time: u16 if ST]
//! +----+----+-----+---------------------------+
//! ```
//!
//! `ST` marks the presence of the sent time, `CO` a compressed command
//! stream, `SES` the 2-bit session id. A peer id of `0xFFF` means the sender
//! has no id assigned on our side yet (only Connect is valid then).

use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use relnet_core::constants::MAXIMUM_PEER_ID;

/// The command stream following the header is compressed.
pub const HEADER_FLAG_COMPRESSED: u16 = 1 << 14;
/// A 16-bit sent time follows the header.
pub const HEADER_FLAG_SENT_TIME: u16 = 1 << 15;
/// Both flag bits.
pub const HEADER_FLAG_MASK: u16 = HEADER_FLAG_COMPRESSED | HEADER_FLAG_SENT_TIME;
/// Session id bits.
pub const HEADER_SESSION_MASK: u16 = 3 << 12;
/// Position of the session id.
pub const HEADER_SESSION_SHIFT: u16 = 12;

/// Size of a header without sent time.
pub const MINIMUM_HEADER_SIZE: usize = 2;
/// Size of a header with sent time.
pub const MAXIMUM_HEADER_SIZE: usize = 4;

/// Decoded datagram header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Receiver-side peer id, `MAXIMUM_PEER_ID` if none
    pub peer_id: u16,
    /// Session id (0-3)
    pub session_id: u8,
    /// The command stream is compressed
    pub compressed: bool,
    /// Low 16 bits of the sender's service time, present when some command needs an ack
    pub sent_time: Option<u16>,
}

impl PacketHeader {
    /// Header addressed to no peer yet.
    pub fn unassigned() -> Self {
        Self { peer_id: MAXIMUM_PEER_ID, session_id: 0, compressed: false, sent_time: None }
    }

    /// Encoded size of this header.
    pub fn size(&self) -> usize {
        if self.sent_time.is_some() {
            MAXIMUM_HEADER_SIZE
        } else {
            MINIMUM_HEADER_SIZE
        }
    }

    /// Appends the header to `buffer`.
    pub fn encode_into(&self, buffer: &mut Vec<u8>) -> io::Result<()> {
        let mut word = self.peer_id & MAXIMUM_PEER_ID;
        if self.peer_id < MAXIMUM_PEER_ID {
            word |= (u16::from(self.session_id) << HEADER_SESSION_SHIFT) & HEADER_SESSION_MASK;
        }
        if self.compressed {
            word |= HEADER_FLAG_COMPRESSED;
        }
        if self.sent_time.is_some() {
            word |= HEADER_FLAG_SENT_TIME;
        }
        buffer.write_u16::<BigEndian>(word)?;
        if let Some(sent_time) = self.sent_time {
            buffer.write_u16::<BigEndian>(sent_time)?;
        }
        Ok(())
    }

    /// Reads a header from the start of `data`.
    ///
    /// Returns the header and the number of bytes it occupies.
    pub fn decode(data: &[u8]) -> io::Result<(Self, usize)> {
        let mut cursor = Cursor::new(data);
        let word = cursor.read_u16::<BigEndian>()?;
        let sent_time = if word & HEADER_FLAG_SENT_TIME != 0 {
            Some(cursor.read_u16::<BigEndian>()?)
        } else {
            None
        };
        let header = Self {
            peer_id: word & !(HEADER_FLAG_MASK | HEADER_SESSION_MASK),
            session_id: ((word & HEADER_SESSION_MASK) >> HEADER_SESSION_SHIFT) as u8,
            compressed: word & HEADER_FLAG_COMPRESSED != 0,
            sent_time,
        };
        Ok((header, cursor.position() as usize))
    }
}
