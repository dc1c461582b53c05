use std::io;

use thiserror::Error;

/// Wrapped result type for relnet operations.
pub type Result<T> = std::result::Result<T, ErrorKind>;

/// Enum with all possible errors that could occur.
#[derive(Debug, Error)]
pub enum ErrorKind {
    /// The requested peer table is larger than the protocol can address
    #[error("peer count {requested} exceeds the protocol maximum of {maximum}")]
    TooManyPeers {
        /// Requested number of peers
        requested: usize,
        /// Largest number of peers the wire format can address
        maximum: usize,
    },
    /// The packet exceeds the configured maximum packet size or fragment count
    #[error("packet of {size} bytes exceeds the maximum of {maximum} bytes")]
    PacketTooLarge {
        /// Size of the rejected packet
        size: usize,
        /// Largest accepted size
        maximum: usize,
    },
    /// The peer slot is not connected
    #[error("peer is not connected")]
    PeerNotConnected,
    /// The peer id does not name a slot of this host
    #[error("unknown peer {0}")]
    UnknownPeer(usize),
    /// The channel id is not open on the peer
    #[error("channel {0} is not open on this peer")]
    InvalidChannel(u8),
    /// A received command was malformed or not allowed in the peer's state;
    /// the rest of its datagram is discarded
    #[error("command rejected: {0}")]
    CommandRejected(&'static str),
    /// Wrapper around a std io::Error
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts() {
        let err: ErrorKind = io::Error::new(io::ErrorKind::Other, "boom").into();
        assert!(matches!(err, ErrorKind::Io(_)));
    }

    #[test]
    fn test_messages_are_readable() {
        let err = ErrorKind::TooManyPeers { requested: 5000, maximum: 4095 };
        assert_eq!(err.to_string(), "peer count 5000 exceeds the protocol maximum of 4095");
        let err = ErrorKind::CommandRejected("ping before connect");
        assert_eq!(err.to_string(), "command rejected: ping before connect");
    }
}
