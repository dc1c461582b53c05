#![warn(missing_docs)]

//! relnet-protocol: wire format and congestion math.
//!
//! Stateless pieces of the protocol: the command set and its codec, the
//! datagram header, compression and checksum of whole datagrams, and the
//! integer round-trip / throttle / packet-loss arithmetic each peer runs.

/// Protocol command types.
pub mod command;
/// Command serialization and deserialization.
pub mod command_codec;
/// Congestion control and RTT tracking.
pub mod congestion;
/// Datagram header.
pub mod header;

pub use command::{
    Command, CommandHeader, CommandKind, ConnectParameters, FragmentHeader, ProtocolCommand,
};
pub use command_codec::{CommandDecoder, CommandEncoder, DecodedCommand};
pub use congestion::CongestionControl;
pub use header::PacketHeader;
