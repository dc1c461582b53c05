#![warn(missing_docs)]

//! relnet-core: foundational types shared by every relnet layer.
//!
//! This crate provides the minimal set of pieces the protocol, peer and host
//! crates agree on:
//! - Configuration types
//! - Error handling
//! - Protocol constants and wrapping service-time arithmetic
//! - Reference-counted packets and their recycling pool
//! - The datagram socket and interceptor seams
//!
//! Protocol-specific logic lives in the specialized crates:
//! - `relnet-protocol`: command codec, packet header, compression, congestion math
//! - `relnet-peer`: peer state machine, channels, fragment reassembly
//! - `relnet-host`: socket ownership, service loop, bandwidth throttle, simulator

/// Protocol constants shared across layers.
pub mod constants {
    /// Smallest MTU a peer may negotiate.
    pub const MINIMUM_MTU: u32 = 576;
    /// Largest MTU a peer may negotiate.
    pub const MAXIMUM_MTU: u32 = 4096;
    /// Most commands packed into a single datagram.
    pub const MAXIMUM_PACKET_COMMANDS: usize = 32;
    /// Smallest reliable window size, in bytes.
    pub const MINIMUM_WINDOW_SIZE: u32 = 4096;
    /// Largest reliable window size, in bytes.
    pub const MAXIMUM_WINDOW_SIZE: u32 = 65536;
    /// Fewest channels a connection may use.
    pub const MINIMUM_CHANNEL_COUNT: usize = 1;
    /// Most channels a connection may use.
    pub const MAXIMUM_CHANNEL_COUNT: usize = 255;
    /// Peer id reserved for "no peer assigned yet"; also the upper bound of the peer table.
    pub const MAXIMUM_PEER_ID: u16 = 0xFFF;
    /// Most fragments a single packet may be split into.
    pub const MAXIMUM_FRAGMENT_COUNT: u32 = 1024 * 1024;
    /// Channel id used by connection-level commands (connect, ping, disconnect, ...).
    pub const CONTROL_CHANNEL_ID: u8 = 0xFF;

    /// Interval between two host bandwidth throttle passes, in milliseconds.
    pub const BANDWIDTH_THROTTLE_INTERVAL: u32 = 1000;
    /// Default cap on the size of a single packet, in bytes.
    pub const DEFAULT_MAXIMUM_PACKET_SIZE: usize = 32 * 1024 * 1024;
    /// Default cap on undelivered incoming data per peer, in bytes.
    pub const DEFAULT_MAXIMUM_WAITING_DATA: usize = 32 * 1024 * 1024;
    /// Default MTU of outgoing datagrams.
    pub const DEFAULT_MTU: u32 = 1400;
    /// Socket receive buffer size requested by the host.
    pub const HOST_RECEIVE_BUFFER_SIZE: usize = 256 * 1024;
    /// Socket send buffer size requested by the host.
    pub const HOST_SEND_BUFFER_SIZE: usize = 256 * 1024;
    /// Most datagrams read from the socket in one service pass.
    pub const MAXIMUM_RECEIVES_PER_SERVICE: usize = 256;

    /// Initial packet throttle of a fresh peer.
    pub const DEFAULT_PACKET_THROTTLE: u32 = 32;
    /// Scale of the packet throttle; a throttle equal to this drops nothing.
    pub const PACKET_THROTTLE_SCALE: u32 = 32;
    /// Step by which the unreliable drop counter advances per command.
    pub const PACKET_THROTTLE_COUNTER: u32 = 7;
    /// Default throttle increase when round trips improve.
    pub const PACKET_THROTTLE_ACCELERATION: u32 = 2;
    /// Default throttle decrease when round trips degrade.
    pub const PACKET_THROTTLE_DECELERATION: u32 = 2;
    /// Default interval over which round-trip extremes are tracked, in milliseconds.
    pub const PACKET_THROTTLE_INTERVAL: u32 = 5000;
    /// Fixed-point scale of the packet loss estimate.
    pub const PACKET_LOSS_SCALE: u32 = 1 << 16;
    /// Interval between two packet loss estimate updates, in milliseconds.
    pub const PACKET_LOSS_INTERVAL: u32 = 10000;
    /// Bandwidth, in bytes per second, that buys one minimum window.
    pub const WINDOW_SIZE_SCALE: u32 = 64 * 1024;
    /// Round-trip time assumed before any measurement, in milliseconds.
    pub const DEFAULT_ROUND_TRIP_TIME: u32 = 500;
    /// Default keep-alive ping interval, in milliseconds.
    pub const PING_INTERVAL: u32 = 500;
    /// Default multiplier applied to a command's round-trip timeout before it may fail.
    pub const TIMEOUT_LIMIT: u32 = 32;
    /// Default minimum time before an unacknowledged peer is dropped, in milliseconds.
    pub const TIMEOUT_MINIMUM: u32 = 5000;
    /// Default maximum time before an unacknowledged peer is dropped, in milliseconds.
    pub const TIMEOUT_MAXIMUM: u32 = 30000;

    /// Number of reliable windows covering the 16-bit sequence space.
    pub const RELIABLE_WINDOWS: u16 = 16;
    /// Sequence numbers per reliable window.
    pub const RELIABLE_WINDOW_SIZE: u16 = 0x1000;
    /// Windows ahead of the current one that incoming reliable commands may use.
    pub const FREE_RELIABLE_WINDOWS: u16 = 8;
    /// Number of unsequenced windows covering the 16-bit group space.
    pub const UNSEQUENCED_WINDOWS: u32 = 64;
    /// Groups tracked by the unsequenced duplicate window.
    pub const UNSEQUENCED_WINDOW_SIZE: u32 = 1024;
    /// Windows ahead of the current one that incoming unsequenced groups may use.
    pub const FREE_UNSEQUENCED_WINDOWS: u32 = 32;
}

/// Configuration options for the host and its peers.
pub mod config;
/// Error types and results.
pub mod error;
/// Raw datagram interception for custom processing.
pub mod interceptor;
/// Reference-counted packets with delivery flags.
pub mod packet;
/// Buffer recycling for packet payloads.
pub mod packet_pool;
/// Wrapping millisecond arithmetic for service time.
pub mod time;
/// Transport abstraction for pluggable I/O.
pub mod transport;
