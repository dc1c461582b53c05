use std::default::Default;

use crate::constants::{
    DEFAULT_MAXIMUM_PACKET_SIZE, DEFAULT_MAXIMUM_WAITING_DATA, DEFAULT_MTU,
    HOST_RECEIVE_BUFFER_SIZE, HOST_SEND_BUFFER_SIZE, MAXIMUM_CHANNEL_COUNT, MAXIMUM_PEER_ID,
    PACKET_THROTTLE_ACCELERATION, PACKET_THROTTLE_DECELERATION, PACKET_THROTTLE_INTERVAL,
    PING_INTERVAL, TIMEOUT_LIMIT, TIMEOUT_MAXIMUM, TIMEOUT_MINIMUM,
};

/// Compression algorithm applied to the command stream of outgoing datagrams.
#[derive(Clone, Debug, Copy, PartialEq, Eq, Default)]
pub enum CompressionAlgorithm {
    /// No compression
    #[default]
    None,
    /// Zlib compression (balanced speed/ratio)
    Zlib,
    /// LZ4 compression (fast, lower ratio)
    Lz4,
}

#[derive(Clone, Debug)]
/// Configuration options to tune host and peer behavior.
pub struct Config {
    /// Number of peer slots allocated by the host (at most `MAXIMUM_PEER_ID`).
    pub peer_count: usize,
    /// Most channels a connection may negotiate (1-255).
    pub channel_limit: usize,
    /// Incoming bandwidth of the host in bytes/sec (0 = unlimited).
    pub incoming_bandwidth: u32,
    /// Outgoing bandwidth of the host in bytes/sec (0 = unlimited).
    pub outgoing_bandwidth: u32,
    /// MTU used for new peers before negotiation.
    pub mtu: u32,
    /// Largest packet, in bytes, that may be sent or reassembled.
    pub maximum_packet_size: usize,
    /// Undelivered incoming bytes a peer may hold before payloads are refused.
    pub maximum_waiting_data: usize,
    /// Most simultaneous peers accepted from a single IP address.
    pub duplicate_peers: usize,
    /// Out-of-window reliable commands tolerated before a peer is dropped (0 = unlimited).
    pub maximum_window_violations: u32,
    /// Make the underlying UDP socket block when true, otherwise non-blocking.
    pub blocking_mode: bool,
    /// Socket receive buffer size in bytes (None = use system default).
    /// Corresponds to SO_RCVBUF socket option.
    pub socket_recv_buffer_size: Option<usize>,
    /// Socket send buffer size in bytes (None = use system default).
    /// Corresponds to SO_SNDBUF socket option.
    pub socket_send_buffer_size: Option<usize>,
    /// Enable broadcast mode.
    /// Corresponds to SO_BROADCAST socket option.
    pub socket_broadcast: bool,
    /// Compression applied to outgoing datagrams. Both ends must agree.
    pub compression: CompressionAlgorithm,
    /// Append a CRC32 trailer to each datagram and verify it on receipt. Both ends must agree.
    pub use_checksums: bool,
    /// Keep-alive ping interval for idle peers, in milliseconds.
    pub ping_interval: u32,
    /// Multiplier applied to a round-trip timeout before a command may fail the peer.
    pub timeout_limit: u32,
    /// Minimum unacknowledged time before a peer may be dropped, in milliseconds.
    pub timeout_minimum: u32,
    /// Unacknowledged time after which a peer is always dropped, in milliseconds.
    pub timeout_maximum: u32,
    /// Interval over which round-trip extremes drive the packet throttle, in milliseconds.
    pub packet_throttle_interval: u32,
    /// Throttle increase applied when round trips improve.
    pub packet_throttle_acceleration: u32,
    /// Throttle decrease applied when round trips degrade.
    pub packet_throttle_deceleration: u32,
    /// Seed for the host's random generator (None = seeded from the OS).
    pub random_seed: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            peer_count: 32,
            channel_limit: MAXIMUM_CHANNEL_COUNT,
            incoming_bandwidth: 0, // Unlimited
            outgoing_bandwidth: 0, // Unlimited
            mtu: DEFAULT_MTU,
            maximum_packet_size: DEFAULT_MAXIMUM_PACKET_SIZE,
            maximum_waiting_data: DEFAULT_MAXIMUM_WAITING_DATA,
            duplicate_peers: MAXIMUM_PEER_ID as usize,
            maximum_window_violations: 16,
            blocking_mode: false,
            socket_recv_buffer_size: Some(HOST_RECEIVE_BUFFER_SIZE),
            socket_send_buffer_size: Some(HOST_SEND_BUFFER_SIZE),
            socket_broadcast: true,
            compression: CompressionAlgorithm::None,
            use_checksums: false,
            ping_interval: PING_INTERVAL,
            timeout_limit: TIMEOUT_LIMIT,
            timeout_minimum: TIMEOUT_MINIMUM,
            timeout_maximum: TIMEOUT_MAXIMUM,
            packet_throttle_interval: PACKET_THROTTLE_INTERVAL,
            packet_throttle_acceleration: PACKET_THROTTLE_ACCELERATION,
            packet_throttle_deceleration: PACKET_THROTTLE_DECELERATION,
            random_seed: None,
        }
    }
}
