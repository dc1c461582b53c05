#![warn(missing_docs)]

//! relnet: reliable, ordered and fragmented messaging over UDP.
//!
//! This crate re-exports the types most applications need:
//!
//! - The host and its events (`Host`, `Event`, `EventKind`)
//! - Packets and their delivery flags (`Packet`, `PacketFlags`)
//! - Configuration (`Config`, `CompressionAlgorithm`)
//!
//! Example
//! ```no_run
//! use relnet::{EventKind, Host, Packet, PacketFlags};
//!
//! let mut server = Host::create(Some("127.0.0.1:7777".parse().unwrap()), 32, 2, 0, 0).unwrap();
//!
//! loop {
//!     match server.service(100).unwrap() {
//!         Some(event) if event.kind == EventKind::Receive => {
//!             // Echo on the channel the packet came in on
//!             let packet = event.packet.unwrap();
//!             let echo = Packet::copy_from(packet.data(), PacketFlags::RELIABLE);
//!             server.send(event.peer, event.channel_id, echo).unwrap();
//!         }
//!         Some(event) => println!("{:?} from peer {}", event.kind, event.peer),
//!         None => {}
//!     }
//! }
//! ```

// Core configuration, errors and packets
pub use relnet_core::{
    config::{CompressionAlgorithm, Config},
    error::{ErrorKind, Result},
    interceptor::{Interceptor, Verdict},
    packet::{Packet, PacketFlags},
};
// Host: owns the socket and the peer table
pub use relnet_host::{
    Clock, Event, EventKind, Host, HostStatistics, ManualClock, NetworkSimulator, SystemClock, UdpTransport,
};
// Peers, as seen through the host
pub use relnet_peer::{statistics::loss_ratio, Peer, PeerId, PeerState, PeerStatistics};

/// Convenience prelude with the most commonly used items.
pub mod prelude {
    pub use crate::{CompressionAlgorithm, Config, Event, EventKind, Host, Packet, PacketFlags, PeerId, PeerState};
}
