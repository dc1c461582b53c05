#![warn(missing_docs)]

//! relnet-peer: per-peer connection state for relnet hosts.
//!
//! A [`Peer`] is one slot of a host's peer table. It runs the connection
//! state machine, sequences traffic on its channels, retransmits reliable
//! commands, reassembles fragments and queues delivered packets. Everything
//! a peer shares with its host lives in a [`HostContext`] passed into each
//! call, so the host can own the whole peer table without interior
//! mutability.

/// Bandwidth limits and window sizing.
pub mod bandwidth_throttle;
/// Per-channel sequencing state.
pub mod channel;
/// Entries of the per-peer command queues.
pub mod command_queue;
/// State shared between a host and its peers.
pub mod context;
/// Fragment reassembly bookkeeping.
pub mod fragment_buffer;
mod peer;
mod peer_state;
/// Per-peer counters.
pub mod statistics;
/// Unsequenced duplicate filtering.
pub mod unsequenced;

pub use context::{DispatchQueue, HostContext, PeerId};
pub use peer::{ComposedDatagram, Peer, PeerEvent, Teardown};
pub use peer_state::PeerState;
pub use statistics::PeerStatistics;
