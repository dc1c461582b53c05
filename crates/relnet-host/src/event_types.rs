//! Events surfaced by [`Host::service`](crate::Host::service) and
//! [`Host::check_events`](crate::Host::check_events).

use relnet_core::packet::Packet;
use relnet_peer::{PeerEvent, PeerId};

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventKind {
    /// Nothing happened
    #[default]
    None,
    /// A remote host connected to this one
    IncomingConnect,
    /// A connection started with [`Host::connect`](crate::Host::connect) completed
    OutgoingConnect,
    /// A packet was received
    Receive,
    /// A peer disconnected or timed out; its slot is free again
    Disconnect,
}

/// An event and the peer it concerns.
#[derive(Debug, Clone, Default)]
pub struct Event {
    /// What happened
    pub kind: EventKind,
    /// The peer the event concerns
    pub peer: PeerId,
    /// Channel the packet arrived on (`Receive` only)
    pub channel_id: u8,
    /// Data sent with the Connect or Disconnect command
    pub data: u32,
    /// The received packet (`Receive` only)
    pub packet: Option<Packet>,
}

impl Event {
    pub(crate) fn from_peer_event(peer: PeerId, event: PeerEvent) -> Self {
        match event {
            PeerEvent::Connect { incoming, data } => Event {
                kind: if incoming { EventKind::IncomingConnect } else { EventKind::OutgoingConnect },
                peer,
                data,
                ..Event::default()
            },
            PeerEvent::Disconnect { data } => Event { kind: EventKind::Disconnect, peer, data, ..Event::default() },
            PeerEvent::Receive { channel_id, packet } => {
                Event { kind: EventKind::Receive, peer, channel_id, packet: Some(packet), ..Event::default() }
            }
        }
    }

    /// Returns true for either kind of connect event.
    pub fn is_connect(&self) -> bool {
        matches!(self.kind, EventKind::IncomingConnect | EventKind::OutgoingConnect)
    }
}
