//! Incoming datagrams: header validation, peer lookup and new connections.

use std::{
    io::Cursor,
    net::{IpAddr, Ipv4Addr, SocketAddr},
};

use relnet_core::{
    constants::{MAXIMUM_CHANNEL_COUNT, MAXIMUM_MTU, MAXIMUM_PEER_ID, MINIMUM_CHANNEL_COUNT},
    transport::Socket as TransportSocket,
};
use relnet_peer::PeerState;
use relnet_protocol::{
    command::{ConnectParameters, ProtocolCommand},
    command_codec::{decompress, validate_and_strip_checksum, CommandDecoder},
    header::{PacketHeader, MINIMUM_HEADER_SIZE},
};
use tracing::{debug, trace, warn};

use super::Host;

impl<S: TransportSocket> Host<S> {
    /// Decodes one datagram and hands its commands to the addressed peer.
    ///
    /// Invalid datagrams are dropped; a command the peer refuses drops the
    /// rest of its datagram.
    pub(super) fn handle_incoming_commands(&mut self, address: SocketAddr, datagram: &[u8]) {
        let length = datagram.len();
        if length < MINIMUM_HEADER_SIZE {
            trace!(%address, length, "datagram shorter than a header");
            return;
        }

        let datagram = if self.ctx.config.use_checksums {
            match validate_and_strip_checksum(datagram) {
                Ok(datagram) => datagram,
                Err(err) => {
                    warn!(%address, %err, "dropping datagram");
                    return;
                }
            }
        } else {
            datagram
        };

        let (header, offset) = match PacketHeader::decode(datagram) {
            Ok(decoded) => decoded,
            Err(err) => {
                trace!(%address, %err, "undecodable header");
                return;
            }
        };

        let mut peer_index = None;
        if header.peer_id != MAXIMUM_PEER_ID {
            let index = usize::from(header.peer_id);
            let Some(peer) = self.peers.get(index) else {
                trace!(%address, peer = index, "datagram for unknown peer");
                return;
            };
            if matches!(peer.state(), PeerState::Disconnected | PeerState::Zombie)
                || (peer.address() != address && !is_broadcast(peer.address()))
                || (peer.outgoing_peer_id() < MAXIMUM_PEER_ID && header.session_id != peer.incoming_session_id())
            {
                trace!(%address, peer = index, "datagram does not match its peer");
                return;
            }
            peer_index = Some(index);
        }

        let body = &datagram[offset..];
        let decompressed;
        let commands = if header.compressed {
            decompressed = match decompress(body, self.ctx.config.compression, MAXIMUM_MTU as usize) {
                Ok(decompressed) => decompressed,
                Err(err) => {
                    debug!(%address, %err, "dropping datagram");
                    return;
                }
            };
            &decompressed[..]
        } else {
            body
        };

        if let Some(index) = peer_index {
            self.peers[index].record_datagram_received(address, length);
        }

        let mut cursor = Cursor::new(commands);
        while (cursor.position() as usize) < commands.len() {
            let decoded = match CommandDecoder::decode_command(&mut cursor) {
                Ok(decoded) => decoded,
                Err(err) => {
                    debug!(%address, %err, "malformed command");
                    break;
                }
            };

            let index = match (peer_index, decoded.command.body) {
                (None, ProtocolCommand::Connect { parameters, data }) => {
                    match self.handle_connect(address, &parameters, data) {
                        Some(index) => {
                            peer_index = Some(index);
                            continue;
                        }
                        None => break,
                    }
                }
                (Some(_), ProtocolCommand::Connect { .. }) | (None, _) => break,
                (Some(index), _) => index,
            };

            if let Err(err) = self.peers[index].handle_command(&mut self.ctx, header.sent_time, &decoded) {
                debug!(peer = index, %err, "dropping rest of datagram");
                break;
            }
        }
    }

    /// Accepts a Connect from `address` into the first free slot.
    ///
    /// A retransmitted Connect (same address and connect id as a live peer)
    /// and a Connect from an address with `duplicate_peers` live peers are
    /// both ignored.
    fn handle_connect(&mut self, address: SocketAddr, parameters: &ConnectParameters, data: u32) -> Option<usize> {
        let channel_count = parameters.channel_count as usize;
        if !(MINIMUM_CHANNEL_COUNT..=MAXIMUM_CHANNEL_COUNT).contains(&channel_count) {
            debug!(%address, channel_count, "connect with invalid channel count");
            return None;
        }

        let mut free_slot = None;
        let mut duplicate_peers = 0;
        for peer in &self.peers {
            if peer.state() == PeerState::Disconnected {
                free_slot.get_or_insert(peer.index());
            } else if peer.state() != PeerState::Connecting && peer.address().ip() == address.ip() {
                if peer.address().port() == address.port() && peer.connect_id() == parameters.connect_id {
                    trace!(%address, peer = peer.index(), "retransmitted connect");
                    return None;
                }
                duplicate_peers += 1;
            }
        }

        let Some(index) = free_slot else {
            debug!(%address, "no free peer slot for incoming connection");
            return None;
        };
        if duplicate_peers >= self.ctx.config.duplicate_peers {
            debug!(%address, duplicate_peers, "too many connections from one address");
            return None;
        }

        let channel_count = channel_count.min(self.ctx.channel_limit);
        self.peers[index].init_incoming(&mut self.ctx, address, parameters, data, channel_count);
        Some(index)
    }
}

fn is_broadcast(address: SocketAddr) -> bool {
    address.ip() == IpAddr::V4(Ipv4Addr::BROADCAST)
}
