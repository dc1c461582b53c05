use relnet_core::{
    constants::MAXIMUM_FRAGMENT_COUNT,
    error::{ErrorKind, Result},
    packet::{Packet, PacketFlags},
};
use relnet_protocol::{
    command::{Command, CommandKind, FragmentHeader, ProtocolCommand, COMMAND_FLAG_ACKNOWLEDGE, COMMAND_FLAG_UNSEQUENCED},
    command_codec::CHECKSUM_SIZE,
    header::MAXIMUM_HEADER_SIZE,
};
use tracing::trace;

use super::Peer;
use crate::{context::HostContext, peer_state::PeerState};

impl Peer {
    /// Queues `packet` for delivery on `channel_id`.
    ///
    /// The packet's flags choose the delivery mode. Packets that do not fit a
    /// single datagram are split into fragments, which are reliable unless
    /// the packet asks for `UNRELIABLE_FRAGMENT` without `RELIABLE`.
    pub fn send(&mut self, ctx: &HostContext, channel_id: u8, packet: Packet) -> Result<()> {
        if self.state != PeerState::Connected {
            return Err(ErrorKind::PeerNotConnected);
        }
        if usize::from(channel_id) >= self.channels.len() {
            return Err(ErrorKind::InvalidChannel(channel_id));
        }
        if packet.len() > ctx.maximum_packet_size {
            return Err(ErrorKind::PacketTooLarge { size: packet.len(), maximum: ctx.maximum_packet_size });
        }

        let fragment_length = self.fragment_length(ctx);
        if packet.len() > fragment_length {
            return self.send_fragments(channel_id, packet, fragment_length);
        }

        let flags = packet.flags();
        let data_length = packet.len() as u16;
        let channel = &self.channels[usize::from(channel_id)];
        let (body, command_flags) =
            if flags.contains(PacketFlags::UNSEQUENCED) && !flags.contains(PacketFlags::RELIABLE) {
                (ProtocolCommand::SendUnsequenced { unsequenced_group: 0, data_length }, COMMAND_FLAG_UNSEQUENCED)
            } else if flags.contains(PacketFlags::RELIABLE) || channel.outgoing_unreliable_sequence_number >= 0xFFFF {
                (ProtocolCommand::SendReliable { data_length }, COMMAND_FLAG_ACKNOWLEDGE)
            } else {
                (ProtocolCommand::SendUnreliable { unreliable_sequence_number: 0, data_length }, 0)
            };

        self.queue_outgoing_command(Command::new(body, command_flags, channel_id), Some(packet), 0, data_length);
        Ok(())
    }

    /// Largest payload a single fragment may carry.
    fn fragment_length(&self, ctx: &HostContext) -> usize {
        let mut length = self.mtu as usize - MAXIMUM_HEADER_SIZE - CommandKind::SendFragment.size();
        if ctx.config.use_checksums {
            length -= CHECKSUM_SIZE;
        }
        length
    }

    fn send_fragments(&mut self, channel_id: u8, packet: Packet, fragment_length: usize) -> Result<()> {
        let total_length = packet.len();
        let fragment_count = total_length.div_ceil(fragment_length) as u32;
        if fragment_count > MAXIMUM_FRAGMENT_COUNT {
            return Err(ErrorKind::PacketTooLarge {
                size: total_length,
                maximum: MAXIMUM_FRAGMENT_COUNT as usize * fragment_length,
            });
        }

        let flags = packet.flags();
        let channel = &self.channels[usize::from(channel_id)];
        let unreliable = flags.contains(PacketFlags::UNRELIABLE_FRAGMENT)
            && !flags.contains(PacketFlags::RELIABLE)
            && channel.outgoing_unreliable_sequence_number < 0xFFFF;
        let (command_flags, start_sequence_number) = if unreliable {
            (0, channel.outgoing_unreliable_sequence_number.wrapping_add(1))
        } else {
            (COMMAND_FLAG_ACKNOWLEDGE, channel.outgoing_reliable_sequence_number.wrapping_add(1))
        };

        trace!(peer = self.incoming_peer_id, channel_id, total_length, fragment_count, unreliable, "fragmenting packet");

        let mut fragment_offset = 0;
        for fragment_number in 0..fragment_count {
            let length = fragment_length.min(total_length - fragment_offset);
            let header = FragmentHeader {
                start_sequence_number,
                data_length: length as u16,
                fragment_count,
                fragment_number,
                total_length: total_length as u32,
                fragment_offset: fragment_offset as u32,
            };
            let body = if unreliable {
                ProtocolCommand::SendUnreliableFragment(header)
            } else {
                ProtocolCommand::SendFragment(header)
            };
            self.queue_outgoing_command(
                Command::new(body, command_flags, channel_id),
                Some(packet.clone()),
                fragment_offset as u32,
                length as u16,
            );
            fragment_offset += length;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use relnet_core::config::Config;
    use relnet_protocol::command::ConnectParameters;

    use super::*;

    fn get_fake_addr() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    fn create_virtual_connection(ctx: &mut HostContext) -> Peer {
        let mut peer = Peer::new(0, ctx);
        let remote = ConnectParameters {
            outgoing_peer_id: 0,
            incoming_session_id: 0xFF,
            outgoing_session_id: 0xFF,
            mtu: 1400,
            window_size: 65536,
            channel_count: 2,
            incoming_bandwidth: 0,
            outgoing_bandwidth: 0,
            packet_throttle_interval: 5000,
            packet_throttle_acceleration: 2,
            packet_throttle_deceleration: 2,
            connect_id: 1,
        };
        peer.init_incoming(ctx, get_fake_addr(), &remote, 0, 2);
        peer.change_state(ctx, PeerState::Connected);
        peer.outgoing_reliable_commands.clear();
        peer
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn test_small_reliable_packet_is_one_command() {
        let mut ctx = HostContext::new(Config::default());
        let mut peer = create_virtual_connection(&mut ctx);
        peer.send(&ctx, 0, Packet::new(payload(100), PacketFlags::RELIABLE)).unwrap();

        assert_eq!(peer.outgoing_reliable_commands.len(), 1);
        let command = &peer.outgoing_reliable_commands[0];
        assert_eq!(command.command.kind(), CommandKind::SendReliable);
        assert_eq!(command.reliable_sequence_number, 1);
        assert_eq!(command.payload(), &payload(100)[..]);
    }

    #[test]
    fn test_large_packet_is_fragmented() {
        let mut ctx = HostContext::new(Config::default());
        let mut peer = create_virtual_connection(&mut ctx);
        peer.send(&ctx, 1, Packet::new(payload(3000), PacketFlags::RELIABLE)).unwrap();

        // 1400 - 4 - 24 = 1372 bytes per fragment
        assert_eq!(peer.outgoing_reliable_commands.len(), 3);
        let mut reassembled = Vec::new();
        for (number, command) in peer.outgoing_reliable_commands.iter().enumerate() {
            match command.command.body {
                ProtocolCommand::SendFragment(header) => {
                    assert_eq!(header.start_sequence_number, 1);
                    assert_eq!(header.fragment_count, 3);
                    assert_eq!(header.fragment_number, number as u32);
                    assert_eq!(header.total_length, 3000);
                }
                other => panic!("unexpected command {:?}", other),
            }
            assert_eq!(command.reliable_sequence_number, number as u16 + 1);
            reassembled.extend_from_slice(command.payload());
        }
        assert_eq!(reassembled, payload(3000));
    }

    #[test]
    fn test_unreliable_fragments_share_one_unreliable_number() {
        let mut ctx = HostContext::new(Config::default());
        let mut peer = create_virtual_connection(&mut ctx);
        peer.send(&ctx, 0, Packet::new(payload(2000), PacketFlags::UNRELIABLE_FRAGMENT)).unwrap();

        assert!(peer.outgoing_reliable_commands.is_empty());
        assert_eq!(peer.outgoing_unreliable_commands.len(), 2);
        for command in &peer.outgoing_unreliable_commands {
            assert_eq!(command.command.kind(), CommandKind::SendUnreliableFragment);
            assert_eq!(command.unreliable_sequence_number, 1);
        }
        assert_eq!(peer.channels[0].outgoing_unreliable_sequence_number, 1);
    }

    #[test]
    fn test_unsequenced_packet() {
        let mut ctx = HostContext::new(Config::default());
        let mut peer = create_virtual_connection(&mut ctx);
        peer.send(&ctx, 0, Packet::new(payload(10), PacketFlags::UNSEQUENCED)).unwrap();
        peer.send(&ctx, 0, Packet::new(payload(10), PacketFlags::UNSEQUENCED)).unwrap();

        let groups: Vec<u16> = peer
            .outgoing_unreliable_commands
            .iter()
            .map(|command| match command.command.body {
                ProtocolCommand::SendUnsequenced { unsequenced_group, .. } => unsequenced_group,
                other => panic!("unexpected command {:?}", other),
            })
            .collect();
        assert_eq!(groups, vec![1, 2]);
        assert!(peer.outgoing_unreliable_commands[0].command.header.is_unsequenced());
    }

    #[test]
    fn test_unreliable_sequence_exhaustion_falls_back_to_reliable() {
        let mut ctx = HostContext::new(Config::default());
        let mut peer = create_virtual_connection(&mut ctx);
        peer.channels[0].outgoing_unreliable_sequence_number = 0xFFFF;
        peer.send(&ctx, 0, Packet::new(payload(10), PacketFlags::empty())).unwrap();

        assert_eq!(peer.outgoing_reliable_commands.len(), 1);
        assert_eq!(peer.channels[0].outgoing_unreliable_sequence_number, 0);
    }

    #[test]
    fn test_send_rejections() {
        let mut ctx = HostContext::new(Config { maximum_packet_size: 4096, ..Config::default() });
        let mut peer = create_virtual_connection(&mut ctx);

        assert!(matches!(
            peer.send(&ctx, 2, Packet::new(payload(10), PacketFlags::RELIABLE)),
            Err(ErrorKind::InvalidChannel(2))
        ));
        assert!(matches!(
            peer.send(&ctx, 0, Packet::new(payload(5000), PacketFlags::RELIABLE)),
            Err(ErrorKind::PacketTooLarge { size: 5000, maximum: 4096 })
        ));

        peer.reset(&mut ctx);
        assert!(matches!(
            peer.send(&ctx, 0, Packet::new(payload(10), PacketFlags::RELIABLE)),
            Err(ErrorKind::PeerNotConnected)
        ));
    }

    #[test]
    fn test_checksums_shrink_fragments() {
        let mut ctx = HostContext::new(Config { use_checksums: true, ..Config::default() });
        let peer = create_virtual_connection(&mut ctx);
        assert_eq!(peer.fragment_length(&ctx), 1368);
    }
}
