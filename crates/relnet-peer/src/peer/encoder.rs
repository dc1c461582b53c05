use std::{io, net::SocketAddr};

use relnet_core::{
    constants::{MAXIMUM_PACKET_COMMANDS, MAXIMUM_PEER_ID},
    time::{time_difference, time_greater_equal, time_less},
};
use relnet_protocol::{
    command::{Command, CommandKind, ProtocolCommand},
    command_codec::{append_checksum, compress, CommandEncoder, CHECKSUM_SIZE},
    header::{PacketHeader, MAXIMUM_HEADER_SIZE},
};
use tracing::{debug, trace};

use super::Peer;
use crate::{context::HostContext, peer_state::PeerState};

/// A datagram ready for the socket.
#[derive(Debug)]
pub struct ComposedDatagram {
    /// Destination
    pub address: SocketAddr,
    /// Header, command stream and optional checksum
    pub data: Vec<u8>,
    /// More commands are queued than fit into this datagram
    pub continue_sending: bool,
}

/// Commands collected for one datagram.
struct CommandBatch {
    commands: Vec<u8>,
    command_count: usize,
    /// Bytes the datagram will occupy, header and checksum included
    packet_size: usize,
    mtu: usize,
    needs_sent_time: bool,
    continue_sending: bool,
}

impl CommandBatch {
    fn new(mtu: usize, use_checksums: bool) -> Self {
        let mut packet_size = MAXIMUM_HEADER_SIZE;
        if use_checksums {
            packet_size += CHECKSUM_SIZE;
        }
        Self {
            commands: Vec::with_capacity(mtu),
            command_count: 0,
            packet_size,
            mtu,
            needs_sent_time: false,
            continue_sending: false,
        }
    }

    fn has_room(&self, size: usize) -> bool {
        self.command_count < MAXIMUM_PACKET_COMMANDS && self.mtu.saturating_sub(self.packet_size) >= size
    }

    fn push(&mut self, command: &Command, payload: &[u8]) -> io::Result<()> {
        CommandEncoder::encode_with_payload(&mut self.commands, command, payload)?;
        self.packet_size += command.size() + payload.len();
        self.command_count += 1;
        Ok(())
    }

    fn is_empty(&self) -> bool {
        self.command_count == 0
    }
}

impl Peer {
    /// Builds the next datagram for this peer from its queued acknowledgements
    /// and commands.
    ///
    /// With `check_for_timeouts`, expired reliable commands are scheduled for
    /// retransmission first; a peer that exceeded its timeout is disconnected
    /// and gets no datagram. Returns `None` when there is nothing to send.
    pub fn compose_datagram(
        &mut self,
        ctx: &mut HostContext,
        check_for_timeouts: bool,
    ) -> io::Result<Option<ComposedDatagram>> {
        if self.state.is_inactive() {
            return Ok(None);
        }

        let mut batch = CommandBatch::new(self.mtu as usize, ctx.config.use_checksums);

        if !self.acknowledgements.is_empty() {
            self.send_acknowledgements(ctx, &mut batch)?;
        }

        if check_for_timeouts
            && !self.sent_reliable_commands.is_empty()
            && time_greater_equal(ctx.service_time, self.next_timeout)
            && self.check_timeouts(ctx)
        {
            return Ok(None);
        }

        let can_ping = self.outgoing_reliable_commands.is_empty() || self.send_reliable(ctx, &mut batch)?;
        if can_ping
            && self.sent_reliable_commands.is_empty()
            && time_difference(ctx.service_time, self.last_receive_time) >= self.ping_interval
            && batch.has_room(CommandKind::Ping.size())
        {
            self.ping();
            self.send_reliable(ctx, &mut batch)?;
        }

        if !self.outgoing_unreliable_commands.is_empty() {
            self.send_unreliable(ctx, &mut batch)?;
        }

        if batch.is_empty() {
            return Ok(None);
        }

        if self.congestion.update_packet_loss(ctx.service_time) {
            trace!(
                peer = self.incoming_peer_id,
                packet_loss = self.congestion.packet_loss(),
                variance = self.congestion.packet_loss_variance(),
                "packet loss updated"
            );
        }

        let compressed = compress(&batch.commands, ctx.config.compression)?;
        let header = PacketHeader {
            peer_id: self.outgoing_peer_id,
            session_id: if self.outgoing_peer_id < MAXIMUM_PEER_ID { self.outgoing_session_id } else { 0 },
            compressed: compressed.is_some(),
            sent_time: batch.needs_sent_time.then_some(ctx.service_time as u16),
        };

        let mut data = Vec::with_capacity(batch.packet_size);
        header.encode_into(&mut data)?;
        data.extend_from_slice(compressed.as_deref().unwrap_or(&batch.commands));
        if ctx.config.use_checksums {
            append_checksum(&mut data);
        }

        self.last_send_time = ctx.service_time;
        self.statistics.bytes_sent += data.len() as u64;
        trace!(peer = self.incoming_peer_id, commands = batch.command_count, bytes = data.len(), "composed datagram");

        Ok(Some(ComposedDatagram { address: self.address, data, continue_sending: batch.continue_sending }))
    }

    fn send_acknowledgements(&mut self, ctx: &mut HostContext, batch: &mut CommandBatch) -> io::Result<()> {
        while let Some(acknowledgement) = self.acknowledgements.front() {
            if !batch.has_room(CommandKind::Acknowledge.size()) {
                batch.continue_sending = true;
                break;
            }

            let body = ProtocolCommand::Acknowledge {
                received_reliable_sequence_number: acknowledgement.command.reliable_sequence_number,
                received_sent_time: acknowledgement.sent_time,
            };
            let mut command = Command::new(body, 0, acknowledgement.command.channel_id);
            command.header.reliable_sequence_number = acknowledgement.command.reliable_sequence_number;
            let disconnects = acknowledgement.acknowledges_disconnect();
            self.acknowledgements.pop_front();

            batch.push(&command, &[])?;
            if disconnects {
                self.dispatch_state(ctx, PeerState::Zombie);
            }
        }
        Ok(())
    }

    /// Requeues expired reliable commands with a doubled timeout.
    ///
    /// Returns true if the peer went silent for too long and was
    /// disconnected.
    fn check_timeouts(&mut self, ctx: &mut HostContext) -> bool {
        let now = ctx.service_time;
        let mut insert_at = 0;
        let mut index = 0;

        while let Some(command) = self.sent_reliable_commands.get(index) {
            if time_difference(now, command.sent_time) < command.round_trip_timeout {
                index += 1;
                continue;
            }

            if self.earliest_timeout == 0 || time_less(command.sent_time, self.earliest_timeout) {
                self.earliest_timeout = command.sent_time;
            }
            let silence = time_difference(now, self.earliest_timeout);
            if self.earliest_timeout != 0
                && (silence >= self.timeout_maximum
                    || (command.round_trip_timeout >= command.round_trip_timeout_limit
                        && silence >= self.timeout_minimum))
            {
                debug!(peer = self.incoming_peer_id, silence, "peer timed out");
                self.notify_disconnect(ctx);
                return true;
            }

            let Some(mut command) = self.sent_reliable_commands.remove(index) else {
                break;
            };
            if command.packet.is_some() {
                self.reliable_data_in_transit =
                    self.reliable_data_in_transit.saturating_sub(u32::from(command.fragment_length));
            }
            self.congestion.record_lost();
            self.statistics.packets_lost += 1;
            command.round_trip_timeout = command.round_trip_timeout.saturating_mul(2);
            trace!(
                peer = self.incoming_peer_id,
                sequence = command.reliable_sequence_number,
                timeout = command.round_trip_timeout,
                "retransmitting"
            );
            self.outgoing_reliable_commands.insert(insert_at, command);
            insert_at += 1;

            if index == 0 {
                if let Some(front) = self.sent_reliable_commands.front() {
                    self.next_timeout = front.sent_time.wrapping_add(front.round_trip_timeout);
                }
            }
        }
        false
    }

    /// Moves reliable commands into the batch while the reliable window and
    /// the datagram allow.
    ///
    /// Returns true if nothing was eligible, in which case a Ping may be sent.
    fn send_reliable(&mut self, ctx: &mut HostContext, batch: &mut CommandBatch) -> io::Result<bool> {
        let now = ctx.service_time;
        let window_budget = self.congestion.window_budget(self.window_size, self.mtu);
        let mut can_ping = true;
        let mut window_wrap = false;
        let mut window_exceeded = false;
        let mut index = 0;

        while let Some(command) = self.outgoing_reliable_commands.get(index) {
            let channel_id = usize::from(command.command.header.channel_id);
            let sequence_number = command.reliable_sequence_number;
            let first_attempt = command.send_attempts < 1;

            if let Some(channel) = self.channels.get(channel_id) {
                if !window_wrap && first_attempt && channel.is_window_blocked(sequence_number) {
                    window_wrap = true;
                }
                if window_wrap {
                    index += 1;
                    continue;
                }
            }

            if command.packet.is_some() {
                if !window_exceeded
                    && self.reliable_data_in_transit + u32::from(command.fragment_length) > window_budget
                {
                    window_exceeded = true;
                }
                if window_exceeded {
                    index += 1;
                    continue;
                }
            }

            can_ping = false;
            if !batch.has_room(command.wire_size()) {
                batch.continue_sending = true;
                break;
            }

            let Some(mut command) = self.outgoing_reliable_commands.remove(index) else {
                break;
            };
            if first_attempt {
                if let Some(channel) = self.channels.get_mut(channel_id) {
                    channel.mark_window_used(sequence_number);
                }
            }
            command.send_attempts += 1;
            if command.round_trip_timeout == 0 {
                command.round_trip_timeout = self.congestion.round_trip_timeout();
                command.round_trip_timeout_limit = self.timeout_limit.saturating_mul(command.round_trip_timeout);
            }
            if self.sent_reliable_commands.is_empty() {
                self.next_timeout = now.wrapping_add(command.round_trip_timeout);
            }
            command.sent_time = now;

            batch.push(&command.command, command.payload())?;
            batch.needs_sent_time = true;
            if command.packet.is_some() {
                self.reliable_data_in_transit += u32::from(command.fragment_length);
            }
            self.congestion.record_sent();
            self.statistics.packets_sent += 1;
            self.sent_reliable_commands.push_back(command);
        }
        Ok(can_ping)
    }

    /// Moves unreliable commands into the batch, dropping payloads the packet
    /// throttle rejects.
    fn send_unreliable(&mut self, ctx: &mut HostContext, batch: &mut CommandBatch) -> io::Result<()> {
        while let Some(command) = self.outgoing_unreliable_commands.front() {
            if !batch.has_room(command.wire_size()) {
                batch.continue_sending = true;
                break;
            }

            let Some(command) = self.outgoing_unreliable_commands.pop_front() else {
                break;
            };
            if command.packet.is_some() && command.fragment_offset == 0 && self.congestion.should_drop_unreliable() {
                // The rest of the fragment run goes with it
                while let Some(next) = self.outgoing_unreliable_commands.front() {
                    if next.fragment_offset == 0
                        || next.reliable_sequence_number != command.reliable_sequence_number
                        || next.unreliable_sequence_number != command.unreliable_sequence_number
                    {
                        break;
                    }
                    self.outgoing_unreliable_commands.pop_front();
                }
                trace!(peer = self.incoming_peer_id, "throttled unreliable packet");
                continue;
            }

            batch.push(&command.command, command.payload())?;
            if let Some(packet) = &command.packet {
                packet.mark_sent();
            }
        }

        self.complete_disconnect_later(ctx);
        Ok(())
    }
}
