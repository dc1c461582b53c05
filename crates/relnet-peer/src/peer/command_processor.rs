use std::collections::VecDeque;

use relnet_core::{
    constants::{
        CONTROL_CHANNEL_ID, MAXIMUM_CHANNEL_COUNT, MAXIMUM_FRAGMENT_COUNT, MAXIMUM_MTU, MINIMUM_CHANNEL_COUNT,
        MINIMUM_MTU,
    },
    error::{ErrorKind, Result},
    packet::PacketFlags,
    time::{time_difference, time_less},
};
use relnet_protocol::{
    command::{Command, CommandKind, ConnectParameters, FragmentHeader, ProtocolCommand},
    command_codec::DecodedCommand,
};
use tracing::{debug, trace, warn};

use super::Peer;
use crate::{
    bandwidth_throttle::{clamp_window_size, window_size_for},
    channel::WindowPosition,
    command_queue::{Acknowledgement, IncomingCommand, OutgoingCommand},
    context::HostContext,
    fragment_buffer::{copy_fragment, FragmentBuffer},
    peer_state::PeerState,
};

fn reject(reason: &'static str) -> ErrorKind {
    ErrorKind::CommandRejected(reason)
}

/// A command that may not be queued is dropped quietly, unless it starts a
/// fragment run: the run can never complete, so the datagram is refused.
fn discard(fragment_count: u32) -> Result<Option<usize>> {
    if fragment_count > 0 {
        Err(reject("fragment run outside the receive window"))
    } else {
        Ok(None)
    }
}

impl Peer {
    /// Processes one command received from this peer.
    ///
    /// `sent_time` is the datagram header's sent time, required for commands
    /// that must be acknowledged. An error means the command was refused and
    /// the rest of the datagram must be dropped.
    pub fn handle_command(
        &mut self,
        ctx: &mut HostContext,
        sent_time: Option<u16>,
        decoded: &DecodedCommand<'_>,
    ) -> Result<()> {
        let command = &decoded.command;
        trace!(peer = self.incoming_peer_id, kind = ?command.kind(), channel_id = command.header.channel_id, "received command");

        match command.body {
            ProtocolCommand::Acknowledge { received_reliable_sequence_number, received_sent_time } => self
                .handle_acknowledge(
                    ctx,
                    command.header.channel_id,
                    received_reliable_sequence_number,
                    received_sent_time,
                )?,
            ProtocolCommand::Connect { .. } => return Err(reject("connect on an established slot")),
            ProtocolCommand::VerifyConnect(parameters) => self.handle_verify_connect(ctx, &parameters)?,
            ProtocolCommand::Disconnect { data } => self.handle_disconnect(ctx, command, data),
            ProtocolCommand::Ping => self.handle_ping()?,
            ProtocolCommand::SendReliable { .. } => {
                self.handle_send(ctx, command, decoded.payload, PacketFlags::RELIABLE)?
            }
            ProtocolCommand::SendUnreliable { .. } => {
                self.handle_send(ctx, command, decoded.payload, PacketFlags::empty())?
            }
            ProtocolCommand::SendUnsequenced { unsequenced_group, .. } => {
                self.handle_send_unsequenced(ctx, command, unsequenced_group, decoded.payload)?
            }
            ProtocolCommand::SendFragment(fragment) => {
                self.handle_send_fragment(ctx, command, &fragment, decoded.payload)?
            }
            ProtocolCommand::SendUnreliableFragment(fragment) => {
                self.handle_send_unreliable_fragment(ctx, command, &fragment, decoded.payload)?
            }
            ProtocolCommand::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth } => {
                self.handle_bandwidth_limit(ctx, incoming_bandwidth, outgoing_bandwidth)?
            }
            ProtocolCommand::ThrottleConfigure {
                packet_throttle_interval,
                packet_throttle_acceleration,
                packet_throttle_deceleration,
            } => {
                if !self.state.is_connected() {
                    return Err(reject("throttle configure before connect"));
                }
                self.congestion.configure(
                    packet_throttle_interval,
                    packet_throttle_acceleration,
                    packet_throttle_deceleration,
                );
            }
        }

        if command.needs_acknowledge() {
            let sent_time = sent_time.ok_or_else(|| reject("acknowledged command without sent time"))?;
            match self.state {
                PeerState::Disconnecting
                | PeerState::AcknowledgingConnect
                | PeerState::Disconnected
                | PeerState::Zombie => {}
                PeerState::AcknowledgingDisconnect => {
                    if command.kind() == CommandKind::Disconnect {
                        self.queue_acknowledgement(command, sent_time);
                    }
                }
                _ => self.queue_acknowledgement(command, sent_time),
            }
        }
        Ok(())
    }

    fn queue_acknowledgement(&mut self, command: &Command, sent_time: u16) {
        if let Some(channel) = self.channels.get(usize::from(command.header.channel_id)) {
            if channel.window_position(command.header.reliable_sequence_number) == WindowPosition::Violation {
                return;
            }
        }
        self.bandwidth.record_bytes_sent(CommandKind::Acknowledge.size() as u32);
        self.acknowledgements.push_back(Acknowledgement { sent_time, command: command.header });
    }

    fn handle_acknowledge(
        &mut self,
        ctx: &mut HostContext,
        channel_id: u8,
        reliable_sequence_number: u16,
        received_sent_time: u16,
    ) -> Result<()> {
        if self.state.is_inactive() {
            return Ok(());
        }

        // Rebuild the full sent time from its low 16 bits
        let now = ctx.service_time;
        let mut sent_time = u32::from(received_sent_time) | (now & 0xFFFF_0000);
        if (sent_time & 0x8000) > (now & 0x8000) {
            sent_time = sent_time.wrapping_sub(0x10000);
        }
        if time_less(now, sent_time) {
            return Ok(());
        }

        self.last_receive_time = now;
        self.earliest_timeout = 0;

        let removed = self.remove_sent_reliable_command(reliable_sequence_number, channel_id);
        if removed.is_some() {
            let round_trip_time = time_difference(now, sent_time).max(1);
            self.congestion.update_round_trip_time(round_trip_time, now);
        }

        match self.state {
            PeerState::AcknowledgingConnect => {
                if removed != Some(CommandKind::VerifyConnect) {
                    return Err(reject("unexpected acknowledgement during handshake"));
                }
                self.notify_connect(ctx);
            }
            PeerState::Disconnecting => {
                if removed != Some(CommandKind::Disconnect) {
                    return Err(reject("unexpected acknowledgement while disconnecting"));
                }
                self.notify_disconnect(ctx);
            }
            PeerState::DisconnectLater => self.complete_disconnect_later(ctx),
            _ => {}
        }
        Ok(())
    }

    /// Drops the reliable command `reliable_sequence_number` on `channel_id`
    /// after its acknowledgement, returning what kind of command it was.
    pub(crate) fn remove_sent_reliable_command(
        &mut self,
        reliable_sequence_number: u16,
        channel_id: u8,
    ) -> Option<CommandKind> {
        let matches = |command: &OutgoingCommand| {
            command.reliable_sequence_number == reliable_sequence_number
                && command.command.header.channel_id == channel_id
        };

        let (outgoing, was_sent) = match self.sent_reliable_commands.iter().position(matches) {
            Some(index) => (self.sent_reliable_commands.remove(index)?, true),
            None => {
                // A retransmission may already be queued again
                let index = self
                    .outgoing_reliable_commands
                    .iter()
                    .take_while(|command| command.send_attempts >= 1)
                    .position(matches)?;
                (self.outgoing_reliable_commands.remove(index)?, false)
            }
        };

        if let Some(channel) = self.channels.get_mut(usize::from(channel_id)) {
            channel.release_window(reliable_sequence_number);
        }
        if let Some(packet) = &outgoing.packet {
            if was_sent {
                self.reliable_data_in_transit =
                    self.reliable_data_in_transit.saturating_sub(u32::from(outgoing.fragment_length));
            }
            packet.mark_sent();
        }

        if let Some(front) = self.sent_reliable_commands.front() {
            self.next_timeout = front.sent_time.wrapping_add(front.round_trip_timeout);
        }
        Some(outgoing.command.kind())
    }

    fn handle_verify_connect(&mut self, ctx: &mut HostContext, parameters: &ConnectParameters) -> Result<()> {
        if self.state != PeerState::Connecting {
            return Ok(());
        }

        let channel_count = parameters.channel_count as usize;
        if !(MINIMUM_CHANNEL_COUNT..=MAXIMUM_CHANNEL_COUNT).contains(&channel_count)
            || parameters.packet_throttle_interval != self.congestion.packet_throttle_interval()
            || parameters.packet_throttle_acceleration != self.congestion.packet_throttle_acceleration()
            || parameters.packet_throttle_deceleration != self.congestion.packet_throttle_deceleration()
            || parameters.connect_id != self.connect_id
        {
            debug!(peer = self.incoming_peer_id, "verify connect does not match the request");
            self.event_data = 0;
            self.dispatch_state(ctx, PeerState::Zombie);
            return Err(reject("verify connect does not match the request"));
        }

        // The reply acknowledges the Connect command
        self.remove_sent_reliable_command(1, CONTROL_CHANNEL_ID);

        self.channels.truncate(channel_count);
        self.outgoing_peer_id = parameters.outgoing_peer_id;
        self.incoming_session_id = parameters.incoming_session_id;
        self.outgoing_session_id = parameters.outgoing_session_id;
        self.mtu = self.mtu.min(parameters.mtu.clamp(MINIMUM_MTU, MAXIMUM_MTU));
        self.window_size = self.window_size.min(clamp_window_size(parameters.window_size));
        self.bandwidth.incoming_bandwidth = parameters.incoming_bandwidth;
        self.bandwidth.outgoing_bandwidth = parameters.outgoing_bandwidth;

        self.notify_connect(ctx);
        Ok(())
    }

    fn handle_disconnect(&mut self, ctx: &mut HostContext, command: &Command, data: u32) {
        if matches!(self.state, PeerState::Disconnected | PeerState::Zombie | PeerState::AcknowledgingDisconnect) {
            return;
        }

        self.reset_queues(ctx);
        match self.state {
            PeerState::ConnectionSucceeded | PeerState::Disconnecting | PeerState::Connecting => {
                self.dispatch_state(ctx, PeerState::Zombie);
            }
            state if !state.is_connected() => {
                if state == PeerState::ConnectionPending {
                    ctx.recalculate_bandwidth_limits = true;
                }
                self.reset(ctx);
            }
            _ if command.needs_acknowledge() => self.change_state(ctx, PeerState::AcknowledgingDisconnect),
            _ => self.dispatch_state(ctx, PeerState::Zombie),
        }

        if self.state != PeerState::Disconnected {
            self.event_data = data;
        }
    }

    fn handle_ping(&self) -> Result<()> {
        if self.state.is_connected() {
            Ok(())
        } else {
            Err(reject("ping before connect"))
        }
    }

    fn handle_bandwidth_limit(&mut self, ctx: &mut HostContext, incoming: u32, outgoing: u32) -> Result<()> {
        if !self.state.is_connected() {
            return Err(reject("bandwidth limit before connect"));
        }

        if self.bandwidth.is_limited() {
            ctx.bandwidth_limited_peers = ctx.bandwidth_limited_peers.saturating_sub(1);
        }
        self.bandwidth.incoming_bandwidth = incoming;
        self.bandwidth.outgoing_bandwidth = outgoing;
        if self.bandwidth.is_limited() {
            ctx.bandwidth_limited_peers += 1;
        }
        self.window_size = window_size_for(ctx.outgoing_bandwidth, incoming);
        Ok(())
    }

    /// Payload commands need an open channel and an established connection.
    fn check_data_command(&self, ctx: &HostContext, command: &Command, length: usize) -> Result<()> {
        if usize::from(command.header.channel_id) >= self.channels.len() || !self.state.is_connected() {
            return Err(reject("payload outside an open channel"));
        }
        if length > ctx.maximum_packet_size {
            return Err(reject("payload over the maximum packet size"));
        }
        Ok(())
    }

    fn handle_send(&mut self, ctx: &mut HostContext, command: &Command, payload: &[u8], flags: PacketFlags) -> Result<()> {
        self.check_data_command(ctx, command, payload.len())?;
        self.queue_incoming_command(ctx, command, payload, payload.len(), flags, 0)?;
        Ok(())
    }

    fn handle_send_unsequenced(
        &mut self,
        ctx: &mut HostContext,
        command: &Command,
        unsequenced_group: u16,
        payload: &[u8],
    ) -> Result<()> {
        self.check_data_command(ctx, command, payload.len())?;
        let Some(index) = self.unsequenced.accept(unsequenced_group) else {
            return Ok(());
        };
        self.queue_incoming_command(ctx, command, payload, payload.len(), PacketFlags::UNSEQUENCED, 0)?;
        self.unsequenced.mark_received(index);
        Ok(())
    }

    fn check_fragment(ctx: &HostContext, fragment: &FragmentHeader, payload: &[u8]) -> Result<()> {
        let total_length = fragment.total_length as usize;
        if fragment.fragment_count > MAXIMUM_FRAGMENT_COUNT
            || fragment.fragment_number >= fragment.fragment_count
            || total_length > ctx.maximum_packet_size
            || fragment.fragment_offset >= fragment.total_length
            || payload.len() > (fragment.total_length - fragment.fragment_offset) as usize
        {
            return Err(reject("malformed fragment"));
        }
        Ok(())
    }

    fn handle_send_fragment(
        &mut self,
        ctx: &mut HostContext,
        command: &Command,
        fragment: &FragmentHeader,
        payload: &[u8],
    ) -> Result<()> {
        self.check_data_command(ctx, command, payload.len())?;
        let channel_id = usize::from(command.header.channel_id);
        let start_sequence_number = fragment.start_sequence_number;

        match self.channels[channel_id].window_position(start_sequence_number) {
            WindowPosition::Inside => {}
            WindowPosition::Stale => return Ok(()),
            WindowPosition::Violation => return self.note_window_violation(ctx),
        }
        Self::check_fragment(ctx, fragment, payload)?;

        let channel = &self.channels[channel_id];
        let incoming = channel.incoming_reliable_sequence_number;
        let mut existing = None;
        for (index, queued) in channel.incoming_reliable_commands.iter().enumerate().rev() {
            if start_sequence_number >= incoming {
                if queued.reliable_sequence_number < incoming {
                    continue;
                }
            } else if queued.reliable_sequence_number >= incoming {
                break;
            }

            if queued.reliable_sequence_number <= start_sequence_number {
                if queued.reliable_sequence_number < start_sequence_number {
                    break;
                }
                if queued.kind() != CommandKind::SendFragment
                    || queued.data.len() != fragment.total_length as usize
                    || queued.fragment_count() != fragment.fragment_count
                {
                    return Err(reject("fragment does not match its run"));
                }
                existing = Some(index);
                break;
            }
        }

        let index = match existing {
            Some(index) => index,
            None => {
                let mut start_command = *command;
                start_command.header.reliable_sequence_number = start_sequence_number;
                match self.queue_incoming_command(
                    ctx,
                    &start_command,
                    &[],
                    fragment.total_length as usize,
                    PacketFlags::RELIABLE,
                    fragment.fragment_count,
                )? {
                    Some(index) => index,
                    None => return Ok(()),
                }
            }
        };

        let queued = &mut self.channels[channel_id].incoming_reliable_commands[index];
        if Self::apply_fragment(queued, fragment, payload) {
            self.dispatch_incoming_reliable(ctx, channel_id);
        }
        Ok(())
    }

    fn handle_send_unreliable_fragment(
        &mut self,
        ctx: &mut HostContext,
        command: &Command,
        fragment: &FragmentHeader,
        payload: &[u8],
    ) -> Result<()> {
        self.check_data_command(ctx, command, payload.len())?;
        let channel_id = usize::from(command.header.channel_id);
        let reliable_sequence_number = command.header.reliable_sequence_number;
        let start_sequence_number = fragment.start_sequence_number;

        let channel = &self.channels[channel_id];
        if channel.window_position(reliable_sequence_number) != WindowPosition::Inside {
            return Ok(());
        }
        let incoming = channel.incoming_reliable_sequence_number;
        if reliable_sequence_number == incoming && start_sequence_number <= channel.incoming_unreliable_sequence_number {
            return Ok(());
        }
        Self::check_fragment(ctx, fragment, payload)?;

        let mut existing = None;
        for (index, queued) in channel.incoming_unreliable_commands.iter().enumerate().rev() {
            if queued.kind() == CommandKind::SendUnsequenced {
                continue;
            }
            if reliable_sequence_number >= incoming {
                if queued.reliable_sequence_number < incoming {
                    continue;
                }
            } else if queued.reliable_sequence_number >= incoming {
                break;
            }

            if queued.reliable_sequence_number < reliable_sequence_number {
                break;
            }
            if queued.reliable_sequence_number > reliable_sequence_number {
                continue;
            }
            if queued.unreliable_sequence_number <= start_sequence_number {
                if queued.unreliable_sequence_number < start_sequence_number {
                    break;
                }
                if queued.kind() != CommandKind::SendUnreliableFragment
                    || queued.data.len() != fragment.total_length as usize
                    || queued.fragment_count() != fragment.fragment_count
                {
                    return Err(reject("fragment does not match its run"));
                }
                existing = Some(index);
                break;
            }
        }

        let index = match existing {
            Some(index) => index,
            None => match self.queue_incoming_command(
                ctx,
                command,
                &[],
                fragment.total_length as usize,
                PacketFlags::UNRELIABLE_FRAGMENT,
                fragment.fragment_count,
            )? {
                Some(index) => index,
                None => return Ok(()),
            },
        };

        let queued = &mut self.channels[channel_id].incoming_unreliable_commands[index];
        if Self::apply_fragment(queued, fragment, payload) {
            self.dispatch_incoming_unreliable(ctx, channel_id);
        }
        Ok(())
    }

    /// Copies a fragment into its run. Returns true when this fragment
    /// completed the packet.
    fn apply_fragment(queued: &mut IncomingCommand, fragment: &FragmentHeader, payload: &[u8]) -> bool {
        let IncomingCommand { fragments, data, .. } = queued;
        let Some(fragments) = fragments else {
            return false;
        };
        if !fragments.mark(fragment.fragment_number) {
            return false;
        }
        copy_fragment(data, fragment.fragment_offset as usize, payload);
        fragments.is_complete()
    }

    /// Counts a reliable command that arrived too far ahead of the receive
    /// window, dropping the peer once the configured limit is exceeded.
    fn note_window_violation(&mut self, ctx: &mut HostContext) -> Result<()> {
        self.window_violations += 1;
        warn!(peer = self.incoming_peer_id, violations = self.window_violations, "reliable command outside the receive window");

        let maximum = ctx.config.maximum_window_violations;
        if maximum > 0 && self.window_violations > maximum {
            warn!(peer = self.incoming_peer_id, "too many window violations, dropping peer");
            self.notify_disconnect(ctx);
            return Err(reject("too many window violations"));
        }
        Ok(())
    }

    /// Stores a received payload command in its channel, ordered by
    /// sequence number.
    ///
    /// Returns the command's index in its channel queue, or `None` if it was
    /// a duplicate or stale and was dropped. Fragment runs (`fragment_count`
    /// above 0) are queued with a zeroed buffer of `total_length` bytes and
    /// are not dispatched until complete.
    fn queue_incoming_command(
        &mut self,
        ctx: &mut HostContext,
        command: &Command,
        data: &[u8],
        total_length: usize,
        flags: PacketFlags,
        fragment_count: u32,
    ) -> Result<Option<usize>> {
        if self.state == PeerState::DisconnectLater {
            return discard(fragment_count);
        }

        let channel_id = usize::from(command.header.channel_id);
        let kind = command.kind();
        let mut reliable_sequence_number = 0;
        let mut unreliable_sequence_number = 0;

        if kind != CommandKind::SendUnsequenced {
            reliable_sequence_number = command.header.reliable_sequence_number;
            match self.channels[channel_id].window_position(reliable_sequence_number) {
                WindowPosition::Inside => {}
                WindowPosition::Stale => return discard(fragment_count),
                WindowPosition::Violation => {
                    if command.needs_acknowledge() {
                        self.note_window_violation(ctx)?;
                    }
                    return discard(fragment_count);
                }
            }
        }

        let channel = &self.channels[channel_id];
        let incoming = channel.incoming_reliable_sequence_number;
        let (reliable, position) = match command.body {
            ProtocolCommand::SendReliable { .. } | ProtocolCommand::SendFragment(_) => {
                if reliable_sequence_number == incoming {
                    return discard(fragment_count);
                }

                let mut position = 0;
                for (index, queued) in channel.incoming_reliable_commands.iter().enumerate().rev() {
                    if reliable_sequence_number >= incoming {
                        if queued.reliable_sequence_number < incoming {
                            continue;
                        }
                    } else if queued.reliable_sequence_number >= incoming {
                        position = index + 1;
                        break;
                    }

                    if queued.reliable_sequence_number <= reliable_sequence_number {
                        if queued.reliable_sequence_number < reliable_sequence_number {
                            position = index + 1;
                            break;
                        }
                        return discard(fragment_count);
                    }
                }
                (true, position)
            }
            ProtocolCommand::SendUnreliable { unreliable_sequence_number: number, .. }
            | ProtocolCommand::SendUnreliableFragment(FragmentHeader { start_sequence_number: number, .. }) => {
                unreliable_sequence_number = number;
                if reliable_sequence_number == incoming
                    && unreliable_sequence_number <= channel.incoming_unreliable_sequence_number
                {
                    return discard(fragment_count);
                }

                let mut position = 0;
                for (index, queued) in channel.incoming_unreliable_commands.iter().enumerate().rev() {
                    if queued.kind() == CommandKind::SendUnsequenced {
                        continue;
                    }
                    if reliable_sequence_number >= incoming {
                        if queued.reliable_sequence_number < incoming {
                            continue;
                        }
                    } else if queued.reliable_sequence_number >= incoming {
                        position = index + 1;
                        break;
                    }

                    if queued.reliable_sequence_number < reliable_sequence_number {
                        position = index + 1;
                        break;
                    }
                    if queued.reliable_sequence_number > reliable_sequence_number {
                        continue;
                    }
                    if queued.unreliable_sequence_number <= unreliable_sequence_number {
                        if queued.unreliable_sequence_number < unreliable_sequence_number {
                            position = index + 1;
                            break;
                        }
                        return discard(fragment_count);
                    }
                }
                (false, position)
            }
            ProtocolCommand::SendUnsequenced { .. } => (false, channel.incoming_unreliable_commands.len()),
            _ => return discard(fragment_count),
        };

        if self.total_waiting_data >= ctx.maximum_waiting_data {
            warn!(
                peer = self.incoming_peer_id,
                waiting = self.total_waiting_data,
                "too much undelivered data, refusing command"
            );
            return Err(reject("too much undelivered data"));
        }

        let mut buffer = ctx.pool.allocate(total_length);
        if fragment_count == 0 {
            buffer[..data.len()].copy_from_slice(data);
        }
        let queued = IncomingCommand {
            reliable_sequence_number,
            unreliable_sequence_number,
            command: *command,
            flags,
            data: buffer,
            fragments: (fragment_count > 0).then(|| FragmentBuffer::new(fragment_count)),
        };
        self.total_waiting_data += total_length;

        let channel = &mut self.channels[channel_id];
        if reliable {
            channel.incoming_reliable_commands.insert(position, queued);
        } else {
            channel.incoming_unreliable_commands.insert(position, queued);
        }

        if fragment_count == 0 {
            if reliable {
                self.dispatch_incoming_reliable(ctx, channel_id);
            } else {
                self.dispatch_incoming_unreliable(ctx, channel_id);
            }
        }
        Ok(Some(position))
    }

    /// Moves the run of consecutive complete reliable commands to the
    /// delivery queue.
    fn dispatch_incoming_reliable(&mut self, ctx: &mut HostContext, channel_id: usize) {
        let index = self.index();
        let channel = &mut self.channels[channel_id];
        let mut moved = false;

        while let Some(front) = channel.incoming_reliable_commands.front() {
            if !front.is_complete()
                || front.reliable_sequence_number != channel.incoming_reliable_sequence_number.wrapping_add(1)
            {
                break;
            }
            channel.incoming_reliable_sequence_number = front.reliable_sequence_number;
            if front.fragment_count() > 0 {
                channel.incoming_reliable_sequence_number =
                    channel.incoming_reliable_sequence_number.wrapping_add((front.fragment_count() - 1) as u16);
            }
            if let Some(command) = channel.incoming_reliable_commands.pop_front() {
                self.dispatched_commands.push_back(command);
                moved = true;
            }
        }

        if !moved {
            return;
        }
        channel.incoming_unreliable_sequence_number = 0;
        ctx.dispatch_queue.push(index);

        if !self.channels[channel_id].incoming_unreliable_commands.is_empty() {
            self.dispatch_incoming_unreliable(ctx, channel_id);
        }
    }

    /// Delivers the unreliable commands that follow the last delivered
    /// reliable command and drops those left behind by it.
    fn dispatch_incoming_unreliable(&mut self, ctx: &mut HostContext, channel_id: usize) {
        let index = self.index();
        let channel = &mut self.channels[channel_id];
        let incoming = channel.incoming_reliable_sequence_number;
        let mut pending = std::mem::take(&mut channel.incoming_unreliable_commands);
        let mut retained = VecDeque::with_capacity(pending.len());
        let mut moved = false;

        while let Some(command) = pending.pop_front() {
            if command.kind() == CommandKind::SendUnsequenced {
                self.dispatched_commands.push_back(command);
                moved = true;
            } else if command.reliable_sequence_number == incoming {
                if command.is_complete() {
                    channel.incoming_unreliable_sequence_number = command.unreliable_sequence_number;
                    self.dispatched_commands.push_back(command);
                    moved = true;
                } else {
                    retained.push_back(command);
                }
            } else if channel.window_position(command.reliable_sequence_number) == WindowPosition::Inside {
                // Waits for its reliable predecessor, and so does everything after it
                retained.push_back(command);
                retained.append(&mut pending);
            } else {
                self.total_waiting_data = self.total_waiting_data.saturating_sub(command.data.len());
                ctx.pool.deallocate(command.data);
            }
        }
        channel.incoming_unreliable_commands = retained;

        if moved {
            ctx.dispatch_queue.push(index);
        }
    }
}
