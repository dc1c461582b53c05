use std::{
    collections::VecDeque,
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use relnet_core::{
    constants::{
        CONTROL_CHANNEL_ID, MAXIMUM_MTU, MAXIMUM_PEER_ID, MAXIMUM_WINDOW_SIZE, MINIMUM_MTU, MINIMUM_WINDOW_SIZE,
        PING_INTERVAL, TIMEOUT_LIMIT, TIMEOUT_MAXIMUM, TIMEOUT_MINIMUM, WINDOW_SIZE_SCALE,
    },
    packet::Packet,
};
use relnet_protocol::{
    command::{Command, ConnectParameters, ProtocolCommand, COMMAND_FLAG_ACKNOWLEDGE, COMMAND_FLAG_UNSEQUENCED},
    congestion::CongestionControl,
    header::{HEADER_SESSION_MASK, HEADER_SESSION_SHIFT},
};
use tracing::debug;

use crate::{
    bandwidth_throttle::{clamp_window_size, window_size_for, BandwidthThrottle},
    channel::Channel,
    command_queue::{Acknowledgement, IncomingCommand, OutgoingCommand},
    context::{HostContext, PeerId},
    peer_state::PeerState,
    statistics::PeerStatistics,
    unsequenced::UnsequencedState,
};

mod command_processor;
mod encoder;
mod fragmenter;

pub use encoder::ComposedDatagram;

/// Session ids cycle through the values that fit the header's session bits.
const SESSION_ID_MASK: u8 = (HEADER_SESSION_MASK >> HEADER_SESSION_SHIFT) as u8;

/// Session id of a slot that has never been used.
const UNASSIGNED_SESSION_ID: u8 = 0xFF;

/// Event produced when a peer is taken off the dispatch queue.
#[derive(Debug)]
pub enum PeerEvent {
    /// The handshake completed
    Connect {
        /// True if the remote side initiated the connection
        incoming: bool,
        /// Data sent with the Connect command (0 for outgoing connections)
        data: u32,
    },
    /// The connection is gone and the slot has been reset
    Disconnect {
        /// Data sent with the Disconnect command, 0 on timeout
        data: u32,
    },
    /// A packet was delivered
    Receive {
        /// Channel the packet arrived on
        channel_id: u8,
        /// The packet
        packet: Packet,
    },
}

/// Outcome of a disconnect request.
#[must_use]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Teardown {
    /// The peer was already going down; nothing changed
    Ignored,
    /// A Disconnect is queued and the peer waits for its acknowledgement,
    /// or for outgoing data to drain first
    Graceful,
    /// An unacknowledged Disconnect is queued; the caller must flush it to
    /// the socket and then reset the peer
    Immediate,
}

/// A remote endpoint: one slot of a host's peer table.
///
/// Holds the connection state machine, the per-channel sequencing state, and
/// the queues of commands waiting to be sent, waiting to be acknowledged,
/// and waiting to be delivered.
pub struct Peer {
    /// Slot index; the remote side addresses its datagrams to it
    incoming_peer_id: u16,
    /// Slot index of this connection on the remote host (`MAXIMUM_PEER_ID` until known)
    outgoing_peer_id: u16,
    /// Session id expected on incoming datagrams
    incoming_session_id: u8,
    /// Session id stamped on outgoing datagrams
    outgoing_session_id: u8,
    /// Random nonce of the connection attempt
    connect_id: u32,
    /// The address of the remote endpoint
    address: SocketAddr,
    /// Current connection state
    state: PeerState,
    /// Open channels
    channels: Vec<Channel>,
    /// Remote bandwidth limits and traffic counters
    bandwidth: BandwidthThrottle,
    /// Round-trip, throttle and loss estimates
    congestion: CongestionControl,

    /// Service time of the last datagram sent
    last_send_time: u32,
    /// Service time of the last acknowledgement received
    last_receive_time: u32,
    /// Service time at which the oldest sent reliable command times out
    next_timeout: u32,
    /// Sent time of the oldest command that timed out without an ack in between
    earliest_timeout: u32,
    /// Keep-alive interval in milliseconds
    ping_interval: u32,
    /// Multiplier of the initial retransmission timeout after which a command may fail
    timeout_limit: u32,
    /// Minimum time without acknowledgements before the peer may be dropped
    timeout_minimum: u32,
    /// Time without acknowledgements after which the peer is always dropped
    timeout_maximum: u32,

    /// Negotiated MTU
    mtu: u32,
    /// Negotiated reliable window size in bytes
    window_size: u32,
    /// Reliable payload bytes sent but not acknowledged
    reliable_data_in_transit: u32,
    /// Sequence number of the last command queued on the control channel
    outgoing_reliable_sequence_number: u16,

    /// Acknowledgements owed to the remote side
    acknowledgements: VecDeque<Acknowledgement>,
    /// Reliable commands sent and awaiting acknowledgement, oldest first
    sent_reliable_commands: VecDeque<OutgoingCommand>,
    /// Reliable commands waiting to be sent
    outgoing_reliable_commands: VecDeque<OutgoingCommand>,
    /// Unreliable commands waiting to be sent
    outgoing_unreliable_commands: VecDeque<OutgoingCommand>,
    /// Complete, ordered commands waiting to be delivered
    dispatched_commands: VecDeque<IncomingCommand>,
    /// Duplicate filter for unsequenced packets
    unsequenced: UnsequencedState,

    /// Data carried by the pending connect or disconnect event
    event_data: u32,
    /// Bytes received but not yet delivered
    total_waiting_data: usize,
    /// Reliable commands received too far ahead of the receive window
    window_violations: u32,
    /// Lifetime counters
    statistics: PeerStatistics,
}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("id", &self.incoming_peer_id)
            .field("address", &self.address)
            .field("state", &self.state)
            .field("channels", &self.channels.len())
            .field("round_trip_time", &self.congestion.round_trip_time())
            .finish()
    }
}

impl Peer {
    /// Creates the free peer slot `index` of a host.
    pub fn new(index: usize, ctx: &HostContext) -> Peer {
        let config = &ctx.config;
        Peer {
            incoming_peer_id: index as u16,
            outgoing_peer_id: MAXIMUM_PEER_ID,
            incoming_session_id: UNASSIGNED_SESSION_ID,
            outgoing_session_id: UNASSIGNED_SESSION_ID,
            connect_id: 0,
            address: unspecified_address(),
            state: PeerState::Disconnected,
            channels: Vec::new(),
            bandwidth: BandwidthThrottle::default(),
            congestion: CongestionControl::new(
                config.packet_throttle_interval,
                config.packet_throttle_acceleration,
                config.packet_throttle_deceleration,
            ),
            last_send_time: 0,
            last_receive_time: 0,
            next_timeout: 0,
            earliest_timeout: 0,
            ping_interval: config.ping_interval,
            timeout_limit: config.timeout_limit,
            timeout_minimum: config.timeout_minimum,
            timeout_maximum: config.timeout_maximum,
            mtu: ctx.mtu,
            window_size: MAXIMUM_WINDOW_SIZE,
            reliable_data_in_transit: 0,
            outgoing_reliable_sequence_number: 0,
            acknowledgements: VecDeque::new(),
            sent_reliable_commands: VecDeque::new(),
            outgoing_reliable_commands: VecDeque::new(),
            outgoing_unreliable_commands: VecDeque::new(),
            dispatched_commands: VecDeque::new(),
            unsequenced: UnsequencedState::new(),
            event_data: 0,
            total_waiting_data: 0,
            window_violations: 0,
            statistics: PeerStatistics::default(),
        }
    }

    /// Starts an outgoing connection: opens `channel_count` channels and
    /// queues the Connect command.
    pub fn init_outgoing(
        &mut self,
        ctx: &mut HostContext,
        address: SocketAddr,
        channel_count: usize,
        connect_id: u32,
        data: u32,
    ) {
        self.channels = (0..channel_count).map(|_| Channel::new()).collect();
        self.state = PeerState::Connecting;
        self.address = address;
        self.connect_id = connect_id;
        self.window_size = local_window_size(ctx.outgoing_bandwidth);

        let parameters = ConnectParameters {
            outgoing_peer_id: self.incoming_peer_id,
            incoming_session_id: self.incoming_session_id,
            outgoing_session_id: self.outgoing_session_id,
            mtu: self.mtu,
            window_size: self.window_size,
            channel_count: channel_count as u32,
            incoming_bandwidth: ctx.incoming_bandwidth,
            outgoing_bandwidth: ctx.outgoing_bandwidth,
            packet_throttle_interval: self.congestion.packet_throttle_interval(),
            packet_throttle_acceleration: self.congestion.packet_throttle_acceleration(),
            packet_throttle_deceleration: self.congestion.packet_throttle_deceleration(),
            connect_id,
        };
        debug!(peer = self.incoming_peer_id, %address, connect_id, "connecting");
        self.queue_outgoing_command(
            Command::new(ProtocolCommand::Connect { parameters, data }, COMMAND_FLAG_ACKNOWLEDGE, CONTROL_CHANNEL_ID),
            None,
            0,
            0,
        );
    }

    /// Accepts an incoming connection on this free slot and queues the
    /// VerifyConnect reply.
    ///
    /// `channel_count` is the negotiated count, already bounded by the host's
    /// channel limit.
    pub fn init_incoming(
        &mut self,
        ctx: &mut HostContext,
        address: SocketAddr,
        remote: &ConnectParameters,
        data: u32,
        channel_count: usize,
    ) {
        self.channels = (0..channel_count).map(|_| Channel::new()).collect();
        self.state = PeerState::AcknowledgingConnect;
        self.connect_id = remote.connect_id;
        self.address = address;
        self.outgoing_peer_id = remote.outgoing_peer_id;
        self.bandwidth.incoming_bandwidth = remote.incoming_bandwidth;
        self.bandwidth.outgoing_bandwidth = remote.outgoing_bandwidth;
        self.congestion.configure(
            remote.packet_throttle_interval,
            remote.packet_throttle_acceleration,
            remote.packet_throttle_deceleration,
        );
        self.event_data = data;

        // The remote's incoming session becomes our outgoing one and vice versa;
        // both move past the value the slot used last time.
        let requested = if remote.incoming_session_id == UNASSIGNED_SESSION_ID {
            self.outgoing_session_id
        } else {
            remote.incoming_session_id
        };
        let incoming_session_id = next_session_id(requested, self.outgoing_session_id);
        self.outgoing_session_id = incoming_session_id;

        let requested = if remote.outgoing_session_id == UNASSIGNED_SESSION_ID {
            self.incoming_session_id
        } else {
            remote.outgoing_session_id
        };
        let outgoing_session_id = next_session_id(requested, self.incoming_session_id);
        self.incoming_session_id = outgoing_session_id;

        self.mtu = remote.mtu.clamp(MINIMUM_MTU, MAXIMUM_MTU);
        self.window_size = window_size_for(ctx.outgoing_bandwidth, self.bandwidth.incoming_bandwidth);
        let window_size = clamp_window_size(local_window_size(ctx.incoming_bandwidth).max(remote.window_size));

        let reply = ConnectParameters {
            outgoing_peer_id: self.incoming_peer_id,
            incoming_session_id,
            outgoing_session_id,
            mtu: self.mtu,
            window_size,
            channel_count: channel_count as u32,
            incoming_bandwidth: ctx.incoming_bandwidth,
            outgoing_bandwidth: ctx.outgoing_bandwidth,
            packet_throttle_interval: self.congestion.packet_throttle_interval(),
            packet_throttle_acceleration: self.congestion.packet_throttle_acceleration(),
            packet_throttle_deceleration: self.congestion.packet_throttle_deceleration(),
            connect_id: self.connect_id,
        };
        debug!(peer = self.incoming_peer_id, %address, channels = channel_count, "accepting connection");
        self.queue_outgoing_command(
            Command::new(ProtocolCommand::VerifyConnect(reply), COMMAND_FLAG_ACKNOWLEDGE, CONTROL_CHANNEL_ID),
            None,
            0,
            0,
        );
    }

    /// Queues a command for transmission, assigning its sequence numbers.
    pub(crate) fn queue_outgoing_command(
        &mut self,
        command: Command,
        packet: Option<Packet>,
        fragment_offset: u32,
        fragment_length: u16,
    ) {
        let mut outgoing = OutgoingCommand::new(command, packet, fragment_offset, fragment_length);
        self.bandwidth.record_bytes_sent((command.size() + fragment_length as usize) as u32);

        let channel_id = command.header.channel_id;
        if channel_id == CONTROL_CHANNEL_ID {
            self.outgoing_reliable_sequence_number = self.outgoing_reliable_sequence_number.wrapping_add(1);
            outgoing.reliable_sequence_number = self.outgoing_reliable_sequence_number;
        } else if command.needs_acknowledge() {
            let channel = &mut self.channels[channel_id as usize];
            channel.outgoing_reliable_sequence_number = channel.outgoing_reliable_sequence_number.wrapping_add(1);
            channel.outgoing_unreliable_sequence_number = 0;
            outgoing.reliable_sequence_number = channel.outgoing_reliable_sequence_number;
        } else if !command.header.is_unsequenced() {
            let channel = &mut self.channels[channel_id as usize];
            if fragment_offset == 0 {
                channel.outgoing_unreliable_sequence_number =
                    channel.outgoing_unreliable_sequence_number.wrapping_add(1);
            }
            outgoing.reliable_sequence_number = channel.outgoing_reliable_sequence_number;
            outgoing.unreliable_sequence_number = channel.outgoing_unreliable_sequence_number;
        }

        outgoing.command.header.reliable_sequence_number = outgoing.reliable_sequence_number;
        match &mut outgoing.command.body {
            ProtocolCommand::SendUnreliable { unreliable_sequence_number, .. } => {
                *unreliable_sequence_number = outgoing.unreliable_sequence_number;
            }
            ProtocolCommand::SendUnsequenced { unsequenced_group, .. } => {
                *unsequenced_group = self.unsequenced.next_outgoing_group();
            }
            _ => {}
        }

        if outgoing.command.needs_acknowledge() {
            self.outgoing_reliable_commands.push_back(outgoing);
        } else {
            self.outgoing_unreliable_commands.push_back(outgoing);
        }
    }

    /// Moves to `state`, keeping the host's connected-peer counters in step.
    pub(crate) fn change_state(&mut self, ctx: &mut HostContext, state: PeerState) {
        if state.is_connected() {
            self.on_connect(ctx);
        } else {
            self.on_disconnect(ctx);
        }
        if self.state != state {
            debug!(peer = self.incoming_peer_id, from = ?self.state, to = ?state, "peer state change");
        }
        self.state = state;
    }

    /// Moves to `state` and queues the peer so the change surfaces as an event.
    pub(crate) fn dispatch_state(&mut self, ctx: &mut HostContext, state: PeerState) {
        self.change_state(ctx, state);
        ctx.dispatch_queue.push(self.index());
    }

    fn on_connect(&mut self, ctx: &mut HostContext) {
        if !self.state.is_connected() {
            if self.bandwidth.is_limited() {
                ctx.bandwidth_limited_peers += 1;
            }
            ctx.connected_peers += 1;
        }
    }

    fn on_disconnect(&mut self, ctx: &mut HostContext) {
        if self.state.is_connected() {
            if self.bandwidth.is_limited() {
                ctx.bandwidth_limited_peers -= 1;
            }
            ctx.connected_peers -= 1;
        }
    }

    /// The handshake completed; the connect event is delivered on dispatch.
    pub(crate) fn notify_connect(&mut self, ctx: &mut HostContext) {
        ctx.recalculate_bandwidth_limits = true;
        let state = if self.state == PeerState::Connecting {
            PeerState::ConnectionSucceeded
        } else {
            PeerState::ConnectionPending
        };
        self.dispatch_state(ctx, state);
    }

    /// The connection died. Half-open incoming connections are dropped
    /// silently; everything else surfaces a disconnect event.
    pub(crate) fn notify_disconnect(&mut self, ctx: &mut HostContext) {
        if self.state >= PeerState::ConnectionPending {
            ctx.recalculate_bandwidth_limits = true;
        }
        if self.state != PeerState::Connecting && self.state < PeerState::ConnectionSucceeded {
            self.reset(ctx);
        } else {
            self.event_data = 0;
            self.dispatch_state(ctx, PeerState::Zombie);
        }
    }

    /// Takes the next event off this peer, if any.
    ///
    /// Called by the host for peers popped off the dispatch queue.
    pub fn dispatch(&mut self, ctx: &mut HostContext) -> Option<PeerEvent> {
        match self.state {
            PeerState::ConnectionPending | PeerState::ConnectionSucceeded => {
                let incoming = self.state == PeerState::ConnectionPending;
                self.change_state(ctx, PeerState::Connected);
                Some(PeerEvent::Connect { incoming, data: self.event_data })
            }
            PeerState::Zombie => {
                ctx.recalculate_bandwidth_limits = true;
                let data = self.event_data;
                self.reset(ctx);
                Some(PeerEvent::Disconnect { data })
            }
            PeerState::Connected => {
                let (channel_id, packet) = self.receive(ctx)?;
                if !self.dispatched_commands.is_empty() {
                    ctx.dispatch_queue.push(self.index());
                }
                Some(PeerEvent::Receive { channel_id, packet })
            }
            _ => None,
        }
    }

    /// Pops the next delivered packet and the channel it arrived on.
    pub fn receive(&mut self, ctx: &mut HostContext) -> Option<(u8, Packet)> {
        let incoming = self.dispatched_commands.pop_front()?;
        self.total_waiting_data = self.total_waiting_data.saturating_sub(incoming.data.len());
        self.statistics.packets_received += 1;
        let channel_id = incoming.command.header.channel_id;
        Some((channel_id, ctx.pool.adopt(incoming.data, incoming.flags)))
    }

    /// Queues a Ping; only meaningful while connected.
    pub fn ping(&mut self) {
        if self.state != PeerState::Connected {
            return;
        }
        self.queue_outgoing_command(
            Command::new(ProtocolCommand::Ping, COMMAND_FLAG_ACKNOWLEDGE, CONTROL_CHANNEL_ID),
            None,
            0,
            0,
        );
    }

    /// Changes the throttle parameters and tells the remote side.
    pub fn throttle_configure(&mut self, interval: u32, acceleration: u32, deceleration: u32) {
        self.congestion.configure(interval, acceleration, deceleration);
        let body = ProtocolCommand::ThrottleConfigure {
            packet_throttle_interval: interval,
            packet_throttle_acceleration: acceleration,
            packet_throttle_deceleration: deceleration,
        };
        self.queue_outgoing_command(Command::new(body, COMMAND_FLAG_ACKNOWLEDGE, CONTROL_CHANNEL_ID), None, 0, 0);
    }

    /// Announces bandwidth limits to the remote side.
    pub fn queue_bandwidth_limit(&mut self, incoming_bandwidth: u32, outgoing_bandwidth: u32) {
        let body = ProtocolCommand::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth };
        self.queue_outgoing_command(Command::new(body, COMMAND_FLAG_ACKNOWLEDGE, CONTROL_CHANNEL_ID), None, 0, 0);
    }

    /// Requests a disconnect.
    ///
    /// A connected peer discards its queued traffic, sends an acknowledged
    /// Disconnect and waits for the acknowledgement; a disconnect event
    /// follows. A peer still in the handshake gets a best-effort Disconnect
    /// and must be flushed and reset by the caller ([`Teardown::Immediate`]).
    pub fn disconnect(&mut self, ctx: &mut HostContext, data: u32) -> Teardown {
        if matches!(
            self.state,
            PeerState::Disconnecting
                | PeerState::Disconnected
                | PeerState::AcknowledgingDisconnect
                | PeerState::Zombie
        ) {
            return Teardown::Ignored;
        }

        self.reset_queues(ctx);
        let connected = self.state.is_connected();
        let flags = if connected { COMMAND_FLAG_ACKNOWLEDGE } else { COMMAND_FLAG_UNSEQUENCED };
        self.queue_outgoing_command(
            Command::new(ProtocolCommand::Disconnect { data }, flags, CONTROL_CHANNEL_ID),
            None,
            0,
            0,
        );

        if connected {
            self.on_disconnect(ctx);
            debug!(peer = self.incoming_peer_id, "disconnecting");
            self.state = PeerState::Disconnecting;
            Teardown::Graceful
        } else {
            Teardown::Immediate
        }
    }

    /// Starts the deferred graceful disconnect of a `DisconnectLater` peer
    /// once its outgoing traffic has drained.
    pub(crate) fn complete_disconnect_later(&mut self, ctx: &mut HostContext) {
        if self.state != PeerState::DisconnectLater || self.has_outgoing_traffic() {
            return;
        }
        // Still connected, so this can only be graceful
        let teardown = self.disconnect(ctx, self.event_data);
        debug_assert_eq!(teardown, Teardown::Graceful);
    }

    /// Disconnects once every queued outgoing command has been acknowledged.
    pub fn disconnect_later(&mut self, ctx: &mut HostContext, data: u32) -> Teardown {
        if self.state.is_connected() && self.has_outgoing_traffic() {
            self.state = PeerState::DisconnectLater;
            self.event_data = data;
            Teardown::Graceful
        } else {
            self.disconnect(ctx, data)
        }
    }

    /// Queues a best-effort Disconnect without waiting for anything.
    ///
    /// The caller flushes the host and then resets the peer; no disconnect
    /// event is produced for this peer.
    pub fn disconnect_now(&mut self, ctx: &mut HostContext, data: u32) -> Teardown {
        match self.state {
            PeerState::Disconnected => Teardown::Ignored,
            PeerState::Zombie | PeerState::Disconnecting => Teardown::Immediate,
            _ => {
                self.reset_queues(ctx);
                self.queue_outgoing_command(
                    Command::new(ProtocolCommand::Disconnect { data }, COMMAND_FLAG_UNSEQUENCED, CONTROL_CHANNEL_ID),
                    None,
                    0,
                    0,
                );
                Teardown::Immediate
            }
        }
    }

    /// Forcefully returns the slot to `Disconnected`, dropping all queued
    /// traffic and channel state. The remote side is not notified.
    pub fn reset(&mut self, ctx: &mut HostContext) {
        self.on_disconnect(ctx);
        if self.state != PeerState::Disconnected {
            debug!(peer = self.incoming_peer_id, "peer reset");
        }

        let config = &ctx.config;
        self.outgoing_peer_id = MAXIMUM_PEER_ID;
        self.connect_id = 0;
        self.state = PeerState::Disconnected;
        self.bandwidth = BandwidthThrottle::default();
        self.congestion = CongestionControl::new(
            config.packet_throttle_interval,
            config.packet_throttle_acceleration,
            config.packet_throttle_deceleration,
        );
        self.last_send_time = 0;
        self.last_receive_time = 0;
        self.next_timeout = 0;
        self.earliest_timeout = 0;
        self.ping_interval = config.ping_interval;
        self.timeout_limit = config.timeout_limit;
        self.timeout_minimum = config.timeout_minimum;
        self.timeout_maximum = config.timeout_maximum;
        self.mtu = ctx.mtu;
        self.window_size = MAXIMUM_WINDOW_SIZE;
        self.reliable_data_in_transit = 0;
        self.outgoing_reliable_sequence_number = 0;
        self.unsequenced = UnsequencedState::new();
        self.event_data = 0;
        self.total_waiting_data = 0;
        self.window_violations = 0;
        self.statistics.reset();

        self.reset_queues(ctx);
        self.channels.clear();
    }

    /// Drops every queued command and incoming payload.
    fn reset_queues(&mut self, ctx: &mut HostContext) {
        ctx.dispatch_queue.remove(self.index());

        self.acknowledgements.clear();
        self.sent_reliable_commands.clear();
        self.outgoing_reliable_commands.clear();
        self.outgoing_unreliable_commands.clear();

        let pending = self.channels.iter_mut().flat_map(|channel| {
            channel.incoming_reliable_commands.drain(..).chain(channel.incoming_unreliable_commands.drain(..))
        });
        for incoming in self.dispatched_commands.drain(..).chain(pending) {
            ctx.pool.deallocate(incoming.data);
        }
        self.total_waiting_data = 0;
    }

    /// Sets the keep-alive interval; 0 restores the default.
    pub fn set_ping_interval(&mut self, ping_interval: u32) {
        self.ping_interval = if ping_interval != 0 { ping_interval } else { PING_INTERVAL };
    }

    /// Sets the timeout parameters; a 0 restores the corresponding default.
    pub fn set_timeout(&mut self, limit: u32, minimum: u32, maximum: u32) {
        self.timeout_limit = if limit != 0 { limit } else { TIMEOUT_LIMIT };
        self.timeout_minimum = if minimum != 0 { minimum } else { TIMEOUT_MINIMUM };
        self.timeout_maximum = if maximum != 0 { maximum } else { TIMEOUT_MAXIMUM };
    }

    /// Lowers the packet throttle ceiling, as decided by the host's
    /// bandwidth throttle.
    pub fn set_packet_throttle_limit(&mut self, limit: u32) {
        self.congestion.set_throttle_limit(limit);
    }

    /// Accounts for a datagram from this peer that passed validation.
    pub fn record_datagram_received(&mut self, address: SocketAddr, length: usize) {
        self.address = address;
        self.bandwidth.record_bytes_received(length as u32);
        self.statistics.bytes_received += length as u64;
    }

    /// Returns true if commands are queued or in flight.
    pub fn has_outgoing_traffic(&self) -> bool {
        !(self.outgoing_reliable_commands.is_empty()
            && self.outgoing_unreliable_commands.is_empty()
            && self.sent_reliable_commands.is_empty())
    }

    /// Slot index in the host's peer table.
    pub fn index(&self) -> usize {
        usize::from(self.incoming_peer_id)
    }

    /// Identifier of this peer in the host's peer table.
    pub fn id(&self) -> PeerId {
        PeerId(self.index())
    }

    /// Current connection state.
    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Address of the remote endpoint.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Slot index of this connection on the remote host.
    pub fn outgoing_peer_id(&self) -> u16 {
        self.outgoing_peer_id
    }

    /// Session id expected on incoming datagrams.
    pub fn incoming_session_id(&self) -> u8 {
        self.incoming_session_id
    }

    /// Session id stamped on outgoing datagrams.
    pub fn outgoing_session_id(&self) -> u8 {
        self.outgoing_session_id
    }

    /// Random nonce of the current connection.
    pub fn connect_id(&self) -> u32 {
        self.connect_id
    }

    /// Number of open channels.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Negotiated MTU.
    pub fn mtu(&self) -> u32 {
        self.mtu
    }

    /// Negotiated reliable window size in bytes.
    pub fn window_size(&self) -> u32 {
        self.window_size
    }

    /// Smoothed round-trip time in milliseconds.
    pub fn round_trip_time(&self) -> u32 {
        self.congestion.round_trip_time()
    }

    /// Round-trip time variance in milliseconds.
    pub fn round_trip_time_variance(&self) -> u32 {
        self.congestion.round_trip_time_variance()
    }

    /// Smoothed packet loss, as a fraction of `PACKET_LOSS_SCALE`.
    pub fn packet_loss(&self) -> u32 {
        self.congestion.packet_loss()
    }

    /// Current packet throttle, out of `PACKET_THROTTLE_SCALE`.
    pub fn packet_throttle(&self) -> u32 {
        self.congestion.packet_throttle()
    }

    /// Congestion state.
    pub fn congestion(&self) -> &CongestionControl {
        &self.congestion
    }

    /// Remote bandwidth limits and traffic counters.
    pub fn bandwidth(&self) -> &BandwidthThrottle {
        &self.bandwidth
    }

    /// Mutable access for the host's bandwidth throttle.
    pub fn bandwidth_mut(&mut self) -> &mut BandwidthThrottle {
        &mut self.bandwidth
    }

    /// Keep-alive interval in milliseconds.
    pub fn ping_interval(&self) -> u32 {
        self.ping_interval
    }

    /// Timeout limit, minimum and maximum.
    pub fn timeouts(&self) -> (u32, u32, u32) {
        (self.timeout_limit, self.timeout_minimum, self.timeout_maximum)
    }

    /// Reliable payload bytes sent but not yet acknowledged.
    pub fn reliable_data_in_transit(&self) -> u32 {
        self.reliable_data_in_transit
    }

    /// Bytes received but not yet delivered.
    pub fn total_waiting_data(&self) -> usize {
        self.total_waiting_data
    }

    /// Lifetime counters.
    pub fn statistics(&self) -> &PeerStatistics {
        &self.statistics
    }

    /// Service time of the last datagram sent to the peer.
    pub fn last_send_time(&self) -> u32 {
        self.last_send_time
    }

    /// Service time of the last acknowledgement received from the peer.
    pub fn last_receive_time(&self) -> u32 {
        self.last_receive_time
    }
}

/// Window size derived from one side's bandwidth alone.
fn local_window_size(bandwidth: u32) -> u32 {
    if bandwidth == 0 {
        MAXIMUM_WINDOW_SIZE
    } else {
        clamp_window_size(bandwidth / WINDOW_SIZE_SCALE * MINIMUM_WINDOW_SIZE)
    }
}

/// Picks the session id following `requested`, skipping `current`.
fn next_session_id(requested: u8, current: u8) -> u8 {
    let mut session_id = requested.wrapping_add(1) & SESSION_ID_MASK;
    if session_id == current {
        session_id = session_id.wrapping_add(1) & SESSION_ID_MASK;
    }
    session_id
}

fn unspecified_address() -> SocketAddr {
    SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
}
