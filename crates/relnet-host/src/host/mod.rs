use std::{fmt, net::SocketAddr, sync::Arc, time::Instant};

use rand::{rngs::StdRng, Rng, SeedableRng};
use relnet_core::{
    config::{CompressionAlgorithm, Config},
    constants::{MAXIMUM_CHANNEL_COUNT, MAXIMUM_MTU, MAXIMUM_PEER_ID, MINIMUM_CHANNEL_COUNT},
    error::{ErrorKind, Result},
    interceptor::Interceptor,
    packet::Packet,
    transport::Socket as TransportSocket,
};
use relnet_peer::{HostContext, Peer, PeerId, PeerState, Teardown};
use tracing::{debug, error};

use crate::{
    simulator::NetworkSimulator,
    socket::UdpTransport,
    time::{Clock, SystemClock},
};

mod bandwidth;
mod dispatch;
mod handshake;
mod service;

/// Traffic counters of a host, across all peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStatistics {
    /// Datagram bytes handed to the socket (or to the simulator)
    pub total_sent_data: u64,
    /// Datagrams handed to the socket (or to the simulator)
    pub total_sent_packets: u64,
    /// Datagram bytes read from the socket
    pub total_received_data: u64,
    /// Datagrams read from the socket
    pub total_received_packets: u64,
}

/// A local endpoint: one UDP socket and a fixed table of peer slots.
///
/// The host is driven by [`Host::service`], which sends queued traffic,
/// reads the socket, runs timeouts and the bandwidth throttle, and returns
/// at most one [`Event`](crate::Event) per call.
pub struct Host<S: TransportSocket = UdpTransport> {
    socket: S,
    peers: Vec<Peer>,
    ctx: HostContext,
    clock: Arc<dyn Clock>,
    start: Instant,
    rng: StdRng,
    bandwidth_throttle_epoch: u32,
    receive_buffer: Vec<u8>,
    simulator: Option<NetworkSimulator>,
    interceptor: Option<Box<dyn Interceptor>>,
    statistics: HostStatistics,
}

impl<S: TransportSocket> fmt::Debug for Host<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("local_addr", &self.socket.local_addr().ok())
            .field("peers", &self.peers.len())
            .field("connected_peers", &self.ctx.connected_peers)
            .field("service_time", &self.ctx.service_time)
            .field("simulator", &self.simulator)
            .finish()
    }
}

impl Host<UdpTransport> {
    /// Creates a host with `peer_count` slots.
    ///
    /// `address` is the address to listen on; `None` binds an ephemeral port
    /// for a host that only connects out. A `channel_limit` of 0 allows the
    /// protocol maximum. Bandwidths are in bytes per second, 0 meaning
    /// unlimited.
    pub fn create(
        address: Option<SocketAddr>,
        peer_count: usize,
        channel_limit: usize,
        incoming_bandwidth: u32,
        outgoing_bandwidth: u32,
    ) -> Result<Self> {
        let config = Config { peer_count, channel_limit, incoming_bandwidth, outgoing_bandwidth, ..Config::default() };
        Self::with_config(address, config)
    }

    /// Creates a host from a full configuration.
    pub fn with_config(address: Option<SocketAddr>, config: Config) -> Result<Self> {
        Self::with_config_and_clock(address, config, Arc::new(SystemClock))
    }

    /// Creates a host with a custom clock, for deterministic tests.
    pub fn with_config_and_clock(address: Option<SocketAddr>, config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        check_peer_count(config.peer_count)?;
        let socket = UdpTransport::bind(address, &config)?;
        Self::with_socket(socket, config, clock)
    }
}

impl<S: TransportSocket> Host<S> {
    /// Creates a host over any transport.
    pub fn with_socket(socket: S, mut config: Config, clock: Arc<dyn Clock>) -> Result<Self> {
        check_peer_count(config.peer_count)?;
        if config.channel_limit == 0 || config.channel_limit > MAXIMUM_CHANNEL_COUNT {
            config.channel_limit = MAXIMUM_CHANNEL_COUNT;
        }

        let rng = match config.random_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let ctx = HostContext::new(config);
        let peers = (0..ctx.config.peer_count).map(|index| Peer::new(index, &ctx)).collect();
        let start = clock.now();
        debug!(
            local_addr = ?socket.local_addr().ok(),
            peers = ctx.config.peer_count,
            channel_limit = ctx.channel_limit,
            "host created"
        );

        Ok(Host {
            socket,
            peers,
            ctx,
            clock,
            start,
            rng,
            bandwidth_throttle_epoch: 0,
            receive_buffer: vec![0; MAXIMUM_MTU as usize],
            simulator: None,
            interceptor: None,
            statistics: HostStatistics::default(),
        })
    }

    /// Starts connecting to `address` with `channel_count` channels.
    ///
    /// `data` is delivered with the remote side's connect event. Returns the
    /// slot assigned to the connection, or `None` if every slot is in use.
    /// The connection is complete once an
    /// [`OutgoingConnect`](crate::EventKind::OutgoingConnect) event for the
    /// slot comes out of [`Host::service`].
    pub fn connect(&mut self, address: SocketAddr, channel_count: usize, data: u32) -> Option<PeerId> {
        let channel_count = channel_count.clamp(MINIMUM_CHANNEL_COUNT, MAXIMUM_CHANNEL_COUNT);
        let Some(peer) = self.peers.iter_mut().find(|peer| peer.state() == PeerState::Disconnected) else {
            error!(%address, "no free peer slot for outgoing connection");
            return None;
        };

        let connect_id = self.rng.random::<u32>();
        peer.init_outgoing(&mut self.ctx, address, channel_count, connect_id, data);
        Some(peer.id())
    }

    /// Queues `packet` on `channel_id` of every connected peer.
    ///
    /// All peers share the same packet. Returns the number of peers it was
    /// queued for.
    pub fn broadcast(&mut self, channel_id: u8, packet: Packet) -> usize {
        let mut count = 0;
        for peer in self.peers.iter_mut().filter(|peer| peer.state() == PeerState::Connected) {
            if peer.send(&self.ctx, channel_id, packet.clone()).is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Queues `packet` for `peer` on `channel_id`.
    pub fn send(&mut self, peer: PeerId, channel_id: u8, packet: Packet) -> Result<()> {
        let ctx = &self.ctx;
        let peer = self.peers.get_mut(peer.index()).ok_or(ErrorKind::UnknownPeer(peer.index()))?;
        peer.send(ctx, channel_id, packet)
    }

    /// Starts a graceful disconnect; a
    /// [`Disconnect`](crate::EventKind::Disconnect) event follows once the
    /// remote side acknowledged it.
    pub fn disconnect(&mut self, peer: PeerId, data: u32) -> Result<()> {
        let index = self.check_peer(peer)?;
        let teardown = self.peers[index].disconnect(&mut self.ctx, data);
        self.finish_teardown(peer, teardown)
    }

    /// Disconnects once all queued outgoing traffic has been acknowledged.
    pub fn disconnect_later(&mut self, peer: PeerId, data: u32) -> Result<()> {
        let index = self.check_peer(peer)?;
        let teardown = self.peers[index].disconnect_later(&mut self.ctx, data);
        self.finish_teardown(peer, teardown)
    }

    /// Sends a best-effort Disconnect and frees the slot right away. No
    /// event is produced.
    pub fn disconnect_now(&mut self, peer: PeerId, data: u32) -> Result<()> {
        let index = self.check_peer(peer)?;
        let teardown = self.peers[index].disconnect_now(&mut self.ctx, data);
        self.finish_teardown(peer, teardown)
    }

    /// Frees the slot without telling the remote side.
    pub fn reset_peer(&mut self, peer: PeerId) -> Result<()> {
        let index = self.check_peer(peer)?;
        self.peers[index].reset(&mut self.ctx);
        Ok(())
    }

    /// Queues a Ping for `peer`.
    pub fn ping(&mut self, peer: PeerId) -> Result<()> {
        self.peer_slot_mut(peer)?.ping();
        Ok(())
    }

    /// Sets the keep-alive interval of `peer`; 0 restores the default.
    pub fn set_ping_interval(&mut self, peer: PeerId, ping_interval: u32) -> Result<()> {
        self.peer_slot_mut(peer)?.set_ping_interval(ping_interval);
        Ok(())
    }

    /// Sets the timeout parameters of `peer`; a 0 restores that default.
    pub fn set_timeout(&mut self, peer: PeerId, limit: u32, minimum: u32, maximum: u32) -> Result<()> {
        self.peer_slot_mut(peer)?.set_timeout(limit, minimum, maximum);
        Ok(())
    }

    /// Changes the packet throttle parameters of `peer` and tells the remote
    /// side.
    pub fn throttle_configure(&mut self, peer: PeerId, interval: u32, acceleration: u32, deceleration: u32) -> Result<()> {
        self.peer_slot_mut(peer)?.throttle_configure(interval, acceleration, deceleration);
        Ok(())
    }

    /// Installs simulated packet loss and latency on this host's traffic, in
    /// both directions. A loss of 0 with a maximum delay of 0 removes the
    /// simulator.
    pub fn simulate_network(&mut self, loss_probability: f64, min_delay: u32, max_delay: u32) {
        if loss_probability <= 0.0 && max_delay == 0 {
            self.simulator = None;
        } else {
            debug!(loss_probability, min_delay, max_delay, "network simulation enabled");
            self.simulator = Some(NetworkSimulator::new(loss_probability, min_delay, max_delay));
        }
    }

    /// Selects the compression applied to outgoing datagrams. The remote
    /// host must use the same algorithm.
    pub fn set_compressor(&mut self, compression: CompressionAlgorithm) {
        self.ctx.config.compression = compression;
    }

    /// Installs or removes the raw datagram hook.
    pub fn set_interceptor(&mut self, interceptor: Option<Box<dyn Interceptor>>) {
        self.interceptor = interceptor;
    }

    /// Changes the channel limit for future incoming connections; 0 allows
    /// the protocol maximum.
    pub fn set_channel_limit(&mut self, channel_limit: usize) {
        self.ctx.channel_limit = if channel_limit == 0 || channel_limit > MAXIMUM_CHANNEL_COUNT {
            MAXIMUM_CHANNEL_COUNT
        } else {
            channel_limit
        };
    }

    /// Changes the host's bandwidth and redistributes it at the next
    /// throttle pass.
    pub fn set_bandwidth_limit(&mut self, incoming_bandwidth: u32, outgoing_bandwidth: u32) {
        self.ctx.incoming_bandwidth = incoming_bandwidth;
        self.ctx.outgoing_bandwidth = outgoing_bandwidth;
        self.ctx.recalculate_bandwidth_limits = true;
    }

    /// The peer in slot `peer`.
    pub fn peer(&self, peer: PeerId) -> Option<&Peer> {
        self.peers.get(peer.index())
    }

    /// All peer slots, free ones included.
    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.peers.iter()
    }

    /// Number of peer slots.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Number of peers in `Connected` or `DisconnectLater`.
    pub fn connected_peers(&self) -> usize {
        self.ctx.connected_peers
    }

    /// Address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    /// Service time of the last service or flush, in milliseconds.
    pub fn service_time(&self) -> u32 {
        self.ctx.service_time
    }

    /// Traffic counters.
    pub fn statistics(&self) -> &HostStatistics {
        &self.statistics
    }

    /// Active network simulator, if any.
    pub fn simulator(&self) -> Option<&NetworkSimulator> {
        self.simulator.as_ref()
    }

    /// Milliseconds since the host was created, never 0.
    fn current_time(&self) -> u32 {
        let elapsed = self.clock.now().saturating_duration_since(self.start).as_millis() as u32;
        elapsed.wrapping_add(1).max(1)
    }

    fn check_peer(&self, peer: PeerId) -> Result<usize> {
        if peer.index() < self.peers.len() {
            Ok(peer.index())
        } else {
            Err(ErrorKind::UnknownPeer(peer.index()))
        }
    }

    fn peer_slot_mut(&mut self, peer: PeerId) -> Result<&mut Peer> {
        self.peers.get_mut(peer.index()).ok_or(ErrorKind::UnknownPeer(peer.index()))
    }

    /// Flushes and frees a slot whose disconnect could not wait for an
    /// acknowledgement.
    fn finish_teardown(&mut self, peer: PeerId, teardown: Teardown) -> Result<()> {
        if teardown == Teardown::Immediate {
            self.flush()?;
            self.peers[peer.index()].reset(&mut self.ctx);
        }
        Ok(())
    }
}

fn check_peer_count(peer_count: usize) -> Result<()> {
    if peer_count > usize::from(MAXIMUM_PEER_ID) {
        return Err(ErrorKind::TooManyPeers { requested: peer_count, maximum: usize::from(MAXIMUM_PEER_ID) });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;

    fn loopback() -> Option<SocketAddr> {
        Some("127.0.0.1:0".parse().unwrap())
    }

    fn get_fake_addr() -> SocketAddr {
        "127.0.0.1:9".parse().unwrap()
    }

    #[test]
    fn test_too_many_peers() {
        let result = Host::create(loopback(), 5000, 1, 0, 0);
        assert!(matches!(result, Err(ErrorKind::TooManyPeers { requested: 5000, maximum: 4095 })));
    }

    #[test]
    fn test_channel_limit_defaults_to_maximum() {
        let host = Host::create(loopback(), 1, 0, 0, 0).unwrap();
        assert_eq!(host.ctx.channel_limit, MAXIMUM_CHANNEL_COUNT);
        assert_eq!(host.peer_count(), 1);
    }

    #[test]
    fn test_connect_without_free_slot() {
        let mut host = Host::create(None, 2, 2, 0, 0).unwrap();
        assert_eq!(host.connect(get_fake_addr(), 2, 0), Some(PeerId(0)));
        assert_eq!(host.connect(get_fake_addr(), 2, 0), Some(PeerId(1)));

        let before: Vec<(PeerState, u32)> = host.peers().map(|peer| (peer.state(), peer.connect_id())).collect();
        assert_eq!(host.connect(get_fake_addr(), 2, 0), None);
        let after: Vec<(PeerState, u32)> = host.peers().map(|peer| (peer.state(), peer.connect_id())).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn test_connect_clamps_channel_count() {
        let mut host = Host::create(None, 1, 0, 0, 0).unwrap();
        let peer = host.connect(get_fake_addr(), 1000, 0).unwrap();
        assert_eq!(host.peer(peer).unwrap().channel_count(), MAXIMUM_CHANNEL_COUNT);
    }

    #[test]
    fn test_seeded_connect_ids_repeat() {
        let config = Config { random_seed: Some(7), ..Config::default() };
        let mut first = Host::with_config(loopback(), config.clone()).unwrap();
        let mut second = Host::with_config(loopback(), config).unwrap();
        let a = first.connect(get_fake_addr(), 1, 0).unwrap();
        let b = second.connect(get_fake_addr(), 1, 0).unwrap();
        assert_eq!(first.peer(a).unwrap().connect_id(), second.peer(b).unwrap().connect_id());
    }

    #[test]
    fn test_unknown_peer() {
        let mut host = Host::create(None, 1, 1, 0, 0).unwrap();
        assert!(matches!(host.disconnect(PeerId(3), 0), Err(ErrorKind::UnknownPeer(3))));
        assert!(matches!(
            host.send(PeerId(0), 0, Packet::copy_from(b"x", relnet_core::packet::PacketFlags::RELIABLE)),
            Err(ErrorKind::PeerNotConnected)
        ));
    }

    #[test]
    fn test_disconnect_while_connecting_frees_slot() {
        let mut host = Host::create(None, 1, 1, 0, 0).unwrap();
        let peer = host.connect(get_fake_addr(), 1, 0).unwrap();
        host.disconnect(peer, 0).unwrap();
        assert_eq!(host.peer(peer).unwrap().state(), PeerState::Disconnected);
        // The unsequenced Disconnect went out with the Connect
        assert!(host.statistics().total_sent_packets >= 1);
    }

    #[test]
    fn test_broadcast_to_no_connections() {
        let mut host = Host::create(None, 4, 1, 0, 0).unwrap();
        host.connect(get_fake_addr(), 1, 0).unwrap();
        let packet = Packet::copy_from(&[1, 2, 3], relnet_core::packet::PacketFlags::RELIABLE);
        assert_eq!(host.broadcast(0, packet.clone()), 0);
        assert_eq!(packet.reference_count(), 1);
    }

    #[test]
    fn test_simulator_toggle() {
        let mut host = Host::create(None, 1, 1, 0, 0).unwrap();
        host.simulate_network(0.5, 10, 20);
        assert_eq!(host.simulator().unwrap().delay(), (10, 20));
        host.simulate_network(0.0, 0, 0);
        assert!(host.simulator().is_none());
    }

    #[test]
    fn test_service_time_follows_clock() {
        let clock = Arc::new(ManualClock::new());
        let mut host = Host::with_config_and_clock(None, Config::default(), clock.clone()).unwrap();
        assert_eq!(host.current_time(), 1);
        clock.advance_ms(1500);
        host.flush().unwrap();
        assert_eq!(host.service_time(), 1501);
    }
}
