//! Hosts talking to each other over real loopback sockets, with a shared
//! manual clock driving retransmissions and throttle passes.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use relnet_core::{
    config::{CompressionAlgorithm, Config},
    constants::PACKET_THROTTLE_SCALE,
    error::ErrorKind,
    interceptor::{Interceptor, Verdict},
    packet::{Packet, PacketFlags},
};
use relnet_host::{Event, EventKind, Host, ManualClock};
use relnet_peer::{PeerId, PeerState};

fn init_logging() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn loopback() -> Option<SocketAddr> {
    Some("127.0.0.1:0".parse().unwrap())
}

struct Harness {
    clock: Arc<ManualClock>,
    client: Host,
    server: Host,
    client_events: Vec<Event>,
    server_events: Vec<Event>,
}

impl Harness {
    fn new(client_config: Config, server_config: Config) -> Self {
        init_logging();
        let clock = Arc::new(ManualClock::new());
        let server = Host::with_config_and_clock(loopback(), server_config, clock.clone()).unwrap();
        let client = Host::with_config_and_clock(loopback(), client_config, clock.clone()).unwrap();
        Harness { clock, client, server, client_events: Vec::new(), server_events: Vec::new() }
    }

    fn server_addr(&self) -> SocketAddr {
        self.server.local_addr().unwrap()
    }

    /// Advances the clock by `ms` and services both hosts until idle.
    fn step(&mut self, ms: u64) {
        self.clock.advance_ms(ms);
        drain(&mut self.client, &mut self.client_events);
        drain(&mut self.server, &mut self.server_events);
        drain(&mut self.client, &mut self.client_events);
    }

    fn run(&mut self, rounds: usize, ms: u64) {
        for _ in 0..rounds {
            self.step(ms);
        }
    }

    fn received(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut packets = Vec::new();
        self.server_events.retain(|event| {
            if event.kind != EventKind::Receive {
                return true;
            }
            let packet = event.packet.as_ref().unwrap();
            packets.push((event.channel_id, packet.data().to_vec()));
            false
        });
        packets
    }
}

fn drain(host: &mut Host, events: &mut Vec<Event>) {
    // A 1 ms wait picks up datagrams still in flight on the loopback
    while let Some(event) = host.service(1).unwrap() {
        events.push(event);
    }
}

fn kinds(events: &[Event]) -> Vec<EventKind> {
    events.iter().map(|event| event.kind).collect()
}

/// Connects a client to a server and clears the connect events.
fn create_virtual_connection(client_config: Config, server_config: Config) -> (Harness, PeerId, PeerId) {
    let mut harness = Harness::new(client_config, server_config);
    let client_peer = harness.client.connect(harness.server_addr(), 2, 42).unwrap();
    harness.run(5, 10);

    assert_eq!(kinds(&harness.client_events), vec![EventKind::OutgoingConnect]);
    assert_eq!(kinds(&harness.server_events), vec![EventKind::IncomingConnect]);
    let server_peer = harness.server_events[0].peer;
    harness.client_events.clear();
    harness.server_events.clear();
    (harness, client_peer, server_peer)
}

fn seeded(seed: u64) -> Config {
    Config { random_seed: Some(seed), ..Config::default() }
}

#[test]
fn test_connect_events_carry_data() {
    let mut harness = Harness::new(Config::default(), Config::default());
    let peer = harness.client.connect(harness.server_addr(), 2, 42).unwrap();
    harness.run(5, 10);

    assert_eq!(kinds(&harness.client_events), vec![EventKind::OutgoingConnect]);
    assert_eq!(harness.client_events[0].peer, peer);
    assert_eq!(kinds(&harness.server_events), vec![EventKind::IncomingConnect]);
    assert_eq!(harness.server_events[0].data, 42);

    assert_eq!(harness.client.connected_peers(), 1);
    assert_eq!(harness.server.connected_peers(), 1);
    let server_peer = harness.server.peer(harness.server_events[0].peer).unwrap();
    assert_eq!(server_peer.channel_count(), 2);
    assert_eq!(server_peer.address(), harness.client.local_addr().unwrap());
}

#[test]
fn test_fragmented_payload_is_delivered_whole() {
    let client_config = Config { mtu: 1200, ..Config::default() };
    let (mut harness, client_peer, _) = create_virtual_connection(client_config, Config::default());
    assert_eq!(harness.client.peer(client_peer).unwrap().mtu(), 1200);

    let payload: Vec<u8> = (0..2000u32).map(|i| (i % 251) as u8).collect();
    let sent_before = harness.client.statistics().total_sent_packets;
    harness.client.send(client_peer, 0, Packet::new(payload.clone(), PacketFlags::RELIABLE)).unwrap();
    harness.run(5, 10);

    assert!(harness.client.statistics().total_sent_packets >= sent_before + 2);
    assert_eq!(harness.received(), vec![(0, payload)]);
}

#[test]
fn test_reliable_order_survives_reordering() {
    let (mut harness, client_peer, _) = create_virtual_connection(seeded(1), seeded(2));
    harness.server.simulate_network(0.0, 5, 60);

    for i in 0..100u8 {
        harness.client.send(client_peer, 1, Packet::copy_from(&[i; 8], PacketFlags::RELIABLE)).unwrap();
        harness.step(1);
    }
    harness.run(100, 10);

    let received = harness.received();
    let order: Vec<u8> = received.iter().map(|(_, data)| data[0]).collect();
    assert_eq!(order, (0..100).collect::<Vec<u8>>());
    assert!(received.iter().all(|(channel_id, _)| *channel_id == 1));
}

#[test]
fn test_reliable_delivery_under_loss() {
    let (mut harness, client_peer, server_peer) = create_virtual_connection(seeded(3), seeded(4));
    harness.client.simulate_network(0.1, 0, 0);

    for i in 0..30u8 {
        harness.client.send(client_peer, 0, Packet::copy_from(&[i; 64], PacketFlags::RELIABLE)).unwrap();
    }
    harness.run(500, 10);

    let order: Vec<u8> = harness.received().iter().map(|(_, data)| data[0]).collect();
    assert_eq!(order, (0..30).collect::<Vec<u8>>());
    assert_eq!(harness.client.peer(client_peer).unwrap().state(), PeerState::Connected);
    assert_eq!(harness.server.peer(server_peer).unwrap().state(), PeerState::Connected);
}

#[test]
fn test_total_loss_ends_in_disconnect() {
    let mut harness = Harness::new(seeded(5), seeded(6));
    harness.client.simulate_network(1.0, 0, 0);
    let peer = harness.client.connect(harness.server_addr(), 1, 0).unwrap();
    harness.run(800, 50);

    assert_eq!(kinds(&harness.client_events), vec![EventKind::Disconnect]);
    assert_eq!(harness.client_events[0].peer, peer);
    assert!(harness.server_events.is_empty());
    assert_eq!(harness.client.peer(peer).unwrap().state(), PeerState::Disconnected);
    assert!(harness.client.statistics().total_sent_packets > 0);
}

#[test]
fn test_full_server_ignores_connect() {
    let server_config = Config { peer_count: 1, ..Config::default() };
    let mut harness = Harness::new(Config::default(), server_config);
    let first = harness.client.connect(harness.server_addr(), 1, 0).unwrap();
    let second = harness.client.connect(harness.server_addr(), 1, 0).unwrap();
    harness.run(20, 10);

    assert_eq!(kinds(&harness.server_events), vec![EventKind::IncomingConnect]);
    assert_eq!(kinds(&harness.client_events), vec![EventKind::OutgoingConnect]);
    assert_eq!(harness.client_events[0].peer, first);
    assert_eq!(harness.client.peer(second).unwrap().state(), PeerState::Connecting);
}

#[test]
fn test_duplicate_peers_limit() {
    let server_config = Config { duplicate_peers: 1, ..Config::default() };
    let mut harness = Harness::new(Config::default(), server_config);
    harness.client.connect(harness.server_addr(), 1, 0).unwrap();
    harness.client.connect(harness.server_addr(), 1, 0).unwrap();
    harness.run(20, 10);

    assert_eq!(kinds(&harness.server_events), vec![EventKind::IncomingConnect]);
    assert_eq!(harness.server.connected_peers(), 1);
}

/// Consumes the first `remaining` outgoing datagrams.
struct DropOutgoing {
    remaining: usize,
}

impl Interceptor for DropOutgoing {
    fn on_receive(&mut self, _addr: &SocketAddr, _datagram: &mut [u8]) -> Verdict {
        Verdict::Pass
    }

    fn on_send(&mut self, _addr: &SocketAddr, _datagram: &mut Vec<u8>) -> Verdict {
        if self.remaining > 0 {
            self.remaining -= 1;
            Verdict::Consume
        } else {
            Verdict::Pass
        }
    }
}

#[test]
fn test_retransmitted_connect_collapses_to_one_peer() {
    let mut harness = Harness::new(Config::default(), Config::default());
    // Losing the VerifyConnect makes the client retransmit its Connect
    harness.server.set_interceptor(Some(Box::new(DropOutgoing { remaining: 1 })));
    harness.client.connect(harness.server_addr(), 1, 0).unwrap();
    harness.run(300, 10);

    assert_eq!(kinds(&harness.server_events), vec![EventKind::IncomingConnect]);
    assert_eq!(kinds(&harness.client_events), vec![EventKind::OutgoingConnect]);
    let used = harness.server.peers().filter(|peer| peer.state() != PeerState::Disconnected).count();
    assert_eq!(used, 1);
}

struct CountAndBlock {
    seen: Arc<AtomicUsize>,
}

impl Interceptor for CountAndBlock {
    fn on_receive(&mut self, _addr: &SocketAddr, _datagram: &mut [u8]) -> Verdict {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Verdict::Consume
    }
}

#[test]
fn test_interceptor_consumes_incoming() {
    let mut harness = Harness::new(Config::default(), Config::default());
    let seen = Arc::new(AtomicUsize::new(0));
    harness.server.set_interceptor(Some(Box::new(CountAndBlock { seen: seen.clone() })));
    harness.client.connect(harness.server_addr(), 1, 0).unwrap();
    harness.run(20, 10);

    assert!(seen.load(Ordering::SeqCst) > 0);
    assert!(harness.server.statistics().total_received_packets > 0);
    assert!(harness.server_events.is_empty());
    assert!(harness.client_events.is_empty());
    assert_eq!(harness.server.connected_peers(), 0);
}

#[test]
fn test_graceful_disconnect() {
    let (mut harness, client_peer, server_peer) = create_virtual_connection(Config::default(), Config::default());
    harness.client.disconnect(client_peer, 7).unwrap();
    harness.run(5, 10);

    assert_eq!(kinds(&harness.client_events), vec![EventKind::Disconnect]);
    assert_eq!(kinds(&harness.server_events), vec![EventKind::Disconnect]);
    assert_eq!(harness.server_events[0].data, 7);
    assert_eq!(harness.server_events[0].peer, server_peer);
    assert_eq!(harness.client.connected_peers(), 0);
    assert_eq!(harness.server.connected_peers(), 0);
}

#[test]
fn test_disconnect_now_produces_no_local_event() {
    let (mut harness, client_peer, _) = create_virtual_connection(Config::default(), Config::default());
    harness.client.disconnect_now(client_peer, 3).unwrap();
    assert_eq!(harness.client.peer(client_peer).unwrap().state(), PeerState::Disconnected);
    harness.run(5, 10);

    assert!(harness.client_events.is_empty());
    assert_eq!(kinds(&harness.server_events), vec![EventKind::Disconnect]);
    assert_eq!(harness.server_events[0].data, 3);
}

#[test]
fn test_broadcast_shares_one_packet() {
    let mut harness = Harness::new(Config::default(), Config::default());
    let mut second_client = Host::with_config_and_clock(loopback(), Config::default(), harness.clock.clone()).unwrap();
    let mut second_events = Vec::new();
    harness.client.connect(harness.server_addr(), 1, 0).unwrap();
    second_client.connect(harness.server_addr(), 1, 0).unwrap();
    for _ in 0..5 {
        harness.step(10);
        drain(&mut second_client, &mut second_events);
        drain(&mut harness.server, &mut harness.server_events);
    }
    assert_eq!(harness.server.connected_peers(), 2);

    let packet = Packet::copy_from(b"hello", PacketFlags::RELIABLE);
    assert_eq!(harness.server.broadcast(0, packet), 2);
    for _ in 0..5 {
        harness.step(10);
        drain(&mut second_client, &mut second_events);
    }

    let received = |events: &[Event]| events.iter().filter(|event| event.kind == EventKind::Receive).count();
    assert_eq!(received(&harness.client_events), 1);
    assert_eq!(received(&second_events), 1);
}

#[test]
fn test_throttle_pass_limits_outgoing_bandwidth() {
    let server_config = Config { outgoing_bandwidth: 2000, ..Config::default() };
    let (mut harness, _, server_peer) = create_virtual_connection(Config::default(), server_config);

    for _ in 0..20 {
        harness.server.send(server_peer, 0, Packet::new(vec![0; 1000], PacketFlags::RELIABLE)).unwrap();
    }
    harness.run(120, 10);

    let limit = harness.server.peer(server_peer).unwrap().congestion().packet_throttle_limit();
    assert!(limit < PACKET_THROTTLE_SCALE, "throttle limit {}", limit);
}

#[test]
fn test_incoming_bandwidth_is_announced() {
    let client_config = Config { outgoing_bandwidth: 5000, ..Config::default() };
    let server_config = Config { incoming_bandwidth: 10000, ..Config::default() };
    let (mut harness, client_peer, _) = create_virtual_connection(client_config, server_config);
    assert_eq!(harness.client.peer(client_peer).unwrap().bandwidth().incoming_bandwidth, 10000);

    harness.run(120, 10);

    // The client sends less than the server's even share, so it is granted what it uses
    assert_eq!(harness.client.peer(client_peer).unwrap().bandwidth().incoming_bandwidth, 5000);
}

#[test]
fn test_channel_limit_caps_incoming_connections() {
    let mut harness = Harness::new(Config::default(), Config::default());
    harness.server.set_channel_limit(1);
    let client_peer = harness.client.connect(harness.server_addr(), 2, 0).unwrap();
    harness.run(5, 10);

    let server_peer = harness.server_events[0].peer;
    assert_eq!(harness.server.peer(server_peer).unwrap().channel_count(), 1);
    assert_eq!(harness.client.peer(client_peer).unwrap().channel_count(), 1);
    assert!(harness.client.send(client_peer, 1, Packet::copy_from(b"x", PacketFlags::RELIABLE)).is_err());
}

#[test]
fn test_compressor_shrinks_datagrams() {
    let (mut harness, client_peer, _) = create_virtual_connection(Config::default(), Config::default());
    harness.client.set_compressor(CompressionAlgorithm::Lz4);
    harness.server.set_compressor(CompressionAlgorithm::Lz4);

    let payload = vec![7u8; 800];
    let sent_before = harness.client.statistics().total_sent_data;
    harness.client.send(client_peer, 0, Packet::new(payload.clone(), PacketFlags::RELIABLE)).unwrap();
    harness.run(5, 10);

    assert_eq!(harness.received(), vec![(0, payload)]);
    let sent = harness.client.statistics().total_sent_data - sent_before;
    assert!(sent < 400, "sent {} bytes", sent);
}

#[test]
fn test_bandwidth_limit_change_is_announced() {
    let client_config = Config { outgoing_bandwidth: 6000, ..Config::default() };
    let (mut harness, client_peer, _) = create_virtual_connection(client_config, Config::default());
    assert_eq!(harness.client.peer(client_peer).unwrap().bandwidth().incoming_bandwidth, 0);

    harness.server.set_bandwidth_limit(3000, 0);
    harness.run(120, 10);

    assert_eq!(harness.client.peer(client_peer).unwrap().bandwidth().incoming_bandwidth, 3000);
}

#[test]
fn test_reset_peer_is_silent() {
    let (mut harness, _, server_peer) = create_virtual_connection(Config::default(), Config::default());
    harness.server.reset_peer(server_peer).unwrap();

    assert_eq!(harness.server.peer(server_peer).unwrap().state(), PeerState::Disconnected);
    assert_eq!(harness.server.connected_peers(), 0);
    assert!(harness.server.check_events().is_none());
    assert!(matches!(
        harness.server.send(server_peer, 0, Packet::copy_from(b"x", PacketFlags::RELIABLE)),
        Err(ErrorKind::PeerNotConnected)
    ));
}
