//! Client that sends messages to the echo server and prints replies.
//!
//! Run the server first:
//! - cargo run -p relnet --example server -- 127.0.0.1:7777
//!
//! Then run the client:
//! - cargo run -p relnet --example client -- 127.0.0.1:7777
//! - cargo run -p relnet --example client -- 127.0.0.1:7777 10 200
//!   (sends 10 messages, 200ms apart)

use std::{
    env,
    net::SocketAddr,
    time::{Duration, Instant},
};

use relnet::{loss_ratio, EventKind, Host, Packet, PacketFlags};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    // Args: <server_addr> [count] [interval_ms]
    let mut args = env::args().skip(1);
    let server_addr: SocketAddr = args.next().unwrap_or_else(|| "127.0.0.1:9000".to_string()).parse()?;
    let count: usize = args.next().and_then(|s| s.parse().ok()).unwrap_or(5);
    let interval_ms: u64 = args.next().and_then(|s| s.parse().ok()).unwrap_or(300);

    let mut host = Host::create(None, 1, 2, 0, 0)?;
    let peer = host.connect(server_addr, 2, 0).ok_or("no free peer slot")?;
    info!(local = %host.local_addr()?, %server_addr, count, interval_ms, "connecting");

    // Wait for the handshake
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if Instant::now() >= deadline {
            return Err("connection timed out".into());
        }
        match host.service(100)? {
            Some(event) if event.kind == EventKind::OutgoingConnect => break,
            Some(event) if event.kind == EventKind::Disconnect => return Err("connection refused".into()),
            _ => {}
        }
    }
    info!(%peer, "connected");

    for i in 0..count {
        let message = format!("hello {}", i);
        // Alternate channels; channel 1 is unsequenced
        let (channel, flags) = if i % 2 == 0 { (0, PacketFlags::RELIABLE) } else { (1, PacketFlags::UNSEQUENCED) };
        host.send(peer, channel, Packet::new(message.into_bytes(), flags))?;

        let start = Instant::now();
        let wait = Duration::from_millis(interval_ms);
        while start.elapsed() < wait {
            let remaining = wait.saturating_sub(start.elapsed()).as_millis() as u32;
            if let Some(event) = host.service(remaining)? {
                if let (EventKind::Receive, Some(packet)) = (event.kind, event.packet) {
                    info!(channel = event.channel_id, reply = %String::from_utf8_lossy(packet.data()), "echo");
                }
            }
        }
    }

    if let Some(peer_state) = host.peer(peer) {
        info!(
            rtt = peer_state.round_trip_time(),
            packet_loss = loss_ratio(peer_state.packet_loss()),
            retransmit_ratio = peer_state.statistics().packet_loss_rate(),
            sent = host.statistics().total_sent_packets,
            "disconnecting"
        );
    }
    host.disconnect(peer, 0)?;
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if let Some(event) = host.service(100)? {
            if event.kind == EventKind::Disconnect {
                info!("disconnected");
                break;
            }
        }
    }
    Ok(())
}
