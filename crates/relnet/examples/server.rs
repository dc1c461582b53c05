//! Echo server.
//!
//! Run:
//! - cargo run -p relnet --example server
//! - cargo run -p relnet --example server -- 127.0.0.1:7777
//!
//! Set `RUST_LOG=relnet_host=debug,relnet_peer=debug` to watch the protocol.

use std::{env, net::SocketAddr};

use relnet::{Config, EventKind, Host, Packet};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn parse_bind_addr() -> Option<SocketAddr> {
    env::args().nth(1).and_then(|s| s.parse().ok())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    // Basic config; tweak here to try features
    let config = Config { peer_count: 64, channel_limit: 4, ..Config::default() };
    // config.compression = CompressionAlgorithm::Lz4;
    // config.use_checksums = true;

    let bind_addr = parse_bind_addr().unwrap_or_else(|| "127.0.0.1:9000".parse().unwrap());
    let mut host = Host::with_config(Some(bind_addr), config)?;
    info!(local = %host.local_addr()?, "echo server listening");

    loop {
        let Some(event) = host.service(1000)? else {
            continue;
        };

        match event.kind {
            EventKind::IncomingConnect => {
                let address = host.peer(event.peer).map(|peer| peer.address());
                info!(peer = %event.peer, ?address, data = event.data, "connect");
            }
            EventKind::Receive => {
                let Some(packet) = event.packet else { continue };
                info!(
                    peer = %event.peer,
                    channel = event.channel_id,
                    payload = %String::from_utf8_lossy(packet.data()),
                    "packet"
                );

                // Echo back with the same flags and channel
                let echo = Packet::copy_from(packet.data(), packet.flags());
                if let Err(err) = host.send(event.peer, event.channel_id, echo) {
                    warn!(%err, "failed to queue echo");
                }
            }
            EventKind::Disconnect => {
                info!(peer = %event.peer, data = event.data, "disconnect");
            }
            EventKind::OutgoingConnect | EventKind::None => {}
        }
    }
}
