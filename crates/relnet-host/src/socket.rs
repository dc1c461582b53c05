use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket as StdUdpSocket},
    time::Duration,
};

use mio::{net::UdpSocket, Events, Interest, Poll, Token};
use relnet_core::{config::Config, transport::Socket as TransportSocket};
use socket2::Socket as Socket2;

const SOCKET: Token = Token(0);

/// Applies socket options from configuration to a UdpSocket.
fn apply_socket_options(socket: &StdUdpSocket, config: &Config) -> io::Result<()> {
    // socket2 reaches the buffer size options std does not expose
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = config.socket_recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = config.socket_send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }
    if config.socket_broadcast {
        socket.set_broadcast(true)?;
    }
    Ok(())
}

/// [`TransportSocket`] over a UDP socket registered with a readiness poller.
///
/// The socket itself never blocks. Blocking mode parks `receive_packet` on
/// the poller until a datagram arrives.
#[derive(Debug)]
pub struct UdpTransport {
    is_blocking_mode: bool,
    socket: UdpSocket,
    poll: Poll,
    events: Events,
    // Readiness is edge-triggered; set until a receive drains the socket
    readable: bool,
}

impl UdpTransport {
    /// Binds a UDP socket and applies the socket options of `config`.
    ///
    /// `None` binds an ephemeral port on all interfaces, for hosts that only
    /// make outgoing connections.
    pub fn bind(address: Option<SocketAddr>, config: &Config) -> io::Result<Self> {
        let address = address.unwrap_or(SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0)));
        Self::new(StdUdpSocket::bind(address)?, config)
    }

    /// Wraps an already bound socket.
    pub fn new(socket: StdUdpSocket, config: &Config) -> io::Result<Self> {
        apply_socket_options(&socket, config)?;
        socket.set_nonblocking(true)?;

        let mut socket = UdpSocket::from_std(socket);
        let poll = Poll::new()?;
        poll.registry().register(&mut socket, SOCKET, Interest::READABLE)?;

        Ok(UdpTransport {
            is_blocking_mode: config.blocking_mode,
            socket,
            poll,
            events: Events::with_capacity(8),
            readable: false,
        })
    }

    /// Polls for readiness; `None` waits indefinitely.
    fn poll_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::Interrupted => return Ok(false),
            Err(err) => return Err(err),
        }
        if self.events.iter().any(|event| event.token() == SOCKET && event.is_readable()) {
            self.readable = true;
        }
        Ok(self.readable)
    }
}

impl TransportSocket for UdpTransport {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, *addr)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        let (recv_len, address) = loop {
            match self.socket.recv_from(buffer) {
                Ok(received) => break received,
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    self.readable = false;
                    if !self.is_blocking_mode {
                        return Err(err);
                    }
                    self.poll_readable(None)?;
                }
                Err(err) => return Err(err),
            }
        };
        Ok((&buffer[..recv_len], address))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_blocking_mode(&self) -> bool {
        self.is_blocking_mode
    }

    fn wait_readable(&mut self, timeout: Duration) -> io::Result<bool> {
        if self.readable {
            return Ok(true);
        }
        if timeout.is_zero() {
            return Ok(false);
        }
        self.poll_readable(Some(timeout))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn loopback() -> Option<SocketAddr> {
        Some("127.0.0.1:0".parse().unwrap())
    }

    #[test]
    fn test_socket_options_applied() {
        let config = Config {
            socket_recv_buffer_size: Some(131072),
            socket_send_buffer_size: Some(65536),
            socket_broadcast: true,
            ..Config::default()
        };
        let transport = UdpTransport::bind(loopback(), &config);
        assert!(transport.is_ok(), "Host socket with options should bind");
    }

    #[test]
    fn test_socket_options_none_uses_defaults() {
        let config = Config {
            socket_recv_buffer_size: None,
            socket_send_buffer_size: None,
            socket_broadcast: false,
            ..Config::default()
        };
        assert!(UdpTransport::bind(loopback(), &config).is_ok());
    }

    #[test]
    fn test_non_blocking_receive_would_block() {
        let mut transport = UdpTransport::bind(loopback(), &Config::default()).unwrap();
        assert!(!transport.is_blocking_mode());
        let mut buffer = [0u8; 64];
        let err = transport.receive_packet(&mut buffer).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_wait_readable() {
        let mut receiver = UdpTransport::bind(loopback(), &Config::default()).unwrap();
        let mut sender = UdpTransport::bind(loopback(), &Config::default()).unwrap();
        let address = receiver.local_addr().unwrap();

        let start = Instant::now();
        assert!(!receiver.wait_readable(Duration::from_millis(20)).unwrap());
        assert!(start.elapsed() >= Duration::from_millis(15));

        sender.send_packet(&address, b"ping").unwrap();
        assert!(receiver.wait_readable(Duration::from_millis(1000)).unwrap());

        // Still non-blocking and the datagram was not consumed
        let mut buffer = [0u8; 64];
        let (data, from) = receiver.receive_packet(&mut buffer).unwrap();
        assert_eq!(data, b"ping");
        assert_eq!(from, sender.local_addr().unwrap());
    }

    #[test]
    fn test_wait_readable_until_drained() {
        let mut receiver = UdpTransport::bind(loopback(), &Config::default()).unwrap();
        let mut sender = UdpTransport::bind(loopback(), &Config::default()).unwrap();
        let address = receiver.local_addr().unwrap();

        sender.send_packet(&address, b"one").unwrap();
        sender.send_packet(&address, b"two").unwrap();
        assert!(receiver.wait_readable(Duration::from_millis(1000)).unwrap());

        // One datagram read, the other still pending: no new edge is needed
        let mut buffer = [0u8; 64];
        receiver.receive_packet(&mut buffer).unwrap();
        assert!(receiver.wait_readable(Duration::ZERO).unwrap());

        let mut received = 1;
        while receiver.receive_packet(&mut buffer).is_ok() {
            received += 1;
        }
        assert_eq!(received, 2);
        assert!(!receiver.wait_readable(Duration::from_millis(10)).unwrap());
        assert!(!receiver.is_blocking_mode());
    }

    #[test]
    fn test_blocking_mode_receive_waits_for_data() {
        let config = Config { blocking_mode: true, ..Config::default() };
        let mut receiver = UdpTransport::bind(loopback(), &config).unwrap();
        let mut sender = UdpTransport::bind(loopback(), &Config::default()).unwrap();
        let address = receiver.local_addr().unwrap();
        assert!(receiver.is_blocking_mode());

        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            sender.send_packet(&address, b"late").unwrap();
        });
        let mut buffer = [0u8; 64];
        let (data, _) = receiver.receive_packet(&mut buffer).unwrap();
        assert_eq!(data, b"late");
        handle.join().unwrap();
    }
}
