//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr, time::Duration};

/// Low-level datagram socket abstraction.
///
/// This trait allows various transports (UDP, in-memory loopback, etc.) to be
/// plugged into the host without coupling to a concrete implementation.
pub trait Socket {
    /// Sends a single datagram to `addr`.
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single datagram.
    ///
    /// A non-blocking socket with nothing pending returns an error of kind
    /// `WouldBlock`.
    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the socket address that this socket was created from.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Returns whether socket operates in blocking or non-blocking mode.
    fn is_blocking_mode(&self) -> bool;

    /// Blocks until a datagram can be read or `timeout` elapses.
    ///
    /// Returns `Ok(true)` when data is ready, `Ok(false)` on timeout.
    fn wait_readable(&mut self, timeout: Duration) -> Result<bool>;
}
