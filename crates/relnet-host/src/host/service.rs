//! The service loop: send, receive, send again, dispatch, wait.

use std::{io, mem, net::SocketAddr, time::Duration};

use relnet_core::{
    constants::{BANDWIDTH_THROTTLE_INTERVAL, MAXIMUM_RECEIVES_PER_SERVICE},
    error::Result,
    interceptor::Verdict,
    time::{time_difference, time_greater_equal},
    transport::Socket as TransportSocket,
};
use tracing::{trace, warn};

use super::Host;
use crate::event_types::Event;

impl<S: TransportSocket> Host<S> {
    /// Runs one service tick and returns at most one event.
    ///
    /// Sends queued commands for every peer, reads up to
    /// `MAXIMUM_RECEIVES_PER_SERVICE` datagrams, handles timeouts and the
    /// bandwidth throttle, and waits up to `timeout` milliseconds for traffic
    /// when nothing happened. `Ok(None)` means the timeout expired without
    /// an event; `Err` is a hard socket error.
    pub fn service(&mut self, timeout: u32) -> Result<Option<Event>> {
        if let Some(event) = self.dispatch_incoming_commands() {
            return Ok(Some(event));
        }

        self.ctx.service_time = self.current_time();
        let deadline = self.ctx.service_time.wrapping_add(timeout);

        loop {
            if time_difference(self.ctx.service_time, self.bandwidth_throttle_epoch) >= BANDWIDTH_THROTTLE_INTERVAL {
                self.throttle_bandwidth();
            }

            self.send_outgoing_commands(true)?;
            self.receive_incoming_commands()?;
            self.send_outgoing_commands(true)?;

            if let Some(event) = self.dispatch_incoming_commands() {
                return Ok(Some(event));
            }
            if time_greater_equal(self.ctx.service_time, deadline) {
                return Ok(None);
            }

            let now = self.current_time();
            if time_greater_equal(now, deadline) {
                self.ctx.service_time = now;
                return Ok(None);
            }

            // Held datagrams are released on service passes, so wake up for them
            let mut wait = time_difference(deadline, now);
            if let Some(next) = self.simulator.as_ref().and_then(|simulator| simulator.time_until_next_delivery(now)) {
                wait = wait.min(next.max(1));
            }

            let ready = match self.socket.wait_readable(Duration::from_millis(u64::from(wait))) {
                Ok(ready) => ready,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => false,
                Err(err) => return Err(err.into()),
            };
            let after = self.current_time();
            // A clock that did not move (e.g. a manual one) would spin forever
            if !ready && after == now {
                return Ok(None);
            }
            self.ctx.service_time = after;
        }
    }

    /// Returns the next pending event without touching the socket.
    pub fn check_events(&mut self) -> Option<Event> {
        self.dispatch_incoming_commands()
    }

    /// Sends every queued command now, without receiving or waiting.
    pub fn flush(&mut self) -> Result<()> {
        self.ctx.service_time = self.current_time();
        self.send_outgoing_commands(false)
    }

    /// Composes and transmits datagrams for every peer with traffic.
    pub(super) fn send_outgoing_commands(&mut self, check_for_timeouts: bool) -> Result<()> {
        self.release_outgoing()?;

        for index in 0..self.peers.len() {
            while let Some(datagram) = self.peers[index].compose_datagram(&mut self.ctx, check_for_timeouts)? {
                let continue_sending = datagram.continue_sending;
                self.transmit(datagram.address, datagram.data)?;
                if !continue_sending {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Hands a datagram to the interceptor, then to the simulator or the socket.
    fn transmit(&mut self, address: SocketAddr, mut data: Vec<u8>) -> Result<()> {
        self.statistics.total_sent_data += data.len() as u64;
        self.statistics.total_sent_packets += 1;

        if let Some(interceptor) = self.interceptor.as_mut() {
            if interceptor.on_send(&address, &mut data) == Verdict::Consume {
                trace!(%address, "outgoing datagram consumed by interceptor");
                return Ok(());
            }
        }

        if let Some(simulator) = self.simulator.as_mut() {
            if !simulator.submit_outgoing(&mut self.rng, self.ctx.service_time, address, data) {
                trace!(%address, "simulated loss of outgoing datagram");
            }
            return Ok(());
        }

        send_datagram(&mut self.socket, &address, &data)
    }

    /// Sends the held outgoing datagrams that are due.
    fn release_outgoing(&mut self) -> Result<()> {
        let Some(simulator) = self.simulator.as_mut() else {
            return Ok(());
        };
        while let Some(datagram) = simulator.pop_outgoing(self.ctx.service_time) {
            send_datagram(&mut self.socket, &datagram.address, &datagram.data)?;
        }
        Ok(())
    }

    /// Reads up to `MAXIMUM_RECEIVES_PER_SERVICE` datagrams and handles them.
    pub(super) fn receive_incoming_commands(&mut self) -> Result<()> {
        let mut buffer = mem::take(&mut self.receive_buffer);
        let result = self.receive_datagrams(&mut buffer);
        self.receive_buffer = buffer;
        result?;

        let now = self.ctx.service_time;
        while let Some(datagram) = self.simulator.as_mut().and_then(|simulator| simulator.pop_incoming(now)) {
            self.handle_incoming_commands(datagram.address, &datagram.data);
        }
        Ok(())
    }

    fn receive_datagrams(&mut self, buffer: &mut [u8]) -> Result<()> {
        for _ in 0..MAXIMUM_RECEIVES_PER_SERVICE {
            let (length, address) = match self.socket.receive_packet(buffer) {
                Ok((data, address)) => (data.len(), address),
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP errors from earlier sends surface here on some platforms
                Err(err) if is_transient(&err) => continue,
                Err(err) => return Err(err.into()),
            };
            self.statistics.total_received_data += length as u64;
            self.statistics.total_received_packets += 1;

            let datagram = &mut buffer[..length];
            if let Some(interceptor) = self.interceptor.as_mut() {
                if interceptor.on_receive(&address, datagram) == Verdict::Consume {
                    trace!(%address, "incoming datagram consumed by interceptor");
                    continue;
                }
            }

            if let Some(simulator) = self.simulator.as_mut() {
                if !simulator.submit_incoming(&mut self.rng, self.ctx.service_time, address, datagram.to_vec()) {
                    trace!(%address, "simulated loss of incoming datagram");
                }
                continue;
            }

            self.handle_incoming_commands(address, datagram);
        }
        Ok(())
    }
}

fn send_datagram<S: TransportSocket>(socket: &mut S, address: &SocketAddr, data: &[u8]) -> Result<()> {
    match socket.send_packet(address, data) {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
            trace!(%address, "socket buffer full, datagram dropped");
            Ok(())
        }
        Err(err) if is_transient(&err) => {
            warn!(%address, %err, "datagram not sent");
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn is_transient(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionRefused | io::ErrorKind::Interrupted
    )
}
