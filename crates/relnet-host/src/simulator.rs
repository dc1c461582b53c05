//! Packet loss and latency injection.
//!
//! When installed on a host, every datagram crossing the socket in either
//! direction is dropped with a fixed probability or held back for a uniform
//! random delay. Datagrams with different delays overtake each other, so the
//! simulator also produces reordering.

use std::{collections::VecDeque, net::SocketAddr};

use rand::{rngs::StdRng, Rng};
use relnet_core::time::{time_difference, time_greater_equal, time_less};

/// A datagram waiting for its delivery time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedDatagram {
    /// Service time at which the datagram is released
    pub delivery_time: u32,
    /// Remote address (destination when sending, source when receiving)
    pub address: SocketAddr,
    /// Raw datagram bytes
    pub data: Vec<u8>,
}

/// One direction of simulated traffic, ordered by delivery time.
#[derive(Debug, Default)]
struct Lane {
    queue: VecDeque<DelayedDatagram>,
}

impl Lane {
    fn insert(&mut self, datagram: DelayedDatagram) {
        // Equal delivery times keep their submission order
        let position = self
            .queue
            .iter()
            .position(|queued| time_less(datagram.delivery_time, queued.delivery_time))
            .unwrap_or(self.queue.len());
        self.queue.insert(position, datagram);
    }

    fn pop_due(&mut self, now: u32) -> Option<DelayedDatagram> {
        match self.queue.front() {
            Some(front) if time_greater_equal(now, front.delivery_time) => self.queue.pop_front(),
            _ => None,
        }
    }

    fn next_delivery(&self) -> Option<u32> {
        self.queue.front().map(|datagram| datagram.delivery_time)
    }
}

/// Simulated network conditions.
#[derive(Debug)]
pub struct NetworkSimulator {
    loss_probability: f64,
    min_delay: u32,
    max_delay: u32,
    outgoing: Lane,
    incoming: Lane,
    dropped: u64,
}

impl NetworkSimulator {
    /// Creates a simulator dropping datagrams with `loss_probability` (0.0 to
    /// 1.0) and delaying survivors by `min_delay..=max_delay` milliseconds.
    pub fn new(loss_probability: f64, min_delay: u32, max_delay: u32) -> Self {
        Self {
            loss_probability: loss_probability.clamp(0.0, 1.0),
            min_delay: min_delay.min(max_delay),
            max_delay,
            outgoing: Lane::default(),
            incoming: Lane::default(),
            dropped: 0,
        }
    }

    /// Probability that a datagram is lost.
    pub fn loss_probability(&self) -> f64 {
        self.loss_probability
    }

    /// Delay bounds in milliseconds.
    pub fn delay(&self) -> (u32, u32) {
        (self.min_delay, self.max_delay)
    }

    /// Number of datagrams dropped so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Submits a datagram on its way to the socket. Returns false if it was
    /// lost.
    pub fn submit_outgoing(&mut self, rng: &mut StdRng, now: u32, address: SocketAddr, data: Vec<u8>) -> bool {
        match self.schedule(rng, now, address, data) {
            Some(datagram) => {
                self.outgoing.insert(datagram);
                true
            }
            None => false,
        }
    }

    /// Submits a datagram that came off the socket. Returns false if it was
    /// lost.
    pub fn submit_incoming(&mut self, rng: &mut StdRng, now: u32, address: SocketAddr, data: Vec<u8>) -> bool {
        match self.schedule(rng, now, address, data) {
            Some(datagram) => {
                self.incoming.insert(datagram);
                true
            }
            None => false,
        }
    }

    /// Next outgoing datagram whose delivery time has come.
    pub fn pop_outgoing(&mut self, now: u32) -> Option<DelayedDatagram> {
        self.outgoing.pop_due(now)
    }

    /// Next incoming datagram whose delivery time has come.
    pub fn pop_incoming(&mut self, now: u32) -> Option<DelayedDatagram> {
        self.incoming.pop_due(now)
    }

    /// Milliseconds until the next held datagram is due, if any is held.
    pub fn time_until_next_delivery(&self, now: u32) -> Option<u32> {
        [self.outgoing.next_delivery(), self.incoming.next_delivery()]
            .into_iter()
            .flatten()
            .map(|delivery| if time_greater_equal(now, delivery) { 0 } else { time_difference(delivery, now) })
            .min()
    }

    /// Number of datagrams held in either direction.
    pub fn pending(&self) -> usize {
        self.outgoing.queue.len() + self.incoming.queue.len()
    }

    fn schedule(&mut self, rng: &mut StdRng, now: u32, address: SocketAddr, data: Vec<u8>) -> Option<DelayedDatagram> {
        if self.loss_probability > 0.0 && rng.random_bool(self.loss_probability) {
            self.dropped += 1;
            return None;
        }
        let delay = if self.max_delay > self.min_delay {
            rng.random_range(self.min_delay..=self.max_delay)
        } else {
            self.max_delay
        };
        Some(DelayedDatagram { delivery_time: now.wrapping_add(delay), address, data })
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;

    use super::*;

    fn get_fake_addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn test_total_loss_drops_everything() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut simulator = NetworkSimulator::new(1.0, 0, 0);
        for _ in 0..10 {
            assert!(!simulator.submit_outgoing(&mut rng, 100, get_fake_addr(), vec![1]));
        }
        assert_eq!(simulator.dropped(), 10);
        assert_eq!(simulator.pending(), 0);
    }

    #[test]
    fn test_delay_holds_datagrams_until_due() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut simulator = NetworkSimulator::new(0.0, 50, 50);
        assert!(simulator.submit_incoming(&mut rng, 100, get_fake_addr(), vec![7]));

        assert_eq!(simulator.time_until_next_delivery(100), Some(50));
        assert!(simulator.pop_incoming(149).is_none());
        let datagram = simulator.pop_incoming(150).unwrap();
        assert_eq!(datagram.data, vec![7]);
        assert_eq!(simulator.time_until_next_delivery(150), None);
    }

    #[test]
    fn test_release_order_follows_delivery_time() {
        let mut simulator = NetworkSimulator::new(0.0, 0, 0);
        for (delivery_time, byte) in [(30, 3), (10, 1), (20, 2), (10, 4)] {
            simulator.outgoing.insert(DelayedDatagram { delivery_time, address: get_fake_addr(), data: vec![byte] });
        }

        let released: Vec<u8> =
            std::iter::from_fn(|| simulator.pop_outgoing(100)).map(|datagram| datagram.data[0]).collect();
        assert_eq!(released, vec![1, 4, 2, 3]);
    }

    #[test]
    fn test_delays_stay_in_bounds() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut simulator = NetworkSimulator::new(0.0, 5, 25);
        for _ in 0..100 {
            simulator.submit_outgoing(&mut rng, 1000, get_fake_addr(), Vec::new());
        }
        while let Some(datagram) = simulator.pop_outgoing(2000) {
            assert!((1005..=1025).contains(&datagram.delivery_time));
        }
    }

    #[test]
    fn test_partial_loss_is_roughly_proportional() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut simulator = NetworkSimulator::new(0.25, 0, 0);
        let delivered =
            (0..4000).filter(|_| simulator.submit_outgoing(&mut rng, 0, get_fake_addr(), Vec::new())).count();
        assert!((2700..3300).contains(&delivered), "delivered {}", delivered);
    }
}
