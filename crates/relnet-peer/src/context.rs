//! Host-wide state that peers read and update while processing commands.
//!
//! The host owns its peer table and a [`HostContext`]. Every peer operation
//! that needs host-level data (service time, MTU, limits, the dispatch queue,
//! connection counters) receives the context explicitly, so a peer can be
//! borrowed mutably next to it without aliasing the table.

use std::fmt;

use relnet_core::{config::Config, packet_pool::PacketPool};

/// Index of a peer slot in its host's peer table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerId(pub usize);

impl PeerId {
    /// Slot index.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Set of peers with events waiting to be delivered.
///
/// Membership is a bitset over slot indices, so pushing a peer that is
/// already queued is a no-op. Peers are handed out lowest index first.
#[derive(Debug, Clone, Default)]
pub struct DispatchQueue {
    words: Vec<u64>,
    len: usize,
}

impl DispatchQueue {
    /// Creates an empty queue sized for `peer_count` slots.
    pub fn with_capacity(peer_count: usize) -> Self {
        Self { words: vec![0; peer_count.div_ceil(64)], len: 0 }
    }

    /// Queues `index`. Returns false if it was already queued.
    pub fn push(&mut self, index: usize) -> bool {
        let word = index / 64;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        let bit = 1u64 << (index % 64);
        if self.words[word] & bit != 0 {
            return false;
        }
        self.words[word] |= bit;
        self.len += 1;
        true
    }

    /// Unqueues `index`. Returns false if it was not queued.
    pub fn remove(&mut self, index: usize) -> bool {
        let bit = 1u64 << (index % 64);
        match self.words.get_mut(index / 64) {
            Some(word) if *word & bit != 0 => {
                *word &= !bit;
                self.len -= 1;
                true
            }
            _ => false,
        }
    }

    /// Returns true if `index` is queued.
    pub fn contains(&self, index: usize) -> bool {
        self.words.get(index / 64).is_some_and(|word| word & (1u64 << (index % 64)) != 0)
    }

    /// Removes and returns the lowest queued index.
    pub fn pop_front(&mut self) -> Option<usize> {
        if self.len == 0 {
            return None;
        }
        let (position, word) = self.words.iter_mut().enumerate().find(|(_, word)| **word != 0)?;
        let bit = word.trailing_zeros() as usize;
        *word &= *word - 1;
        self.len -= 1;
        Some(position * 64 + bit)
    }

    /// Number of queued peers.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if no peer is queued.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Host-level state shared with peers.
#[derive(Debug)]
pub struct HostContext {
    /// Configuration the host was created with
    pub config: Config,
    /// Current service time in milliseconds (wrapping, never 0 once running)
    pub service_time: u32,
    /// MTU offered to new connections
    pub mtu: u32,
    /// Incoming bandwidth of the host in bytes/sec (0 = unlimited)
    pub incoming_bandwidth: u32,
    /// Outgoing bandwidth of the host in bytes/sec (0 = unlimited)
    pub outgoing_bandwidth: u32,
    /// Upper bound on channels per connection
    pub channel_limit: usize,
    /// Largest packet accepted for sending or reassembly
    pub maximum_packet_size: usize,
    /// Largest amount of undelivered incoming data per peer
    pub maximum_waiting_data: usize,
    /// Peers with events waiting
    pub dispatch_queue: DispatchQueue,
    /// Number of peers in `Connected` or `DisconnectLater`
    pub connected_peers: usize,
    /// Number of connected peers that announced an incoming bandwidth limit
    pub bandwidth_limited_peers: usize,
    /// Set when bandwidth limits must be redistributed at the next throttle pass
    pub recalculate_bandwidth_limits: bool,
    /// Buffers backing received packets
    pub pool: PacketPool,
}

impl HostContext {
    /// Builds the context for a host created with `config`.
    pub fn new(config: Config) -> Self {
        Self {
            service_time: 0,
            mtu: config.mtu,
            incoming_bandwidth: config.incoming_bandwidth,
            outgoing_bandwidth: config.outgoing_bandwidth,
            channel_limit: config.channel_limit,
            maximum_packet_size: config.maximum_packet_size,
            maximum_waiting_data: config.maximum_waiting_data,
            dispatch_queue: DispatchQueue::with_capacity(config.peer_count),
            connected_peers: 0,
            bandwidth_limited_peers: 0,
            recalculate_bandwidth_limits: false,
            pool: PacketPool::default(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_queue_is_a_set() {
        let mut queue = DispatchQueue::with_capacity(8);
        assert!(queue.push(3));
        assert!(!queue.push(3));
        assert_eq!(queue.len(), 1);
        assert!(queue.contains(3));
    }

    #[test]
    fn test_dispatch_queue_pops_lowest_first() {
        let mut queue = DispatchQueue::with_capacity(200);
        for index in [130, 7, 64, 0] {
            queue.push(index);
        }
        assert_eq!(queue.pop_front(), Some(0));
        assert_eq!(queue.pop_front(), Some(7));
        assert_eq!(queue.pop_front(), Some(64));
        assert_eq!(queue.pop_front(), Some(130));
        assert_eq!(queue.pop_front(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_dispatch_queue_remove() {
        let mut queue = DispatchQueue::with_capacity(4);
        queue.push(1);
        queue.push(2);
        assert!(queue.remove(1));
        assert!(!queue.remove(1));
        assert!(!queue.remove(500));
        assert_eq!(queue.pop_front(), Some(2));
    }

    #[test]
    fn test_context_copies_limits_from_config() {
        let config = Config { mtu: 1200, incoming_bandwidth: 1000, ..Default::default() };
        let ctx = HostContext::new(config);
        assert_eq!(ctx.mtu, 1200);
        assert_eq!(ctx.incoming_bandwidth, 1000);
        assert_eq!(ctx.service_time, 0);
    }
}
