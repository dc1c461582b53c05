//! Per-peer bandwidth accounting.
//!
//! Each peer announces the bandwidth it can receive and send, in bytes per
//! second, during the handshake and later through BandwidthLimit commands.
//! The host's periodic throttle pass compares those limits with the bytes
//! actually queued for and received from the peer since the previous pass,
//! and lowers the peer's packet throttle limit when the host or the peer
//! cannot keep up.
//!
//! A limit of `0` means unlimited bandwidth.

use relnet_core::constants::{MAXIMUM_WINDOW_SIZE, MINIMUM_WINDOW_SIZE, WINDOW_SIZE_SCALE};

/// Bandwidth limits announced by the remote peer and traffic counted since
/// the last throttle pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BandwidthThrottle {
    /// Remote incoming bandwidth in bytes per second (0 = unlimited)
    pub incoming_bandwidth: u32,
    /// Remote outgoing bandwidth in bytes per second (0 = unlimited)
    pub outgoing_bandwidth: u32,
    /// Service time at which the incoming share was last fixed
    pub incoming_bandwidth_throttle_epoch: u32,
    /// Service time at which the outgoing throttle limit was last fixed
    pub outgoing_bandwidth_throttle_epoch: u32,
    /// Bytes received from the peer since the last throttle pass
    pub incoming_data_total: u32,
    /// Bytes queued for the peer since the last throttle pass
    pub outgoing_data_total: u32,
}

impl BandwidthThrottle {
    /// Records bytes received from the peer.
    pub fn record_bytes_received(&mut self, bytes: u32) {
        self.incoming_data_total = self.incoming_data_total.wrapping_add(bytes);
    }

    /// Records bytes queued for the peer.
    pub fn record_bytes_sent(&mut self, bytes: u32) {
        self.outgoing_data_total = self.outgoing_data_total.wrapping_add(bytes);
    }

    /// Clears the traffic counters at the end of a throttle pass.
    pub fn reset_data_totals(&mut self) {
        self.incoming_data_total = 0;
        self.outgoing_data_total = 0;
    }

    /// Returns true if the peer announced a finite incoming bandwidth.
    pub fn is_limited(&self) -> bool {
        self.incoming_bandwidth != 0
    }
}

/// Reliable window size for a link between two bandwidth limits.
///
/// One `MINIMUM_WINDOW_SIZE` is granted per `WINDOW_SIZE_SCALE` bytes per
/// second of the slower side; an unlimited side defers to the other one,
/// and two unlimited sides get the largest window.
pub fn window_size_for(local_bandwidth: u32, remote_bandwidth: u32) -> u32 {
    let bandwidth = match (local_bandwidth, remote_bandwidth) {
        (0, 0) => return MAXIMUM_WINDOW_SIZE,
        (0, remote) => remote,
        (local, 0) => local,
        (local, remote) => local.min(remote),
    };
    clamp_window_size(bandwidth / WINDOW_SIZE_SCALE * MINIMUM_WINDOW_SIZE)
}

/// Clamps a window size to the protocol bounds.
pub fn clamp_window_size(window_size: u32) -> u32 {
    window_size.clamp(MINIMUM_WINDOW_SIZE, MAXIMUM_WINDOW_SIZE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unlimited_on_both_sides() {
        assert_eq!(window_size_for(0, 0), MAXIMUM_WINDOW_SIZE);
    }

    #[test]
    fn test_window_follows_slower_side() {
        assert_eq!(window_size_for(4 * WINDOW_SIZE_SCALE, 2 * WINDOW_SIZE_SCALE), 2 * MINIMUM_WINDOW_SIZE);
        assert_eq!(window_size_for(0, 3 * WINDOW_SIZE_SCALE), 3 * MINIMUM_WINDOW_SIZE);
    }

    #[test]
    fn test_window_is_clamped() {
        assert_eq!(window_size_for(1000, 1000), MINIMUM_WINDOW_SIZE);
        assert_eq!(window_size_for(u32::MAX, u32::MAX), MAXIMUM_WINDOW_SIZE);
    }

    #[test]
    fn test_counters() {
        let mut throttle = BandwidthThrottle { incoming_bandwidth: 1000, ..Default::default() };
        assert!(throttle.is_limited());
        throttle.record_bytes_sent(100);
        throttle.record_bytes_received(40);
        assert_eq!(throttle.outgoing_data_total, 100);
        assert_eq!(throttle.incoming_data_total, 40);
        throttle.reset_data_totals();
        assert_eq!(throttle.outgoing_data_total, 0);
        assert_eq!(throttle.incoming_data_total, 0);
    }
}
