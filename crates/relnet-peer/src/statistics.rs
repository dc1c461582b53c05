//! Peer connection statistics tracking.
//!
//! Cumulative counters for the lifetime of a connection. They are cleared
//! when the peer slot is reset. Round-trip and loss estimates live in the
//! peer's congestion state and are exposed by [`Peer`](crate::Peer) directly.

use relnet_core::constants::PACKET_LOSS_SCALE;

/// Cumulative statistics for a peer connection.
#[derive(Debug, Clone, Default)]
pub struct PeerStatistics {
    /// Reliable commands handed to the socket, retransmissions included
    pub packets_sent: u64,
    /// Reliable commands whose retransmission timer expired
    pub packets_lost: u64,
    /// Datagram bytes sent to this peer
    pub bytes_sent: u64,
    /// Datagram bytes received from this peer
    pub bytes_received: u64,
    /// Packets delivered to the application
    pub packets_received: u64,
}

impl PeerStatistics {
    /// Returns the lifetime loss ratio of reliable commands (0.0 to 1.0).
    pub fn packet_loss_rate(&self) -> f32 {
        if self.packets_sent == 0 {
            return 0.0;
        }
        self.packets_lost as f32 / self.packets_sent as f32
    }

    /// Resets all statistics counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Converts a fixed-point loss estimate to a ratio.
pub fn loss_ratio(packet_loss: u32) -> f32 {
    packet_loss as f32 / PACKET_LOSS_SCALE as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_initialized_to_zero() {
        let stats = PeerStatistics::default();
        assert_eq!(stats.packets_sent, 0);
        assert_eq!(stats.packets_lost, 0);
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.bytes_received, 0);
        assert_eq!(stats.packet_loss_rate(), 0.0);
    }

    #[test]
    fn test_statistics_packet_loss_rate() {
        let stats = PeerStatistics { packets_sent: 100, packets_lost: 10, ..Default::default() };
        assert!((stats.packet_loss_rate() - 0.1).abs() < 0.001);
    }

    #[test]
    fn test_statistics_reset() {
        let mut stats = PeerStatistics { packets_sent: 5, bytes_received: 900, ..Default::default() };
        stats.reset();
        assert_eq!(stats.packets_sent, 0);
        assert_eq!(stats.bytes_received, 0);
    }

    #[test]
    fn test_loss_ratio_scale() {
        assert_eq!(loss_ratio(0), 0.0);
        assert_eq!(loss_ratio(PACKET_LOSS_SCALE / 2), 0.5);
    }
}
