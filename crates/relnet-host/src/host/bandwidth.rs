//! Periodic redistribution of the host's bandwidth among its peers.
//!
//! Outgoing: when the data queued for peers since the last pass exceeds what
//! the host (or a peer's announced incoming bandwidth) can carry, the peers'
//! packet throttle limits are lowered proportionally. Peers limited by their
//! own bandwidth are settled first, the rest share what remains.
//!
//! Incoming: when flagged, the host's incoming bandwidth is split among the
//! peers and each one is told its share with a BandwidthLimit command.

use relnet_core::{
    constants::{BANDWIDTH_THROTTLE_INTERVAL, PACKET_THROTTLE_SCALE},
    transport::Socket as TransportSocket,
};
use tracing::trace;

use super::Host;

impl<S: TransportSocket> Host<S> {
    /// Runs a throttle pass if `BANDWIDTH_THROTTLE_INTERVAL` has elapsed
    /// since the previous one.
    pub(super) fn throttle_bandwidth(&mut self) {
        let now = self.ctx.service_time;
        let elapsed = now.wrapping_sub(self.bandwidth_throttle_epoch);
        if elapsed < BANDWIDTH_THROTTLE_INTERVAL {
            return;
        }
        self.bandwidth_throttle_epoch = now;

        let mut peers_remaining = self.ctx.connected_peers;
        if peers_remaining == 0 {
            return;
        }

        let elapsed = u64::from(elapsed);
        let scale = u64::from(PACKET_THROTTLE_SCALE);
        let mut data_total = u64::MAX;
        let mut bandwidth = u64::MAX;

        if self.ctx.outgoing_bandwidth != 0 {
            data_total = self
                .peers
                .iter()
                .filter(|peer| peer.state().is_connected())
                .map(|peer| u64::from(peer.bandwidth().outgoing_data_total))
                .sum();
            bandwidth = u64::from(self.ctx.outgoing_bandwidth) * elapsed / 1000;
        }

        let mut needs_adjustment = self.ctx.bandwidth_limited_peers > 0;
        while peers_remaining > 0 && needs_adjustment {
            needs_adjustment = false;
            let throttle = share(bandwidth, data_total, scale);

            for peer in self.peers.iter_mut() {
                let limits = peer.bandwidth();
                if !peer.state().is_connected()
                    || limits.incoming_bandwidth == 0
                    || limits.outgoing_bandwidth_throttle_epoch == now
                {
                    continue;
                }

                let peer_bandwidth = u64::from(limits.incoming_bandwidth) * elapsed / 1000;
                let outgoing_data_total = u64::from(limits.outgoing_data_total);
                if throttle * outgoing_data_total / scale <= peer_bandwidth {
                    continue;
                }

                let limit = (peer_bandwidth * scale / outgoing_data_total.max(1)).max(1) as u32;
                trace!(peer = peer.index(), limit, "peer bandwidth exceeded");
                peer.set_packet_throttle_limit(limit);

                let limits = peer.bandwidth_mut();
                limits.outgoing_bandwidth_throttle_epoch = now;
                limits.reset_data_totals();

                needs_adjustment = true;
                peers_remaining -= 1;
                bandwidth = bandwidth.saturating_sub(peer_bandwidth);
                data_total = data_total.saturating_sub(peer_bandwidth);
            }
        }

        if peers_remaining > 0 {
            let throttle = share(bandwidth, data_total, scale) as u32;
            for peer in self.peers.iter_mut() {
                if !peer.state().is_connected() || peer.bandwidth().outgoing_bandwidth_throttle_epoch == now {
                    continue;
                }
                peer.set_packet_throttle_limit(throttle);
                peer.bandwidth_mut().reset_data_totals();
            }
        }

        if self.ctx.recalculate_bandwidth_limits {
            self.recalculate_bandwidth_limits(now);
        }
    }

    /// Splits the host's incoming bandwidth and announces each peer's share.
    fn recalculate_bandwidth_limits(&mut self, now: u32) {
        self.ctx.recalculate_bandwidth_limits = false;

        let mut peers_remaining = self.ctx.connected_peers as u32;
        let mut bandwidth = self.ctx.incoming_bandwidth;
        let mut bandwidth_limit = 0;

        if bandwidth != 0 {
            let mut needs_adjustment = true;
            while peers_remaining > 0 && needs_adjustment {
                needs_adjustment = false;
                bandwidth_limit = bandwidth / peers_remaining;

                for peer in self.peers.iter_mut() {
                    let limits = peer.bandwidth();
                    if !peer.state().is_connected() || limits.incoming_bandwidth_throttle_epoch == now {
                        continue;
                    }
                    // Peers that send less than an even share keep what they use
                    if limits.outgoing_bandwidth > 0 && limits.outgoing_bandwidth >= bandwidth_limit {
                        continue;
                    }

                    let outgoing_bandwidth = limits.outgoing_bandwidth;
                    peer.bandwidth_mut().incoming_bandwidth_throttle_epoch = now;
                    needs_adjustment = true;
                    peers_remaining -= 1;
                    bandwidth = bandwidth.saturating_sub(outgoing_bandwidth);
                }
            }
        }

        let outgoing_bandwidth = self.ctx.outgoing_bandwidth;
        for peer in self.peers.iter_mut().filter(|peer| peer.state().is_connected()) {
            let limits = peer.bandwidth();
            let incoming_bandwidth =
                if limits.incoming_bandwidth_throttle_epoch == now { limits.outgoing_bandwidth } else { bandwidth_limit };
            trace!(peer = peer.index(), incoming_bandwidth, outgoing_bandwidth, "announcing bandwidth limit");
            peer.queue_bandwidth_limit(incoming_bandwidth, outgoing_bandwidth);
        }
    }
}

/// Throttle that fits `data_total` bytes into `bandwidth`, on `scale`.
fn share(bandwidth: u64, data_total: u64, scale: u64) -> u64 {
    if data_total <= bandwidth {
        scale
    } else {
        bandwidth * scale / data_total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share() {
        assert_eq!(share(1000, 500, 32), 32);
        assert_eq!(share(u64::MAX, u64::MAX, 32), 32);
        assert_eq!(share(500, 1000, 32), 16);
        assert_eq!(share(0, 1000, 32), 0);
    }
}
