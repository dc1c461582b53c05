//! Round-trip estimation, packet throttle and packet loss tracking.
//!
//! All arithmetic is integer milliseconds. The throttle is a fixed-point
//! fraction of `PACKET_THROTTLE_SCALE`: at full scale nothing is dropped and
//! the whole reliable window may be in flight, at 0 every throttled
//! unreliable command is dropped.

use relnet_core::{
    constants::{
        DEFAULT_PACKET_THROTTLE, DEFAULT_ROUND_TRIP_TIME, PACKET_LOSS_INTERVAL, PACKET_LOSS_SCALE,
        PACKET_THROTTLE_ACCELERATION, PACKET_THROTTLE_COUNTER, PACKET_THROTTLE_DECELERATION,
        PACKET_THROTTLE_INTERVAL, PACKET_THROTTLE_SCALE,
    },
    time::time_difference,
};

/// Weight of a new sample in the round-trip estimate (1/8).
pub const ROUND_TRIP_TIME_GAIN: u32 = 8;
/// Weight of a new deviation in the round-trip variance (1/4).
pub const ROUND_TRIP_TIME_VARIANCE_GAIN: u32 = 4;
/// Weight of a new measurement in the packet loss estimate (1/8).
pub const PACKET_LOSS_GAIN: u32 = 8;
/// Weight of a new deviation in the packet loss variance (1/4).
pub const PACKET_LOSS_VARIANCE_GAIN: u32 = 4;

/// Outcome of a throttle update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleChange {
    /// Conditions are stable
    Unchanged,
    /// The round trip is within its own variance; throttle snapped to the limit
    Reset,
    /// The round trip improved
    Accelerated,
    /// The round trip degraded past twice its variance
    Decelerated,
}

/// Per-peer congestion state.
#[derive(Debug, Clone)]
pub struct CongestionControl {
    /// Smoothed round-trip time
    round_trip_time: u32,
    /// Round-trip time variance
    round_trip_time_variance: u32,
    /// Lowest round trip of the previous throttle interval
    last_round_trip_time: u32,
    /// Highest variance of the previous throttle interval
    last_round_trip_time_variance: u32,
    /// Lowest round trip of the current throttle interval
    lowest_round_trip_time: u32,
    /// Highest variance of the current throttle interval
    highest_round_trip_time_variance: u32,

    /// Current throttle (0 to PACKET_THROTTLE_SCALE)
    packet_throttle: u32,
    /// Ceiling imposed on the throttle by bandwidth allocation
    packet_throttle_limit: u32,
    /// Rotating counter deciding which unreliable commands to drop
    packet_throttle_counter: u32,
    /// Start of the current throttle interval
    packet_throttle_epoch: u32,
    /// Throttle increase applied when round trips improve
    packet_throttle_acceleration: u32,
    /// Throttle decrease applied when round trips degrade
    packet_throttle_deceleration: u32,
    /// Length of a throttle interval in milliseconds
    packet_throttle_interval: u32,

    /// Smoothed packet loss (fraction of PACKET_LOSS_SCALE)
    packet_loss: u32,
    /// Packet loss variance
    packet_loss_variance: u32,
    /// Start of the current loss measurement interval
    packet_loss_epoch: u32,
    /// Reliable commands sent during the current loss interval
    packets_sent: u32,
    /// Reliable commands lost during the current loss interval
    packets_lost: u32,
}

impl Default for CongestionControl {
    fn default() -> Self {
        Self::new(PACKET_THROTTLE_INTERVAL, PACKET_THROTTLE_ACCELERATION, PACKET_THROTTLE_DECELERATION)
    }
}

impl CongestionControl {
    /// Creates congestion state with the given throttle parameters.
    pub fn new(interval: u32, acceleration: u32, deceleration: u32) -> Self {
        Self {
            round_trip_time: DEFAULT_ROUND_TRIP_TIME,
            round_trip_time_variance: 0,
            last_round_trip_time: DEFAULT_ROUND_TRIP_TIME,
            last_round_trip_time_variance: 0,
            lowest_round_trip_time: DEFAULT_ROUND_TRIP_TIME,
            highest_round_trip_time_variance: 0,
            packet_throttle: DEFAULT_PACKET_THROTTLE,
            packet_throttle_limit: PACKET_THROTTLE_SCALE,
            packet_throttle_counter: 0,
            packet_throttle_epoch: 0,
            packet_throttle_acceleration: acceleration,
            packet_throttle_deceleration: deceleration,
            packet_throttle_interval: interval,
            packet_loss: 0,
            packet_loss_variance: 0,
            packet_loss_epoch: 0,
            packets_sent: 0,
            packets_lost: 0,
        }
    }

    /// Replaces the throttle parameters.
    pub fn configure(&mut self, interval: u32, acceleration: u32, deceleration: u32) {
        self.packet_throttle_interval = interval;
        self.packet_throttle_acceleration = acceleration;
        self.packet_throttle_deceleration = deceleration;
    }

    /// Adjusts the throttle for a new round-trip sample.
    pub fn throttle(&mut self, rtt: u32) -> ThrottleChange {
        if self.last_round_trip_time <= self.last_round_trip_time_variance {
            self.packet_throttle = self.packet_throttle_limit;
            ThrottleChange::Reset
        } else if rtt < self.last_round_trip_time {
            self.packet_throttle = self
                .packet_throttle
                .saturating_add(self.packet_throttle_acceleration)
                .min(self.packet_throttle_limit);
            ThrottleChange::Accelerated
        } else if rtt > self.last_round_trip_time + 2 * self.last_round_trip_time_variance {
            self.packet_throttle = self.packet_throttle.saturating_sub(self.packet_throttle_deceleration);
            ThrottleChange::Decelerated
        } else {
            ThrottleChange::Unchanged
        }
    }

    /// Folds a round-trip sample into the estimate.
    ///
    /// Runs the throttle against the previous interval's extremes, updates the
    /// smoothed round trip and variance, and rolls the interval extremes once
    /// per throttle interval.
    pub fn update_round_trip_time(&mut self, rtt: u32, service_time: u32) {
        self.throttle(rtt);

        self.round_trip_time_variance -= self.round_trip_time_variance / ROUND_TRIP_TIME_VARIANCE_GAIN;
        if rtt >= self.round_trip_time {
            let diff = rtt - self.round_trip_time;
            self.round_trip_time += diff / ROUND_TRIP_TIME_GAIN;
            self.round_trip_time_variance += diff / ROUND_TRIP_TIME_VARIANCE_GAIN;
        } else {
            let diff = self.round_trip_time - rtt;
            self.round_trip_time -= diff / ROUND_TRIP_TIME_GAIN;
            self.round_trip_time_variance += diff / ROUND_TRIP_TIME_VARIANCE_GAIN;
        }

        if self.round_trip_time < self.lowest_round_trip_time {
            self.lowest_round_trip_time = self.round_trip_time;
        }
        if self.round_trip_time_variance > self.highest_round_trip_time_variance {
            self.highest_round_trip_time_variance = self.round_trip_time_variance;
        }

        if self.packet_throttle_epoch == 0
            || time_difference(service_time, self.packet_throttle_epoch) >= self.packet_throttle_interval
        {
            self.last_round_trip_time = self.lowest_round_trip_time;
            self.last_round_trip_time_variance = self.highest_round_trip_time_variance.max(1);
            self.lowest_round_trip_time = self.round_trip_time;
            self.highest_round_trip_time_variance = self.round_trip_time_variance;
            self.packet_throttle_epoch = service_time;
        }
    }

    /// Retransmission timeout for a newly sent reliable command.
    pub fn round_trip_timeout(&self) -> u32 {
        self.round_trip_time + 4 * self.round_trip_time_variance
    }

    /// Largest number of reliable bytes that may be unacknowledged at once.
    pub fn window_budget(&self, window_size: u32, mtu: u32) -> u32 {
        let throttled = (u64::from(self.packet_throttle) * u64::from(window_size)
            / u64::from(PACKET_THROTTLE_SCALE)) as u32;
        throttled.max(mtu)
    }

    /// Advances the drop counter and reports whether the next throttled
    /// unreliable command should be dropped.
    pub fn should_drop_unreliable(&mut self) -> bool {
        self.packet_throttle_counter += PACKET_THROTTLE_COUNTER;
        self.packet_throttle_counter %= PACKET_THROTTLE_SCALE;
        self.packet_throttle_counter > self.packet_throttle
    }

    /// Counts a reliable command handed to the socket.
    pub fn record_sent(&mut self) {
        self.packets_sent += 1;
    }

    /// Counts a reliable command whose retransmission timer expired.
    pub fn record_lost(&mut self) {
        self.packets_lost += 1;
    }

    /// Folds the current interval's loss ratio into the loss estimate.
    ///
    /// Does nothing until `PACKET_LOSS_INTERVAL` has elapsed since the last
    /// update and at least one reliable command was sent. Returns true when
    /// the estimate changed.
    pub fn update_packet_loss(&mut self, service_time: u32) -> bool {
        if self.packet_loss_epoch == 0 {
            self.packet_loss_epoch = service_time;
            return false;
        }
        if time_difference(service_time, self.packet_loss_epoch) < PACKET_LOSS_INTERVAL
            || self.packets_sent == 0
        {
            return false;
        }

        let measured = (u64::from(self.packets_lost) * u64::from(PACKET_LOSS_SCALE)
            / u64::from(self.packets_sent)) as u32;

        self.packet_loss_variance -= self.packet_loss_variance / PACKET_LOSS_VARIANCE_GAIN;
        if measured >= self.packet_loss {
            let diff = measured - self.packet_loss;
            self.packet_loss += diff / PACKET_LOSS_GAIN;
            self.packet_loss_variance += diff / PACKET_LOSS_VARIANCE_GAIN;
        } else {
            let diff = self.packet_loss - measured;
            self.packet_loss -= diff / PACKET_LOSS_GAIN;
            self.packet_loss_variance += diff / PACKET_LOSS_VARIANCE_GAIN;
        }

        self.packet_loss_epoch = service_time;
        self.packets_sent = 0;
        self.packets_lost = 0;
        true
    }

    /// Sets the throttle ceiling, pulling the throttle down if needed.
    pub fn set_throttle_limit(&mut self, limit: u32) {
        self.packet_throttle_limit = limit;
        if self.packet_throttle > limit {
            self.packet_throttle = limit;
        }
    }

    /// Smoothed round-trip time in milliseconds.
    pub fn round_trip_time(&self) -> u32 {
        self.round_trip_time
    }

    /// Round-trip time variance in milliseconds.
    pub fn round_trip_time_variance(&self) -> u32 {
        self.round_trip_time_variance
    }

    /// Current throttle.
    pub fn packet_throttle(&self) -> u32 {
        self.packet_throttle
    }

    /// Current throttle ceiling.
    pub fn packet_throttle_limit(&self) -> u32 {
        self.packet_throttle_limit
    }

    /// Throttle interval in milliseconds.
    pub fn packet_throttle_interval(&self) -> u32 {
        self.packet_throttle_interval
    }

    /// Throttle acceleration.
    pub fn packet_throttle_acceleration(&self) -> u32 {
        self.packet_throttle_acceleration
    }

    /// Throttle deceleration.
    pub fn packet_throttle_deceleration(&self) -> u32 {
        self.packet_throttle_deceleration
    }

    /// Smoothed packet loss as a fraction of `PACKET_LOSS_SCALE`.
    pub fn packet_loss(&self) -> u32 {
        self.packet_loss
    }

    /// Packet loss variance.
    pub fn packet_loss_variance(&self) -> u32 {
        self.packet_loss_variance
    }
}
