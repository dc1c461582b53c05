//! Per-channel sequencing and reliable window accounting.
//!
//! Every channel numbers its reliable commands independently and, between
//! two reliable commands, numbers unreliable ones. The 16-bit reliable
//! sequence space is cut into `RELIABLE_WINDOWS` windows of
//! `RELIABLE_WINDOW_SIZE` numbers each:
//!
//! - on the sending side, a window may only be entered once the windows ahead
//!   of it have drained, so the receiver never sees two generations of the
//!   same sequence number in flight;
//! - on the receiving side, commands are only accepted within
//!   `FREE_RELIABLE_WINDOWS - 1` windows of the next expected number.

use std::collections::VecDeque;

use relnet_core::constants::{FREE_RELIABLE_WINDOWS, RELIABLE_WINDOWS, RELIABLE_WINDOW_SIZE};

use crate::command_queue::IncomingCommand;

/// Where an incoming sequence number falls relative to the receive window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    /// Inside the window; the command may be queued
    Inside,
    /// Already delivered; a retransmission or duplicate
    Stale,
    /// Too far ahead; the sender ignored the window
    Violation,
}

/// Sequencing state of one channel.
#[derive(Debug, Default)]
pub struct Channel {
    /// Last reliable sequence number assigned on send
    pub outgoing_reliable_sequence_number: u16,
    /// Last unreliable sequence number assigned since the last reliable one
    pub outgoing_unreliable_sequence_number: u16,
    /// One bit per window that has reliable commands in flight
    pub used_reliable_windows: u16,
    /// Reliable commands in flight, per window
    pub reliable_windows: [u16; RELIABLE_WINDOWS as usize],
    /// Last reliable sequence number delivered in order
    pub incoming_reliable_sequence_number: u16,
    /// Last unreliable sequence number delivered since that reliable one
    pub incoming_unreliable_sequence_number: u16,
    /// Reliable commands received out of order, sorted by sequence number
    pub incoming_reliable_commands: VecDeque<IncomingCommand>,
    /// Unreliable and unsequenced commands waiting for their reliable predecessor
    pub incoming_unreliable_commands: VecDeque<IncomingCommand>,
}

impl Channel {
    /// Creates a channel with all sequence numbers at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Classifies an incoming reliable sequence number.
    pub fn window_position(&self, sequence_number: u16) -> WindowPosition {
        let incoming = self.incoming_reliable_sequence_number;
        let mut reliable_window = sequence_number / RELIABLE_WINDOW_SIZE;
        let current_window = incoming / RELIABLE_WINDOW_SIZE;
        if sequence_number < incoming {
            reliable_window += RELIABLE_WINDOWS;
        }

        if reliable_window >= current_window && reliable_window < current_window + FREE_RELIABLE_WINDOWS - 1 {
            WindowPosition::Inside
        } else if sequence_number.wrapping_sub(incoming) >= 0x8000 {
            WindowPosition::Stale
        } else {
            WindowPosition::Violation
        }
    }

    /// Returns true if a reliable command numbered `sequence_number` may not
    /// start its window yet.
    ///
    /// Only the first command of a window is checked: it is held back while
    /// the previous window is full or any window in the range the receiver
    /// could still confuse with this one has commands in flight.
    pub fn is_window_blocked(&self, sequence_number: u16) -> bool {
        if sequence_number % RELIABLE_WINDOW_SIZE != 0 {
            return false;
        }
        let window = sequence_number / RELIABLE_WINDOW_SIZE;
        let previous = (window + RELIABLE_WINDOWS - 1) % RELIABLE_WINDOWS;
        if self.reliable_windows[previous as usize] >= RELIABLE_WINDOW_SIZE {
            return true;
        }

        let span = (1u32 << (FREE_RELIABLE_WINDOWS + 2)) - 1;
        let mask = (span << window) | (span >> (u32::from(RELIABLE_WINDOWS) - u32::from(window)));
        u32::from(self.used_reliable_windows) & mask != 0
    }

    /// Accounts for a reliable command entering flight.
    pub fn mark_window_used(&mut self, sequence_number: u16) {
        let window = sequence_number / RELIABLE_WINDOW_SIZE;
        self.used_reliable_windows |= 1 << window;
        self.reliable_windows[window as usize] += 1;
    }

    /// Accounts for a reliable command leaving flight.
    pub fn release_window(&mut self, sequence_number: u16) {
        let window = (sequence_number / RELIABLE_WINDOW_SIZE) as usize;
        if self.reliable_windows[window] > 0 {
            self.reliable_windows[window] -= 1;
            if self.reliable_windows[window] == 0 {
                self.used_reliable_windows &= !(1 << window);
            }
        }
    }
}
