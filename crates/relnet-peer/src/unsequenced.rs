//! Unsequenced packet duplicate detection using a sliding window.
//!
//! Unsequenced packets carry no ordering, only a 16-bit group number that
//! the sender increments per packet. The receiver remembers which groups it
//! has seen within a window of `UNSEQUENCED_WINDOW_SIZE` groups so network
//! duplicates are delivered once.
//!
//! # Design
//!
//! The window is 1024 bits (32 u32 words) based at a multiple of the window
//! size:
//! - a group inside the current window is accepted unless its bit is set;
//! - a group in a later window (up to `FREE_UNSEQUENCED_WINDOWS` windows
//!   ahead) moves the base to that window and clears every bit;
//! - anything else is behind the window, or implausibly far ahead, and is
//!   dropped.
//!
//! # Wrapping Arithmetic
//!
//! Group numbers wrap at 65536. A group numerically below the base is read
//! as having wrapped, which is what makes "far ahead" and "behind" the same
//! test.

use relnet_core::constants::{FREE_UNSEQUENCED_WINDOWS, UNSEQUENCED_WINDOW_SIZE};

const WINDOW_WORDS: usize = (UNSEQUENCED_WINDOW_SIZE / 32) as usize;

/// State for tracking unsequenced packet duplicates using a sliding window.
#[derive(Debug, Clone)]
pub struct UnsequencedState {
    /// Incoming unsequenced group base (start of sliding window)
    incoming_unsequenced_group: u16,
    /// One bit per group of the current window
    unsequenced_window: [u32; WINDOW_WORDS],
    /// Last group number handed out for sending
    outgoing_unsequenced_group: u16,
}

impl Default for UnsequencedState {
    fn default() -> Self {
        Self::new()
    }
}

impl UnsequencedState {
    /// Creates a new unsequenced state with an empty window.
    pub fn new() -> Self {
        Self { incoming_unsequenced_group: 0, unsequenced_window: [0; WINDOW_WORDS], outgoing_unsequenced_group: 0 }
    }

    /// Advances and returns the outgoing group number. The first group is 1.
    pub fn next_outgoing_group(&mut self) -> u16 {
        self.outgoing_unsequenced_group = self.outgoing_unsequenced_group.wrapping_add(1);
        self.outgoing_unsequenced_group
    }

    /// Returns the current incoming unsequenced group (window base).
    pub fn incoming_group(&self) -> u16 {
        self.incoming_unsequenced_group
    }

    /// Returns the last outgoing unsequenced group.
    pub fn outgoing_group(&self) -> u16 {
        self.outgoing_unsequenced_group
    }

    /// Checks an incoming group, sliding the window if the group lies ahead.
    ///
    /// Returns the group's index within the window if it should be delivered,
    /// or `None` if it is a duplicate or outside the acceptable range. The
    /// group is only recorded by [`mark_received`](Self::mark_received), once
    /// its packet has actually been queued.
    pub fn accept(&mut self, group: u16) -> Option<usize> {
        let index = u32::from(group) % UNSEQUENCED_WINDOW_SIZE;
        let base = u32::from(self.incoming_unsequenced_group);
        let mut unwrapped = u32::from(group);
        if unwrapped < base {
            unwrapped += 0x10000;
        }
        if unwrapped >= base + FREE_UNSEQUENCED_WINDOWS * UNSEQUENCED_WINDOW_SIZE {
            return None;
        }

        let window_base = ((unwrapped & 0xFFFF) - index) as u16;
        if window_base != self.incoming_unsequenced_group {
            self.incoming_unsequenced_group = window_base;
            self.unsequenced_window = [0; WINDOW_WORDS];
        } else if self.is_marked(index as usize) {
            return None;
        }
        Some(index as usize)
    }

    /// Records the group at `index` of the current window as delivered.
    pub fn mark_received(&mut self, index: usize) {
        self.unsequenced_window[index / 32] |= 1 << (index % 32);
    }

    fn is_marked(&self, index: usize) -> bool {
        self.unsequenced_window[index / 32] & (1 << (index % 32)) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn receive(state: &mut UnsequencedState, group: u16) -> bool {
        match state.accept(group) {
            Some(index) => {
                state.mark_received(index);
                true
            }
            None => false,
        }
    }

    #[test]
    fn test_outgoing_groups_start_at_one() {
        let mut state = UnsequencedState::new();
        assert_eq!(state.next_outgoing_group(), 1);
        assert_eq!(state.next_outgoing_group(), 2);
        assert_eq!(state.outgoing_group(), 2);
    }

    #[test]
    fn test_duplicates_are_rejected() {
        let mut state = UnsequencedState::new();
        assert!(receive(&mut state, 1));
        assert!(!receive(&mut state, 1));
        assert!(receive(&mut state, 3));
        assert!(receive(&mut state, 2));
    }

    #[test]
    fn test_unmarked_group_is_not_remembered() {
        let mut state = UnsequencedState::new();
        assert!(state.accept(5).is_some());
        assert!(state.accept(5).is_some());
    }

    #[test]
    fn test_window_slides_forward() {
        let mut state = UnsequencedState::new();
        assert!(receive(&mut state, 10));
        assert!(receive(&mut state, 1500));
        assert_eq!(state.incoming_group(), 1024);
        assert!(!receive(&mut state, 1500));
        // The previous window is gone; group 10 is now behind
        assert!(!receive(&mut state, 10));
    }

    #[test]
    fn test_far_ahead_groups_are_dropped() {
        let mut state = UnsequencedState::new();
        assert!(!receive(&mut state, (FREE_UNSEQUENCED_WINDOWS * UNSEQUENCED_WINDOW_SIZE) as u16));
        assert_eq!(state.incoming_group(), 0);
        assert!(receive(&mut state, (FREE_UNSEQUENCED_WINDOWS * UNSEQUENCED_WINDOW_SIZE - 1) as u16));
    }

    #[test]
    fn test_wrapping_group_numbers() {
        let mut state = UnsequencedState::new();
        for group in [30000, 60000, 65000] {
            assert!(receive(&mut state, group));
        }
        assert_eq!(state.incoming_group(), 64512);
        assert!(receive(&mut state, 65535));
        assert!(receive(&mut state, 3));
        assert_eq!(state.incoming_group(), 0);
        assert!(!receive(&mut state, 3));
    }
}
