//! Fragment reassembly bookkeeping.
//!
//! A packet larger than the MTU travels as a run of fragment commands that
//! share a start sequence number. The receiver allocates the whole packet
//! when the first fragment of a run arrives and copies every fragment into
//! place at its offset; this buffer records which fragment numbers have
//! been seen so duplicates are ignored and completion can be detected.
//!
//! # Design
//!
//! Received fragment numbers are tracked in a bitset of 32-bit words, one
//! bit per fragment, allocated for exactly `fragment_count` fragments.

/// Tracks which fragments of a packet have arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentBuffer {
    /// Number of fragments the packet was split into
    fragment_count: u32,
    /// Fragments not yet received
    fragments_remaining: u32,
    /// One bit per fragment number
    received: Vec<u32>,
}

impl FragmentBuffer {
    /// Creates an empty tracker for `fragment_count` fragments.
    pub fn new(fragment_count: u32) -> Self {
        Self {
            fragment_count,
            fragments_remaining: fragment_count,
            received: vec![0; fragment_count.div_ceil(32) as usize],
        }
    }

    /// Records `fragment_number` as received.
    ///
    /// Returns false, changing nothing, if it was already received or is out
    /// of range.
    pub fn mark(&mut self, fragment_number: u32) -> bool {
        if fragment_number >= self.fragment_count {
            return false;
        }
        let word = &mut self.received[(fragment_number / 32) as usize];
        let bit = 1u32 << (fragment_number % 32);
        if *word & bit != 0 {
            return false;
        }
        *word |= bit;
        self.fragments_remaining -= 1;
        true
    }

    /// Returns true if `fragment_number` has been received.
    pub fn contains(&self, fragment_number: u32) -> bool {
        fragment_number < self.fragment_count
            && self.received[(fragment_number / 32) as usize] & (1u32 << (fragment_number % 32)) != 0
    }

    /// Number of fragments the packet was split into.
    pub fn fragment_count(&self) -> u32 {
        self.fragment_count
    }

    /// Fragments still missing.
    pub fn fragments_remaining(&self) -> u32 {
        self.fragments_remaining
    }

    /// Returns true once every fragment has arrived.
    pub fn is_complete(&self) -> bool {
        self.fragments_remaining == 0
    }
}

/// Copies one fragment's bytes into the reassembly buffer.
///
/// The copy is clamped to the end of `packet`; callers validate that
/// `offset` lies inside it.
pub fn copy_fragment(packet: &mut [u8], offset: usize, fragment: &[u8]) {
    let end = (offset + fragment.len()).min(packet.len());
    if offset < end {
        packet[offset..end].copy_from_slice(&fragment[..end - offset]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_buffer_is_empty() {
        let buffer = FragmentBuffer::new(40);
        assert_eq!(buffer.fragment_count(), 40);
        assert_eq!(buffer.fragments_remaining(), 40);
        assert!(!buffer.is_complete());
        assert!(!buffer.contains(0));
    }

    #[test]
    fn test_marks_each_fragment_once() {
        let mut buffer = FragmentBuffer::new(3);
        assert!(buffer.mark(1));
        assert!(!buffer.mark(1));
        assert_eq!(buffer.fragments_remaining(), 2);
        assert!(buffer.mark(0));
        assert!(buffer.mark(2));
        assert!(buffer.is_complete());
    }

    #[test]
    fn test_out_of_range_fragment_is_ignored() {
        let mut buffer = FragmentBuffer::new(2);
        assert!(!buffer.mark(2));
        assert!(!buffer.contains(2));
        assert_eq!(buffer.fragments_remaining(), 2);
    }

    #[test]
    fn test_word_boundaries() {
        let mut buffer = FragmentBuffer::new(65);
        assert!(buffer.mark(31));
        assert!(buffer.mark(32));
        assert!(buffer.mark(64));
        assert!(buffer.contains(31) && buffer.contains(32) && buffer.contains(64));
        assert!(!buffer.contains(33));
    }

    #[test]
    fn test_copy_fragment_places_and_clamps() {
        let mut packet = vec![0u8; 6];
        copy_fragment(&mut packet, 2, &[1, 2]);
        assert_eq!(packet, [0, 0, 1, 2, 0, 0]);
        copy_fragment(&mut packet, 4, &[7, 8, 9]);
        assert_eq!(packet, [0, 0, 1, 2, 7, 8]);
        copy_fragment(&mut packet, 6, &[5]);
        assert_eq!(packet, [0, 0, 1, 2, 7, 8]);
    }
}
