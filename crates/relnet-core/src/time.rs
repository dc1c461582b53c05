//! Wrapping millisecond arithmetic.
//!
//! Service time is a `u32` millisecond counter that is allowed to wrap. Two
//! timestamps are compared through their wrapping difference: a difference
//! larger than [`TIME_OVERFLOW`] (one day) means the subtraction went
//! "backwards" through the wrap, so the operands are swapped.

/// Differences at or above this many milliseconds are treated as negative.
pub const TIME_OVERFLOW: u32 = 86_400_000;

/// Returns true if `a` happens before `b`.
#[inline]
pub fn time_less(a: u32, b: u32) -> bool {
    a.wrapping_sub(b) >= TIME_OVERFLOW
}

/// Returns true if `a` happens after `b`.
#[inline]
pub fn time_greater(a: u32, b: u32) -> bool {
    b.wrapping_sub(a) >= TIME_OVERFLOW
}

/// Returns true if `a` happens before or at `b`.
#[inline]
pub fn time_less_equal(a: u32, b: u32) -> bool {
    !time_greater(a, b)
}

/// Returns true if `a` happens after or at `b`.
#[inline]
pub fn time_greater_equal(a: u32, b: u32) -> bool {
    !time_less(a, b)
}

/// Absolute distance between two timestamps, accounting for wrap-around.
#[inline]
pub fn time_difference(a: u32, b: u32) -> u32 {
    if a.wrapping_sub(b) >= TIME_OVERFLOW {
        b.wrapping_sub(a)
    } else {
        a.wrapping_sub(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_without_wrap() {
        assert!(time_less(10, 20));
        assert!(time_greater(20, 10));
        assert!(time_less_equal(10, 10));
        assert!(time_greater_equal(10, 10));
        assert_eq!(time_difference(20, 10), 10);
        assert_eq!(time_difference(10, 20), 10);
    }

    #[test]
    fn test_ordering_across_wrap() {
        let before = u32::MAX - 5;
        let after = 4;
        assert!(time_less(before, after));
        assert!(time_greater(after, before));
        assert_eq!(time_difference(after, before), 10);
        assert_eq!(time_difference(before, after), 10);
    }
}
