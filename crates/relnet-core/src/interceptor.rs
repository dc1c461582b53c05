//! Raw datagram interception.
//!
//! An interceptor sees every datagram at the socket boundary: incoming ones
//! before the header is parsed, outgoing ones after the header, commands,
//! compression and checksum have been written. It can inspect the bytes,
//! rewrite them in place, or consume the datagram so the host never processes
//! (or never sends) it.

use std::net::SocketAddr;

/// What the host does with a datagram after an interceptor has seen it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Keep processing the (possibly modified) datagram.
    Pass,
    /// The interceptor consumed the datagram; the host drops it silently.
    Consume,
}

/// Hook invoked by the host on raw datagrams.
///
/// # Examples
/// ```
/// use std::net::SocketAddr;
/// use relnet_core::interceptor::{Interceptor, Verdict};
///
/// struct DatagramCounter(usize);
///
/// impl Interceptor for DatagramCounter {
///     fn on_receive(&mut self, _addr: &SocketAddr, _datagram: &mut [u8]) -> Verdict {
///         self.0 += 1;
///         Verdict::Pass
///     }
/// }
/// ```
pub trait Interceptor: Send {
    /// Called for each received datagram before the host decodes it.
    fn on_receive(&mut self, addr: &SocketAddr, datagram: &mut [u8]) -> Verdict;

    /// Called for each outgoing datagram right before it reaches the socket.
    ///
    /// The default implementation passes every datagram through unchanged.
    fn on_send(&mut self, _addr: &SocketAddr, _datagram: &mut Vec<u8>) -> Verdict {
        Verdict::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8080)
    }

    struct BlockPort(u16);

    impl Interceptor for BlockPort {
        fn on_receive(&mut self, addr: &SocketAddr, _datagram: &mut [u8]) -> Verdict {
            if addr.port() == self.0 {
                Verdict::Consume
            } else {
                Verdict::Pass
            }
        }
    }

    #[test]
    fn test_default_send_passes() {
        let mut interceptor = BlockPort(8080);
        let mut datagram = vec![1, 2, 3];

        assert_eq!(interceptor.on_receive(&addr(), &mut datagram), Verdict::Consume);
        assert_eq!(interceptor.on_send(&addr(), &mut datagram), Verdict::Pass);
        assert_eq!(datagram, vec![1, 2, 3]);
    }

    struct Scrambler;

    impl Interceptor for Scrambler {
        fn on_receive(&mut self, _addr: &SocketAddr, datagram: &mut [u8]) -> Verdict {
            datagram.iter_mut().for_each(|byte| *byte ^= 0x5A);
            Verdict::Pass
        }

        fn on_send(&mut self, _addr: &SocketAddr, datagram: &mut Vec<u8>) -> Verdict {
            datagram.iter_mut().for_each(|byte| *byte ^= 0x5A);
            Verdict::Pass
        }
    }

    #[test]
    fn test_rewriting_round_trip() {
        let mut interceptor = Scrambler;
        let mut datagram = vec![0x00, 0x0F, 0xFF];
        let original = datagram.clone();

        interceptor.on_send(&addr(), &mut datagram);
        assert_ne!(datagram, original);

        interceptor.on_receive(&addr(), &mut datagram);
        assert_eq!(datagram, original);
    }
}
