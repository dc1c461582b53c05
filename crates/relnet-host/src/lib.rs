#![warn(missing_docs)]

//! relnet-host: the host engine driving relnet peers over a datagram socket.
//!
//! A [`Host`] owns one socket and a fixed table of peer slots. Applications
//! call [`Host::service`] in a loop and react to the [`Event`]s it returns.

/// Events surfaced to the application.
pub mod event_types;
/// The host engine.
pub mod host;
/// Simulated packet loss and latency.
pub mod simulator;
/// UDP transport.
pub mod socket;
/// Time sources for the host.
pub mod time;

pub use event_types::{Event, EventKind};
pub use host::{Host, HostStatistics};
pub use simulator::NetworkSimulator;
pub use socket::UdpTransport;
pub use time::{Clock, ManualClock, SystemClock};
