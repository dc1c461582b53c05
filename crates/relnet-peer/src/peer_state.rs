/// Peer connection state machine.
///
/// Tracks the lifecycle of a peer slot from the first handshake command
/// through active communication to teardown. The discriminants are the
/// values reported to applications and are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(u8)]
pub enum PeerState {
    /// Slot is free
    #[default]
    Disconnected = 0,

    /// Client: sent Connect, waiting for VerifyConnect
    Connecting = 1,

    /// Server: received Connect, sent VerifyConnect, waiting for its acknowledgement
    AcknowledgingConnect = 2,

    /// Server: handshake complete, connect event not yet delivered
    ConnectionPending = 3,

    /// Client: handshake complete, connect event not yet delivered
    ConnectionSucceeded = 4,

    /// Connection is established
    Connected = 5,

    /// Disconnect requested once every queued command has been delivered
    DisconnectLater = 6,

    /// Disconnect sent, waiting for its acknowledgement
    Disconnecting = 7,

    /// Remote disconnect received, acknowledging it before going down
    AcknowledgingDisconnect = 8,

    /// Connection is dead; the disconnect event is waiting to be delivered
    Zombie = 9,
}

impl PeerState {
    /// Returns true if the connection is fully established, including a
    /// pending graceful disconnect.
    pub fn is_connected(&self) -> bool {
        matches!(self, PeerState::Connected | PeerState::DisconnectLater)
    }

    /// Returns true if the peer is in the middle of the handshake
    pub fn is_connecting(&self) -> bool {
        matches!(
            self,
            PeerState::Connecting
                | PeerState::AcknowledgingConnect
                | PeerState::ConnectionPending
                | PeerState::ConnectionSucceeded
        )
    }

    /// Returns true if the connection is being torn down
    pub fn is_disconnecting(&self) -> bool {
        matches!(
            self,
            PeerState::Disconnecting | PeerState::AcknowledgingDisconnect | PeerState::Zombie
        )
    }

    /// Returns true if the slot cannot accept datagrams: free or dead
    pub fn is_inactive(&self) -> bool {
        matches!(self, PeerState::Disconnected | PeerState::Zombie)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_values_are_stable() {
        assert_eq!(PeerState::Disconnected as u8, 0);
        assert_eq!(PeerState::ConnectionSucceeded as u8, 4);
        assert_eq!(PeerState::Zombie as u8, 9);
    }

    #[test]
    fn test_ordering_follows_lifecycle() {
        assert!(PeerState::Connecting < PeerState::ConnectionSucceeded);
        assert!(PeerState::ConnectionPending < PeerState::ConnectionSucceeded);
        assert!(PeerState::Zombie > PeerState::Connected);
    }

    #[test]
    fn test_predicates() {
        assert!(PeerState::DisconnectLater.is_connected());
        assert!(!PeerState::Disconnecting.is_connected());
        assert!(PeerState::AcknowledgingConnect.is_connecting());
        assert!(PeerState::AcknowledgingDisconnect.is_disconnecting());
        assert!(PeerState::Zombie.is_inactive());
        assert!(!PeerState::Connected.is_inactive());
    }
}
