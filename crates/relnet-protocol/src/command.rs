//! Protocol command types.
//!
//! Everything a peer says on the wire is a command: connecting, acknowledging,
//! pinging, carrying payload, disconnecting. Each command is a 4-byte
//! [`CommandHeader`] followed by a fixed-size body whose size is determined by
//! the opcode (see [`CommandKind::size`]). Payload-carrying commands are then
//! followed by `data_length` bytes of payload.
//! Several commands are aggregated into a single datagram.

/// Command byte flag: the receiver must acknowledge this command.
pub const COMMAND_FLAG_ACKNOWLEDGE: u8 = 1 << 7;
/// Command byte flag: the command belongs to the unsequenced delivery class.
pub const COMMAND_FLAG_UNSEQUENCED: u8 = 1 << 6;
/// Mask extracting the opcode from the command byte.
pub const COMMAND_MASK: u8 = 0x0F;

/// Size of the header shared by all commands.
pub const COMMAND_HEADER_SIZE: usize = 4;

/// Command opcodes.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Placeholder opcode; never valid on the wire
    None = 0,
    /// Acknowledges a reliable command
    Acknowledge = 1,
    /// Opens a connection
    Connect = 2,
    /// Accepts a connection
    VerifyConnect = 3,
    /// Closes a connection
    Disconnect = 4,
    /// Keep-alive
    Ping = 5,
    /// Reliable, ordered payload
    SendReliable = 6,
    /// Unreliable, sequenced payload
    SendUnreliable = 7,
    /// Fragment of a reliable payload
    SendFragment = 8,
    /// Unreliable payload with duplicate suppression only
    SendUnsequenced = 9,
    /// Announces the sender's bandwidth limits
    BandwidthLimit = 10,
    /// Announces the sender's throttle parameters
    ThrottleConfigure = 11,
    /// Fragment of an unreliable payload
    SendUnreliableFragment = 12,
}

impl CommandKind {
    /// Number of opcodes; any value at or above it is invalid.
    pub const COUNT: u8 = 13;

    /// Parses an opcode, masking out the command flags.
    pub fn from_command_byte(command: u8) -> Option<Self> {
        let kind = match command & COMMAND_MASK {
            0 => CommandKind::None,
            1 => CommandKind::Acknowledge,
            2 => CommandKind::Connect,
            3 => CommandKind::VerifyConnect,
            4 => CommandKind::Disconnect,
            5 => CommandKind::Ping,
            6 => CommandKind::SendReliable,
            7 => CommandKind::SendUnreliable,
            8 => CommandKind::SendFragment,
            9 => CommandKind::SendUnsequenced,
            10 => CommandKind::BandwidthLimit,
            11 => CommandKind::ThrottleConfigure,
            12 => CommandKind::SendUnreliableFragment,
            _ => return None,
        };
        Some(kind)
    }

    /// Exact wire size of the command, header included, without payload.
    pub const fn size(self) -> usize {
        match self {
            CommandKind::None => 0,
            CommandKind::Acknowledge => 8,
            CommandKind::Connect => 48,
            CommandKind::VerifyConnect => 44,
            CommandKind::Disconnect => 8,
            CommandKind::Ping => 4,
            CommandKind::SendReliable => 6,
            CommandKind::SendUnreliable => 8,
            CommandKind::SendFragment => 24,
            CommandKind::SendUnsequenced => 8,
            CommandKind::BandwidthLimit => 12,
            CommandKind::ThrottleConfigure => 16,
            CommandKind::SendUnreliableFragment => 24,
        }
    }
}

/// Header shared by every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CommandHeader {
    /// Opcode in the low nibble plus `COMMAND_FLAG_*` bits
    pub command: u8,
    /// Channel the command belongs to (`0xFF` for connection-level commands)
    pub channel_id: u8,
    /// Reliable sequence number on that channel
    pub reliable_sequence_number: u16,
}

impl CommandHeader {
    /// Opcode of the command, if valid.
    pub fn kind(&self) -> Option<CommandKind> {
        CommandKind::from_command_byte(self.command)
    }

    /// Returns true if the receiver must acknowledge the command.
    pub fn needs_acknowledge(&self) -> bool {
        self.command & COMMAND_FLAG_ACKNOWLEDGE != 0
    }

    /// Returns true if the command is flagged unsequenced.
    pub fn is_unsequenced(&self) -> bool {
        self.command & COMMAND_FLAG_UNSEQUENCED != 0
    }
}

/// Connection parameters exchanged by Connect and VerifyConnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConnectParameters {
    /// Slot index of the sender in its own peer table
    pub outgoing_peer_id: u16,
    /// Session id the sender expects on incoming datagrams
    pub incoming_session_id: u8,
    /// Session id the sender stamps on outgoing datagrams
    pub outgoing_session_id: u8,
    /// Proposed MTU
    pub mtu: u32,
    /// Proposed reliable window size
    pub window_size: u32,
    /// Requested channel count
    pub channel_count: u32,
    /// Sender's incoming bandwidth in bytes/sec (0 = unlimited)
    pub incoming_bandwidth: u32,
    /// Sender's outgoing bandwidth in bytes/sec (0 = unlimited)
    pub outgoing_bandwidth: u32,
    /// Throttle measurement interval in milliseconds
    pub packet_throttle_interval: u32,
    /// Throttle acceleration
    pub packet_throttle_acceleration: u32,
    /// Throttle deceleration
    pub packet_throttle_deceleration: u32,
    /// Random nonce identifying the connection attempt
    pub connect_id: u32,
}

/// Body shared by both fragment commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FragmentHeader {
    /// Sequence number of the first fragment of the packet
    pub start_sequence_number: u16,
    /// Length of this fragment's payload
    pub data_length: u16,
    /// Number of fragments the packet was split into
    pub fragment_count: u32,
    /// Index of this fragment
    pub fragment_number: u32,
    /// Length of the whole packet
    pub total_length: u32,
    /// Offset of this fragment in the packet
    pub fragment_offset: u32,
}

/// Opcode-specific part of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCommand {
    /// Acknowledges a reliable command
    Acknowledge {
        /// Sequence number being acknowledged
        received_reliable_sequence_number: u16,
        /// Low 16 bits of the acknowledged datagram's sent time
        received_sent_time: u16,
    },
    /// Opens a connection
    Connect {
        /// Proposed parameters
        parameters: ConnectParameters,
        /// Application data surfaced with the connect event
        data: u32,
    },
    /// Accepts a connection with the negotiated parameters
    VerifyConnect(ConnectParameters),
    /// Closes a connection
    Disconnect {
        /// Application data surfaced with the disconnect event
        data: u32,
    },
    /// Keep-alive
    Ping,
    /// Reliable payload
    SendReliable {
        /// Payload length
        data_length: u16,
    },
    /// Unreliable sequenced payload
    SendUnreliable {
        /// Unreliable sequence number on the channel
        unreliable_sequence_number: u16,
        /// Payload length
        data_length: u16,
    },
    /// Fragment of a reliable payload
    SendFragment(FragmentHeader),
    /// Unsequenced payload
    SendUnsequenced {
        /// Group used for duplicate suppression
        unsequenced_group: u16,
        /// Payload length
        data_length: u16,
    },
    /// Bandwidth announcement
    BandwidthLimit {
        /// Sender's incoming bandwidth in bytes/sec
        incoming_bandwidth: u32,
        /// Sender's outgoing bandwidth in bytes/sec
        outgoing_bandwidth: u32,
    },
    /// Throttle parameter announcement
    ThrottleConfigure {
        /// Throttle measurement interval in milliseconds
        packet_throttle_interval: u32,
        /// Throttle acceleration
        packet_throttle_acceleration: u32,
        /// Throttle deceleration
        packet_throttle_deceleration: u32,
    },
    /// Fragment of an unreliable payload
    SendUnreliableFragment(FragmentHeader),
}

impl ProtocolCommand {
    /// Opcode of the body.
    pub fn kind(&self) -> CommandKind {
        match self {
            ProtocolCommand::Acknowledge { .. } => CommandKind::Acknowledge,
            ProtocolCommand::Connect { .. } => CommandKind::Connect,
            ProtocolCommand::VerifyConnect(_) => CommandKind::VerifyConnect,
            ProtocolCommand::Disconnect { .. } => CommandKind::Disconnect,
            ProtocolCommand::Ping => CommandKind::Ping,
            ProtocolCommand::SendReliable { .. } => CommandKind::SendReliable,
            ProtocolCommand::SendUnreliable { .. } => CommandKind::SendUnreliable,
            ProtocolCommand::SendFragment(_) => CommandKind::SendFragment,
            ProtocolCommand::SendUnsequenced { .. } => CommandKind::SendUnsequenced,
            ProtocolCommand::BandwidthLimit { .. } => CommandKind::BandwidthLimit,
            ProtocolCommand::ThrottleConfigure { .. } => CommandKind::ThrottleConfigure,
            ProtocolCommand::SendUnreliableFragment(_) => CommandKind::SendUnreliableFragment,
        }
    }

    /// Length of the payload trailing the fixed part (0 for control commands).
    pub fn data_length(&self) -> usize {
        match self {
            ProtocolCommand::SendReliable { data_length }
            | ProtocolCommand::SendUnreliable { data_length, .. }
            | ProtocolCommand::SendUnsequenced { data_length, .. } => *data_length as usize,
            ProtocolCommand::SendFragment(fragment)
            | ProtocolCommand::SendUnreliableFragment(fragment) => fragment.data_length as usize,
            _ => 0,
        }
    }
}

/// A complete command: header plus body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Command {
    /// Shared header
    pub header: CommandHeader,
    /// Opcode-specific body
    pub body: ProtocolCommand,
}

impl Command {
    /// Builds a command whose opcode is taken from `body`.
    ///
    /// `flags` are `COMMAND_FLAG_*` bits; the reliable sequence number is
    /// assigned later, when the command is queued on a peer.
    pub fn new(body: ProtocolCommand, flags: u8, channel_id: u8) -> Self {
        Self {
            header: CommandHeader {
                command: body.kind() as u8 | flags,
                channel_id,
                reliable_sequence_number: 0,
            },
            body,
        }
    }

    /// Opcode of the command.
    pub fn kind(&self) -> CommandKind {
        self.body.kind()
    }

    /// Wire size of the fixed part.
    pub fn size(&self) -> usize {
        self.kind().size()
    }

    /// Returns true if the receiver must acknowledge the command.
    pub fn needs_acknowledge(&self) -> bool {
        self.header.needs_acknowledge()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_masks_flags() {
        let byte = CommandKind::SendUnsequenced as u8 | COMMAND_FLAG_UNSEQUENCED;
        assert_eq!(CommandKind::from_command_byte(byte), Some(CommandKind::SendUnsequenced));

        let byte = CommandKind::Connect as u8 | COMMAND_FLAG_ACKNOWLEDGE;
        assert_eq!(CommandKind::from_command_byte(byte), Some(CommandKind::Connect));
    }

    #[test]
    fn test_out_of_range_opcodes() {
        assert_eq!(CommandKind::from_command_byte(CommandKind::COUNT), None);
        assert_eq!(CommandKind::from_command_byte(0x0F), None);
    }

    #[test]
    fn test_size_table() {
        let sizes = [
            (CommandKind::Acknowledge, 8),
            (CommandKind::Connect, 48),
            (CommandKind::VerifyConnect, 44),
            (CommandKind::Disconnect, 8),
            (CommandKind::Ping, 4),
            (CommandKind::SendReliable, 6),
            (CommandKind::SendUnreliable, 8),
            (CommandKind::SendFragment, 24),
            (CommandKind::SendUnsequenced, 8),
            (CommandKind::BandwidthLimit, 12),
            (CommandKind::ThrottleConfigure, 16),
            (CommandKind::SendUnreliableFragment, 24),
        ];
        for (kind, size) in sizes {
            assert_eq!(kind.size(), size, "{:?}", kind);
        }
    }

    #[test]
    fn test_command_new_sets_opcode_and_flags() {
        let command = Command::new(ProtocolCommand::Ping, COMMAND_FLAG_ACKNOWLEDGE, 0xFF);
        assert_eq!(command.header.kind(), Some(CommandKind::Ping));
        assert!(command.needs_acknowledge());
        assert!(!command.header.is_unsequenced());
        assert_eq!(command.size(), 4);
    }
}
