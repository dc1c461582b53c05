//! Entries of the per-peer command queues.
//!
//! A peer keeps outgoing commands waiting to be sent, reliable commands sent
//! but not yet acknowledged, acknowledgements owed to the remote side, and
//! received commands waiting for ordering or delivery.

use relnet_core::packet::{Packet, PacketFlags};
use relnet_protocol::command::{Command, CommandHeader, CommandKind};

use crate::fragment_buffer::FragmentBuffer;

/// A command queued for transmission, possibly carrying a slice of a packet.
#[derive(Debug, Clone)]
pub struct OutgoingCommand {
    /// The command as it goes on the wire
    pub command: Command,
    /// Packet the payload is taken from, if any
    pub packet: Option<Packet>,
    /// Offset of the payload in `packet`
    pub fragment_offset: u32,
    /// Length of the payload
    pub fragment_length: u16,
    /// Reliable sequence number assigned when queued
    pub reliable_sequence_number: u16,
    /// Unreliable sequence number assigned when queued
    pub unreliable_sequence_number: u16,
    /// Number of times the command went out
    pub send_attempts: u32,
    /// Service time of the last transmission
    pub sent_time: u32,
    /// Retransmission timeout; doubles on every loss
    pub round_trip_timeout: u32,
    /// Retransmission timeout beyond which the peer may be dropped
    pub round_trip_timeout_limit: u32,
}

impl OutgoingCommand {
    /// Wraps `command` and an optional payload slice for queueing.
    pub fn new(command: Command, packet: Option<Packet>, fragment_offset: u32, fragment_length: u16) -> Self {
        Self {
            command,
            packet,
            fragment_offset,
            fragment_length,
            reliable_sequence_number: 0,
            unreliable_sequence_number: 0,
            send_attempts: 0,
            sent_time: 0,
            round_trip_timeout: 0,
            round_trip_timeout_limit: 0,
        }
    }

    /// Payload bytes carried by this command.
    pub fn payload(&self) -> &[u8] {
        match &self.packet {
            Some(packet) => {
                let start = self.fragment_offset as usize;
                &packet.data()[start..start + self.fragment_length as usize]
            }
            None => &[],
        }
    }

    /// Size of the command on the wire, payload included.
    pub fn wire_size(&self) -> usize {
        self.command.size() + self.fragment_length as usize
    }
}

/// A received command waiting for ordering or delivery.
#[derive(Debug)]
pub struct IncomingCommand {
    /// Reliable sequence number on the channel
    pub reliable_sequence_number: u16,
    /// Unreliable sequence number (or start sequence of an unreliable fragment run)
    pub unreliable_sequence_number: u16,
    /// The command that created the entry
    pub command: Command,
    /// Delivery flags of the resulting packet
    pub flags: PacketFlags,
    /// Packet payload; preallocated to the full length for fragmented packets
    pub data: Vec<u8>,
    /// Reassembly state, for fragmented packets
    pub fragments: Option<FragmentBuffer>,
}

impl IncomingCommand {
    /// Opcode of the command that created the entry.
    pub fn kind(&self) -> CommandKind {
        self.command.kind()
    }

    /// Number of fragments, or 0 for a whole packet.
    pub fn fragment_count(&self) -> u32 {
        self.fragments.as_ref().map_or(0, FragmentBuffer::fragment_count)
    }

    /// Fragments still missing, or 0 for a whole packet.
    pub fn fragments_remaining(&self) -> u32 {
        self.fragments.as_ref().map_or(0, FragmentBuffer::fragments_remaining)
    }

    /// Returns true once the payload is complete.
    pub fn is_complete(&self) -> bool {
        self.fragments_remaining() == 0
    }
}

/// An acknowledgement owed to the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Acknowledgement {
    /// Low 16 bits of the sent time of the datagram that carried the command
    pub sent_time: u16,
    /// Header of the acknowledged command
    pub command: CommandHeader,
}

impl Acknowledgement {
    /// Returns true if the acknowledged command was a Disconnect.
    pub fn acknowledges_disconnect(&self) -> bool {
        self.command.kind() == Some(CommandKind::Disconnect)
    }
}
