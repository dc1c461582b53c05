//! Command decoding.
//!
//! Parses one command at a time from a datagram's command stream. Any
//! structural problem (unknown opcode, truncated fixed part, payload running
//! past the end of the datagram) is reported as `InvalidData`; the caller is
//! expected to discard the rest of the datagram.

use std::io::{self, Cursor};

use byteorder::{BigEndian, ReadBytesExt};

use crate::command::{
    Command, CommandHeader, CommandKind, ConnectParameters, FragmentHeader, ProtocolCommand,
};

/// A decoded command and the payload bytes that follow it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedCommand<'a> {
    /// The command
    pub command: Command,
    /// Payload borrowed from the datagram (empty for control commands)
    pub payload: &'a [u8],
}

/// Deserializes commands from network bytes.
pub struct CommandDecoder;

impl CommandDecoder {
    /// Decodes a single command, and its payload, from a cursor.
    pub fn decode_command<'a>(cursor: &mut Cursor<&'a [u8]>) -> io::Result<DecodedCommand<'a>> {
        let data: &'a [u8] = *cursor.get_ref();
        let start = cursor.position() as usize;
        let remaining = data.len().saturating_sub(start);

        let command_byte = *data
            .get(start)
            .ok_or_else(|| invalid_data("Command stream ended unexpectedly".to_string()))?;
        let kind = match CommandKind::from_command_byte(command_byte) {
            Some(CommandKind::None) | None => {
                return Err(invalid_data(format!("Unknown command type: {}", command_byte)));
            }
            Some(kind) => kind,
        };
        if kind.size() > remaining {
            return Err(invalid_data(format!(
                "Command {:?} needs {} bytes, {} left",
                kind,
                kind.size(),
                remaining
            )));
        }

        let header = CommandHeader {
            command: cursor.read_u8()?,
            channel_id: cursor.read_u8()?,
            reliable_sequence_number: cursor.read_u16::<BigEndian>()?,
        };

        let body = match kind {
            CommandKind::Acknowledge => ProtocolCommand::Acknowledge {
                received_reliable_sequence_number: cursor.read_u16::<BigEndian>()?,
                received_sent_time: cursor.read_u16::<BigEndian>()?,
            },
            CommandKind::Connect => {
                let parameters = Self::decode_parameters(cursor)?;
                let data = cursor.read_u32::<BigEndian>()?;
                ProtocolCommand::Connect { parameters, data }
            }
            CommandKind::VerifyConnect => {
                ProtocolCommand::VerifyConnect(Self::decode_parameters(cursor)?)
            }
            CommandKind::Disconnect => {
                ProtocolCommand::Disconnect { data: cursor.read_u32::<BigEndian>()? }
            }
            CommandKind::Ping => ProtocolCommand::Ping,
            CommandKind::SendReliable => {
                ProtocolCommand::SendReliable { data_length: cursor.read_u16::<BigEndian>()? }
            }
            CommandKind::SendUnreliable => ProtocolCommand::SendUnreliable {
                unreliable_sequence_number: cursor.read_u16::<BigEndian>()?,
                data_length: cursor.read_u16::<BigEndian>()?,
            },
            CommandKind::SendUnsequenced => ProtocolCommand::SendUnsequenced {
                unsequenced_group: cursor.read_u16::<BigEndian>()?,
                data_length: cursor.read_u16::<BigEndian>()?,
            },
            CommandKind::SendFragment => {
                ProtocolCommand::SendFragment(Self::decode_fragment(cursor)?)
            }
            CommandKind::SendUnreliableFragment => {
                ProtocolCommand::SendUnreliableFragment(Self::decode_fragment(cursor)?)
            }
            CommandKind::BandwidthLimit => ProtocolCommand::BandwidthLimit {
                incoming_bandwidth: cursor.read_u32::<BigEndian>()?,
                outgoing_bandwidth: cursor.read_u32::<BigEndian>()?,
            },
            CommandKind::ThrottleConfigure => ProtocolCommand::ThrottleConfigure {
                packet_throttle_interval: cursor.read_u32::<BigEndian>()?,
                packet_throttle_acceleration: cursor.read_u32::<BigEndian>()?,
                packet_throttle_deceleration: cursor.read_u32::<BigEndian>()?,
            },
            CommandKind::None => {
                return Err(invalid_data("Unknown command type: 0".to_string()));
            }
        };

        let payload_start = cursor.position() as usize;
        let payload_end = payload_start + body.data_length();
        if payload_end > data.len() {
            return Err(invalid_data(format!(
                "Payload of {} bytes overruns the datagram",
                body.data_length()
            )));
        }
        cursor.set_position(payload_end as u64);

        Ok(DecodedCommand {
            command: Command { header, body },
            payload: &data[payload_start..payload_end],
        })
    }

    fn decode_parameters(cursor: &mut Cursor<&[u8]>) -> io::Result<ConnectParameters> {
        Ok(ConnectParameters {
            outgoing_peer_id: cursor.read_u16::<BigEndian>()?,
            incoming_session_id: cursor.read_u8()?,
            outgoing_session_id: cursor.read_u8()?,
            mtu: cursor.read_u32::<BigEndian>()?,
            window_size: cursor.read_u32::<BigEndian>()?,
            channel_count: cursor.read_u32::<BigEndian>()?,
            incoming_bandwidth: cursor.read_u32::<BigEndian>()?,
            outgoing_bandwidth: cursor.read_u32::<BigEndian>()?,
            packet_throttle_interval: cursor.read_u32::<BigEndian>()?,
            packet_throttle_acceleration: cursor.read_u32::<BigEndian>()?,
            packet_throttle_deceleration: cursor.read_u32::<BigEndian>()?,
            connect_id: cursor.read_u32::<BigEndian>()?,
        })
    }

    fn decode_fragment(cursor: &mut Cursor<&[u8]>) -> io::Result<FragmentHeader> {
        Ok(FragmentHeader {
            start_sequence_number: cursor.read_u16::<BigEndian>()?,
            data_length: cursor.read_u16::<BigEndian>()?,
            fragment_count: cursor.read_u32::<BigEndian>()?,
            fragment_number: cursor.read_u32::<BigEndian>()?,
            total_length: cursor.read_u32::<BigEndian>()?,
            fragment_offset: cursor.read_u32::<BigEndian>()?,
        })
    }
}

fn invalid_data(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}
