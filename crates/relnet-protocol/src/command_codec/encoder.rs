//! Command encoding.
//!
//! Writes the fixed part of a command. Payload bytes, when the command
//! carries any, are appended by the caller right after it.

use std::io::{self, Write};

use byteorder::{BigEndian, WriteBytesExt};

use crate::command::{Command, ConnectParameters, FragmentHeader, ProtocolCommand};

/// Serializes commands into bytes for transmission.
pub struct CommandEncoder;

impl CommandEncoder {
    /// Encodes the fixed part of `command` into the provided buffer (appends bytes).
    pub fn encode_command_into(buffer: &mut Vec<u8>, command: &Command) -> io::Result<()> {
        buffer.write_u8(command.header.command)?;
        buffer.write_u8(command.header.channel_id)?;
        buffer.write_u16::<BigEndian>(command.header.reliable_sequence_number)?;

        match &command.body {
            ProtocolCommand::Acknowledge { received_reliable_sequence_number, received_sent_time } => {
                buffer.write_u16::<BigEndian>(*received_reliable_sequence_number)?;
                buffer.write_u16::<BigEndian>(*received_sent_time)?;
            }
            ProtocolCommand::Connect { parameters, data } => {
                Self::encode_parameters(buffer, parameters)?;
                buffer.write_u32::<BigEndian>(*data)?;
            }
            ProtocolCommand::VerifyConnect(parameters) => {
                Self::encode_parameters(buffer, parameters)?;
            }
            ProtocolCommand::Disconnect { data } => {
                buffer.write_u32::<BigEndian>(*data)?;
            }
            ProtocolCommand::Ping => {}
            ProtocolCommand::SendReliable { data_length } => {
                buffer.write_u16::<BigEndian>(*data_length)?;
            }
            ProtocolCommand::SendUnreliable { unreliable_sequence_number, data_length } => {
                buffer.write_u16::<BigEndian>(*unreliable_sequence_number)?;
                buffer.write_u16::<BigEndian>(*data_length)?;
            }
            ProtocolCommand::SendUnsequenced { unsequenced_group, data_length } => {
                buffer.write_u16::<BigEndian>(*unsequenced_group)?;
                buffer.write_u16::<BigEndian>(*data_length)?;
            }
            ProtocolCommand::SendFragment(fragment)
            | ProtocolCommand::SendUnreliableFragment(fragment) => {
                Self::encode_fragment(buffer, fragment)?;
            }
            ProtocolCommand::BandwidthLimit { incoming_bandwidth, outgoing_bandwidth } => {
                buffer.write_u32::<BigEndian>(*incoming_bandwidth)?;
                buffer.write_u32::<BigEndian>(*outgoing_bandwidth)?;
            }
            ProtocolCommand::ThrottleConfigure {
                packet_throttle_interval,
                packet_throttle_acceleration,
                packet_throttle_deceleration,
            } => {
                buffer.write_u32::<BigEndian>(*packet_throttle_interval)?;
                buffer.write_u32::<BigEndian>(*packet_throttle_acceleration)?;
                buffer.write_u32::<BigEndian>(*packet_throttle_deceleration)?;
            }
        }

        Ok(())
    }

    /// Encodes `command` followed by its payload.
    pub fn encode_with_payload(
        buffer: &mut Vec<u8>,
        command: &Command,
        payload: &[u8],
    ) -> io::Result<()> {
        Self::encode_command_into(buffer, command)?;
        buffer.write_all(payload)
    }

    fn encode_parameters(buffer: &mut Vec<u8>, parameters: &ConnectParameters) -> io::Result<()> {
        buffer.write_u16::<BigEndian>(parameters.outgoing_peer_id)?;
        buffer.write_u8(parameters.incoming_session_id)?;
        buffer.write_u8(parameters.outgoing_session_id)?;
        buffer.write_u32::<BigEndian>(parameters.mtu)?;
        buffer.write_u32::<BigEndian>(parameters.window_size)?;
        buffer.write_u32::<BigEndian>(parameters.channel_count)?;
        buffer.write_u32::<BigEndian>(parameters.incoming_bandwidth)?;
        buffer.write_u32::<BigEndian>(parameters.outgoing_bandwidth)?;
        buffer.write_u32::<BigEndian>(parameters.packet_throttle_interval)?;
        buffer.write_u32::<BigEndian>(parameters.packet_throttle_acceleration)?;
        buffer.write_u32::<BigEndian>(parameters.packet_throttle_deceleration)?;
        buffer.write_u32::<BigEndian>(parameters.connect_id)
    }

    fn encode_fragment(buffer: &mut Vec<u8>, fragment: &FragmentHeader) -> io::Result<()> {
        buffer.write_u16::<BigEndian>(fragment.start_sequence_number)?;
        buffer.write_u16::<BigEndian>(fragment.data_length)?;
        buffer.write_u32::<BigEndian>(fragment.fragment_count)?;
        buffer.write_u32::<BigEndian>(fragment.fragment_number)?;
        buffer.write_u32::<BigEndian>(fragment.total_length)?;
        buffer.write_u32::<BigEndian>(fragment.fragment_offset)
    }
}
