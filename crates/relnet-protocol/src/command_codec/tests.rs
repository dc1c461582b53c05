//! Integration tests for command encoding and decoding.

use std::io::Cursor;

use super::{CommandDecoder, CommandEncoder};
use crate::command::{
    Command, CommandKind, ConnectParameters, FragmentHeader, ProtocolCommand,
    COMMAND_FLAG_ACKNOWLEDGE, COMMAND_FLAG_UNSEQUENCED,
};

fn parameters() -> ConnectParameters {
    ConnectParameters {
        outgoing_peer_id: 7,
        incoming_session_id: 1,
        outgoing_session_id: 2,
        mtu: 1400,
        window_size: 32768,
        channel_count: 4,
        incoming_bandwidth: 0,
        outgoing_bandwidth: 57600,
        packet_throttle_interval: 5000,
        packet_throttle_acceleration: 2,
        packet_throttle_deceleration: 2,
        connect_id: 0xDEADBEEF,
    }
}

#[test]
fn test_encoded_sizes_match_table() {
    let fragment = FragmentHeader { data_length: 0, ..Default::default() };
    let bodies = [
        ProtocolCommand::Acknowledge { received_reliable_sequence_number: 1, received_sent_time: 2 },
        ProtocolCommand::Connect { parameters: parameters(), data: 42 },
        ProtocolCommand::VerifyConnect(parameters()),
        ProtocolCommand::Disconnect { data: 9 },
        ProtocolCommand::Ping,
        ProtocolCommand::SendReliable { data_length: 0 },
        ProtocolCommand::SendUnreliable { unreliable_sequence_number: 3, data_length: 0 },
        ProtocolCommand::SendFragment(fragment),
        ProtocolCommand::SendUnsequenced { unsequenced_group: 5, data_length: 0 },
        ProtocolCommand::BandwidthLimit { incoming_bandwidth: 1, outgoing_bandwidth: 2 },
        ProtocolCommand::ThrottleConfigure {
            packet_throttle_interval: 1,
            packet_throttle_acceleration: 2,
            packet_throttle_deceleration: 3,
        },
        ProtocolCommand::SendUnreliableFragment(fragment),
    ];

    for body in bodies {
        let command = Command::new(body, COMMAND_FLAG_ACKNOWLEDGE, 0xFF);
        let mut buffer = Vec::new();
        CommandEncoder::encode_command_into(&mut buffer, &command).unwrap();
        assert_eq!(buffer.len(), body.kind().size(), "{:?}", body.kind());

        let mut cursor = Cursor::new(buffer.as_slice());
        let decoded = CommandDecoder::decode_command(&mut cursor).unwrap();
        assert_eq!(decoded.command, command);
        assert!(decoded.payload.is_empty());
    }
}

#[test]
fn test_connect_wire_layout_is_big_endian() {
    let mut command =
        Command::new(ProtocolCommand::Connect { parameters: parameters(), data: 42 }, COMMAND_FLAG_ACKNOWLEDGE, 0xFF);
    command.header.reliable_sequence_number = 1;
    let mut buffer = Vec::new();
    CommandEncoder::encode_command_into(&mut buffer, &command).unwrap();

    assert_eq!(&buffer[..4], &[0x82, 0xFF, 0x00, 0x01]);
    assert_eq!(&buffer[4..6], &[0x00, 0x07]);
    assert_eq!(&buffer[40..44], &[0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(&buffer[44..48], &[0, 0, 0, 42]);
}

#[test]
fn test_stream_of_commands_with_payloads() {
    let mut reliable = Command::new(ProtocolCommand::SendReliable { data_length: 3 }, COMMAND_FLAG_ACKNOWLEDGE, 0);
    reliable.header.reliable_sequence_number = 12;
    let unsequenced = Command::new(
        ProtocolCommand::SendUnsequenced { unsequenced_group: 4, data_length: 2 },
        COMMAND_FLAG_UNSEQUENCED,
        1,
    );

    let mut buffer = Vec::new();
    CommandEncoder::encode_with_payload(&mut buffer, &reliable, b"abc").unwrap();
    CommandEncoder::encode_with_payload(&mut buffer, &unsequenced, b"xy").unwrap();

    let mut cursor = Cursor::new(buffer.as_slice());
    let first = CommandDecoder::decode_command(&mut cursor).unwrap();
    assert_eq!(first.command, reliable);
    assert_eq!(first.payload, b"abc");

    let second = CommandDecoder::decode_command(&mut cursor).unwrap();
    assert_eq!(second.command.kind(), CommandKind::SendUnsequenced);
    assert!(second.command.header.is_unsequenced());
    assert_eq!(second.payload, b"xy");
    assert_eq!(cursor.position() as usize, buffer.len());
}

#[test]
fn test_unknown_opcodes_are_rejected() {
    for opcode in [0u8, 13, 14, 15] {
        let buffer = [opcode | COMMAND_FLAG_ACKNOWLEDGE, 0, 0, 0, 0, 0, 0, 0];
        let mut cursor = Cursor::new(&buffer[..]);
        assert!(CommandDecoder::decode_command(&mut cursor).is_err(), "opcode {}", opcode);
    }
}

#[test]
fn test_truncated_fixed_part_is_rejected() {
    let command = Command::new(ProtocolCommand::VerifyConnect(parameters()), 0, 0xFF);
    let mut buffer = Vec::new();
    CommandEncoder::encode_command_into(&mut buffer, &command).unwrap();
    buffer.truncate(30);

    let mut cursor = Cursor::new(buffer.as_slice());
    assert!(CommandDecoder::decode_command(&mut cursor).is_err());
}

#[test]
fn test_payload_overrun_is_rejected() {
    let command = Command::new(ProtocolCommand::SendReliable { data_length: 100 }, COMMAND_FLAG_ACKNOWLEDGE, 0);
    let mut buffer = Vec::new();
    CommandEncoder::encode_with_payload(&mut buffer, &command, &[1; 10]).unwrap();

    let mut cursor = Cursor::new(buffer.as_slice());
    assert!(CommandDecoder::decode_command(&mut cursor).is_err());
}
