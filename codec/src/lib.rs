// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Wire codec for MQTT 3.1.1 control packets.
//!
//! This crate only knows how to turn bytes into packets and back; framing
//! bytes off a socket, TLS termination and topic-filter semantics are a
//! collaborator's job (see the `broker` crate).

mod ack_packets;
mod base;
mod byte_array;
mod connect_ack_packet;
mod connect_flags;
mod connect_packet;
mod empty_packets;
mod error;
mod header;
mod publish_packet;
mod subscribe_ack_packet;
mod subscribe_packet;
mod unsubscribe_packet;
mod var_int;

pub use ack_packets::{
    PublishAckPacket, PublishCompletePacket, PublishReceivedPacket, PublishReleasePacket,
    UnsubscribeAckPacket,
};
pub use base::{
    decode_binary, decode_string, encode_binary, encode_string, validate_client_id,
    DecodePacket, EncodePacket, PacketId, ProtocolLevel, QoS, PROTOCOL_NAME,
};
pub use byte_array::ByteArray;
pub use connect_ack_packet::{ConnectAckPacket, ConnectReturnCode};
pub use connect_flags::ConnectFlags;
pub use connect_packet::ConnectPacket;
pub use empty_packets::{DisconnectPacket, PingRequestPacket, PingResponsePacket};
pub use error::{DecodeError, EncodeError};
pub use header::{FixedHeader, PacketType};
pub use publish_packet::PublishPacket;
pub use subscribe_ack_packet::{SubscribeAck, SubscribeAckPacket};
pub use subscribe_packet::{SubscribePacket, SubscribeTopic};
pub use unsubscribe_packet::UnsubscribePacket;
pub use var_int::{VarInt, MAX_PACKET_LEN};

/// A decoded control packet, tagged by variant so a dispatcher can match on
/// it without re-inspecting the fixed header.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
}

impl Packet {
    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(_) => PacketType::Connect,
            Self::ConnectAck(_) => PacketType::ConnectAck,
            Self::Publish(p) => PacketType::Publish {
                dup: p.dup(),
                qos: p.qos(),
                retain: p.retain(),
            },
            Self::PublishAck(_) => PacketType::PublishAck,
            Self::PublishReceived(_) => PacketType::PublishReceived,
            Self::PublishRelease(_) => PacketType::PublishRelease,
            Self::PublishComplete(_) => PacketType::PublishComplete,
            Self::Subscribe(_) => PacketType::Subscribe,
            Self::SubscribeAck(_) => PacketType::SubscribeAck,
            Self::Unsubscribe(_) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(_) => PacketType::UnsubscribeAck,
            Self::PingRequest(_) => PacketType::PingRequest,
            Self::PingResponse(_) => PacketType::PingResponse,
            Self::Disconnect(_) => PacketType::Disconnect,
        }
    }
}

/// Peek the first byte of `data` to determine the packet type, then decode
/// the full packet. Used by the framing layer once it has a complete packet
/// buffered (fixed header length + remaining length).
///
/// # Errors
///
/// Returns the underlying [`DecodeError`] from the type-specific decoder.
pub fn decode_packet(data: &[u8]) -> Result<Packet, DecodeError> {
    let mut peek = ByteArray::new(data);
    let type_bits = (peek.peek_byte()? & 0xf0) >> 4;

    let mut ba = ByteArray::new(data);
    Ok(match type_bits {
        1 => Packet::Connect(ConnectPacket::decode(&mut ba)?),
        2 => Packet::ConnectAck(ConnectAckPacket::decode(&mut ba)?),
        3 => Packet::Publish(PublishPacket::decode(&mut ba)?),
        4 => Packet::PublishAck(PublishAckPacket::decode(&mut ba)?),
        5 => Packet::PublishReceived(PublishReceivedPacket::decode(&mut ba)?),
        6 => Packet::PublishRelease(PublishReleasePacket::decode(&mut ba)?),
        7 => Packet::PublishComplete(PublishCompletePacket::decode(&mut ba)?),
        8 => Packet::Subscribe(SubscribePacket::decode(&mut ba)?),
        9 => Packet::SubscribeAck(SubscribeAckPacket::decode(&mut ba)?),
        10 => Packet::Unsubscribe(UnsubscribePacket::decode(&mut ba)?),
        11 => Packet::UnsubscribeAck(UnsubscribeAckPacket::decode(&mut ba)?),
        12 => Packet::PingRequest(PingRequestPacket::decode(&mut ba)?),
        13 => Packet::PingResponse(PingResponsePacket::decode(&mut ba)?),
        14 => Packet::Disconnect(DisconnectPacket::decode(&mut ba)?),
        _ => return Err(DecodeError::InvalidPacketType),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_packet_dispatches_connect() {
        let buf: Vec<u8> = vec![
            16, 20, 0, 4, 77, 81, 84, 84, 4, 2, 0, 60, 0, 8, 119, 118, 80, 84, 88, 99, 67, 119,
        ];
        match decode_packet(&buf).unwrap() {
            Packet::Connect(packet) => assert_eq!(packet.client_id(), "wvPTXcCw"),
            other => panic!("unexpected packet: {other:?}"),
        }
    }
}
