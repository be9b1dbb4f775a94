// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::header::{FixedHeader, PacketType};
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, PacketId};

macro_rules! packet_id_only_packet {
    ($name:ident, $packet_type:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $name {
            packet_id: PacketId,
        }

        impl $name {
            #[must_use]
            pub const fn new(packet_id: PacketId) -> Self {
                Self { packet_id }
            }

            #[must_use]
            pub const fn packet_id(&self) -> PacketId {
                self.packet_id
            }
        }

        impl EncodePacket for $name {
            fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
                let old_len = v.len();
                let fixed_header = FixedHeader::new($packet_type, PacketId::bytes())?;
                fixed_header.encode(v)?;
                self.packet_id.encode(v)?;
                Ok(v.len() - old_len)
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
                let fixed_header = FixedHeader::decode(ba)?;
                if fixed_header.packet_type() != $packet_type {
                    return Err(DecodeError::InvalidPacketType);
                }
                let packet_id = PacketId::decode(ba)?;
                Ok(Self { packet_id })
            }
        }
    };
}

packet_id_only_packet!(
    PublishAckPacket,
    PacketType::PublishAck,
    "`PUBACK`, the QoS 1 acknowledgement of a `PUBLISH`."
);
packet_id_only_packet!(
    PublishReceivedPacket,
    PacketType::PublishReceived,
    "`PUBREC`, the first half of the QoS 2 handshake."
);
packet_id_only_packet!(
    PublishReleasePacket,
    PacketType::PublishRelease,
    "`PUBREL`, the second half of the QoS 2 handshake."
);
packet_id_only_packet!(
    PublishCompletePacket,
    PacketType::PublishComplete,
    "`PUBCOMP`, completing the QoS 2 handshake."
);
packet_id_only_packet!(
    UnsubscribeAckPacket,
    PacketType::UnsubscribeAck,
    "`UNSUBACK`, acknowledging an `UNSUBSCRIBE`."
);
