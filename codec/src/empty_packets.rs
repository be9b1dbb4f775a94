// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::header::{FixedHeader, PacketType};
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket};

macro_rules! empty_packet {
    ($name:ident, $packet_type:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $name;

        impl EncodePacket for $name {
            fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
                let old_len = v.len();
                FixedHeader::new($packet_type, 0)?.encode(v)?;
                Ok(v.len() - old_len)
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
                let fixed_header = FixedHeader::decode(ba)?;
                if fixed_header.packet_type() != $packet_type {
                    return Err(DecodeError::InvalidPacketType);
                }
                if fixed_header.remaining_length() != 0 {
                    return Err(DecodeError::InvalidRemainingLength);
                }
                Ok(Self)
            }
        }
    };
}

empty_packet!(
    PingRequestPacket,
    PacketType::PingRequest,
    "`PINGREQ`, sent by the client to keep the connection alive and verify the broker is responsive."
);
empty_packet!(
    PingResponsePacket,
    PacketType::PingResponse,
    "`PINGRESP`, the broker's reply to `PINGREQ`."
);
empty_packet!(
    DisconnectPacket,
    PacketType::Disconnect,
    "`DISCONNECT`, a graceful connection close; the broker MUST NOT publish the will."
);
