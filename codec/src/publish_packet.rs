// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use bytes::Bytes;

use crate::base::{decode_string, encode_string};
use crate::header::{FixedHeader, PacketType};
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, PacketId, QoS};

/// `PUBLISH` transports an application message, in either direction.
///
/// `packet_id` is present only when `qos != AtMostOnce`, per §3.3.2.2.
///
/// `payload` is reference-counted [`Bytes`] rather than an owned `Vec<u8>`:
/// fanning one publish out to N subscribers (§5, "each delivery task
/// receives an independent clone of the bytes it writes") must not copy the
/// payload N times.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PublishPacket {
    dup: bool,
    qos: QoS,
    retain: bool,
    topic: String,
    packet_id: PacketId,
    payload: Bytes,
}

impl PublishPacket {
    /// # Errors
    ///
    /// Returns [`EncodeError::TooManyData`] if `topic` or `payload` overflow the
    /// two-byte length prefix.
    pub fn new(topic: &str, qos: QoS, payload: impl Into<Bytes>) -> Result<Self, EncodeError> {
        let payload = payload.into();
        if topic.len() > u16::from(u16::MAX) as usize || payload.len() > u16::from(u16::MAX) as usize
        {
            return Err(EncodeError::TooManyData);
        }
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic: topic.to_string(),
            packet_id: PacketId::new(0),
            payload,
        })
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_dup(&mut self, dup: bool) -> &mut Self {
        self.dup = dup;
        self
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_qos(&mut self, qos: QoS) -> &mut Self {
        if qos == QoS::AtMostOnce {
            self.packet_id = PacketId::new(0);
        }
        self.qos = qos;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, EncodeError> {
        let mut remaining_length = 2 + self.topic.len() + self.payload.len();
        if self.qos != QoS::AtMostOnce {
            remaining_length += PacketId::bytes();
        }
        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        FixedHeader::new(packet_type, remaining_length)
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();
        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        encode_string(&self.topic, v)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(v)?;
        }
        v.extend_from_slice(&self.payload);
        Ok(v.len() - old_len)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let (dup, qos, retain) = match fixed_header.packet_type() {
            PacketType::Publish { dup, qos, retain } => (dup, qos, retain),
            _ => return Err(DecodeError::InvalidPacketType),
        };

        // The DUP flag MUST be set to 0 for all QoS 0 messages [MQTT-3.3.1-2].
        if dup && qos == QoS::AtMostOnce {
            return Err(DecodeError::InvalidPacketFlags);
        }

        let topic = decode_string(ba)?;
        let topic_bytes = 2 + topic.len();

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let id = PacketId::decode(ba)?;
            if id.value() == 0 {
                return Err(DecodeError::InvalidPacketId);
            }
            id
        };

        if fixed_header.remaining_length() < topic_bytes {
            return Err(DecodeError::InvalidRemainingLength);
        }
        let mut payload_len = fixed_header.remaining_length() - topic_bytes;
        if qos != QoS::AtMostOnce {
            if payload_len < PacketId::bytes() {
                return Err(DecodeError::InvalidRemainingLength);
            }
            payload_len -= PacketId::bytes();
        }

        let payload = Bytes::copy_from_slice(ba.read_bytes(payload_len)?);
        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            payload,
        })
    }
}
