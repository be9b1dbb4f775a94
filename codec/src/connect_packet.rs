// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::base::{
    decode_binary, decode_string, encode_binary, encode_string, validate_client_id, PROTOCOL_NAME,
};
use crate::connect_flags::ConnectFlags;
use crate::header::{FixedHeader, PacketType};
use crate::{ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, ProtocolLevel, QoS};

/// `CONNECT` is the first packet sent on a new connection; it establishes a session and,
/// optionally, a will message to be published if the client disconnects ungracefully.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ConnectPacket {
    protocol_level: ProtocolLevel,
    connect_flags: ConnectFlags,
    keep_alive: u16,
    client_id: String,
    will_topic: Option<String>,
    will_message: Vec<u8>,
    username: String,
    password: Vec<u8>,
}

impl ConnectPacket {
    /// Build a `CONNECT` packet programmatically (used by listeners/tests that
    /// never touch the wire format directly).
    #[must_use]
    pub fn new(client_id: &str, keep_alive: u16, clean_session: bool) -> Self {
        Self {
            protocol_level: ProtocolLevel::V311,
            connect_flags: ConnectFlags::new(clean_session, None, false, false),
            keep_alive,
            client_id: client_id.to_string(),
            will_topic: None,
            will_message: Vec::new(),
            username: String::new(),
            password: Vec::new(),
        }
    }

    /// Attach a will to this `CONNECT`, updating the connect flags accordingly.
    #[must_use]
    pub fn set_will(mut self, topic: &str, message: impl Into<Vec<u8>>, qos: QoS, retain: bool) -> Self {
        self.connect_flags = ConnectFlags::new(
            self.connect_flags.clean_session(),
            Some((qos, retain)),
            self.connect_flags.has_username(),
            self.connect_flags.has_password(),
        );
        self.will_topic = Some(topic.to_string());
        self.will_message = message.into();
        self
    }

    /// Attach username/password credentials, updating the connect flags accordingly.
    #[must_use]
    pub fn set_credentials(mut self, username: &str, password: impl Into<Vec<u8>>) -> Self {
        let password = password.into();
        self.connect_flags = ConnectFlags::new(
            self.connect_flags.clean_session(),
            if self.connect_flags.will() {
                Some((self.connect_flags.will_qos(), self.connect_flags.will_retain()))
            } else {
                None
            },
            true,
            !password.is_empty(),
        );
        self.username = username.to_string();
        self.password = password;
        self
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    #[must_use]
    pub const fn connect_flags(&self) -> &ConnectFlags {
        &self.connect_flags
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn will_topic(&self) -> Option<&str> {
        self.will_topic.as_deref()
    }

    #[must_use]
    pub fn will_message(&self) -> &[u8] {
        &self.will_message
    }

    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    #[must_use]
    pub fn password(&self) -> &[u8] {
        &self.password
    }

    #[must_use]
    pub const fn will_qos(&self) -> QoS {
        self.connect_flags.will_qos()
    }

    #[must_use]
    pub const fn will_retain(&self) -> bool {
        self.connect_flags.will_retain()
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.connect_flags.clean_session()
    }

    fn get_fixed_header(&self) -> Result<FixedHeader, EncodeError> {
        let mut remaining_length = 2
            + PROTOCOL_NAME.len()
            + 1 // protocol level
            + ConnectFlags::bytes()
            + 2 // keep alive
            + 2
            + self.client_id.len();

        if self.connect_flags.will() {
            remaining_length += 2 + self.will_topic.as_deref().unwrap_or_default().len();
            remaining_length += 2 + self.will_message.len();
        }
        if self.connect_flags.has_username() {
            remaining_length += 2 + self.username.len();
        }
        if self.connect_flags.has_password() {
            remaining_length += 2 + self.password.len();
        }
        FixedHeader::new(PacketType::Connect, remaining_length)
    }
}

impl EncodePacket for ConnectPacket {
    fn encode(&self, v: &mut Vec<u8>) -> Result<usize, EncodeError> {
        let old_len = v.len();

        let fixed_header = self.get_fixed_header()?;
        fixed_header.encode(v)?;

        encode_string(PROTOCOL_NAME, v)?;
        v.push(self.protocol_level.into());
        self.connect_flags.encode(v)?;
        v.extend_from_slice(&self.keep_alive.to_be_bytes());

        encode_string(&self.client_id, v)?;
        if self.connect_flags.will() {
            encode_string(self.will_topic.as_deref().unwrap_or_default(), v)?;
            encode_binary(&self.will_message, v)?;
        }
        if self.connect_flags.has_username() {
            encode_string(&self.username, v)?;
        }
        if self.connect_flags.has_password() {
            encode_binary(&self.password, v)?;
        }

        Ok(v.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = decode_string(ba)?;
        if protocol_name != PROTOCOL_NAME {
            return Err(DecodeError::InvalidProtocolName);
        }
        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;
        let connect_flags = ConnectFlags::decode(ba)?;
        let keep_alive = ba.read_u16()?;

        // A zero-length client id is allowed only with clean_session=true
        // [MQTT-3.1.3-7], [MQTT-3.1.3-8]; the broker assigns a generated id.
        // A non-empty one must be 1-23 bytes of `[0-9a-zA-Z]` [MQTT-3.1.3-5].
        let client_id = decode_string(ba)?;
        if client_id.is_empty() {
            if !connect_flags.clean_session() {
                return Err(DecodeError::InvalidClientId);
            }
        } else {
            validate_client_id(&client_id)?;
        }

        let will_topic = if connect_flags.will() {
            Some(decode_string(ba)?)
        } else {
            None
        };
        let will_message = if connect_flags.will() {
            decode_binary(ba)?
        } else {
            Vec::new()
        };
        let username = if connect_flags.has_username() {
            decode_string(ba)?
        } else {
            String::new()
        };
        let password = if connect_flags.has_password() {
            decode_binary(ba)?
        } else {
            Vec::new()
        };

        Ok(Self {
            protocol_level,
            connect_flags,
            keep_alive,
            client_id,
            will_topic,
            will_message,
            username,
            password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_minimal_connect() {
        let buf: Vec<u8> = vec![
            16, 20, 0, 4, 77, 81, 84, 84, 4, 2, 0, 60, 0, 8, 119, 118, 80, 84, 88, 99, 67, 119,
        ];
        let mut ba = ByteArray::new(&buf);
        let packet = ConnectPacket::decode(&mut ba).unwrap();
        assert_eq!(packet.client_id(), "wvPTXcCw");
        assert_eq!(packet.keep_alive(), 60);
        assert!(packet.clean_session());
    }

    #[test]
    fn decode_rejects_non_alphanumeric_client_id() {
        // Same packet as `decode_minimal_connect`, with the client id's
        // second byte changed from 'v' (118) to '/' (47).
        let buf: Vec<u8> = vec![
            16, 20, 0, 4, 77, 81, 84, 84, 4, 2, 0, 60, 0, 8, 119, 47, 80, 84, 88, 99, 67, 119,
        ];
        let mut ba = ByteArray::new(&buf);
        assert!(ConnectPacket::decode(&mut ba).is_err());
    }
}
