// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::data_types::{BinaryData, StringData};
use crate::property::PropertyId;
use crate::topic::PubTopic;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, ProtocolLevel, QoS,
};

/// Properties available in the CONNECT variable header.
pub const CONNECT_PROPERTIES: &[PropertyId] = &[
    PropertyId::SessionExpiryInterval,
    PropertyId::ReceiveMaximum,
    PropertyId::MaximumPacketSize,
    PropertyId::TopicAliasMaximum,
    PropertyId::RequestResponseInformation,
    PropertyId::RequestProblemInformation,
    PropertyId::UserProperty,
    PropertyId::AuthenticationMethod,
    PropertyId::AuthenticationData,
];

/// Properties available in the will block of the CONNECT payload.
pub const CONNECT_WILL_PROPERTIES: &[PropertyId] = &[
    PropertyId::WillDelayInterval,
    PropertyId::PayloadFormatIndicator,
    PropertyId::MessageExpiryInterval,
    PropertyId::ContentType,
    PropertyId::ResponseTopic,
    PropertyId::CorrelationData,
    PropertyId::UserProperty,
];

/// Message the broker publishes on the client's behalf when the client
/// disconnects ungracefully.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Will {
    qos: QoS,
    retain: bool,
    properties: Properties,
    topic: PubTopic,
    message: BinaryData,
}

impl Will {
    /// Create a new will specification.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not publishable or `message` too long.
    pub fn new(topic: &str, message: &[u8], qos: QoS, retain: bool) -> Result<Self, EncodeError> {
        Ok(Self {
            qos,
            retain,
            properties: Properties::new(),
            topic: PubTopic::new(topic)?,
            message: BinaryData::from(message)?,
        })
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub fn message(&self) -> &[u8] {
        self.message.as_ref()
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}

/// CONNECT is the first packet sent from the Client to the Server after a
/// Network Connection is established [MQTT-3.1.0-1].
///
/// Basic structure of the packet:
///
/// ```txt
/// +----------------------------+
/// | Fixed header               |
/// +----------------------------+
/// | Protocol name              |
/// +----------------------------+
/// | Protocol level             |
/// +----------------------------+
/// | Connect flags              |
/// +----------------------------+
/// | Keep alive                 |
/// +----------------------------+
/// | Properties (5.0 only)      |
/// +----------------------------+
/// | Client id                  |
/// +----------------------------+
/// | Will properties/topic/msg  |
/// +----------------------------+
/// | Username                   |
/// +----------------------------+
/// | Password                   |
/// +----------------------------+
/// ```
///
/// Payload fields, if present, MUST appear in the order Client Identifier,
/// Will Properties, Will Topic, Will Payload, User Name, Password
/// [MQTT-3.1.3-1].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq)]
pub struct ConnectPacket {
    protocol_level: ProtocolLevel,

    /// If true the Client and Server MUST discard any existing Session and
    /// start a new one [MQTT-3.1.2-4]. Called Clean Start in 5.0.
    clean_session: bool,

    /// Maximum interval in seconds permitted between the Client finishing
    /// one Control Packet and starting the next [MQTT-3.1.2-20]. Zero
    /// disables the keep-alive mechanism.
    keep_alive: u16,

    properties: Properties,

    /// Identifies the Client to the Server; the first field of the payload
    /// [MQTT-3.1.3-3]. A zero-length id asks a 5.0 server to assign one.
    client_id: StringData,

    will: Option<Will>,

    username: Option<StringData>,

    password: Option<BinaryData>,
}

impl Default for ConnectPacket {
    fn default() -> Self {
        Self {
            protocol_level: ProtocolLevel::default(),
            clean_session: true,
            keep_alive: 60,
            properties: Properties::new(),
            client_id: StringData::new(),
            will: None,
            username: None,
            password: None,
        }
    }
}

impl ConnectPacket {
    /// Create a new connect packet with `client_id`.
    ///
    /// # Errors
    ///
    /// Returns error if `client_id` is not a valid string.
    pub fn new(client_id: &str) -> Result<Self, EncodeError> {
        Ok(Self {
            client_id: StringData::from(client_id)?,
            ..Self::default()
        })
    }

    pub fn set_protocol_level(&mut self, level: ProtocolLevel) -> &mut Self {
        self.protocol_level = level;
        self
    }

    #[must_use]
    pub const fn protocol_level(&self) -> ProtocolLevel {
        self.protocol_level
    }

    pub fn set_clean_session(&mut self, clean: bool) -> &mut Self {
        self.clean_session = clean;
        self
    }

    #[must_use]
    pub const fn clean_session(&self) -> bool {
        self.clean_session
    }

    pub fn set_keep_alive(&mut self, seconds: u16) -> &mut Self {
        self.keep_alive = seconds;
        self
    }

    #[must_use]
    pub const fn keep_alive(&self) -> u16 {
        self.keep_alive
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        self.client_id.as_ref()
    }

    pub fn set_will(&mut self, will: Option<Will>) -> &mut Self {
        self.will = will;
        self
    }

    #[must_use]
    pub const fn will(&self) -> Option<&Will> {
        self.will.as_ref()
    }

    /// Set username and optional password credentials.
    ///
    /// # Errors
    ///
    /// Returns error if either value does not fit its length prefix.
    pub fn set_credentials(
        &mut self,
        username: &str,
        password: Option<&[u8]>,
    ) -> Result<&mut Self, EncodeError> {
        self.username = Some(StringData::from(username)?);
        self.password = match password {
            Some(bytes) => Some(BinaryData::from(bytes)?),
            None => None,
        };
        Ok(self)
    }

    #[must_use]
    pub fn username(&self) -> Option<&str> {
        self.username.as_ref().map(AsRef::as_ref)
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    const fn connect_flags(&self) -> u8 {
        let mut flags = 0;
        if self.clean_session {
            flags |= 0b0000_0010;
        }
        if let Some(will) = &self.will {
            flags |= 0b0000_0100;
            flags |= (will.qos as u8) << 3;
            if will.retain {
                flags |= 0b0010_0000;
            }
        }
        if self.password.is_some() {
            flags |= 0b0100_0000;
        }
        if self.username.is_some() {
            flags |= 0b1000_0000;
        }
        flags
    }

    fn remaining_length(&self, is_v5: bool) -> usize {
        let protocol_name = StringData::from(self.protocol_level.protocol_name())
            .map(|s| s.bytes())
            .unwrap_or(6);
        // level + flags + keep alive
        let mut len = protocol_name + 1 + 1 + 2;
        if is_v5 {
            len += self.properties.bytes();
        }
        len += self.client_id.bytes();
        if let Some(will) = &self.will {
            if is_v5 {
                len += will.properties.bytes();
            }
            len += will.topic.bytes() + will.message.bytes();
        }
        if let Some(username) = &self.username {
            len += username.bytes();
        }
        if let Some(password) = &self.password {
            len += password.bytes();
        }
        len
    }
}

impl EncodePacket for ConnectPacket {
    /// The connection's level is carried by the packet itself; the `level`
    /// argument of the trait is ignored here.
    fn encode(&self, buf: &mut Vec<u8>, _level: ProtocolLevel) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let is_v5 = self.protocol_level.is_v5();

        let fixed_header = FixedHeader::new(PacketType::Connect, self.remaining_length(is_v5))?;
        fixed_header.encode(buf)?;

        StringData::from(self.protocol_level.protocol_name())?.encode(buf)?;
        buf.push(self.protocol_level as u8);
        buf.push(self.connect_flags());
        buf.push((self.keep_alive >> 8) as u8);
        buf.push((self.keep_alive & 0xff) as u8);
        if is_v5 {
            self.properties.encode(buf)?;
        }

        self.client_id.encode(buf)?;
        if let Some(will) = &self.will {
            if is_v5 {
                will.properties.encode(buf)?;
            }
            will.topic.encode(buf)?;
            will.message.encode(buf)?;
        }
        if let Some(username) = &self.username {
            username.encode(buf)?;
        }
        if let Some(password) = &self.password {
            password.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for ConnectPacket {
    fn decode(ba: &mut ByteArray, _level: ProtocolLevel) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Connect {
            return Err(DecodeError::InvalidPacketType);
        }

        let protocol_name = StringData::decode(ba)?;
        let protocol_level = ProtocolLevel::try_from(ba.read_byte()?)?;
        if protocol_name.as_ref() != protocol_level.protocol_name() {
            return Err(DecodeError::InvalidProtocolName);
        }
        let is_v5 = protocol_level.is_v5();

        let flags = ba.read_byte()?;
        // The Server MUST validate that the reserved flag is zero
        // [MQTT-3.1.2-3].
        if flags & 0b0000_0001 != 0 {
            return Err(DecodeError::InvalidConnectFlags);
        }
        let clean_session = flags & 0b0000_0010 != 0;
        let has_will = flags & 0b0000_0100 != 0;
        let will_qos = QoS::try_from((flags & 0b0001_1000) >> 3)?;
        let will_retain = flags & 0b0010_0000 != 0;
        let has_password = flags & 0b0100_0000 != 0;
        let has_username = flags & 0b1000_0000 != 0;
        // If the Will Flag is 0, Will QoS and Will Retain MUST be zero
        // [MQTT-3.1.2-11].
        if !has_will && (will_qos != QoS::AtMostOnce || will_retain) {
            return Err(DecodeError::InvalidConnectFlags);
        }

        let keep_alive = ba.read_u16()?;
        let properties = if is_v5 {
            Properties::decode(ba, CONNECT_PROPERTIES)?
        } else {
            Properties::new()
        };

        let client_id = StringData::decode(ba)?;
        let will = if has_will {
            let will_properties = if is_v5 {
                Properties::decode(ba, CONNECT_WILL_PROPERTIES)?
            } else {
                Properties::new()
            };
            let topic = PubTopic::decode(ba)?;
            let message = BinaryData::decode(ba)?;
            Some(Will {
                qos: will_qos,
                retain: will_retain,
                properties: will_properties,
                topic,
                message,
            })
        } else {
            None
        };
        let username = if has_username {
            Some(StringData::decode(ba)?)
        } else {
            None
        };
        let password = if has_password {
            Some(BinaryData::decode(ba)?)
        } else {
            None
        };

        Ok(Self {
            protocol_level,
            clean_session,
            keep_alive,
            properties,
            client_id,
            will,
            username,
            password,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v311_round_trip() {
        let mut packet = ConnectPacket::new("c1").unwrap();
        packet
            .set_protocol_level(ProtocolLevel::V311)
            .set_clean_session(false)
            .set_keep_alive(30);
        packet.set_credentials("user", Some(b"pass")).unwrap();

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        // "MQTT", level 4, flags, keep alive follow the fixed header.
        assert_eq!(&buf[2..8], &[0x00, 0x04, b'M', b'Q', b'T', b'T']);
        assert_eq!(buf[8], 4);

        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba, ProtocolLevel::V311).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_v5_round_trip_with_will() {
        let mut packet = ConnectPacket::new("c2").unwrap();
        packet.properties_mut().session_expiry_interval = Some(120);
        packet.properties_mut().receive_maximum = Some(8);
        let mut will = Will::new("will/topic", b"gone", QoS::AtLeastOnce, true).unwrap();
        will.properties_mut().will_delay_interval = Some(5);
        packet.set_will(Some(will));

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.will().unwrap().topic(), "will/topic");
    }

    #[test]
    fn test_v311_omits_properties() {
        let mut packet = ConnectPacket::new("c3").unwrap();
        packet.set_protocol_level(ProtocolLevel::V311);
        // Fields only 5.0 can carry are silently dropped on a 3.1.1 wire.
        packet.properties_mut().session_expiry_interval = Some(60);

        let mut v311_buf = Vec::new();
        packet.encode(&mut v311_buf, ProtocolLevel::V311).unwrap();
        let mut plain = ConnectPacket::new("c3").unwrap();
        plain.set_protocol_level(ProtocolLevel::V311);
        let mut plain_buf = Vec::new();
        plain.encode(&mut plain_buf, ProtocolLevel::V311).unwrap();
        assert_eq!(v311_buf, plain_buf);
    }

    #[test]
    fn test_reserved_flag_rejected() {
        let mut packet = ConnectPacket::new("c4").unwrap();
        packet.set_protocol_level(ProtocolLevel::V311);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        // Flag byte follows name(6) + level(1) after the 2-byte header.
        buf[9] |= 0b0000_0001;
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectPacket::decode(&mut ba, ProtocolLevel::V311),
            Err(DecodeError::InvalidConnectFlags)
        );
    }
}
