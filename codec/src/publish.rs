// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::PropertyId;
use crate::topic::PubTopic;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, ProtocolLevel, QoS,
};

/// Properties available in PUBLISH packets.
pub const PUBLISH_PROPERTIES: &[PropertyId] = &[
    PropertyId::PayloadFormatIndicator,
    PropertyId::MessageExpiryInterval,
    PropertyId::TopicAlias,
    PropertyId::ResponseTopic,
    PropertyId::CorrelationData,
    PropertyId::UserProperty,
    // A PUBLISH packet sent from a Client to a Server MUST NOT contain a
    // Subscription Identifier [MQTT-3.3.4-6]; the server-to-client
    // direction may carry several.
    PropertyId::SubscriptionIdentifier,
    PropertyId::ContentType,
];

/// PUBLISH transports an application message in either direction.
///
/// ```txt
/// +-----------------------+
/// | Fixed header          |
/// +-----------------------+
/// | Topic name            |
/// +-----------------------+
/// | Packet id (QoS > 0)   |
/// +-----------------------+
/// | Properties (5.0 only) |
/// +-----------------------+
/// | Payload ...           |
/// +-----------------------+
/// ```
///
/// Responses: none for QoS 0, PUBACK for QoS 1, PUBREC for QoS 2.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PublishPacket {
    /// The DUP flag MUST be set to 1 when the Client or Server attempts to
    /// re-deliver a PUBLISH packet [MQTT-3.3.1-1], and MUST be 0 for all
    /// QoS 0 messages [MQTT-3.3.1-2].
    dup: bool,

    qos: QoS,

    /// Ask the Server to replace any existing retained message for this
    /// topic and store the Application Message [MQTT-3.3.1-5].
    retain: bool,

    /// It is a Protocol Error if the Topic Name is zero length and there
    /// is no Topic Alias.
    topic: PubTopic,

    /// Only present where the QoS level is 1 or 2 [MQTT-2.2.1-2].
    packet_id: PacketId,

    properties: Properties,

    payload: Vec<u8>,
}

impl PublishPacket {
    /// Create a new publish packet.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not publishable.
    pub fn new(topic: &str, qos: QoS, payload: &[u8]) -> Result<Self, EncodeError> {
        Ok(Self {
            dup: false,
            qos,
            retain: false,
            topic: PubTopic::new(topic)?,
            packet_id: PacketId::new(0),
            properties: Properties::new(),
            payload: payload.to_vec(),
        })
    }

    /// Create a packet with an empty topic name, valid only when a topic
    /// alias property is attached before encoding.
    #[must_use]
    pub fn with_alias_only(qos: QoS, payload: &[u8]) -> Self {
        Self {
            dup: false,
            qos,
            retain: false,
            topic: PubTopic::empty(),
            packet_id: PacketId::new(0),
            properties: Properties::new(),
            payload: payload.to_vec(),
        }
    }

    /// Update the `dup` flag.
    ///
    /// # Errors
    ///
    /// Returns error when set on a QoS 0 packet [MQTT-3.3.1-2].
    pub fn set_dup(&mut self, dup: bool) -> Result<&mut Self, EncodeError> {
        if dup && self.qos == QoS::AtMostOnce {
            return Err(EncodeError::InvalidPacketType);
        }
        self.dup = dup;
        Ok(self)
    }

    #[must_use]
    pub const fn dup(&self) -> bool {
        self.dup
    }

    pub fn set_retain(&mut self, retain: bool) -> &mut Self {
        self.retain = retain;
        self
    }

    #[must_use]
    pub const fn retain(&self) -> bool {
        self.retain
    }

    #[must_use]
    pub const fn qos(&self) -> QoS {
        self.qos
    }

    pub fn set_packet_id(&mut self, packet_id: PacketId) -> &mut Self {
        self.packet_id = packet_id;
        self
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    /// Update the topic name.
    ///
    /// # Errors
    ///
    /// Returns error if `topic` is not publishable.
    pub fn set_topic(&mut self, topic: &str) -> Result<&mut Self, EncodeError> {
        self.topic = PubTopic::new(topic)?;
        Ok(self)
    }

    #[must_use]
    pub fn topic(&self) -> &str {
        self.topic.as_ref()
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Consume the packet, returning topic, properties and payload.
    #[must_use]
    pub fn into_parts(self) -> (String, Properties, Vec<u8>) {
        (self.topic.as_ref().to_string(), self.properties, self.payload)
    }

    fn remaining_length(&self, is_v5: bool) -> usize {
        let mut len = self.topic.bytes() + self.payload.len();
        if self.qos != QoS::AtMostOnce {
            len += PacketId::bytes();
        }
        if is_v5 {
            len += self.properties.bytes();
        }
        len
    }
}

impl EncodePacket for PublishPacket {
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let is_v5 = level.is_v5();

        let packet_type = PacketType::Publish {
            dup: self.dup,
            qos: self.qos,
            retain: self.retain,
        };
        let fixed_header = FixedHeader::new(packet_type, self.remaining_length(is_v5))?;
        fixed_header.encode(buf)?;

        self.topic.encode(buf)?;
        if self.qos != QoS::AtMostOnce {
            self.packet_id.encode(buf)?;
        }
        if is_v5 {
            self.properties.encode(buf)?;
        }
        buf.extend_from_slice(&self.payload);

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for PublishPacket {
    fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        let PacketType::Publish { dup, qos, retain } = fixed_header.packet_type() else {
            return Err(DecodeError::InvalidPacketType);
        };

        let body_start = ba.offset();
        let topic = PubTopic::decode(ba)?;

        let packet_id = if qos == QoS::AtMostOnce {
            PacketId::new(0)
        } else {
            let packet_id = PacketId::decode(ba)?;
            if packet_id.value() == 0 {
                // A non-zero Packet Identifier is required [MQTT-2.2.1-3].
                return Err(DecodeError::InvalidPacketId);
            }
            packet_id
        };

        let properties = if level.is_v5() {
            Properties::decode(ba, PUBLISH_PROPERTIES)?
        } else {
            Properties::new()
        };

        let consumed = ba.offset() - body_start;
        let payload_len = fixed_header
            .remaining_length()
            .checked_sub(consumed)
            .ok_or(DecodeError::InvalidRemainingLength)?;
        let payload = ba.read_bytes(payload_len)?.to_vec();

        Ok(Self {
            dup,
            qos,
            retain,
            topic,
            packet_id,
            properties,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos0_round_trip() {
        let packet = PublishPacket::new("test/topic", QoS::AtMostOnce, b"hello").unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        assert_eq!(
            buf,
            [
                0x30, 0x11, 0x00, 0x0a, b't', b'e', b's', b't', b'/', b't', b'o', b'p', b'i', b'c',
                b'h', b'e', b'l', b'l', b'o'
            ]
        );
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba, ProtocolLevel::V311).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_qos1_v5_round_trip() {
        let mut packet = PublishPacket::new("a/b", QoS::AtLeastOnce, b"x").unwrap();
        packet.set_packet_id(PacketId::new(17));
        packet.properties_mut().message_expiry_interval = Some(60);
        packet.properties_mut().content_type =
            Some(crate::StringData::from("text/plain").unwrap());

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.packet_id().value(), 17);
    }

    #[test]
    fn test_v311_strips_v5_properties() {
        let mut packet = PublishPacket::new("a/b", QoS::AtMostOnce, b"payload").unwrap();
        packet.properties_mut().content_type = Some(crate::StringData::from("json").unwrap());
        packet
            .properties_mut()
            .user_properties
            .push(crate::StringPairData::from("k", "v").unwrap());

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        let plain = PublishPacket::new("a/b", QoS::AtMostOnce, b"payload").unwrap();
        let mut plain_buf = Vec::new();
        plain.encode(&mut plain_buf, ProtocolLevel::V311).unwrap();
        assert_eq!(buf, plain_buf);
    }

    #[test]
    fn test_zero_packet_id_rejected() {
        let buf = [0x32, 0x07, 0x00, 0x03, b'a', b'/', b'b', 0x00, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PublishPacket::decode(&mut ba, ProtocolLevel::V311),
            Err(DecodeError::InvalidPacketId)
        );
    }

    #[test]
    fn test_alias_only_publish() {
        let mut packet = PublishPacket::with_alias_only(QoS::AtMostOnce, b"data");
        packet.properties_mut().topic_alias = Some(3);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert!(decoded.topic().is_empty());
        assert_eq!(decoded.properties().topic_alias, Some(3));
    }
}
