// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::property::PropertyId;
use crate::topic::SubTopic;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, ProtocolLevel, QoS,
};

/// Properties available in SUBSCRIBE packets.
pub const SUBSCRIBE_PROPERTIES: &[PropertyId] = &[
    PropertyId::SubscriptionIdentifier,
    PropertyId::UserProperty,
];

/// Retain Handling option of a 5.0 subscription.
///
/// Controls whether retained messages are sent when the subscription is
/// established.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum RetainHandling {
    /// Send retained messages at the time of the subscribe.
    #[default]
    SendAtSubscribe = 0,

    /// Send retained messages only if the subscription does not already
    /// exist.
    SendIfNew = 1,

    /// Do not send retained messages.
    DoNotSend = 2,
}

impl TryFrom<u8> for RetainHandling {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, DecodeError> {
        match v {
            0 => Ok(Self::SendAtSubscribe),
            1 => Ok(Self::SendIfNew),
            2 => Ok(Self::DoNotSend),
            _ => Err(DecodeError::InvalidPacketFlags),
        }
    }
}

/// Per-filter subscription options byte.
///
/// On a 3.1.1 wire only the QoS bits exist; No Local, Retain As Published
/// and Retain Handling are 5.0-only and never leak onto an older
/// connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SubscriptionOptions {
    /// Maximum QoS the Server may use when sending messages to this
    /// subscription.
    pub qos: QoS,

    /// If true, Application Messages MUST NOT be forwarded to a connection
    /// with a ClientID equal to that of the publishing connection
    /// [MQTT-3.8.3-3].
    pub no_local: bool,

    /// If true, keep the RETAIN flag of forwarded messages as published.
    pub retain_as_published: bool,

    pub retain_handling: RetainHandling,
}

impl SubscriptionOptions {
    /// Shorthand for plain QoS-only options.
    #[must_use]
    pub fn with_qos(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    fn encode_byte(self, is_v5: bool) -> u8 {
        let mut byte = self.qos as u8;
        if is_v5 {
            if self.no_local {
                byte |= 0b0000_0100;
            }
            if self.retain_as_published {
                byte |= 0b0000_1000;
            }
            byte |= (self.retain_handling as u8) << 4;
        }
        byte
    }

    fn decode_byte(byte: u8, is_v5: bool) -> Result<Self, DecodeError> {
        // Bits 6 and 7 are reserved in 5.0; bits 2..=7 in 3.1.1. A violation
        // is a Malformed Packet [MQTT-3.8.3-5].
        let reserved_mask = if is_v5 { 0b1100_0000 } else { 0b1111_1100 };
        if byte & reserved_mask != 0 {
            return Err(DecodeError::InvalidPacketFlags);
        }
        let qos = QoS::try_from(byte & 0b0000_0011)?;
        if !is_v5 {
            return Ok(Self::with_qos(qos));
        }
        Ok(Self {
            qos,
            no_local: byte & 0b0000_0100 != 0,
            retain_as_published: byte & 0b0000_1000 != 0,
            retain_handling: RetainHandling::try_from((byte & 0b0011_0000) >> 4)?,
        })
    }
}

/// Filter/options pair of the SUBSCRIBE payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SubscribeTopic {
    filter: SubTopic,
    options: SubscriptionOptions,
}

impl SubscribeTopic {
    /// Create a new filter/options pair.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub fn new(filter: &str, options: SubscriptionOptions) -> Result<Self, EncodeError> {
        Ok(Self {
            filter: SubTopic::new(filter)?,
            options,
        })
    }

    #[must_use]
    pub fn filter(&self) -> &str {
        self.filter.as_ref()
    }

    #[must_use]
    pub const fn options(&self) -> SubscriptionOptions {
        self.options
    }

    fn bytes(&self) -> usize {
        self.filter.bytes() + 1
    }
}

/// SUBSCRIBE creates one or more Subscriptions, each registering one Topic
/// Filter and the maximum QoS to deliver at.
///
/// ```txt
/// +-----------------------+
/// | Fixed header          |
/// +-----------------------+
/// | Packet id             |
/// +-----------------------+
/// | Properties (5.0 only) |
/// +-----------------------+
/// | Topic filter 0        |
/// +-----------------------+
/// | Options byte 0        |
/// +-----------------------+
/// | Topic filter N ...    |
/// +-----------------------+
/// ```
///
/// The payload MUST contain at least one Topic Filter / options pair
/// [MQTT-3.8.3-2].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq)]
pub struct SubscribePacket {
    packet_id: PacketId,
    properties: Properties,
    topics: Vec<SubscribeTopic>,
}

impl SubscribePacket {
    /// Create a packet subscribing a single `filter` at `qos`.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub fn new(filter: &str, qos: QoS, packet_id: PacketId) -> Result<Self, EncodeError> {
        let topic = SubscribeTopic::new(filter, SubscriptionOptions::with_qos(qos))?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![topic],
        })
    }

    /// Create a packet from a prepared filter list.
    #[must_use]
    pub fn with_topics(packet_id: PacketId, topics: Vec<SubscribeTopic>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            topics,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[SubscribeTopic] {
        &self.topics
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }

    fn remaining_length(&self, is_v5: bool) -> usize {
        let mut len = PacketId::bytes();
        if is_v5 {
            len += self.properties.bytes();
        }
        len += self.topics.iter().map(SubscribeTopic::bytes).sum::<usize>();
        len
    }
}

impl EncodePacket for SubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError> {
        if self.topics.is_empty() {
            return Err(EncodeError::InvalidData);
        }
        let old_len = buf.len();
        let is_v5 = level.is_v5();

        let fixed_header = FixedHeader::new(PacketType::Subscribe, self.remaining_length(is_v5))?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        if is_v5 {
            self.properties.encode(buf)?;
        }
        for topic in &self.topics {
            topic.filter.encode(buf)?;
            buf.push(topic.options.encode_byte(is_v5));
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for SubscribePacket {
    fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Subscribe {
            return Err(DecodeError::InvalidPacketType);
        }
        let is_v5 = level.is_v5();
        let body_start = ba.offset();

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }
        let properties = if is_v5 {
            Properties::decode(ba, SUBSCRIBE_PROPERTIES)?
        } else {
            Properties::new()
        };

        let mut topics = Vec::new();
        while ba.offset() - body_start < fixed_header.remaining_length() {
            let filter = SubTopic::decode(ba)?;
            let options = SubscriptionOptions::decode_byte(ba.read_byte()?, is_v5)?;
            topics.push(SubscribeTopic { filter, options });
        }
        if topics.is_empty() {
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            packet_id,
            properties,
            topics,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v311_round_trip() {
        let packet = SubscribePacket::new("sensors/+/temp", QoS::AtLeastOnce, PacketId::new(3))
            .unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        assert_eq!(buf[0], 0x82);
        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribePacket::decode(&mut ba, ProtocolLevel::V311).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_v5_options_round_trip() {
        let options = SubscriptionOptions {
            qos: QoS::ExactOnce,
            no_local: true,
            retain_as_published: true,
            retain_handling: RetainHandling::DoNotSend,
        };
        let topic = SubscribeTopic::new("a/#", options).unwrap();
        let mut packet = SubscribePacket::with_topics(PacketId::new(8), vec![topic]);
        packet.properties_mut().subscription_identifiers.push(42);

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribePacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
        assert_eq!(decoded.topics()[0].options(), options);
    }

    #[test]
    fn test_v311_reduces_options_to_qos() {
        let options = SubscriptionOptions {
            qos: QoS::AtLeastOnce,
            no_local: true,
            retain_as_published: true,
            retain_handling: RetainHandling::DoNotSend,
        };
        let topic = SubscribeTopic::new("a/b", options).unwrap();
        let packet = SubscribePacket::with_topics(PacketId::new(2), vec![topic]);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        // The final options byte carries only the QoS bits.
        assert_eq!(buf[buf.len() - 1], 0x01);
    }

    #[test]
    fn test_multiple_filters() {
        let topics = vec![
            SubscribeTopic::new("a", SubscriptionOptions::with_qos(QoS::AtMostOnce)).unwrap(),
            SubscribeTopic::new("b/#", SubscriptionOptions::with_qos(QoS::ExactOnce)).unwrap(),
        ];
        let packet = SubscribePacket::with_topics(PacketId::new(7), topics);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribePacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded.topics().len(), 2);
    }
}
