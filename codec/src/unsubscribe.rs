// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::PropertyId;
use crate::topic::SubTopic;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, ProtocolLevel,
};

/// Properties available in UNSUBSCRIBE packets.
pub const UNSUBSCRIBE_PROPERTIES: &[PropertyId] = &[PropertyId::UserProperty];

/// UNSUBSCRIBE removes subscriptions; each Topic Filter must compare
/// byte-for-byte with a filter held by the Server [MQTT-3.10.4-1].
///
/// The payload MUST contain at least one Topic Filter [MQTT-3.10.3-2].
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, PartialEq)]
pub struct UnsubscribePacket {
    packet_id: PacketId,
    properties: Properties,
    topics: Vec<SubTopic>,
}

impl UnsubscribePacket {
    /// Create a packet removing a single `filter`.
    ///
    /// # Errors
    ///
    /// Returns error if `filter` is not a valid topic filter.
    pub fn new(filter: &str, packet_id: PacketId) -> Result<Self, EncodeError> {
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics: vec![SubTopic::new(filter)?],
        })
    }

    /// Create a packet removing several filters.
    ///
    /// # Errors
    ///
    /// Returns error if any filter is invalid.
    pub fn with_filters(packet_id: PacketId, filters: &[&str]) -> Result<Self, EncodeError> {
        let topics = filters
            .iter()
            .map(|f| SubTopic::new(f))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            packet_id,
            properties: Properties::new(),
            topics,
        })
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn topics(&self) -> &[SubTopic] {
        &self.topics
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}

impl EncodePacket for UnsubscribePacket {
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError> {
        if self.topics.is_empty() {
            return Err(EncodeError::InvalidData);
        }
        let old_len = buf.len();
        let is_v5 = level.is_v5();

        let mut remaining_length =
            PacketId::bytes() + self.topics.iter().map(SubTopic::bytes).sum::<usize>();
        if is_v5 {
            remaining_length += self.properties.bytes();
        }
        let fixed_header = FixedHeader::new(PacketType::Unsubscribe, remaining_length)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        if is_v5 {
            self.properties.encode(buf)?;
        }
        for topic in &self.topics {
            topic.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for UnsubscribePacket {
    fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Unsubscribe {
            return Err(DecodeError::InvalidPacketType);
        }
        let body_start = ba.offset();

        let packet_id = PacketId::decode(ba)?;
        if packet_id.value() == 0 {
            return Err(DecodeError::InvalidPacketId);
        }
        let properties = if level.is_v5() {
            Properties::decode(ba, UNSUBSCRIBE_PROPERTIES)?
        } else {
            Properties::new()
        };

        let mut topics = Vec::new();
        while ba.offset() - body_start < fixed_header.remaining_length() {
            topics.push(SubTopic::decode(ba)?);
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
    fn test_round_trip() {
        let packet =
            UnsubscribePacket::with_filters(PacketId::new(11), &["a/b", "c/#"]).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        assert_eq!(buf[0], 0xa2);
        let mut ba = ByteArray::new(&buf);
        let decoded = UnsubscribePacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_empty_filter_list_rejected() {
        let packet = UnsubscribePacket {
            packet_id: PacketId::new(1),
            properties: Properties::new(),
            topics: Vec::new(),
        };
        let mut buf = Vec::new();
        assert_eq!(
            packet.encode(&mut buf, ProtocolLevel::V5),
            Err(EncodeError::InvalidData)
        );
    }
}
