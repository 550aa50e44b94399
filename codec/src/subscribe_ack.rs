// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::PropertyId;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, ProtocolLevel, ReasonCode,
};

/// Reason codes available per filter in SUBACK packets.
pub const SUBSCRIBE_ACK_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::GrantedQoS1,
    ReasonCode::GrantedQoS2,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::SharedSubscriptionNotSupported,
    ReasonCode::SubscriptionIdentifiersNotSupported,
    ReasonCode::WildcardSubscriptionsNotSupported,
];

/// Properties available in SUBACK packets.
pub const SUBSCRIBE_ACK_PROPERTIES: &[PropertyId] =
    &[PropertyId::ReasonString, PropertyId::UserProperty];

/// SUBACK acknowledges a SUBSCRIBE packet.
///
/// The payload contains one Reason Code per Topic Filter of the SUBSCRIBE
/// being acknowledged, in the same order [MQTT-3.9.3-1]. On a 3.1.1
/// connection the payload bytes are return codes 0x00/0x01/0x02/0x80,
/// mapped here onto the same reason-code vocabulary.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SubscribeAckPacket {
    packet_id: PacketId,
    properties: Properties,
    reasons: Vec<ReasonCode>,
}

fn reason_from_v3_return_code(code: u8) -> Result<ReasonCode, DecodeError> {
    match code {
        0x00 => Ok(ReasonCode::Success),
        0x01 => Ok(ReasonCode::GrantedQoS1),
        0x02 => Ok(ReasonCode::GrantedQoS2),
        0x80 => Ok(ReasonCode::UnspecifiedError),
        _ => Err(DecodeError::InvalidReasonCode),
    }
}

fn v3_return_code_from_reason(reason: ReasonCode) -> u8 {
    match reason {
        ReasonCode::Success => 0x00,
        ReasonCode::GrantedQoS1 => 0x01,
        ReasonCode::GrantedQoS2 => 0x02,
        _ => 0x80,
    }
}

impl SubscribeAckPacket {
    /// Create an ack carrying a single reason code.
    #[must_use]
    pub fn new(packet_id: PacketId, reason: ReasonCode) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            reasons: vec![reason],
        }
    }

    /// Create an ack carrying one reason code per filter.
    #[must_use]
    pub fn with_reasons(packet_id: PacketId, reasons: Vec<ReasonCode>) -> Self {
        Self {
            packet_id,
            properties: Properties::new(),
            reasons,
        }
    }

    #[must_use]
    pub const fn packet_id(&self) -> PacketId {
        self.packet_id
    }

    #[must_use]
    pub fn reasons(&self) -> &[ReasonCode] {
        &self.reasons
    }

    #[must_use]
    pub const fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn properties_mut(&mut self) -> &mut Properties {
        &mut self.properties
    }
}

impl EncodePacket for SubscribeAckPacket {
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError> {
        let old_len = buf.len();
        let is_v5 = level.is_v5();

        let mut remaining_length = PacketId::bytes() + self.reasons.len();
        if is_v5 {
            remaining_length += self.properties.bytes();
        }
        let fixed_header = FixedHeader::new(PacketType::SubscribeAck, remaining_length)?;
        fixed_header.encode(buf)?;
        self.packet_id.encode(buf)?;
        if is_v5 {
            self.properties.encode(buf)?;
            for reason in &self.reasons {
                reason.encode(buf)?;
            }
        } else {
            for reason in &self.reasons {
                buf.push(v3_return_code_from_reason(*reason));
            }
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for SubscribeAckPacket {
    fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::SubscribeAck {
            return Err(DecodeError::InvalidPacketType);
        }
        let body_start = ba.offset();

        let packet_id = PacketId::decode(ba)?;
        let properties = if level.is_v5() {
            Properties::decode(ba, SUBSCRIBE_ACK_PROPERTIES)?
        } else {
            Properties::new()
        };

        let mut reasons = Vec::new();
        while ba.offset() - body_start < fixed_header.remaining_length() {
            let reason = if level.is_v5() {
                let reason = ReasonCode::decode(ba)?;
                if !SUBSCRIBE_ACK_REASONS.contains(&reason) {
                    return Err(DecodeError::InvalidReasonCode);
                }
                reason
            } else {
                reason_from_v3_return_code(ba.read_byte()?)?
            };
            reasons.push(reason);
        }
        if reasons.is_empty() {
            // A SUBACK MUST contain one reason code per requested filter.
            return Err(DecodeError::InvalidRemainingLength);
        }

        Ok(Self {
            packet_id,
            properties,
            reasons,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v5_round_trip() {
        let packet = SubscribeAckPacket::with_reasons(
            PacketId::new(3),
            vec![
                ReasonCode::GrantedQoS1,
                ReasonCode::Success,
                ReasonCode::UnspecifiedError,
            ],
        );
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribeAckPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_v311_return_codes() {
        let buf = [0x90, 0x04, 0x00, 0x01, 0x01, 0x80];
        let mut ba = ByteArray::new(&buf);
        let decoded = SubscribeAckPacket::decode(&mut ba, ProtocolLevel::V311).unwrap();
        assert_eq!(
            decoded.reasons(),
            [ReasonCode::GrantedQoS1, ReasonCode::UnspecifiedError]
        );
    }

    #[test]
    fn test_v311_invalid_return_code() {
        let buf = [0x90, 0x03, 0x00, 0x01, 0x42];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            SubscribeAckPacket::decode(&mut ba, ProtocolLevel::V311),
            Err(DecodeError::InvalidReasonCode)
        );
    }
}
