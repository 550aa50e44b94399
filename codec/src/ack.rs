// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! PUBACK, PUBREC, PUBREL and PUBCOMP.
//!
//! The four acknowledgement packets of the QoS 1 and QoS 2 delivery
//! protocols share one wire shape: packet id, then on a 5.0 connection an
//! optional reason code and optional properties. A remaining length of 2
//! means success with no properties; of 3, a bare reason code.

use crate::property::PropertyId;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketId,
    PacketType, Properties, ProtocolLevel, ReasonCode,
};

/// Properties available in all four acknowledgement packets.
pub const PUBLISH_ACK_PROPERTIES: &[PropertyId] =
    &[PropertyId::ReasonString, PropertyId::UserProperty];

/// Reason codes available in PUBACK and PUBREC.
pub const PUBLISH_ACK_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::NoMatchingSubscribers,
    ReasonCode::UnspecifiedError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketIdentifierInUse,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
];

/// Reason codes available in PUBREL and PUBCOMP.
pub const PUBLISH_RELEASE_REASONS: &[ReasonCode] =
    &[ReasonCode::Success, ReasonCode::PacketIdentifierNotFound];

macro_rules! publish_ack_packet {
    ($(#[$doc:meta])* $name:ident, $packet_type:expr, $reasons:expr) => {
        $(#[$doc])*
        #[derive(Clone, Debug, Default, PartialEq)]
        pub struct $name {
            packet_id: PacketId,
            reason_code: ReasonCode,
            properties: Properties,
        }

        impl $name {
            /// Create a success acknowledgement for `packet_id`.
            #[must_use]
            pub fn new(packet_id: PacketId) -> Self {
                Self {
                    packet_id,
                    reason_code: ReasonCode::Success,
                    properties: Properties::new(),
                }
            }

            /// Create an acknowledgement carrying `reason_code`.
            ///
            /// # Errors
            ///
            /// Returns error if `reason_code` is not valid for this kind.
            pub fn with_reason(
                packet_id: PacketId,
                reason_code: ReasonCode,
            ) -> Result<Self, EncodeError> {
                if !$reasons.contains(&reason_code) {
                    return Err(EncodeError::InvalidReasonCode);
                }
                Ok(Self {
                    packet_id,
                    reason_code,
                    properties: Properties::new(),
                })
            }

            #[must_use]
            pub const fn packet_id(&self) -> PacketId {
                self.packet_id
            }

            #[must_use]
            pub const fn reason_code(&self) -> ReasonCode {
                self.reason_code
            }

            #[must_use]
            pub const fn properties(&self) -> &Properties {
                &self.properties
            }

            pub fn properties_mut(&mut self) -> &mut Properties {
                &mut self.properties
            }
        }

        impl EncodePacket for $name {
            fn encode(
                &self,
                buf: &mut Vec<u8>,
                level: ProtocolLevel,
            ) -> Result<usize, EncodeError> {
                let old_len = buf.len();

                let compact = !level.is_v5()
                    || (self.reason_code == ReasonCode::Success
                        && self.properties.is_empty());
                let remaining_length = if compact {
                    PacketId::bytes()
                } else {
                    PacketId::bytes() + ReasonCode::bytes() + self.properties.bytes()
                };

                let fixed_header = FixedHeader::new($packet_type, remaining_length)?;
                fixed_header.encode(buf)?;
                self.packet_id.encode(buf)?;
                if !compact {
                    self.reason_code.encode(buf)?;
                    self.properties.encode(buf)?;
                }

                Ok(buf.len() - old_len)
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError> {
                let fixed_header = FixedHeader::decode(ba)?;
                if fixed_header.packet_type() != $packet_type {
                    return Err(DecodeError::InvalidPacketType);
                }
                let remaining_length = fixed_header.remaining_length();
                if remaining_length < PacketId::bytes() {
                    return Err(DecodeError::InvalidRemainingLength);
                }

                let packet_id = PacketId::decode(ba)?;
                let mut reason_code = ReasonCode::Success;
                let mut properties = Properties::new();
                if level.is_v5() && remaining_length > PacketId::bytes() {
                    reason_code = ReasonCode::decode(ba)?;
                    if !$reasons.contains(&reason_code) {
                        log::error!(
                            "{}: invalid reason code {:?}",
                            stringify!($name),
                            reason_code
                        );
                        return Err(DecodeError::InvalidReasonCode);
                    }
                    if remaining_length > PacketId::bytes() + ReasonCode::bytes() {
                        properties = Properties::decode(ba, PUBLISH_ACK_PROPERTIES)?;
                    }
                }

                Ok(Self {
                    packet_id,
                    reason_code,
                    properties,
                })
            }
        }
    };
}

publish_ack_packet!(
    /// Response to a PUBLISH packet with QoS 1.
    PublishAckPacket,
    PacketType::PublishAck,
    PUBLISH_ACK_REASONS
);

publish_ack_packet!(
    /// Response to a PUBLISH packet with QoS 2; the first step of the
    /// exactly-once handshake.
    PublishReceivedPacket,
    PacketType::PublishReceived,
    PUBLISH_ACK_REASONS
);

publish_ack_packet!(
    /// Response to a PUBREC packet; the second step of the exactly-once
    /// handshake.
    PublishReleasePacket,
    PacketType::PublishRelease,
    PUBLISH_RELEASE_REASONS
);

publish_ack_packet!(
    /// Response to a PUBREL packet; the final step of the exactly-once
    /// handshake.
    PublishCompletePacket,
    PacketType::PublishComplete,
    PUBLISH_RELEASE_REASONS
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_form() {
        let packet = PublishAckPacket::new(PacketId::new(5));
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        assert_eq!(buf, [0x40, 0x02, 0x00, 0x05]);
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishAckPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_v5_reason_round_trip() {
        let mut packet =
            PublishReceivedPacket::with_reason(PacketId::new(9), ReasonCode::QuotaExceeded)
                .unwrap();
        packet.properties_mut().reason_string =
            Some(crate::StringData::from("throttled").unwrap());
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = PublishReceivedPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_v311_never_writes_reason() {
        let packet =
            PublishAckPacket::with_reason(PacketId::new(2), ReasonCode::NotAuthorized).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        assert_eq!(buf, [0x40, 0x02, 0x00, 0x02]);
    }

    #[test]
    fn test_pubrel_header_flags() {
        let packet = PublishReleasePacket::new(PacketId::new(1));
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        // Bits 3-0 of the PUBREL header MUST be 0010 [MQTT-3.6.1-1].
        assert_eq!(buf[0], 0x62);
    }

    #[test]
    fn test_invalid_reason_for_kind() {
        assert_eq!(
            PublishReleasePacket::with_reason(PacketId::new(1), ReasonCode::NotAuthorized),
            Err(EncodeError::InvalidReasonCode)
        );
    }
}
