// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::PropertyId;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, ProtocolLevel, ReasonCode,
};

/// Reason codes available in AUTH packets.
pub const AUTH_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::ContinueAuthentication,
    ReasonCode::ReAuthenticate,
];

/// Properties available in AUTH packets.
pub const AUTH_PROPERTIES: &[PropertyId] = &[
    PropertyId::AuthenticationMethod,
    PropertyId::AuthenticationData,
    PropertyId::ReasonString,
    PropertyId::UserProperty,
];

/// AUTH carries an enhanced authentication exchange, MQTT 5.0 only.
///
/// The Authentication Method property MUST be present whenever the packet
/// carries a non-empty body; a remaining length of zero stands for a
/// Success reason with no properties.
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AuthPacket {
    reason_code: ReasonCode,
    properties: Properties,
}

impl AuthPacket {
    /// Create an AUTH packet with `reason_code`.
    ///
    /// # Errors
    ///
    /// Returns error if `reason_code` cannot appear in AUTH.
    pub fn new(reason_code: ReasonCode) -> Result<Self, EncodeError> {
        if !AUTH_REASONS.contains(&reason_code) {
            return Err(EncodeError::InvalidReasonCode);
        }
        Ok(Self {
            reason_code,
            properties: Properties::new(),
        })
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

impl EncodePacket for AuthPacket {
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError> {
        // AUTH does not exist before 5.0; encoding one on an older wire is
        // a caller bug, not a droppable field.
        if !level.is_v5() {
            return Err(EncodeError::InvalidPacketType);
        }
        let old_len = buf.len();

        let compact = self.reason_code == ReasonCode::Success && self.properties.is_empty();
        let remaining_length = if compact {
            0
        } else {
            ReasonCode::bytes() + self.properties.bytes()
        };
        let fixed_header = FixedHeader::new(PacketType::Auth, remaining_length)?;
        fixed_header.encode(buf)?;
        if !compact {
            self.reason_code.encode(buf)?;
            self.properties.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for AuthPacket {
    fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError> {
        if !level.is_v5() {
            return Err(DecodeError::InvalidPacketType);
        }
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Auth {
            return Err(DecodeError::InvalidPacketType);
        }

        let mut reason_code = ReasonCode::Success;
        let mut properties = Properties::new();
        if fixed_header.remaining_length() > 0 {
            reason_code = ReasonCode::decode(ba)?;
            if !AUTH_REASONS.contains(&reason_code) {
                return Err(DecodeError::InvalidReasonCode);
            }
            if fixed_header.remaining_length() > ReasonCode::bytes() {
                properties = Properties::decode(ba, AUTH_PROPERTIES)?;
                if properties.authentication_method.is_none() {
                    // Authentication Data without a Method is a Protocol
                    // Error [MQTT-3.15.2].
                    if properties.authentication_data.is_some() {
                        return Err(DecodeError::InvalidPropertyValue);
                    }
                }
            }
        }

        Ok(Self {
            reason_code,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::StringData;

    #[test]
    fn test_round_trip() {
        let mut packet = AuthPacket::new(ReasonCode::ContinueAuthentication).unwrap();
        packet.properties_mut().authentication_method =
            Some(StringData::from("SCRAM-SHA-1").unwrap());
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = AuthPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_rejected_on_v311() {
        let packet = AuthPacket::new(ReasonCode::Success).unwrap();
        let mut buf = Vec::new();
        assert_eq!(
            packet.encode(&mut buf, ProtocolLevel::V311),
            Err(EncodeError::InvalidPacketType)
        );
    }
}
