// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::PropertyId;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, ProtocolLevel, ReasonCode,
};

/// Reason codes available in DISCONNECT packets.
pub const DISCONNECT_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::DisconnectWithWillMessage,
    ReasonCode::UnspecifiedError,
    ReasonCode::MalformedPacket,
    ReasonCode::ProtocolError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::NotAuthorized,
    ReasonCode::ServerBusy,
    ReasonCode::ServerShuttingDown,
    ReasonCode::BadAuthenticationMethod,
    ReasonCode::KeepAliveTimeout,
    ReasonCode::SessionTakenOver,
    ReasonCode::TopicFilterInvalid,
    ReasonCode::TopicNameInvalid,
    ReasonCode::ReceiveMaximumExceeded,
    ReasonCode::TopicAliasInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::MessageRateTooHigh,
    ReasonCode::QuotaExceeded,
    ReasonCode::AdministrativeAction,
    ReasonCode::PayloadFormatInvalid,
    ReasonCode::RetainNotSupported,
    ReasonCode::QoSNotSupported,
    ReasonCode::UseAnotherServer,
    ReasonCode::ServerMoved,
    ReasonCode::SharedSubscriptionNotSupported,
    ReasonCode::ConnectionRateExceeded,
    ReasonCode::MaximumConnectTime,
    ReasonCode::SubscriptionIdentifiersNotSupported,
    ReasonCode::WildcardSubscriptionsNotSupported,
];

/// Properties available in DISCONNECT packets.
pub const DISCONNECT_PROPERTIES: &[PropertyId] = &[
    PropertyId::SessionExpiryInterval,
    PropertyId::ReasonString,
    PropertyId::UserProperty,
    PropertyId::ServerReference,
];

/// DISCONNECT is the final packet of a connection, sent by either side.
///
/// On a 3.1.1 wire the packet is always empty. On a 5.0 wire it may carry
/// a reason code and properties; a remaining length of zero means a normal
/// disconnection (0x00).
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DisconnectPacket {
    reason_code: ReasonCode,
    properties: Properties,
}

impl DisconnectPacket {
    /// Create a normal disconnection packet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a disconnect carrying `reason_code`.
    ///
    /// # Errors
    ///
    /// Returns error if `reason_code` cannot appear in DISCONNECT.
    pub fn with_reason(reason_code: ReasonCode) -> Result<Self, EncodeError> {
        if !DISCONNECT_REASONS.contains(&reason_code) {
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

impl EncodePacket for DisconnectPacket {
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let compact = !level.is_v5()
            || (self.reason_code == ReasonCode::Success && self.properties.is_empty());
        let remaining_length = if compact {
            0
        } else {
            ReasonCode::bytes() + self.properties.bytes()
        };
        let fixed_header = FixedHeader::new(PacketType::Disconnect, remaining_length)?;
        fixed_header.encode(buf)?;
        if !compact {
            self.reason_code.encode(buf)?;
            self.properties.encode(buf)?;
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for DisconnectPacket {
    fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::Disconnect {
            return Err(DecodeError::InvalidPacketType);
        }

        let mut reason_code = ReasonCode::Success;
        let mut properties = Properties::new();
        if level.is_v5() && fixed_header.remaining_length() > 0 {
            reason_code = ReasonCode::decode(ba)?;
            if !DISCONNECT_REASONS.contains(&reason_code) {
                log::error!("disconnect: invalid reason code {reason_code:?}");
                return Err(DecodeError::InvalidReasonCode);
            }
            if fixed_header.remaining_length() > ReasonCode::bytes() {
                properties = Properties::decode(ba, DISCONNECT_PROPERTIES)?;
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

    #[test]
    fn test_v311_always_empty() {
        let packet = DisconnectPacket::with_reason(ReasonCode::KeepAliveTimeout).unwrap();
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V311).unwrap();
        assert_eq!(buf, [0xe0, 0x00]);
    }

    #[test]
    fn test_v5_round_trip() {
        let mut packet = DisconnectPacket::with_reason(ReasonCode::TopicAliasInvalid).unwrap();
        packet.properties_mut().session_expiry_interval = Some(0);
        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = DisconnectPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_empty_v5_means_success() {
        let buf = [0xe0, 0x00];
        let mut ba = ByteArray::new(&buf);
        let decoded = DisconnectPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded.reason_code(), ReasonCode::Success);
    }
}
