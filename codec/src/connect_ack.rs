// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::property::PropertyId;
use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    Properties, ProtocolLevel, ReasonCode,
};

/// Reason codes a CONNACK may carry. A server sending any non-success code
/// MUST close the network connection afterwards.
pub const CONNECT_ACK_REASONS: &[ReasonCode] = &[
    ReasonCode::Success,
    ReasonCode::UnspecifiedError,
    ReasonCode::MalformedPacket,
    ReasonCode::ProtocolError,
    ReasonCode::ImplementationSpecificError,
    ReasonCode::UnsupportedProtocolVersion,
    ReasonCode::ClientIdentifierNotValid,
    ReasonCode::BadUserNameOrPassword,
    ReasonCode::NotAuthorized,
    ReasonCode::ServerUnavailable,
    ReasonCode::ServerBusy,
    ReasonCode::Banned,
    ReasonCode::BadAuthenticationMethod,
    ReasonCode::TopicNameInvalid,
    ReasonCode::PacketTooLarge,
    ReasonCode::QuotaExceeded,
    ReasonCode::PayloadFormatInvalid,
    ReasonCode::RetainNotSupported,
    ReasonCode::QoSNotSupported,
    ReasonCode::UseAnotherServer,
    ReasonCode::ServerMoved,
    ReasonCode::ConnectionRateExceeded,
];

/// Properties available in CONNACK packets.
pub const CONNECT_ACK_PROPERTIES: &[PropertyId] = &[
    PropertyId::SessionExpiryInterval,
    PropertyId::ReceiveMaximum,
    PropertyId::MaximumQoS,
    PropertyId::RetainAvailable,
    PropertyId::MaximumPacketSize,
    PropertyId::AssignedClientIdentifier,
    PropertyId::TopicAliasMaximum,
    PropertyId::ReasonString,
    PropertyId::UserProperty,
    PropertyId::WildcardSubscriptionAvailable,
    PropertyId::SubscriptionIdentifierAvailable,
    PropertyId::SharedSubscriptionAvailable,
    PropertyId::ServerKeepAlive,
    PropertyId::ResponseInformation,
    PropertyId::ServerReference,
    PropertyId::AuthenticationMethod,
    PropertyId::AuthenticationData,
];

/// Map a 3.1.1 connect return code byte onto the 5.0 reason-code
/// vocabulary so that callers handle one code space.
fn reason_from_v3_return_code(code: u8) -> Result<ReasonCode, DecodeError> {
    match code {
        0 => Ok(ReasonCode::Success),
        1 => Ok(ReasonCode::UnsupportedProtocolVersion),
        2 => Ok(ReasonCode::ClientIdentifierNotValid),
        3 => Ok(ReasonCode::ServerUnavailable),
        4 => Ok(ReasonCode::BadUserNameOrPassword),
        5 => Ok(ReasonCode::NotAuthorized),
        _ => Err(DecodeError::InvalidReasonCode),
    }
}

fn v3_return_code_from_reason(reason: ReasonCode) -> u8 {
    match reason {
        ReasonCode::Success => 0,
        ReasonCode::UnsupportedProtocolVersion => 1,
        ReasonCode::ClientIdentifierNotValid => 2,
        ReasonCode::ServerUnavailable => 3,
        ReasonCode::BadUserNameOrPassword => 4,
        _ => 5,
    }
}

/// CONNACK is the packet sent by the Server in response to a CONNECT packet.
///
/// The Server MUST send a CONNACK with a 0x00 (Success) Reason Code before
/// sending any Packet other than AUTH [MQTT-3.2.0-1], and MUST NOT send more
/// than one CONNACK in a Network Connection [MQTT-3.2.0-2].
///
/// ```txt
/// +-------------------------+
/// | Fixed header            |
/// +-------------------------+
/// | Ack flags               |
/// +-------------------------+
/// | Reason code             |
/// +-------------------------+
/// | Properties (5.0 only)   |
/// +-------------------------+
/// ```
#[allow(clippy::module_name_repetitions)]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectAckPacket {
    /// Bit 0 of the ack flags. True when the Server already holds Session
    /// State for this client id; MUST be false together with a non-zero
    /// reason code [MQTT-3.2.2-6].
    session_present: bool,

    reason_code: ReasonCode,

    properties: Properties,
}

impl ConnectAckPacket {
    /// Create a new connect ack packet.
    #[must_use]
    pub fn new(mut session_present: bool, reason_code: ReasonCode) -> Self {
        if reason_code != ReasonCode::Success {
            session_present = false;
        }
        Self {
            session_present,
            reason_code,
            properties: Properties::new(),
        }
    }

    #[must_use]
    pub const fn session_present(&self) -> bool {
        self.session_present
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

impl EncodePacket for ConnectAckPacket {
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError> {
        let old_len = buf.len();

        let remaining_length = if level.is_v5() {
            1 + ReasonCode::bytes() + self.properties.bytes()
        } else {
            2
        };
        let fixed_header = FixedHeader::new(PacketType::ConnectAck, remaining_length)?;
        fixed_header.encode(buf)?;

        buf.push(u8::from(self.session_present));
        if level.is_v5() {
            self.reason_code.encode(buf)?;
            self.properties.encode(buf)?;
        } else {
            buf.push(v3_return_code_from_reason(self.reason_code));
        }

        Ok(buf.len() - old_len)
    }
}

impl DecodePacket for ConnectAckPacket {
    fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError> {
        let fixed_header = FixedHeader::decode(ba)?;
        if fixed_header.packet_type() != PacketType::ConnectAck {
            return Err(DecodeError::InvalidPacketType);
        }

        let ack_flags = ba.read_byte()?;
        if ack_flags & 0b1111_1110 != 0 {
            // Bits 7-1 are reserved and MUST be set to 0 [MQTT-3.2.2-1].
            return Err(DecodeError::InvalidPacketFlags);
        }
        let session_present = ack_flags & 0b0000_0001 != 0;

        let (reason_code, properties) = if level.is_v5() {
            let reason_code = ReasonCode::decode(ba)?;
            if !CONNECT_ACK_REASONS.contains(&reason_code) {
                log::error!("connect_ack: invalid reason code {reason_code:?}");
                return Err(DecodeError::InvalidReasonCode);
            }
            let properties = Properties::decode(ba, CONNECT_ACK_PROPERTIES)?;
            (reason_code, properties)
        } else {
            let reason_code = reason_from_v3_return_code(ba.read_byte()?)?;
            (reason_code, Properties::new())
        };

        Ok(Self {
            session_present,
            reason_code,
            properties,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v5_round_trip() {
        let mut packet = ConnectAckPacket::new(true, ReasonCode::Success);
        packet.properties_mut().receive_maximum = Some(10);
        packet.properties_mut().topic_alias_maximum = Some(5);
        packet.properties_mut().server_keep_alive = Some(30);

        let mut buf = Vec::new();
        packet.encode(&mut buf, ProtocolLevel::V5).unwrap();
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectAckPacket::decode(&mut ba, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_v311_return_code() {
        let buf = [0x20, 0x02, 0x00, 0x05];
        let mut ba = ByteArray::new(&buf);
        let decoded = ConnectAckPacket::decode(&mut ba, ProtocolLevel::V311).unwrap();
        assert!(!decoded.session_present());
        assert_eq!(decoded.reason_code(), ReasonCode::NotAuthorized);
    }

    #[test]
    fn test_session_present_cleared_on_failure() {
        let packet = ConnectAckPacket::new(true, ReasonCode::ServerUnavailable);
        assert!(!packet.session_present());
    }

    #[test]
    fn test_reserved_ack_flags() {
        let buf = [0x20, 0x02, 0x02, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            ConnectAckPacket::decode(&mut ba, ProtocolLevel::V311),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
