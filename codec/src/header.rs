// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use crate::var_int::VarIntError;
use crate::{ByteArray, DecodeError, EncodeError, QoS, VarInt};

/// Control packet type, with the PUBLISH flag bits folded into the
/// `Publish` variant so that a `PacketType` value always carries a valid
/// flag nibble.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PacketType {
    /// Request to connect to broker
    #[default]
    Connect,

    /// Broker reply to connect request
    ConnectAck,

    /// Publish message
    Publish { dup: bool, qos: QoS, retain: bool },

    /// Publish acknowledgement
    PublishAck,

    /// Publish received
    PublishReceived,

    /// Publish release
    PublishRelease,

    /// Publish complete
    PublishComplete,

    /// Client subscribe request
    Subscribe,

    /// Subscribe acknowledgement
    SubscribeAck,

    /// Unsubscribe request
    Unsubscribe,

    /// Unsubscribe acknowledgement
    UnsubscribeAck,

    /// Client ping request
    PingRequest,

    /// Server ping response
    PingResponse,

    /// Connection is being closed
    Disconnect,

    /// Authentication exchange, MQTT 5.0 only
    Auth,
}

impl PacketType {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }
}

impl From<PacketType> for u8 {
    fn from(packet_type: PacketType) -> Self {
        let type_bits: u8 = match packet_type {
            PacketType::Connect => 1,
            PacketType::ConnectAck => 2,
            PacketType::Publish { .. } => 3,
            PacketType::PublishAck => 4,
            PacketType::PublishReceived => 5,
            PacketType::PublishRelease => 6,
            PacketType::PublishComplete => 7,
            PacketType::Subscribe => 8,
            PacketType::SubscribeAck => 9,
            PacketType::Unsubscribe => 10,
            PacketType::UnsubscribeAck => 11,
            PacketType::PingRequest => 12,
            PacketType::PingResponse => 13,
            PacketType::Disconnect => 14,
            PacketType::Auth => 15,
        };

        let flag_bits: u8 = match packet_type {
            PacketType::Publish { dup, qos, retain } => {
                let dup = if dup { 0b0000_1000 } else { 0 };
                let qos = (qos as u8) << 1;
                let retain = u8::from(retain);
                dup | qos | retain
            }
            // Bits 3,2,1 and 0 of the fixed header of PUBREL, SUBSCRIBE and
            // UNSUBSCRIBE are reserved and MUST be set to 0,0,1,0
            // [MQTT-3.6.1-1], [MQTT-3.8.1-1], [MQTT-3.10.1-1].
            PacketType::PublishRelease | PacketType::Subscribe | PacketType::Unsubscribe => {
                0b0000_0010
            }
            _ => 0,
        };

        (type_bits << 4) | flag_bits
    }
}

impl TryFrom<u8> for PacketType {
    type Error = DecodeError;

    /// Parse packet type and flag bits from the first header byte.
    ///
    /// Where a flag bit is marked as "Reserved", it MUST be set to the
    /// listed value; if invalid flags are received, the receiver MUST close
    /// the Network Connection [MQTT-2.2.2-2].
    ///
    /// # Errors
    ///
    /// Returns `InvalidPacketFlags` on a reserved-bit violation and
    /// `InvalidPacketType` on type bits of zero.
    fn try_from(v: u8) -> Result<Self, Self::Error> {
        let type_bits = (v & 0b1111_0000) >> 4;
        let flag = v & 0b0000_1111;

        if type_bits == 3 {
            let dup = flag & 0b0000_1000 != 0;
            let retain = flag & 0b0000_0001 != 0;
            let qos = match flag & 0b0000_0110 {
                0b0000_0000 => QoS::AtMostOnce,
                0b0000_0010 => QoS::AtLeastOnce,
                0b0000_0100 => QoS::ExactOnce,
                _ => return Err(DecodeError::InvalidPacketFlags),
            };
            // The DUP flag MUST be set to 0 for all QoS 0 messages
            // [MQTT-3.3.1-2].
            if dup && qos == QoS::AtMostOnce {
                return Err(DecodeError::InvalidPacketFlags);
            }
            return Ok(Self::Publish { dup, qos, retain });
        }

        let (packet_type, expected_flag) = match type_bits {
            1 => (Self::Connect, 0),
            2 => (Self::ConnectAck, 0),
            4 => (Self::PublishAck, 0),
            5 => (Self::PublishReceived, 0),
            6 => (Self::PublishRelease, 0b0000_0010),
            7 => (Self::PublishComplete, 0),
            8 => (Self::Subscribe, 0b0000_0010),
            9 => (Self::SubscribeAck, 0),
            10 => (Self::Unsubscribe, 0b0000_0010),
            11 => (Self::UnsubscribeAck, 0),
            12 => (Self::PingRequest, 0),
            13 => (Self::PingResponse, 0),
            14 => (Self::Disconnect, 0),
            15 => (Self::Auth, 0),
            t => {
                log::error!("header: invalid packet type bits: {t:#b}");
                return Err(DecodeError::InvalidPacketType);
            }
        };

        if flag != expected_flag {
            log::error!("header: invalid flag bits {flag:#b} for {packet_type:?}");
            return Err(DecodeError::InvalidPacketFlags);
        }
        Ok(packet_type)
    }
}

/// Fixed header part of a control packet.
///
/// ```txt
///  7 6 5 4 3 2 1 0
/// +-------+-------+
/// | Type  | Flags |
/// +-------+-------+
/// | Remaining Len |
/// +-------+-------+
/// ```
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FixedHeader {
    packet_type: PacketType,

    /// Number of bytes remaining within the current packet, not counting
    /// the fixed header itself. Variable byte encoded, at most four bytes.
    remaining_length: VarInt,
}

impl FixedHeader {
    /// Create a new fixed header for `packet_type` with `remaining_length`.
    ///
    /// # Errors
    ///
    /// Returns error if `remaining_length` exceeds the VBI maximum.
    pub const fn new(packet_type: PacketType, remaining_length: usize) -> Result<Self, VarIntError> {
        let remaining_length = match VarInt::from(remaining_length) {
            Ok(v) => v,
            Err(e) => return Err(e),
        };
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }

    #[must_use]
    pub const fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    #[must_use]
    pub const fn remaining_length(&self) -> usize {
        self.remaining_length.value()
    }

    /// Get byte length in packet.
    #[must_use]
    pub const fn bytes(&self) -> usize {
        PacketType::bytes() + self.remaining_length.bytes()
    }

    /// Parse a fixed header off the cursor.
    ///
    /// # Errors
    ///
    /// Returns error on invalid type/flag bits or a malformed VBI.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        let flag = ba.read_byte()?;
        let packet_type = PacketType::try_from(flag)?;
        let remaining_length = VarInt::decode(ba)?;
        Ok(Self {
            packet_type,
            remaining_length,
        })
    }

    /// Append the header byte and remaining length to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(self.packet_type.into());
        let n = self.remaining_length.encode(buf)?;
        Ok(PacketType::bytes() + n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode() {
        let mut buf = Vec::new();
        let header = FixedHeader::new(PacketType::PingRequest, 0).unwrap();
        assert_eq!(header.encode(&mut buf).unwrap(), 2);
        assert_eq!(buf, [0xc0, 0x00]);
    }

    #[test]
    fn test_decode_publish() {
        let buf = [0x33, 0x07];
        let mut ba = ByteArray::new(&buf);
        let header = FixedHeader::decode(&mut ba).unwrap();
        assert_eq!(
            header.packet_type(),
            PacketType::Publish {
                dup: false,
                qos: QoS::AtLeastOnce,
                retain: true,
            }
        );
        assert_eq!(header.remaining_length(), 7);
    }

    #[test]
    fn test_reserved_flag_bits() {
        // SUBSCRIBE with flag nibble zero violates [MQTT-3.8.1-1].
        let buf = [0x80, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            FixedHeader::decode(&mut ba),
            Err(DecodeError::InvalidPacketFlags)
        );
    }

    #[test]
    fn test_invalid_qos_bits() {
        let buf = [0x36, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            FixedHeader::decode(&mut ba),
            Err(DecodeError::InvalidPacketFlags)
        );
    }
}
