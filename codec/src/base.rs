// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use std::convert::TryFrom;

use byteorder::{BigEndian, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::{ByteArray, DecodeError, EncodeError};

/// Protocol name for MQTT 3.1.1 and 5.0.
pub const PROTOCOL_NAME: &str = "MQTT";

/// Protocol name for the legacy 3.1 level.
pub const PROTOCOL_NAME_V31: &str = "MQIsdp";

/// Serialize a packet into a byte buffer.
///
/// `level` is the protocol level negotiated for the connection. Encoders
/// MUST NOT emit any 5.0-only field when `level` is 3.1 or 3.1.1.
pub trait EncodePacket {
    /// Append the wire form of `self` to `buf`, returning the number of
    /// bytes written.
    ///
    /// # Errors
    ///
    /// Returns error if a field cannot be represented at `level`.
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError>;
}

/// Parse a packet from a byte buffer positioned at its fixed header.
pub trait DecodePacket: Sized {
    /// Decode one packet at protocol `level`.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes are not a well-formed packet of this kind.
    fn decode(ba: &mut ByteArray, level: ProtocolLevel) -> Result<Self, DecodeError>;
}

/// Quality of service level of a publication.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum QoS {
    /// At most once delivery.
    #[default]
    AtMostOnce = 0,

    /// At least once delivery.
    AtLeastOnce = 1,

    /// Exactly once delivery.
    ExactOnce = 2,
}

impl QoS {
    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        1
    }

    /// Parse a QoS byte off the cursor.
    ///
    /// # Errors
    ///
    /// Returns `InvalidQoS` if the byte is not 0, 1 or 2.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Self::try_from(ba.read_byte()?)
    }

    /// Append the QoS byte to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.push(*self as u8);
        Ok(Self::bytes())
    }
}

impl TryFrom<u8> for QoS {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(Self::AtMostOnce),
            1 => Ok(Self::AtLeastOnce),
            2 => Ok(Self::ExactOnce),
            _ => Err(DecodeError::InvalidQoS),
        }
    }
}

/// Version byte in the CONNECT variable header.
#[repr(u8)]
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub enum ProtocolLevel {
    /// MQTT 3.1
    V31 = 3,

    /// MQTT 3.1.1
    V311 = 4,

    /// MQTT 5.0
    #[default]
    V5 = 5,
}

impl ProtocolLevel {
    /// Returns true for MQTT 5.0, the only level with properties and
    /// reason codes on the wire.
    #[must_use]
    pub const fn is_v5(self) -> bool {
        matches!(self, Self::V5)
    }

    /// Get the protocol name string that pairs with this level.
    #[must_use]
    pub const fn protocol_name(self) -> &'static str {
        match self {
            Self::V31 => PROTOCOL_NAME_V31,
            Self::V311 | Self::V5 => PROTOCOL_NAME,
        }
    }
}

impl TryFrom<u8> for ProtocolLevel {
    type Error = DecodeError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        match v {
            3 => Ok(Self::V31),
            4 => Ok(Self::V311),
            5 => Ok(Self::V5),
            _ => Err(DecodeError::InvalidProtocolLevel),
        }
    }
}

/// Packet identifier of QoS>0 publish, subscribe and unsubscribe packets.
///
/// Each time a Client sends a new SUBSCRIBE, UNSUBSCRIBE, or PUBLISH (where
/// QoS > 0) MQTT Control Packet it MUST assign it a non-zero Packet Identifier
/// that is currently unused [MQTT-2.2.1-3].
#[derive(
    Clone, Copy, Debug, Default, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct PacketId(u16);

impl PacketId {
    /// Wrap a raw u16 id.
    #[must_use]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    /// Get the raw id value.
    #[must_use]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// Get byte length used in packet.
    #[must_use]
    pub const fn bytes() -> usize {
        2
    }

    /// Parse a packet id off the cursor.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` if fewer than two bytes remain.
    pub fn decode(ba: &mut ByteArray) -> Result<Self, DecodeError> {
        Ok(Self(ba.read_u16()?))
    }

    /// Append the big-endian id to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) -> Result<usize, EncodeError> {
        buf.write_u16::<BigEndian>(self.0)?;
        Ok(Self::bytes())
    }
}

impl std::fmt::Display for PacketId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_decode() {
        let buf = [0x02, 0x03];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(QoS::decode(&mut ba), Ok(QoS::ExactOnce));
        assert_eq!(QoS::decode(&mut ba), Err(DecodeError::InvalidQoS));
    }

    #[test]
    fn test_protocol_level() {
        assert_eq!(ProtocolLevel::try_from(4), Ok(ProtocolLevel::V311));
        assert_eq!(
            ProtocolLevel::try_from(6),
            Err(DecodeError::InvalidProtocolLevel)
        );
        assert!(ProtocolLevel::V5.is_v5());
        assert!(!ProtocolLevel::V311.is_v5());
    }

    #[test]
    fn test_packet_id_round_trip() {
        let id = PacketId::new(0xabcd);
        let mut buf = Vec::new();
        id.encode(&mut buf).unwrap();
        assert_eq!(buf, [0xab, 0xcd]);
        let mut ba = ByteArray::new(&buf);
        assert_eq!(PacketId::decode(&mut ba), Ok(id));
    }
}
