// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

use crate::{
    AuthPacket, ByteArray, ConnectAckPacket, ConnectPacket, DecodeError, DecodePacket,
    DisconnectPacket, EncodeError, EncodePacket, FixedHeader, PacketType, PingRequestPacket,
    PingResponsePacket, ProtocolLevel, PublishAckPacket, PublishCompletePacket, PublishPacket,
    PublishReceivedPacket, PublishReleasePacket, SubscribeAckPacket, SubscribePacket,
    UnsubscribeAckPacket, UnsubscribePacket,
};

/// Any control packet, as produced by the read path and consumed by the
/// write path.
#[derive(Clone, Debug, PartialEq)]
pub enum Packet {
    Connect(ConnectPacket),
    ConnectAck(ConnectAckPacket),
    Publish(PublishPacket),
    PublishAck(PublishAckPacket),
    PublishReceived(PublishReceivedPacket),
    PublishRelease(PublishReleasePacket),
    PublishComplete(PublishCompletePacket),
    Subscribe(SubscribePacket),
    SubscribeAck(SubscribeAckPacket),
    Unsubscribe(UnsubscribePacket),
    UnsubscribeAck(UnsubscribeAckPacket),
    PingRequest(PingRequestPacket),
    PingResponse(PingResponsePacket),
    Disconnect(DisconnectPacket),
    Auth(AuthPacket),
}

impl Packet {
    /// Parse one complete packet from `bytes`, dispatching on the type
    /// nibble of the fixed header.
    ///
    /// # Errors
    ///
    /// Returns error if `bytes` is not a single well-formed packet at
    /// `level`.
    pub fn decode(bytes: &[u8], level: ProtocolLevel) -> Result<Self, DecodeError> {
        let mut peek = ByteArray::new(bytes);
        let fixed_header = FixedHeader::decode(&mut peek)?;

        let mut ba = ByteArray::new(bytes);
        let packet = match fixed_header.packet_type() {
            PacketType::Connect => Self::Connect(ConnectPacket::decode(&mut ba, level)?),
            PacketType::ConnectAck => Self::ConnectAck(ConnectAckPacket::decode(&mut ba, level)?),
            PacketType::Publish { .. } => Self::Publish(PublishPacket::decode(&mut ba, level)?),
            PacketType::PublishAck => Self::PublishAck(PublishAckPacket::decode(&mut ba, level)?),
            PacketType::PublishReceived => {
                Self::PublishReceived(PublishReceivedPacket::decode(&mut ba, level)?)
            }
            PacketType::PublishRelease => {
                Self::PublishRelease(PublishReleasePacket::decode(&mut ba, level)?)
            }
            PacketType::PublishComplete => {
                Self::PublishComplete(PublishCompletePacket::decode(&mut ba, level)?)
            }
            PacketType::Subscribe => Self::Subscribe(SubscribePacket::decode(&mut ba, level)?),
            PacketType::SubscribeAck => {
                Self::SubscribeAck(SubscribeAckPacket::decode(&mut ba, level)?)
            }
            PacketType::Unsubscribe => {
                Self::Unsubscribe(UnsubscribePacket::decode(&mut ba, level)?)
            }
            PacketType::UnsubscribeAck => {
                Self::UnsubscribeAck(UnsubscribeAckPacket::decode(&mut ba, level)?)
            }
            PacketType::PingRequest => {
                Self::PingRequest(PingRequestPacket::decode(&mut ba, level)?)
            }
            PacketType::PingResponse => {
                Self::PingResponse(PingResponsePacket::decode(&mut ba, level)?)
            }
            PacketType::Disconnect => Self::Disconnect(DisconnectPacket::decode(&mut ba, level)?),
            PacketType::Auth => Self::Auth(AuthPacket::decode(&mut ba, level)?),
        };
        Ok(packet)
    }

    /// Get the packet type of this packet.
    #[must_use]
    pub fn packet_type(&self) -> PacketType {
        match self {
            Self::Connect(..) => PacketType::Connect,
            Self::ConnectAck(..) => PacketType::ConnectAck,
            Self::Publish(publish) => PacketType::Publish {
                dup: publish.dup(),
                qos: publish.qos(),
                retain: publish.retain(),
            },
            Self::PublishAck(..) => PacketType::PublishAck,
            Self::PublishReceived(..) => PacketType::PublishReceived,
            Self::PublishRelease(..) => PacketType::PublishRelease,
            Self::PublishComplete(..) => PacketType::PublishComplete,
            Self::Subscribe(..) => PacketType::Subscribe,
            Self::SubscribeAck(..) => PacketType::SubscribeAck,
            Self::Unsubscribe(..) => PacketType::Unsubscribe,
            Self::UnsubscribeAck(..) => PacketType::UnsubscribeAck,
            Self::PingRequest(..) => PacketType::PingRequest,
            Self::PingResponse(..) => PacketType::PingResponse,
            Self::Disconnect(..) => PacketType::Disconnect,
            Self::Auth(..) => PacketType::Auth,
        }
    }
}

impl EncodePacket for Packet {
    fn encode(&self, buf: &mut Vec<u8>, level: ProtocolLevel) -> Result<usize, EncodeError> {
        match self {
            Self::Connect(p) => p.encode(buf, level),
            Self::ConnectAck(p) => p.encode(buf, level),
            Self::Publish(p) => p.encode(buf, level),
            Self::PublishAck(p) => p.encode(buf, level),
            Self::PublishReceived(p) => p.encode(buf, level),
            Self::PublishRelease(p) => p.encode(buf, level),
            Self::PublishComplete(p) => p.encode(buf, level),
            Self::Subscribe(p) => p.encode(buf, level),
            Self::SubscribeAck(p) => p.encode(buf, level),
            Self::Unsubscribe(p) => p.encode(buf, level),
            Self::UnsubscribeAck(p) => p.encode(buf, level),
            Self::PingRequest(p) => p.encode(buf, level),
            Self::PingResponse(p) => p.encode(buf, level),
            Self::Disconnect(p) => p.encode(buf, level),
            Self::Auth(p) => p.encode(buf, level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, QoS};

    #[test]
    fn test_dispatch_publish() {
        let mut publish = PublishPacket::new("t", QoS::AtLeastOnce, b"x").unwrap();
        publish.set_packet_id(PacketId::new(1));
        let mut buf = Vec::new();
        Packet::Publish(publish.clone())
            .encode(&mut buf, ProtocolLevel::V5)
            .unwrap();
        let decoded = Packet::decode(&buf, ProtocolLevel::V5).unwrap();
        assert_eq!(decoded, Packet::Publish(publish));
    }

    #[test]
    fn test_dispatch_ping() {
        let buf = [0xd0, 0x00];
        let decoded = Packet::decode(&buf, ProtocolLevel::V311).unwrap();
        assert_eq!(decoded.packet_type(), PacketType::PingResponse);
    }
}
