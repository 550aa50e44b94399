// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! PINGREQ and PINGRESP, the two body-less packets of the keep-alive
//! mechanism.

use crate::{
    ByteArray, DecodeError, DecodePacket, EncodeError, EncodePacket, FixedHeader, PacketType,
    ProtocolLevel,
};

macro_rules! ping_packet {
    ($(#[$doc:meta])* $name:ident, $packet_type:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
        pub struct $name {}

        impl $name {
            #[must_use]
            pub const fn new() -> Self {
                Self {}
            }
        }

        impl EncodePacket for $name {
            fn encode(
                &self,
                buf: &mut Vec<u8>,
                _level: ProtocolLevel,
            ) -> Result<usize, EncodeError> {
                let fixed_header = FixedHeader::new($packet_type, 0)?;
                fixed_header.encode(buf)
            }
        }

        impl DecodePacket for $name {
            fn decode(ba: &mut ByteArray, _level: ProtocolLevel) -> Result<Self, DecodeError> {
                let fixed_header = FixedHeader::decode(ba)?;
                if fixed_header.packet_type() != $packet_type {
                    return Err(DecodeError::InvalidPacketType);
                }
                if fixed_header.remaining_length() != 0 {
                    return Err(DecodeError::InvalidRemainingLength);
                }
                Ok(Self {})
            }
        }
    };
}

ping_packet!(
    /// Sent from the Client to the Server to signal liveness in the absence
    /// of other traffic [MQTT-3.1.2-20] and to probe that the Server is
    /// responding.
    PingRequestPacket,
    PacketType::PingRequest
);

ping_packet!(
    /// Sent by the Server in response to a PINGREQ.
    PingResponsePacket,
    PacketType::PingResponse
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_request() {
        let mut buf = Vec::new();
        PingRequestPacket::new()
            .encode(&mut buf, ProtocolLevel::V5)
            .unwrap();
        assert_eq!(buf, [0xc0, 0x00]);
    }

    #[test]
    fn test_ping_response() {
        let buf = [0xd0, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert!(PingResponsePacket::decode(&mut ba, ProtocolLevel::V311).is_ok());
    }

    #[test]
    fn test_nonempty_body_rejected() {
        let buf = [0xd0, 0x01, 0x00];
        let mut ba = ByteArray::new(&buf);
        assert_eq!(
            PingResponsePacket::decode(&mut ba, ProtocolLevel::V311),
            Err(DecodeError::InvalidRemainingLength)
        );
    }
}
