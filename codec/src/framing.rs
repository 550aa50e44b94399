// Copyright (c) 2024 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Apache-2.0 License that can be found
// in the LICENSE file.

//! Packet framing over an async byte stream.
//!
//! The read path pulls the fixed header byte by byte, enforces the
//! negotiated incoming size limit, then reads the body into a pooled
//! buffer and hands the whole frame to [`Packet::decode`]. The write path
//! serializes into a scratch vector and writes it in one call, so a
//! packet is never interleaved on the transport.

use std::sync::Mutex;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::var_int::VAR_INT_MAX;
use crate::{DecodeError, EncodeError, EncodePacket, Packet, ProtocolLevel};

/// Size of a pooled body buffer. Bodies larger than this allocate
/// directly and are not returned to the pool.
pub const CHUNK_SIZE: usize = 4096;

/// Upper bound on idle pooled buffers kept around.
const POOL_LIMIT: usize = 64;

/// Process-wide pool of body buffers, shared by every connection.
static POOL: Mutex<Vec<BytesMut>> = Mutex::new(Vec::new());

fn acquire_buf() -> BytesMut {
    if let Ok(mut pool) = POOL.lock() {
        if let Some(buf) = pool.pop() {
            return buf;
        }
    }
    BytesMut::with_capacity(CHUNK_SIZE)
}

fn release_buf(mut buf: BytesMut) {
    if buf.capacity() != CHUNK_SIZE {
        return;
    }
    buf.clear();
    if let Ok(mut pool) = POOL.lock() {
        if pool.len() < POOL_LIMIT {
            pool.push(buf);
        }
    }
}

/// Read one complete control packet from `reader`.
///
/// When `max_incoming` is non-zero and the remaining length exceeds it,
/// the body is drained off the stream and `PacketTooLarge` is returned,
/// leaving the stream positioned at the next packet.
///
/// # Errors
///
/// Returns error on transport failure, an oversized or malformed frame,
/// or packet bytes that do not parse at `level`.
pub async fn read_packet<R>(
    reader: &mut R,
    level: ProtocolLevel,
    max_incoming: usize,
) -> Result<Packet, DecodeError>
where
    R: AsyncRead + Unpin,
{
    // Fixed header: type/flags byte plus a 1-4 byte remaining length.
    let mut header = [0u8; 5];
    header[0] = reader.read_u8().await?;
    let mut header_len = 1;

    let mut remaining: usize = 0;
    let mut shift: u32 = 0;
    loop {
        let byte = reader.read_u8().await?;
        header[header_len] = byte;
        header_len += 1;
        remaining |= usize::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
        if shift > 21 {
            return Err(DecodeError::InvalidVarInt);
        }
    }
    if remaining > VAR_INT_MAX {
        return Err(DecodeError::InvalidVarInt);
    }

    if max_incoming > 0 && remaining > max_incoming {
        log::warn!("framing: dropping {remaining} byte packet, limit is {max_incoming}");
        let mut left = remaining;
        let mut scratch = [0u8; CHUNK_SIZE];
        while left > 0 {
            let n = left.min(CHUNK_SIZE);
            reader.read_exact(&mut scratch[..n]).await?;
            left -= n;
        }
        return Err(DecodeError::PacketTooLarge);
    }

    let total = header_len + remaining;
    let mut buf = if total <= CHUNK_SIZE {
        acquire_buf()
    } else {
        BytesMut::with_capacity(total)
    };
    buf.resize(total, 0);
    buf[..header_len].copy_from_slice(&header[..header_len]);
    reader.read_exact(&mut buf[header_len..]).await?;

    let result = Packet::decode(&buf, level);
    release_buf(buf);
    result
}

/// Serialize `packet` and write it to `writer` in a single call.
///
/// # Errors
///
/// Returns error if encoding fails or the transport write fails.
pub async fn write_packet<W>(
    writer: &mut W,
    packet: &Packet,
    level: ProtocolLevel,
) -> Result<usize, EncodeError>
where
    W: AsyncWrite + Unpin,
{
    let mut buf = Vec::with_capacity(CHUNK_SIZE);
    let n = packet.encode(&mut buf, level)?;
    writer.write_all(&buf).await?;
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PacketId, PublishPacket, QoS};

    #[tokio::test]
    async fn test_read_write_round_trip() {
        let mut publish = PublishPacket::new("a/b", QoS::AtLeastOnce, b"payload").unwrap();
        publish.set_packet_id(PacketId::new(3));
        let packet = Packet::Publish(publish);

        let mut wire = Vec::new();
        write_packet(&mut wire, &packet, ProtocolLevel::V5)
            .await
            .unwrap();
        let mut cursor = wire.as_slice();
        let decoded = read_packet(&mut cursor, ProtocolLevel::V5, 0).await.unwrap();
        assert_eq!(decoded, packet);
    }

    #[tokio::test]
    async fn test_oversize_packet_is_drained() {
        let big = PublishPacket::new("t", QoS::AtMostOnce, &[0xaa; 600]).unwrap();
        let small = PublishPacket::new("t", QoS::AtMostOnce, b"ok").unwrap();
        let mut wire = Vec::new();
        write_packet(&mut wire, &Packet::Publish(big), ProtocolLevel::V5)
            .await
            .unwrap();
        write_packet(&mut wire, &Packet::Publish(small.clone()), ProtocolLevel::V5)
            .await
            .unwrap();

        let mut cursor = wire.as_slice();
        assert_eq!(
            read_packet(&mut cursor, ProtocolLevel::V5, 128).await,
            Err(DecodeError::PacketTooLarge)
        );
        // The stream is positioned at the next packet afterwards.
        let decoded = read_packet(&mut cursor, ProtocolLevel::V5, 128).await.unwrap();
        assert_eq!(decoded, Packet::Publish(small));
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let mut publish = PublishPacket::new("a/b", QoS::AtMostOnce, b"xyz").unwrap();
        publish.set_retain(true);
        let mut wire = Vec::new();
        write_packet(&mut wire, &Packet::Publish(publish), ProtocolLevel::V5)
            .await
            .unwrap();
        wire.truncate(wire.len() - 1);
        let mut cursor = wire.as_slice();
        assert_eq!(
            read_packet(&mut cursor, ProtocolLevel::V5, 0).await,
            Err(DecodeError::OutOfRange)
        );
    }
}
