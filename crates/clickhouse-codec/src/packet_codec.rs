//! Packet framing codec.
//!
//! Each packet on the wire is a one-byte kind, a little-endian `u32` payload
//! length, then the payload.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::CodecError;

/// Size of the packet header (kind + length).
pub const PACKET_HEADER_SIZE: usize = 5;

/// Default maximum payload size accepted by the decoder.
pub const DEFAULT_MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// A framed packet: raw kind byte and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet kind; interpretation depends on the direction.
    pub kind: u8,
    /// Packet payload.
    pub payload: Bytes,
}

impl Packet {
    /// Create a packet.
    #[must_use]
    pub fn new(kind: u8, payload: Bytes) -> Self {
        Self { kind, payload }
    }

    /// Create a packet with an empty payload.
    #[must_use]
    pub fn empty(kind: u8) -> Self {
        Self {
            kind,
            payload: Bytes::new(),
        }
    }
}

/// Length-prefixed packet codec for `tokio_util::codec::Framed`.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    max_packet_size: usize,
}

impl PacketCodec {
    /// Create a codec with the default size limit.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        }
    }

    /// Set the maximum accepted payload size.
    #[must_use]
    pub fn with_max_packet_size(mut self, max: usize) -> Self {
        self.max_packet_size = max;
        self
    }

    /// Maximum accepted payload size.
    #[must_use]
    pub fn max_packet_size(&self) -> usize {
        self.max_packet_size
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PacketCodec {
    type Item = Packet;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, CodecError> {
        if src.len() < PACKET_HEADER_SIZE {
            return Ok(None);
        }
        let len = u32::from_le_bytes([src[1], src[2], src[3], src[4]]) as usize;
        if len > self.max_packet_size {
            tracing::warn!(
                kind = src[0],
                size = len,
                max = self.max_packet_size,
                "rejecting oversized packet"
            );
            return Err(CodecError::PacketTooLarge {
                size: len,
                max: self.max_packet_size,
            });
        }
        let total = PACKET_HEADER_SIZE + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let kind = src[0];
        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(len).freeze();
        tracing::trace!(kind, len, "decoded packet");
        Ok(Some(Packet { kind, payload }))
    }
}

impl Encoder<Packet> for PacketCodec {
    type Error = CodecError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), CodecError> {
        let len = item.payload.len();
        if len > self.max_packet_size || u32::try_from(len).is_err() {
            return Err(CodecError::PacketTooLarge {
                size: len,
                max: self.max_packet_size,
            });
        }
        dst.reserve(PACKET_HEADER_SIZE + len);
        dst.put_u8(item.kind);
        dst.put_u32_le(len as u32);
        dst.put_slice(&item.payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_waits_for_full_packet() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();
        codec
            .encode(Packet::new(3, Bytes::from_static(b"hello")), &mut buf)
            .unwrap();

        let mut partial = buf.split_to(7);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.unsplit(buf);
        let packet = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(packet.kind, 3);
        assert_eq!(&packet.payload[..], b"hello");
        assert!(partial.is_empty());
    }

    #[test]
    fn test_decode_two_packets_in_one_read() {
        let mut codec = PacketCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(Packet::empty(4), &mut buf).unwrap();
        codec
            .encode(Packet::new(1, Bytes::from_static(b"x")), &mut buf)
            .unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), Packet::empty(4));
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().kind, 1);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_decode_rejects_oversized() {
        let mut codec = PacketCodec::new().with_max_packet_size(16);
        let mut buf = BytesMut::new();
        buf.put_u8(1);
        buf.put_u32_le(17);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(CodecError::PacketTooLarge { size: 17, max: 16 })
        ));
    }
}
