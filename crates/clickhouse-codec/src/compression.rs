//! Data block compression.
//!
//! When a session negotiates a compression method, every data block travels
//! inside a compressed frame:
//!
//! ```text
//! method: u8 | compressed_size: u32 LE | raw_size: u32 LE | data
//! ```
//!
//! `compressed_size` includes the 9-byte frame header. Without compression the
//! block bytes follow the table name directly.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use ch_protocol::wire::{get_string, put_string};
use ch_protocol::{Block, CompressionMethod};

use crate::error::CodecError;

/// Size of the compressed frame header.
pub const FRAME_HEADER_SIZE: usize = 9;

/// Largest raw block accepted by [`decompress_block`].
pub const MAX_RAW_BLOCK_SIZE: usize = 1 << 30;

/// Wrap `raw` in a compressed frame using `method`.
#[must_use]
pub fn compress_block(method: CompressionMethod, raw: &[u8]) -> Bytes {
    let body = match method {
        CompressionMethod::None => Bytes::copy_from_slice(raw),
        CompressionMethod::Lz4 => Bytes::from(lz4_flex::block::compress(raw)),
    };
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_SIZE + body.len());
    buf.put_u8(method as u8);
    buf.put_u32_le((FRAME_HEADER_SIZE + body.len()) as u32);
    buf.put_u32_le(raw.len() as u32);
    buf.put_slice(&body);
    buf.freeze()
}

/// Read one compressed frame from `src` and return the raw bytes.
pub fn decompress_block(src: &mut impl Buf) -> Result<Bytes, CodecError> {
    if src.remaining() < FRAME_HEADER_SIZE {
        return Err(CodecError::InvalidBlock("truncated frame header".into()));
    }
    let method = CompressionMethod::from_u8(src.get_u8())?;
    let compressed_size = src.get_u32_le() as usize;
    let raw_size = src.get_u32_le() as usize;

    let body_len = compressed_size
        .checked_sub(FRAME_HEADER_SIZE)
        .ok_or_else(|| CodecError::InvalidBlock(format!("compressed size {compressed_size}")))?;
    if body_len > src.remaining() {
        return Err(CodecError::InvalidBlock(format!(
            "frame body needs {body_len} bytes, {} available",
            src.remaining()
        )));
    }
    if raw_size > MAX_RAW_BLOCK_SIZE {
        return Err(CodecError::InvalidBlock(format!("raw size {raw_size}")));
    }
    let body = src.copy_to_bytes(body_len);

    match method {
        CompressionMethod::None => {
            if body.len() != raw_size {
                return Err(CodecError::InvalidBlock(format!(
                    "stored block is {} bytes, header says {raw_size}",
                    body.len()
                )));
            }
            Ok(body)
        }
        CompressionMethod::Lz4 => lz4_flex::block::decompress(&body, raw_size)
            .map(Bytes::from)
            .map_err(|e| CodecError::Decompress(e.to_string())),
    }
}

/// Encode a data packet payload: table name followed by the block.
///
/// With `compression` set, the block is wrapped in a compressed frame.
pub fn encode_data(
    table: &str,
    block: &Block,
    compression: Option<CompressionMethod>,
) -> Result<Bytes, CodecError> {
    let raw = block.encode()?;
    let mut buf = BytesMut::with_capacity(raw.len() + table.len() + FRAME_HEADER_SIZE + 4);
    put_string(&mut buf, table);
    match compression {
        Some(method) => buf.put_slice(&compress_block(method, &raw)),
        None => buf.put_slice(&raw),
    }
    Ok(buf.freeze())
}

/// Decode a data packet payload into its table name and block.
///
/// With `compression` set, the frame's method must match the negotiated one.
pub fn decode_data(
    mut payload: Bytes,
    compression: Option<CompressionMethod>,
) -> Result<(String, Block), CodecError> {
    let table = get_string(&mut payload)?;
    let block = match compression {
        Some(expected) => {
            let actual = payload
                .first()
                .copied()
                .map(CompressionMethod::from_u8)
                .transpose()?
                .ok_or_else(|| CodecError::InvalidBlock("missing frame".into()))?;
            if actual != expected {
                return Err(CodecError::MethodMismatch { expected, actual });
            }
            Block::decode(decompress_block(&mut payload)?)?
        }
        None => Block::decode(payload)?,
    };
    Ok((table, block))
}
