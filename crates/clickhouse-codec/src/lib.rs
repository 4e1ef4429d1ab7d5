//! # clickhouse-codec
//!
//! Async framing layer for the ClickHouse native protocol.
//!
//! This crate turns a raw byte stream into whole packets and handles block
//! compression for data packets.
//!
//! ## Features
//!
//! - Packet reassembly across TCP segments
//! - Size limits on incoming packets
//! - LZ4 block compression with a self-describing frame header
//! - Integration with tokio-util's codec framework

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod compression;
pub mod error;
pub mod framed;
pub mod packet_codec;

pub use compression::{compress_block, decode_data, decompress_block, encode_data};
pub use error::CodecError;
pub use framed::PacketStream;
pub use packet_codec::{DEFAULT_MAX_PACKET_SIZE, Packet, PacketCodec};
