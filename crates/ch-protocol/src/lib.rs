//! # ch-protocol
//!
//! Pure implementation of the ClickHouse native protocol structures used by
//! the driver: handshake, query requests, column-major data blocks, server
//! exceptions and progress reports.
//!
//! This crate performs no I/O. Framing over a transport lives in
//! `clickhouse-codec`; connection management lives in `clickhouse-client`.
//!
//! ## Example
//!
//! ```
//! use ch_protocol::{Block, Column, ColumnType, Value};
//!
//! let mut id = Column::new("id", ColumnType::UInt32);
//! id.values.push(Value::UInt32(7));
//! let block = Block::new(vec![id]);
//!
//! let encoded = block.encode().unwrap();
//! let decoded = Block::decode(encoded).unwrap();
//! assert_eq!(decoded.rows().unwrap(), 1);
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod block;
pub mod compression;
pub mod error;
pub mod exception;
pub mod handshake;
pub mod packet;
pub mod query;
pub mod types;
pub mod wire;

pub use block::{Block, Column};
pub use compression::CompressionMethod;
pub use error::ProtocolError;
pub use exception::{Exception, Progress};
pub use handshake::{ClientHello, ServerHello};
pub use packet::{ClientPacket, ServerPacket};
pub use query::{QueryPacket, QueryStage};
pub use types::{ColumnType, Value};
