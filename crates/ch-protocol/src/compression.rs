//! Compression method identifiers.

use std::fmt;

use crate::error::ProtocolError;

/// Block compression method negotiated in the handshake.
///
/// The discriminants are the method bytes written in front of every
/// compressed block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum CompressionMethod {
    /// Blocks are framed but not compressed.
    #[default]
    None = 0x02,
    /// LZ4 block compression.
    Lz4 = 0x82,
}

impl CompressionMethod {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x02 => Ok(Self::None),
            0x82 => Ok(Self::Lz4),
            _ => Err(ProtocolError::InvalidField {
                field: "compression method",
                value: u64::from(value),
            }),
        }
    }

    /// Whether blocks are actually compressed.
    #[must_use]
    pub const fn is_compressed(&self) -> bool {
        !matches!(self, Self::None)
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("none"),
            Self::Lz4 => f.write_str("lz4"),
        }
    }
}
