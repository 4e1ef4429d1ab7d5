//! Codec error types.

use thiserror::Error;

/// Errors that can occur during packet framing or block compression.
#[derive(Debug, Error)]
pub enum CodecError {
    /// IO error during read/write operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol-level error from ch-protocol.
    #[error("protocol error: {0}")]
    Protocol(#[from] ch_protocol::ProtocolError),

    /// Packet too large.
    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge {
        /// Actual packet size.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// Compressed block header is malformed.
    #[error("invalid compressed block: {0}")]
    InvalidBlock(String),

    /// Block was compressed with a different method than negotiated.
    #[error("compression method mismatch: negotiated {expected}, got {actual}")]
    MethodMismatch {
        /// Negotiated method.
        expected: ch_protocol::CompressionMethod,
        /// Method found in the block header.
        actual: ch_protocol::CompressionMethod,
    },

    /// Decompression failed.
    #[error("decompression error: {0}")]
    Decompress(String),

    /// Connection closed unexpectedly.
    #[error("connection closed")]
    ConnectionClosed,
}
