//! Protocol-level error types.

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol structures.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Unexpected end of input.
    #[error("unexpected end of stream")]
    UnexpectedEof,

    /// Variable-length integer does not fit in 64 bits.
    #[error("varint overflow")]
    VarIntOverflow,

    /// Invalid client packet kind.
    #[error("invalid client packet kind: {0:#x}")]
    InvalidClientPacket(u8),

    /// Invalid server packet kind.
    #[error("invalid server packet kind: {0:#x}")]
    InvalidServerPacket(u8),

    /// Valid packet kind arriving at the wrong point of an exchange.
    #[error("unexpected {actual} packet, expected {expected}")]
    UnexpectedPacket {
        /// What the reader was waiting for.
        expected: &'static str,
        /// Name of the packet that arrived.
        actual: &'static str,
    },

    /// Column type name that is not supported.
    #[error("unsupported column type: {0}")]
    UnsupportedType(String),

    /// String field is not valid UTF-8.
    #[error("string encoding error: {0}")]
    StringEncoding(String),

    /// Value does not match the declared column type.
    #[error("type mismatch in column {column}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Column name.
        column: String,
        /// Declared column type.
        expected: String,
        /// Type of the offending value.
        actual: &'static str,
    },

    /// Columns of a block have different row counts.
    #[error("column {column} has {actual} rows, expected {expected}")]
    RowCountMismatch {
        /// Column name.
        column: String,
        /// Row count of the first column.
        expected: usize,
        /// Row count of the offending column.
        actual: usize,
    },

    /// Length prefix exceeds the allowed maximum.
    #[error("{field} too large: {length} (max {max})")]
    TooLarge {
        /// Field name.
        field: &'static str,
        /// Declared length.
        length: u64,
        /// Maximum allowed length.
        max: u64,
    },

    /// Invalid field value in a protocol structure.
    #[error("invalid {field} value: {value}")]
    InvalidField {
        /// Field name.
        field: &'static str,
        /// Invalid value.
        value: u64,
    },
}
