//! Server exceptions and progress reports.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::error::ProtocolError;
use crate::wire::{get_i32_le, get_string, get_u8, get_uvarint, put_string, put_uvarint};

/// Well-known server error codes.
pub mod codes {
    /// Syntax error in the query.
    pub const SYNTAX_ERROR: i32 = 62;
    /// Table does not exist.
    pub const UNKNOWN_TABLE: i32 = 60;
    /// Query was cancelled.
    pub const QUERY_WAS_CANCELLED: i32 = 394;
    /// Credentials were rejected.
    pub const AUTHENTICATION_FAILED: i32 = 516;
    /// Unknown database in the handshake.
    pub const UNKNOWN_DATABASE: i32 = 81;
}

/// An exception reported by the server.
///
/// The server sends it in place of the remaining response packets; the
/// connection stays usable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("code: {code}, message: {message}")]
pub struct Exception {
    /// Numeric error code.
    pub code: i32,
    /// Exception class name.
    pub name: String,
    /// Human-readable message.
    pub message: String,
    /// Server-side stack trace.
    pub stack_trace: String,
    /// Nested cause.
    pub nested: Option<Box<Exception>>,
}

impl Exception {
    /// Create an exception without stack trace or cause.
    #[must_use]
    pub fn new(code: i32, name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            message: message.into(),
            stack_trace: String::new(),
            nested: None,
        }
    }

    /// Encode the exception payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32 + self.message.len());
        let mut current = Some(self);
        while let Some(exc) = current {
            buf.put_i32_le(exc.code);
            put_string(&mut buf, &exc.name);
            put_string(&mut buf, &exc.message);
            put_string(&mut buf, &exc.stack_trace);
            buf.put_u8(u8::from(exc.nested.is_some()));
            current = exc.nested.as_deref();
        }
        buf.freeze()
    }

    /// Decode an exception payload, including nested causes.
    pub fn decode(mut src: impl Buf) -> Result<Self, ProtocolError> {
        let mut chain = Vec::new();
        loop {
            let code = get_i32_le(&mut src)?;
            let name = get_string(&mut src)?;
            let message = get_string(&mut src)?;
            let stack_trace = get_string(&mut src)?;
            let has_nested = get_u8(&mut src)? != 0;
            chain.push(Self {
                code,
                name,
                message,
                stack_trace,
                nested: None,
            });
            if !has_nested {
                break;
            }
        }
        let mut root = chain.pop().ok_or(ProtocolError::UnexpectedEof)?;
        while let Some(mut parent) = chain.pop() {
            parent.nested = Some(Box::new(root));
            root = parent;
        }
        Ok(root)
    }
}

/// Progress counters for a running query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    /// Rows read so far.
    pub rows: u64,
    /// Bytes read so far.
    pub bytes: u64,
    /// Estimated total rows.
    pub total_rows: u64,
}

impl Progress {
    /// Add another increment to the running totals.
    pub fn add(&mut self, other: Progress) {
        self.rows += other.rows;
        self.bytes += other.bytes;
        self.total_rows = self.total_rows.max(other.total_rows);
    }

    /// Encode the progress payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(12);
        put_uvarint(&mut buf, self.rows);
        put_uvarint(&mut buf, self.bytes);
        put_uvarint(&mut buf, self.total_rows);
        buf.freeze()
    }

    /// Decode the progress payload.
    pub fn decode(mut src: impl Buf) -> Result<Self, ProtocolError> {
        Ok(Self {
            rows: get_uvarint(&mut src)?,
            bytes: get_uvarint(&mut src)?,
            total_rows: get_uvarint(&mut src)?,
        })
    }
}
