//! Packet kind identifiers.
//!
//! Every frame on the wire starts with a one-byte kind. Client and server use
//! separate code spaces.

use crate::error::ProtocolError;

/// Packets sent by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientPacket {
    /// Handshake with credentials and client identity.
    Hello = 0x00,
    /// Query text, settings and compression flag.
    Query = 0x01,
    /// Data block (insert payload or end-of-data marker).
    Data = 0x02,
    /// Cancel the running query.
    Cancel = 0x03,
    /// Liveness probe.
    Ping = 0x04,
}

impl ClientPacket {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Hello),
            0x01 => Ok(Self::Query),
            0x02 => Ok(Self::Data),
            0x03 => Ok(Self::Cancel),
            0x04 => Ok(Self::Ping),
            _ => Err(ProtocolError::InvalidClientPacket(value)),
        }
    }

    /// Packet name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello => "Hello",
            Self::Query => "Query",
            Self::Data => "Data",
            Self::Cancel => "Cancel",
            Self::Ping => "Ping",
        }
    }
}

/// Packets sent by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ServerPacket {
    /// Handshake reply with server name and version.
    Hello = 0x00,
    /// Data block (result rows or insert column header).
    Data = 0x01,
    /// Exception raised while processing the request.
    Exception = 0x02,
    /// Query progress counters.
    Progress = 0x03,
    /// Reply to [`ClientPacket::Ping`].
    Pong = 0x04,
    /// All packets of the current request have been sent.
    EndOfStream = 0x05,
}

impl ServerPacket {
    /// Create from raw byte value.
    pub fn from_u8(value: u8) -> Result<Self, ProtocolError> {
        match value {
            0x00 => Ok(Self::Hello),
            0x01 => Ok(Self::Data),
            0x02 => Ok(Self::Exception),
            0x03 => Ok(Self::Progress),
            0x04 => Ok(Self::Pong),
            0x05 => Ok(Self::EndOfStream),
            _ => Err(ProtocolError::InvalidServerPacket(value)),
        }
    }

    /// Packet name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Hello => "Hello",
            Self::Data => "Data",
            Self::Exception => "Exception",
            Self::Progress => "Progress",
            Self::Pong => "Pong",
            Self::EndOfStream => "EndOfStream",
        }
    }
}
