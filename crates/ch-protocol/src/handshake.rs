//! Handshake packets.
//!
//! The client opens every connection with a [`ClientHello`] carrying its
//! identity, credentials and the compression method it will use for data
//! blocks. The server answers with a [`ServerHello`] or an exception.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::compression::CompressionMethod;
use crate::error::ProtocolError;
use crate::wire::{get_string, get_u8, get_uvarint, put_string, put_uvarint};

/// Protocol revision implemented by this crate.
pub const CLIENT_REVISION: u64 = 54460;

/// Client version reported in the handshake.
pub const CLIENT_VERSION_MAJOR: u64 = 0;

/// Client minor version reported in the handshake.
pub const CLIENT_VERSION_MINOR: u64 = 3;

/// Client handshake.
#[derive(Clone, PartialEq, Eq)]
pub struct ClientHello {
    /// Client name shown in the server's query log.
    pub client_name: String,
    /// Client major version.
    pub version_major: u64,
    /// Client minor version.
    pub version_minor: u64,
    /// Protocol revision.
    pub revision: u64,
    /// Default database for the session.
    pub database: String,
    /// User name.
    pub username: String,
    /// Password.
    pub password: String,
    /// Compression method for data blocks.
    pub compression: CompressionMethod,
}

impl ClientHello {
    /// Create a handshake with the crate's version and revision.
    #[must_use]
    pub fn new(
        client_name: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            client_name: client_name.into(),
            version_major: CLIENT_VERSION_MAJOR,
            version_minor: CLIENT_VERSION_MINOR,
            revision: CLIENT_REVISION,
            database: database.into(),
            username: username.into(),
            password: password.into(),
            compression: CompressionMethod::None,
        }
    }

    /// Set the compression method.
    #[must_use]
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Encode the handshake payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64 + self.client_name.len());
        put_string(&mut buf, &self.client_name);
        put_uvarint(&mut buf, self.version_major);
        put_uvarint(&mut buf, self.version_minor);
        put_uvarint(&mut buf, self.revision);
        put_string(&mut buf, &self.database);
        put_string(&mut buf, &self.username);
        put_string(&mut buf, &self.password);
        buf.put_u8(self.compression as u8);
        buf.freeze()
    }

    /// Decode a handshake payload.
    pub fn decode(mut src: impl Buf) -> Result<Self, ProtocolError> {
        Ok(Self {
            client_name: get_string(&mut src)?,
            version_major: get_uvarint(&mut src)?,
            version_minor: get_uvarint(&mut src)?,
            revision: get_uvarint(&mut src)?,
            database: get_string(&mut src)?,
            username: get_string(&mut src)?,
            password: get_string(&mut src)?,
            compression: CompressionMethod::from_u8(get_u8(&mut src)?)?,
        })
    }
}

impl fmt::Debug for ClientHello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHello")
            .field("client_name", &self.client_name)
            .field("revision", &self.revision)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

/// Server handshake reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServerHello {
    /// Server name, usually `ClickHouse`.
    pub name: String,
    /// Major version.
    pub version_major: u64,
    /// Minor version.
    pub version_minor: u64,
    /// Patch version.
    pub version_patch: u64,
    /// Protocol revision.
    pub revision: u64,
    /// Server time zone.
    pub timezone: String,
    /// Display name.
    pub display_name: String,
}

impl ServerHello {
    /// Whether the server is at least `major.minor`.
    #[must_use]
    pub fn at_least(&self, major: u64, minor: u64) -> bool {
        (self.version_major, self.version_minor) >= (major, minor)
    }

    /// Encode the reply payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(64);
        put_string(&mut buf, &self.name);
        put_uvarint(&mut buf, self.version_major);
        put_uvarint(&mut buf, self.version_minor);
        put_uvarint(&mut buf, self.revision);
        put_string(&mut buf, &self.timezone);
        put_string(&mut buf, &self.display_name);
        put_uvarint(&mut buf, self.version_patch);
        buf.freeze()
    }

    /// Decode the reply payload.
    pub fn decode(mut src: impl Buf) -> Result<Self, ProtocolError> {
        let name = get_string(&mut src)?;
        let version_major = get_uvarint(&mut src)?;
        let version_minor = get_uvarint(&mut src)?;
        let revision = get_uvarint(&mut src)?;
        let timezone = get_string(&mut src)?;
        let display_name = get_string(&mut src)?;
        let version_patch = get_uvarint(&mut src)?;
        Ok(Self {
            name,
            version_major,
            version_minor,
            version_patch,
            revision,
            timezone,
            display_name,
        })
    }
}

impl fmt::Display for ServerHello {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}.{}.{} (revision {})",
            self.name, self.version_major, self.version_minor, self.version_patch, self.revision
        )
    }
}
