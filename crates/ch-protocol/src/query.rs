//! Query request encoding.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::compression::CompressionMethod;
use crate::error::ProtocolError;
use crate::wire::{get_string, get_u8, get_uvarint, put_string, put_uvarint};

/// Processing stage the server should run the query to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum QueryStage {
    /// Only fetch columns.
    FetchColumns = 0,
    /// Stop after aggregation state.
    WithMergeableState = 1,
    /// Run to completion.
    #[default]
    Complete = 2,
}

impl QueryStage {
    /// Create from raw value.
    pub fn from_u64(value: u64) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::FetchColumns),
            1 => Ok(Self::WithMergeableState),
            2 => Ok(Self::Complete),
            _ => Err(ProtocolError::InvalidField {
                field: "query stage",
                value,
            }),
        }
    }
}

/// A query request.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueryPacket {
    /// Client-assigned query id; empty lets the server generate one.
    pub query_id: String,
    /// Server-side settings applied to this query only.
    pub settings: Vec<(String, String)>,
    /// Processing stage.
    pub stage: QueryStage,
    /// Compression used for data blocks of this query.
    pub compression: CompressionMethod,
    /// Query text.
    pub query: String,
}

impl QueryPacket {
    /// Create a query request that runs to completion.
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Set the compression method for data blocks.
    #[must_use]
    pub fn with_compression(mut self, method: CompressionMethod) -> Self {
        self.compression = method;
        self
    }

    /// Set per-query settings.
    #[must_use]
    pub fn with_settings<I, K, V>(mut self, settings: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.settings = settings
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        self
    }

    /// Encode the request payload.
    #[must_use]
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32 + self.query.len());
        put_string(&mut buf, &self.query_id);
        for (name, value) in &self.settings {
            put_string(&mut buf, name);
            put_string(&mut buf, value);
        }
        // empty name terminates the settings list
        put_string(&mut buf, "");
        put_uvarint(&mut buf, self.stage as u64);
        buf.put_u8(self.compression as u8);
        put_string(&mut buf, &self.query);
        buf.freeze()
    }

    /// Decode a request payload.
    pub fn decode(mut src: impl Buf) -> Result<Self, ProtocolError> {
        let query_id = get_string(&mut src)?;
        let mut settings = Vec::new();
        loop {
            let name = get_string(&mut src)?;
            if name.is_empty() {
                break;
            }
            let value = get_string(&mut src)?;
            settings.push((name, value));
        }
        let stage = QueryStage::from_u64(get_uvarint(&mut src)?)?;
        let compression = CompressionMethod::from_u8(get_u8(&mut src)?)?;
        let query = get_string(&mut src)?;
        Ok(Self {
            query_id,
            settings,
            stage,
            compression,
            query,
        })
    }
}
