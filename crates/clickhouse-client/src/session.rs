//! A single connection to a ClickHouse server.
//!
//! A [`Session`] owns one transport, performs the handshake, and runs one
//! operation at a time. Exclusive access is enforced by `&mut self`; the
//! [`SessionState`] tracks what the connection is doing so the pool can tell
//! a reusable session from one abandoned halfway through an exchange.

use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use ch_protocol::{
    Block, ClientHello, ClientPacket, CompressionMethod, Exception, Progress, ProtocolError,
    QueryPacket, ServerHello, ServerPacket,
};
use clickhouse_codec::{PacketCodec, PacketStream, decode_data, encode_data};
use clickhouse_driver_pool::{ConnectionLifecycle, ConnectionMetadata, Connector};

use crate::batch::Batch;
use crate::bind::{Arg, bind};
use crate::config::Options;
use crate::error::{Error, Result};
use crate::row::Rows;
use crate::state::SessionState;
use crate::transport::Transport;

/// Negotiated server identity.
pub type ServerVersion = ServerHello;

/// One reply packet to a query.
#[derive(Debug)]
pub(crate) enum Response {
    Data(Block),
    Progress(Progress),
    End,
}

/// One authenticated connection.
pub struct Session {
    stream: PacketStream<Transport>,
    meta: ConnectionMetadata,
    server: ServerVersion,
    state: SessionState,
    /// Set only when blocks travel in compressed frames.
    compression: Option<CompressionMethod>,
    settings: Vec<(String, String)>,
    debug: bool,
    last_error: Option<String>,
}

impl Session {
    /// Connect to `addr` and perform the handshake.
    ///
    /// Connecting, TLS and the handshake together must finish within the
    /// dial timeout. On failure the transport is dropped before returning.
    pub async fn dial(addr: &str, id: u64, options: &Options) -> Result<Self> {
        let started = Instant::now();
        let session = match tokio::time::timeout(
            options.dial_timeout,
            Self::establish(addr, id, options),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("dial {addr} timed out after {:?}", options.dial_timeout),
                )));
            }
        };

        tracing::info!(
            connection_id = id,
            addr = %addr,
            server = %session.server,
            tls = session.stream.get_ref().is_tls(),
            compression = ?session.compression,
            elapsed = ?started.elapsed(),
            "session established"
        );
        Ok(session)
    }

    async fn establish(addr: &str, id: u64, options: &Options) -> Result<Self> {
        let transport = Transport::connect(addr, options.tls.as_ref()).await?;
        let compression = options.compression.filter(CompressionMethod::is_compressed);

        let mut session = Self {
            stream: PacketStream::with_codec(
                transport,
                PacketCodec::new().with_max_packet_size(options.max_packet_size),
            ),
            meta: ConnectionMetadata::new(id, addr),
            server: ServerVersion::default(),
            state: SessionState::Dialing,
            compression,
            settings: options
                .settings
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            debug: options.debug,
            last_error: None,
        };

        let hello = ClientHello::new(
            &options.client_name,
            &options.auth.database,
            &options.auth.username,
            &options.auth.password,
        )
        .with_compression(compression.unwrap_or_default());
        session.write_packet(ClientPacket::Hello, hello.encode()).await?;
        session.flush().await?;

        let (kind, payload) = session.read_packet().await?;
        match kind {
            ServerPacket::Hello => session.server = ServerHello::decode(payload)?,
            ServerPacket::Exception => return Err(Exception::decode(payload)?.into()),
            other => {
                return Err(ProtocolError::UnexpectedPacket {
                    expected: "Hello",
                    actual: other.name(),
                }
                .into());
            }
        }
        session.state = SessionState::Ready;
        Ok(session)
    }

    /// Run a query and stream its rows.
    ///
    /// Dropping the returned [`Rows`] before the end of the result leaves the
    /// session errored.
    pub async fn query(&mut self, query: &str, args: &[Arg]) -> Result<Rows<&mut Self>> {
        let query = bind(query, args)?;
        Rows::start(self, &query).await
    }

    /// Run a statement that returns no rows.
    pub async fn exec(&mut self, query: &str, args: &[Arg]) -> Result<()> {
        let query = bind(query, args)?;
        self.begin(SessionState::Executing)?;
        let result = self.exec_inner(&query).await;
        self.settle(result)
    }

    async fn exec_inner(&mut self, query: &str) -> Result<()> {
        self.send_query(query).await?;
        loop {
            if let Response::End = self.read_response().await? {
                return Ok(());
            }
        }
    }

    /// Check that the server answers.
    pub async fn ping(&mut self) -> Result<()> {
        self.begin(SessionState::Executing)?;
        let result = self.ping_inner().await;
        self.settle(result)
    }

    async fn ping_inner(&mut self) -> Result<()> {
        self.write_packet(ClientPacket::Ping, Bytes::new()).await?;
        self.flush().await?;
        loop {
            let (kind, payload) = self.read_packet().await?;
            match kind {
                ServerPacket::Pong => return Ok(()),
                ServerPacket::Progress => {}
                ServerPacket::Exception => return Err(Exception::decode(payload)?.into()),
                other => {
                    return Err(ProtocolError::UnexpectedPacket {
                        expected: "Pong",
                        actual: other.name(),
                    }
                    .into());
                }
            }
        }
    }

    /// Start an insert and return a batch bound to this session.
    pub async fn prepare_batch(&mut self, query: &str) -> Result<Batch<&mut Self>> {
        Batch::prepare(self, query).await
    }

    /// Pool identity of the session.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Address the session is connected to.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.meta.address
    }

    /// Time since the session was established.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.meta.age()
    }

    /// Server identity from the handshake.
    #[must_use]
    pub fn server_version(&self) -> &ServerVersion {
        &self.server
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Description of the failure that errored the session.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Negotiated block compression, `None` when blocks are sent as is.
    #[must_use]
    pub fn compression(&self) -> Option<CompressionMethod> {
        self.compression
    }

    /// Whether the session can run another operation.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.state.is_ready()
    }

    /// Close the session and its transport.
    pub fn close(self) {
        tracing::debug!(
            connection_id = self.meta.id,
            state = %self.state,
            age = ?self.meta.age(),
            "session closed"
        );
    }

    pub(crate) fn begin(&mut self, next: SessionState) -> Result<()> {
        if !self.state.is_ready() {
            return Err(Error::Misuse(format!(
                "session {} is {}, cannot start a new operation",
                self.meta.id, self.state
            )));
        }
        self.state = next;
        Ok(())
    }

    /// Return to `Ready` after an operation completed.
    pub(crate) fn finish(&mut self) {
        if !self.state.is_terminal() {
            self.state = SessionState::Ready;
        }
    }

    /// Record a failed operation.
    ///
    /// A server exception ends the query cleanly and leaves the session
    /// usable; anything else errors it.
    pub(crate) fn fail(&mut self, err: Error) -> Error {
        if self.state.is_terminal() {
            return err;
        }
        match err {
            Error::Server(ref e) => {
                tracing::debug!(connection_id = self.meta.id, code = e.code, "server exception");
                self.state = SessionState::Ready;
            }
            ref e => {
                tracing::warn!(
                    connection_id = self.meta.id,
                    state = %self.state,
                    error = %e,
                    "session errored"
                );
                self.state = SessionState::Errored;
                self.last_error = Some(e.to_string());
            }
        }
        err
    }

    /// Mark an operation that was walked away from mid-exchange.
    pub(crate) fn abandon(&mut self, what: &str) {
        if self.state.is_busy() {
            tracing::debug!(connection_id = self.meta.id, state = %self.state, "{what} abandoned");
            self.state = SessionState::Errored;
            self.last_error = Some(format!("{what} abandoned"));
        }
    }

    fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                self.finish();
                Ok(value)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Send a query followed by the empty block that ends client data.
    pub(crate) async fn send_query(&mut self, query: &str) -> Result<()> {
        if self.debug {
            tracing::debug!(connection_id = self.meta.id, query = query, "query");
        }
        let packet = QueryPacket::new(query)
            .with_settings(self.settings.iter().cloned())
            .with_compression(self.compression.unwrap_or_default());
        self.write_packet(ClientPacket::Query, packet.encode()).await?;
        self.write_block(&Block::default()).await?;
        self.flush().await
    }

    /// Write a data block, then the end-of-data block, with a single flush,
    /// and wait for the server to acknowledge the insert.
    pub(crate) async fn send_insert(&mut self, block: &Block) -> Result<()> {
        if !block.is_empty() {
            self.write_block(block).await?;
        }
        self.write_block(&Block::default()).await?;
        self.flush().await?;
        loop {
            if let Response::End = self.read_response().await? {
                return Ok(());
            }
        }
    }

    pub(crate) async fn read_response(&mut self) -> Result<Response> {
        let (kind, payload) = self.read_packet().await?;
        match kind {
            ServerPacket::Data => {
                let (_, block) = decode_data(payload, self.compression)?;
                Ok(Response::Data(block))
            }
            ServerPacket::Progress => Ok(Response::Progress(Progress::decode(payload)?)),
            ServerPacket::EndOfStream => Ok(Response::End),
            ServerPacket::Exception => Err(Exception::decode(payload)?.into()),
            other => Err(ProtocolError::UnexpectedPacket {
                expected: "query response",
                actual: other.name(),
            }
            .into()),
        }
    }

    async fn write_block(&mut self, block: &Block) -> Result<()> {
        let payload = encode_data("", block, self.compression)?;
        self.write_packet(ClientPacket::Data, payload).await
    }

    async fn write_packet(&mut self, packet: ClientPacket, payload: Bytes) -> Result<()> {
        if self.debug {
            tracing::debug!(
                connection_id = self.meta.id,
                packet = packet.name(),
                len = payload.len(),
                "-> send"
            );
        }
        self.stream.feed_packet(packet as u8, payload).await?;
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        self.stream.flush().await?;
        Ok(())
    }

    async fn read_packet(&mut self) -> Result<(ServerPacket, Bytes)> {
        let packet = self.stream.next_packet().await?;
        let kind = ServerPacket::from_u8(packet.kind)?;
        if self.debug {
            tracing::debug!(
                connection_id = self.meta.id,
                packet = kind.name(),
                len = packet.payload.len(),
                "<- recv"
            );
        }
        Ok((kind, packet.payload))
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.meta.id)
            .field("address", &self.meta.address)
            .field("state", &self.state)
            .field("server", &self.server.to_string())
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

impl ConnectionLifecycle for Session {
    fn metadata(&self) -> &ConnectionMetadata {
        &self.meta
    }

    fn is_healthy(&self) -> bool {
        Session::is_healthy(self)
    }

    fn close(self) {
        Session::close(self);
    }
}

/// Opens sessions for the pool.
#[derive(Debug, Clone)]
pub struct SessionConnector {
    options: Arc<Options>,
}

impl SessionConnector {
    /// Create a connector dialing with `options`.
    #[must_use]
    pub fn new(options: Arc<Options>) -> Self {
        Self { options }
    }

    /// Options used for every dial.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

#[async_trait]
impl Connector for SessionConnector {
    type Connection = Session;
    type Error = Error;

    async fn connect(&self, addr: &str, id: u64) -> Result<Session> {
        Session::dial(addr, id, &self.options).await
    }
}
