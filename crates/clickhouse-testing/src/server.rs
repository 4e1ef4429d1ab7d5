//! Mock server.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use ch_protocol::exception::codes;
use ch_protocol::{
    Block, ClientHello, ClientPacket, Column, ColumnType, CompressionMethod, Exception, Progress,
    ProtocolError, QueryPacket, ServerHello, ServerPacket, Value,
};
use clickhouse_codec::{CodecError, PacketStream, decode_data, encode_data};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{AbortHandle, JoinHandle};

use crate::statement::{self, Statement};

/// Errors ending a mock connection.
#[derive(Debug, Error)]
pub enum MockError {
    /// Transport failure.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    /// Framing failure.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Malformed packet.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    /// Packet not valid at this point of the conversation.
    #[error("unexpected {0} packet")]
    Unexpected(&'static str),
}

/// A query as received by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedQuery {
    /// Connection the query arrived on, counted from 1.
    pub connection: u64,
    /// Statement text.
    pub query: String,
    /// Settings sent with the query.
    pub settings: Vec<(String, String)>,
    /// Compression method announced in the query packet.
    pub compression: CompressionMethod,
}

/// Counters observed by the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    /// TCP connections accepted.
    pub connections: u64,
    /// Successful handshakes.
    pub handshakes: u64,
    /// Handshakes refused for bad credentials or database.
    pub rejected_handshakes: u64,
    /// Connections that ended.
    pub disconnects: u64,
    /// Query packets received.
    pub queries: u64,
    /// Pings answered.
    pub pings: u64,
    /// Non-empty data blocks received for inserts.
    pub insert_blocks: u64,
    /// Rows stored by inserts.
    pub inserted_rows: u64,
}

impl MockStats {
    /// Connections accepted and not yet ended.
    #[must_use]
    pub fn open_connections(&self) -> u64 {
        self.connections.saturating_sub(self.disconnects)
    }
}

#[derive(Default)]
struct Counters {
    connections: AtomicU64,
    handshakes: AtomicU64,
    rejected_handshakes: AtomicU64,
    disconnects: AtomicU64,
    queries: AtomicU64,
    pings: AtomicU64,
    insert_blocks: AtomicU64,
    inserted_rows: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }

    fn snapshot(&self) -> MockStats {
        MockStats {
            connections: self.connections.load(Ordering::SeqCst),
            handshakes: self.handshakes.load(Ordering::SeqCst),
            rejected_handshakes: self.rejected_handshakes.load(Ordering::SeqCst),
            disconnects: self.disconnects.load(Ordering::SeqCst),
            queries: self.queries.load(Ordering::SeqCst),
            pings: self.pings.load(Ordering::SeqCst),
            insert_blocks: self.insert_blocks.load(Ordering::SeqCst),
            inserted_rows: self.inserted_rows.load(Ordering::SeqCst),
        }
    }
}

#[derive(Debug, Clone)]
struct MockConfig {
    username: String,
    password: String,
    databases: Vec<String>,
    block_size: usize,
    handshake_delay: Option<Duration>,
    hello: ServerHello,
}

/// Builder for [`MockServer`].
#[derive(Debug, Clone)]
pub struct MockServerBuilder {
    config: MockConfig,
}

impl Default for MockServerBuilder {
    fn default() -> Self {
        Self {
            config: MockConfig {
                username: "default".into(),
                password: String::new(),
                databases: vec!["default".into()],
                block_size: 1000,
                handshake_delay: None,
                hello: ServerHello {
                    name: "ClickHouse".into(),
                    version_major: 24,
                    version_minor: 3,
                    version_patch: 1,
                    revision: 54467,
                    timezone: "UTC".into(),
                    display_name: "mock".into(),
                },
            },
        }
    }
}

impl MockServerBuilder {
    /// Accepted credentials. Defaults to `default` with an empty password.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    /// Add a database clients may select.
    #[must_use]
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.config.databases.push(name.into());
        self
    }

    /// Maximum rows per result block.
    #[must_use]
    pub fn block_size(mut self, rows: usize) -> Self {
        self.config.block_size = rows.max(1);
        self
    }

    /// Wait this long before answering a client hello.
    #[must_use]
    pub fn handshake_delay(mut self, delay: Duration) -> Self {
        self.config.handshake_delay = Some(delay);
        self
    }

    /// Name shown in the server hello.
    #[must_use]
    pub fn display_name(mut self, name: impl Into<String>) -> Self {
        self.config.hello.display_name = name.into();
        self
    }

    /// Bind to an ephemeral localhost port and start accepting.
    pub async fn start(self) -> io::Result<MockServer> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let shared = Arc::new(Shared {
            config: self.config,
            tables: Mutex::new(HashMap::new()),
            queries: Mutex::new(Vec::new()),
            counters: Counters::default(),
            connections: Mutex::new(Vec::new()),
        });
        let accept = tokio::spawn(accept_loop(listener, Arc::clone(&shared)));
        tracing::debug!(%addr, "mock server listening");
        Ok(MockServer {
            addr,
            shared,
            accept,
        })
    }
}

struct Shared {
    config: MockConfig,
    tables: Mutex<HashMap<String, Vec<Column>>>,
    queries: Mutex<Vec<ReceivedQuery>>,
    counters: Counters,
    connections: Mutex<Vec<AbortHandle>>,
}

/// An in-process server speaking the native protocol.
///
/// Tables live in memory. The server stops when dropped.
pub struct MockServer {
    addr: SocketAddr,
    shared: Arc<Shared>,
    accept: JoinHandle<()>,
}

impl MockServer {
    /// Start a server with default settings.
    pub async fn start() -> io::Result<Self> {
        MockServerBuilder::default().start().await
    }

    /// Configure a server.
    #[must_use]
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::default()
    }

    /// `host:port` to connect to.
    #[must_use]
    pub fn addr(&self) -> String {
        self.addr.to_string()
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> MockStats {
        self.shared.counters.snapshot()
    }

    /// Every query received so far, oldest first.
    #[must_use]
    pub fn queries(&self) -> Vec<ReceivedQuery> {
        self.shared.queries.lock().clone()
    }

    /// The most recent query.
    #[must_use]
    pub fn last_query(&self) -> Option<ReceivedQuery> {
        self.shared.queries.lock().last().cloned()
    }

    /// Create or replace a table.
    pub fn create_table(&self, name: &str, columns: &[(&str, ColumnType)]) {
        let columns = columns
            .iter()
            .map(|(n, ty)| Column::new(*n, ty.clone()))
            .collect();
        self.shared.tables.lock().insert(name.to_string(), columns);
    }

    /// Stored rows of `table`, or `None` if it does not exist.
    #[must_use]
    pub fn rows(&self, table: &str) -> Option<Vec<Vec<Value>>> {
        let tables = self.shared.tables.lock();
        let block = Block::new(tables.get(table)?.clone());
        let rows = block.rows().ok()?;
        Some(
            (0..rows)
                .map(|i| block.row_values(i).cloned().collect())
                .collect(),
        )
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept.abort();
        for conn in self.shared.connections.lock().drain(..) {
            conn.abort();
        }
    }
}

impl std::fmt::Debug for MockServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockServer")
            .field("addr", &self.addr)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>) {
    loop {
        let (socket, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!(error = %e, "mock accept failed");
                continue;
            }
        };
        let id = shared.counters.connections.fetch_add(1, Ordering::SeqCst) + 1;
        let conn_shared = Arc::clone(&shared);
        let task = tokio::spawn(async move {
            match serve(Arc::clone(&conn_shared), socket, id).await {
                Ok(()) => tracing::debug!(connection = id, %peer, "mock connection ended"),
                Err(e) => {
                    tracing::debug!(connection = id, %peer, error = %e, "mock connection failed")
                }
            }
            Counters::bump(&conn_shared.counters.disconnects);
        });
        shared.connections.lock().push(task.abort_handle());
    }
}

async fn serve(shared: Arc<Shared>, socket: TcpStream, id: u64) -> Result<(), MockError> {
    let mut stream = PacketStream::new(socket);
    let packet = stream.next_packet().await?;
    if packet.kind != ClientPacket::Hello as u8 {
        return Err(MockError::Unexpected(
            ClientPacket::from_u8(packet.kind)?.name(),
        ));
    }
    let hello = ClientHello::decode(packet.payload)?;
    if let Some(delay) = shared.config.handshake_delay {
        tokio::time::sleep(delay).await;
    }

    let refusal = if hello.username != shared.config.username
        || hello.password != shared.config.password
    {
        Some(Exception::new(
            codes::AUTHENTICATION_FAILED,
            "DB::Exception",
            format!(
                "{}: Authentication failed: password is incorrect, or there is no user with such name",
                hello.username
            ),
        ))
    } else if !shared.config.databases.contains(&hello.database) {
        Some(Exception::new(
            codes::UNKNOWN_DATABASE,
            "DB::Exception",
            format!("Database {} does not exist", hello.database),
        ))
    } else {
        None
    };
    if let Some(exception) = refusal {
        Counters::bump(&shared.counters.rejected_handshakes);
        stream
            .send_packet(ServerPacket::Exception as u8, exception.encode())
            .await?;
        return Ok(());
    }

    stream
        .send_packet(ServerPacket::Hello as u8, shared.config.hello.encode())
        .await?;
    Counters::bump(&shared.counters.handshakes);
    tracing::debug!(
        connection = id,
        client = %hello.client_name,
        compression = ?hello.compression,
        "mock handshake"
    );

    let mut conn = Connection {
        id,
        shared,
        stream,
        compression: Some(hello.compression).filter(CompressionMethod::is_compressed),
    };
    conn.run().await
}

struct Connection {
    id: u64,
    shared: Arc<Shared>,
    stream: PacketStream<TcpStream>,
    compression: Option<CompressionMethod>,
}

impl Connection {
    async fn run(&mut self) -> Result<(), MockError> {
        loop {
            let packet = match self.stream.next_packet().await {
                Ok(packet) => packet,
                Err(CodecError::ConnectionClosed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            match ClientPacket::from_u8(packet.kind)? {
                ClientPacket::Ping => {
                    Counters::bump(&self.shared.counters.pings);
                    self.stream
                        .send_packet(ServerPacket::Pong as u8, Bytes::new())
                        .await?;
                }
                ClientPacket::Query => {
                    let query = QueryPacket::decode(packet.payload)?;
                    self.query(query).await?;
                }
                ClientPacket::Cancel => {}
                other => return Err(MockError::Unexpected(other.name())),
            }
        }
    }

    async fn query(&mut self, packet: QueryPacket) -> Result<(), MockError> {
        Counters::bump(&self.shared.counters.queries);
        self.shared.queries.lock().push(ReceivedQuery {
            connection: self.id,
            query: packet.query.clone(),
            settings: packet.settings.clone(),
            compression: packet.compression,
        });
        // end of client data for the query
        self.read_block().await?;

        match statement::parse(&packet.query) {
            Statement::CreateTable { table, columns } => {
                self.shared.tables.lock().entry(table).or_insert(columns);
                self.end().await
            }
            Statement::DropTable { table } => {
                self.shared.tables.lock().remove(&table);
                self.end().await
            }
            Statement::Insert { table } => self.insert(&table).await,
            Statement::SelectAll { table } => {
                let columns = self.shared.tables.lock().get(&table).cloned();
                match columns {
                    Some(columns) => self.result(columns).await,
                    None => self.unknown_table(&table).await,
                }
            }
            Statement::Count { table } => {
                let rows = self
                    .shared
                    .tables
                    .lock()
                    .get(&table)
                    .map(|c| c.first().map_or(0, Column::len));
                match rows {
                    Some(n) => {
                        let mut count = Column::new("count()", ColumnType::UInt64);
                        count.values.push(Value::UInt64(n as u64));
                        self.result(vec![count]).await
                    }
                    None => self.unknown_table(&table).await,
                }
            }
            Statement::Numbers(n) => {
                let mut number = Column::new("number", ColumnType::UInt64);
                number.values = (0..n).map(Value::UInt64).collect();
                self.result(vec![number]).await
            }
            Statement::Sleep(duration) => {
                tokio::time::sleep(duration).await;
                let mut column = Column::new("sleep()", ColumnType::UInt8);
                column.values.push(Value::UInt8(0));
                self.result(vec![column]).await
            }
            Statement::Literal(value) => {
                let ty = match &value {
                    Value::Null => ColumnType::Nullable(Box::new(ColumnType::UInt8)),
                    Value::UInt64(_) => ColumnType::UInt64,
                    Value::Int64(_) => ColumnType::Int64,
                    Value::Float64(_) => ColumnType::Float64,
                    Value::Bool(_) => ColumnType::Bool,
                    _ => ColumnType::String,
                };
                let name = packet
                    .query
                    .trim()
                    .get(6..)
                    .unwrap_or_default()
                    .trim()
                    .to_string();
                let mut column = Column::new(name, ty);
                column.values.push(value);
                self.result(vec![column]).await
            }
            Statement::Corrupt => {
                self.stream.send_packet(0x7f, Bytes::from_static(b"garbage")).await?;
                Ok(())
            }
            Statement::Unknown => {
                self.exception(
                    codes::SYNTAX_ERROR,
                    format!("Syntax error: failed at position 1: {}", packet.query),
                )
                .await
            }
        }
    }

    async fn insert(&mut self, table: &str) -> Result<(), MockError> {
        let header = self.shared.tables.lock().get(table).map(|columns| {
            columns
                .iter()
                .map(|c| Column::new(c.name.clone(), c.ty.clone()))
                .collect::<Vec<_>>()
        });
        let Some(header) = header else {
            return self.unknown_table(table).await;
        };
        self.send_block(&Block::new(header)).await?;
        self.stream.flush().await?;

        let mut failure = None;
        loop {
            let block = self.read_block().await?;
            if block.columns.is_empty() {
                break;
            }
            Counters::bump(&self.shared.counters.insert_blocks);
            match self.append(table, block) {
                Ok(rows) => {
                    self.shared
                        .counters
                        .inserted_rows
                        .fetch_add(rows as u64, Ordering::SeqCst);
                }
                Err(message) => {
                    failure.get_or_insert(message);
                }
            }
        }
        match failure {
            Some(message) => self.exception(codes::SYNTAX_ERROR, message).await,
            None => self.end().await,
        }
    }

    fn append(&self, table: &str, block: Block) -> Result<usize, String> {
        let rows = block.rows().map_err(|e| e.to_string())?;
        let mut tables = self.shared.tables.lock();
        let columns = tables
            .get_mut(table)
            .ok_or_else(|| format!("Table default.{table} does not exist"))?;
        if block.columns.len() != columns.len()
            || block
                .columns
                .iter()
                .zip(columns.iter())
                .any(|(got, want)| got.name != want.name || got.ty != want.ty)
        {
            return Err(format!("block structure does not match table {table}"));
        }
        for (column, incoming) in columns.iter_mut().zip(block.columns) {
            column.values.extend(incoming.values);
        }
        Ok(rows)
    }

    /// Send a header, the rows in blocks, progress and end of stream.
    async fn result(&mut self, columns: Vec<Column>) -> Result<(), MockError> {
        let block = Block::new(columns);
        let total = block.rows()?;
        self.send_block(&block.header()).await?;

        let size = self.shared.config.block_size;
        let mut start = 0;
        while start < total {
            let end = (start + size).min(total);
            let chunk = block
                .columns
                .iter()
                .map(|c| {
                    let mut part = Column::new(c.name.clone(), c.ty.clone());
                    part.values = c.values[start..end].to_vec();
                    part
                })
                .collect();
            self.send_block(&Block::new(chunk)).await?;
            start = end;
        }

        let progress = Progress {
            rows: total as u64,
            bytes: 0,
            total_rows: total as u64,
        };
        self.stream
            .feed_packet(ServerPacket::Progress as u8, progress.encode())
            .await?;
        self.end().await
    }

    async fn end(&mut self) -> Result<(), MockError> {
        self.stream
            .send_packet(ServerPacket::EndOfStream as u8, Bytes::new())
            .await?;
        Ok(())
    }

    async fn unknown_table(&mut self, table: &str) -> Result<(), MockError> {
        self.exception(
            codes::UNKNOWN_TABLE,
            format!("Table default.{table} does not exist"),
        )
        .await
    }

    async fn exception(&mut self, code: i32, message: String) -> Result<(), MockError> {
        let exception = Exception::new(code, "DB::Exception", message);
        self.stream
            .send_packet(ServerPacket::Exception as u8, exception.encode())
            .await?;
        Ok(())
    }

    async fn send_block(&mut self, block: &Block) -> Result<(), MockError> {
        let payload = encode_data("", block, self.compression)?;
        self.stream
            .feed_packet(ServerPacket::Data as u8, payload)
            .await?;
        Ok(())
    }

    async fn read_block(&mut self) -> Result<Block, MockError> {
        let packet = self.stream.next_packet().await?;
        match ClientPacket::from_u8(packet.kind)? {
            ClientPacket::Data => Ok(decode_data(packet.payload, self.compression)?.1),
            other => Err(MockError::Unexpected(other.name())),
        }
    }
}
