//! Pooled client.

use std::sync::Arc;

use clickhouse_driver_pool::{Pool, PoolMetrics, PoolStatus, PooledConnection};

use crate::batch::{Batch, check_insert};
use crate::bind::{Arg, bind};
use crate::config::Options;
use crate::error::Result;
use crate::row::{Row, Rows};
use crate::session::{ServerVersion, SessionConnector};

/// A session checked out of the client's pool.
pub type PooledSession = PooledConnection<SessionConnector>;

/// A ClickHouse client backed by a pool of sessions.
///
/// Cheap to clone; clones share the pool. Every operation checks a session
/// out, runs, and hands it back. Sessions left mid-exchange by a dropped
/// future or result stream are closed instead of reused.
///
/// # Example
///
/// ```rust,no_run
/// use clickhouse_client::{Client, Options};
///
/// # async fn example() -> clickhouse_client::Result<()> {
/// let client = Client::open(Options::from_dsn("clickhouse://default@localhost:9000/default")?)?;
/// client.exec("CREATE TABLE IF NOT EXISTS t (id UInt64) ENGINE = Memory", &[]).await?;
///
/// let mut batch = client.prepare_batch("INSERT INTO t").await?;
/// for id in 0..10u64 {
///     batch.append([id])?;
/// }
/// batch.send().await?;
///
/// let mut rows = client.query("SELECT id FROM t WHERE id > ?", &[5u64.into()]).await?;
/// while let Some(row) = rows.next().await? {
///     let id: u64 = row.get(0)?;
///     println!("{id}");
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    pool: Pool<SessionConnector>,
    options: Arc<Options>,
}

impl Client {
    /// Create a client. No connection is made until the first operation.
    pub fn open(mut options: Options) -> Result<Self> {
        options.set_defaults();
        options.validate()?;
        let options = Arc::new(options);
        let pool = Pool::new(
            SessionConnector::new(Arc::clone(&options)),
            options.pool_config(),
        )?;
        tracing::info!(
            addrs = ?options.addrs,
            database = %options.auth.database,
            tls = options.tls.is_some(),
            compression = ?options.compression,
            "client opened"
        );
        Ok(Self { pool, options })
    }

    /// Create a client from a DSN.
    pub fn open_dsn(dsn: &str) -> Result<Self> {
        Self::open(Options::from_dsn(dsn)?)
    }

    /// Check a session out of the pool.
    pub async fn acquire(&self) -> Result<PooledSession> {
        Ok(self.pool.get().await?)
    }

    /// Run a query and stream its rows.
    ///
    /// The session returns to the pool when the stream is dropped.
    pub async fn query(&self, query: &str, args: &[Arg]) -> Result<Rows<PooledSession>> {
        let query = bind(query, args)?;
        Rows::start(self.acquire().await?, &query).await
    }

    /// Run a query and return its first row, discarding the rest.
    pub async fn query_row(&self, query: &str, args: &[Arg]) -> Result<Option<Row>> {
        let mut rows = self.query(query, args).await?;
        let row = rows.next().await?;
        rows.finish().await?;
        Ok(row)
    }

    /// Run a statement that returns no rows.
    pub async fn exec(&self, query: &str, args: &[Arg]) -> Result<()> {
        let query = bind(query, args)?;
        self.acquire().await?.exec(&query, &[]).await
    }

    /// Start an insert. The batch holds a session until it is sent.
    pub async fn prepare_batch(&self, query: &str) -> Result<Batch<PooledSession>> {
        check_insert(query)?;
        Batch::prepare(self.acquire().await?, query).await
    }

    /// Check that a server answers.
    pub async fn ping(&self) -> Result<()> {
        self.acquire().await?.ping().await
    }

    /// Identity of the server behind a pooled session.
    pub async fn server_version(&self) -> Result<ServerVersion> {
        Ok(self.acquire().await?.server_version().clone())
    }

    /// Current pool occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        self.pool.status()
    }

    /// Pool counters.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        self.pool.metrics()
    }

    /// Close idle sessions and reject further operations. Sessions in use
    /// are closed when they are released.
    pub fn close(&self) {
        self.pool.close();
    }

    /// Whether [`Client::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Effective options, defaults applied.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.options
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addrs", &self.options.addrs)
            .field("status", &self.pool.status())
            .finish_non_exhaustive()
    }
}
