//! # clickhouse-client
//!
//! Async client for the ClickHouse native TCP protocol.
//!
//! The client keeps a pool of authenticated sessions across one or more
//! server addresses, with failover between them, and exposes queries,
//! statements, pings and batched inserts on top.
//!
//! ## Features
//!
//! - DSN or builder configuration ([`Options`])
//! - Optional TLS via rustls
//! - Optional LZ4 block compression
//! - Client-side parameter binding with `?`, `$N` and `@name`
//! - Streaming results ([`Rows`]) and buffered inserts ([`Batch`])
//!
//! ## Example
//!
//! ```rust,no_run
//! use clickhouse_client::{Client, Options, CompressionMethod};
//!
//! # async fn example() -> clickhouse_client::Result<()> {
//! let options = Options::new("localhost:9000")
//!     .addr("localhost:9001")
//!     .auth("default", "default", "")
//!     .compression(CompressionMethod::Lz4);
//! let client = Client::open(options)?;
//!
//! client.ping().await?;
//! let count: u64 = client
//!     .query_row("SELECT count() FROM system.tables", &[])
//!     .await?
//!     .map(|row| row.get(0))
//!     .transpose()?
//!     .unwrap_or_default();
//! println!("{count} tables");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod batch;
pub mod bind;
pub mod client;
pub mod config;
pub mod error;
pub mod row;
pub mod session;
pub mod state;
pub mod transport;

pub use batch::{Batch, BatchColumn};
pub use bind::{Arg, bind, literal, named};
pub use client::{Client, PooledSession};
pub use config::{Auth, DEFAULT_PORT, Options, Settings, default_tls_config};
pub use error::{Error, Result};
pub use row::{Column, FromValue, Row, Rows};
pub use session::{ServerVersion, Session, SessionConnector};
pub use state::SessionState;

pub use ch_protocol::{ColumnType, CompressionMethod, Exception, Progress, Value};
pub use clickhouse_driver_pool::{OpenStrategy, PoolMetrics, PoolStatus};
