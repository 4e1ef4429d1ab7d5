//! # clickhouse-driver-pool
//!
//! Bounded connection pool for ClickHouse sessions.
//!
//! The pool is generic over a [`Connector`], so it knows nothing about the
//! wire protocol: it only asks connections whether they are healthy and when
//! they were created.
//!
//! ## Features
//!
//! - Hard cap on checked-out connections with a bounded acquire wait
//! - Bounded FIFO idle queue
//! - Connections closed once they reach a maximum lifetime
//! - Ordered failover across several server addresses
//! - Metrics for observability
//!
//! ## Example
//!
//! ```rust,ignore
//! use clickhouse_driver_pool::{OpenStrategy, Pool};
//! use std::time::Duration;
//!
//! let pool = Pool::builder(connector)
//!     .addresses(["10.0.0.1:9000", "10.0.0.2:9000"])
//!     .max_open(20)
//!     .max_idle(5)
//!     .max_lifetime(Duration::from_secs(600))
//!     .open_strategy(OpenStrategy::Random)
//!     .build()?;
//!
//! let conn = pool.get().await?;
//! // Use connection...
//! // Returned to the pool on drop
//!
//! let status = pool.status();
//! println!("Pool utilization: {:.1}%", status.utilization());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pool;

// Configuration
pub use config::{OpenStrategy, PoolConfig};

// Error types
pub use error::PoolError;

// Pool types
pub use pool::{Pool, PoolBuilder, PoolMetrics, PoolStatus, PooledConnection};

// Lifecycle management
pub use lifecycle::{ConnectionLifecycle, ConnectionMetadata, Connector, DiscardReason};
