//! # clickhouse-testing
//!
//! Test infrastructure for the ClickHouse driver: an in-process
//! [`MockServer`] speaking the native protocol over localhost TCP, plus small
//! helpers for integration tests.
//!
//! The server keeps tables in memory and understands a small set of
//! statements (`CREATE TABLE`, `DROP TABLE`, `INSERT INTO`, `SELECT *`,
//! `SELECT count()`, `SELECT number FROM numbers(N)`, `SELECT sleep(s)`,
//! `SELECT <literal>`, `SELECT corrupt()`). Everything else gets a syntax
//! error exception.
//!
//! ```rust,no_run
//! use clickhouse_testing::MockServer;
//!
//! # async fn example() -> std::io::Result<()> {
//! let server = MockServer::builder().credentials("app", "secret").start().await?;
//! println!("listening on {}", server.addr());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod server;
pub mod statement;

use std::time::Duration;

pub use server::{MockError, MockServer, MockServerBuilder, MockStats, ReceivedQuery};
pub use statement::Statement;

/// An address nothing listens on.
pub fn unused_addr() -> std::io::Result<String> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    drop(listener);
    Ok(addr.to_string())
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
