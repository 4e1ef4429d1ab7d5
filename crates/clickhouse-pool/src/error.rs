//! Pool error types.

use std::time::Duration;

use thiserror::Error;

/// Errors returned by the pool.
///
/// `E` is the connector's error type, surfaced unchanged when every address
/// failed.
#[derive(Debug, Error)]
pub enum PoolError<E> {
    /// No permit became available within the acquire timeout.
    #[error("timed out after {0:?} waiting for a connection")]
    Timeout(Duration),

    /// The pool has been closed.
    #[error("pool is closed")]
    PoolClosed,

    /// Every configured address failed; carries the last failure.
    #[error("connect to {addr} failed: {source}")]
    Connect {
        /// Address of the last attempt.
        addr: String,
        /// Error from the last attempt.
        #[source]
        source: E,
    },

    /// The pool configuration is invalid.
    #[error("invalid pool configuration: {0}")]
    Config(String),
}

impl<E> PoolError<E> {
    /// Whether the error is an acquire timeout.
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}
