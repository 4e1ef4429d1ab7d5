//! Connection lifecycle hooks used by the pool.

use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Bookkeeping attached to every pooled connection.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// Identity assigned by the pool for the dial round that produced the
    /// connection.
    pub id: u64,
    /// Address the connection was opened against.
    pub address: String,
    /// When the connection was established.
    pub created_at: Instant,
}

impl ConnectionMetadata {
    /// Create metadata stamped with the current time.
    #[must_use]
    pub fn new(id: u64, address: impl Into<String>) -> Self {
        Self {
            id,
            address: address.into(),
            created_at: Instant::now(),
        }
    }

    /// Time since the connection was established.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.created_at.elapsed()
    }

    /// Whether the connection has reached `max_lifetime`.
    #[must_use]
    pub fn is_expired(&self, max_lifetime: Duration) -> bool {
        self.age() >= max_lifetime
    }
}

/// Why the pool closed a connection instead of keeping it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscardReason {
    /// The connection reported itself unusable.
    Unhealthy,
    /// The connection outlived the configured lifetime.
    Expired,
    /// The idle queue was already full.
    IdleFull,
    /// The pool was closed.
    PoolClosed,
}

/// A connection the pool can manage.
pub trait ConnectionLifecycle: Send + 'static {
    /// Pool bookkeeping for this connection.
    fn metadata(&self) -> &ConnectionMetadata;

    /// Whether the connection can be handed to another caller.
    fn is_healthy(&self) -> bool;

    /// Close the connection, releasing its transport.
    fn close(self);
}

/// Opens new connections for the pool.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connection type produced.
    type Connection: ConnectionLifecycle;

    /// Error returned when a connection attempt fails.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Open one connection to `addr`, tagging it with `id`.
    async fn connect(&self, addr: &str, id: u64) -> Result<Self::Connection, Self::Error>;
}
