//! Connection pool implementation.
//!
//! Checked-out connections are bounded by a semaphore sized `max_open`;
//! released connections wait in a FIFO idle queue bounded by `max_idle`.
//! New connections are opened through a [`Connector`], trying each configured
//! address in the pool's [`OpenStrategy`](crate::config::OpenStrategy) order.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::config::{OpenStrategy, PoolConfig};
use crate::error::PoolError;
use crate::lifecycle::{ConnectionLifecycle, ConnectionMetadata, Connector, DiscardReason};

/// A bounded pool of connections opened by a [`Connector`].
///
/// Cloning the pool is cheap; all clones share the same connections.
///
/// # Example
///
/// ```rust,ignore
/// use clickhouse_driver_pool::{Pool, PoolConfig};
///
/// let pool = Pool::new(connector, PoolConfig::new(["127.0.0.1:9000"]))?;
/// let conn = pool.get().await?;
/// // Use connection...
/// // Returned to the pool on drop
/// ```
pub struct Pool<C: Connector> {
    inner: Arc<PoolInner<C>>,
}

impl<C: Connector> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PoolInner<C: Connector> {
    connector: C,
    config: PoolConfig,

    /// One permit per connection allowed out at once.
    permits: Arc<Semaphore>,

    /// Released connections available for reuse, oldest first.
    idle: Mutex<VecDeque<C::Connection>>,

    /// Written only while `idle` is locked.
    closed: AtomicBool,

    next_connection_id: AtomicU64,
    created_at: Instant,
    metrics: Mutex<PoolMetricsInner>,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    connections_created: u64,
    connections_closed: u64,
    connect_failures: u64,
    checkouts_successful: u64,
    checkouts_failed: u64,
    checkouts_reused: u64,
    discarded_unhealthy: u64,
    discarded_expired: u64,
    discarded_idle_full: u64,
}

impl<C: Connector> Pool<C> {
    /// Create a pool builder around `connector`.
    #[must_use]
    pub fn builder(connector: C) -> PoolBuilder<C> {
        PoolBuilder::new(connector)
    }

    /// Create a pool. No connection is opened until the first checkout.
    pub fn new(connector: C, config: PoolConfig) -> Result<Self, PoolError<C::Error>> {
        config.validate().map_err(PoolError::Config)?;

        tracing::info!(
            addresses = ?config.addresses,
            max_open = config.max_open,
            max_idle = config.max_idle,
            max_lifetime = ?config.max_lifetime,
            "connection pool created"
        );

        let inner = Arc::new(PoolInner {
            permits: Arc::new(Semaphore::new(config.max_open)),
            idle: Mutex::new(VecDeque::with_capacity(config.max_idle)),
            closed: AtomicBool::new(false),
            next_connection_id: AtomicU64::new(1),
            created_at: Instant::now(),
            metrics: Mutex::new(PoolMetricsInner::default()),
            connector,
            config,
        });
        Ok(Self { inner })
    }

    /// Check out a connection.
    ///
    /// Waits up to the acquire timeout for a permit, then reuses the oldest
    /// healthy idle connection or opens a new one.
    pub async fn get(&self) -> Result<PooledConnection<C>, PoolError<C::Error>> {
        if self.is_closed() {
            return Err(PoolError::PoolClosed);
        }

        let timeout = self.inner.config.acquire_timeout;
        let acquire = Arc::clone(&self.inner.permits).acquire_owned();
        let permit = match tokio::time::timeout(timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                self.inner.metrics.lock().checkouts_failed += 1;
                return Err(PoolError::PoolClosed);
            }
            Err(_) => {
                self.inner.metrics.lock().checkouts_failed += 1;
                tracing::warn!(timeout = ?timeout, "timed out waiting for a pooled connection");
                return Err(PoolError::Timeout(timeout));
            }
        };

        if let Some(conn) = self.inner.take_idle() {
            return Ok(self.checked_out(conn, permit, true));
        }

        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        match self.inner.connect_any(id).await {
            Ok(conn) => Ok(self.checked_out(conn, permit, false)),
            Err(e) => {
                drop(permit);
                self.inner.metrics.lock().checkouts_failed += 1;
                Err(e)
            }
        }
    }

    /// Check out an idle connection without waiting or dialing.
    ///
    /// Returns `None` when no permit or no healthy idle connection is
    /// immediately available.
    pub fn try_get(&self) -> Result<Option<PooledConnection<C>>, PoolError<C::Error>> {
        let permit = match Arc::clone(&self.inner.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(TryAcquireError::Closed) => return Err(PoolError::PoolClosed),
            Err(TryAcquireError::NoPermits) => return Ok(None),
        };
        Ok(self
            .inner
            .take_idle()
            .map(|conn| self.checked_out(conn, permit, true)))
    }

    fn checked_out(
        &self,
        conn: C::Connection,
        permit: OwnedSemaphorePermit,
        reused: bool,
    ) -> PooledConnection<C> {
        {
            let mut metrics = self.inner.metrics.lock();
            metrics.checkouts_successful += 1;
            if reused {
                metrics.checkouts_reused += 1;
            }
        }
        tracing::trace!(connection_id = conn.metadata().id, reused, "connection checked out");
        PooledConnection {
            conn: Some(conn),
            permit: Some(permit),
            pool: Arc::clone(&self.inner),
        }
    }

    /// Current occupancy.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let max_open = self.inner.config.max_open;
        let available = self.inner.permits.available_permits().min(max_open);
        PoolStatus {
            idle: self.inner.idle.lock().len(),
            in_use: max_open - available,
            max_open,
            max_idle: self.inner.config.max_idle,
        }
    }

    /// Counters collected since the pool was created.
    #[must_use]
    pub fn metrics(&self) -> PoolMetrics {
        let inner = self.inner.metrics.lock();
        PoolMetrics {
            connections_created: inner.connections_created,
            connections_closed: inner.connections_closed,
            connect_failures: inner.connect_failures,
            checkouts_successful: inner.checkouts_successful,
            checkouts_failed: inner.checkouts_failed,
            checkouts_reused: inner.checkouts_reused,
            discarded_unhealthy: inner.discarded_unhealthy,
            discarded_expired: inner.discarded_expired,
            discarded_idle_full: inner.discarded_idle_full,
            uptime: self.inner.created_at.elapsed(),
        }
    }

    /// Close the pool.
    ///
    /// Idle connections are closed now; checked-out connections are closed
    /// when released. Waiting and future checkouts fail with
    /// [`PoolError::PoolClosed`].
    pub fn close(&self) {
        let drained = {
            let mut idle = self.inner.idle.lock();
            if self.inner.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            std::mem::take(&mut *idle)
        };
        self.inner.permits.close();

        let count = drained.len();
        for conn in drained {
            self.inner.discard(conn, DiscardReason::PoolClosed);
        }
        tracing::info!(idle_closed = count, "connection pool closed");
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// The pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The connector used to open connections.
    #[must_use]
    pub fn connector(&self) -> &C {
        &self.inner.connector
    }
}

impl<C: Connector> PoolInner<C> {
    /// Pop idle connections until one is usable, closing the rest.
    fn take_idle(&self) -> Option<C::Connection> {
        loop {
            let conn = self.idle.lock().pop_front()?;
            if !conn.is_healthy() {
                self.discard(conn, DiscardReason::Unhealthy);
            } else if conn.metadata().is_expired(self.config.max_lifetime) {
                self.discard(conn, DiscardReason::Expired);
            } else {
                return Some(conn);
            }
        }
    }

    /// Try each address once; all attempts in this round share `id`.
    async fn connect_any(&self, id: u64) -> Result<C::Connection, PoolError<C::Error>> {
        let addresses = &self.config.addresses;
        let mut last_error = None;

        for index in self.config.open_strategy.order(addresses.len()) {
            let addr = &addresses[index];
            match self.connector.connect(addr, id).await {
                Ok(conn) => {
                    self.metrics.lock().connections_created += 1;
                    tracing::debug!(connection_id = id, addr = %addr, "connection opened");
                    return Ok(conn);
                }
                Err(e) => {
                    self.metrics.lock().connect_failures += 1;
                    tracing::warn!(connection_id = id, addr = %addr, error = %e, "connect failed");
                    last_error = Some((addr.clone(), e));
                }
            }
        }

        match last_error {
            Some((addr, source)) => Err(PoolError::Connect { addr, source }),
            None => Err(PoolError::Config("no addresses configured".into())),
        }
    }

    /// Return a released connection to the idle queue or close it.
    fn release(&self, conn: C::Connection) {
        let reason = if !conn.is_healthy() {
            Some(DiscardReason::Unhealthy)
        } else if conn.metadata().is_expired(self.config.max_lifetime) {
            Some(DiscardReason::Expired)
        } else {
            None
        };

        let overflow = match reason {
            Some(reason) => Some((conn, reason)),
            None => {
                let mut idle = self.idle.lock();
                if self.closed.load(Ordering::Acquire) {
                    Some((conn, DiscardReason::PoolClosed))
                } else if idle.len() < self.config.max_idle {
                    tracing::trace!(
                        connection_id = conn.metadata().id,
                        "connection returned to idle queue"
                    );
                    idle.push_back(conn);
                    None
                } else {
                    Some((conn, DiscardReason::IdleFull))
                }
            }
        };

        if let Some((conn, reason)) = overflow {
            self.discard(conn, reason);
        }
    }

    fn discard(&self, conn: C::Connection, reason: DiscardReason) {
        tracing::debug!(
            connection_id = conn.metadata().id,
            age = ?conn.metadata().age(),
            reason = ?reason,
            "closing connection"
        );
        {
            let mut metrics = self.metrics.lock();
            metrics.connections_closed += 1;
            match reason {
                DiscardReason::Unhealthy => metrics.discarded_unhealthy += 1,
                DiscardReason::Expired => metrics.discarded_expired += 1,
                DiscardReason::IdleFull => metrics.discarded_idle_full += 1,
                DiscardReason::PoolClosed => {}
            }
        }
        conn.close();
    }
}

/// Builder for creating a connection pool.
///
/// ```rust,ignore
/// let pool = Pool::builder(connector)
///     .addresses(["10.0.0.1:9000", "10.0.0.2:9000"])
///     .max_open(20)
///     .build()?;
/// ```
pub struct PoolBuilder<C: Connector> {
    connector: C,
    config: PoolConfig,
}

impl<C: Connector> PoolBuilder<C> {
    /// Create a builder with default limits and no addresses.
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            config: PoolConfig::default(),
        }
    }

    /// Replace the whole configuration.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the candidate addresses.
    #[must_use]
    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.addresses = addresses.into_iter().map(Into::into).collect();
        self
    }

    /// Set the maximum number of checked-out connections.
    #[must_use]
    pub fn max_open(mut self, n: usize) -> Self {
        self.config.max_open = n;
        self
    }

    /// Set the maximum number of idle connections.
    #[must_use]
    pub fn max_idle(mut self, n: usize) -> Self {
        self.config.max_idle = n;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.config.max_lifetime = lifetime;
        self
    }

    /// Set how long checkouts wait for a permit.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Set the address ordering strategy.
    #[must_use]
    pub fn open_strategy(mut self, strategy: OpenStrategy) -> Self {
        self.config.open_strategy = strategy;
        self
    }

    /// Build the pool.
    pub fn build(self) -> Result<Pool<C>, PoolError<C::Error>> {
        Pool::new(self.connector, self.config)
    }
}

/// Occupancy snapshot of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections waiting in the idle queue.
    pub idle: usize,
    /// Permits currently held, including checkouts still dialing.
    pub in_use: usize,
    /// Maximum checked-out connections.
    pub max_open: usize,
    /// Maximum idle connections.
    pub max_idle: usize,
}

impl PoolStatus {
    /// Percentage of `max_open` currently checked out.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_open == 0 {
            return 0.0;
        }
        (self.in_use as f64 / self.max_open as f64) * 100.0
    }

    /// Whether every permit is held.
    #[must_use]
    pub fn is_at_capacity(&self) -> bool {
        self.in_use >= self.max_open
    }
}

/// Counters collected from the pool.
#[derive(Debug, Clone)]
pub struct PoolMetrics {
    /// Connections opened since the pool was created.
    pub connections_created: u64,
    /// Connections closed by the pool.
    pub connections_closed: u64,
    /// Individual connection attempts that failed.
    pub connect_failures: u64,
    /// Successful checkouts.
    pub checkouts_successful: u64,
    /// Failed checkouts (timeouts, pool closed, every address failing).
    pub checkouts_failed: u64,
    /// Checkouts served from the idle queue.
    pub checkouts_reused: u64,
    /// Connections closed because they reported themselves unusable.
    pub discarded_unhealthy: u64,
    /// Connections closed because they reached the lifetime limit.
    pub discarded_expired: u64,
    /// Connections closed because the idle queue was full.
    pub discarded_idle_full: u64,
    /// Time since pool creation.
    pub uptime: Duration,
}

impl PoolMetrics {
    /// Checkout success rate (0.0 to 1.0).
    #[must_use]
    pub fn checkout_success_rate(&self) -> f64 {
        let total = self.checkouts_successful + self.checkouts_failed;
        if total == 0 {
            return 1.0;
        }
        self.checkouts_successful as f64 / total as f64
    }

    /// Fraction of successful checkouts served without dialing.
    #[must_use]
    pub fn reuse_rate(&self) -> f64 {
        if self.checkouts_successful == 0 {
            return 0.0;
        }
        self.checkouts_reused as f64 / self.checkouts_successful as f64
    }
}

/// A connection checked out of the pool.
///
/// Dropping it releases the connection: healthy, unexpired connections go
/// back to the idle queue, everything else is closed. Use
/// [`detach`](PooledConnection::detach) to take ownership instead.
pub struct PooledConnection<C: Connector> {
    conn: Option<C::Connection>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<C>>,
}

impl<C: Connector> PooledConnection<C> {
    /// Pool bookkeeping for the connection.
    #[must_use]
    pub fn metadata(&self) -> &ConnectionMetadata {
        self.deref().metadata()
    }

    /// Take the connection out of the pool.
    ///
    /// The permit is released immediately; the connection is no longer
    /// counted or managed by the pool.
    pub fn detach(mut self) -> C::Connection {
        self.permit.take();
        let conn = self.take_conn();
        tracing::trace!(connection_id = conn.metadata().id, "connection detached from pool");
        conn
    }

    fn take_conn(&mut self) -> C::Connection {
        self.conn
            .take()
            .unwrap_or_else(|| unreachable!("pooled connection taken twice"))
    }
}

impl<C: Connector> Deref for PooledConnection<C> {
    type Target = C::Connection;

    fn deref(&self) -> &Self::Target {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl<C: Connector> DerefMut for PooledConnection<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl<C: Connector> Drop for PooledConnection<C> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
        // The connection is idle or closed before its permit frees up, so
        // checked-out plus idle connections never exceed `max_open`.
        self.permit.take();
    }
}

impl<C: Connector> std::fmt::Debug for PooledConnection<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("metadata", &self.conn.as_ref().map(|c| c.metadata()))
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused by {0}")]
    struct Refused(String);

    #[derive(Default)]
    struct Counters {
        live: AtomicUsize,
        max_live: AtomicUsize,
        closed: AtomicUsize,
        attempts: Mutex<Vec<(String, u64)>>,
    }

    struct FakeConnection {
        meta: ConnectionMetadata,
        healthy: bool,
        counters: Arc<Counters>,
    }

    impl ConnectionLifecycle for FakeConnection {
        fn metadata(&self) -> &ConnectionMetadata {
            &self.meta
        }

        fn is_healthy(&self) -> bool {
            self.healthy
        }

        fn close(self) {
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
            self.counters.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct FakeConnector {
        bad: HashSet<String>,
        counters: Arc<Counters>,
    }

    impl FakeConnector {
        fn new(bad: &[&str]) -> Self {
            Self {
                bad: bad.iter().map(|s| (*s).to_string()).collect(),
                counters: Arc::new(Counters::default()),
            }
        }
    }

    #[async_trait]
    impl Connector for FakeConnector {
        type Connection = FakeConnection;
        type Error = Refused;

        async fn connect(&self, addr: &str, id: u64) -> Result<FakeConnection, Refused> {
            self.counters.attempts.lock().push((addr.to_string(), id));
            if self.bad.contains(addr) {
                return Err(Refused(addr.to_string()));
            }
            let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
            self.counters.max_live.fetch_max(live, Ordering::SeqCst);
            Ok(FakeConnection {
                meta: ConnectionMetadata::new(id, addr),
                healthy: true,
                counters: Arc::clone(&self.counters),
            })
        }
    }

    fn pool(config: PoolConfig) -> (Pool<FakeConnector>, Arc<Counters>) {
        pool_with(&[], config)
    }

    fn pool_with(bad: &[&str], config: PoolConfig) -> (Pool<FakeConnector>, Arc<Counters>) {
        let connector = FakeConnector::new(bad);
        let counters = Arc::clone(&connector.counters);
        (Pool::new(connector, config).unwrap(), counters)
    }

    #[tokio::test]
    async fn test_healthy_connection_is_reused() {
        let (pool, _) = pool(PoolConfig::new(["a:9000"]));

        let first = pool.get().await.unwrap();
        let id = first.metadata().id;
        drop(first);
        assert_eq!(pool.status().idle, 1);

        let second = pool.get().await.unwrap();
        assert_eq!(second.metadata().id, id);
        let metrics = pool.metrics();
        assert_eq!(metrics.connections_created, 1);
        assert_eq!(metrics.checkouts_reused, 1);
    }

    #[tokio::test]
    async fn test_unhealthy_connection_is_closed_on_release() {
        let (pool, counters) = pool(PoolConfig::new(["a:9000"]));

        let mut conn = pool.get().await.unwrap();
        let id = conn.metadata().id;
        conn.healthy = false;
        drop(conn);

        assert_eq!(pool.status().idle, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().discarded_unhealthy, 1);

        let fresh = pool.get().await.unwrap();
        assert_ne!(fresh.metadata().id, id);
    }

    #[tokio::test]
    async fn test_expired_connection_is_closed_on_release() {
        let (pool, counters) =
            pool(PoolConfig::new(["a:9000"]).max_lifetime(Duration::from_millis(20)));

        let conn = pool.get().await.unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        drop(conn);

        assert_eq!(pool.status().idle, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert_eq!(pool.metrics().discarded_expired, 1);
    }

    #[tokio::test]
    async fn test_expired_idle_connection_is_skipped_at_checkout() {
        let (pool, counters) =
            pool(PoolConfig::new(["a:9000"]).max_lifetime(Duration::from_millis(30)));

        let conn = pool.get().await.unwrap();
        let id = conn.metadata().id;
        drop(conn);
        assert_eq!(pool.status().idle, 1);

        tokio::time::sleep(Duration::from_millis(50)).await;
        let fresh = pool.get().await.unwrap();
        assert_ne!(fresh.metadata().id, id);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_idle_overflow_is_closed() {
        let (pool, counters) = pool(PoolConfig::new(["a:9000"]).max_open(3).max_idle(1));

        let conns = vec![
            pool.get().await.unwrap(),
            pool.get().await.unwrap(),
            pool.get().await.unwrap(),
        ];
        drop(conns);

        assert_eq!(pool.status().idle, 1);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
        assert_eq!(pool.metrics().discarded_idle_full, 2);
    }

    #[tokio::test]
    async fn test_failover_skips_bad_addresses() {
        let (pool, counters) =
            pool_with(&["bad1", "bad2"], PoolConfig::new(["bad1", "bad2", "good"]));

        let conn = pool.get().await.unwrap();
        assert_eq!(conn.metadata().address, "good");

        let attempts = counters.attempts.lock().clone();
        let addrs: Vec<_> = attempts.iter().map(|(a, _)| a.as_str()).collect();
        assert_eq!(addrs, vec!["bad1", "bad2", "good"]);
        // one identity per dial round
        assert!(attempts.iter().all(|(_, id)| *id == conn.metadata().id));
        assert_eq!(pool.metrics().connect_failures, 2);
    }

    #[tokio::test]
    async fn test_failover_exhausted_returns_last_error() {
        let (pool, _) = pool_with(
            &["bad1", "bad2"],
            PoolConfig::new(["bad1", "bad2"]).max_open(1).max_idle(1),
        );

        match pool.get().await {
            Err(PoolError::Connect { addr, source }) => {
                assert_eq!(addr, "bad2");
                assert_eq!(source.0, "bad2");
            }
            other => panic!("expected connect error, got {other:?}"),
        }
        // the permit came back
        assert_eq!(pool.status().in_use, 0);
        assert!(matches!(pool.get().await, Err(PoolError::Connect { .. })));
    }

    #[tokio::test]
    async fn test_identity_advances_per_round() {
        let (pool, _) = pool(PoolConfig::new(["a:9000"]));
        let first = pool.get().await.unwrap();
        let second = pool.get().await.unwrap();
        assert_eq!(second.metadata().id, first.metadata().id + 1);
    }

    #[tokio::test]
    async fn test_get_times_out_when_exhausted() {
        let timeout = Duration::from_millis(50);
        let (pool, _) = pool(
            PoolConfig::new(["a:9000"])
                .max_open(1)
                .max_idle(1)
                .acquire_timeout(timeout),
        );

        let _held = pool.get().await.unwrap();
        let start = Instant::now();
        let err = pool.get().await.unwrap_err();
        assert!(err.is_timeout());
        assert!(start.elapsed() >= timeout);
        assert_eq!(pool.metrics().checkouts_failed, 1);
    }

    #[tokio::test]
    async fn test_waiting_get_wakes_on_release() {
        let (pool, _) = pool(PoolConfig::new(["a:9000"]).max_open(1).max_idle(1));

        let held = pool.get().await.unwrap();
        let id = held.metadata().id;
        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(held);
        });

        let conn = pool.get().await.unwrap();
        assert_eq!(conn.metadata().id, id);
        releaser.await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_checkouts_respect_limits() {
        let (pool, counters) = pool(
            PoolConfig::new(["a:9000"])
                .max_open(4)
                .max_idle(2)
                .acquire_timeout(Duration::from_secs(10)),
        );
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..32 {
            let pool = pool.clone();
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            tasks.push(tokio::spawn(async move {
                for _ in 0..10 {
                    let conn = pool.get().await.unwrap();
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    max_active.fetch_max(now, Ordering::SeqCst);
                    assert!(pool.status().idle <= 2);
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    drop(conn);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(max_active.load(Ordering::SeqCst) <= 4);
        assert!(counters.max_live.load(Ordering::SeqCst) <= 4);
        assert!(pool.status().idle <= 2);
        assert_eq!(pool.status().in_use, 0);
    }

    #[tokio::test]
    async fn test_close_drains_idle_and_rejects_checkouts() {
        let (pool, counters) = pool(PoolConfig::new(["a:9000"]));

        let a = pool.get().await.unwrap();
        let b = pool.get().await.unwrap();
        let held = pool.get().await.unwrap();
        drop(a);
        drop(b);
        assert_eq!(pool.status().idle, 2);

        pool.close();
        assert!(pool.is_closed());
        assert_eq!(pool.status().idle, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 2);
        assert!(matches!(pool.get().await, Err(PoolError::PoolClosed)));
        assert!(matches!(pool.try_get(), Err(PoolError::PoolClosed)));

        // released after close: closed, never idled
        drop(held);
        assert_eq!(pool.status().idle, 0);
        assert_eq!(counters.closed.load(Ordering::SeqCst), 3);
        assert_eq!(counters.live.load(Ordering::SeqCst), 0);

        // closing twice is harmless
        pool.close();
    }

    #[tokio::test]
    async fn test_close_wakes_waiters() {
        let (pool, _) = pool(
            PoolConfig::new(["a:9000"])
                .max_open(1)
                .max_idle(1)
                .acquire_timeout(Duration::from_secs(10)),
        );
        let _held = pool.get().await.unwrap();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.get().await.map(|_| ()) })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.close();

        assert!(matches!(waiter.await.unwrap(), Err(PoolError::PoolClosed)));
    }

    #[tokio::test]
    async fn test_try_get_only_returns_idle_connections() {
        let (pool, _) = pool(PoolConfig::new(["a:9000"]));
        assert!(pool.try_get().unwrap().is_none());

        drop(pool.get().await.unwrap());
        let conn = pool.try_get().unwrap();
        assert!(conn.is_some());
        assert_eq!(pool.status().in_use, 1);
    }

    #[tokio::test]
    async fn test_detach_releases_permit() {
        let (pool, counters) = pool(PoolConfig::new(["a:9000"]).max_open(1).max_idle(1));

        let conn = pool.get().await.unwrap().detach();
        assert_eq!(pool.status().in_use, 0);
        assert_eq!(pool.status().idle, 0);

        conn.close();
        assert_eq!(counters.closed.load(Ordering::SeqCst), 1);
        assert!(pool.get().await.is_ok());
    }

    #[test]
    fn test_builder_validates() {
        let result = Pool::builder(FakeConnector::new(&[]))
            .addresses(["a:9000"])
            .max_open(1)
            .max_idle(2)
            .build();
        assert!(matches!(result, Err(PoolError::Config(_))));

        let pool = Pool::builder(FakeConnector::new(&[]))
            .addresses(["a:9000", "b:9000"])
            .open_strategy(OpenStrategy::Random)
            .build()
            .unwrap();
        assert_eq!(pool.config().addresses.len(), 2);
    }

    #[test]
    fn test_status_and_metrics_helpers() {
        let status = PoolStatus {
            idle: 0,
            in_use: 5,
            max_open: 10,
            max_idle: 5,
        };
        assert!((status.utilization() - 50.0).abs() < f64::EPSILON);
        assert!(!status.is_at_capacity());

        let metrics = PoolMetrics {
            connections_created: 2,
            connections_closed: 0,
            connect_failures: 0,
            checkouts_successful: 3,
            checkouts_failed: 1,
            checkouts_reused: 1,
            discarded_unhealthy: 0,
            discarded_expired: 0,
            discarded_idle_full: 0,
            uptime: Duration::ZERO,
        };
        assert!((metrics.checkout_success_rate() - 0.75).abs() < f64::EPSILON);
        assert!((metrics.reuse_rate() - 1.0 / 3.0).abs() < 1e-9);
    }
}
