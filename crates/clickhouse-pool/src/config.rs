//! Pool configuration.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Order in which addresses are tried when opening a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OpenStrategy {
    /// Always start from the first address.
    #[default]
    InOrder,
    /// Start from a random address, then wrap around.
    Random,
    /// Start from an address picked by the current time, then wrap around.
    TimeRandom,
}

impl OpenStrategy {
    /// Address indices in the order they should be tried.
    pub fn order(&self, len: usize) -> impl Iterator<Item = usize> {
        let start = match (self, len) {
            (_, 0) | (Self::InOrder, _) => 0,
            (Self::Random, _) => rand::thread_rng().gen_range(0..len),
            (Self::TimeRandom, _) => {
                let nanos = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map_or(0, |d| d.subsec_nanos() as usize);
                nanos % len
            }
        };
        (0..len).map(move |i| (start + i) % len)
    }
}

impl FromStr for OpenStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "in_order" => Ok(Self::InOrder),
            "random" => Ok(Self::Random),
            "time_random" => Ok(Self::TimeRandom),
            other => Err(format!("unknown connection open strategy: {other}")),
        }
    }
}

impl fmt::Display for OpenStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InOrder => "in_order",
            Self::Random => "random",
            Self::TimeRandom => "time_random",
        })
    }
}

/// Configuration for a connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Candidate server addresses, tried in `open_strategy` order.
    pub addresses: Vec<String>,
    /// Maximum connections checked out at once.
    pub max_open: usize,
    /// Maximum idle connections retained for reuse.
    pub max_idle: usize,
    /// Connections at least this old are closed on release.
    pub max_lifetime: Duration,
    /// How long `get` waits for a free permit.
    pub acquire_timeout: Duration,
    /// Address ordering for failover.
    pub open_strategy: OpenStrategy,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            addresses: Vec::new(),
            max_open: 10,
            max_idle: 5,
            max_lifetime: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(1),
            open_strategy: OpenStrategy::InOrder,
        }
    }
}

impl PoolConfig {
    /// Create a configuration for the given addresses with default limits.
    #[must_use]
    pub fn new<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the maximum number of checked-out connections.
    #[must_use]
    pub fn max_open(mut self, n: usize) -> Self {
        self.max_open = n;
        self
    }

    /// Set the maximum number of idle connections.
    #[must_use]
    pub fn max_idle(mut self, n: usize) -> Self {
        self.max_idle = n;
        self
    }

    /// Set the maximum connection lifetime.
    #[must_use]
    pub fn max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = lifetime;
        self
    }

    /// Set the acquire timeout.
    #[must_use]
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the address ordering strategy.
    #[must_use]
    pub fn open_strategy(mut self, strategy: OpenStrategy) -> Self {
        self.open_strategy = strategy;
        self
    }

    /// Check the limits and addresses.
    pub fn validate(&self) -> Result<(), String> {
        if self.addresses.is_empty() {
            return Err("at least one address is required".into());
        }
        if self.max_idle == 0 {
            return Err("max_idle must be at least 1".into());
        }
        if self.max_open < self.max_idle {
            return Err(format!(
                "max_open ({}) must be >= max_idle ({})",
                self.max_open, self.max_idle
            ));
        }
        if self.max_open > tokio::sync::Semaphore::MAX_PERMITS {
            return Err(format!("max_open ({}) is too large", self.max_open));
        }
        if self.max_lifetime.is_zero() {
            return Err("max_lifetime must be non-zero".into());
        }
        if self.acquire_timeout.is_zero() {
            return Err("acquire_timeout must be non-zero".into());
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_driver_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_idle, 5);
        assert_eq!(config.max_open, 10);
        assert_eq!(config.max_lifetime, Duration::from_secs(3600));
        assert_eq!(config.acquire_timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_validate() {
        assert!(PoolConfig::new(["a:9000"]).validate().is_ok());
        assert!(PoolConfig::new(Vec::<String>::new()).validate().is_err());
        assert!(
            PoolConfig::new(["a:9000"])
                .max_open(2)
                .max_idle(3)
                .validate()
                .is_err()
        );
        assert!(PoolConfig::new(["a:9000"]).max_idle(0).validate().is_err());
        assert!(
            PoolConfig::new(["a:9000"])
                .acquire_timeout(Duration::ZERO)
                .validate()
                .is_err()
        );
    }

    #[test]
    fn test_in_order_visits_every_address_once() {
        let order: Vec<_> = OpenStrategy::InOrder.order(3).collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_rotating_strategies_visit_every_address_once() {
        for strategy in [OpenStrategy::Random, OpenStrategy::TimeRandom] {
            let mut order: Vec<_> = strategy.order(5).collect();
            order.sort_unstable();
            assert_eq!(order, vec![0, 1, 2, 3, 4]);
        }
        assert_eq!(OpenStrategy::Random.order(0).count(), 0);
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("IN_ORDER".parse::<OpenStrategy>().unwrap(), OpenStrategy::InOrder);
        assert_eq!(
            "time_random".parse::<OpenStrategy>().unwrap(),
            OpenStrategy::TimeRandom
        );
        assert!("round_robin".parse::<OpenStrategy>().is_err());
    }
}
