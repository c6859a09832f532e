//! Module dedicated to the connection pool configuration.

use std::time::Duration;

/// The connection pool configuration.
///
/// Bounds apply per identity `(user_id, account_id)`, not globally.
#[derive(Clone, Debug, Eq, PartialEq)]
#[cfg_attr(
    feature = "derive",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "kebab-case", default)
)]
pub struct PoolConfig {
    /// The maximum number of live connections one identity may hold.
    pub max_connections: usize,

    /// The number of idle connections the reaper never goes below.
    pub min_connections: usize,

    /// How long a connection may stay idle before being reaped.
    #[cfg_attr(feature = "derive", serde(with = "duration_ms"))]
    pub idle_timeout: Duration,

    /// How long a checkout waits for an available connection before
    /// failing.
    #[cfg_attr(feature = "derive", serde(with = "duration_ms"))]
    pub connection_timeout: Duration,

    /// How many times a connect is attempted before failing.
    pub retry_attempts: u32,

    /// The base delay between two connect attempts. The n-th retry
    /// waits `retry_delay * n`.
    #[cfg_attr(feature = "derive", serde(with = "duration_ms"))]
    pub retry_delay: Duration,

    /// The period of the idle reaper.
    #[cfg_attr(feature = "derive", serde(with = "duration_ms"))]
    pub reap_interval: Duration,
}

impl PoolConfig {
    pub const DEFAULT_MAX_CONNECTIONS: usize = 5;
    pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(5 * 60);
    pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);
    pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
    pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
    pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(60);

    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    pub fn with_min_connections(mut self, min: usize) -> Self {
        self.min_connections = min;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Return the delay to wait after the given failed attempt
    /// (starting at 1).
    pub fn retry_delay_after(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: Self::DEFAULT_MAX_CONNECTIONS,
            min_connections: 0,
            idle_timeout: Self::DEFAULT_IDLE_TIMEOUT,
            connection_timeout: Self::DEFAULT_CONNECTION_TIMEOUT,
            retry_attempts: Self::DEFAULT_RETRY_ATTEMPTS,
            retry_delay: Self::DEFAULT_RETRY_DELAY,
            reap_interval: Self::DEFAULT_REAP_INTERVAL,
        }
    }
}

#[cfg(feature = "derive")]
mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_millis().try_into().unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
