use std::{sync::Arc, time::Duration};

use redis::{
    Client, Script,
    aio::{ConnectionManager, ConnectionManagerConfig},
};
use tracing::instrument;

use crate::{CounterStore, error::StoreError};

/// Increments the counter and starts its TTL only on the first hit of a
/// window, in one server-side step.
const INCR_WITH_TTL: &str = r"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
return count
";

/// Opens a Redis connection manager tuned for request-path calls: one retry
/// and a short connect timeout, so an unreachable server surfaces as an error
/// quickly instead of stalling requests.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if the URL is invalid or the first
/// connection cannot be established.
pub async fn connect_redis(url: &str) -> Result<ConnectionManager, StoreError> {
    let config = ConnectionManagerConfig::new()
        .set_number_of_retries(1)
        .set_connection_timeout(Some(Duration::from_millis(100)));

    let client = Client::open(url).map_err(StoreError::unavailable)?;
    client
        .get_connection_manager_with_config(config)
        .await
        .map_err(StoreError::unavailable)
}

/// Networked [`CounterStore`] for multi-instance deployments.
///
/// Every instance sharing the Redis server shares the counters, and the
/// increment-with-TTL runs as a single Lua script so concurrent callers on
/// different hosts cannot interleave between the `INCR` and the `PEXPIRE`.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    script: Arc<Script>,
    prefix: String,
}

impl RedisCounterStore {
    pub const DEFAULT_PREFIX: &'static str = "quill:rl:";

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            script: Arc::new(Script::new(INCR_WITH_TTL)),
            prefix: Self::DEFAULT_PREFIX.to_owned(),
        }
    }

    /// # Errors
    ///
    /// See [`connect_redis`].
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        connect_redis(url).await.map(Self::new)
    }

    /// Namespaces every key with `prefix`.
    #[must_use]
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }
}

impl CounterStore for RedisCounterStore {
    #[instrument(level = "trace", skip(self))]
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let ttl_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let count: i64 = self
            .script
            .key(format!("{}{key}", self.prefix))
            .arg(ttl_ms)
            .invoke_async(&mut conn)
            .await
            .map_err(StoreError::unavailable)?;
        u64::try_from(count).map_err(|_| StoreError::InvalidResponse(count.to_string()))
    }
}

impl core::fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}
