use redis::{AsyncCommands, aio::ConnectionManager};
use tracing::instrument;

use crate::{ViewSink, error::SinkError};

/// [`ViewSink`] backed by one Redis hash of `id -> views`.
///
/// `HINCRBY` makes each flush write a single atomic command, so several
/// instances can flush into the same hash concurrently.
#[derive(Clone)]
pub struct RedisViewStore {
    conn: ConnectionManager,
    hash_key: String,
}

impl RedisViewStore {
    pub const DEFAULT_HASH_KEY: &'static str = "quill:views";

    pub fn new(conn: ConnectionManager) -> Self {
        Self {
            conn,
            hash_key: Self::DEFAULT_HASH_KEY.to_owned(),
        }
    }

    #[must_use]
    pub fn with_hash_key(mut self, hash_key: impl Into<String>) -> Self {
        self.hash_key = hash_key.into();
        self
    }

    /// Persisted views for `id`, `0` if absent.
    ///
    /// # Errors
    ///
    /// Returns the Redis error if the read fails.
    pub async fn views(&self, id: &str) -> redis::RedisResult<u64> {
        let mut conn = self.conn.clone();
        let views: Option<u64> = conn.hget(&self.hash_key, id).await?;
        Ok(views.unwrap_or(0))
    }
}

impl ViewSink for RedisViewStore {
    #[instrument(level = "trace", skip(self))]
    async fn add_views(&self, id: &str, delta: u64) -> Result<(), SinkError> {
        let mut conn = self.conn.clone();
        let _: i64 = conn
            .hincr(&self.hash_key, id, delta)
            .await
            .map_err(|e| SinkError::new(id, delta, e))?;
        Ok(())
    }
}

impl core::fmt::Debug for RedisViewStore {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisViewStore")
            .field("hash_key", &self.hash_key)
            .finish_non_exhaustive()
    }
}
