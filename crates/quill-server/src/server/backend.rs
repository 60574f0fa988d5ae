//! Store selection for the host process.
//!
//! The binary picks its backing stores at startup from configuration, so the
//! concrete store types are wrapped in enums that forward to whichever one
//! was chosen.

use std::time::Duration;

use quill::{CounterStore, MemoryCounterStore, MemoryViewStore, SinkError, StoreError, ViewSink};
#[cfg(feature = "redis")]
use quill::{FallbackCounterStore, RedisCounterStore, RedisViewStore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::server::config::ServerConfig;

/// How often expired in-process rate-limit windows are swept.
const SWEEP_EVERY: Duration = Duration::from_secs(30);

#[derive(Debug)]
pub enum Counters {
    Memory(MemoryCounterStore),
    #[cfg(feature = "redis")]
    Redis(RedisCounterStore),
    #[cfg(feature = "redis")]
    RedisWithFallback(FallbackCounterStore<RedisCounterStore, MemoryCounterStore>),
}

impl Counters {
    /// In-process store the sweeper should keep small, if any.
    fn local(&self) -> Option<&MemoryCounterStore> {
        match self {
            Self::Memory(store) => Some(store),
            #[cfg(feature = "redis")]
            Self::Redis(_) => None,
            #[cfg(feature = "redis")]
            Self::RedisWithFallback(store) => Some(store.fallback()),
        }
    }

    /// Starts the expired-window sweeper for the in-process store, if any.
    pub fn spawn_sweeper(&self, cancel: CancellationToken) -> Option<JoinHandle<()>> {
        self.local()
            .map(|store| store.spawn_sweeper(SWEEP_EVERY, cancel))
    }
}

impl CounterStore for Counters {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        match self {
            Self::Memory(store) => store.increment(key, window).await,
            #[cfg(feature = "redis")]
            Self::Redis(store) => store.increment(key, window).await,
            #[cfg(feature = "redis")]
            Self::RedisWithFallback(store) => store.increment(key, window).await,
        }
    }
}

#[derive(Clone, Debug)]
pub enum ViewStore {
    Memory(MemoryViewStore),
    #[cfg(feature = "redis")]
    Redis(RedisViewStore),
}

impl ViewStore {
    /// Views already committed for `id`.
    pub async fn persisted(&self, id: &str) -> Result<u64, StoreError> {
        match self {
            Self::Memory(store) => Ok(store.views(id)),
            #[cfg(feature = "redis")]
            Self::Redis(store) => store.views(id).await.map_err(StoreError::unavailable),
        }
    }
}

impl ViewSink for ViewStore {
    async fn add_views(&self, id: &str, delta: u64) -> Result<(), SinkError> {
        match self {
            Self::Memory(store) => store.add_views(id, delta).await,
            #[cfg(feature = "redis")]
            Self::Redis(store) => store.add_views(id, delta).await,
        }
    }
}

/// Connects the stores named by `config`.
pub async fn connect(config: &ServerConfig) -> anyhow::Result<(Counters, ViewStore)> {
    match config.redis_url.as_deref() {
        #[cfg(feature = "redis")]
        Some(url) => {
            use anyhow::Context;

            let conn = quill::connect_redis(url)
                .await
                .context("failed to connect to REDIS_URL")?;
            let redis = RedisCounterStore::new(conn.clone());
            let counters = if config.local_fallback {
                Counters::RedisWithFallback(FallbackCounterStore::new(
                    redis,
                    MemoryCounterStore::new(),
                ))
            } else {
                Counters::Redis(redis)
            };
            tracing::info!(fallback = config.local_fallback, "using redis stores");
            Ok((counters, ViewStore::Redis(RedisViewStore::new(conn))))
        }
        #[cfg(not(feature = "redis"))]
        Some(_) => anyhow::bail!("REDIS_URL requires the `redis` feature"),
        None => {
            tracing::info!("using in-process stores");
            Ok((
                Counters::Memory(MemoryCounterStore::new()),
                ViewStore::Memory(MemoryViewStore::new()),
            ))
        }
    }
}
