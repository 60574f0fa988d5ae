use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{
    CUSTOM_EPOCH, CounterStore, FlushReport, RateLimiter, SnowflakeGenerator, SystemClock,
    ViewCache, ViewFlusher, ViewSink,
    error::{Error, Result},
};

/// Settings for [`Quill::init`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuillConfig {
    /// Worker id embedded in every generated ID (0..=1023). Must be unique
    /// per process across the deployment.
    pub worker_id: u64,
    /// Origin of the ID timestamp field, as a duration since the Unix epoch.
    pub epoch: Duration,
    /// How often pending page views are flushed to the sink.
    pub flush_interval: Duration,
}

impl Default for QuillConfig {
    fn default() -> Self {
        Self {
            worker_id: 0,
            epoch: CUSTOM_EPOCH,
            flush_interval: Duration::from_secs(10),
        }
    }
}

/// Process-wide owner of the three primitives.
///
/// Built once at startup and handed to request handlers (typically behind an
/// `Arc`), in place of module-level globals. [`Quill::shutdown`] must run
/// before the process exits so the final page-view flush happens.
pub struct Quill<S, V> {
    generator: SnowflakeGenerator<SystemClock>,
    limiter: RateLimiter<S>,
    views: Arc<ViewCache>,
    sink: Arc<V>,
    flusher: ViewFlusher,
}

impl<S, V> Quill<S, V>
where
    S: CounterStore,
    V: ViewSink + 'static,
{
    /// Validates `config`, builds the primitives and starts the periodic
    /// view flusher.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidWorkerId`] if the worker id is out of range.
    /// - [`Error::InvalidFlushInterval`] if `flush_interval` is zero.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn init(config: QuillConfig, store: S, sink: V) -> Result<Self> {
        Self::init_with_cancel(config, store, sink, CancellationToken::new())
    }

    /// Like [`Self::init`], but the flusher also stops (and flushes) when
    /// `shutdown` is cancelled.
    ///
    /// # Errors
    ///
    /// See [`Self::init`].
    pub fn init_with_cancel(
        config: QuillConfig,
        store: S,
        sink: V,
        shutdown: CancellationToken,
    ) -> Result<Self> {
        if config.flush_interval.is_zero() {
            return Err(Error::InvalidFlushInterval);
        }
        let generator =
            SnowflakeGenerator::new(config.worker_id, SystemClock::with_epoch(config.epoch))?;
        let views = Arc::new(ViewCache::new());
        let sink = Arc::new(sink);
        let flusher = ViewFlusher::spawn(
            Arc::clone(&views),
            Arc::clone(&sink),
            config.flush_interval,
            shutdown.child_token(),
        );

        tracing::info!(
            worker_id = config.worker_id,
            flush_interval = ?config.flush_interval,
            "quill services initialized"
        );

        Ok(Self {
            generator,
            limiter: RateLimiter::new(store),
            views,
            sink,
            flusher,
        })
    }

    pub const fn generator(&self) -> &SnowflakeGenerator<SystemClock> {
        &self.generator
    }

    pub const fn limiter(&self) -> &RateLimiter<S> {
        &self.limiter
    }

    pub fn views(&self) -> &ViewCache {
        &self.views
    }

    pub fn sink(&self) -> &V {
        &self.sink
    }

    /// Flushes pending views now, outside the periodic schedule.
    pub async fn flush_now(&self) -> FlushReport {
        self.views.flush_all(&*self.sink).await
    }

    /// Stops the flusher after one final flush and returns its report.
    pub async fn shutdown(self) -> FlushReport {
        let report = self.flusher.shutdown().await;
        tracing::info!(
            committed = report.committed_views(),
            left = self.views.len(),
            "quill services shut down"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MemoryCounterStore, MemoryViewStore};

    #[tokio::test]
    async fn init_rejects_bad_worker_id() {
        let config = QuillConfig {
            worker_id: 5000,
            ..QuillConfig::default()
        };
        let res = Quill::init(config, MemoryCounterStore::new(), MemoryViewStore::new());
        assert!(matches!(res, Err(Error::InvalidWorkerId { worker_id: 5000, .. })));
    }

    #[tokio::test]
    async fn init_rejects_zero_flush_interval() {
        let config = QuillConfig {
            flush_interval: Duration::ZERO,
            ..QuillConfig::default()
        };
        let res = Quill::init(config, MemoryCounterStore::new(), MemoryViewStore::new());
        assert!(matches!(res, Err(Error::InvalidFlushInterval)));
    }

    #[tokio::test]
    async fn wires_primitives_and_flushes_on_shutdown() {
        let store = MemoryViewStore::new();
        let config = QuillConfig {
            worker_id: 12,
            flush_interval: Duration::from_secs(3600),
            ..QuillConfig::default()
        };
        let quill = Quill::init(config, MemoryCounterStore::new(), store.clone()).unwrap();

        let id = quill.generator().next_id().unwrap();
        assert_eq!(id.worker_id(), 12);

        let usage = quill
            .limiter()
            .rate_limit("1.2.3.4", "/api/tags", Duration::from_secs(60), 5)
            .await
            .unwrap();
        assert_eq!(usage.remaining, 4);

        quill.views().record("post-9");
        quill.views().record("post-9");
        assert_eq!(quill.views().total("post-9", store.views("post-9")), 2);

        let report = quill.shutdown().await;
        assert_eq!(report.committed, vec![("post-9".to_owned(), 2)]);
        assert_eq!(store.views("post-9"), 2);
    }

    #[tokio::test]
    async fn flush_now_writes_immediately() {
        let store = MemoryViewStore::new();
        let quill = Quill::init(
            QuillConfig::default(),
            MemoryCounterStore::new(),
            store.clone(),
        )
        .unwrap();
        quill.views().record("a");
        assert_eq!(quill.flush_now().await.committed_views(), 1);
        assert_eq!(store.views("a"), 1);
        assert!(quill.shutdown().await.is_empty());
    }
}
