use std::{collections::HashMap, future::Future, sync::Arc};

use parking_lot::Mutex;

use crate::error::SinkError;

/// Durable destination for aggregated page views.
///
/// Only [`ViewCache::flush_all`] calls this. A failure for one id must not
/// affect other ids; the cache re-queues the failed delta.
///
/// [`ViewCache::flush_all`]: crate::ViewCache::flush_all
pub trait ViewSink: Send + Sync {
    /// Adds `delta` views to the persisted count for `id`.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the write did not commit.
    fn add_views(&self, id: &str, delta: u64) -> impl Future<Output = Result<(), SinkError>> + Send;
}

impl<V: ViewSink + ?Sized> ViewSink for Arc<V> {
    fn add_views(&self, id: &str, delta: u64) -> impl Future<Output = Result<(), SinkError>> + Send {
        (**self).add_views(id, delta)
    }
}

/// In-process [`ViewSink`] that keeps persisted counts in a map.
///
/// Stands in for the database in single-instance deployments and tests.
/// Clones share the same counts.
#[derive(Clone, Debug, Default)]
pub struct MemoryViewStore {
    views: Arc<Mutex<HashMap<String, u64>>>,
}

impl MemoryViewStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisted views for `id`, `0` if never written.
    pub fn views(&self, id: &str) -> u64 {
        self.views.lock().get(id).copied().unwrap_or(0)
    }

    /// Sets the persisted count, e.g. when seeding from a database.
    pub fn set_views(&self, id: impl Into<String>, views: u64) {
        self.views.lock().insert(id.into(), views);
    }

    pub fn len(&self) -> usize {
        self.views.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.lock().is_empty()
    }
}

impl ViewSink for MemoryViewStore {
    async fn add_views(&self, id: &str, delta: u64) -> Result<(), SinkError> {
        let mut views = self.views.lock();
        let count = views.entry(id.to_owned()).or_default();
        *count = count.saturating_add(delta);
        Ok(())
    }
}
