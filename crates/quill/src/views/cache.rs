use std::{collections::HashMap, mem};

use parking_lot::Mutex;
use portable_atomic::{AtomicU64, Ordering};
use tracing::instrument;

use crate::ViewSink;

/// Outcome of one [`ViewCache::flush_all`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// `(id, delta)` pairs the sink committed.
    pub committed: Vec<(String, u64)>,
    /// `(id, delta)` pairs the sink rejected; these went back into the cache.
    pub requeued: Vec<(String, u64)>,
}

impl FlushReport {
    /// Total views committed by this flush.
    pub fn committed_views(&self) -> u64 {
        self.committed.iter().map(|(_, d)| d).sum()
    }

    /// Total views handed back to the cache by this flush.
    pub fn requeued_views(&self) -> u64 {
        self.requeued.iter().map(|(_, d)| d).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.committed.is_empty() && self.requeued.is_empty()
    }

    fn merge(&mut self, other: Self) {
        self.committed.extend(other.committed);
        self.requeued.extend(other.requeued);
    }
}

/// Lifetime counters of a [`ViewCache`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Views recorded since construction.
    pub recorded: u64,
    /// Views committed to a sink since construction.
    pub flushed: u64,
    /// Views re-queued after a failed sink write since construction.
    pub requeued: u64,
}

/// Write-coalescing cache for page-view increments.
///
/// Each [`record`](Self::record) bumps an in-memory delta for an id; nothing
/// touches storage on the request path. [`flush_all`](Self::flush_all) swaps
/// the whole pending map for an empty one in a single critical section and
/// writes the swapped-out deltas to a [`ViewSink`] outside the lock, so slow
/// writes never block recording.
///
/// Every recorded view lands in exactly one flush batch: either it was in
/// the map when it was swapped out, or it is in the fresh map for the next
/// flush. Swapped-out deltas stay visible through [`pending`](Self::pending)
/// until the sink commits them, so `persisted + pending(id)` never dips while
/// a write is in flight.
///
/// The cache is unbounded; it is drained by flushing, not by eviction.
#[derive(Debug, Default)]
pub struct ViewCache {
    maps: Mutex<Maps>,
    recorded: AtomicU64,
    flushed: AtomicU64,
    requeued: AtomicU64,
}

impl ViewCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one view for `id`.
    pub fn record(&self, id: &str) {
        self.record_many(id, 1);
    }

    /// Records `n` views for `id` at once. `n == 0` is a no-op.
    pub fn record_many(&self, id: &str, n: u64) {
        if n == 0 {
            return;
        }
        self.add_pending(id, n);
        self.recorded.fetch_add(n, Ordering::Relaxed);
    }

    /// Views recorded for `id` and not yet committed by a flush.
    pub fn pending(&self, id: &str) -> u64 {
        let maps = self.maps.lock();
        let live = maps.live.get(id).copied().unwrap_or(0);
        let in_flight = maps.in_flight.get(id).copied().unwrap_or(0);
        live.saturating_add(in_flight)
    }

    /// The current view count for `id` given its `persisted` count.
    pub fn total(&self, id: &str, persisted: u64) -> u64 {
        persisted.saturating_add(self.pending(id))
    }

    /// Number of ids with views waiting for the next flush.
    pub fn len(&self) -> usize {
        self.maps.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.lock().live.is_empty()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            recorded: self.recorded.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
        }
    }

    /// Drains all pending deltas into `sink`.
    ///
    /// Deltas the sink rejects are added back into the live cache (merging
    /// with anything recorded meanwhile) and logged; the remaining ids in the
    /// batch are still written. This never fails as a whole.
    #[instrument(level = "debug", skip_all, fields(batch = tracing::field::Empty))]
    pub async fn flush_all<V>(&self, sink: &V) -> FlushReport
    where
        V: ViewSink + ?Sized,
    {
        let batch = self.maps.lock().swap_out();
        tracing::Span::current().record("batch", batch.len());

        let mut report = FlushReport::default();
        for (id, delta) in batch {
            match sink.add_views(&id, delta).await {
                Ok(()) => {
                    self.maps.lock().settle(&id, delta);
                    self.flushed.fetch_add(delta, Ordering::Relaxed);
                    report.committed.push((id, delta));
                }
                Err(err) => {
                    tracing::warn!(%id, delta, error = %err, "view flush failed, re-queued");
                    {
                        let mut maps = self.maps.lock();
                        maps.settle(&id, delta);
                        add(&mut maps.live, &id, delta);
                    }
                    self.requeued.fetch_add(delta, Ordering::Relaxed);
                    report.requeued.push((id, delta));
                }
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                committed = report.committed_views(),
                requeued = report.requeued_views(),
                "flushed page views"
            );
        }
        report
    }

    /// Flushes repeatedly until the cache is empty or a pass commits nothing.
    ///
    /// Used on shutdown to drain views recorded while the previous pass was
    /// writing. Stops early when every remaining delta is being rejected.
    pub async fn drain<V>(&self, sink: &V) -> FlushReport
    where
        V: ViewSink + ?Sized,
    {
        let mut total = FlushReport::default();
        loop {
            let report = self.flush_all(sink).await;
            let progressed = !report.committed.is_empty();
            total.merge(report);
            if !progressed || self.is_empty() {
                return total;
            }
        }
    }

    fn add_pending(&self, id: &str, n: u64) {
        add(&mut self.maps.lock().live, id, n);
    }
}

/// Deltas waiting for a flush (`live`) and deltas a flush is currently
/// writing (`in_flight`). Both sit under one lock so moving a delta between
/// them is atomic with respect to readers.
#[derive(Debug, Default)]
struct Maps {
    live: HashMap<String, u64>,
    in_flight: HashMap<String, u64>,
}

impl Maps {
    /// Empties `live` into the returned batch and marks it in flight.
    fn swap_out(&mut self) -> HashMap<String, u64> {
        let mut batch = mem::take(&mut self.live);
        batch.retain(|_, delta| *delta > 0);
        for (id, delta) in &batch {
            add(&mut self.in_flight, id, *delta);
        }
        batch
    }

    /// Removes a finished write from `in_flight`.
    fn settle(&mut self, id: &str, delta: u64) {
        if let Some(count) = self.in_flight.get_mut(id) {
            *count = count.saturating_sub(delta);
            if *count == 0 {
                self.in_flight.remove(id);
            }
        }
    }
}

fn add(map: &mut HashMap<String, u64>, id: &str, n: u64) {
    if let Some(count) = map.get_mut(id) {
        *count = count.saturating_add(n);
    } else {
        map.insert(id.to_owned(), n);
    }
}
