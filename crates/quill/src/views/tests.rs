use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    thread::scope,
    time::Duration,
};

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::{CacheStats, MemoryViewStore, SinkError, ViewCache, ViewFlusher, ViewSink};

/// Records every call; fails for ids listed in `failing`.
#[derive(Default)]
struct RecordingSink {
    calls: Mutex<Vec<(String, u64)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSink {
    fn fail(&self, id: &str) {
        self.failing.lock().insert(id.to_owned());
    }

    fn heal(&self, id: &str) {
        self.failing.lock().remove(id);
    }

    fn calls(&self) -> Vec<(String, u64)> {
        self.calls.lock().clone()
    }

    fn total_for(&self, id: &str) -> u64 {
        self.calls
            .lock()
            .iter()
            .filter(|(i, _)| i == id)
            .map(|(_, d)| d)
            .sum()
    }
}

impl ViewSink for RecordingSink {
    async fn add_views(&self, id: &str, delta: u64) -> Result<(), SinkError> {
        if self.failing.lock().contains(id) {
            return Err(SinkError::new(id, delta, "database is read-only"));
        }
        self.calls.lock().push((id.to_owned(), delta));
        Ok(())
    }
}

/// Blocks every write until released, to observe state mid-flush.
struct GatedSink {
    entered: Notify,
    release: Notify,
    inner: MemoryViewStore,
}

impl ViewSink for GatedSink {
    async fn add_views(&self, id: &str, delta: u64) -> Result<(), SinkError> {
        self.entered.notify_one();
        self.release.notified().await;
        self.inner.add_views(id, delta).await
    }
}

#[test]
fn record_accumulates_pending() {
    let cache = ViewCache::new();
    cache.record("post-1");
    cache.record("post-1");
    cache.record("post-1");
    assert_eq!(cache.pending("post-1"), 3);
    assert_eq!(cache.pending("post-2"), 0);
    assert_eq!(cache.total("post-1", 40), 43);
    assert_eq!(cache.len(), 1);
}

#[tokio::test]
async fn flush_commits_one_write_per_id_and_resets_pending() {
    let cache = ViewCache::new();
    let sink = RecordingSink::default();
    for _ in 0..3 {
        cache.record("post-1");
    }
    cache.record_many("post-2", 5);

    let report = cache.flush_all(&sink).await;

    assert_eq!(cache.pending("post-1"), 0);
    assert!(cache.is_empty());
    assert_eq!(report.committed_views(), 8);
    assert!(report.requeued.is_empty());
    let calls: HashMap<_, _> = sink.calls().into_iter().collect();
    assert_eq!(sink.calls().len(), 2);
    assert_eq!(calls["post-1"], 3);
    assert_eq!(calls["post-2"], 5);

    // Nothing pending: nothing written.
    assert!(cache.flush_all(&sink).await.is_empty());
    assert_eq!(sink.calls().len(), 2);
}

#[tokio::test]
async fn failed_ids_are_requeued_without_blocking_others() {
    let cache = ViewCache::new();
    let sink = RecordingSink::default();
    sink.fail("broken");
    cache.record_many("broken", 4);
    cache.record_many("fine", 2);

    let report = cache.flush_all(&sink).await;
    assert_eq!(report.committed, vec![("fine".to_owned(), 2)]);
    assert_eq!(report.requeued, vec![("broken".to_owned(), 4)]);
    assert_eq!(cache.pending("broken"), 4);
    assert_eq!(cache.pending("fine"), 0);

    // Views recorded after the failure merge with the re-queued delta.
    cache.record("broken");
    sink.heal("broken");
    let report = cache.flush_all(&sink).await;
    assert_eq!(report.committed, vec![("broken".to_owned(), 5)]);
    assert_eq!(sink.total_for("broken"), 5);
    assert_eq!(cache.pending("broken"), 0);
    assert_eq!(
        cache.stats(),
        CacheStats {
            recorded: 7,
            flushed: 7,
            requeued: 4,
        }
    );
}

#[tokio::test]
async fn in_flight_deltas_stay_visible_until_committed() {
    let cache = Arc::new(ViewCache::new());
    let sink = Arc::new(GatedSink {
        entered: Notify::new(),
        release: Notify::new(),
        inner: MemoryViewStore::new(),
    });
    cache.record_many("post", 3);

    let flush = {
        let cache = Arc::clone(&cache);
        let sink = Arc::clone(&sink);
        tokio::spawn(async move { cache.flush_all(&*sink).await })
    };

    sink.entered.notified().await;
    // Swapped out but not committed: still counted, and new views land in
    // the next batch.
    assert_eq!(cache.pending("post"), 3);
    assert_eq!(sink.inner.views("post"), 0);
    cache.record("post");
    assert_eq!(cache.pending("post"), 4);
    assert_eq!(cache.len(), 1);

    sink.release.notify_one();
    let report = flush.await.unwrap();
    assert_eq!(report.committed_views(), 3);
    assert_eq!(sink.inner.views("post"), 3);
    assert_eq!(cache.pending("post"), 1);
    assert_eq!(cache.total("post", sink.inner.views("post")), 4);
}

#[test]
fn concurrent_records_are_not_lost() {
    let cache = ViewCache::new();
    scope(|s| {
        for _ in 0..10 {
            s.spawn(|| {
                for _ in 0..100 {
                    cache.record("hot");
                }
            });
        }
    });
    assert_eq!(cache.pending("hot"), 1000);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_flushes_commit_every_view_exactly_once() {
    let cache = Arc::new(ViewCache::new());
    let sink = Arc::new(RecordingSink::default());

    let writers: Vec<_> = (0..10)
        .map(|_| {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move {
                for i in 0..100 {
                    cache.record("hot");
                    if i % 10 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
            })
        })
        .collect();

    let flusher = {
        let cache = Arc::clone(&cache);
        let sink = Arc::clone(&sink);
        tokio::spawn(async move {
            for _ in 0..20 {
                cache.flush_all(&*sink).await;
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    flusher.await.unwrap();
    cache.flush_all(&*sink).await;

    assert_eq!(sink.total_for("hot"), 1000);
    assert_eq!(cache.pending("hot"), 0);
    assert_eq!(cache.stats().flushed, 1000);
}

#[tokio::test]
async fn drain_stops_when_sink_keeps_failing() {
    let cache = ViewCache::new();
    let sink = RecordingSink::default();
    sink.fail("stuck");
    cache.record_many("stuck", 2);
    cache.record("ok");

    let report = cache.drain(&sink).await;
    assert_eq!(report.committed_views(), 1);
    assert_eq!(report.requeued_views(), 2);
    assert_eq!(cache.pending("stuck"), 2);
}

#[tokio::test(start_paused = true)]
async fn flusher_flushes_periodically_and_on_shutdown() {
    let cache = Arc::new(ViewCache::new());
    let store = MemoryViewStore::new();
    let flusher = ViewFlusher::spawn(
        Arc::clone(&cache),
        store.clone(),
        Duration::from_secs(5),
        CancellationToken::new(),
    );

    cache.record_many("post", 2);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(store.views("post"), 2);
    assert_eq!(cache.pending("post"), 0);

    cache.record("post");
    cache.record("other");
    let report = flusher.shutdown().await;
    assert_eq!(report.committed_views(), 2);
    assert_eq!(store.views("post"), 3);
    assert_eq!(store.views("other"), 1);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn flusher_stops_when_parent_token_is_cancelled() {
    let cache = Arc::new(ViewCache::new());
    let store = MemoryViewStore::new();
    let shutdown = CancellationToken::new();
    let flusher = ViewFlusher::spawn(
        Arc::clone(&cache),
        store.clone(),
        Duration::from_secs(60),
        shutdown.child_token(),
    );

    cache.record("post");
    shutdown.cancel();
    while !flusher.is_finished() {
        tokio::task::yield_now().await;
    }
    assert_eq!(store.views("post"), 1);
    assert_eq!(flusher.shutdown().await.committed_views(), 1);
}

#[tokio::test(start_paused = true)]
async fn zero_interval_flusher_still_flushes_on_shutdown() {
    let cache = Arc::new(ViewCache::new());
    let store = MemoryViewStore::new();
    let flusher = ViewFlusher::spawn(
        Arc::clone(&cache),
        store.clone(),
        Duration::ZERO,
        CancellationToken::new(),
    );

    cache.record("post");
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(!flusher.is_finished());
    cache.record("post");

    flusher.shutdown().await;
    assert_eq!(store.views("post"), 2);
    assert!(cache.is_empty());
}
