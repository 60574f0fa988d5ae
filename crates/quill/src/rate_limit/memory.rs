use std::{collections::HashMap, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;

use crate::{CounterStore, error::StoreError};

#[derive(Clone, Copy, Debug)]
struct Window {
    count: u64,
    expires_at: Instant,
}

impl Window {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// In-process [`CounterStore`] for single-instance deployments.
///
/// Counters live in a map guarded by one mutex; the increment and the expiry
/// check happen under the same lock, so they are atomic with respect to
/// concurrent callers. Expired windows are replaced lazily on the next
/// increment and dropped in bulk by [`Self::purge_expired`].
///
/// Time is read from [`tokio::time::Instant`], so paused-clock tests can step
/// through windows deterministically.
///
/// Clones share the same counters.
#[derive(Clone, Debug, Default)]
pub struct MemoryCounterStore {
    windows: Arc<Mutex<HashMap<String, Window>>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of counters held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.windows.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.lock().is_empty()
    }

    /// Current count for `key`, or `None` if absent or expired.
    pub fn get(&self, key: &str) -> Option<u64> {
        let now = Instant::now();
        self.windows
            .lock()
            .get(key)
            .filter(|w| !w.is_expired(now))
            .map(|w| w.count)
    }

    /// Time left before the window for `key` resets.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.windows
            .lock()
            .get(key)
            .filter(|w| !w.is_expired(now))
            .map(|w| w.expires_at - now)
    }

    /// Drops every expired counter and returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let before = windows.len();
        windows.retain(|_, w| !w.is_expired(now));
        before - windows.len()
    }

    /// Spawns a task that calls [`Self::purge_expired`] every `every` until
    /// `cancel` fires. Keeps memory bounded by the number of live windows.
    pub fn spawn_sweeper(&self, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let purged = store.purge_expired();
                        if purged > 0 {
                            tracing::debug!(purged, "purged expired rate-limit windows");
                        }
                    }
                }
            }
        })
    }

    fn increment_now(&self, key: &str, window: Duration) -> u64 {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let entry = windows.entry(key.to_owned()).or_insert(Window {
            count: 0,
            expires_at: now + window,
        });
        if entry.is_expired(now) {
            *entry = Window {
                count: 0,
                expires_at: now + window,
            };
        }
        entry.count = entry.count.saturating_add(1);
        entry.count
    }
}

impl CounterStore for MemoryCounterStore {
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        Ok(self.increment_now(key, window))
    }
}
