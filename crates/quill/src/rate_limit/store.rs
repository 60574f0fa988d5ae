use std::{future::Future, sync::Arc, time::Duration};

use tracing::instrument;

use crate::error::StoreError;

/// Atomic, TTL-bounded counters keyed by string.
///
/// `increment` adds one to the counter for `key` and returns the new value.
/// The first increment of a window starts a TTL of `window`; once it lapses
/// the counter reads as absent and the next increment returns `1`. The
/// increment and the read must be a single atomic step from the store's point
/// of view, never a read followed by a separate write.
///
/// Implementations may suspend (e.g. a network round trip); callers hold no
/// locks across the call.
pub trait CounterStore: Send + Sync {
    /// Increments the counter for `key`, starting a `window` TTL if the
    /// counter is new, and returns the post-increment count.
    ///
    /// # Errors
    ///
    /// Returns a [`StoreError`] if the store is unreachable or answers with
    /// something that is not a count.
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send;
}

impl<S: CounterStore + ?Sized> CounterStore for Arc<S> {
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<u64, StoreError>> + Send {
        (**self).increment(key, window)
    }
}

/// A store that degrades to a local store when the primary fails.
///
/// Wrapping a networked store in this type is the explicit "degrade, don't
/// fail open" deployment choice: each failed primary call is logged and
/// counted against `fallback` instead, so limits keep applying per process
/// while the primary is down. Use the bare primary store to surface
/// [`StoreError`] to callers instead.
#[derive(Clone, Debug)]
pub struct FallbackCounterStore<P, F> {
    primary: P,
    fallback: F,
}

impl<P, F> FallbackCounterStore<P, F>
where
    P: CounterStore,
    F: CounterStore,
{
    pub const fn new(primary: P, fallback: F) -> Self {
        Self { primary, fallback }
    }

    pub const fn primary(&self) -> &P {
        &self.primary
    }

    pub const fn fallback(&self) -> &F {
        &self.fallback
    }
}

impl<P, F> CounterStore for FallbackCounterStore<P, F>
where
    P: CounterStore,
    F: CounterStore,
{
    #[instrument(level = "trace", skip(self))]
    async fn increment(&self, key: &str, window: Duration) -> Result<u64, StoreError> {
        match self.primary.increment(key, window).await {
            Ok(count) => Ok(count),
            Err(err) => {
                tracing::warn!(key, error = %err, "primary counter store failed, using local fallback");
                self.fallback.increment(key, window).await
            }
        }
    }
}
