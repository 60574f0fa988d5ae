use std::{sync::Arc, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_util::sync::CancellationToken;

use crate::{FlushReport, ViewCache, ViewSink};

/// Shortest period the flush loop runs at.
const MIN_PERIOD: Duration = Duration::from_millis(1);

/// Background task that flushes a [`ViewCache`] on a fixed interval.
///
/// When the cancellation token fires, the task finishes any flush in
/// progress, drains the cache one last time and exits, so a graceful
/// shutdown loses no recorded views unless the sink itself is failing.
#[derive(Debug)]
pub struct ViewFlusher {
    cancel: CancellationToken,
    handle: JoinHandle<FlushReport>,
}

impl ViewFlusher {
    /// Spawns the flush loop on the current tokio runtime.
    ///
    /// The first periodic flush runs one `every` after spawning; a zero
    /// `every` is raised to one millisecond. `cancel` may be a child of a
    /// process-wide shutdown token.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    pub fn spawn<V>(
        cache: Arc<ViewCache>,
        sink: V,
        every: Duration,
        cancel: CancellationToken,
    ) -> Self
    where
        V: ViewSink + 'static,
    {
        // `interval_at` panics on a zero period, which would skip the final
        // drain.
        let every = every.max(MIN_PERIOD);
        let token = cancel.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + every, every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!(?every, "view flusher started");

            loop {
                tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.flush_all(&sink).await;
                    }
                }
            }

            let report = cache.drain(&sink).await;
            tracing::info!(
                committed = report.committed_views(),
                requeued = report.requeued_views(),
                left = cache.len(),
                "view flusher stopped after final flush"
            );
            report
        });

        Self { cancel, handle }
    }

    /// Token that stops the loop when cancelled.
    pub const fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the loop and waits for the final flush.
    ///
    /// Returns the report of the final drain. If the task panicked the panic
    /// is logged and an empty report is returned.
    pub async fn shutdown(self) -> FlushReport {
        self.cancel.cancel();
        match self.handle.await {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(error = %err, "view flusher task failed");
                FlushReport::default()
            }
        }
    }
}
