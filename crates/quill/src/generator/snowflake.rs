use std::{cmp::Ordering, sync::Arc, time::Duration};

use parking_lot::Mutex;
use tracing::instrument;

use crate::{
    IdGenStatus, SnowflakeId,
    error::{Error, Result},
    time::{SystemClock, TimeSource},
};

/// A lock-based Snowflake ID generator for multi-threaded servers.
///
/// The `(last_timestamp, sequence)` pair lives in the last issued
/// [`SnowflakeId`] behind an [`Arc<Mutex<_>>`]. Clones share that state, so
/// handing clones to many tasks still behaves as one generator for one worker
/// ID. Construct exactly one generator per worker ID per process: two
/// independent generators with the same worker ID can issue duplicates.
///
/// ## Guarantees
/// - IDs from one generator are strictly increasing while the clock does not
///   move backward.
/// - A backward clock step is reported as [`Error::ClockMovedBackward`]
///   instead of risking a duplicate.
/// - At most 4096 IDs per millisecond; past that, callers wait for the next
///   millisecond.
///
/// # Example
/// ```
/// use quill::{SnowflakeGenerator, SystemClock};
///
/// let generator = SnowflakeGenerator::new(1, SystemClock::default()).unwrap();
/// let a = generator.next_id().unwrap();
/// let b = generator.next_id().unwrap();
/// assert!(a < b);
/// assert_eq!(a.worker_id(), 1);
/// ```
#[derive(Clone)]
pub struct SnowflakeGenerator<T = SystemClock>
where
    T: TimeSource,
{
    state: Arc<Mutex<SnowflakeId>>,
    worker_id: u64,
    time: T,
}

impl<T> SnowflakeGenerator<T>
where
    T: TimeSource,
{
    /// Creates a generator for `worker_id` reading time from `time`.
    ///
    /// The state starts at timestamp 0 with sequence 0, as if that ID had
    /// already been issued. Any later clock reading rolls over to sequence 0;
    /// a clock that reads exactly 0 (the epoch millisecond) continues at
    /// sequence 1 and has 4095 IDs left in that tick. IDs stay unique and
    /// increasing either way.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkerId`] if `worker_id` does not fit in the
    /// 10-bit worker field (0..=1023).
    pub fn new(worker_id: u64, time: T) -> Result<Self> {
        Self::from_components(0, worker_id, 0, time)
    }

    /// Creates a generator preloaded with explicit state.
    ///
    /// Useful for restoring the last issued timestamp and sequence after a
    /// restart so the new process never re-issues an older ID.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidWorkerId`] for an out-of-range worker ID.
    pub fn from_components(timestamp: u64, worker_id: u64, sequence: u64, time: T) -> Result<Self> {
        if worker_id > SnowflakeId::MAX_WORKER_ID {
            return Err(Error::InvalidWorkerId {
                worker_id,
                max: SnowflakeId::MAX_WORKER_ID,
            });
        }
        let id = SnowflakeId::from_components(timestamp, worker_id, sequence);
        Ok(Self {
            state: Arc::new(Mutex::new(id)),
            worker_id,
            time,
        })
    }

    pub const fn worker_id(&self) -> u64 {
        self.worker_id
    }

    /// Makes one non-blocking attempt to generate an ID.
    ///
    /// # Returns
    /// - `Ok(IdGenStatus::Ready { id })`: a new ID
    /// - `Ok(IdGenStatus::Pending { yield_for })`: the sequence for the current
    ///   millisecond is exhausted; state is left untouched
    ///
    /// # Errors
    /// - [`Error::ClockMovedBackward`] if the clock reads earlier than the last
    ///   issued timestamp
    /// - [`Error::TimestampOverflow`] if the clock is past the 41-bit range
    #[instrument(level = "trace", skip(self), fields(worker_id = self.worker_id))]
    pub fn try_poll_id(&self) -> Result<IdGenStatus> {
        let now = self.time.current_millis();
        if now > SnowflakeId::MAX_TIMESTAMP {
            return Err(Error::TimestampOverflow {
                now,
                max: SnowflakeId::MAX_TIMESTAMP,
            });
        }

        let mut id = self.state.lock();
        let last = id.timestamp();
        match now.cmp(&last) {
            Ordering::Equal => {
                if id.has_sequence_room() {
                    *id = id.increment_sequence();
                    Ok(IdGenStatus::Ready { id: *id })
                } else {
                    Ok(IdGenStatus::Pending { yield_for: 1 })
                }
            }
            Ordering::Greater => {
                *id = id.rollover_to_timestamp(now);
                Ok(IdGenStatus::Ready { id: *id })
            }
            Ordering::Less => Err(Self::cold_clock_behind(now, last)),
        }
    }

    #[cold]
    #[inline(never)]
    fn cold_clock_behind(now: u64, last: u64) -> Error {
        tracing::error!(now, last, "system clock moved backward, refusing to issue id");
        Error::ClockMovedBackward { now, last }
    }

    /// Generates the next ID, spinning while the current millisecond's
    /// sequence is exhausted.
    ///
    /// The lock is released between attempts; each retry re-reads the clock.
    /// The wait is bounded by the remainder of the current millisecond.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_poll_id`].
    pub fn next_id(&self) -> Result<SnowflakeId> {
        loop {
            match self.try_poll_id()? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { .. } => core::hint::spin_loop(),
            }
        }
    }

    /// Generates the next ID in its external decimal string form.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_poll_id`].
    pub fn generate_id(&self) -> Result<String> {
        self.next_id().map(String::from)
    }

    /// Async counterpart of [`Self::next_id`] that sleeps on the tokio timer
    /// instead of spinning when the sequence is exhausted.
    ///
    /// # Errors
    ///
    /// Same as [`Self::try_poll_id`].
    pub async fn next_id_async(&self) -> Result<SnowflakeId> {
        loop {
            match self.try_poll_id()? {
                IdGenStatus::Ready { id } => return Ok(id),
                IdGenStatus::Pending { yield_for } => {
                    tokio::time::sleep(Duration::from_millis(yield_for)).await;
                }
            }
        }
    }
}

impl<T> core::fmt::Debug for SnowflakeGenerator<T>
where
    T: TimeSource,
{
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SnowflakeGenerator")
            .field("worker_id", &self.worker_id)
            .field("last", &*self.state.lock())
            .finish_non_exhaustive()
    }
}
