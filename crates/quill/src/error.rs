//! Error types shared by the Quill primitives.
//!
//! The central [`Error`] enum covers everything a caller of the generator or
//! the rate limiter can observe. Collaborator failures are modelled as their
//! own types: [`StoreError`] for counter stores and [`SinkError`] for view
//! sinks. Sink failures never escape [`ViewCache::flush_all`].
//!
//! [`ViewCache::flush_all`]: crate::ViewCache::flush_all

use core::time::Duration;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Boxed error used by collaborator implementations to carry their cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Unified error type for ID generation and rate limiting.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// The worker id does not fit in the 10-bit worker field.
    #[error("invalid worker id {worker_id} (max {max})")]
    InvalidWorkerId { worker_id: u64, max: u64 },

    /// The clock returned a timestamp earlier than the last one used.
    #[error("clock moved backward: now {now}ms < last {last}ms")]
    ClockMovedBackward { now: u64, last: u64 },

    /// The clock is past the last millisecond the 41-bit timestamp field can
    /// hold for the configured epoch.
    #[error("timestamp {now}ms exceeds the representable range (max {max}ms)")]
    TimestampOverflow { now: u64, max: u64 },

    /// The page-view flush interval is zero.
    #[error("flush interval must be greater than zero")]
    InvalidFlushInterval,

    /// The subject exhausted its allowance for the current window.
    #[error("rate limit of {limit} per {window:?} exceeded, retry after {retry_after:?}")]
    RateLimitExceeded {
        limit: u64,
        window: Duration,
        retry_after: Duration,
    },

    /// The counter store could not be reached or answered garbage.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Error {
    /// Returns `true` for the expected, user-visible "too many requests"
    /// outcome.
    pub const fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Suggested delay before retrying, when the error carries one.
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }
}

/// Failure reported by a [`CounterStore`].
///
/// [`CounterStore`]: crate::CounterStore
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(#[source] BoxError),

    #[error("counter store returned an invalid count: {0}")]
    InvalidResponse(String),
}

impl StoreError {
    pub fn unavailable(err: impl Into<BoxError>) -> Self {
        Self::Unavailable(err.into())
    }
}

/// Failure reported by a [`ViewSink`] for a single id.
///
/// [`ViewSink`]: crate::ViewSink
#[derive(Debug, thiserror::Error)]
#[error("failed to persist {delta} views for {id}: {source}")]
pub struct SinkError {
    pub id: String,
    pub delta: u64,
    #[source]
    pub source: BoxError,
}

impl SinkError {
    pub fn new(id: impl Into<String>, delta: u64, source: impl Into<BoxError>) -> Self {
        Self {
            id: id.into(),
            delta,
            source: source.into(),
        }
    }
}

/// Failure to parse a [`SnowflakeId`] from its string form.
///
/// [`SnowflakeId`]: crate::SnowflakeId
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ParseIdError {
    #[error("invalid snowflake id: {0}")]
    InvalidDigits(#[from] core::num::ParseIntError),

    #[error("snowflake id {0} has the reserved sign bit set")]
    SignBitSet(u64),
}
