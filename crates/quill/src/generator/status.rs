use crate::SnowflakeId;

/// Outcome of a single, non-blocking attempt to generate an ID.
///
/// - [`IdGenStatus::Ready`] carries a freshly generated ID.
/// - [`IdGenStatus::Pending`] means the 12-bit sequence for the current
///   millisecond is exhausted; try again after `yield_for` milliseconds.
///
/// This lets callers pick their own backoff: spin, yield the thread, or sleep
/// on an async timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdGenStatus {
    /// A unique ID was generated and is ready to use.
    Ready {
        /// The generated ID.
        id: SnowflakeId,
    },
    /// No ID could be generated in the current millisecond.
    Pending {
        /// Milliseconds to wait before the clock can advance past the
        /// exhausted tick.
        yield_for: u64,
    },
}
