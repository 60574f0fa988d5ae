//! Infrastructure primitives for the Quill CMS.
//!
//! - [`SnowflakeGenerator`]: coordination-free, monotonically increasing
//!   64-bit identifiers.
//! - [`RateLimiter`]: fixed-window request counting over a pluggable
//!   [`CounterStore`].
//! - [`ViewCache`]: absorbs page-view bursts in memory and flushes aggregated
//!   deltas to a [`ViewSink`].
//!
//! The three are independent of each other. [`Quill`] wires them together
//! with an explicit init/shutdown lifecycle for a host process.

mod context;
mod error;
mod generator;
mod id;
mod rate_limit;
mod time;
mod views;

pub use crate::context::*;
pub use crate::error::*;
pub use crate::generator::*;
pub use crate::id::*;
pub use crate::rate_limit::*;
pub use crate::time::*;
pub use crate::views::*;
