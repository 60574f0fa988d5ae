mod cache;
mod flusher;
#[cfg(feature = "redis")]
mod redis_sink;
mod sink;
#[cfg(test)]
mod tests;

pub use cache::*;
pub use flusher::*;
#[cfg(feature = "redis")]
pub use redis_sink::*;
pub use sink::*;
