mod limiter;
mod memory;
#[cfg(feature = "redis")]
mod redis_store;
mod store;

pub use limiter::*;
pub use memory::*;
#[cfg(feature = "redis")]
pub use redis_store::*;
pub use store::*;
