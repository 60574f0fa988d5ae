mod snowflake;
mod status;

pub use snowflake::*;
pub use status::*;
