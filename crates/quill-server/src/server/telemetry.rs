//! Console logging for the server.
//!
//! Events from the `quill` library (flush failures, store fallbacks, rejected
//! requests) and from the HTTP layer are written through one
//! `tracing_subscriber::fmt` layer. The level defaults to `info` and can be
//! overridden per target with `RUST_LOG`, e.g.
//!
//! ```bash
//! RUST_LOG=info,quill=debug,tower_http=debug quill-server
//! ```

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_telemetry() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_thread_ids(true)
                .with_line_number(true)
                .with_target(false)
                .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
                .with_file(true),
        )
        .try_init()?;
    Ok(())
}
