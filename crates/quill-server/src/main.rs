#![doc = include_str!("../README.md")]

mod server;

use std::net::SocketAddr;

use clap::Parser;
use quill::Quill;
use server::backend;
use server::config::{CliArgs, ServerConfig};
use server::routes::{AppState, router};
use server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    init_telemetry()?;

    let background = CancellationToken::new();
    let (counters, views) = backend::connect(&config).await?;
    let sweeper = counters.spawn_sweeper(background.child_token());
    let quill = Quill::init(config.quill.clone(), counters, views)?;
    let state = AppState::new(
        quill,
        config.policies.clone(),
        config.fail_open,
        config.trust_proxy,
    );

    let listener = TcpListener::bind(&config.server_addr).await?;
    log_startup_info(&config);

    axum::serve(
        listener,
        router(state.clone()).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Connections are drained; the router and its state clones are gone, so
    // the final view flush sees every recorded view.
    match state.into_quill() {
        Ok(quill) => {
            let report = quill.shutdown().await;
            tracing::info!(
                committed = report.committed_views(),
                requeued = report.requeued_views(),
                "final page-view flush done"
            );
        }
        Err(state) => {
            tracing::warn!("services still shared at shutdown, flushing in place");
            state.quill().flush_now().await;
        }
    }

    background.cancel();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }

    tracing::info!("Service shut down successfully");
    Ok(())
}

fn log_startup_info(config: &ServerConfig) {
    if cfg!(debug_assertions) {
        tracing::info!(
            "Starting quill-server on {} with full config: {:#?}",
            config.server_addr,
            config
        );
    } else {
        tracing::info!(
            "Starting quill-server on {} as worker {}",
            config.server_addr,
            config.quill.worker_id
        );
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Shutdown signal received, terminating gracefully...");
}
