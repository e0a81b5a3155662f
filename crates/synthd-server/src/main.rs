#![doc = include_str!("../README.md")]

mod server;

use std::net::SocketAddr;

use clap::Parser;
use server::abort::AbortStore;
use server::config::{CliArgs, ServerConfig};
use server::http::{AppState, router};
use server::telemetry::init_telemetry;
use tokio::net::TcpListener;
use tokio::signal;

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

    init_telemetry();

    let abort_store = match &config.abort_store_url {
        Some(url) => match AbortStore::connect(url, config.abort_store_prefix.clone()).await {
            Ok(store) => Some(store),
            Err(e) => {
                tracing::warn!(error = %e, "abort store unavailable, stop marks stay local");
                None
            }
        },
        None => None,
    };

    let addr = format!("{}:{}", config.host, config.port);
    let state = AppState::new(config, abort_store);
    tracing::info!(
        %addr,
        min_workers = state.config.min_threads,
        max_workers = state.config.max_threads,
        "starting record generation service"
    );

    let listener = TcpListener::bind(&addr).await?;
    let app = router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(state))
        .await?;

    tracing::info!("service shut down successfully");
    Ok(())
}

/// Waits for a termination signal, then tears the engine down in order:
/// cancel every active job, drain the executors (bounded wait), release the
/// store connection.
async fn shutdown_signal(state: AppState) {
    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    tokio::select! {
        () = ctrl_c => tracing::info!("received Ctrl+C signal"),
        () = terminate => tracing::info!("received SIGTERM signal"),
    }

    tracing::info!("shutdown signal received, terminating gracefully...");

    let cancelled = state.registry.cancel_all();
    if cancelled > 0 {
        tracing::info!(cancelled, "cancelled active jobs");
    }

    state.pool.shutdown().await;
    // The abort-store connection drops with the last AppState clone.
}
