//! qualrank - qualification ranking worker
//!
//! Runs the mutation-log worker for a bounded time (so it can be restarted
//! by a scheduler) and, unless disabled, the admin HTTP API next to it.

use anyhow::{Context, Result};
use clap::Parser;
use qualrank_common::config::{load_config, resolve_config_path};
use qualrank_common::db::init_database;
use qualrank_common::time;
use qualrank_engine::worker::compute_stop_at;
use qualrank_engine::{build_router, AppState, Worker, WorkerConfig};
use std::path::PathBuf;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "qualrank", version, about = "Qualification ranking worker")]
struct Args {
    /// Minutes to stay active (seconds with --quick)
    #[arg(value_parser = clap::value_parser!(u64).range(1..=1440))]
    duration: u64,

    /// Stop when this minute of the hour starts, if that comes first
    #[arg(long, value_parser = clap::value_parser!(u32).range(0..60))]
    stop_exactly: Option<u32>,

    /// Interpret duration as seconds
    #[arg(long)]
    quick: bool,

    /// Path to TOML config file
    #[arg(short, long, env = "QUALRANK_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database file (overrides config)
    #[arg(long, env = "QUALRANK_DATABASE")]
    database: Option<PathBuf>,

    /// Admin API port (overrides config)
    #[arg(short, long, env = "QUALRANK_PORT")]
    port: Option<u16>,

    /// Run the worker without the admin API
    #[arg(long)]
    no_api: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = load_config(config_path.as_deref()).context("Failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    // Build identification first, before any database delay
    info!(
        "Starting qualrank v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("QUALRANK_COMMIT"),
        env!("QUALRANK_BUILT_AT"),
        env!("QUALRANK_PROFILE")
    );
    match &config_path {
        Some(path) => info!("Configuration: {}", path.display()),
        None => info!("Configuration: built-in defaults"),
    }

    let stop_at = compute_stop_at(time::now(), args.duration, args.stop_exactly, args.quick);

    let db_path = args.database.clone().unwrap_or_else(|| config.database_path());
    info!("Database path: {}", db_path.display());
    let pool = init_database(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;

    let worker = Worker::new(pool.clone(), WorkerConfig::from(&config.worker));

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let server = if args.no_api {
        info!("Admin API disabled");
        None
    } else {
        let port = args.port.unwrap_or(config.port);
        let app = build_router(AppState::new(pool.clone(), worker.waker()));
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .with_context(|| format!("Failed to bind port {}", port))?;
        info!("qualrank API listening on http://127.0.0.1:{}", port);

        Some(tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
        }))
    };

    tokio::select! {
        _ = worker.run_until(stop_at) => {}
        result = tokio::signal::ctrl_c() => {
            match result {
                Ok(()) => warn!("Interrupted, stopping early"),
                Err(e) => {
                    error!("Cannot listen for interrupt: {}", e);
                    worker.run_until(stop_at).await;
                }
            }
        }
    }

    let _ = shutdown_tx.send(());
    if let Some(handle) = server {
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("API server error: {}", e),
            Err(e) => error!("API server task failed: {}", e),
        }
    }

    pool.close().await;
    info!("qualrank stopped");
    Ok(())
}
