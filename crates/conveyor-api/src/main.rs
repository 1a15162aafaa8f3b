//! Conveyor API Server

use anyhow::Context;
use clap::Parser;
use conveyor_api::services::{GitHubClient, NotificationDispatcher};
use conveyor_api::{AppState, routes};
use conveyor_config::load_config;
use conveyor_executor::LocalProcessExecutor;
use conveyor_scheduler::{BuildLog, JobQueue, JsonLinesStore, Reconciler, Worker};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "conveyor-server")]
#[command(about = "Conveyor CI/CD server", long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(long, env = "CONVEYOR_CONFIG", default_value = "conveyor.kdl")]
    config: PathBuf,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,

    /// Emit logs as JSON
    #[arg(long, env = "CONVEYOR_JSON_LOGS")]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.json_logs {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = load_config(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    info!(
        path = %cli.config.display(),
        repos = config.repos.len(),
        "Configuration loaded"
    );
    if cli.check {
        return Ok(());
    }
    let config = Arc::new(config);

    let build_log = match &config.build_log {
        Some(path) => BuildLog::open(Arc::new(JsonLinesStore::new(path))).await?,
        None => BuildLog::in_memory(),
    };

    // Build worker
    let (queue, receiver) = JobQueue::bounded(config.queue_capacity);
    let (notifier, notify_handle) = NotificationDispatcher::from_config(&config.notify).spawn();
    let worker = Worker::new(
        config.clone(),
        Arc::new(LocalProcessExecutor),
        Arc::new(notifier),
        build_log.clone(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker_handle = tokio::spawn(worker.run(receiver, shutdown_rx));

    let reconciler = Arc::new(Reconciler::new(
        config.clone(),
        build_log.clone(),
        Arc::new(GitHubClient::new()),
    ));

    let state = AppState::new(config.clone(), queue, build_log, reconciler.clone());
    let app = routes::router(state).layer(TraceLayer::new_for_http());

    // Start server
    let addr: SocketAddr = config.server.listen.parse()?;
    info!("Starting server on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    shutdown_tx.send_replace(true);
    reconciler.shutdown().await;
    worker_handle.await?;
    // Remaining notifications drain once the worker drops its notifier
    notify_handle.await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
