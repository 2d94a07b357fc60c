//! Runwatch sentinel service.
//!
//! Usage:
//!     runwatch-sentinel --bind 127.0.0.1:8080 --store-url sqlite:/var/lib/runwatch/jobs.sqlite

use anyhow::Context;
use clap::Parser;
use runwatch_logging::{default_logs_dir, init_logging, LogConfig};
use runwatch_protocol::defaults;
use runwatch_sentinel::{
    AppState, HttpQueryService, LocalTaskQueue, MemoryCache, QueryService, Reconciler,
    ReservationSync, ScheduledTask, SentinelArgs, SentinelConfig, Task, TaskQueue, TaskRunner,
};
use runwatch_store::StateStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = SentinelArgs::parse();
    let config = SentinelConfig::from_args(args).context("Invalid configuration")?;

    let log_dir = config.log_dir.clone().unwrap_or_else(default_logs_dir);
    let _log_guard = init_logging(LogConfig {
        app_name: "runwatch-sentinel",
        verbose: config.verbose,
        log_dir: Some(log_dir.as_path()),
    })?;

    info!("Starting Runwatch sentinel");
    info!("  Bind: {}", config.bind);
    info!("  Store: {}", config.store_url);
    info!("  Query API: {}", config.query_api_base);

    let store = StateStore::open(&config.store_url)
        .await
        .with_context(|| format!("Failed to open job store {}", config.store_url))?;

    let remote: Arc<dyn QueryService> = Arc::new(
        HttpQueryService::new(
            config.query_api_base.clone(),
            config.access_token.clone(),
            Duration::from_secs(defaults::REMOTE_TIMEOUT_SECS),
        )
        .context("Failed to build query service client")?,
    );

    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        Arc::clone(&remote),
        Arc::new(MemoryCache::new()),
        config.reconciler(),
    ));

    let reservations = match &config.reservation_project {
        Some(project) => Some(ReservationSync::new(
            Arc::clone(&remote),
            store.clone(),
            project.clone(),
            config.reservation_query.clone(),
        )),
        None => {
            warn!("No reservation project configured, reservation sync disabled");
            None
        }
    };

    let (local_queue, rx) = LocalTaskQueue::new();
    let queue: Arc<dyn TaskQueue> = Arc::new(local_queue);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let runner = TaskRunner::new(
        Arc::clone(&reconciler),
        Arc::clone(&queue),
        config.sweep_interval(),
    );
    let runner_task = tokio::spawn(runner.run(rx, shutdown_rx));
    queue
        .enqueue_multi(vec![ScheduledTask::now(Task::FanOut)])
        .await
        .context("Failed to start sweep loop")?;

    let state = Arc::new(AppState {
        reconciler,
        queue,
        reservations,
        sweep_interval: config.sweep_interval(),
    });

    let listener = TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind))?;

    runwatch_sentinel::serve(listener, state, async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
        info!("Shutdown requested");
    })
    .await
    .context("HTTP server failed")?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = runner_task.await {
        warn!(error = %err, "Task runner exited abnormally");
    }
    info!("Runwatch sentinel stopped");
    Ok(())
}
