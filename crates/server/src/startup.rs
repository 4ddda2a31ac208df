//! Server startup: shared state construction, background loops, serving.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use netpulse_alerts::{AlertCorrelator, AlertStore};
use netpulse_core::Config;
use netpulse_scheduler::{
    ConnectorRegistry, DriverRegistry, ExecutionTracker, FindingSink, PollDispatcher,
    ScheduledJobs, WorkerPool,
};

use crate::maintenance::{self, MaintenanceDriver};
use crate::router::build_router;
use crate::seed;
use crate::state::AppState;

/// Build `AppState` and start the worker pool. Must run inside a tokio runtime.
///
/// `drivers` carries the protocol drivers; the maintenance driver is added here.
pub fn build_app_state(config: Config, mut drivers: DriverRegistry) -> anyhow::Result<Arc<AppState>> {
    config.validate().context("invalid configuration")?;

    let registry = Arc::new(ConnectorRegistry::new(config.dispatch.clone()));
    if let Some(path) = &config.connectors.file {
        seed::apply_seed(&registry, path)?;
    }

    let tracker = Arc::new(ExecutionTracker::new(config.retention.execution_history_limit));
    let alerts = Arc::new(AlertStore::new());
    let correlator = Arc::new(AlertCorrelator::new(alerts.clone(), &config.alerts));

    let jobs = Arc::new(ScheduledJobs::new());
    for (spec, cron) in maintenance::builtin_jobs() {
        jobs.register(spec, cron, true)?;
    }
    drivers.register(
        maintenance::DRIVER,
        Arc::new(MaintenanceDriver::new(alerts.clone(), tracker.clone())),
    );
    info!(drivers = ?drivers.kinds(), "Drivers registered");

    let shutdown = CancellationToken::new();
    let sink: Arc<dyn FindingSink> = correlator.clone();
    let pool = Arc::new(WorkerPool::start(
        config.workers.clone(),
        tracker.clone(),
        registry.clone(),
        Arc::new(drivers),
        sink,
        shutdown.child_token(),
    ));
    let dispatcher = Arc::new(PollDispatcher::new(registry.clone(), jobs.clone(), pool.clone()));

    Ok(Arc::new(AppState {
        config,
        registry,
        jobs,
        tracker,
        pool,
        dispatcher,
        alerts,
        correlator,
        started_at: Utc::now(),
        shutdown,
    }))
}

/// Spawn the dispatch loop. It stops when `state.shutdown` is cancelled.
pub fn spawn_background(state: &Arc<AppState>) -> JoinHandle<()> {
    let dispatcher = state.dispatcher.clone();
    let shutdown = state.shutdown.clone();
    tokio::spawn(async move { dispatcher.run(shutdown).await })
}

/// Run the HTTP server until SIGINT/SIGTERM, then drain the pool.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    config.log_summary();
    let addr = format!("{}:{}", config.server.host, config.server.port);

    let state = build_app_state(config, DriverRegistry::new())?;
    let dispatch_loop = spawn_background(&state);

    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Listening on {}", addr);

    let shutdown = state.shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown_signal() => info!("Shutdown signal received"),
                _ = shutdown.cancelled() => {}
            }
            shutdown.cancel();
        })
        .await?;

    state.shutdown.cancel();
    let grace = state.config.workers.cancel_grace() + Duration::from_secs(1);
    state.pool.shutdown(grace).await;
    if tokio::time::timeout(grace, dispatch_loop).await.is_err() {
        warn!("Dispatch loop did not stop in time");
    }
    info!("netpulse stopped");
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable, waiting for Ctrl+C only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
