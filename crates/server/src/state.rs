use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use netpulse_alerts::{AlertCorrelator, AlertStore};
use netpulse_core::Config;
use netpulse_scheduler::{ConnectorRegistry, ExecutionTracker, PollDispatcher, ScheduledJobs, WorkerPool};

/// Everything the HTTP handlers and background loops share.
pub struct AppState {
    pub config: Config,
    pub registry: Arc<ConnectorRegistry>,
    pub jobs: Arc<ScheduledJobs>,
    pub tracker: Arc<ExecutionTracker>,
    pub pool: Arc<WorkerPool>,
    pub dispatcher: Arc<PollDispatcher>,
    pub alerts: Arc<AlertStore>,
    pub correlator: Arc<AlertCorrelator>,
    pub started_at: DateTime<Utc>,
    /// Cancelled on SIGINT/SIGTERM; stops the dispatch loop and the pool.
    pub shutdown: CancellationToken,
}
