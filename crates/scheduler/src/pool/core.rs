use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use netpulse_core::config::WorkerPoolConfig;
use netpulse_core::{NetpulseError, Result};

use crate::driver::{DriverRegistry, FindingSink};
use crate::job::{Job, JobState, TaskSpec};
use crate::metrics::SchedulerMetrics;
use crate::rate_limit::RateLimiter;
use crate::registry::{ConnectorRegistry, PollOutcome};
use crate::tracker::ExecutionTracker;

use super::{QueueStatus, WorkerStatus};

/// Per-worker bookkeeping.
pub(super) struct WorkerSlot {
    pub(super) name: String,
    pub(super) running: AtomicUsize,
}

/// State shared by the pool handle, its workers and every running task.
pub(super) struct Shared {
    pub(super) config: WorkerPoolConfig,
    pub(super) tracker: Arc<ExecutionTracker>,
    pub(super) registry: Arc<ConnectorRegistry>,
    pub(super) drivers: Arc<DriverRegistry>,
    pub(super) sink: Arc<dyn FindingSink>,
    pub(super) limiter: RateLimiter,
    pub(super) metrics: RwLock<SchedulerMetrics>,
    /// Accepted tasks not yet started; bounded by `queue_bound`.
    pub(super) queued: AtomicUsize,
    /// Running tasks across all workers.
    pub(super) active: AtomicUsize,
    /// Cancellation tokens of queued and running tasks.
    pub(super) tokens: Mutex<HashMap<Uuid, CancellationToken>>,
    pub(super) shutdown: CancellationToken,
}

impl Shared {
    pub(super) fn token_for(&self, task_id: Uuid) -> CancellationToken {
        match self.tokens.lock() {
            Ok(tokens) => tokens
                .get(&task_id)
                .cloned()
                .unwrap_or_else(|| self.shutdown.child_token()),
            Err(_) => self.shutdown.child_token(),
        }
    }

    pub(super) fn forget_token(&self, task_id: Uuid) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(&task_id);
        }
    }

    pub(super) fn record_execution(&self, job: &Job, duration: Duration) {
        if let Ok(mut m) = self.metrics.write() {
            m.record_execution(&job.job_name, job.state, duration);
        }
    }
}

/// The worker pool. Workers are spawned on construction and run until
/// [`shutdown`](WorkerPool::shutdown).
pub struct WorkerPool {
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<TaskSpec>,
    workers: Vec<Arc<WorkerSlot>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Build the pool and spawn its workers on the current runtime.
    pub fn start(
        config: WorkerPoolConfig,
        tracker: Arc<ExecutionTracker>,
        registry: Arc<ConnectorRegistry>,
        drivers: Arc<DriverRegistry>,
        sink: Arc<dyn FindingSink>,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(tokio::sync::Mutex::new(rx));

        let shared = Arc::new(Shared {
            limiter: RateLimiter::new(config.rate_limit),
            config,
            tracker,
            registry,
            drivers,
            sink,
            metrics: RwLock::new(SchedulerMetrics::default()),
            queued: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            tokens: Mutex::new(HashMap::new()),
            shutdown,
        });

        let mut workers = Vec::with_capacity(shared.config.worker_count);
        let mut handles = Vec::with_capacity(shared.config.worker_count);
        for i in 0..shared.config.worker_count {
            let slot = Arc::new(WorkerSlot {
                name: format!("worker-{}", i),
                running: AtomicUsize::new(0),
            });
            handles.push(tokio::spawn(super::execution::worker_loop(
                shared.clone(),
                slot.clone(),
                rx.clone(),
            )));
            workers.push(slot);
        }

        info!(
            workers = shared.config.worker_count,
            concurrency = shared.config.worker_concurrency,
            rate_limit = shared.config.rate_limit,
            queue_bound = shared.config.queue_bound,
            "Worker pool started"
        );

        Self {
            shared,
            tx,
            workers,
            handles: Mutex::new(handles),
        }
    }

    pub fn tracker(&self) -> &Arc<ExecutionTracker> {
        &self.shared.tracker
    }

    pub fn capacity(&self) -> usize {
        self.shared.config.capacity()
    }

    /// Accept a task into the queue, or refuse with `Backpressure` when
    /// `queue_bound` tasks are already waiting.
    pub fn submit(&self, task: TaskSpec) -> Result<Job> {
        if self.shared.shutdown.is_cancelled() {
            return Err(NetpulseError::Internal("worker pool is shut down".into()));
        }

        let bound = self.shared.config.queue_bound;
        if let Err(queued) =
            self.shared
                .queued
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |q| (q < bound).then_some(q + 1))
        {
            if let Ok(mut m) = self.shared.metrics.write() {
                m.record_backpressure();
            }
            warn!(job = %task.job_name, queued, bound, "Queue full, task refused");
            return Err(NetpulseError::Backpressure { queued, bound });
        }

        let job = match self.shared.tracker.enqueue(&task) {
            Ok(job) => job,
            Err(e) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                return Err(e);
            }
        };

        let task_id = task.task_id;
        if let Ok(mut tokens) = self.shared.tokens.lock() {
            tokens.insert(task_id, self.shared.shutdown.child_token());
        }

        if self.tx.send(task).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            self.shared.forget_token(task_id);
            let _ = self.shared.tracker.finish(
                task_id,
                JobState::Failed,
                Some("worker pool is shut down".into()),
                None,
            );
            return Err(NetpulseError::Internal("worker pool is shut down".into()));
        }

        Ok(job)
    }

    /// Cancel a queued or running task.
    ///
    /// A queued task is cancelled on the spot. A running one has its token
    /// signalled; it turns `cancelled` once the driver acknowledges or the
    /// grace period runs out. The returned job reflects the state at return.
    pub fn cancel(&self, task_id: Uuid) -> Result<Job> {
        let job = self.shared.tracker.observe(task_id)?;
        if job.state.is_terminal() {
            return Err(NetpulseError::AlreadyTerminal(format!(
                "task {} is {}",
                task_id, job.state
            )));
        }

        self.shared.token_for(task_id).cancel();

        match self.shared.tracker.cancel_queued(task_id)? {
            Some(cancelled) => {
                // The worker that eventually dequeues it will skip it.
                if let Some(connector_id) = cancelled.connector_id.as_deref() {
                    if let Err(e) = self
                        .shared
                        .registry
                        .mark_poll_result(connector_id, PollOutcome::Cancelled)
                    {
                        warn!(connector_id, error = %e, "Failed to release poll claim");
                    }
                }
                self.shared.record_execution(&cancelled, Duration::ZERO);
                info!(task_id = %task_id, job = %cancelled.job_name, "Queued task cancelled");
                Ok(cancelled)
            }
            None => {
                info!(task_id = %task_id, job = %job.job_name, "Cancellation signalled");
                self.shared.tracker.observe(task_id)
            }
        }
    }

    pub fn status(&self, scheduled: usize) -> QueueStatus {
        QueueStatus {
            active: self.shared.active.load(Ordering::SeqCst),
            reserved: self.shared.queued.load(Ordering::SeqCst),
            scheduled,
            capacity: self.shared.config.capacity(),
            queue_bound: self.shared.config.queue_bound,
            rate_limit: (self.shared.config.rate_limit > 0).then_some(self.shared.config.rate_limit),
            workers: self
                .workers
                .iter()
                .map(|w| WorkerStatus {
                    name: w.name.clone(),
                    running: w.running.load(Ordering::SeqCst),
                    capacity: self.shared.config.worker_concurrency,
                })
                .collect(),
        }
    }

    /// Snapshot of the scheduler metrics.
    pub fn metrics(&self) -> SchedulerMetrics {
        let mut snapshot = self
            .shared
            .metrics
            .read()
            .map(|m| m.clone())
            .unwrap_or_default();
        let capacity = self.shared.config.capacity().max(1);
        snapshot.worker_utilization =
            self.shared.active.load(Ordering::SeqCst) as f64 / capacity as f64;
        snapshot
    }

    pub fn record_tick(&self, ok: bool) {
        if let Ok(mut m) = self.shared.metrics.write() {
            m.record_tick(ok);
        }
    }

    /// Cancel everything and wait (bounded) for workers to exit.
    pub async fn shutdown(&self, timeout: Duration) {
        info!("Worker pool shutdown requested");
        self.shared.shutdown.cancel();

        let handles: Vec<JoinHandle<()>> = match self.handles.lock() {
            Ok(mut h) => h.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        if tokio::time::timeout(timeout, futures::future::join_all(handles))
            .await
            .is_err()
        {
            warn!(?timeout, "Workers did not stop in time");
        }
        info!("Worker pool stopped");
    }
}
