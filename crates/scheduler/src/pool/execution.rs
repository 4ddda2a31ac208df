use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use netpulse_core::{NetpulseError, RawFinding};

use crate::driver::{Driver, DriverError, TaskContext};
use crate::job::{JobState, TaskPayload, TaskSpec};
use crate::registry::PollOutcome;
use crate::tracker::ProgressSink;

use super::core::{Shared, WorkerSlot};

enum TaskOutput {
    Findings(Vec<RawFinding>),
    Value(Value),
}

enum TaskOutcome {
    Completed(TaskOutput),
    Failed(String),
    TimedOut(Duration),
    Cancelled,
}

/// One worker: take a concurrency permit, then a task, then a rate token,
/// then hand the task to its own tokio task.
pub(super) async fn worker_loop(
    shared: Arc<Shared>,
    slot: Arc<WorkerSlot>,
    rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<TaskSpec>>>,
) {
    let permits = Arc::new(Semaphore::new(shared.config.worker_concurrency));
    debug!(worker = %slot.name, "Worker started");

    loop {
        let permit = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let task = tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            task = async { rx.lock().await.recv().await } => match task {
                Some(t) => t,
                None => break,
            },
        };

        tokio::select! {
            _ = shared.shutdown.cancelled() => break,
            _ = shared.limiter.acquire() => {}
        }

        let started = shared.tracker.start(task.task_id, &slot.name);
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        match started {
            Ok(_) => {}
            Err(NetpulseError::AlreadyTerminal(_)) => {
                debug!(task_id = %task.task_id, "Skipping task cancelled while queued");
                shared.forget_token(task.task_id);
                continue;
            }
            Err(e) => {
                error!(task_id = %task.task_id, error = %e, "Could not start task");
                shared.forget_token(task.task_id);
                continue;
            }
        }

        slot.running.fetch_add(1, Ordering::SeqCst);
        shared.active.fetch_add(1, Ordering::SeqCst);

        let shared = shared.clone();
        let slot = slot.clone();
        tokio::spawn(async move {
            execute(&shared, task).await;
            slot.running.fetch_sub(1, Ordering::SeqCst);
            shared.active.fetch_sub(1, Ordering::SeqCst);
            drop(permit);
        });
    }

    debug!(worker = %slot.name, "Worker stopped");
}

async fn invoke(
    driver: Arc<dyn Driver>,
    payload: &TaskPayload,
    ctx: &TaskContext,
) -> Result<TaskOutput, DriverError> {
    match payload {
        TaskPayload::Poll(connector) => driver.poll(connector, ctx).await.map(TaskOutput::Findings),
        TaskPayload::Job(spec) => driver.run(spec, ctx).await.map(TaskOutput::Value),
    }
}

/// Run the driver under the task timeout, honour cancellation with a grace
/// period, then report through the tracker (and registry/sink for polls).
async fn execute(shared: &Arc<Shared>, task: TaskSpec) {
    let task_id = task.task_id;
    let token = shared.token_for(task_id);
    let started = Instant::now();
    let timeout = task
        .timeout()
        .unwrap_or_else(|| shared.config.default_task_timeout());

    let outcome = match shared.drivers.resolve(task.driver_kind()) {
        None => TaskOutcome::Failed(format!(
            "no driver registered for '{}'",
            task.driver_kind()
        )),
        Some(driver) => {
            let ctx = TaskContext::new(
                task_id,
                token.clone(),
                ProgressSink::new(shared.tracker.clone(), task_id),
            );
            run_with_supervision(shared, driver, &task, &ctx, &token, timeout).await
        }
    };

    finalize(shared, &task, outcome, started.elapsed()).await;
    shared.forget_token(task_id);
}

async fn run_with_supervision(
    shared: &Arc<Shared>,
    driver: Arc<dyn Driver>,
    task: &TaskSpec,
    ctx: &TaskContext,
    token: &CancellationToken,
    timeout: Duration,
) -> TaskOutcome {
    let work = invoke(driver, &task.payload, ctx);
    tokio::pin!(work);

    let first = tokio::select! {
        res = tokio::time::timeout(timeout, &mut work) => Some(res),
        _ = token.cancelled() => None,
    };

    match first {
        Some(Ok(Ok(output))) => TaskOutcome::Completed(output),
        Some(Ok(Err(DriverError::Cancelled))) => TaskOutcome::Cancelled,
        Some(Ok(Err(e))) => TaskOutcome::Failed(e.to_string()),
        Some(Err(_)) => TaskOutcome::TimedOut(timeout),
        None => {
            let grace = shared.config.cancel_grace();
            match tokio::time::timeout(grace, &mut work).await {
                Ok(_) => debug!(task_id = %task.task_id, "Driver acknowledged cancellation"),
                Err(_) => warn!(
                    task_id = %task.task_id,
                    ?grace,
                    "Driver ignored cancellation, disowning invocation"
                ),
            }
            TaskOutcome::Cancelled
        }
    }
}

async fn finalize(shared: &Arc<Shared>, task: &TaskSpec, outcome: TaskOutcome, elapsed: Duration) {
    let task_id = task.task_id;
    let connector_id = task.connector_id();

    let (state, error, result, findings) = match outcome {
        TaskOutcome::Completed(TaskOutput::Findings(findings)) => (
            JobState::Succeeded,
            None,
            Some(json!({ "findings": findings.len() })),
            Some(findings),
        ),
        TaskOutcome::Completed(TaskOutput::Value(value)) => {
            (JobState::Succeeded, None, Some(value), None)
        }
        TaskOutcome::Failed(message) => (JobState::Failed, Some(message), None, None),
        TaskOutcome::TimedOut(after) => {
            let what = if connector_id.is_some() { "poll" } else { "job" };
            (
                JobState::Failed,
                Some(format!("{} timed out after {}s", what, after.as_secs())),
                None,
                None,
            )
        }
        TaskOutcome::Cancelled => (JobState::Cancelled, None, None, None),
    };

    let job = match shared.tracker.finish(task_id, state, error.clone(), result) {
        Ok(job) => job,
        Err(e) => {
            // Someone else already closed this task; its findings are stale.
            debug!(task_id = %task_id, error = %e, "Dropping outcome of closed task");
            if let Some(connector_id) = connector_id {
                if let Err(e) = shared
                    .registry
                    .mark_poll_result(connector_id, PollOutcome::Cancelled)
                {
                    warn!(connector_id, error = %e, "Failed to release poll claim");
                }
            }
            return;
        }
    };
    shared.record_execution(&job, elapsed);

    match state {
        JobState::Succeeded => info!(
            task_id = %task_id,
            job = %job.job_name,
            elapsed_ms = elapsed.as_millis() as u64,
            "Task succeeded"
        ),
        JobState::Failed => warn!(
            task_id = %task_id,
            job = %job.job_name,
            error = error.as_deref().unwrap_or_default(),
            "Task failed"
        ),
        _ => info!(task_id = %task_id, job = %job.job_name, "Task cancelled"),
    }

    let Some(connector_id) = connector_id else {
        return;
    };

    // Only findings from a task that reached `succeeded` are forwarded.
    let mut ingest_error = None;
    if let Some(findings) = findings {
        if !findings.is_empty() {
            match shared.sink.accept(connector_id, findings).await {
                Ok(outcome) => debug!(
                    connector_id,
                    created = outcome.created,
                    updated = outcome.updated,
                    resolved = outcome.resolved,
                    "Findings ingested"
                ),
                Err(e) => {
                    error!(connector_id, error = %e, "Findings ingest failed");
                    ingest_error = Some(format!("ingest failed: {}", e));
                }
            }
        }
    }

    let poll_outcome = match (state, ingest_error) {
        (JobState::Succeeded, None) => PollOutcome::Success,
        (JobState::Succeeded, Some(message)) => PollOutcome::Failed(message),
        (JobState::Cancelled, _) => PollOutcome::Cancelled,
        _ => PollOutcome::Failed(error.unwrap_or_else(|| "poll failed".to_string())),
    };
    if let Err(e) = shared.registry.mark_poll_result(connector_id, poll_outcome) {
        warn!(connector_id, error = %e, "Failed to record poll result");
    }
}
