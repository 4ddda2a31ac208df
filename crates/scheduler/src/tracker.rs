//! Execution Tracker: the single writer of job state.
//!
//! The worker pool requests every transition through this type; observers get
//! point-in-time copies (`observe`, `recent`) or a finite update stream per job
//! (`stream`) that ends with the terminal state. Each job owns a `watch`
//! channel, so a slow reader sees the latest snapshot rather than a backlog,
//! and re-subscribing simply restarts from the current state.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use futures::stream::{self, BoxStream, StreamExt};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tracing::debug;
use uuid::Uuid;

use netpulse_core::{NetpulseError, Result};

use crate::job::{Job, JobFilter, JobState, ProgressSnapshot, ProgressStep, StepStatus, TaskSpec};

const DEFAULT_RECENT_LIMIT: usize = 50;

/// One element of a job's update stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobUpdate {
    pub task_id: Uuid,
    pub state: JobState,
    pub progress: Option<ProgressSnapshot>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl JobUpdate {
    fn of(job: &Job) -> Self {
        Self {
            task_id: job.task_id,
            state: job.state,
            progress: job.progress.clone(),
            error: job.error.clone(),
            at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub queued: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cancelled: usize,
}

struct Entry {
    job: Job,
    tx: watch::Sender<JobUpdate>,
}

impl Entry {
    fn publish(&self) {
        self.tx.send_replace(JobUpdate::of(&self.job));
    }

    fn terminate(&mut self, state: JobState, error: Option<String>, result: Option<Value>) -> Job {
        let now = Utc::now();
        self.job.state = state;
        self.job.finished_at = Some(now);
        self.job.duration_ms = self
            .job
            .started_at
            .map(|started| now.signed_duration_since(started).num_milliseconds().max(0) as u64);
        self.job.error = error;
        self.job.result = result;
        self.job.progress = None;
        self.publish();
        self.job.clone()
    }
}

pub struct ExecutionTracker {
    history_limit: usize,
    jobs: Mutex<IndexMap<Uuid, Entry>>,
}

impl ExecutionTracker {
    pub fn new(history_limit: usize) -> Self {
        Self {
            history_limit,
            jobs: Mutex::new(IndexMap::new()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, IndexMap<Uuid, Entry>>> {
        self.jobs
            .lock()
            .map_err(|e| NetpulseError::poisoned("execution tracker", e))
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Record a newly submitted task as `queued`.
    pub fn enqueue(&self, task: &TaskSpec) -> Result<Job> {
        let job = task.to_job();
        let (tx, _rx) = watch::channel(JobUpdate::of(&job));
        self.lock()?.insert(
            job.task_id,
            Entry {
                job: job.clone(),
                tx,
            },
        );
        Ok(job)
    }

    /// `queued -> running`. Fails with `AlreadyTerminal` when the task was
    /// cancelled while still queued.
    pub fn start(&self, task_id: Uuid, worker: &str) -> Result<Job> {
        let mut jobs = self.lock()?;
        let entry = jobs
            .get_mut(&task_id)
            .ok_or_else(|| NetpulseError::NotFound(format!("task {}", task_id)))?;

        match entry.job.state {
            JobState::Queued => {}
            s if s.is_terminal() => {
                return Err(NetpulseError::AlreadyTerminal(format!("task {} is {}", task_id, s)))
            }
            s => {
                return Err(NetpulseError::InvalidTransition {
                    from: s.to_string(),
                    to: JobState::Running.to_string(),
                })
            }
        }

        entry.job.state = JobState::Running;
        entry.job.started_at = Some(Utc::now());
        entry.job.worker = Some(worker.to_string());
        entry.job.progress = Some(ProgressSnapshot::default());
        entry.publish();
        Ok(entry.job.clone())
    }

    /// Move a job into a terminal state. Terminal states are immutable: a
    /// second `finish` fails with `AlreadyTerminal`.
    pub fn finish(
        &self,
        task_id: Uuid,
        state: JobState,
        error: Option<String>,
        result: Option<Value>,
    ) -> Result<Job> {
        if !state.is_terminal() {
            return Err(NetpulseError::InvalidTransition {
                from: "active".to_string(),
                to: state.to_string(),
            });
        }

        let mut jobs = self.lock()?;
        let entry = jobs
            .get_mut(&task_id)
            .ok_or_else(|| NetpulseError::NotFound(format!("task {}", task_id)))?;
        if entry.job.state.is_terminal() {
            return Err(NetpulseError::AlreadyTerminal(format!(
                "task {} is {}",
                task_id, entry.job.state
            )));
        }

        let job = entry.terminate(state, error, result);
        prune_terminal(&mut jobs, self.history_limit);
        Ok(job)
    }

    /// `queued -> cancelled` as one step. Returns `Ok(None)` when the job has
    /// already been picked up by a worker, in which case the caller must
    /// signal the running invocation instead.
    pub fn cancel_queued(&self, task_id: Uuid) -> Result<Option<Job>> {
        let mut jobs = self.lock()?;
        let entry = jobs
            .get_mut(&task_id)
            .ok_or_else(|| NetpulseError::NotFound(format!("task {}", task_id)))?;
        match entry.job.state {
            JobState::Queued => {}
            JobState::Running => return Ok(None),
            s => {
                return Err(NetpulseError::AlreadyTerminal(format!("task {} is {}", task_id, s)))
            }
        }
        let job = entry.terminate(
            JobState::Cancelled,
            Some("cancelled before start".to_string()),
            None,
        );
        prune_terminal(&mut jobs, self.history_limit);
        Ok(Some(job))
    }

    /// Apply a progress mutation to a running job. Updates for jobs that are
    /// not running (e.g. a disowned driver still reporting) are dropped.
    fn update_progress<F>(&self, task_id: Uuid, f: F) -> Result<bool>
    where
        F: FnOnce(&mut ProgressSnapshot),
    {
        let mut jobs = self.lock()?;
        let Some(entry) = jobs.get_mut(&task_id) else {
            return Ok(false);
        };
        if entry.job.state != JobState::Running {
            return Ok(false);
        }
        let Some(progress) = entry.job.progress.as_mut() else {
            return Ok(false);
        };
        f(progress);
        entry.publish();
        Ok(true)
    }

    // ── Queries ─────────────────────────────────────────────────────

    pub fn observe(&self, task_id: Uuid) -> Result<Job> {
        self.lock()?
            .get(&task_id)
            .map(|e| e.job.clone())
            .ok_or_else(|| NetpulseError::NotFound(format!("task {}", task_id)))
    }

    /// Matching jobs, newest first.
    pub fn recent(&self, filter: &JobFilter) -> Result<Vec<Job>> {
        let limit = filter.limit.unwrap_or(DEFAULT_RECENT_LIMIT);
        Ok(self
            .lock()?
            .values()
            .rev()
            .filter(|e| filter.matches(&e.job))
            .take(limit)
            .map(|e| e.job.clone())
            .collect())
    }

    /// Whether a job with this name is queued or running.
    pub fn is_active(&self, job_name: &str) -> Result<bool> {
        Ok(self
            .lock()?
            .values()
            .any(|e| e.job.job_name == job_name && !e.job.state.is_terminal()))
    }

    pub fn counts(&self) -> Result<JobCounts> {
        let jobs = self.lock()?;
        let mut counts = JobCounts::default();
        for entry in jobs.values() {
            match entry.job.state {
                JobState::Queued => counts.queued += 1,
                JobState::Running => counts.running += 1,
                JobState::Succeeded => counts.succeeded += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Cancelled => counts.cancelled += 1,
            }
        }
        Ok(counts)
    }

    /// Update stream for one job: the current state first, then every
    /// change, ending after the terminal update.
    pub fn stream(&self, task_id: Uuid) -> Result<BoxStream<'static, JobUpdate>> {
        let rx = self
            .lock()?
            .get(&task_id)
            .map(|e| e.tx.subscribe())
            .ok_or_else(|| NetpulseError::NotFound(format!("task {}", task_id)))?;

        Ok(stream::unfold((rx, false, true), |(mut rx, done, first)| async move {
            if done {
                return None;
            }
            if !first && rx.changed().await.is_err() {
                return None;
            }
            let update = rx.borrow_and_update().clone();
            let terminal = update.state.is_terminal();
            Some((update, (rx, terminal, false)))
        })
        .boxed())
    }

    // ── Retention ───────────────────────────────────────────────────

    /// Evict the oldest terminal jobs beyond `keep`. Returns how many went.
    pub fn prune(&self, keep: usize) -> Result<usize> {
        let mut jobs = self.lock()?;
        Ok(prune_terminal(&mut jobs, keep))
    }

    pub fn history_limit(&self) -> usize {
        self.history_limit
    }
}

fn prune_terminal(jobs: &mut IndexMap<Uuid, Entry>, keep: usize) -> usize {
    let terminal = jobs.values().filter(|e| e.job.state.is_terminal()).count();
    let mut excess = terminal.saturating_sub(keep);
    if excess == 0 {
        return 0;
    }
    let removed = excess;
    jobs.retain(|_, e| {
        if excess > 0 && e.job.state.is_terminal() {
            excess -= 1;
            false
        } else {
            true
        }
    });
    debug!(removed, keep, "Pruned execution history");
    removed
}

// ── Progress sink ───────────────────────────────────────────────────

/// Write handle for a running job's progress, given to drivers.
#[derive(Clone)]
pub struct ProgressSink {
    tracker: Arc<ExecutionTracker>,
    task_id: Uuid,
}

impl ProgressSink {
    pub fn new(tracker: Arc<ExecutionTracker>, task_id: Uuid) -> Self {
        Self { tracker, task_id }
    }

    fn apply<F: FnOnce(&mut ProgressSnapshot)>(&self, f: F) {
        if let Err(e) = self.tracker.update_progress(self.task_id, f) {
            tracing::warn!(task_id = %self.task_id, error = %e, "Progress update failed");
        }
    }

    /// Append steps in `pending` state.
    pub fn plan(&self, names: &[&str]) {
        self.apply(|p| {
            for name in names {
                p.steps.push(ProgressStep {
                    name: name.to_string(),
                    status: StepStatus::Pending,
                    started_at: None,
                    duration_ms: None,
                });
            }
        });
    }

    /// Start a step: a planned pending step moves to `running`; an unknown
    /// name is appended as `running`.
    pub fn begin_step(&self, name: &str) {
        self.apply(|p| {
            let now = Utc::now();
            match p.steps.iter_mut().find(|s| s.name == name && s.status == StepStatus::Pending) {
                Some(step) => {
                    step.status = StepStatus::Running;
                    step.started_at = Some(now);
                }
                None => p.steps.push(ProgressStep {
                    name: name.to_string(),
                    status: StepStatus::Running,
                    started_at: Some(now),
                    duration_ms: None,
                }),
            }
            p.current_step = Some(name.to_string());
        });
    }

    pub fn complete_step(&self, name: &str) {
        self.end_step(name, StepStatus::Completed);
    }

    pub fn fail_step(&self, name: &str) {
        self.end_step(name, StepStatus::Failed);
    }

    fn end_step(&self, name: &str, status: StepStatus) {
        self.apply(|p| {
            let now = Utc::now();
            if let Some(step) = p
                .steps
                .iter_mut()
                .rev()
                .find(|s| s.name == name && s.status.can_advance_to(status))
            {
                step.status = status;
                step.duration_ms = step
                    .started_at
                    .map(|t| now.signed_duration_since(t).num_milliseconds().max(0) as u64);
            }
            if p.current_step.as_deref() == Some(name) {
                p.current_step = None;
            }
        });
    }

    pub fn set_percent(&self, percent: u8) {
        self.apply(|p| p.percent = percent.min(100));
    }

    pub fn set_message(&self, message: &str) {
        self.apply(|p| p.message = Some(message.to_string()));
    }
}
