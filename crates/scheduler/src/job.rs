//! Job records, progress snapshots, and the task specs the pool executes.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use netpulse_core::Connector;

// ── Enums ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Poll,
    Scheduled,
    Manual,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Poll => write!(f, "poll"),
            JobKind::Scheduled => write!(f, "scheduled"),
            JobKind::Manual => write!(f, "manual"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed | JobState::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Running => write!(f, "running"),
            JobState::Succeeded => write!(f, "succeeded"),
            JobState::Failed => write!(f, "failed"),
            JobState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    fn rank(&self) -> u8 {
        match self {
            StepStatus::Pending => 0,
            StepStatus::Running => 1,
            StepStatus::Completed | StepStatus::Failed => 2,
        }
    }

    /// Steps only move forward: pending -> running -> completed|failed.
    pub fn can_advance_to(&self, next: StepStatus) -> bool {
        next.rank() > self.rank()
    }
}

// ── Progress ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressStep {
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// 0-100.
    pub percent: u8,
    pub message: Option<String>,
    pub current_step: Option<String>,
    pub steps: Vec<ProgressStep>,
}

// ── Job record ──────────────────────────────────────────────────────

/// One execution of a poll, scheduled or manual job, as seen by observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub task_id: Uuid,
    pub job_name: String,
    pub kind: JobKind,
    pub connector_id: Option<String>,
    pub state: JobState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Executor identity, e.g. `worker-1`.
    pub worker: Option<String>,
    /// Config snapshot taken at submission.
    pub config: Value,
    pub error: Option<String>,
    /// Present only while running.
    pub progress: Option<ProgressSnapshot>,
    pub duration_ms: Option<u64>,
    pub result: Option<Value>,
}

/// Filter for [`ExecutionTracker::recent`](crate::tracker::ExecutionTracker::recent).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JobFilter {
    pub state: Option<JobState>,
    pub kind: Option<JobKind>,
    pub connector_id: Option<String>,
    pub limit: Option<usize>,
}

impl JobFilter {
    pub fn matches(&self, job: &Job) -> bool {
        self.state.map_or(true, |s| job.state == s)
            && self.kind.map_or(true, |k| job.kind == k)
            && self
                .connector_id
                .as_deref()
                .map_or(true, |id| job.connector_id.as_deref() == Some(id))
    }
}

// ── Task specs ──────────────────────────────────────────────────────

/// A named non-poll job: which driver to run and with what config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    pub driver: String,
    #[serde(default)]
    pub config: Value,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum TaskPayload {
    Poll(Connector),
    Job(JobSpec),
}

/// A unit of work submitted to the worker pool.
#[derive(Debug, Clone)]
pub struct TaskSpec {
    pub task_id: Uuid,
    pub job_name: String,
    pub kind: JobKind,
    pub payload: TaskPayload,
}

impl TaskSpec {
    /// Poll task for a connector snapshot. `kind` is `Poll` for ticks and
    /// `Manual` for "poll now" requests.
    pub fn poll(connector: Connector, kind: JobKind) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            job_name: format!("poll:{}", connector.id),
            kind,
            payload: TaskPayload::Poll(connector),
        }
    }

    pub fn job(spec: JobSpec, kind: JobKind) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            job_name: spec.name.clone(),
            kind,
            payload: TaskPayload::Job(spec),
        }
    }

    pub fn connector_id(&self) -> Option<&str> {
        match &self.payload {
            TaskPayload::Poll(c) => Some(&c.id),
            TaskPayload::Job(_) => None,
        }
    }

    /// Driver kind used to route the task.
    pub fn driver_kind(&self) -> &str {
        match &self.payload {
            TaskPayload::Poll(c) => c.kind(),
            TaskPayload::Job(spec) => &spec.driver,
        }
    }

    /// Per-task timeout override; `None` means the pool default applies.
    pub fn timeout(&self) -> Option<Duration> {
        match &self.payload {
            TaskPayload::Poll(c) => c.config.timeout(),
            TaskPayload::Job(spec) => spec.timeout_secs.map(Duration::from_secs),
        }
    }

    pub fn config_snapshot(&self) -> Value {
        match &self.payload {
            TaskPayload::Poll(c) => c.config.to_value(),
            TaskPayload::Job(spec) => spec.config.clone(),
        }
    }

    /// Fresh queued job record for this task.
    pub fn to_job(&self) -> Job {
        Job {
            task_id: self.task_id,
            job_name: self.job_name.clone(),
            kind: self.kind,
            connector_id: self.connector_id().map(str::to_string),
            state: JobState::Queued,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            worker: None,
            config: self.config_snapshot(),
            error: None,
            progress: None,
            duration_ms: None,
            result: None,
        }
    }
}
