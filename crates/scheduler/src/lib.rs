//! Connector polling scheduler: registry, dispatch tick, cron jobs, a bounded
//! worker pool with a pool-wide rate limit, and the execution tracker.
//!
//! The crate knows nothing about alerts. Findings produced by successful poll
//! tasks are handed to a [`FindingSink`] supplied by the embedding process.

pub mod dispatcher;
pub mod driver;
pub mod job;
pub mod metrics;
pub mod pool;
pub mod rate_limit;
pub mod registry;
pub mod schedule;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use dispatcher::{DispatcherState, PollDispatcher, TickReport};
pub use driver::{Driver, DriverError, DriverRegistry, FindingSink, TaskContext};
pub use job::{
    Job, JobFilter, JobKind, JobSpec, JobState, ProgressSnapshot, ProgressStep, StepStatus,
    TaskPayload, TaskSpec,
};
pub use metrics::SchedulerMetrics;
pub use pool::{QueueStatus, WorkerPool, WorkerStatus};
pub use rate_limit::RateLimiter;
pub use registry::{ConnectorRegistry, PollOutcome, PollTicket};
pub use schedule::{ScheduledJob, ScheduledJobs};
pub use tracker::{ExecutionTracker, JobCounts, JobUpdate, ProgressSink};
