//! Bounded worker pool.
//!
//! `worker_count` workers each run up to `worker_concurrency` tasks at once,
//! pulling from one shared queue. Every task start waits for a token from the
//! pool-wide [`RateLimiter`](crate::rate_limit::RateLimiter). The queue itself
//! is bounded by `queue_bound`: past it, `submit` answers `Backpressure`
//! instead of queueing.

mod core;
mod execution;

use serde::Serialize;

pub use self::core::WorkerPool;

/// One worker's load, for the queue status view.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub name: String,
    pub running: usize,
    pub capacity: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct QueueStatus {
    /// Tasks currently running.
    pub active: usize,
    /// Tasks accepted but not yet started.
    pub reserved: usize,
    /// Enabled connectors plus enabled scheduled jobs.
    pub scheduled: usize,
    pub capacity: usize,
    pub queue_bound: usize,
    /// Starts per second, `None` when unlimited.
    pub rate_limit: Option<u32>,
    pub workers: Vec<WorkerStatus>,
}
