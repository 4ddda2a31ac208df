//! Poll Dispatcher: the global tick loop.
//!
//! Every tick scans the enabled connectors, claims each due one through
//! [`ConnectorRegistry::mark_poll_start`] and submits a poll task. Connectors
//! still polling from a previous tick are skipped quietly; connectors refused
//! by a full queue have their claim undone and are retried next tick. Due
//! cron jobs are enqueued on the same tick.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use netpulse_core::{NetpulseError, Result};

use crate::job::{Job, JobKind, TaskSpec};
use crate::pool::{QueueStatus, WorkerPool};
use crate::registry::ConnectorRegistry;
use crate::schedule::ScheduledJobs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatcherState {
    Idle,
    Scanning,
    Dispatching,
}

/// What one tick did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub dispatched: Vec<String>,
    pub skipped_in_flight: Vec<String>,
    pub deferred_backpressure: Vec<String>,
    pub jobs_dispatched: Vec<String>,
    pub jobs_skipped_active: Vec<String>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.dispatched.is_empty()
            && self.skipped_in_flight.is_empty()
            && self.deferred_backpressure.is_empty()
            && self.jobs_dispatched.is_empty()
            && self.jobs_skipped_active.is_empty()
    }
}

pub struct PollDispatcher {
    registry: Arc<ConnectorRegistry>,
    jobs: Arc<ScheduledJobs>,
    pool: Arc<WorkerPool>,
    state: Mutex<DispatcherState>,
}

impl PollDispatcher {
    pub fn new(
        registry: Arc<ConnectorRegistry>,
        jobs: Arc<ScheduledJobs>,
        pool: Arc<WorkerPool>,
    ) -> Self {
        Self {
            registry,
            jobs,
            pool,
            state: Mutex::new(DispatcherState::Idle),
        }
    }

    pub fn state(&self) -> DispatcherState {
        self.state
            .lock()
            .map(|s| *s)
            .unwrap_or(DispatcherState::Idle)
    }

    fn set_state(&self, next: DispatcherState) {
        if let Ok(mut s) = self.state.lock() {
            *s = next;
        }
    }

    /// Run one dispatch pass at `now`.
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickReport> {
        self.set_state(DispatcherState::Scanning);
        let result = self.scan_and_dispatch(now);
        self.set_state(DispatcherState::Idle);
        result
    }

    fn scan_and_dispatch(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let mut report = TickReport::default();

        for connector in self.registry.list(Some(true))? {
            if !connector.is_due(now) {
                continue;
            }
            let (ticket, snapshot) = match self.registry.mark_poll_start(&connector.id, now) {
                Ok(claimed) => claimed,
                Err(NetpulseError::Conflict(_)) => {
                    debug!(connector_id = %connector.id, "Connector already polling, skipped");
                    report.skipped_in_flight.push(connector.id);
                    continue;
                }
                Err(e) => {
                    warn!(connector_id = %connector.id, error = %e, "Could not claim connector");
                    continue;
                }
            };

            self.set_state(DispatcherState::Dispatching);
            match self.pool.submit(TaskSpec::poll(snapshot, JobKind::Poll)) {
                Ok(_) => report.dispatched.push(connector.id),
                Err(e) => {
                    self.registry.abort_poll_start(ticket)?;
                    if matches!(e, NetpulseError::Backpressure { .. }) {
                        debug!(connector_id = %connector.id, "Poll deferred by backpressure");
                        report.deferred_backpressure.push(connector.id);
                    } else {
                        warn!(connector_id = %connector.id, error = %e, "Poll submission failed");
                    }
                }
            }
        }

        for spec in self.jobs.due(now)? {
            let name = spec.name.clone();
            if self.pool.tracker().is_active(&name)? {
                debug!(job = %name, "Previous run still active, skipping this occurrence");
                self.jobs.record_trigger_at(&name, now)?;
                report.jobs_skipped_active.push(name);
                continue;
            }
            self.set_state(DispatcherState::Dispatching);
            match self.pool.submit(TaskSpec::job(spec, JobKind::Scheduled)) {
                Ok(_) => {
                    self.jobs.record_trigger_at(&name, now)?;
                    report.jobs_dispatched.push(name);
                }
                Err(e) => warn!(job = %name, error = %e, "Scheduled job submission failed"),
            }
        }

        Ok(report)
    }

    /// Tick every `tick` until `shutdown` fires. A failed tick is logged and
    /// the next one runs on schedule.
    pub async fn run(&self, shutdown: CancellationToken) {
        let period = self.registry.dispatch_config().tick();
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(?period, "Poll dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.tick(Utc::now()) {
                Ok(report) => {
                    self.pool.record_tick(true);
                    if !report.is_empty() {
                        info!(
                            dispatched = report.dispatched.len(),
                            skipped = report.skipped_in_flight.len(),
                            deferred = report.deferred_backpressure.len(),
                            jobs = report.jobs_dispatched.len(),
                            "Dispatch tick"
                        );
                    }
                }
                Err(e) => {
                    self.pool.record_tick(false);
                    error!(error = %e, "Dispatch tick failed, retrying next period");
                }
            }
        }

        info!("Poll dispatcher stopped");
    }

    /// Manual "poll now": ignores the interval but not the in-flight gate.
    pub fn poll_now(&self, connector_id: &str) -> Result<Job> {
        let (ticket, snapshot) = self.registry.mark_poll_start(connector_id, Utc::now())?;
        match self.pool.submit(TaskSpec::poll(snapshot, JobKind::Manual)) {
            Ok(job) => {
                info!(connector_id, task_id = %job.task_id, "Manual poll queued");
                Ok(job)
            }
            Err(e) => {
                self.registry.abort_poll_start(ticket)?;
                Err(e)
            }
        }
    }

    /// Trigger a scheduled job outside its cron window.
    pub fn run_job_now(&self, name: &str) -> Result<Job> {
        let spec = self.jobs.spec(name)?;
        if self.pool.tracker().is_active(name)? {
            return Err(NetpulseError::Conflict(format!("job '{}' is already running", name)));
        }
        let job = self.pool.submit(TaskSpec::job(spec, JobKind::Manual))?;
        info!(job = %name, task_id = %job.task_id, "Manual job run queued");
        Ok(job)
    }

    pub fn queue_status(&self) -> Result<QueueStatus> {
        let scheduled = self.registry.list(Some(true))?.len() + self.jobs.enabled_count()?;
        Ok(self.pool.status(scheduled))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::driver::DriverRegistry;
    use crate::job::{JobFilter, JobState};
    use crate::registry::PollOutcome;
    use crate::testing::{job_spec, pool_config, registry_with, wait_until, MockDriver, Mode, RecordingSink};
    use crate::tracker::ExecutionTracker;

    use super::*;

    struct Fixture {
        dispatcher: PollDispatcher,
        registry: Arc<ConnectorRegistry>,
        jobs: Arc<ScheduledJobs>,
        tracker: Arc<ExecutionTracker>,
        driver: Arc<MockDriver>,
    }

    fn fixture(ids: &[&str], bound: usize, mode: Mode) -> Fixture {
        let registry = registry_with(ids);
        let jobs = Arc::new(ScheduledJobs::new());
        let tracker = Arc::new(ExecutionTracker::new(100));
        let driver = MockDriver::new(mode);
        let mut drivers = DriverRegistry::new();
        drivers.register("ping", driver.clone());
        let pool = Arc::new(WorkerPool::start(
            pool_config(1, 1, 0, bound),
            tracker.clone(),
            registry.clone(),
            Arc::new(drivers),
            Arc::new(RecordingSink::default()),
            CancellationToken::new(),
        ));
        Fixture {
            dispatcher: PollDispatcher::new(registry.clone(), jobs.clone(), pool),
            registry,
            jobs,
            tracker,
            driver,
        }
    }

    fn polled_at(registry: &ConnectorRegistry, id: &str, at: DateTime<Utc>) {
        registry.mark_poll_start(id, at).unwrap();
        registry.mark_poll_result(id, PollOutcome::Success).unwrap();
    }

    fn tasks_for(tracker: &ExecutionTracker, id: &str) -> Vec<Job> {
        tracker
            .recent(&JobFilter {
                connector_id: Some(id.to_string()),
                ..Default::default()
            })
            .unwrap()
    }

    #[tokio::test]
    async fn due_connector_gets_one_task_and_manual_poll_conflicts() {
        let f = fixture(&["a"], 10, Mode::Gated);
        let now = Utc::now();
        polled_at(&f.registry, "a", now - chrono::Duration::seconds(400));

        let report = f.dispatcher.tick(now).unwrap();
        assert_eq!(report.dispatched, vec!["a".to_string()]);
        assert_eq!(tasks_for(&f.tracker, "a").len(), 1);

        let err = f.dispatcher.poll_now("a").unwrap_err();
        assert!(matches!(err, NetpulseError::Conflict(_)));
        assert_eq!(tasks_for(&f.tracker, "a").len(), 1);
        assert_eq!(f.dispatcher.state(), DispatcherState::Idle);

        f.driver.release_all();
    }

    #[tokio::test]
    async fn not_due_and_disabled_connectors_are_left_alone() {
        let f = fixture(&["fresh", "off"], 10, Mode::Findings(0));
        let now = Utc::now();
        polled_at(&f.registry, "fresh", now - chrono::Duration::seconds(100));
        f.registry.set_enabled("off", false).unwrap();

        let report = f.dispatcher.tick(now).unwrap();
        assert!(report.is_empty());
        assert!(f.tracker.recent(&JobFilter::default()).unwrap().is_empty());
    }

    #[tokio::test]
    async fn in_flight_connector_is_skipped_on_later_tick() {
        let f = fixture(&["a"], 10, Mode::Gated);
        let now = Utc::now();
        f.dispatcher.tick(now).unwrap();

        let later = now + chrono::Duration::seconds(400);
        let report = f.dispatcher.tick(later).unwrap();
        assert!(report.dispatched.is_empty());
        assert_eq!(report.skipped_in_flight, vec!["a".to_string()]);
        assert_eq!(tasks_for(&f.tracker, "a").len(), 1);

        f.driver.release_all();
    }

    #[tokio::test]
    async fn backpressure_defers_and_restores_claim() {
        let f = fixture(&["a", "b", "c"], 1, Mode::Gated);
        let report = f.dispatcher.tick(Utc::now()).unwrap();

        assert_eq!(report.dispatched, vec!["a".to_string()]);
        assert_eq!(report.deferred_backpressure, vec!["b".to_string(), "c".to_string()]);
        for id in ["b", "c"] {
            let c = f.registry.get(id).unwrap();
            assert!(c.last_poll_at.is_none(), "{} stays due", id);
            assert!(!f.registry.is_in_flight(id).unwrap());
        }

        f.driver.release_all();
    }

    #[tokio::test]
    async fn manual_poll_on_unknown_or_disabled_connector() {
        let f = fixture(&["a"], 10, Mode::Findings(0));
        assert!(matches!(f.dispatcher.poll_now("zzz"), Err(NetpulseError::NotFound(_))));
        f.registry.set_enabled("a", false).unwrap();
        assert!(matches!(f.dispatcher.poll_now("a"), Err(NetpulseError::Validation(_))));
    }

    #[tokio::test]
    async fn manual_poll_bypasses_interval() {
        let f = fixture(&["a"], 10, Mode::Findings(1));
        polled_at(&f.registry, "a", Utc::now());

        let job = f.dispatcher.poll_now("a").unwrap();
        assert_eq!(job.kind, JobKind::Manual);
        wait_until("poll done", || {
            f.tracker.observe(job.task_id).unwrap().state == JobState::Succeeded
        })
        .await;
    }

    #[tokio::test]
    async fn scheduled_jobs_dispatch_and_skip_while_active() {
        let f = fixture(&[], 10, Mode::Gated);
        f.jobs.register(job_spec("executions.prune"), "* * * * *", true).unwrap();

        let now = Utc::now();
        let report = f.dispatcher.tick(now).unwrap();
        assert_eq!(report.jobs_dispatched, vec!["executions.prune".to_string()]);

        let later = now + chrono::Duration::minutes(2);
        let report = f.dispatcher.tick(later).unwrap();
        assert!(report.jobs_dispatched.is_empty());
        assert_eq!(report.jobs_skipped_active, vec!["executions.prune".to_string()]);

        assert!(matches!(
            f.dispatcher.run_job_now("executions.prune"),
            Err(NetpulseError::Conflict(_))
        ));
        f.driver.release_all();
        wait_until("job done", || {
            !f.tracker.is_active("executions.prune").unwrap()
        })
        .await;

        let manual = f.dispatcher.run_job_now("executions.prune").unwrap();
        assert_eq!(manual.kind, JobKind::Manual);
        assert!(matches!(f.dispatcher.run_job_now("nope"), Err(NetpulseError::NotFound(_))));
    }

    #[tokio::test]
    async fn queue_status_counts_scheduled_sources() {
        let f = fixture(&["a", "b"], 10, Mode::Findings(0));
        f.registry.set_enabled("b", false).unwrap();
        f.jobs.register(job_spec("j"), "0 0 * * *", true).unwrap();

        let status = f.dispatcher.queue_status().unwrap();
        assert_eq!(status.scheduled, 2);
        assert_eq!(status.workers.len(), 1);
    }

    #[tokio::test]
    async fn run_loop_ticks_until_shutdown() {
        let f = Arc::new(fixture(&["a"], 10, Mode::Findings(0)));
        let shutdown = CancellationToken::new();

        let handle = {
            let f = f.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { f.dispatcher.run(shutdown).await })
        };

        wait_until("first tick dispatched", || !tasks_for(&f.tracker, "a").is_empty()).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("dispatcher stops on shutdown")
            .unwrap();
    }
}
