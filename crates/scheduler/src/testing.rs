//! Mock drivers and sinks shared by the scheduler's unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Semaphore;

use netpulse_core::config::{DispatchConfig, WorkerPoolConfig};
use netpulse_core::{
    Connector, ConnectorConfig, ConnectorInput, IngestOutcome, NetpulseError, PingConfig,
    RawFinding, Severity,
};

use crate::driver::{Driver, DriverError, FindingSink, TaskContext};
use crate::job::JobSpec;
use crate::registry::ConnectorRegistry;

#[derive(Clone, Copy)]
pub(crate) enum Mode {
    /// Return `n` findings immediately.
    Findings(usize),
    /// Fail with a transport error.
    Fail,
    /// Wait for a gate permit (or cancellation), then return one finding.
    Gated,
    /// Sleep for a minute, deaf to cancellation.
    Stubborn,
}

pub(crate) struct MockDriver {
    mode: Mode,
    pub(crate) gate: Semaphore,
    pub(crate) calls: AtomicUsize,
    pub(crate) running: AtomicUsize,
    pub(crate) max_running: AtomicUsize,
    pub(crate) starts: Mutex<Vec<tokio::time::Instant>>,
}

impl MockDriver {
    pub(crate) fn new(mode: Mode) -> Arc<Self> {
        Arc::new(Self {
            mode,
            gate: Semaphore::new(0),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        })
    }

    pub(crate) fn release_all(&self) {
        self.gate.add_permits(1_000);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn work(&self, ctx: &TaskContext) -> Result<usize, DriverError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().unwrap().push(tokio::time::Instant::now());
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now_running, Ordering::SeqCst);

        let result = match self.mode {
            Mode::Findings(n) => Ok(n),
            Mode::Fail => Err(DriverError::Transport("connection refused".into())),
            Mode::Gated => {
                tokio::select! {
                    permit = self.gate.acquire() => {
                        permit.map(|p| p.forget()).map_err(|_| DriverError::Cancelled)?;
                        ctx.checkpoint().map(|_| 1)
                    }
                    _ = ctx.cancelled() => Err(DriverError::Cancelled),
                }
            }
            Mode::Stubborn => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(1)
            }
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[async_trait::async_trait]
impl Driver for MockDriver {
    fn name(&self) -> &str {
        "mock"
    }

    async fn poll(
        &self,
        connector: &Connector,
        ctx: &TaskContext,
    ) -> Result<Vec<RawFinding>, DriverError> {
        let n = self.work(ctx).await?;
        Ok((0..n)
            .map(|i| {
                RawFinding::new("mock", "high_cpu", Severity::Major)
                    .device_name(&connector.id)
                    .attribute("core", &i.to_string())
            })
            .collect())
    }

    async fn run(&self, job: &JobSpec, ctx: &TaskContext) -> Result<Value, DriverError> {
        let n = self.work(ctx).await?;
        Ok(json!({ "job": job.name, "items": n }))
    }
}

/// Records every batch it is handed. With `fail` set, rejects them instead.
#[derive(Default)]
pub(crate) struct RecordingSink {
    pub(crate) batches: Mutex<Vec<(String, usize)>>,
    pub(crate) fail: AtomicBool,
}

impl RecordingSink {
    pub(crate) fn batches(&self) -> Vec<(String, usize)> {
        self.batches.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl FindingSink for RecordingSink {
    async fn accept(
        &self,
        connector_id: &str,
        findings: Vec<RawFinding>,
    ) -> Result<IngestOutcome, NetpulseError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NetpulseError::Internal("alert store unavailable".into()));
        }
        self.batches
            .lock()
            .unwrap()
            .push((connector_id.to_string(), findings.len()));
        Ok(IngestOutcome {
            created: findings.len(),
            ..Default::default()
        })
    }
}

pub(crate) fn pool_config(workers: usize, concurrency: usize, rate: u32, bound: usize) -> WorkerPoolConfig {
    WorkerPoolConfig {
        worker_count: workers,
        worker_concurrency: concurrency,
        rate_limit: rate,
        queue_bound: bound,
        cancel_grace_secs: 1,
        default_task_timeout_secs: 300,
    }
}

pub(crate) fn ping_input(interval: u64, timeout_secs: Option<u64>) -> ConnectorInput {
    ConnectorInput {
        name: None,
        config: ConnectorConfig::Ping(PingConfig {
            host: "10.1.1.1".into(),
            count: 1,
            timeout_secs,
        }),
        enabled: true,
        poll_interval_secs: Some(interval),
    }
}

pub(crate) fn registry_with(ids: &[&str]) -> Arc<ConnectorRegistry> {
    let registry = Arc::new(ConnectorRegistry::new(DispatchConfig::default()));
    for id in ids {
        registry.upsert(id, ping_input(300, None)).unwrap();
    }
    registry
}

pub(crate) fn job_spec(name: &str) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        driver: "ping".into(),
        config: Value::Null,
        timeout_secs: None,
    }
}

/// Poll `cond` every 10ms for up to 5s.
pub(crate) async fn wait_until<F: Fn() -> bool>(what: &str, cond: F) {
    for _ in 0..500 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}
