//! The boundary to external protocol drivers and to the findings consumer.
//!
//! Drivers are looked up by kind (`snmp`, `ssh`, a generic connector type, or
//! a job driver name). Every invocation receives a [`TaskContext`] carrying the
//! cancellation token and a progress sink; drivers are expected to call
//! [`TaskContext::checkpoint`] between units of work.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use netpulse_core::{Connector, IngestOutcome, NetpulseError, RawFinding};

use crate::job::JobSpec;
use crate::tracker::ProgressSink;

/// Errors reported by a driver invocation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DriverError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("protocol failure: {0}")]
    Protocol(String),

    #[error("cancelled")]
    Cancelled,

    #[error("unsupported: {0}")]
    Unsupported(String),
}

impl From<DriverError> for NetpulseError {
    fn from(e: DriverError) -> Self {
        NetpulseError::Driver(e.to_string())
    }
}

/// Per-invocation context handed to drivers.
#[derive(Clone)]
pub struct TaskContext {
    pub task_id: Uuid,
    cancel: CancellationToken,
    progress: ProgressSink,
}

impl TaskContext {
    pub fn new(task_id: Uuid, cancel: CancellationToken, progress: ProgressSink) -> Self {
        Self {
            task_id,
            cancel,
            progress,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> Result<(), DriverError> {
        if self.cancel.is_cancelled() {
            Err(DriverError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub fn progress(&self) -> &ProgressSink {
        &self.progress
    }
}

/// A protocol driver (SNMP, SSH, HTTP...) or a job runner.
#[async_trait::async_trait]
pub trait Driver: Send + Sync {
    /// Human-readable driver name for logs.
    fn name(&self) -> &str;

    /// Poll a connector and return the raw findings observed.
    async fn poll(
        &self,
        connector: &Connector,
        _ctx: &TaskContext,
    ) -> Result<Vec<RawFinding>, DriverError> {
        Err(DriverError::Unsupported(format!(
            "driver '{}' cannot poll connector type '{}'",
            self.name(),
            connector.kind()
        )))
    }

    /// Execute a named job to completion.
    async fn run(&self, job: &JobSpec, _ctx: &TaskContext) -> Result<Value, DriverError> {
        Err(DriverError::Unsupported(format!(
            "driver '{}' cannot run job '{}'",
            self.name(),
            job.name
        )))
    }
}

/// Consumer of findings from polls that reached `succeeded`.
#[async_trait::async_trait]
pub trait FindingSink: Send + Sync {
    async fn accept(
        &self,
        connector_id: &str,
        findings: Vec<RawFinding>,
    ) -> Result<IngestOutcome, NetpulseError>;
}

/// Routes driver kinds to driver implementations, with an optional fallback
/// used for kinds nobody registered.
#[derive(Default)]
pub struct DriverRegistry {
    drivers: HashMap<String, Arc<dyn Driver>>,
    fallback: Option<Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: &str, driver: Arc<dyn Driver>) {
        tracing::info!(kind, driver = driver.name(), "Registered driver");
        self.drivers.insert(kind.to_string(), driver);
    }

    pub fn set_fallback(&mut self, driver: Arc<dyn Driver>) {
        self.fallback = Some(driver);
    }

    pub fn resolve(&self, kind: &str) -> Option<Arc<dyn Driver>> {
        self.drivers
            .get(kind)
            .or(self.fallback.as_ref())
            .cloned()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.drivers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }
}
