//! Built-in housekeeping jobs, run by the worker pool like any other job.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;

use netpulse_alerts::AlertStore;
use netpulse_scheduler::{Driver, DriverError, ExecutionTracker, JobSpec, TaskContext};

pub const DRIVER: &str = "maintenance";
pub const EXPIRE_SUPPRESSIONS: &str = "alerts.expire_suppressions";
pub const PRUNE_EXECUTIONS: &str = "executions.prune";

/// Built-in jobs with their default cron schedules.
pub fn builtin_jobs() -> Vec<(JobSpec, &'static str)> {
    vec![
        (
            JobSpec {
                name: EXPIRE_SUPPRESSIONS.to_string(),
                driver: DRIVER.to_string(),
                config: Value::Null,
                timeout_secs: Some(60),
            },
            "0 * * * * *",
        ),
        (
            JobSpec {
                name: PRUNE_EXECUTIONS.to_string(),
                driver: DRIVER.to_string(),
                config: Value::Null,
                timeout_secs: Some(60),
            },
            "0 */15 * * * *",
        ),
    ]
}

pub struct MaintenanceDriver {
    alerts: Arc<AlertStore>,
    tracker: Arc<ExecutionTracker>,
}

impl MaintenanceDriver {
    pub fn new(alerts: Arc<AlertStore>, tracker: Arc<ExecutionTracker>) -> Self {
        Self { alerts, tracker }
    }

    fn expire_suppressions(&self, ctx: &TaskContext) -> Result<Value, DriverError> {
        let progress = ctx.progress();
        progress.plan(&["expire"]);
        ctx.checkpoint()?;

        progress.begin_step("expire");
        match self.alerts.expire_suppressions(Utc::now()) {
            Ok(expired) => {
                progress.complete_step("expire");
                progress.set_percent(100);
                Ok(json!({ "expired": expired }))
            }
            Err(e) => {
                progress.fail_step("expire");
                Err(DriverError::Protocol(e.to_string()))
            }
        }
    }

    fn prune_executions(&self, job: &JobSpec, ctx: &TaskContext) -> Result<Value, DriverError> {
        let keep = job
            .config
            .get("keep")
            .and_then(Value::as_u64)
            .map(|k| k as usize)
            .unwrap_or_else(|| self.tracker.history_limit());

        let progress = ctx.progress();
        progress.plan(&["prune"]);
        ctx.checkpoint()?;

        progress.begin_step("prune");
        match self.tracker.prune(keep) {
            Ok(removed) => {
                progress.complete_step("prune");
                progress.set_percent(100);
                info!(removed, keep, "Execution history pruned");
                Ok(json!({ "removed": removed, "keep": keep }))
            }
            Err(e) => {
                progress.fail_step("prune");
                Err(DriverError::Protocol(e.to_string()))
            }
        }
    }
}

#[async_trait::async_trait]
impl Driver for MaintenanceDriver {
    fn name(&self) -> &str {
        DRIVER
    }

    async fn run(&self, job: &JobSpec, ctx: &TaskContext) -> Result<Value, DriverError> {
        match job.name.as_str() {
            EXPIRE_SUPPRESSIONS => self.expire_suppressions(ctx),
            PRUNE_EXECUTIONS => self.prune_executions(job, ctx),
            other => Err(DriverError::Unsupported(format!(
                "unknown maintenance job '{}'",
                other
            ))),
        }
    }
}
