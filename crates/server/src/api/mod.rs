//! HTTP handlers, one module per resource.
//!
//! Every handler returns [`ApiResult`]; domain errors map to status codes in
//! [`error`].

mod alerts;
mod connectors;
pub mod error;
mod executions;
mod health;
mod jobs;

pub use error::{ApiError, ApiResult, ErrorResponse};

// ── Re-exports ───────────────────────────────────────────────────
// Flat `api::foo` paths for route registration.

pub use alerts::{alerts_action, alerts_aggregate, alerts_get, alerts_list};
pub use connectors::{
    connectors_delete, connectors_get, connectors_list, connectors_poll, connectors_put,
};
pub use executions::{executions_cancel, executions_get, executions_list, executions_stream};
pub use health::{config_summary, health, queue_status, scheduler_metrics};
pub use jobs::{jobs_list, jobs_run, jobs_toggle};
