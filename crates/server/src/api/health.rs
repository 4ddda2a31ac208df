//! Health, queue status, scheduler metrics and config endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use netpulse_scheduler::{DispatcherState, QueueStatus, SchedulerMetrics};

use crate::state::AppState;

use super::error::ApiResult;

// ── Health ──────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_secs: i64,
    pub dispatcher: DispatcherState,
    pub connectors: usize,
    pub alerts: usize,
}

pub async fn health(State(state): State<Arc<AppState>>) -> ApiResult<Json<HealthResponse>> {
    Ok(Json(HealthResponse {
        status: if state.shutdown.is_cancelled() { "stopping" } else { "ok" },
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        dispatcher: state.dispatcher.state(),
        connectors: state.registry.list(None)?.len(),
        alerts: state.alerts.len()?,
    }))
}

// ── Queue status ────────────────────────────────────────────────────

/// Active (running), reserved (queued) and scheduled totals plus per-worker load.
pub async fn queue_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<QueueStatus>> {
    Ok(Json(state.dispatcher.queue_status()?))
}

// ── Scheduler metrics ───────────────────────────────────────────────

pub async fn scheduler_metrics(State(state): State<Arc<AppState>>) -> Json<SchedulerMetrics> {
    Json(state.pool.metrics())
}

pub async fn config_summary(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.config.redacted_summary())
}
