//! Scheduled job listing, pause/resume and manual runs.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;

use netpulse_scheduler::{Job, ScheduledJob};

use crate::state::AppState;

use super::error::ApiResult;

pub async fn jobs_list(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<ScheduledJob>>> {
    Ok(Json(state.jobs.list()?))
}

pub async fn jobs_toggle(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<ScheduledJob>> {
    Ok(Json(state.jobs.toggle(&name)?))
}

pub async fn jobs_run(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.dispatcher.run_job_now(&name)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}
