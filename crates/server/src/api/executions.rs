//! Execution history, cancellation and live progress.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::StreamExt;
use serde::Serialize;
use uuid::Uuid;

use netpulse_core::NetpulseError;
use netpulse_scheduler::{Job, JobCounts, JobFilter, JobUpdate};

use crate::state::AppState;

use super::error::ApiResult;

fn parse_task_id(raw: &str) -> Result<Uuid, NetpulseError> {
    Uuid::parse_str(raw).map_err(|_| NetpulseError::Validation(format!("invalid task id '{}'", raw)))
}

#[derive(Serialize)]
pub struct ExecutionList {
    pub items: Vec<Job>,
    pub counts: JobCounts,
}

/// Recent executions, newest first. Filters: `state`, `kind`, `connector_id`, `limit`.
pub async fn executions_list(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<JobFilter>,
) -> ApiResult<Json<ExecutionList>> {
    Ok(Json(ExecutionList {
        items: state.tracker.recent(&filter)?,
        counts: state.tracker.counts()?,
    }))
}

pub async fn executions_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let task_id = parse_task_id(&id)?;
    Ok(Json(state.tracker.observe(task_id)?))
}

/// Cancel a queued or running execution. 409 if it already finished.
pub async fn executions_cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let task_id = parse_task_id(&id)?;
    Ok(Json(state.pool.cancel(task_id)?))
}

fn update_event(update: &JobUpdate) -> Event {
    let event = Event::default().event(if update.state.is_terminal() { "done" } else { "update" });
    match serde_json::to_string(update) {
        Ok(data) => event.data(data),
        Err(e) => Event::default().event("error").data(e.to_string()),
    }
}

/// Server-Sent Events: `update` for each change, then one `done` carrying
/// the terminal state, after which the stream closes. Reconnecting starts
/// again from the current snapshot.
pub async fn executions_stream(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl futures::Stream<Item = Result<Event, Infallible>>>> {
    let task_id = parse_task_id(&id)?;
    let updates = state.tracker.stream(task_id)?;
    let events = updates.map(|update| Ok::<_, Infallible>(update_event(&update)));
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}
