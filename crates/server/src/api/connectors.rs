//! Connector CRUD and manual polls.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use netpulse_core::{Connector, ConnectorInput, NetpulseError};
use netpulse_scheduler::Job;

use crate::state::AppState;

use super::error::ApiResult;

#[derive(Serialize)]
pub struct ConnectorView {
    #[serde(flatten)]
    pub connector: Connector,
    pub in_flight: bool,
}

fn view(state: &AppState, connector: Connector) -> ApiResult<ConnectorView> {
    let in_flight = state.registry.is_in_flight(&connector.id)?;
    Ok(ConnectorView { connector, in_flight })
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub enabled: Option<bool>,
}

pub async fn connectors_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> ApiResult<Json<Vec<ConnectorView>>> {
    let connectors = state.registry.list(params.enabled)?;
    let views = connectors
        .into_iter()
        .map(|c| view(&state, c))
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(views))
}

pub async fn connectors_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<ConnectorView>> {
    let connector = state.registry.get(&id)?;
    Ok(Json(view(&state, connector)?))
}

/// PUT body: a full definition (has `config`) or a bare `{"enabled": bool}`.
enum ConnectorUpdate {
    Full(ConnectorInput),
    Toggle(bool),
}

fn parse_update(body: Value) -> Result<ConnectorUpdate, NetpulseError> {
    if body.get("config").is_some() {
        return serde_json::from_value(body)
            .map(ConnectorUpdate::Full)
            .map_err(|e| NetpulseError::Validation(format!("invalid connector: {}", e)));
    }
    match body.get("enabled").and_then(Value::as_bool) {
        Some(enabled) => Ok(ConnectorUpdate::Toggle(enabled)),
        None => Err(NetpulseError::Validation(
            "expected a connector definition with `config` or an `enabled` flag".into(),
        )),
    }
}

pub async fn connectors_put(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<ConnectorView>)> {
    match parse_update(body)? {
        ConnectorUpdate::Full(input) => {
            let existed = state.registry.get(&id).is_ok();
            let connector = state.registry.upsert(&id, input)?;
            info!(connector_id = %id, created = !existed, "Connector saved");
            let status = if existed { StatusCode::OK } else { StatusCode::CREATED };
            Ok((status, Json(view(&state, connector)?)))
        }
        ConnectorUpdate::Toggle(enabled) => {
            let connector = state.registry.set_enabled(&id, enabled)?;
            info!(connector_id = %id, enabled, "Connector toggled");
            Ok((StatusCode::OK, Json(view(&state, connector)?)))
        }
    }
}

pub async fn connectors_delete(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.registry.remove(&id)?;
    info!(connector_id = %id, "Connector removed");
    Ok(StatusCode::NO_CONTENT)
}

/// "Poll now". 409 while a poll for the connector is queued or running.
pub async fn connectors_poll(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.dispatcher.poll_now(&id)?;
    Ok((StatusCode::ACCEPTED, Json(job)))
}
