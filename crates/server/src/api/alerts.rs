//! Alert listing, aggregates and operator actions.

use std::str::FromStr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use netpulse_alerts::{AlertAction, AlertAggregate, AlertQuery};
use netpulse_core::{Alert, NetpulseError};

use crate::state::AppState;

use super::error::ApiResult;

/// Query string for `/alerts` and `/alerts/aggregate`.
///
/// `status` and `severity` take comma-separated lists. Without `status`
/// the open statuses are shown and resolved alerts are hidden.
#[derive(Debug, Default, Deserialize)]
pub struct AlertParams {
    pub status: Option<String>,
    pub severity: Option<String>,
    pub category: Option<String>,
    pub device: Option<String>,
    pub q: Option<String>,
    pub connector_id: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

fn parse_list<T: FromStr<Err = NetpulseError>>(raw: Option<&str>) -> Result<Vec<T>, NetpulseError> {
    raw.unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(T::from_str)
        .collect()
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl AlertParams {
    fn into_query(self) -> Result<AlertQuery, NetpulseError> {
        Ok(AlertQuery {
            statuses: parse_list(self.status.as_deref())?,
            severities: parse_list(self.severity.as_deref())?,
            category: non_empty(self.category),
            device: non_empty(self.device),
            text: non_empty(self.q),
            connector_id: non_empty(self.connector_id),
            page: self.page.unwrap_or(1),
            page_size: self.page_size.unwrap_or_default(),
        })
    }
}

#[derive(Serialize)]
pub struct AlertListResponse {
    pub items: Vec<Alert>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub aggregate: AlertAggregate,
}

/// Filtered, paged alert list with aggregates over the same filter.
pub async fn alerts_list(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertParams>,
) -> ApiResult<Json<AlertListResponse>> {
    let query = params.into_query()?;
    let page = state.alerts.query(&query)?;
    let aggregate = state.alerts.aggregate(&query)?;
    Ok(Json(AlertListResponse {
        items: page.items,
        total: page.total,
        page: page.page,
        page_size: page.page_size,
        aggregate,
    }))
}

pub async fn alerts_aggregate(
    State(state): State<Arc<AppState>>,
    Query(params): Query<AlertParams>,
) -> ApiResult<Json<AlertAggregate>> {
    let query = params.into_query()?;
    Ok(Json(state.alerts.aggregate(&query)?))
}

fn parse_alert_id(raw: &str) -> Result<Uuid, NetpulseError> {
    Uuid::parse_str(raw).map_err(|_| NetpulseError::Validation(format!("invalid alert id '{}'", raw)))
}

pub async fn alerts_get(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Alert>> {
    let id = parse_alert_id(&id)?;
    Ok(Json(state.alerts.get(id)?))
}

#[derive(Debug, Default, Deserialize)]
struct ActionBody {
    until: Option<DateTime<Utc>>,
}

/// `POST /alerts/{id}/{action}`. The body is optional; `suppress` reads
/// `{"until": <RFC 3339>}` from it for a time-boxed suppression.
pub async fn alerts_action(
    State(state): State<Arc<AppState>>,
    Path((id, action)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Json<Alert>> {
    let id = parse_alert_id(&id)?;
    let body: ActionBody = if body.iter().all(u8::is_ascii_whitespace) {
        ActionBody::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| NetpulseError::Validation(format!("invalid action body: {}", e)))?
    };
    let action = AlertAction::parse(&action, body.until)?;
    Ok(Json(state.alerts.apply(id, action)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use netpulse_core::{AlertStatus, Severity};

    #[test]
    fn params_parse_comma_lists() {
        let params = AlertParams {
            status: Some("active, resolved".into()),
            severity: Some("CRITICAL,major".into()),
            q: Some("  ".into()),
            ..Default::default()
        };
        let query = params.into_query().unwrap();
        assert_eq!(query.statuses, vec![AlertStatus::Active, AlertStatus::Resolved]);
        assert_eq!(query.severities, vec![Severity::Critical, Severity::Major]);
        assert!(query.text.is_none());
        assert_eq!(query.page, 1);
    }

    #[test]
    fn unknown_status_is_a_validation_error() {
        let params = AlertParams {
            status: Some("open".into()),
            ..Default::default()
        };
        assert!(matches!(params.into_query(), Err(NetpulseError::Validation(_))));
    }
}
