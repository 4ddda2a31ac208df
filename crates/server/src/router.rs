//! HTTP router construction.

use std::sync::Arc;

use axum::http::HeaderValue;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::api;
use crate::state::AppState;

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origin == "*" {
        return layer.allow_origin(Any);
    }
    match HeaderValue::from_str(origin) {
        Ok(value) => layer.allow_origin(value),
        Err(_) => {
            warn!(origin, "Invalid CORS_ORIGIN, allowing any origin");
            layer.allow_origin(Any)
        }
    }
}

/// Build the complete application router with all routes and middleware.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config.server.cors_origin);

    Router::new()
        .route("/health", get(api::health))
        .route("/config", get(api::config_summary))
        .route("/queue/status", get(api::queue_status))
        .route("/scheduler/metrics", get(api::scheduler_metrics))
        // Connectors
        .route("/connectors", get(api::connectors_list))
        .route(
            "/connectors/{id}",
            get(api::connectors_get)
                .put(api::connectors_put)
                .delete(api::connectors_delete),
        )
        .route("/connectors/{id}/poll", post(api::connectors_poll))
        // Executions
        .route("/executions", get(api::executions_list))
        .route("/executions/{id}", get(api::executions_get))
        .route("/executions/{id}/cancel", post(api::executions_cancel))
        .route("/executions/{id}/stream", get(api::executions_stream))
        // Scheduled jobs
        .route("/jobs", get(api::jobs_list))
        .route("/jobs/{name}/toggle", post(api::jobs_toggle))
        .route("/jobs/{name}/run", post(api::jobs_run))
        // Alerts: /aggregate MUST precede /{id} so it is not captured as an id
        .route("/alerts", get(api::alerts_list))
        .route("/alerts/aggregate", get(api::alerts_aggregate))
        .route("/alerts/{id}", get(api::alerts_get))
        .route("/alerts/{id}/{action}", post(api::alerts_action))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
