//! Mapping from the domain error taxonomy onto HTTP responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use netpulse_core::NetpulseError;

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Handler error: a [`NetpulseError`] rendered as `{"error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub NetpulseError);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            NetpulseError::NotFound(_) => StatusCode::NOT_FOUND,
            NetpulseError::Conflict(_)
            | NetpulseError::AlreadyTerminal(_)
            | NetpulseError::InvalidTransition { .. } => StatusCode::CONFLICT,
            NetpulseError::Validation(_) => StatusCode::BAD_REQUEST,
            NetpulseError::Backpressure { .. } => StatusCode::SERVICE_UNAVAILABLE,
            NetpulseError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            NetpulseError::Driver(_) => StatusCode::BAD_GATEWAY,
            NetpulseError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<NetpulseError> for ApiError {
    fn from(e: NetpulseError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorResponse { error: self.0.to_string() })).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
