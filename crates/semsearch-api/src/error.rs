//! API error type and JSON error body.
//!
//! Backend failures map to 503 and load failures to 422, so a client can
//! tell them apart from a query that simply matched nothing (200, empty
//! hits).

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use semsearch_core::SearchError;
use serde::Serialize;

/// JSON error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Machine-readable error code (e.g., "bad_request").
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

#[derive(Debug)]
pub enum ApiError {
    /// 400 - invalid request or configuration.
    BadRequest(String),
    /// 422 - a source could not be loaded.
    UnprocessableEntity {
        message: String,
        details: Option<serde_json::Value>,
    },
    /// 500
    Internal(String),
    /// 503 - vector backend unreachable or deadline exceeded.
    ServiceUnavailable(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::UnprocessableEntity { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error_code, message, details) = match self {
            ApiError::BadRequest(msg) => ("bad_request", msg, None),
            ApiError::UnprocessableEntity { message, details } => {
                ("unprocessable_entity", message, details)
            }
            ApiError::Internal(msg) => ("internal_error", msg, None),
            ApiError::ServiceUnavailable(msg) => ("service_unavailable", msg, None),
        };
        if status.is_server_error() {
            tracing::error!(status = status.as_u16(), %message, "Request failed");
        }

        let body = ErrorBody {
            error: error_code.to_string(),
            message,
            details,
        };
        (status, Json(body)).into_response()
    }
}

impl From<SearchError> for ApiError {
    fn from(err: SearchError) -> Self {
        if err.is_backend_failure() {
            return ApiError::ServiceUnavailable(err.to_string());
        }
        match &err {
            SearchError::LoadFailure { origin, .. } => ApiError::UnprocessableEntity {
                details: Some(serde_json::json!({ "source": origin })),
                message: err.to_string(),
            },
            SearchError::Config(_) => ApiError::BadRequest(err.to_string()),
            _ => ApiError::Internal(err.to_string()),
        }
    }
}
