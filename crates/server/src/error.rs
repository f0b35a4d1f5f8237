//! Error envelope
//!
//! Every error leaving the HTTP surface has the shape
//! `{ "error": { code, message, details, request_id } }` with the status
//! carried by the response.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::{json, Value};

use evidence_core::ApiError;

/// An [`ApiError`] bound to the request's correlation id.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub error: ApiError,
    pub request_id: String,
}

impl ErrorResponse {
    pub fn new(error: ApiError, request_id: impl Into<String>) -> Self {
        Self {
            error,
            request_id: request_id.into(),
        }
    }

    fn body(&self) -> Value {
        json!({
            "error": {
                "code": self.error.code,
                "message": self.error.message,
                "details": self.error.details,
                "request_id": self.request_id,
            }
        })
    }
}

impl IntoResponse for ErrorResponse {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.error.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(
                code = %self.error.code,
                request_id = %self.request_id,
                "request failed: {}",
                self.error.message
            );
        }
        (status, Json(self.body())).into_response()
    }
}
