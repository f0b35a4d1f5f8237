//! Error types
//!
//! Every failure that crosses the HTTP boundary is an [`ApiError`] with a
//! stable SCREAMING_SNAKE code and an HTTP status. Internal crates define
//! their own `thiserror` enums and convert into `ApiError` at the edge.

use serde_json::Value;
use thiserror::Error;

/// Convenience result alias for fallible core operations.
pub type Result<T> = std::result::Result<T, ApiError>;

/// Coded error carried across the service boundary.
///
/// `code` values are stable contract: callers branch on them.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct ApiError {
    /// HTTP status to surface (400, 401, 500, 502, ...)
    pub status: u16,
    /// Stable SCREAMING_SNAKE error code
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional structured details (violation lists, subquery records, ...)
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(status: u16, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// 400 validation failure.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(400, code, message)
    }

    /// 401 authorization failure (fail closed).
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(401, "UNAUTHORIZED", message)
    }

    /// 502 upstream availability failure.
    pub fn unavailable(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(502, code, message)
    }

    /// 500 internal failure.
    pub fn internal(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(500, code, message)
    }
}

impl From<SecurityViolation> for ApiError {
    fn from(err: SecurityViolation) -> Self {
        ApiError::internal(
            "SECURITY_ISOLATION_BREACH",
            "Security isolation validation failed",
        )
        .with_details(Value::String(err.to_string()))
    }
}

/// Raised when the leak canary detects cross-tenant data or a document
/// without ownership metadata. Fatal: never recovered, always logged at
/// error level before propagation.
#[derive(Debug, Clone, Error)]
pub enum SecurityViolation {
    #[error("data integrity failure: document {doc_id} missing ownership metadata")]
    MissingOwnership { doc_id: String },

    #[error("cross-tenant data leak detected: document {doc_id} belongs to {doc_tenant}, requester is {requester}")]
    CrossTenantLeak {
        doc_id: String,
        doc_tenant: String,
        requester: String,
    },

    #[error("missing tenant id for isolation verification")]
    MissingRequester,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_display() {
        let err = ApiError::validation("SCOPE_VALIDATION_FAILED", "Scope validation failed");
        assert_eq!(err.status, 400);
        assert_eq!(
            err.to_string(),
            "SCOPE_VALIDATION_FAILED: Scope validation failed"
        );
    }

    #[test]
    fn test_security_violation_maps_to_breach_code() {
        let err: ApiError = SecurityViolation::MissingRequester.into();
        assert_eq!(err.status, 500);
        assert_eq!(err.code, "SECURITY_ISOLATION_BREACH");
    }
}
