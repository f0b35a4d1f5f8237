//! Request middleware
//!
//! Three layers, applied outermost first:
//! - correlation: propagate `X-Correlation-ID`, generating one if absent
//! - tenant: `X-Tenant-ID` mandatory and well-formed on non-public paths
//! - service auth: bearer secret on retrieval endpoints in deployed
//!   environments, failing closed on misconfiguration

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use parking_lot::RwLock;
use uuid::Uuid;

use evidence_config::Settings;
use evidence_core::{validate_tenant_id, ApiError};

use crate::error::ErrorResponse;
use crate::state::AppState;

pub const TENANT_ID_HEADER: &str = "x-tenant-id";
pub const CORRELATION_ID_HEADER: &str = "x-correlation-id";

/// Per-request business context extracted by the middleware stack.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub tenant_id: String,
    pub correlation_id: String,
}

fn is_public_path(config: &Arc<RwLock<Settings>>, path: &str) -> bool {
    let config = config.read();
    config
        .server
        .public_paths
        .iter()
        .any(|p| path.starts_with(p.as_str()))
}

/// Propagate or generate the correlation id and echo it on the response.
pub async fn correlation_middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = correlation_id.parse() {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// Correlation id as a request extension.
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

pub(crate) fn correlation_id(request: &Request) -> String {
    request
        .extensions()
        .get::<CorrelationId>()
        .map(|c| c.0.clone())
        .unwrap_or_default()
}

/// Extract and validate the tenant header, binding a [`RequestContext`].
pub async fn tenant_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_public_path(&state.config, &path) {
        return next.run(request).await;
    }

    let request_id = correlation_id(&request);
    let tenant_raw = request
        .headers()
        .get(TENANT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .unwrap_or_default()
        .to_string();

    if tenant_raw.is_empty() {
        return ErrorResponse::new(
            ApiError::validation("TENANT_HEADER_REQUIRED", "Missing tenant context"),
            request_id,
        )
        .into_response();
    }
    if !validate_tenant_id(&tenant_raw) {
        return ErrorResponse::new(
            ApiError::validation("INVALID_TENANT_HEADER", "Invalid tenant context"),
            request_id,
        )
        .into_response();
    }

    tracing::debug!(
        tenant_id = %tenant_raw,
        request_path = %path,
        "business_context_bound"
    );
    request.extensions_mut().insert(RequestContext {
        tenant_id: tenant_raw,
        correlation_id: request_id,
    });
    next.run(request).await
}

/// Bearer-secret check for deployed environments.
///
/// Development runs open; deployed environments require the configured
/// secret and fail closed when it is missing.
pub async fn service_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();
    if is_public_path(&state.config, &path) {
        return next.run(request).await;
    }

    let (deployed, expected) = {
        let config = state.config.read();
        (
            config.environment.is_deployed(),
            config.server.service_secret.clone(),
        )
    };
    if !deployed {
        return next.run(request).await;
    }

    let request_id = correlation_id(&request);
    let Some(expected) = expected.filter(|s| !s.is_empty()) else {
        // Enabled auth with no secret is a deployment bug: fail closed.
        tracing::error!("service auth required but no secret configured");
        return ErrorResponse::new(
            ApiError::internal(
                "AUTH_ENV_INCONSISTENT",
                "Service authentication is required but not configured",
            ),
            request_id,
        )
        .into_response();
    };

    let provided = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if !constant_time_compare(provided.as_bytes(), expected.as_bytes()) {
        return ErrorResponse::new(
            ApiError::unauthorized("Missing or invalid service credentials"),
            request_id,
        )
        .into_response();
    }
    next.run(request).await
}

/// Body tenant must equal the authenticated header tenant.
pub fn enforce_tenant_match(
    context: &RequestContext,
    body_tenant_id: &str,
    field: &str,
) -> Result<String, ErrorResponse> {
    let body_tenant = body_tenant_id.trim();
    if body_tenant.is_empty() {
        return Err(ErrorResponse::new(
            ApiError::validation("TENANT_HEADER_REQUIRED", format!("{field} is required")),
            context.correlation_id.clone(),
        ));
    }
    if body_tenant != context.tenant_id {
        return Err(ErrorResponse::new(
            ApiError::validation(
                "TENANT_MISMATCH",
                format!("{field} does not match the authenticated tenant"),
            ),
            context.correlation_id.clone(),
        ));
    }
    Ok(body_tenant.to_string())
}

/// Constant-time comparison to prevent timing attacks
fn constant_time_compare(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}
