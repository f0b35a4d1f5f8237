//! HTTP endpoints
//!
//! REST surface of the retrieval engine. Every retrieval endpoint is
//! tenant-scoped: the middleware binds the authenticated tenant and the
//! handlers verify the body agrees before any retrieval runs.

use axum::extract::{Json, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::routing::{get, post};
use axum::{Extension, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use evidence_core::{
    AnswerRequest, ApiError, ComprehensiveRetrievalRequest, ComprehensiveRetrievalResponse,
    ExplainRetrievalRequest, ExplainRetrievalResponse, GroundedContext, HybridRetrievalRequest,
    HybridRetrievalResponse, MultiQueryRetrievalRequest, MultiQueryRetrievalResponse,
    SummaryRetrievalRequest, SummaryRetrievalResponse, ValidateScopeRequest,
    ValidateScopeResponse,
};

use crate::auth::{
    correlation_middleware, enforce_tenant_match, service_auth_middleware, tenant_middleware,
    RequestContext,
};
use crate::error::ErrorResponse;
use crate::metrics::{metrics_handler, names};
use crate::state::AppState;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.read();
    let cors_layer = build_cors_layer(&config.server.cors_origins, config.server.cors_enabled);
    drop(config);

    Router::new()
        // Retrieval contract endpoints
        .route("/retrieval/validate-scope", post(validate_scope))
        .route("/retrieval/hybrid", post(hybrid))
        .route("/retrieval/multi-query", post(multi_query))
        .route("/retrieval/comprehensive", post(comprehensive))
        .route("/retrieval/explain", post(explain))
        .route("/retrieval/summaries", post(summaries))
        // Knowledge endpoint
        .route("/knowledge/answer", post(knowledge_answer))
        // Health and metrics
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        // Middleware (innermost first: tenant binding runs closest to the
        // handlers, correlation wraps everything)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            tenant_middleware,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            service_auth_middleware,
        ))
        .layer(axum::middleware::from_fn(correlation_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        return CorsLayer::new();
    }
    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();
    if parsed_origins.is_empty() {
        tracing::warn!("CORS enabled without valid origins, allowing none");
        return CorsLayer::new();
    }
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

fn track_outcome(endpoint: &'static str, error: Option<&ApiError>) {
    metrics::counter!(names::RETRIEVAL_REQUESTS, "endpoint" => endpoint).increment(1);
    if let Some(error) = error {
        metrics::counter!(
            names::RETRIEVAL_ERRORS,
            "endpoint" => endpoint,
            "code" => error.code.clone()
        )
        .increment(1);
        if error.code == "SECURITY_ISOLATION_BREACH" {
            metrics::counter!(names::ISOLATION_BREACHES, "endpoint" => endpoint).increment(1);
        }
    }
}

fn to_error(
    endpoint: &'static str,
    context: &RequestContext,
    error: ApiError,
) -> ErrorResponse {
    track_outcome(endpoint, Some(&error));
    ErrorResponse::new(error, context.correlation_id.clone())
}

/// Validate scope filters without retrieving.
async fn validate_scope(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<ValidateScopeRequest>,
) -> Result<Json<ValidateScopeResponse>, ErrorResponse> {
    enforce_tenant_match(&context, &request.tenant_id, "body.tenant_id")?;
    track_outcome("validate_scope", None);
    Ok(Json(state.service.validate_scope(&request)))
}

/// Single-query hybrid retrieval.
async fn hybrid(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<HybridRetrievalRequest>,
) -> Result<Json<HybridRetrievalResponse>, ErrorResponse> {
    enforce_tenant_match(&context, &request.tenant_id, "body.tenant_id")?;
    match state.service.run_hybrid(&request, Default::default()).await {
        Ok(response) => {
            track_outcome("hybrid", None);
            Ok(Json(response))
        }
        Err(err) => Err(to_error("hybrid", &context, err)),
    }
}

/// Multi-query fan-out with RRF merge.
async fn multi_query(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<MultiQueryRetrievalRequest>,
) -> Result<Json<MultiQueryRetrievalResponse>, ErrorResponse> {
    enforce_tenant_match(&context, &request.tenant_id, "body.tenant_id")?;
    match state.service.run_multi_query(&request).await {
        Ok(response) => {
            track_outcome("multi_query", None);
            Ok(Json(response))
        }
        Err(err) => Err(to_error("multi_query", &context, err)),
    }
}

/// Three-layer comprehensive retrieval with late fusion.
async fn comprehensive(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<ComprehensiveRetrievalRequest>,
) -> Result<Json<ComprehensiveRetrievalResponse>, ErrorResponse> {
    enforce_tenant_match(&context, &request.tenant_id, "body.tenant_id")?;
    match state.service.run_comprehensive(&request).await {
        Ok(response) => {
            track_outcome("comprehensive", None);
            Ok(Json(response))
        }
        Err(err) => Err(to_error("comprehensive", &context, err)),
    }
}

/// Hybrid retrieval with per-item score decomposition.
async fn explain(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<ExplainRetrievalRequest>,
) -> Result<Json<ExplainRetrievalResponse>, ErrorResponse> {
    enforce_tenant_match(&context, &request.tenant_id, "body.tenant_id")?;
    match state.service.run_explain(&request).await {
        Ok(response) => {
            track_outcome("explain", None);
            Ok(Json(response))
        }
        Err(err) => Err(to_error("explain", &context, err)),
    }
}

/// Summary-layer retrieval with optional leaf-chunk hydration.
async fn summaries(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<SummaryRetrievalRequest>,
) -> Result<Json<SummaryRetrievalResponse>, ErrorResponse> {
    enforce_tenant_match(&context, &request.tenant_id, "body.tenant_id")?;
    match state.service.run_summaries(&request).await {
        Ok(response) => {
            track_outcome("summaries", None);
            Ok(Json(response))
        }
        Err(err) => Err(to_error("summaries", &context, err)),
    }
}

/// Grounded context for answer synthesis.
async fn knowledge_answer(
    State(state): State<AppState>,
    Extension(context): Extension<RequestContext>,
    Json(request): Json<AnswerRequest>,
) -> Result<Json<GroundedContext>, ErrorResponse> {
    let tenant_id = enforce_tenant_match(&context, &request.tenant_id, "tenant_id")?;
    match state
        .knowledge
        .grounded_context(&request.query, &tenant_id, request.k)
        .await
    {
        Ok(response) => {
            track_outcome("knowledge_answer", None);
            Ok(Json(response))
        }
        Err(err) => Err(to_error("knowledge_answer", &context, err)),
    }
}

/// Health check: configuration sanity plus embedding cache visibility.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let config = state.get_config();
    let cache = state.service.embeddings().cache_stats();

    let config_ok = config.validate().is_ok();
    let status = if config_ok { "healthy" } else { "degraded" };
    let status_code = if config_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(json!({
            "status": status,
            "version": env!("CARGO_PKG_VERSION"),
            "checks": {
                "config": if config_ok { "ok" } else { "invalid" },
                "embedding_cache": {
                    "entries": cache.len,
                    "hits": cache.hits,
                    "misses": cache.misses,
                },
            },
        })),
    )
}
