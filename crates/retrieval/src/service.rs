//! Retrieval contract service
//!
//! The long-lived service owning the ports and the query-side
//! collaborators. Constructed once at startup; no cross-request mutable
//! state lives here, so a single instance serves every request
//! concurrently.

use std::sync::Arc;

use serde_json::{json, Value};

use evidence_config::{RetrievalSettings, Settings};
use evidence_core::{
    ApiError, Metadata, Reranker, RetrievalRepository, ValidateScopeRequest,
    ValidateScopeResponse,
};

use crate::embedding::EmbeddingService;
use crate::plan::QueryPlanner;
use crate::repository::HttpRetrievalRepository;
use crate::reranker::{RemoteReranker, RerankerConfig};
use crate::scope::ScopeResolver;
use crate::validate::ScopeValidator;

/// Options threaded through internal hybrid invocations.
#[derive(Debug, Clone, Copy, Default)]
pub struct HybridRunOptions {
    /// Skip intent planning (multi-query sub-queries plan at the top).
    pub skip_planner: bool,
    /// Skip the external cross-encoder pass.
    pub skip_external_rerank: bool,
}

/// The retrieval contract service.
pub struct RetrievalContractService {
    pub(crate) repository: Arc<dyn RetrievalRepository>,
    pub(crate) embeddings: Arc<EmbeddingService>,
    pub(crate) reranker: Arc<dyn Reranker>,
    pub(crate) validator: ScopeValidator,
    pub(crate) planner: QueryPlanner,
    pub(crate) settings: RetrievalSettings,
}

impl RetrievalContractService {
    pub fn new(
        repository: Arc<dyn RetrievalRepository>,
        embeddings: Arc<EmbeddingService>,
        reranker: Arc<dyn Reranker>,
        resolver: ScopeResolver,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            repository,
            embeddings,
            reranker,
            validator: ScopeValidator::new(resolver.clone()),
            planner: QueryPlanner::new(resolver),
            settings,
        }
    }

    /// Wire the service from settings with the shipped HTTP port
    /// implementations.
    pub fn from_settings(settings: &Settings) -> Self {
        let repository = Arc::new(HttpRetrievalRepository::new(&settings.repository));
        let embeddings = Arc::new(EmbeddingService::from_settings(
            &settings.embedding,
            settings.environment,
        ));
        let reranker = Arc::new(RemoteReranker::new(RerankerConfig {
            api_key: settings.embedding.api_key.clone().unwrap_or_default(),
            min_relevance_score: settings.retrieval.rerank_min_relevance_score,
            ..RerankerConfig::default()
        }));
        Self::new(
            repository,
            embeddings,
            reranker,
            ScopeResolver::default(),
            settings.retrieval.clone(),
        )
    }

    pub fn resolver(&self) -> &ScopeResolver {
        self.validator.resolver()
    }

    pub fn embeddings(&self) -> &Arc<EmbeddingService> {
        &self.embeddings
    }

    /// Validate a request's scope without retrieving.
    pub fn validate_scope(&self, request: &ValidateScopeRequest) -> ValidateScopeResponse {
        self.validator.validate(request)
    }

    pub(crate) fn validate_request_parts(
        &self,
        query: &str,
        tenant_id: &str,
        collection_id: Option<&str>,
        filters: Option<&Metadata>,
    ) -> ValidateScopeResponse {
        self.validator.validate(&ValidateScopeRequest {
            query: query.to_string(),
            tenant_id: tenant_id.to_string(),
            collection_id: collection_id.map(str::to_string),
            filters: filters.cloned(),
        })
    }

    /// Scope validation failures become the 400 contract error.
    pub(crate) fn scope_validation_error(validated: &ValidateScopeResponse) -> ApiError {
        ApiError::validation("SCOPE_VALIDATION_FAILED", "Scope validation failed").with_details(
            json!({
                "violations": validated.violations,
            }),
        )
    }

    /// Build the scope context forwarded to the repository from a
    /// validated response.
    pub(crate) fn build_scope_context(
        validated: &ValidateScopeResponse,
        collection_id: Option<&str>,
    ) -> Metadata {
        let normalized = &validated.normalized_scope;
        let tenant_id = normalized
            .get("tenant_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        let mut filters = Metadata::new();
        let normalized_filters = normalized.get("filters").and_then(Value::as_object);

        let mut scope_context = Metadata::new();
        scope_context.insert("type".into(), json!("institutional"));
        scope_context.insert("tenant_id".into(), json!(tenant_id));

        if let Some(collection) = collection_id {
            filters.insert("collection_id".into(), json!(collection));
            scope_context.insert("collection_id".into(), json!(collection));
        }

        if let Some(normalized_filters) = normalized_filters {
            if let Some(Value::Object(metadata)) = normalized_filters.get("metadata") {
                if !metadata.is_empty() {
                    filters.insert("metadata".into(), Value::Object(metadata.clone()));
                }
            }
            if let Some(time_range @ Value::Object(_)) = normalized_filters.get("time_range") {
                filters.insert("time_range".into(), time_range.clone());
            }
            if let Some(Value::Array(standards)) = normalized_filters.get("source_standards") {
                if !standards.is_empty() {
                    filters.insert("source_standards".into(), json!(standards));
                    scope_context.insert("source_standards".into(), json!(standards));
                }
            }
            if let Some(Value::String(standard)) = normalized_filters.get("source_standard") {
                if !standard.is_empty() {
                    filters.insert("source_standard".into(), json!(standard));
                    scope_context.insert("source_standard".into(), json!(standard));
                }
            }
        }

        scope_context.insert("filters".into(), Value::Object(filters));
        scope_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_build_scope_context_carries_normalized_filters() {
        let validator = ScopeValidator::default();
        let validated = validator.validate(&ValidateScopeRequest {
            query: "auditoria ISO 9001".into(),
            tenant_id: "tenant-demo".into(),
            collection_id: Some("col-1".into()),
            filters: json!({"source_standards": ["iso 9001"], "metadata": {"lang": "es"}})
                .as_object()
                .cloned(),
        });
        assert!(validated.valid);

        let context =
            RetrievalContractService::build_scope_context(&validated, Some("col-1"));
        assert_eq!(context.get("type"), Some(&json!("institutional")));
        assert_eq!(context.get("tenant_id"), Some(&json!("tenant-demo")));
        assert_eq!(context.get("source_standard"), Some(&json!("ISO 9001")));

        let filters = context
            .get("filters")
            .and_then(Value::as_object)
            .expect("filters object");
        assert_eq!(filters.get("collection_id"), Some(&json!("col-1")));
        assert_eq!(filters.get("metadata"), Some(&json!({"lang": "es"})));
    }
}
