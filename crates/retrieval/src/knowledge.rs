//! Knowledge service
//!
//! Grounded-context retrieval for the answer endpoint. Resolves the query
//! scope first: ambiguous clause-only questions short-circuit with a
//! clarification message instead of retrieving from the wrong standard.
//! No prose is generated here; callers synthesize answers downstream.

use std::sync::Arc;

use serde_json::Value;

use evidence_core::{
    extract_row, ApiError, GroundedContext, HybridRetrievalRequest, RerankOptions, RetrievalItem,
};

use crate::service::{HybridRunOptions, RetrievalContractService};

/// Default number of context chunks.
const DEFAULT_CONTEXT_K: usize = 8;

/// Application service for grounded knowledge retrieval.
pub struct KnowledgeService {
    service: Arc<RetrievalContractService>,
}

impl KnowledgeService {
    pub fn new(service: Arc<RetrievalContractService>) -> Self {
        Self { service }
    }

    /// Retrieve grounded context for a query within a tenant.
    pub async fn grounded_context(
        &self,
        query: &str,
        tenant_id: &str,
        k: Option<usize>,
    ) -> Result<GroundedContext, ApiError> {
        let resolution = self.service.resolver().resolve(query);
        tracing::info!(
            tenant_id = %tenant_id,
            query_preview = %preview(query),
            requested_scopes = ?resolution.requested_standards,
            requires_scope_clarification = resolution.requires_scope_clarification,
            "scope_resolution"
        );

        if resolution.requires_scope_clarification {
            let suggested = resolution.suggested_scopes.join(", ");
            tracing::info!(
                tenant_id = %tenant_id,
                scope_candidates = ?resolution.suggested_scopes,
                "scope_clarification_required"
            );
            return Ok(GroundedContext {
                context_chunks: Vec::new(),
                citations: Vec::new(),
                mode: "AMBIGUOUS_SCOPE".to_string(),
                requires_scope_clarification: true,
                scope_candidates: resolution.suggested_scopes,
                scope_message: Some(format!(
                    "Necesito desambiguar la norma objetivo antes de responder con trazabilidad. \
                     Sugeridas: {suggested}."
                )),
                requested_scopes: Vec::new(),
                scope_mismatch_detected: false,
            });
        }

        let mut filters = evidence_core::Metadata::new();
        if !resolution.requested_standards.is_empty() {
            filters.insert(
                "source_standards".into(),
                serde_json::json!(resolution.requested_standards),
            );
        }

        let response = self
            .service
            .run_hybrid(
                &HybridRetrievalRequest {
                    query: query.to_string(),
                    tenant_id: tenant_id.to_string(),
                    collection_id: None,
                    k: k.unwrap_or(DEFAULT_CONTEXT_K).max(1),
                    fetch_k: k.unwrap_or(DEFAULT_CONTEXT_K).max(1) * 5,
                    filters: if filters.is_empty() {
                        None
                    } else {
                        Some(filters)
                    },
                    rerank: Some(RerankOptions { enabled: true }),
                    graph: None,
                    retrieval_plan: None,
                },
                HybridRunOptions::default(),
            )
            .await?;

        // Scope post-filter: when the caller asked for specific standards
        // and every result resolves to a different one, keep the results
        // but flag the mismatch so downstream can hedge.
        let (items, scope_mismatch) =
            self.filter_items_by_scope(response.items, &resolution.requested_standards);
        if scope_mismatch {
            tracing::warn!(
                tenant_id = %tenant_id,
                requested_scopes = ?resolution.requested_standards,
                "scope_mismatch_detected"
            );
        }

        let context_chunks: Vec<String> = items
            .iter()
            .map(|item| item.content.clone())
            .filter(|content| !content.is_empty())
            .collect();
        let citations: Vec<String> = items
            .iter()
            .filter_map(|item| {
                extract_row(item)
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .collect();

        Ok(GroundedContext {
            context_chunks,
            citations,
            mode: "HYBRID".to_string(),
            requires_scope_clarification: false,
            scope_candidates: Vec::new(),
            scope_message: None,
            requested_scopes: resolution.requested_standards,
            scope_mismatch_detected: scope_mismatch,
        })
    }

    fn filter_items_by_scope(
        &self,
        items: Vec<RetrievalItem>,
        requested_standards: &[String],
    ) -> (Vec<RetrievalItem>, bool) {
        if requested_standards.is_empty() || items.is_empty() {
            return (items, false);
        }
        let requested_upper: Vec<String> = requested_standards
            .iter()
            .map(|s| s.to_uppercase())
            .collect();
        let resolver = self.service.resolver();

        let filtered: Vec<RetrievalItem> = items
            .iter()
            .filter(|item| {
                let scope = resolver.extract_item_scope(extract_row(item)).to_uppercase();
                !scope.is_empty() && requested_upper.iter().any(|r| scope.contains(r.as_str()))
            })
            .cloned()
            .collect();

        if filtered.is_empty() {
            (items, true)
        } else {
            (filtered, false)
        }
    }
}

fn preview(query: &str) -> String {
    query.chars().take(80).collect()
}
