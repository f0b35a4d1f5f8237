//! Explain path
//!
//! Runs the hybrid contract and decomposes the top results: score
//! components, retrieval path and which request filters each item
//! actually matched.

use serde_json::Value;

use evidence_core::{
    extract_row, finite_or_none, ApiError, ExplainRetrievalRequest,
    ExplainRetrievalResponse, ExplainedItemDetails, ExplainedRetrievalItem, HybridRetrievalRequest,
    MatchedFilters, RetrievalPath, ScoreComponents, ValidateScopeRequest,
};

use crate::service::{HybridRunOptions, RetrievalContractService};
use crate::validate::{filters_from_normalized_scope, matches_time_range, metadata_keys_matched};

impl RetrievalContractService {
    /// Run hybrid retrieval and explain the top `top_n` items.
    pub async fn run_explain(
        &self,
        request: &ExplainRetrievalRequest,
    ) -> Result<ExplainRetrievalResponse, ApiError> {
        let hybrid = self
            .run_hybrid(
                &HybridRetrievalRequest {
                    query: request.query.clone(),
                    tenant_id: request.tenant_id.clone(),
                    collection_id: request.collection_id.clone(),
                    k: request.k,
                    fetch_k: request.fetch_k,
                    filters: request.filters.clone(),
                    rerank: request.rerank.clone(),
                    graph: request.graph.clone(),
                    retrieval_plan: None,
                },
                HybridRunOptions::default(),
            )
            .await?;

        let top_n = request.top_n.max(1);

        // Normalized filters for per-item match reporting. The hybrid run
        // already proved the filters valid.
        let validated = self.validate_scope(&ValidateScopeRequest {
            query: request.query.clone(),
            tenant_id: request.tenant_id.clone(),
            collection_id: request.collection_id.clone(),
            filters: request.filters.clone(),
        });
        let normalized_filters = filters_from_normalized_scope(&validated.normalized_scope);

        let mut explain_items = Vec::with_capacity(top_n.min(hybrid.items.len()));
        for item in hybrid.items.iter().take(top_n) {
            let row = extract_row(item);
            let base_similarity = finite_or_none(row.get("similarity"))
                .or_else(|| finite_or_none(row.get("score")))
                .unwrap_or(item.score);
            let jina_score = finite_or_none(row.get("jina_relevance_score"))
                .or_else(|| finite_or_none(item.metadata.get("jina_relevance_score")))
                .filter(|score| *score != 0.0);

            let collection_id_match = request.collection_id.as_deref().map(|requested| {
                let row_collection = row
                    .get("collection_id")
                    .and_then(Value::as_str)
                    .or_else(|| match row.get("metadata") {
                        Some(Value::Object(meta)) => {
                            meta.get("collection_id").and_then(Value::as_str)
                        }
                        _ => None,
                    })
                    .unwrap_or_default();
                row_collection == requested
            });

            explain_items.push(ExplainedRetrievalItem {
                source: item.source.clone(),
                content: item.content.clone(),
                score: if item.score.is_finite() { item.score } else { 0.0 },
                metadata: item.metadata.clone(),
                explain: ExplainedItemDetails {
                    score_components: ScoreComponents {
                        base_similarity,
                        jina_relevance_score: jina_score,
                        final_score: item.score,
                        scope_penalized: row
                            .get("scope_penalized")
                            .and_then(Value::as_bool)
                            .unwrap_or(false),
                        scope_penalty_ratio: finite_or_none(row.get("scope_penalty")),
                    },
                    retrieval_path: RetrievalPath {
                        source_layer: str_field(row, "source_layer"),
                        source_type: str_field(row, "source_type"),
                    },
                    matched_filters: MatchedFilters {
                        collection_id_match,
                        time_range_match: matches_time_range(
                            row,
                            normalized_filters.time_range.as_ref(),
                        ),
                        metadata_keys_matched: metadata_keys_matched(
                            row,
                            normalized_filters.metadata.as_ref(),
                        ),
                    },
                },
            });
        }

        Ok(ExplainRetrievalResponse {
            items: explain_items,
            trace: hybrid.trace,
            top_n,
        })
    }
}

fn str_field(row: &evidence_core::Metadata, key: &str) -> String {
    row.get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}
