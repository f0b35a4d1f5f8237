//! Request/response contracts for the retrieval HTTP surface
//!
//! Filter and option shapes are intentionally open at the wire: raw
//! `filters` arrive as a JSON map and are validated into typed structs by
//! the scope validator. Everything else is strongly typed here.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::item::{Metadata, RetrievalItem};
use crate::trace::{ComprehensiveTrace, HybridTrace, MultiQueryTrace, SubQueryExecution};

/// A single validation violation or warning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScopeIssue {
    pub code: String,
    pub field: String,
    pub message: String,
}

impl ScopeIssue {
    pub fn new(
        code: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code: code.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

/// What the scope resolver derived from the query text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryScopeSummary {
    #[serde(default)]
    pub requested_standards: Vec<String>,
    #[serde(default)]
    pub requires_scope_clarification: bool,
    #[serde(default)]
    pub suggested_scopes: Vec<String>,
}

/// Normalized time-range filter (ISO-8601 UTC bounds).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRangeFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    /// Row field the range applies to (defaults to `created_at`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// Reranker toggle and options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankOptions {
    pub enabled: bool,
}

impl Default for RerankOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Graph traversal options for the graph layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relation_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_hops: Option<u32>,
}

/// A query-expansion hint: when `term` appears in the query, append the
/// `expand_to` values that are not already present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHint {
    pub term: String,
    #[serde(default)]
    pub expand_to: Vec<String>,
}

/// Caller-supplied retrieval policy.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalPolicy {
    #[serde(default)]
    pub search_hints: Vec<SearchHint>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Structural-noise reduction toggle (on by default).
    #[serde(default = "default_true")]
    pub noise_reduction: bool,
    #[serde(default)]
    pub require_all_scopes: bool,
    #[serde(default)]
    pub min_clause_refs_required: usize,
}

fn default_true() -> bool {
    true
}

/// Intent classification mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanMode {
    LiteralList,
    LiteralNormative,
    Comparative,
    Explanatory,
    AmbiguousScope,
}

impl PlanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanMode::LiteralList => "literal_list",
            PlanMode::LiteralNormative => "literal_normative",
            PlanMode::Comparative => "comparative",
            PlanMode::Explanatory => "explanatory",
            PlanMode::AmbiguousScope => "ambiguous_scope",
        }
    }
}

/// Retrieval plan produced by intent classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub mode: PlanMode,
    pub chunk_k: usize,
    pub chunk_fetch_k: usize,
    pub summary_k: usize,
    pub require_literal_evidence: bool,
    #[serde(default)]
    pub requested_standards: Vec<String>,
}

fn default_k() -> usize {
    8
}

fn default_fetch_k() -> usize {
    40
}

/// Validate-scope request.
#[derive(Debug, Clone, Deserialize)]
pub struct ValidateScopeRequest {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    /// Raw, open filter map; validated into `NormalizedFilters`.
    #[serde(default)]
    pub filters: Option<Metadata>,
}

/// Validate-scope response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateScopeResponse {
    pub valid: bool,
    pub normalized_scope: Value,
    pub violations: Vec<ScopeIssue>,
    pub warnings: Vec<ScopeIssue>,
    pub query_scope: QueryScopeSummary,
}

/// Hybrid retrieval request.
#[derive(Debug, Clone, Deserialize)]
pub struct HybridRetrievalRequest {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default)]
    pub filters: Option<Metadata>,
    #[serde(default)]
    pub rerank: Option<RerankOptions>,
    #[serde(default)]
    pub graph: Option<GraphOptions>,
    #[serde(default)]
    pub retrieval_plan: Option<RetrievalPlan>,
}

/// Hybrid retrieval response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HybridRetrievalResponse {
    pub items: Vec<RetrievalItem>,
    pub trace: HybridTrace,
}

/// One sub-query inside a multi-query request.
#[derive(Debug, Clone, Deserialize)]
pub struct SubQueryRequest {
    pub id: String,
    pub query: String,
    #[serde(default)]
    pub k: Option<usize>,
    #[serde(default)]
    pub fetch_k: Option<usize>,
    #[serde(default)]
    pub filters: Option<Metadata>,
}

/// RRF merge options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeOptions {
    #[serde(default = "default_merge_strategy")]
    pub strategy: MergeStrategy,
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::Rrf,
            rrf_k: default_rrf_k(),
            top_k: default_top_k(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    Rrf,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::Rrf => "rrf",
        }
    }
}

fn default_merge_strategy() -> MergeStrategy {
    MergeStrategy::Rrf
}

fn default_rrf_k() -> u32 {
    60
}

fn default_top_k() -> usize {
    8
}

/// Multi-query retrieval request.
#[derive(Debug, Clone, Deserialize)]
pub struct MultiQueryRetrievalRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    pub queries: Vec<SubQueryRequest>,
    #[serde(default)]
    pub merge: MergeOptions,
}

/// Multi-query retrieval response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiQueryRetrievalResponse {
    pub items: Vec<RetrievalItem>,
    pub subqueries: Vec<SubQueryExecution>,
    pub partial: bool,
    pub trace: MultiQueryTrace,
}

/// Comprehensive (late fusion) retrieval request.
#[derive(Debug, Clone, Deserialize)]
pub struct ComprehensiveRetrievalRequest {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default)]
    pub filters: Option<Metadata>,
    #[serde(default)]
    pub graph: Option<GraphOptions>,
    #[serde(default)]
    pub retrieval_policy: Option<RetrievalPolicy>,
}

/// Comprehensive retrieval response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComprehensiveRetrievalResponse {
    pub items: Vec<RetrievalItem>,
    pub trace: ComprehensiveTrace,
    pub latency_ms: f64,
}

/// Explain request: hybrid inputs plus how many items to explain.
#[derive(Debug, Clone, Deserialize)]
pub struct ExplainRetrievalRequest {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default)]
    pub filters: Option<Metadata>,
    #[serde(default)]
    pub rerank: Option<RerankOptions>,
    #[serde(default)]
    pub graph: Option<GraphOptions>,
    #[serde(default = "default_top_n")]
    pub top_n: usize,
}

fn default_top_n() -> usize {
    5
}

/// Score decomposition for one explained item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreComponents {
    pub base_similarity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jina_relevance_score: Option<f64>,
    pub final_score: f64,
    pub scope_penalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_penalty_ratio: Option<f64>,
}

/// Which layer and row type produced an item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPath {
    pub source_layer: String,
    pub source_type: String,
}

/// Which request filters an item actually matched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchedFilters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id_match: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range_match: Option<bool>,
    #[serde(default)]
    pub metadata_keys_matched: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainedItemDetails {
    pub score_components: ScoreComponents,
    pub retrieval_path: RetrievalPath,
    pub matched_filters: MatchedFilters,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainedRetrievalItem {
    pub source: String,
    pub content: String,
    pub score: f64,
    pub metadata: Metadata,
    pub explain: ExplainedItemDetails,
}

/// Explain response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExplainRetrievalResponse {
    pub items: Vec<ExplainedRetrievalItem>,
    pub trace: HybridTrace,
    pub top_n: usize,
}

/// Summary-layer retrieval request.
#[derive(Debug, Clone, Deserialize)]
pub struct SummaryRetrievalRequest {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    #[serde(default = "default_summary_k")]
    pub summary_k: usize,
    /// Also hydrate the leaf chunks under the matched summaries.
    #[serde(default)]
    pub include_chunks: bool,
}

fn default_summary_k() -> usize {
    5
}

/// Summary-layer retrieval response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SummaryRetrievalResponse {
    pub items: Vec<RetrievalItem>,
    pub trace: HybridTrace,
}

/// Grounded-answer request.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    pub query: String,
    pub tenant_id: String,
    #[serde(default)]
    pub k: Option<usize>,
}

/// Grounded context returned by the knowledge service. No generated
/// prose: the caller's LLM synthesizes the answer from the chunks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroundedContext {
    pub context_chunks: Vec<String>,
    pub citations: Vec<String>,
    pub mode: String,
    #[serde(default)]
    pub requires_scope_clarification: bool,
    #[serde(default)]
    pub scope_candidates: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_message: Option<String>,
    #[serde(default)]
    pub requested_scopes: Vec<String>,
    #[serde(default)]
    pub scope_mismatch_detected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_hybrid_request_defaults() {
        let request: HybridRetrievalRequest = serde_json::from_value(json!({
            "query": "que exige iso 9001",
            "tenant_id": "tenant-demo",
        }))
        .expect("deserializable");
        assert_eq!(request.k, 8);
        assert_eq!(request.fetch_k, 40);
        assert!(request.filters.is_none());
    }

    #[test]
    fn test_merge_options_defaults() {
        let merge: MergeOptions = serde_json::from_value(json!({})).expect("deserializable");
        assert_eq!(merge.rrf_k, 60);
        assert_eq!(merge.top_k, 8);
        assert_eq!(merge.strategy, MergeStrategy::Rrf);
    }

    #[test]
    fn test_retrieval_policy_noise_reduction_default_on() {
        let policy: RetrievalPolicy =
            serde_json::from_value(json!({"min_score": 0.4})).expect("deserializable");
        assert!(policy.noise_reduction);
        assert_eq!(policy.min_score, Some(0.4));
    }

    #[test]
    fn test_plan_mode_serialization() {
        assert_eq!(
            serde_json::to_value(PlanMode::AmbiguousScope).expect("serializable"),
            json!("ambiguous_scope")
        );
    }
}
