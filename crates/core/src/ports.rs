//! Ports for external collaborators
//!
//! The engine consumes the embedding provider, the retrieval store and the
//! reranker through these traits only. Shipped implementations are HTTP
//! clients; tests plug in in-memory fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::error::ApiError;
use crate::item::Metadata;

/// Raw row returned by repository RPCs. Shape is store-defined; the open
/// map keeps whatever the store sends.
pub type RepositoryRow = Metadata;

/// Engine-side trace emitted by the hybrid RPC.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepositoryTrace {
    #[serde(default)]
    pub filters_applied: HashMap<String, Value>,
    #[serde(default)]
    pub engine_mode: String,
    #[serde(default)]
    pub planner_used: bool,
    #[serde(default)]
    pub planner_multihop: bool,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default)]
    pub rpc_contract_status: Option<String>,
    #[serde(default)]
    pub rpc_compat_mode: Option<String>,
    #[serde(default)]
    pub timings_ms: HashMap<String, f64>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub warning_codes: Vec<String>,
    #[serde(default)]
    pub scope_penalized_count: u64,
    #[serde(default)]
    pub scope_candidate_count: u64,
    #[serde(default)]
    pub scope_penalized_ratio: Option<f64>,
    #[serde(default)]
    pub score_space: Option<String>,
}

/// Hybrid RPC response: rows plus engine trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HybridSearchResponse {
    #[serde(default)]
    pub items: Vec<RepositoryRow>,
    #[serde(default)]
    pub trace: RepositoryTrace,
}

/// Payload for the hybrid / vector-only / FTS-only RPCs.
#[derive(Debug, Clone, Serialize)]
pub struct HybridSearchPayload {
    pub query: String,
    /// Query-side embedding, computed by the caller.
    pub query_embedding: Vec<f32>,
    /// Scope context: tenant, collection, normalized filters, planner
    /// hints. Open map by contract: the store ignores unknown keys.
    pub scope_context: Metadata,
    pub k: usize,
    pub fetch_k: usize,
    pub enable_reranking: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_filter_relation_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_filter_node_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub graph_max_hops: Option<u32>,
}

/// Parameters for graph-node retrieval.
#[derive(Debug, Clone, Serialize)]
pub struct GraphNodeQuery {
    pub query: String,
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    pub k: usize,
    /// Hop cap, already clamped by the caller.
    pub max_hops: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relation_types: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_types: Option<Vec<String>>,
}

/// Parameters for summary matching.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryQuery {
    pub tenant_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<String>,
    pub limit: usize,
}

/// Abstract RPCs against the vector+FTS store.
///
/// `fetch_chunks_by_ids` seeds `similarity` to 0.0; callers that know a
/// better score (e.g. graph grounding) overwrite it.
#[async_trait]
pub trait RetrievalRepository: Send + Sync {
    /// Hybrid search: dense + FTS + optional store-side rerank.
    async fn retrieve_hybrid_optimized(
        &self,
        payload: HybridSearchPayload,
    ) -> Result<HybridSearchResponse, ApiError>;

    /// Dense-only search.
    async fn search_vectors_only(
        &self,
        payload: HybridSearchPayload,
    ) -> Result<Vec<RepositoryRow>, ApiError>;

    /// Full-text-only search.
    async fn search_fts_only(
        &self,
        payload: HybridSearchPayload,
    ) -> Result<Vec<RepositoryRow>, ApiError>;

    /// Graph-node retrieval around the query's entities.
    async fn retrieve_graph_nodes(
        &self,
        query: GraphNodeQuery,
    ) -> Result<Vec<RepositoryRow>, ApiError>;

    /// Hierarchical summary matching by query vector.
    async fn match_summaries(
        &self,
        vector: &[f32],
        query: SummaryQuery,
    ) -> Result<Vec<RepositoryRow>, ApiError>;

    /// Hydrate chunks by id.
    async fn fetch_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<RepositoryRow>, ApiError>;

    /// Resolve summary nodes to underlying leaf chunk ids (bounded DFS,
    /// depth <= 5).
    async fn resolve_summaries_to_chunk_ids(
        &self,
        summary_ids: &[String],
    ) -> Result<Vec<String>, ApiError>;
}

/// Provider identity and output shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingProfile {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
}

/// One span produced by late chunking: embedding computed over global
/// context, pooled per span.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LateChunk {
    pub content: String,
    pub embedding: Vec<f32>,
    pub char_start: usize,
    pub char_end: usize,
}

/// Text-to-vector backend. One vector per input, input order preserved.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    async fn embed(&self, texts: &[String], task: &str) -> Result<Vec<Vec<f32>>, ApiError>;

    async fn chunk_and_encode(&self, text: &str) -> Result<Vec<LateChunk>, ApiError>;

    fn profile(&self) -> EmbeddingProfile;

    fn provider_name(&self) -> &str;
}

/// One reranked document, referencing the input by index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankedDocument {
    pub index: usize,
    pub relevance_score: f64,
}

/// Cross-encoder reranker. Results below the configured minimum relevance
/// are pruned by implementations before returning.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank_documents(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankedDocument>, ApiError>;
}
