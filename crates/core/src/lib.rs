//! Core types and ports for the evidence retrieval engine
//!
//! This crate provides the foundational pieces shared across all other
//! crates:
//! - The `RetrievalItem` result shape returned by every retrieval path
//! - Request/response contracts for the retrieval HTTP surface
//! - Trace types attached to every response
//! - Ports for external collaborators (embedding, repository, reranker)
//! - The leak canary enforcing tenant isolation
//! - Error types with stable error codes

pub mod contracts;
pub mod error;
pub mod item;
pub mod ports;
pub mod scope;
pub mod security;
pub mod trace;

pub use contracts::{
    AnswerRequest, ComprehensiveRetrievalRequest, ComprehensiveRetrievalResponse,
    ExplainRetrievalRequest, ExplainRetrievalResponse, ExplainedItemDetails,
    ExplainedRetrievalItem, GraphOptions, GroundedContext, HybridRetrievalRequest,
    HybridRetrievalResponse, MatchedFilters, MergeOptions, MergeStrategy,
    MultiQueryRetrievalRequest, MultiQueryRetrievalResponse, PlanMode, QueryScopeSummary,
    RerankOptions, RetrievalPath, RetrievalPlan, RetrievalPolicy, ScopeIssue, ScoreComponents,
    SearchHint, SubQueryRequest, SummaryRetrievalRequest, SummaryRetrievalResponse,
    TimeRangeFilter, ValidateScopeRequest, ValidateScopeResponse,
};
pub use error::{ApiError, Result, SecurityViolation};
pub use item::{
    extract_row, finite_or_none, item_clause_refs, item_identity, safe_float,
    to_retrieval_items, Metadata, RetrievalItem, ScoreSpace, SourceLayer,
};
pub use ports::{
    EmbeddingBackend, EmbeddingProfile, GraphNodeQuery, HybridSearchPayload,
    HybridSearchResponse, LateChunk, RepositoryRow, RepositoryTrace, RerankedDocument, Reranker,
    RetrievalRepository, SummaryQuery,
};
pub use scope::{
    extract_clause_refs, extract_row_scope, extract_standard_refs, has_clause_reference,
    normalize_scope_name,
};
pub use security::{validate_tenant_id, LeakCanary, TENANT_ID_PATTERN};
pub use trace::{
    AppliedHint, ComprehensiveTrace, CoverageTrace, HintTrace, HybridTrace, MinScoreTrace,
    MultiQueryTrace, NoiseTrace, PipelineCounts, PolicyTrace, SubQueryExecution, SubQueryStatus,
};
