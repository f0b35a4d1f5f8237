//! Hybrid multi-layer retrieval
//!
//! Features:
//! - Scope resolution and filter validation for normative-standard queries
//! - Single-query hybrid path: embed, hybrid RPC, rerank, leak check
//! - Multi-query fan-out with bounded parallelism and RRF merge
//! - Comprehensive fan-out over chunks / graph / summaries with quota
//!   late fusion
//! - Retrieval policy: hint expansion, min-score gate, structural noise
//!   reduction
//! - Query-side embedding cache with TTL and LRU eviction
//! - Leak canary on every result set

pub mod comprehensive;
pub mod embedding;
pub mod explain;
pub mod fusion;
pub mod hybrid;
pub mod knowledge;
pub mod multi_query;
pub mod plan;
pub mod policy;
pub mod repository;
pub mod reranker;
pub mod scope;
pub mod service;
pub mod summaries;
pub mod validate;

pub use embedding::{
    CacheStats, CloudEmbeddingProvider, CloudProviderConfig, EmbeddingCache, EmbeddingService,
    LocalEmbeddingProvider, TASK_PASSAGE, TASK_QUERY,
};
pub use knowledge::KnowledgeService;
pub use plan::QueryPlanner;
pub use repository::HttpRetrievalRepository;
pub use reranker::{RemoteReranker, RerankerConfig};
pub use scope::{ScopeResolution, ScopeResolver, StandardProfile};
pub use service::{HybridRunOptions, RetrievalContractService};
pub use validate::{NormalizedFilters, ScopeValidator};
