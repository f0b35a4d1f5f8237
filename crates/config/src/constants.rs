//! Centralized constants
//!
//! Single source of truth for infrastructure endpoints and retrieval
//! tuning defaults. Tenant- or deployment-specific values belong in the
//! YAML settings files, not here.

/// Service endpoints (loaded from env vars with fallback defaults)
pub mod endpoints {
    use once_cell::sync::Lazy;

    /// Embedding API endpoint (env: EMBEDDING_API_URL)
    pub static EMBEDDING_API_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("EMBEDDING_API_URL")
            .unwrap_or_else(|_| "https://api.jina.ai/v1/embeddings".to_string())
    });

    /// Reranker API endpoint (env: RERANK_API_URL)
    pub static RERANK_API_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("RERANK_API_URL")
            .unwrap_or_else(|_| "https://api.jina.ai/v1/rerank".to_string())
    });

    /// Retrieval store RPC endpoint (env: RETRIEVAL_STORE_URL)
    pub static RETRIEVAL_STORE_DEFAULT: Lazy<String> = Lazy::new(|| {
        std::env::var("RETRIEVAL_STORE_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:54321".to_string())
    });
}

/// Retrieval tuning defaults
pub mod retrieval {
    /// RRF rank constant
    pub const DEFAULT_RRF_K: u32 = 60;

    /// Late-fusion slot quota: chunks take the first positions
    pub const QUOTA_CHUNKS: usize = 3;

    /// Late-fusion slot quota for graph nodes
    pub const QUOTA_GRAPH: usize = 2;

    /// Late-fusion slot quota for RAPTOR summaries
    pub const QUOTA_RAPTOR: usize = 1;

    /// Minimum cross-encoder relevance; results below are pruned
    pub const RERANK_MIN_RELEVANCE: f64 = 0.15;

    /// Default graph traversal hop cap
    pub const DEFAULT_GRAPH_MAX_HOPS: u32 = 2;

    /// Scope-penalty ratio at which a multi-query branch is dropped
    pub const SCOPE_PENALTY_DROP_THRESHOLD: f64 = 0.95;
}

/// Embedding defaults
pub mod embedding {
    /// Query-side embedding cache capacity
    pub const CACHE_MAX_SIZE: usize = 4000;

    /// Query-side embedding cache TTL (seconds)
    pub const CACHE_TTL_SECONDS: u64 = 1800;

    /// Concurrent provider calls
    pub const CONCURRENCY: usize = 5;

    /// Cloud providers reject inputs beyond ~8k tokens; texts above this
    /// many characters are split and mean-pooled back together.
    pub const MAX_SAFE_CHARS: usize = 15_000;

    /// Items per cloud API batch
    pub const BATCH_SIZE: usize = 32;

    /// Embedding output dimensions
    pub const DIMENSIONS: usize = 1024;
}

/// Timeouts (milliseconds unless noted)
pub mod timeouts {
    /// Per-sub-query wall clock in multi-query fan-out
    pub const SUBQUERY_DEFAULT_MS: u64 = 8_000;

    /// Reranker HTTP call
    pub const RERANK_MS: u64 = 8_000;

    /// Embedding provider HTTP call
    pub const EMBEDDING_MS: u64 = 30_000;

    /// Repository RPC call
    pub const REPOSITORY_MS: u64 = 20_000;
}
