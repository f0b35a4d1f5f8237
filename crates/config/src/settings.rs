//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{embedding, endpoints, retrieval, timeouts};
use crate::ConfigError;

/// Runtime environment enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    /// Development mode - relaxed validation, local providers allowed
    #[default]
    Development,
    /// Staging mode - deployed, cloud providers enforced
    Staging,
    /// Production mode - deployed, cloud providers enforced, auth required
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    /// Deployed environments disallow in-process embedding models and
    /// require bearer auth on retrieval endpoints.
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Production | Self::Staging)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Runtime environment (development, staging, production)
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Retrieval pipeline configuration
    #[serde(default)]
    pub retrieval: RetrievalSettings,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingSettings,

    /// Retrieval store RPC configuration
    #[serde(default)]
    pub repository: RepositorySettings,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// CORS origins; empty list means same-origin only
    #[serde(default)]
    pub cors_origins: Vec<String>,
    #[serde(default)]
    pub cors_enabled: bool,
    /// Bearer secret required on retrieval endpoints in deployed
    /// environments (env: SERVICE_AUTH_SECRET)
    #[serde(default = "default_service_secret")]
    pub service_secret: Option<String>,
    /// Paths that bypass tenant/auth middleware
    #[serde(default = "default_public_paths")]
    pub public_paths: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_service_secret() -> Option<String> {
    std::env::var("SERVICE_AUTH_SECRET").ok().filter(|s| !s.is_empty())
}

fn default_public_paths() -> Vec<String> {
    vec!["/health".to_string(), "/metrics".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
            cors_enabled: false,
            service_secret: default_service_secret(),
            public_paths: default_public_paths(),
        }
    }
}

/// Multi-query fan-out configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiQuerySettings {
    /// Concurrent sub-queries (env: RETRIEVAL_MULTI_QUERY_MAX_PARALLEL, 1-8)
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Per-sub-query wall clock in ms
    /// (env: RETRIEVAL_MULTI_QUERY_SUBQUERY_TIMEOUT_MS, >= 200)
    #[serde(default = "default_subquery_timeout_ms")]
    pub subquery_timeout_ms: u64,
    /// Drop branches whose candidates were (almost) all scope-penalized
    /// (env: RETRIEVAL_MULTI_QUERY_DROP_SCOPE_PENALIZED_BRANCHES)
    #[serde(default = "default_drop_scope_penalized")]
    pub drop_scope_penalized_branches: bool,
    /// Penalty ratio at which a branch is dropped
    /// (env: RETRIEVAL_MULTI_QUERY_SCOPE_PENALTY_DROP_THRESHOLD, 0-1)
    #[serde(default = "default_scope_penalty_drop_threshold")]
    pub scope_penalty_drop_threshold: f64,
    /// External rerank inside sub-queries (off by default: sub-queries
    /// feed an RRF merge, reranking them individually wastes latency)
    #[serde(default)]
    pub subquery_rerank_enabled: bool,
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|raw| raw.trim().parse().ok())
}

fn default_max_parallel() -> usize {
    env_parsed("RETRIEVAL_MULTI_QUERY_MAX_PARALLEL")
        .unwrap_or(4usize)
        .clamp(1, 8)
}

fn default_subquery_timeout_ms() -> u64 {
    env_parsed("RETRIEVAL_MULTI_QUERY_SUBQUERY_TIMEOUT_MS")
        .unwrap_or(timeouts::SUBQUERY_DEFAULT_MS)
        .max(200)
}

fn default_drop_scope_penalized() -> bool {
    env_parsed("RETRIEVAL_MULTI_QUERY_DROP_SCOPE_PENALIZED_BRANCHES").unwrap_or(true)
}

fn default_scope_penalty_drop_threshold() -> f64 {
    env_parsed("RETRIEVAL_MULTI_QUERY_SCOPE_PENALTY_DROP_THRESHOLD")
        .unwrap_or(retrieval::SCOPE_PENALTY_DROP_THRESHOLD)
        .clamp(0.0, 1.0)
}

impl Default for MultiQuerySettings {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            subquery_timeout_ms: default_subquery_timeout_ms(),
            drop_scope_penalized_branches: default_drop_scope_penalized(),
            scope_penalty_drop_threshold: default_scope_penalty_drop_threshold(),
            subquery_rerank_enabled: false,
        }
    }
}

/// Retrieval pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalSettings {
    /// Engine mode reported in traces
    #[serde(default = "default_engine_mode")]
    pub engine_mode: String,
    #[serde(default)]
    pub multi_query: MultiQuerySettings,
    /// Graph traversal hop cap
    /// (env: RETRIEVAL_COVERAGE_GRAPH_EXPANSION_MAX_HOPS, 1-4)
    #[serde(default = "default_graph_max_hops")]
    pub graph_expansion_max_hops: u32,
    /// Minimum cross-encoder relevance (env: RERANK_MIN_RELEVANCE_SCORE)
    #[serde(default = "default_rerank_min_relevance")]
    pub rerank_min_relevance_score: f64,
}

fn default_engine_mode() -> String {
    "hybrid".to_string()
}

fn default_graph_max_hops() -> u32 {
    env_parsed("RETRIEVAL_COVERAGE_GRAPH_EXPANSION_MAX_HOPS")
        .unwrap_or(retrieval::DEFAULT_GRAPH_MAX_HOPS)
        .clamp(1, 4)
}

fn default_rerank_min_relevance() -> f64 {
    env_parsed("RERANK_MIN_RELEVANCE_SCORE").unwrap_or(retrieval::RERANK_MIN_RELEVANCE)
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            engine_mode: default_engine_mode(),
            multi_query: MultiQuerySettings::default(),
            graph_expansion_max_hops: default_graph_max_hops(),
            rerank_min_relevance_score: default_rerank_min_relevance(),
        }
    }
}

/// Embedding provider mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum EmbeddingMode {
    #[default]
    Cloud,
    Local,
}

/// Embedding provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingSettings {
    /// CLOUD or LOCAL; deployed environments escalate LOCAL to CLOUD
    #[serde(default)]
    pub mode: EmbeddingMode,
    /// Default provider name (env: EMBEDDING_PROVIDER_DEFAULT)
    #[serde(default = "default_provider")]
    pub provider_default: String,
    /// Allowed providers (env: EMBEDDING_PROVIDER_ALLOWLIST, comma list)
    #[serde(default = "default_provider_allowlist")]
    pub provider_allowlist: Vec<String>,
    /// Default provider for passage/ingest tasks
    /// (env: INGEST_EMBED_PROVIDER_DEFAULT)
    #[serde(default = "default_ingest_provider")]
    pub ingest_provider_default: Option<String>,
    /// Fallback provider for technical failures on passage tasks
    /// (env: INGEST_EMBED_FALLBACK_PROVIDER)
    #[serde(default = "default_ingest_fallback_provider")]
    pub ingest_fallback_provider: String,
    /// (env: INGEST_EMBED_FALLBACK_ON_TECHNICAL_ERROR)
    #[serde(default = "default_ingest_fallback_enabled")]
    pub ingest_fallback_on_technical_error: bool,
    /// Query-cache capacity (env: EMBEDDING_CACHE_MAX_SIZE, >= 100)
    #[serde(default = "default_cache_max_size")]
    pub cache_max_size: usize,
    /// Query-cache TTL seconds (env: EMBEDDING_CACHE_TTL_SECONDS, 30-1800)
    #[serde(default = "default_cache_ttl_seconds")]
    pub cache_ttl_seconds: u64,
    /// Concurrent provider calls (env: EMBEDDING_CONCURRENCY)
    #[serde(default = "default_embedding_concurrency")]
    pub concurrency: usize,
    /// Cloud API endpoint
    #[serde(default = "default_embedding_api_url")]
    pub api_url: String,
    /// Cloud API key (env: EMBEDDING_API_KEY)
    #[serde(default = "default_embedding_api_key")]
    pub api_key: Option<String>,
    /// Model name sent to the cloud API
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

fn default_provider() -> String {
    std::env::var("EMBEDDING_PROVIDER_DEFAULT")
        .ok()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "jina".to_string())
}

fn default_provider_allowlist() -> Vec<String> {
    std::env::var("EMBEDDING_PROVIDER_ALLOWLIST")
        .map(|raw| {
            raw.split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect::<Vec<_>>()
        })
        .ok()
        .filter(|list| !list.is_empty())
        .unwrap_or_else(|| vec!["jina".to_string(), "cohere".to_string()])
}

fn default_ingest_provider() -> Option<String> {
    std::env::var("INGEST_EMBED_PROVIDER_DEFAULT")
        .ok()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
}

fn default_ingest_fallback_provider() -> String {
    std::env::var("INGEST_EMBED_FALLBACK_PROVIDER")
        .ok()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "jina".to_string())
}

fn default_ingest_fallback_enabled() -> bool {
    env_parsed("INGEST_EMBED_FALLBACK_ON_TECHNICAL_ERROR").unwrap_or(true)
}

fn default_cache_max_size() -> usize {
    env_parsed("EMBEDDING_CACHE_MAX_SIZE")
        .unwrap_or(embedding::CACHE_MAX_SIZE)
        .max(100)
}

fn default_cache_ttl_seconds() -> u64 {
    env_parsed("EMBEDDING_CACHE_TTL_SECONDS")
        .unwrap_or(embedding::CACHE_TTL_SECONDS)
        .clamp(30, 1800)
}

fn default_embedding_concurrency() -> usize {
    env_parsed("EMBEDDING_CONCURRENCY")
        .unwrap_or(embedding::CONCURRENCY)
        .max(1)
}

fn default_embedding_api_url() -> String {
    endpoints::EMBEDDING_API_DEFAULT.clone()
}

fn default_embedding_api_key() -> Option<String> {
    std::env::var("EMBEDDING_API_KEY").ok().filter(|s| !s.is_empty())
}

fn default_embedding_model() -> String {
    "jina-embeddings-v3".to_string()
}

fn default_embedding_dimensions() -> usize {
    embedding::DIMENSIONS
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::default(),
            provider_default: default_provider(),
            provider_allowlist: default_provider_allowlist(),
            ingest_provider_default: default_ingest_provider(),
            ingest_fallback_provider: default_ingest_fallback_provider(),
            ingest_fallback_on_technical_error: default_ingest_fallback_enabled(),
            cache_max_size: default_cache_max_size(),
            cache_ttl_seconds: default_cache_ttl_seconds(),
            concurrency: default_embedding_concurrency(),
            api_url: default_embedding_api_url(),
            api_key: default_embedding_api_key(),
            model: default_embedding_model(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

/// Retrieval store RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySettings {
    #[serde(default = "default_repository_url")]
    pub base_url: String,
    /// Service key sent on every RPC (env: RETRIEVAL_STORE_SERVICE_KEY)
    #[serde(default = "default_repository_key")]
    pub service_key: Option<String>,
    #[serde(default = "default_repository_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_repository_url() -> String {
    endpoints::RETRIEVAL_STORE_DEFAULT.clone()
}

fn default_repository_key() -> Option<String> {
    std::env::var("RETRIEVAL_STORE_SERVICE_KEY").ok().filter(|s| !s.is_empty())
}

fn default_repository_timeout_ms() -> u64 {
    timeouts::REPOSITORY_MS
}

impl Default for RepositorySettings {
    fn default() -> Self {
        Self {
            base_url: default_repository_url(),
            service_key: default_repository_key(),
            timeout_ms: default_repository_timeout_ms(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings; ranges mirror the documented clamps.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mq = &self.retrieval.multi_query;
        if !(1..=8).contains(&mq.max_parallel) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.multi_query.max_parallel".to_string(),
                message: format!("Must be between 1 and 8, got {}", mq.max_parallel),
            });
        }
        if mq.subquery_timeout_ms < 200 {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.multi_query.subquery_timeout_ms".to_string(),
                message: format!("Must be at least 200 ms, got {}", mq.subquery_timeout_ms),
            });
        }
        if !(0.0..=1.0).contains(&mq.scope_penalty_drop_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.multi_query.scope_penalty_drop_threshold".to_string(),
                message: format!(
                    "Must be between 0.0 and 1.0, got {}",
                    mq.scope_penalty_drop_threshold
                ),
            });
        }
        if !(1..=4).contains(&self.retrieval.graph_expansion_max_hops) {
            return Err(ConfigError::InvalidValue {
                field: "retrieval.graph_expansion_max_hops".to_string(),
                message: format!(
                    "Must be between 1 and 4, got {}",
                    self.retrieval.graph_expansion_max_hops
                ),
            });
        }
        if self.embedding.cache_max_size < 100 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.cache_max_size".to_string(),
                message: format!("Must be at least 100, got {}", self.embedding.cache_max_size),
            });
        }
        if !(30..=1800).contains(&self.embedding.cache_ttl_seconds) {
            return Err(ConfigError::InvalidValue {
                field: "embedding.cache_ttl_seconds".to_string(),
                message: format!(
                    "Must be between 30 and 1800 seconds, got {}",
                    self.embedding.cache_ttl_seconds
                ),
            });
        }
        if self.embedding.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                field: "embedding.concurrency".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        if self.environment.is_deployed()
            && self.embedding.mode == EmbeddingMode::Cloud
            && self.embedding.api_key.is_none()
        {
            return Err(ConfigError::InvalidValue {
                field: "embedding.api_key".to_string(),
                message: "Deployed environments require cloud embedding credentials".to_string(),
            });
        }
        Ok(())
    }
}

/// Load settings from files and environment.
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    if Path::new("config/default.yaml").exists() {
        builder = builder.add_source(File::with_name("config/default"));
    }
    if let Some(env_name) = env {
        let env_path = format!("config/{env_name}");
        if Path::new(&format!("{env_path}.yaml")).exists() {
            builder = builder.add_source(File::with_name(&env_path));
        }
    }

    builder = builder.add_source(
        Environment::with_prefix("EVIDENCE_ENGINE")
            .separator("__")
            .try_parsing(true),
    );

    let settings: Settings = builder
        .build()
        .map_err(|e| ConfigError::Load(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Load(e.to_string()))?;

    settings.validate()?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert!((1..=8).contains(&settings.retrieval.multi_query.max_parallel));
        assert!(settings.retrieval.multi_query.subquery_timeout_ms >= 200);
        assert!(settings.embedding.cache_max_size >= 100);
    }

    #[test]
    fn test_validate_rejects_bad_parallelism() {
        let mut settings = Settings::default();
        settings.retrieval.multi_query.max_parallel = 16;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_threshold() {
        let mut settings = Settings::default();
        settings.retrieval.multi_query.scope_penalty_drop_threshold = 1.5;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_deployed_requires_cloud_credentials() {
        let mut settings = Settings::default();
        settings.environment = RuntimeEnvironment::Production;
        settings.embedding.api_key = None;
        assert!(settings.validate().is_err());

        settings.embedding.api_key = Some("key".to_string());
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_runtime_environment_flags() {
        assert!(!RuntimeEnvironment::Development.is_deployed());
        assert!(RuntimeEnvironment::Staging.is_deployed());
        assert!(RuntimeEnvironment::Production.is_production());
    }
}
