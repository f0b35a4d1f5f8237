//! Configuration for the evidence retrieval engine
//!
//! Settings are layered: built-in defaults, then `config/default.yaml`,
//! then `config/{env}.yaml`, then `EVIDENCE_ENGINE__*` environment
//! overrides. The plain environment variables documented in the retrieval
//! contract (`EMBEDDING_CACHE_MAX_SIZE`, `RETRIEVAL_MULTI_QUERY_*`, ...)
//! feed the built-in defaults directly.

pub mod constants;
pub mod settings;

use thiserror::Error;

pub use settings::{
    load_settings, EmbeddingMode, EmbeddingSettings, MultiQuerySettings, ObservabilityConfig,
    RepositorySettings, RetrievalSettings, RuntimeEnvironment, ServerConfig, Settings,
};

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load config: {0}")]
    Load(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}
