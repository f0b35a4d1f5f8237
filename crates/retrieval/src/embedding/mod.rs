//! Embedding service
//!
//! Facade over the embedding providers: query-side caching, provider
//! selection (CLOUD vs LOCAL, with escalation in deployed environments),
//! a concurrency gate on every provider call, and a single cross-provider
//! fallback for technical failures on passage tasks.

pub mod cache;
pub mod cloud;
pub mod local;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use evidence_config::{EmbeddingMode, EmbeddingSettings, RuntimeEnvironment};
use evidence_core::{ApiError, EmbeddingBackend, EmbeddingProfile, LateChunk};

pub use cache::{CacheStats, EmbeddingCache};
pub use cloud::{CloudEmbeddingProvider, CloudProviderConfig};
pub use local::LocalEmbeddingProvider;

/// Query-side embedding task; the only task whose vectors are cached.
pub const TASK_QUERY: &str = "retrieval.query";

/// Passage-side embedding task.
pub const TASK_PASSAGE: &str = "retrieval.passage";

const TECHNICAL_ERROR_MARKERS: [&str; 6] =
    ["timeout", "connection", "rate limit", "502", "503", "504"];

fn is_technical_provider_error(err: &ApiError) -> bool {
    let text = format!("{} {}", err.message, err.code).to_lowercase();
    TECHNICAL_ERROR_MARKERS.iter().any(|m| text.contains(m))
}

/// Process-wide embedding facade. Construct once at startup.
pub struct EmbeddingService {
    providers: HashMap<String, Arc<dyn EmbeddingBackend>>,
    local_provider: Arc<dyn EmbeddingBackend>,
    default_provider: String,
    allowed_providers: Vec<String>,
    ingest_default_provider: String,
    ingest_fallback_provider: String,
    ingest_fallback_enabled: bool,
    mode: EmbeddingMode,
    deployed: bool,
    cache: EmbeddingCache,
    semaphore: Semaphore,
}

impl EmbeddingService {
    /// Build from settings with the standard cloud + local providers.
    pub fn from_settings(settings: &EmbeddingSettings, environment: RuntimeEnvironment) -> Self {
        let cloud_config = CloudProviderConfig {
            api_url: settings.api_url.clone(),
            api_key: settings.api_key.clone().unwrap_or_default(),
            model: settings.model.clone(),
            dimensions: settings.dimensions,
            ..CloudProviderConfig::default()
        };

        let mut providers: HashMap<String, Arc<dyn EmbeddingBackend>> = HashMap::new();
        for name in &settings.provider_allowlist {
            providers.insert(
                name.clone(),
                Arc::new(CloudEmbeddingProvider::new(
                    name.clone(),
                    cloud_config.clone(),
                )),
            );
        }

        Self::new(
            providers,
            Arc::new(LocalEmbeddingProvider::new(settings.dimensions)),
            settings,
            environment,
        )
    }

    /// Build with explicit providers (tests plug fakes in here).
    pub fn new(
        providers: HashMap<String, Arc<dyn EmbeddingBackend>>,
        local_provider: Arc<dyn EmbeddingBackend>,
        settings: &EmbeddingSettings,
        environment: RuntimeEnvironment,
    ) -> Self {
        let deployed = environment.is_deployed();
        let mut mode = settings.mode;
        if deployed && mode == EmbeddingMode::Local {
            // LOCAL is disallowed once deployed.
            tracing::warn!("LOCAL embedding mode is not allowed in deployed environments, escalating to CLOUD");
            mode = EmbeddingMode::Cloud;
        }

        let allowed_providers = if settings.provider_allowlist.is_empty() {
            vec![settings.provider_default.clone()]
        } else {
            settings.provider_allowlist.clone()
        };

        let ingest_default_provider = settings
            .ingest_provider_default
            .clone()
            .unwrap_or_else(|| settings.provider_default.clone());

        Self {
            providers,
            local_provider,
            default_provider: settings.provider_default.clone(),
            allowed_providers,
            ingest_default_provider,
            ingest_fallback_provider: settings.ingest_fallback_provider.clone(),
            ingest_fallback_enabled: settings.ingest_fallback_on_technical_error,
            mode,
            deployed,
            cache: EmbeddingCache::new(
                settings.cache_max_size,
                Duration::from_secs(settings.cache_ttl_seconds),
            ),
            semaphore: Semaphore::new(settings.concurrency.max(1)),
        }
    }

    fn resolve_provider_name(&self, provider: Option<&str>) -> String {
        let selected = provider
            .map(|p| p.trim().to_lowercase())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| self.default_provider.clone());
        if self.allowed_providers.contains(&selected) {
            selected
        } else {
            self.default_provider.clone()
        }
    }

    fn resolve_fallback_provider(&self, requested: Option<&str>) -> Option<String> {
        if !self.ingest_fallback_enabled {
            return None;
        }
        let primary = self.resolve_provider_name(requested);
        let fallback = self.ingest_fallback_provider.clone();
        (fallback != primary && self.allowed_providers.contains(&fallback)).then_some(fallback)
    }

    fn backend(&self, provider: Option<&str>) -> Result<Arc<dyn EmbeddingBackend>, ApiError> {
        if self.mode == EmbeddingMode::Local && !self.deployed {
            return Ok(Arc::clone(&self.local_provider));
        }
        let name = self.resolve_provider_name(provider);
        self.providers.get(&name).cloned().ok_or_else(|| {
            ApiError::internal(
                "PROVIDER_UNAVAILABLE",
                format!("embedding provider {name} is not configured"),
            )
        })
    }

    /// Provider identity for the given selection.
    pub fn resolve_profile(&self, provider: Option<&str>) -> Result<EmbeddingProfile, ApiError> {
        Ok(self.backend(provider)?.profile())
    }

    /// Embed texts for a task. Query-task vectors are served from and
    /// written to the TTL cache; all provider calls pass the semaphore.
    pub async fn embed_texts(
        &self,
        texts: &[String],
        task: &str,
        provider: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let is_query = task == TASK_QUERY;

        let mut final_vectors: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing_indices: Vec<usize> = Vec::new();

        if is_query {
            for (i, text) in texts.iter().enumerate() {
                match self.cache.get(text, task) {
                    Some(vector) => final_vectors[i] = Some(vector),
                    None => missing_indices.push(i),
                }
            }
        } else {
            missing_indices = (0..texts.len()).collect();
        }

        if missing_indices.is_empty() {
            return Ok(final_vectors.into_iter().flatten().collect());
        }

        // Dedupe identical missing texts so the provider sees each once.
        let mut unique_texts: Vec<String> = Vec::new();
        let mut slots_by_text: HashMap<&str, Vec<usize>> = HashMap::new();
        for &idx in &missing_indices {
            let text = texts[idx].as_str();
            let slots = slots_by_text.entry(text).or_default();
            if slots.is_empty() {
                unique_texts.push(text.to_string());
            }
            slots.push(idx);
        }

        let embeddings = self
            .embed_with_fallback(&unique_texts, task, provider)
            .await?;
        if embeddings.len() != unique_texts.len() {
            return Err(ApiError::internal(
                "EMBEDDING_API_DECODE_FAILED",
                format!(
                    "provider returned {} vectors for {} inputs",
                    embeddings.len(),
                    unique_texts.len()
                ),
            ));
        }

        for (text, embedding) in unique_texts.iter().zip(embeddings) {
            if is_query {
                self.cache.put(text, task, embedding.clone());
            }
            if let Some(slots) = slots_by_text.get(text.as_str()) {
                for &idx in slots {
                    final_vectors[idx] = Some(embedding.clone());
                }
            }
        }

        Ok(final_vectors.into_iter().flatten().collect())
    }

    async fn embed_with_fallback(
        &self,
        texts: &[String],
        task: &str,
        provider: Option<&str>,
    ) -> Result<Vec<Vec<f32>>, ApiError> {
        let backend = self.backend(provider)?;
        let primary_result = {
            let _permit = self.semaphore.acquire().await.map_err(|_| {
                ApiError::internal("EMBEDDING_SEMAPHORE_CLOSED", "embedding gate closed")
            })?;
            backend.embed(texts, task).await
        };

        match primary_result {
            Ok(vectors) => Ok(vectors),
            Err(err) => {
                // Query-side errors are not retried; only technical
                // failures on passage tasks get one fallback attempt.
                let fallback = self.resolve_fallback_provider(provider);
                let eligible = task != TASK_QUERY
                    && fallback.is_some()
                    && self.resolve_provider_name(provider) == self.ingest_default_provider
                    && is_technical_provider_error(&err);
                if !eligible {
                    return Err(err);
                }
                let fallback_name = fallback.unwrap_or_default();
                tracing::warn!(
                    error = %err,
                    fallback = %fallback_name,
                    "primary embedding provider failed with technical error, trying fallback"
                );
                let fallback_backend = self.backend(Some(&fallback_name))?;
                let _permit = self.semaphore.acquire().await.map_err(|_| {
                    ApiError::internal("EMBEDDING_SEMAPHORE_CLOSED", "embedding gate closed")
                })?;
                fallback_backend.embed(texts, task).await
            }
        }
    }

    /// Embed a single query string (cached path).
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, ApiError> {
        let vectors = self
            .embed_texts(&[query.to_string()], TASK_QUERY, None)
            .await?;
        vectors.into_iter().next().ok_or_else(|| {
            ApiError::internal("EMBEDDING_API_DECODE_FAILED", "provider returned no vector")
        })
    }

    /// Late chunking: split + encode under global context.
    pub async fn chunk_and_encode(
        &self,
        text: &str,
        provider: Option<&str>,
    ) -> Result<Vec<LateChunk>, ApiError> {
        let backend = self.backend(provider)?;
        let primary = {
            let _permit = self.semaphore.acquire().await.map_err(|_| {
                ApiError::internal("EMBEDDING_SEMAPHORE_CLOSED", "embedding gate closed")
            })?;
            backend.chunk_and_encode(text).await
        };
        match primary {
            Ok(chunks) => Ok(chunks),
            Err(err) => {
                let fallback = self.resolve_fallback_provider(provider);
                let eligible = fallback.is_some()
                    && self.resolve_provider_name(provider) == self.ingest_default_provider
                    && is_technical_provider_error(&err);
                if !eligible {
                    return Err(err);
                }
                let fallback_name = fallback.unwrap_or_default();
                let fallback_backend = self.backend(Some(&fallback_name))?;
                let _permit = self.semaphore.acquire().await.map_err(|_| {
                    ApiError::internal("EMBEDDING_SEMAPHORE_CLOSED", "embedding gate closed")
                })?;
                fallback_backend.chunk_and_encode(text).await
            }
        }
    }

    /// Cache accounting, exposed for health/debug surfaces.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}
