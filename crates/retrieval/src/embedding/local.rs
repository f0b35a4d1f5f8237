//! Local embedding provider
//!
//! In-process deterministic embedder for development and tests: feature
//! hashing over characters, L2-normalized. The "model" is loaded lazily
//! once behind a mutex; deployed environments never reach this provider
//! (the service escalates LOCAL to CLOUD there).

use async_trait::async_trait;
use parking_lot::Mutex;

use evidence_core::{ApiError, EmbeddingBackend, EmbeddingProfile, LateChunk};

/// Deterministic hash-based embedder.
pub struct LocalEmbeddingProvider {
    dimensions: usize,
    loaded: Mutex<bool>,
}

impl LocalEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(8),
            loaded: Mutex::new(false),
        }
    }

    /// Idempotent lazy initialization. Kept explicit so the first call
    /// pays the load cost, not process startup.
    fn ensure_loaded(&self) {
        let mut loaded = self.loaded.lock();
        if *loaded {
            return;
        }
        tracing::info!(dimensions = self.dimensions, "loading local embedding model");
        *loaded = true;
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut embedding = vec![0.0f32; self.dimensions];
        for (i, c) in text.chars().enumerate() {
            let idx = (c as usize + i) % self.dimensions;
            embedding[idx] += 1.0;
        }
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingBackend for LocalEmbeddingProvider {
    async fn embed(&self, texts: &[String], _task: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        self.ensure_loaded();
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }

    async fn chunk_and_encode(&self, text: &str) -> Result<Vec<LateChunk>, ApiError> {
        self.ensure_loaded();
        let mut chunks = Vec::new();
        let mut cursor = 0usize;
        for paragraph in text.split("\n\n") {
            let start = cursor;
            let len = paragraph.chars().count();
            cursor += len + 2;
            let trimmed = paragraph.trim();
            if trimmed.is_empty() {
                continue;
            }
            chunks.push(LateChunk {
                content: trimmed.to_string(),
                embedding: self.embed_one(trimmed),
                char_start: start,
                char_end: start + len,
            });
        }
        Ok(chunks)
    }

    fn profile(&self) -> EmbeddingProfile {
        EmbeddingProfile {
            provider: "local".to_string(),
            model: "feature-hash".to_string(),
            dimensions: self.dimensions,
            mode: Some("LOCAL".to_string()),
        }
    }

    fn provider_name(&self) -> &str {
        "local"
    }
}
