//! Cloud embedding provider
//!
//! HTTP client against an embeddings API with late-chunking support. One
//! shared `reqwest::Client` lives for the provider instance. Texts beyond
//! the safe character limit are split on whitespace boundaries before the
//! call and reconstructed by mean pooling.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use evidence_config::constants::{embedding, timeouts};
use evidence_core::{ApiError, EmbeddingBackend, EmbeddingProfile, LateChunk};

/// Configuration for the cloud provider.
#[derive(Debug, Clone)]
pub struct CloudProviderConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub dimensions: usize,
    pub timeout: Duration,
    /// Inputs beyond this many characters are split before the call.
    pub max_safe_chars: usize,
    pub batch_size: usize,
}

impl Default for CloudProviderConfig {
    fn default() -> Self {
        Self {
            api_url: evidence_config::constants::endpoints::EMBEDDING_API_DEFAULT.clone(),
            api_key: String::new(),
            model: "jina-embeddings-v3".to_string(),
            dimensions: embedding::DIMENSIONS,
            timeout: Duration::from_millis(timeouts::EMBEDDING_MS),
            max_safe_chars: embedding::MAX_SAFE_CHARS,
            batch_size: embedding::BATCH_SIZE,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedApiRequest<'a> {
    model: &'a str,
    task: &'a str,
    dimensions: usize,
    late_chunking: bool,
    embedding_type: &'a str,
    truncate: bool,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbedApiResponse {
    data: Vec<EmbedApiVector>,
}

#[derive(Debug, Deserialize)]
struct EmbedApiVector {
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP embedding provider.
pub struct CloudEmbeddingProvider {
    config: CloudProviderConfig,
    provider_name: String,
    // Created on first use, then reused for the life of the provider.
    client: Mutex<Option<Client>>,
}

impl CloudEmbeddingProvider {
    pub fn new(provider_name: impl Into<String>, config: CloudProviderConfig) -> Self {
        Self {
            config,
            provider_name: provider_name.into(),
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<Client, ApiError> {
        let mut guard = self.client.lock();
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| ApiError::internal("EMBEDDING_CLIENT_INIT_FAILED", e.to_string()))?;
        *guard = Some(client.clone());
        Ok(client)
    }

    /// Split oversized text on whitespace boundaries so no piece exceeds
    /// the safe limit. Pieces with no split point fall back to hard cuts
    /// at char boundaries.
    fn safe_split_text(&self, text: &str) -> Vec<String> {
        let max_chars = self.config.max_safe_chars;
        if text.chars().count() <= max_chars {
            return vec![text.to_string()];
        }

        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;
        for word in text.split_inclusive(char::is_whitespace) {
            let word_len = word.chars().count();
            if current_len + word_len > max_chars && !current.is_empty() {
                pieces.push(std::mem::take(&mut current));
                current_len = 0;
            }
            if word_len > max_chars {
                // A single token longer than the limit: hard cut.
                let chars: Vec<char> = word.chars().collect();
                for chunk in chars.chunks(max_chars) {
                    pieces.push(chunk.iter().collect());
                }
                continue;
            }
            current.push_str(word);
            current_len += word_len;
        }
        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }

    async fn call_api(&self, batch: &[String], task: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        let client = self.client()?;
        let payload = EmbedApiRequest {
            model: &self.config.model,
            task,
            dimensions: self.config.dimensions,
            late_chunking: true,
            embedding_type: "float",
            truncate: true,
            input: batch,
        };

        let response = client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::unavailable("EMBEDDING_API_UNREACHABLE", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(ApiError::unavailable(
                "EMBEDDING_API_ERROR",
                format!("embedding api status {status}: {snippet}"),
            ));
        }

        let parsed: EmbedApiResponse = response
            .json()
            .await
            .map_err(|e| ApiError::internal("EMBEDDING_API_DECODE_FAILED", e.to_string()))?;

        // The API may reorder; restore input order by returned index.
        let mut sorted = parsed.data;
        sorted.sort_by_key(|v| v.index);
        Ok(sorted.into_iter().map(|v| v.embedding).collect())
    }

    fn mean_pool(&self, vectors: &[Vec<f32>]) -> Vec<f32> {
        if vectors.is_empty() {
            return vec![0.0; self.config.dimensions];
        }
        if vectors.len() == 1 {
            return vectors[0].clone();
        }
        let dim = vectors[0].len();
        let mut pooled = vec![0.0f32; dim];
        for vector in vectors {
            for (slot, value) in pooled.iter_mut().zip(vector.iter()) {
                *slot += value;
            }
        }
        let count = vectors.len() as f32;
        for slot in &mut pooled {
            *slot /= count;
        }
        pooled
    }
}

#[async_trait]
impl EmbeddingBackend for CloudEmbeddingProvider {
    async fn embed(&self, texts: &[String], task: &str) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // Split oversized inputs, remembering which original each piece
        // belongs to.
        let mut processed: Vec<String> = Vec::new();
        let mut indices_map: Vec<usize> = Vec::new();
        for (idx, text) in texts.iter().enumerate() {
            for piece in self.safe_split_text(text) {
                processed.push(piece);
                indices_map.push(idx);
            }
        }

        let mut all_embeddings: Vec<Vec<f32>> = Vec::with_capacity(processed.len());
        for batch in processed.chunks(self.config.batch_size) {
            let embeddings = self.call_api(batch, task).await?;
            if embeddings.len() != batch.len() {
                return Err(ApiError::internal(
                    "EMBEDDING_API_DECODE_FAILED",
                    format!(
                        "expected {} embeddings, got {}",
                        batch.len(),
                        embeddings.len()
                    ),
                ));
            }
            all_embeddings.extend(embeddings);
        }

        // Mean-pool the pieces of every split text back into one vector.
        let mut grouped: Vec<Vec<Vec<f32>>> = vec![Vec::new(); texts.len()];
        for (original_idx, embedding) in indices_map.into_iter().zip(all_embeddings) {
            grouped[original_idx].push(embedding);
        }
        Ok(grouped.iter().map(|parts| self.mean_pool(parts)).collect())
    }

    async fn chunk_and_encode(&self, text: &str) -> Result<Vec<LateChunk>, ApiError> {
        // Late-chunking over paragraph spans: the whole text goes to the
        // API in one request so embeddings see global context, then each
        // span keeps its own pooled vector.
        let mut spans: Vec<(usize, usize, String)> = Vec::new();
        let mut cursor = 0usize;
        for paragraph in text.split("\n\n") {
            let trimmed = paragraph.trim();
            let start = cursor;
            cursor += paragraph.chars().count() + 2;
            if trimmed.is_empty() {
                continue;
            }
            let end = (start + paragraph.chars().count()).min(text.chars().count());
            spans.push((start, end, trimmed.to_string()));
        }
        if spans.is_empty() {
            return Ok(Vec::new());
        }

        let contents: Vec<String> = spans.iter().map(|(_, _, c)| c.clone()).collect();
        let embeddings = self.embed(&contents, "retrieval.passage").await?;

        Ok(spans
            .into_iter()
            .zip(embeddings)
            .map(|((char_start, char_end, content), embedding)| LateChunk {
                content,
                embedding,
                char_start,
                char_end,
            })
            .collect())
    }

    fn profile(&self) -> EmbeddingProfile {
        EmbeddingProfile {
            provider: self.provider_name.clone(),
            model: self.config.model.clone(),
            dimensions: self.config.dimensions,
            mode: Some("CLOUD".to_string()),
        }
    }

    fn provider_name(&self) -> &str {
        &self.provider_name
    }
}
