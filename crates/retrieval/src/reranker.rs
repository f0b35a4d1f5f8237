//! Remote reranker
//!
//! Cross-encoder reranker behind an HTTP API. Results below the minimum
//! relevance score are pruned here so callers only ever see candidates
//! worth keeping.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use evidence_config::constants::{retrieval, timeouts};
use evidence_core::{ApiError, RerankedDocument, Reranker};

/// Configuration for the remote reranker.
#[derive(Debug, Clone)]
pub struct RerankerConfig {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout: Duration,
    /// Results under this relevance are pruned.
    pub min_relevance_score: f64,
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            api_url: evidence_config::constants::endpoints::RERANK_API_DEFAULT.clone(),
            api_key: String::new(),
            model: "jina-reranker-v2-base-multilingual".to_string(),
            timeout: Duration::from_millis(timeouts::RERANK_MS),
            min_relevance_score: retrieval::RERANK_MIN_RELEVANCE,
        }
    }
}

#[derive(Debug, Serialize)]
struct RerankApiRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Debug, Deserialize)]
struct RerankApiResponse {
    #[serde(default)]
    results: Vec<RerankApiResult>,
}

#[derive(Debug, Deserialize)]
struct RerankApiResult {
    index: usize,
    #[serde(default)]
    relevance_score: f64,
}

/// HTTP reranker client.
pub struct RemoteReranker {
    config: RerankerConfig,
    client: Mutex<Option<Client>>,
}

impl RemoteReranker {
    pub fn new(config: RerankerConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.config.api_key.is_empty()
            && !self.config.api_url.is_empty()
            && !self.config.model.is_empty()
    }

    fn client(&self) -> Result<Client, ApiError> {
        let mut guard = self.client.lock();
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.config.timeout)
            .build()
            .map_err(|e| ApiError::internal("RERANK_CLIENT_INIT_FAILED", e.to_string()))?;
        *guard = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl Reranker for RemoteReranker {
    async fn rerank_documents(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankedDocument>, ApiError> {
        if !self.is_enabled() || query.trim().is_empty() || documents.is_empty() {
            return Ok(Vec::new());
        }

        let payload = RerankApiRequest {
            model: &self.config.model,
            query,
            documents,
            top_n: top_n.clamp(1, documents.len()),
        };

        let response = self
            .client()?
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| ApiError::unavailable("RERANK_API_UNREACHABLE", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            return Err(ApiError::unavailable(
                "RERANK_API_ERROR",
                format!("rerank api status {status}: {snippet}"),
            ));
        }

        let parsed: RerankApiResponse = response
            .json()
            .await
            .map_err(|e| ApiError::internal("RERANK_API_DECODE_FAILED", e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .filter(|row| {
                row.relevance_score.is_finite()
                    && row.relevance_score >= self.config.min_relevance_score
                    && row.index < documents.len()
            })
            .map(|row| RerankedDocument {
                index: row.index,
                relevance_score: row.relevance_score,
            })
            .collect())
    }
}
