//! Retrieval store RPC client
//!
//! Implements the repository port over JSON RPC endpoints
//! (`POST {base}/rpc/<fn>`) of a vector+FTS store. Every payload is scoped
//! to a tenant before it leaves the process; summary matching fails open
//! because summaries are supplementary evidence.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

use evidence_config::RepositorySettings;
use evidence_core::{
    ApiError, GraphNodeQuery, HybridSearchPayload, HybridSearchResponse, RepositoryRow,
    RetrievalRepository, SummaryQuery,
};

/// Maximum summary-tree traversal depth.
const SUMMARY_TREE_MAX_DEPTH: usize = 5;

/// HTTP implementation of the repository port.
pub struct HttpRetrievalRepository {
    base_url: String,
    service_key: Option<String>,
    timeout: Duration,
    client: Mutex<Option<Client>>,
}

impl HttpRetrievalRepository {
    pub fn new(settings: &RepositorySettings) -> Self {
        Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            service_key: settings.service_key.clone(),
            timeout: Duration::from_millis(settings.timeout_ms),
            client: Mutex::new(None),
        }
    }

    fn client(&self) -> Result<Client, ApiError> {
        let mut guard = self.client.lock();
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| ApiError::internal("REPOSITORY_CLIENT_INIT_FAILED", e.to_string()))?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn rpc<P: Serialize>(&self, function: &str, params: &P) -> Result<Value, ApiError> {
        let url = format!("{}/rpc/{}", self.base_url, function);
        let mut request = self.client()?.post(&url).json(params);
        if let Some(key) = &self.service_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            tracing::error!(rpc = function, error = %e, "repository rpc failed");
            ApiError::unavailable("RETRIEVAL_RPC_UNREACHABLE", e.to_string())
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(300).collect();
            tracing::error!(rpc = function, status = %status, "repository rpc returned error");
            return Err(ApiError::unavailable(
                "RETRIEVAL_RPC_ERROR",
                format!("rpc {function} status {status}: {snippet}"),
            ));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::internal("RETRIEVAL_RPC_DECODE_FAILED", e.to_string()))
    }

    fn rows_from(value: Value) -> Vec<RepositoryRow> {
        match value {
            Value::Array(rows) => rows
                .into_iter()
                .filter_map(|row| match row {
                    Value::Object(map) => Some(map),
                    _ => None,
                })
                .collect(),
            Value::Object(mut map) => match map.remove("items") {
                Some(Value::Array(rows)) => rows
                    .into_iter()
                    .filter_map(|row| match row {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .collect(),
                _ => Vec::new(),
            },
            _ => Vec::new(),
        }
    }
}

#[async_trait]
impl RetrievalRepository for HttpRetrievalRepository {
    async fn retrieve_hybrid_optimized(
        &self,
        payload: HybridSearchPayload,
    ) -> Result<HybridSearchResponse, ApiError> {
        let value = self.rpc("retrieve_hybrid_optimized", &payload).await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::internal("RETRIEVAL_RPC_DECODE_FAILED", e.to_string()))
    }

    async fn search_vectors_only(
        &self,
        payload: HybridSearchPayload,
    ) -> Result<Vec<RepositoryRow>, ApiError> {
        let value = self.rpc("search_vectors_only", &payload).await?;
        Ok(Self::rows_from(value))
    }

    async fn search_fts_only(
        &self,
        payload: HybridSearchPayload,
    ) -> Result<Vec<RepositoryRow>, ApiError> {
        let value = self.rpc("search_fts_only", &payload).await?;
        Ok(Self::rows_from(value))
    }

    async fn retrieve_graph_nodes(
        &self,
        query: GraphNodeQuery,
    ) -> Result<Vec<RepositoryRow>, ApiError> {
        let value = self.rpc("retrieve_graph_nodes", &query).await?;
        Ok(Self::rows_from(value))
    }

    async fn match_summaries(
        &self,
        vector: &[f32],
        query: SummaryQuery,
    ) -> Result<Vec<RepositoryRow>, ApiError> {
        let params = json!({
            "query_embedding": vector,
            "match_count": query.limit,
            "p_tenant_id": query.tenant_id,
            "p_collection_id": query.collection_id,
        });
        // Fail open: summaries supplement chunk evidence, their absence
        // must not take down a request.
        match self.rpc("match_summaries", &params).await {
            Ok(value) => Ok(Self::rows_from(value)),
            Err(err) => {
                tracing::warn!(error = %err, "match_summaries failed, returning empty");
                Ok(Vec::new())
            }
        }
    }

    async fn fetch_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<RepositoryRow>, ApiError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let params = json!({ "chunk_ids": ids });
        let value = self.rpc("fetch_chunks_by_ids", &params).await?;
        let mut rows = Self::rows_from(value);
        for row in &mut rows {
            // Seed similarity; callers with a better score overwrite it.
            row.entry("similarity".to_string()).or_insert(json!(0.0));
        }
        Ok(rows)
    }

    async fn resolve_summaries_to_chunk_ids(
        &self,
        summary_ids: &[String],
    ) -> Result<Vec<String>, ApiError> {
        if summary_ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut leaf_chunk_ids: Vec<String> = Vec::new();
        let mut current_level: Vec<String> = summary_ids.to_vec();
        current_level.dedup();

        for depth in 0..SUMMARY_TREE_MAX_DEPTH {
            if current_level.is_empty() {
                break;
            }
            let params = json!({ "node_ids": current_level });
            let value = match self.rpc("fetch_summary_children", &params).await {
                Ok(value) => value,
                Err(err) => {
                    tracing::error!(error = %err, depth, "summary tree traversal failed");
                    break;
                }
            };
            let rows = Self::rows_from(value);
            if rows.is_empty() {
                break;
            }

            let mut next_level: Vec<String> = Vec::new();
            for row in rows {
                let child_id = row
                    .get("id")
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .unwrap_or_default();
                if child_id.is_empty() {
                    continue;
                }
                // Summary nodes carry level > 0; everything else is a leaf
                // chunk.
                let level = row.get("level").and_then(Value::as_i64).unwrap_or(0);
                if level > 0 {
                    if !next_level.contains(&child_id.to_string()) {
                        next_level.push(child_id.to_string());
                    }
                } else if !leaf_chunk_ids.contains(&child_id.to_string()) {
                    leaf_chunk_ids.push(child_id.to_string());
                }
            }
            current_level = next_level;
        }

        Ok(leaf_chunk_ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_from_array_and_object_shapes() {
        let array = json!([{"id": "a"}, {"id": "b"}, "ignored"]);
        assert_eq!(HttpRetrievalRepository::rows_from(array).len(), 2);

        let object = json!({"items": [{"id": "a"}]});
        assert_eq!(HttpRetrievalRepository::rows_from(object).len(), 1);

        assert!(HttpRetrievalRepository::rows_from(json!(null)).is_empty());
    }

    #[test]
    fn test_base_url_trailing_slash_trimmed() {
        let repo = HttpRetrievalRepository::new(&RepositorySettings {
            base_url: "http://store.local/".to_string(),
            service_key: None,
            timeout_ms: 1000,
        });
        assert_eq!(repo.base_url, "http://store.local");
    }
}
