//! Summary-layer retrieval
//!
//! Direct access to the hierarchical summary tree: match summaries by
//! query vector, optionally resolve them down to their leaf chunks and
//! hydrate those. Hydrated chunks inherit the best matched summary's
//! similarity (the hydration RPC seeds 0.0 and expects the caller to
//! overwrite).

use std::time::Instant;

use serde_json::{json, Value};

use evidence_core::{
    safe_float, to_retrieval_items, ApiError, HybridTrace, LeakCanary, SourceLayer,
    SummaryQuery, SummaryRetrievalRequest, SummaryRetrievalResponse,
};

use crate::service::RetrievalContractService;

impl RetrievalContractService {
    /// Retrieve summary nodes, optionally expanded to leaf chunks.
    pub async fn run_summaries(
        &self,
        request: &SummaryRetrievalRequest,
    ) -> Result<SummaryRetrievalResponse, ApiError> {
        let started = Instant::now();
        let mut warnings: Vec<String> = Vec::new();

        let vector = self.embeddings.embed_query(&request.query).await?;
        let rows = self
            .repository
            .match_summaries(
                &vector,
                SummaryQuery {
                    tenant_id: request.tenant_id.clone(),
                    collection_id: request.collection_id.clone(),
                    limit: request.summary_k.max(1),
                },
            )
            .await?;

        let mut items = to_retrieval_items(&rows);
        for item in &mut items {
            set_layer_if_missing(item, SourceLayer::Raptor);
        }

        if request.include_chunks && !rows.is_empty() {
            let summary_ids: Vec<String> = rows
                .iter()
                .filter_map(|row| row.get("id").and_then(Value::as_str))
                .map(str::to_string)
                .collect();
            let best_similarity = rows
                .iter()
                .map(|row| safe_float(row.get("similarity"), 0.0))
                .fold(0.0f64, f64::max);

            match self.hydrate_summary_chunks(&summary_ids, best_similarity).await {
                Ok(chunk_items) => items.extend(chunk_items),
                Err(err) => {
                    // Expansion is supplementary; the matched summaries
                    // still answer the request.
                    tracing::warn!(error = %err, "summary chunk expansion failed");
                    warnings.push(format!(
                        "summary_expansion_failed:{}",
                        err.message.chars().take(160).collect::<String>()
                    ));
                }
            }
        }

        LeakCanary::verify_items(&request.tenant_id, &items).map_err(|violation| {
            tracing::error!(
                tenant_id = %request.tenant_id,
                error = %violation,
                "security_isolation_breach"
            );
            ApiError::from(violation)
        })?;

        let mut trace = HybridTrace {
            engine_mode: "summary".to_string(),
            warnings,
            score_space: Some("similarity".to_string()),
            ..HybridTrace::default()
        };
        trace
            .timings_ms
            .insert("total".to_string(), elapsed_ms(started));

        Ok(SummaryRetrievalResponse { items, trace })
    }

    async fn hydrate_summary_chunks(
        &self,
        summary_ids: &[String],
        parent_similarity: f64,
    ) -> Result<Vec<evidence_core::RetrievalItem>, ApiError> {
        let chunk_ids = self
            .repository
            .resolve_summaries_to_chunk_ids(summary_ids)
            .await?;
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }
        let chunk_rows = self.repository.fetch_chunks_by_ids(&chunk_ids).await?;

        let mut items = to_retrieval_items(&chunk_rows);
        for item in &mut items {
            item.metadata
                .insert("similarity".into(), json!(parent_similarity));
            item.metadata.insert(
                "source_layer".into(),
                json!(SourceLayer::GraphGrounded.as_str()),
            );
            if item.score == 0.0 {
                item.score = parent_similarity;
            }
        }
        Ok(items)
    }
}

fn set_layer_if_missing(item: &mut evidence_core::RetrievalItem, layer: SourceLayer) {
    let missing = item
        .metadata
        .get("source_layer")
        .and_then(Value::as_str)
        .map(|s| s.trim().is_empty())
        .unwrap_or(true);
    if missing {
        item.metadata
            .insert("source_layer".into(), json!(layer.as_str()));
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}
