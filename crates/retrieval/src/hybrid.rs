//! Single-query hybrid path
//!
//! Validate scope, embed the query, call the hybrid RPC, apply the
//! external cross-encoder, then verify tenant isolation. Warning streams
//! from validation and from the engine merge in stable order.

use std::time::Instant;

use serde_json::{json, Value};

use evidence_core::{
    item_identity, to_retrieval_items, ApiError, HybridRetrievalRequest, HybridRetrievalResponse,
    HybridSearchPayload, HybridTrace, LeakCanary, RetrievalItem, ScoreSpace,
};

use crate::service::{HybridRunOptions, RetrievalContractService};

impl RetrievalContractService {
    /// Run the hybrid retrieval contract for a single query.
    pub async fn run_hybrid(
        &self,
        request: &HybridRetrievalRequest,
        options: HybridRunOptions,
    ) -> Result<HybridRetrievalResponse, ApiError> {
        let started = Instant::now();

        let validated = self.validate_request_parts(
            &request.query,
            &request.tenant_id,
            request.collection_id.as_deref(),
            request.filters.as_ref(),
        );
        if !validated.valid {
            return Err(Self::scope_validation_error(&validated));
        }

        let mut scope_context =
            Self::build_scope_context(&validated, request.collection_id.as_deref());

        let mut planner_used = false;
        if let Some(plan) = &request.retrieval_plan {
            scope_context.insert("retrieval_plan".into(), json!(plan));
            planner_used = true;
        } else if !options.skip_planner {
            let plan = self.planner.plan(&request.query);
            scope_context.insert("retrieval_plan".into(), json!(plan));
            planner_used = true;
        }
        if options.skip_planner {
            scope_context.insert("_skip_planner".into(), json!(true));
        }
        if options.skip_external_rerank {
            scope_context.insert("_skip_external_rerank".into(), json!(true));
        }

        let rerank_enabled = request.rerank.as_ref().map(|r| r.enabled).unwrap_or(true);
        let (graph_relations, graph_node_types, graph_max_hops) = match &request.graph {
            Some(graph) => (
                graph.relation_types.clone(),
                graph.node_types.clone(),
                graph.max_hops,
            ),
            None => (None, None, None),
        };

        let embed_started = Instant::now();
        let query_embedding = self.embeddings.embed_query(&request.query).await?;
        let embed_ms = elapsed_ms(embed_started);

        let retrieve_started = Instant::now();
        let retrieval = self
            .repository
            .retrieve_hybrid_optimized(HybridSearchPayload {
                query: request.query.clone(),
                query_embedding,
                scope_context,
                k: request.k.max(1),
                fetch_k: request.fetch_k.max(1),
                enable_reranking: rerank_enabled,
                graph_filter_relation_types: graph_relations,
                graph_filter_node_types: graph_node_types,
                graph_max_hops,
            })
            .await;
        let response = retrieval.map_err(|err| {
            if err.code.starts_with("RETRIEVAL_RPC") {
                ApiError::unavailable("RETRIEVAL_CHUNKS_FAILED", err.message)
            } else {
                err
            }
        })?;
        let retrieve_ms = elapsed_ms(retrieve_started);

        let mut items = to_retrieval_items(&response.items);
        let engine_trace = response.trace;

        let mut rerank_warning: Option<String> = None;
        let mut external_rerank_applied = false;
        if rerank_enabled && !options.skip_external_rerank && !items.is_empty() {
            match self.apply_external_rerank(&request.query, items, request.k.max(1)).await {
                Ok((reranked, applied)) => {
                    items = reranked;
                    external_rerank_applied = applied;
                }
                Err((original, err)) => {
                    // Rerank degradation is never fatal for the request.
                    tracing::warn!(error = %err, "external rerank failed, keeping engine order");
                    rerank_warning = Some(format!("external_rerank_failed:{}", truncate(&err.message, 160)));
                    items = original;
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

        // Validation warnings first, then engine warnings, then local
        // degradations; first occurrence wins.
        let mut merged_warnings: Vec<String> = Vec::new();
        for warning in validated
            .warnings
            .iter()
            .map(|w| w.message.clone())
            .chain(engine_trace.warnings.iter().cloned())
            .chain(rerank_warning.into_iter())
        {
            let trimmed = warning.trim().to_string();
            if !trimmed.is_empty() && !merged_warnings.contains(&trimmed) {
                merged_warnings.push(trimmed);
            }
        }

        let mut warning_codes: Vec<String> = engine_trace
            .warning_codes
            .iter()
            .map(|c| c.trim().to_uppercase())
            .filter(|c| !c.is_empty())
            .collect();
        if warning_codes.is_empty()
            && merged_warnings.iter().any(|w| {
                let lower = w.to_lowercase();
                lower.contains("signature_mismatch") && lower.contains("hnsw")
            })
        {
            warning_codes.push("HYBRID_RPC_SIGNATURE_MISMATCH_HNSW".to_string());
        }
        warning_codes.dedup();

        let mut timings_ms = engine_trace.timings_ms.clone();
        timings_ms.entry("embed".to_string()).or_insert(embed_ms);
        timings_ms.entry("retrieve".to_string()).or_insert(retrieve_ms);
        timings_ms.insert("total".to_string(), elapsed_ms(started));

        let score_space = if external_rerank_applied {
            Some(ScoreSpace::Rerank.as_str().to_string())
        } else {
            engine_trace
                .score_space
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        let engine_mode = if engine_trace.engine_mode.trim().is_empty() {
            self.settings.engine_mode.clone()
        } else {
            engine_trace.engine_mode.clone()
        };

        Ok(HybridRetrievalResponse {
            items,
            trace: HybridTrace {
                filters_applied: engine_trace.filters_applied,
                engine_mode,
                planner_used: engine_trace.planner_used || planner_used,
                planner_multihop: engine_trace.planner_multihop,
                fallback_used: engine_trace.fallback_used,
                rpc_contract_status: engine_trace
                    .rpc_contract_status
                    .filter(|s| !s.trim().is_empty()),
                rpc_compat_mode: engine_trace
                    .rpc_compat_mode
                    .filter(|s| !s.trim().is_empty()),
                timings_ms,
                warnings: merged_warnings,
                warning_codes,
                scope_penalized_count: engine_trace.scope_penalized_count,
                scope_candidate_count: engine_trace.scope_candidate_count,
                scope_penalized_ratio: engine_trace
                    .scope_penalized_ratio
                    .filter(|r| r.is_finite()),
                score_space,
            },
        })
    }

    /// Re-rank items with the external cross-encoder.
    ///
    /// On success returns the reranked list (pruned to survivors) and
    /// whether reranking actually applied; an empty reranker response
    /// (provider disabled, everything pruned) keeps the engine order. On
    /// failure the original items come back with the error so the caller
    /// can degrade.
    async fn apply_external_rerank(
        &self,
        query: &str,
        items: Vec<RetrievalItem>,
        top_n: usize,
    ) -> Result<(Vec<RetrievalItem>, bool), (Vec<RetrievalItem>, ApiError)> {
        let documents: Vec<String> = items.iter().map(|i| i.content.clone()).collect();
        let reranked = match self.reranker.rerank_documents(query, &documents, top_n).await {
            Ok(reranked) => reranked,
            Err(err) => return Err((items, err)),
        };
        if reranked.is_empty() {
            return Ok((items, false));
        }

        let mut output = Vec::with_capacity(reranked.len());
        let mut seen = Vec::new();
        for ranked in reranked {
            let Some(item) = items.get(ranked.index) else {
                continue;
            };
            let identity = item_identity(item);
            if seen.contains(&identity) {
                continue;
            }
            seen.push(identity);

            let mut item = item.clone();
            item.score = ranked.relevance_score;
            item.metadata.insert(
                "jina_relevance_score".into(),
                json!(ranked.relevance_score),
            );
            item.metadata.insert(
                "score_space".into(),
                Value::String(ScoreSpace::Rerank.as_str().to_string()),
            );
            output.push(item);
        }
        Ok((output, true))
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
