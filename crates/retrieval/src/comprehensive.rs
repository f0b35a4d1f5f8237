//! Comprehensive coordinator (late fusion)
//!
//! Maximizes recall by fanning out to three independent pipelines
//! (chunks, graph nodes, hierarchical summaries) and interleaving their
//! outputs under fixed quotas. A failed pipeline degrades to empty
//! results with a trace warning; it never fails the request.

use std::time::Instant;

use serde_json::{json, Value};

use evidence_core::{
    extract_clause_refs, to_retrieval_items, ApiError, ComprehensiveRetrievalRequest,
    ComprehensiveRetrievalResponse, ComprehensiveTrace, CoverageTrace, GraphNodeQuery,
    HybridRetrievalRequest, HybridTrace, PipelineCounts, PolicyTrace, RerankOptions,
    RetrievalItem, RetrievalPolicy, ScoreSpace, SourceLayer, SummaryQuery,
};

use crate::fusion::{fuse_late_results, missing_clause_refs, missing_scopes};
use crate::policy::{apply_search_hints, filter_items_by_min_score, reduce_structural_noise};
use crate::service::{HybridRunOptions, RetrievalContractService};

impl RetrievalContractService {
    /// Run the three-layer fan-out and late fusion.
    pub async fn run_comprehensive(
        &self,
        request: &ComprehensiveRetrievalRequest,
    ) -> Result<ComprehensiveRetrievalResponse, ApiError> {
        let started = Instant::now();
        let policy = request.retrieval_policy.clone().unwrap_or_default();

        let (expanded_query, hint_trace) = apply_search_hints(&request.query, &policy.search_hints);

        let graph_max_hops = self.clamp_graph_hops(
            request.graph.as_ref().and_then(|g| g.max_hops),
        );

        let k = request.k.max(1);
        let chunks_request = HybridRetrievalRequest {
            query: expanded_query.clone(),
            tenant_id: request.tenant_id.clone(),
            collection_id: request.collection_id.clone(),
            k,
            fetch_k: request.fetch_k.max(1),
            filters: request.filters.clone(),
            rerank: Some(RerankOptions { enabled: true }),
            graph: None,
            retrieval_plan: None,
        };

        let (chunks_result, graph_result, raptor_result) = tokio::join!(
            self.pipeline_chunks(&chunks_request),
            self.pipeline_graph(&expanded_query, request, graph_max_hops, k),
            self.pipeline_raptor(&expanded_query, request, k),
        );

        let mut trace_warnings: Vec<String> = Vec::new();
        let (chunks_items, chunks_trace) = match chunks_result {
            Ok((items, trace)) => (items, Some(trace)),
            Err(err) => {
                // A tenant-isolation breach inside the chunks pipeline is
                // fatal, never degraded.
                if err.code == "SECURITY_ISOLATION_BREACH" {
                    return Err(err);
                }
                trace_warnings.push(format!(
                    "chunks_pipeline_failed:{}",
                    truncate(&err.message, 160)
                ));
                (Vec::new(), None)
            }
        };
        let graph_items = match graph_result {
            Ok(items) => items,
            Err(err) => {
                trace_warnings.push(format!(
                    "graph_pipeline_failed:{}",
                    truncate(&err.message, 160)
                ));
                Vec::new()
            }
        };
        let raptor_items = match raptor_result {
            Ok(items) => items,
            Err(err) => {
                trace_warnings.push(format!(
                    "raptor_pipeline_failed:{}",
                    truncate(&err.message, 160)
                ));
                Vec::new()
            }
        };

        let pipeline_counts = PipelineCounts {
            chunks: chunks_items.len(),
            graph: graph_items.len(),
            raptor: raptor_items.len(),
            merged: 0,
        };

        let merged = fuse_late_results(&chunks_items, &graph_items, &raptor_items, k);

        let (merged, min_score_trace) = filter_items_by_min_score(merged, policy.min_score);
        let (merged, noise_trace) = if policy.noise_reduction {
            reduce_structural_noise(merged)
        } else {
            (merged, Default::default())
        };

        let trace = self.build_comprehensive_trace(
            request,
            &policy,
            &merged,
            pipeline_counts,
            chunks_trace,
            trace_warnings,
            hint_trace,
            PolicyTrace {
                min_score: min_score_trace,
                noise_reduction: noise_trace,
            },
            started,
        );

        Ok(ComprehensiveRetrievalResponse {
            items: merged,
            trace,
            latency_ms: elapsed_ms(started),
        })
    }

    /// Requested hops win over the default but never exceed the
    /// configured ceiling (itself capped at 4).
    pub(crate) fn clamp_graph_hops(&self, requested: Option<u32>) -> u32 {
        let cap = self.settings.graph_expansion_max_hops.clamp(1, 4);
        requested.unwrap_or(cap).clamp(1, cap)
    }

    async fn pipeline_chunks(
        &self,
        request: &HybridRetrievalRequest,
    ) -> Result<(Vec<RetrievalItem>, HybridTrace), ApiError> {
        let response = self.run_hybrid(request, HybridRunOptions::default()).await?;
        let mut items = response.items;
        for item in &mut items {
            item.metadata.insert("fusion_source".into(), json!("chunks"));
        }
        Ok((items, response.trace))
    }

    async fn pipeline_graph(
        &self,
        query: &str,
        request: &ComprehensiveRetrievalRequest,
        max_hops: u32,
        k: usize,
    ) -> Result<Vec<RetrievalItem>, ApiError> {
        let rows = self
            .repository
            .retrieve_graph_nodes(GraphNodeQuery {
                query: query.to_string(),
                tenant_id: request.tenant_id.clone(),
                collection_id: request.collection_id.clone(),
                k,
                max_hops,
                relation_types: request.graph.as_ref().and_then(|g| g.relation_types.clone()),
                node_types: request.graph.as_ref().and_then(|g| g.node_types.clone()),
            })
            .await?;
        let mut items = to_retrieval_items(&rows);
        for item in &mut items {
            item.metadata.insert("fusion_source".into(), json!("graph"));
            ensure_source_layer(item, SourceLayer::Graph);
        }
        Ok(items)
    }

    async fn pipeline_raptor(
        &self,
        query: &str,
        request: &ComprehensiveRetrievalRequest,
        k: usize,
    ) -> Result<Vec<RetrievalItem>, ApiError> {
        let vector = self.embeddings.embed_query(query).await?;
        let rows = self
            .repository
            .match_summaries(
                &vector,
                SummaryQuery {
                    tenant_id: request.tenant_id.clone(),
                    collection_id: request.collection_id.clone(),
                    limit: k,
                },
            )
            .await?;
        let mut items = to_retrieval_items(&rows);
        for item in &mut items {
            item.metadata.insert("fusion_source".into(), json!("raptor"));
            ensure_source_layer(item, SourceLayer::Raptor);
        }
        Ok(items)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_comprehensive_trace(
        &self,
        request: &ComprehensiveRetrievalRequest,
        policy: &RetrievalPolicy,
        merged_items: &[RetrievalItem],
        mut pipeline_counts: PipelineCounts,
        chunks_trace: Option<HybridTrace>,
        mut trace_warnings: Vec<String>,
        hint_trace: evidence_core::HintTrace,
        policy_trace: PolicyTrace,
        started: Instant,
    ) -> ComprehensiveTrace {
        pipeline_counts.merged = merged_items.len();

        let resolution = self.resolver().resolve(&request.query);
        let query_clause_refs = extract_clause_refs(&request.query);
        let coverage = CoverageTrace {
            missing_scopes: missing_scopes(
                merged_items,
                &resolution.requested_standards,
                policy.require_all_scopes,
            ),
            missing_clause_refs: missing_clause_refs(
                merged_items,
                &query_clause_refs,
                policy.min_clause_refs_required,
            ),
            requested_standards: resolution.requested_standards,
            query_clause_refs,
        };

        if let Some(chunk_trace) = &chunks_trace {
            for warning in &chunk_trace.warnings {
                if !trace_warnings.contains(warning) {
                    trace_warnings.push(warning.clone());
                }
            }
        }

        ComprehensiveTrace {
            engine_mode: "comprehensive".to_string(),
            pipeline_counts,
            hints: hint_trace,
            policy: policy_trace,
            coverage,
            chunks_trace,
            warnings: trace_warnings,
            timings_ms: std::collections::HashMap::from([(
                "total".to_string(),
                elapsed_ms(started),
            )]),
            // Chunks carry rerank/similarity scores, graph and raptor
            // carry their own scales.
            score_space: ScoreSpace::Mixed.as_str().to_string(),
        }
    }
}

fn ensure_source_layer(item: &mut RetrievalItem, layer: SourceLayer) {
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

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}
