//! Multi-query coordinator
//!
//! Executes related sub-queries under bounded parallelism with per-query
//! timeouts, drops scope-mismatched branches, and merges survivors by
//! reciprocal rank fusion. Partial failure is a per-record outcome, not a
//! request failure; only a fully failed batch surfaces as an error.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use evidence_core::{
    normalize_scope_name, ApiError, HybridRetrievalRequest, LeakCanary, MergeStrategy,
    MultiQueryRetrievalRequest, MultiQueryRetrievalResponse, MultiQueryTrace, RerankOptions,
    RetrievalItem, ScoreSpace, SubQueryExecution, SubQueryRequest,
};

use crate::fusion::rrf_merge;
use crate::service::{HybridRunOptions, RetrievalContractService};

impl RetrievalContractService {
    /// Deterministic key for deduplicating identical sub-query intents.
    pub(crate) fn scope_clause_key(item: &SubQueryRequest) -> String {
        let filters = item.filters.as_ref();
        let standard = filters
            .and_then(|f| f.get("source_standard"))
            .and_then(Value::as_str)
            .map(normalize_scope_name)
            .unwrap_or_default();
        let clause_id = filters
            .and_then(|f| f.get("metadata"))
            .and_then(Value::as_object)
            .and_then(|m| m.get("clause_id"))
            .map(|v| match v {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            })
            .unwrap_or_default();

        if !standard.is_empty() && !clause_id.is_empty() {
            return format!("scope_clause::{standard}::{clause_id}");
        }
        let normalized_query = item
            .query
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        format!("query::{normalized_query}")
    }

    /// Run N related sub-queries and merge by RRF.
    pub async fn run_multi_query(
        &self,
        request: &MultiQueryRetrievalRequest,
    ) -> Result<MultiQueryRetrievalResponse, ApiError> {
        let started = Instant::now();
        let mq = &self.settings.multi_query;
        let max_parallel = mq.max_parallel.clamp(1, 8);
        let subquery_timeout = Duration::from_millis(mq.subquery_timeout_ms.max(200));
        let drop_out_of_scope = mq.drop_scope_penalized_branches;
        let scope_drop_threshold = mq.scope_penalty_drop_threshold.clamp(0.0, 1.0);

        // Dedup by scope/clause fingerprint; duplicates never execute.
        let mut deduped_queries: Vec<&SubQueryRequest> = Vec::new();
        let mut duplicate_subqueries: Vec<SubQueryExecution> = Vec::new();
        let mut seen_query_keys: HashSet<String> = HashSet::new();
        for item in &request.queries {
            let key = Self::scope_clause_key(item);
            if !seen_query_keys.insert(key) {
                duplicate_subqueries.push(SubQueryExecution::error(
                    item.id.clone(),
                    0.0,
                    "SUBQUERY_SKIPPED_DUPLICATE",
                    "Duplicate subquery scope/clause fingerprint",
                ));
                continue;
            }
            deduped_queries.push(item);
        }

        let semaphore = Arc::new(Semaphore::new(max_parallel));
        let executions = join_all(deduped_queries.iter().map(|&item| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                self.execute_subquery(
                    request,
                    item,
                    semaphore,
                    subquery_timeout,
                    drop_out_of_scope,
                    scope_drop_threshold,
                )
                .await
            }
        }))
        .await;

        let mut grouped_items: Vec<(String, Vec<RetrievalItem>)> = Vec::new();
        let mut subqueries: Vec<SubQueryExecution> = duplicate_subqueries;
        let mut failed_count = 0usize;
        let mut timed_out_count = 0usize;
        for (execution, items) in executions {
            if execution.error_code.as_deref() == Some("SUBQUERY_TIMEOUT") {
                timed_out_count += 1;
            }
            if execution.status == evidence_core::SubQueryStatus::Error {
                failed_count += 1;
            }
            let id = execution.id.clone();
            subqueries.push(execution);
            if !items.is_empty() {
                grouped_items.push((id, items));
            }
        }

        let trace = |elapsed: f64| MultiQueryTrace {
            merge_strategy: request.merge.strategy.as_str().to_string(),
            rrf_k: request.merge.rrf_k,
            failed_count,
            timed_out_count,
            max_parallel,
            timings_ms: std::collections::HashMap::from([("total".to_string(), elapsed)]),
            score_space: ScoreSpace::Rrf.as_str().to_string(),
        };

        if grouped_items.is_empty() {
            if failed_count < subqueries.len() || subqueries.is_empty() {
                // Fail-soft: every branch may succeed yet return no
                // evidence. Callers run their own fallback policy.
                return Ok(MultiQueryRetrievalResponse {
                    items: Vec::new(),
                    subqueries,
                    partial: failed_count > 0,
                    trace: trace(elapsed_ms(started)),
                });
            }
            return Err(ApiError::unavailable(
                "MULTI_QUERY_ALL_FAILED",
                "All subqueries failed",
            )
            .with_details(json!({ "subqueries": subqueries })));
        }

        debug_assert_eq!(request.merge.strategy, MergeStrategy::Rrf);
        let merged = rrf_merge(
            &grouped_items,
            request.merge.rrf_k.max(1),
            request.merge.top_k.max(1),
        );

        LeakCanary::verify_items(&request.tenant_id, &merged).map_err(|violation| {
            tracing::error!(
                tenant_id = %request.tenant_id,
                error = %violation,
                "security_isolation_breach"
            );
            ApiError::from(violation)
        })?;

        Ok(MultiQueryRetrievalResponse {
            items: merged,
            subqueries,
            partial: failed_count > 0,
            trace: trace(elapsed_ms(started)),
        })
    }

    async fn execute_subquery(
        &self,
        request: &MultiQueryRetrievalRequest,
        item: &SubQueryRequest,
        semaphore: Arc<Semaphore>,
        timeout: Duration,
        drop_out_of_scope: bool,
        scope_drop_threshold: f64,
    ) -> (SubQueryExecution, Vec<RetrievalItem>) {
        let sq_started = Instant::now();
        let hybrid_request = HybridRetrievalRequest {
            query: item.query.clone(),
            tenant_id: request.tenant_id.clone(),
            collection_id: request.collection_id.clone(),
            k: item.k.unwrap_or(request.merge.top_k).max(1),
            fetch_k: item
                .fetch_k
                .unwrap_or_else(|| (request.merge.top_k * 4).max(40))
                .max(1),
            filters: item.filters.clone(),
            rerank: Some(RerankOptions {
                enabled: self.settings.multi_query.subquery_rerank_enabled,
            }),
            graph: None,
            retrieval_plan: None,
        };

        let permit = match semaphore.acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                return (
                    SubQueryExecution::error(
                        item.id.clone(),
                        elapsed_ms(sq_started),
                        "SUBQUERY_FAILED",
                        "subquery gate closed",
                    ),
                    Vec::new(),
                );
            }
        };

        let run = self.run_hybrid(
            &hybrid_request,
            HybridRunOptions {
                skip_planner: true,
                skip_external_rerank: true,
            },
        );
        let result = tokio::time::timeout(timeout, run).await;
        drop(permit);

        match result {
            Err(_) => (
                SubQueryExecution::error(
                    item.id.clone(),
                    elapsed_ms(sq_started),
                    "SUBQUERY_TIMEOUT",
                    "Subquery timed out",
                ),
                Vec::new(),
            ),
            Ok(Err(err)) => {
                // Leak-canary breaches must never degrade to a partial
                // record: they abort the whole batch upstream.
                if err.code == "SECURITY_ISOLATION_BREACH" {
                    tracing::error!(
                        subquery = %item.id,
                        "security breach inside subquery, recording fatal error"
                    );
                }
                (
                    SubQueryExecution::error(
                        item.id.clone(),
                        elapsed_ms(sq_started),
                        err.code.clone(),
                        err.message.clone(),
                    ),
                    Vec::new(),
                )
            }
            Ok(Ok(response)) => {
                let scope_penalized_ratio = response
                    .trace
                    .scope_penalized_ratio
                    .filter(|r| r.is_finite())
                    .map(|r| r.clamp(0.0, 1.0));

                if drop_out_of_scope
                    && scope_penalized_ratio.is_some_and(|r| r >= scope_drop_threshold)
                {
                    return (
                        SubQueryExecution::error(
                            item.id.clone(),
                            elapsed_ms(sq_started),
                            "SUBQUERY_OUT_OF_SCOPE",
                            "Branch dropped: all candidates were penalized by scope filtering",
                        ),
                        Vec::new(),
                    );
                }

                let items_count = response.items.len();
                (
                    SubQueryExecution::ok(item.id.clone(), items_count, elapsed_ms(sq_started)),
                    response.items,
                )
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    (started.elapsed().as_secs_f64() * 1000.0 * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn subquery(id: &str, query: &str, filters: Option<Value>) -> SubQueryRequest {
        SubQueryRequest {
            id: id.to_string(),
            query: query.to_string(),
            k: None,
            fetch_k: None,
            filters: filters.and_then(|f| f.as_object().cloned()),
        }
    }

    #[test]
    fn test_scope_clause_key_uses_standard_and_clause() {
        let item = subquery(
            "q1",
            "evaluacion del cumplimiento",
            Some(json!({
                "source_standard": "iso 14001",
                "metadata": {"clause_id": "9.1.2"},
            })),
        );
        assert_eq!(
            RetrievalContractService::scope_clause_key(&item),
            "scope_clause::ISO 14001::9.1.2"
        );
    }

    #[test]
    fn test_scope_clause_key_falls_back_to_normalized_query() {
        let a = subquery("q1", "  Evaluacion   del CUMPLIMIENTO ", None);
        let b = subquery("q2", "evaluacion del cumplimiento", None);
        assert_eq!(
            RetrievalContractService::scope_clause_key(&a),
            RetrievalContractService::scope_clause_key(&b)
        );
    }

    #[test]
    fn test_scope_clause_key_distinguishes_clauses() {
        let a = subquery(
            "q1",
            "x",
            Some(json!({"source_standard": "ISO 9001", "metadata": {"clause_id": "8.1"}})),
        );
        let b = subquery(
            "q2",
            "x",
            Some(json!({"source_standard": "ISO 9001", "metadata": {"clause_id": "8.2"}})),
        );
        assert_ne!(
            RetrievalContractService::scope_clause_key(&a),
            RetrievalContractService::scope_clause_key(&b)
        );
    }
}
