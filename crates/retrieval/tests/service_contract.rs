//! End-to-end tests of the retrieval contract service against in-memory
//! fake ports: leak detection, RRF determinism, partial-failure policy,
//! policy filters and comprehensive fusion.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use evidence_config::{EmbeddingSettings, RetrievalSettings, RuntimeEnvironment};
use evidence_core::{
    ApiError, ComprehensiveRetrievalRequest, GraphNodeQuery, HybridRetrievalRequest,
    HybridSearchPayload, HybridSearchResponse, MergeOptions, MultiQueryRetrievalRequest,
    RepositoryRow, RepositoryTrace, RerankedDocument, Reranker, RetrievalPolicy,
    RetrievalRepository, SearchHint, SubQueryRequest, SummaryQuery,
};
use evidence_retrieval::{
    EmbeddingService, HybridRunOptions, KnowledgeService, LocalEmbeddingProvider,
    RetrievalContractService, ScopeResolver,
};

fn row(id: &str, content: &str, similarity: f64, tenant: &str) -> RepositoryRow {
    json!({
        "id": id,
        "content": content,
        "similarity": similarity,
        "score": similarity,
        "source_layer": "hybrid",
        "source_type": "content_chunk",
        "metadata": {"tenant_id": tenant},
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

/// Scripted repository: responses are keyed by query substring, with a
/// default fallback.
#[derive(Default)]
struct FakeRepository {
    hybrid_by_query: Mutex<HashMap<String, HybridSearchResponse>>,
    default_hybrid: Mutex<Option<HybridSearchResponse>>,
    graph_rows: Mutex<Vec<RepositoryRow>>,
    summary_rows: Mutex<Vec<RepositoryRow>>,
    leaf_chunk_ids: Mutex<Vec<String>>,
    chunk_rows: Mutex<Vec<RepositoryRow>>,
    fail_hybrid: Mutex<bool>,
}

impl FakeRepository {
    fn with_default_rows(rows: Vec<RepositoryRow>) -> Self {
        let repo = Self::default();
        *repo.default_hybrid.lock() = Some(HybridSearchResponse {
            items: rows,
            trace: RepositoryTrace::default(),
        });
        repo
    }

    fn script(&self, query_fragment: &str, response: HybridSearchResponse) {
        self.hybrid_by_query
            .lock()
            .insert(query_fragment.to_string(), response);
    }
}

#[async_trait]
impl RetrievalRepository for FakeRepository {
    async fn retrieve_hybrid_optimized(
        &self,
        payload: HybridSearchPayload,
    ) -> Result<HybridSearchResponse, ApiError> {
        if *self.fail_hybrid.lock() {
            return Err(ApiError::unavailable("RETRIEVAL_RPC_ERROR", "store down"));
        }
        let scripted = self.hybrid_by_query.lock();
        for (fragment, response) in scripted.iter() {
            if payload.query.contains(fragment) {
                return Ok(response.clone());
            }
        }
        drop(scripted);
        Ok(self.default_hybrid.lock().clone().unwrap_or_default())
    }

    async fn search_vectors_only(
        &self,
        _payload: HybridSearchPayload,
    ) -> Result<Vec<RepositoryRow>, ApiError> {
        Ok(Vec::new())
    }

    async fn search_fts_only(
        &self,
        _payload: HybridSearchPayload,
    ) -> Result<Vec<RepositoryRow>, ApiError> {
        Ok(Vec::new())
    }

    async fn retrieve_graph_nodes(
        &self,
        _query: GraphNodeQuery,
    ) -> Result<Vec<RepositoryRow>, ApiError> {
        Ok(self.graph_rows.lock().clone())
    }

    async fn match_summaries(
        &self,
        _vector: &[f32],
        _query: SummaryQuery,
    ) -> Result<Vec<RepositoryRow>, ApiError> {
        Ok(self.summary_rows.lock().clone())
    }

    async fn fetch_chunks_by_ids(&self, ids: &[String]) -> Result<Vec<RepositoryRow>, ApiError> {
        let mut rows: Vec<RepositoryRow> = self
            .chunk_rows
            .lock()
            .iter()
            .filter(|row| {
                row.get("id")
                    .and_then(Value::as_str)
                    .map(|id| ids.contains(&id.to_string()))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        for row in &mut rows {
            row.insert("similarity".into(), json!(0.0));
        }
        Ok(rows)
    }

    async fn resolve_summaries_to_chunk_ids(
        &self,
        _summary_ids: &[String],
    ) -> Result<Vec<String>, ApiError> {
        Ok(self.leaf_chunk_ids.lock().clone())
    }
}

/// Pass-through reranker; returns nothing so engine order stands.
struct NoopReranker;

#[async_trait]
impl Reranker for NoopReranker {
    async fn rerank_documents(
        &self,
        _query: &str,
        _documents: &[String],
        _top_n: usize,
    ) -> Result<Vec<RerankedDocument>, ApiError> {
        Ok(Vec::new())
    }
}

fn embedding_service() -> Arc<EmbeddingService> {
    let mut settings = EmbeddingSettings::default();
    settings.mode = evidence_config::EmbeddingMode::Local;
    settings.cache_max_size = 100;
    settings.cache_ttl_seconds = 60;
    Arc::new(EmbeddingService::new(
        HashMap::new(),
        Arc::new(LocalEmbeddingProvider::new(16)),
        &settings,
        RuntimeEnvironment::Development,
    ))
}

fn service_with(repository: Arc<FakeRepository>) -> Arc<RetrievalContractService> {
    Arc::new(RetrievalContractService::new(
        repository,
        embedding_service(),
        Arc::new(NoopReranker),
        ScopeResolver::default(),
        RetrievalSettings::default(),
    ))
}

fn hybrid_request(query: &str, tenant: &str) -> HybridRetrievalRequest {
    serde_json::from_value(json!({
        "query": query,
        "tenant_id": tenant,
        "k": 4,
        "fetch_k": 12,
    }))
    .expect("valid request")
}

// S2: a cross-tenant row in the repository response is a fatal breach.
#[tokio::test]
async fn test_hybrid_detects_cross_tenant_leak() {
    let repository = Arc::new(FakeRepository::with_default_rows(vec![row(
        "doc-1",
        "contenido ajeno",
        0.9,
        "tenant-other",
    )]));
    let service = service_with(repository);

    let err = service
        .run_hybrid(
            &hybrid_request("control de documentos", "tenant-demo"),
            HybridRunOptions::default(),
        )
        .await
        .expect_err("leak must be fatal");
    assert_eq!(err.status, 500);
    assert_eq!(err.code, "SECURITY_ISOLATION_BREACH");
}

#[tokio::test]
async fn test_hybrid_allows_global_rows() {
    let mut global_row = row("doc-g", "texto global", 0.8, "ignored");
    global_row.insert("metadata".into(), json!({"is_global": true}));
    let repository = Arc::new(FakeRepository::with_default_rows(vec![global_row]));
    let service = service_with(repository);

    let response = service
        .run_hybrid(
            &hybrid_request("requisitos generales", "tenant-demo"),
            HybridRunOptions::default(),
        )
        .await
        .expect("global rows are allowed");
    assert_eq!(response.items.len(), 1);
    assert!(response.trace.timings_ms.contains_key("total"));
}

#[tokio::test]
async fn test_hybrid_rejects_invalid_filters() {
    let repository = Arc::new(FakeRepository::with_default_rows(Vec::new()));
    let service = service_with(repository);

    let mut request = hybrid_request("auditoria ISO 9001", "tenant-demo");
    request.filters = json!({"surprise_key": 1}).as_object().cloned();
    let err = service
        .run_hybrid(&request, HybridRunOptions::default())
        .await
        .expect_err("unknown filter key must fail");
    assert_eq!(err.status, 400);
    assert_eq!(err.code, "SCOPE_VALIDATION_FAILED");
}

#[tokio::test]
async fn test_hybrid_lifts_hnsw_warning_code() {
    let repository = Arc::new(FakeRepository::default());
    repository.script(
        "control",
        HybridSearchResponse {
            items: vec![row("r1", "texto", 0.88, "tenant-a")],
            trace: RepositoryTrace {
                warnings: vec!["hybrid_rpc_signature_mismatch_hnsw_ef_search".to_string()],
                rpc_compat_mode: Some("without_hnsw_ef_search".to_string()),
                ..RepositoryTrace::default()
            },
        },
    );
    let service = service_with(repository);

    let response = service
        .run_hybrid(
            &hybrid_request("iso 9001 control documentado", "tenant-a"),
            HybridRunOptions::default(),
        )
        .await
        .expect("hybrid run");
    assert!(response
        .trace
        .warnings
        .iter()
        .any(|w| w == "hybrid_rpc_signature_mismatch_hnsw_ef_search"));
    assert!(response
        .trace
        .warning_codes
        .contains(&"HYBRID_RPC_SIGNATURE_MISMATCH_HNSW".to_string()));
    assert_eq!(
        response.trace.rpc_compat_mode.as_deref(),
        Some("without_hnsw_ef_search")
    );
}

fn multi_query_request(tenant: &str, queries: Vec<SubQueryRequest>) -> MultiQueryRetrievalRequest {
    MultiQueryRetrievalRequest {
        tenant_id: tenant.to_string(),
        collection_id: None,
        queries,
        merge: MergeOptions::default(),
    }
}

fn subquery(id: &str, query: &str) -> SubQueryRequest {
    serde_json::from_value(json!({"id": id, "query": query})).expect("valid subquery")
}

// S3: RRF merge order is deterministic given the grouped inputs.
#[tokio::test]
async fn test_multi_query_rrf_merge_order() {
    let repository = Arc::new(FakeRepository::default());
    repository.script(
        "primera",
        HybridSearchResponse {
            items: vec![
                row("doc-1", "texto uno", 0.95, "tenant-a"),
                row("doc-2", "texto dos", 0.90, "tenant-a"),
            ],
            trace: RepositoryTrace::default(),
        },
    );
    repository.script(
        "segunda",
        HybridSearchResponse {
            items: vec![
                row("doc-3", "texto tres", 0.92, "tenant-a"),
                row("doc-1", "texto uno", 0.91, "tenant-a"),
            ],
            trace: RepositoryTrace::default(),
        },
    );
    let service = service_with(repository);

    let response = service
        .run_multi_query(&multi_query_request(
            "tenant-a",
            vec![subquery("q1", "primera consulta"), subquery("q2", "segunda consulta")],
        ))
        .await
        .expect("multi query");

    let ids: Vec<String> = response
        .items
        .iter()
        .map(|item| {
            evidence_core::extract_row(item)
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    assert_eq!(ids, vec!["doc-1", "doc-3", "doc-2"]);
    assert!(!response.partial);
    assert_eq!(response.trace.score_space, "rrf");
    for item in &response.items {
        assert_eq!(item.metadata.get("score_space"), Some(&json!("rrf")));
    }
}

// S4: every sub-query failing surfaces as 502 with per-record details.
#[tokio::test]
async fn test_multi_query_all_failed() {
    let repository = Arc::new(FakeRepository::default());
    *repository.fail_hybrid.lock() = true;
    let service = service_with(repository);

    let err = service
        .run_multi_query(&multi_query_request(
            "tenant-a",
            vec![subquery("q1", "una"), subquery("q2", "otra")],
        ))
        .await
        .expect_err("all subqueries failed");
    assert_eq!(err.status, 502);
    assert_eq!(err.code, "MULTI_QUERY_ALL_FAILED");
    let details = err.details.expect("details");
    assert_eq!(
        details
            .get("subqueries")
            .and_then(Value::as_array)
            .map(Vec::len),
        Some(2)
    );
}

// S5: all-empty success is fail-soft, not an error.
#[tokio::test]
async fn test_multi_query_all_empty_is_fail_soft() {
    let repository = Arc::new(FakeRepository::with_default_rows(Vec::new()));
    let service = service_with(repository);

    let response = service
        .run_multi_query(&multi_query_request(
            "tenant-a",
            vec![subquery("q1", "una"), subquery("q2", "otra")],
        ))
        .await
        .expect("empty is ok");
    assert!(response.items.is_empty());
    assert!(!response.partial);
    assert_eq!(response.trace.score_space, "rrf");
}

#[tokio::test]
async fn test_multi_query_partial_on_single_failure() {
    let repository = Arc::new(FakeRepository::default());
    repository.script(
        "buena",
        HybridSearchResponse {
            items: vec![row("doc-1", "texto", 0.9, "tenant-a")],
            trace: RepositoryTrace::default(),
        },
    );
    repository.script(
        "rota",
        HybridSearchResponse {
            items: vec![row("doc-2", "texto dos", 0.9, "tenant-other")],
            trace: RepositoryTrace::default(),
        },
    );
    let service = service_with(repository);

    let response = service
        .run_multi_query(&multi_query_request(
            "tenant-a",
            vec![subquery("q1", "buena consulta"), subquery("q2", "rota consulta")],
        ))
        .await
        .expect("partial result");
    assert!(response.partial);
    assert_eq!(response.items.len(), 1);
    let failed: Vec<_> = response
        .subqueries
        .iter()
        .filter(|sq| sq.error_code.is_some())
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(
        failed[0].error_code.as_deref(),
        Some("SECURITY_ISOLATION_BREACH")
    );
}

#[tokio::test]
async fn test_multi_query_duplicates_are_skipped() {
    let repository = Arc::new(FakeRepository::with_default_rows(vec![row(
        "doc-1", "texto", 0.9, "tenant-a",
    )]));
    let service = service_with(repository);

    let response = service
        .run_multi_query(&multi_query_request(
            "tenant-a",
            vec![
                subquery("q1", "misma consulta"),
                subquery("q2", "MISMA   consulta"),
            ],
        ))
        .await
        .expect("dedup works");
    let duplicate = response
        .subqueries
        .iter()
        .find(|sq| sq.error_code.as_deref() == Some("SUBQUERY_SKIPPED_DUPLICATE"))
        .expect("duplicate record");
    assert_eq!(duplicate.id, "q2");
    assert_eq!(response.items.len(), 1);
}

#[tokio::test]
async fn test_multi_query_drops_scope_penalized_branch() {
    let repository = Arc::new(FakeRepository::default());
    repository.script(
        "penalizada",
        HybridSearchResponse {
            items: vec![row("doc-1", "texto", 0.9, "tenant-a")],
            trace: RepositoryTrace {
                scope_penalized_ratio: Some(0.99),
                ..RepositoryTrace::default()
            },
        },
    );
    let service = service_with(repository);

    let response = service
        .run_multi_query(&multi_query_request(
            "tenant-a",
            vec![subquery("q1", "penalizada consulta")],
        ))
        .await
        .expect("fail-soft");
    assert!(response.items.is_empty());
    assert_eq!(
        response.subqueries[0].error_code.as_deref(),
        Some("SUBQUERY_OUT_OF_SCOPE")
    );
}

fn comprehensive_request(query: &str, policy: Option<RetrievalPolicy>) -> ComprehensiveRetrievalRequest {
    ComprehensiveRetrievalRequest {
        query: query.to_string(),
        tenant_id: "tenant-a".to_string(),
        collection_id: None,
        k: 8,
        fetch_k: 40,
        filters: None,
        graph: None,
        retrieval_policy: policy,
    }
}

fn tagged_row(id: &str, content: &str, layer: &str) -> RepositoryRow {
    json!({
        "id": id,
        "content": content,
        "similarity": 0.8,
        "score": 0.8,
        "source_layer": layer,
        "source_type": layer,
        "metadata": {"tenant_id": "tenant-a"},
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

// Invariant 3: quota order chunks(3) / graph(2) / raptor(1) before overflow.
#[tokio::test]
async fn test_comprehensive_quota_order() {
    let repository = Arc::new(FakeRepository::with_default_rows(
        (0..5)
            .map(|i| tagged_row(&format!("c{i}"), &format!("chunk {i}"), "hybrid"))
            .collect(),
    ));
    *repository.graph_rows.lock() = (0..4)
        .map(|i| tagged_row(&format!("g{i}"), &format!("graph {i}"), "graph"))
        .collect();
    *repository.summary_rows.lock() = (0..3)
        .map(|i| tagged_row(&format!("r{i}"), &format!("summary {i}"), "raptor"))
        .collect();
    let service = service_with(repository);

    let response = service
        .run_comprehensive(&comprehensive_request("vision general del sistema", None))
        .await
        .expect("comprehensive");

    let sources: Vec<String> = response
        .items
        .iter()
        .map(|item| {
            item.metadata
                .get("fusion_source")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        })
        .collect();
    assert_eq!(
        &sources[..6],
        &["chunks", "chunks", "chunks", "graph", "graph", "raptor"]
    );
    assert_eq!(response.trace.score_space, "mixed");
    assert!(response.trace.timings_ms.contains_key("total"));
    assert!(response.latency_ms >= 0.0);
}

// Pipeline failures degrade to warnings, not request failures.
#[tokio::test]
async fn test_comprehensive_degrades_failed_chunks_pipeline() {
    let repository = Arc::new(FakeRepository::default());
    *repository.fail_hybrid.lock() = true;
    *repository.graph_rows.lock() = vec![tagged_row("g0", "graph evidence", "graph")];
    let service = service_with(repository);

    let response = service
        .run_comprehensive(&comprehensive_request("que exige el sistema", None))
        .await
        .expect("degraded comprehensive");
    assert_eq!(response.items.len(), 1);
    assert!(response
        .trace
        .warnings
        .iter()
        .any(|w| w.starts_with("chunks_pipeline_failed:")));
}

// S7: structural noise is dropped from the merged set.
#[tokio::test]
async fn test_comprehensive_drops_structural_noise() {
    let mut toc_row = tagged_row(
        "toc",
        "9.1 Evaluacion ............ 14\n10 Mejora ............ 15",
        "hybrid",
    );
    toc_row.insert("metadata".into(), json!({"tenant_id": "tenant-a", "is_toc": true}));
    let repository = Arc::new(FakeRepository::with_default_rows(vec![
        toc_row,
        tagged_row("body", "La organizacion debe evaluar el cumplimiento.", "hybrid"),
    ]));
    let service = service_with(repository);

    let response = service
        .run_comprehensive(&comprehensive_request("evaluacion del cumplimiento", None))
        .await
        .expect("comprehensive");
    assert_eq!(response.items.len(), 1);
    assert!(response.items[0].content.starts_with("La organizacion"));
    assert!(response.trace.policy.noise_reduction.dropped_structural >= 1);
}

// S8: min-score gate bypasses rank-derived score spaces.
#[tokio::test]
async fn test_comprehensive_min_score_bypasses_rrf_space() {
    let mut rrf_row = tagged_row("rrf-item", "evidencia rrf", "hybrid");
    rrf_row.insert(
        "metadata".into(),
        json!({"tenant_id": "tenant-a", "score_space": "rrf"}),
    );
    rrf_row.insert("similarity".into(), json!(0.01));
    rrf_row.insert("score".into(), json!(0.01));
    let repository = Arc::new(FakeRepository::with_default_rows(vec![
        tagged_row("high", "evidencia fuerte", "hybrid"),
        rrf_row,
    ]));
    let service = service_with(repository);

    let policy = RetrievalPolicy {
        min_score: Some(0.7),
        ..RetrievalPolicy::default()
    };
    let response = service
        .run_comprehensive(&comprehensive_request("evidencia", Some(policy)))
        .await
        .expect("comprehensive");
    assert_eq!(response.items.len(), 2);
    assert_eq!(response.trace.policy.min_score.score_space_bypassed, 1);
}

// Search hints expand the effective query and are reported in the trace.
#[tokio::test]
async fn test_comprehensive_applies_search_hints() {
    let repository = Arc::new(FakeRepository::default());
    repository.script(
        "economia circular",
        HybridSearchResponse {
            items: vec![row("hinted", "requisitos de economia circular", 0.9, "tenant-a")],
            trace: RepositoryTrace::default(),
        },
    );
    let service = service_with(repository);

    let policy = RetrievalPolicy {
        search_hints: vec![SearchHint {
            term: "ec".to_string(),
            expand_to: vec!["economia circular".to_string()],
        }],
        ..RetrievalPolicy::default()
    };
    let response = service
        .run_comprehensive(&comprehensive_request("requisitos de ec", Some(policy)))
        .await
        .expect("comprehensive");
    assert!(response.trace.hints.applied);
    assert_eq!(response.items.len(), 1);
}

// Coverage diagnostics report standards with no supporting evidence.
#[tokio::test]
async fn test_comprehensive_reports_missing_scopes() {
    let mut scoped = tagged_row("s1", "requisito de calidad", "hybrid");
    scoped.insert("source_standard".into(), json!("ISO 9001"));
    let repository = Arc::new(FakeRepository::with_default_rows(vec![scoped]));
    let service = service_with(repository);

    let policy = RetrievalPolicy {
        require_all_scopes: true,
        ..RetrievalPolicy::default()
    };
    let response = service
        .run_comprehensive(&comprehensive_request(
            "compara ISO 9001 con ISO 14001",
            Some(policy),
        ))
        .await
        .expect("comprehensive");
    assert_eq!(
        response.trace.coverage.missing_scopes,
        vec!["ISO 14001".to_string()]
    );
}

fn summary_row(id: &str, similarity: f64) -> RepositoryRow {
    json!({
        "id": id,
        "content": format!("resumen {id}"),
        "similarity": similarity,
        "source_layer": "raptor",
        "source_type": "summary_node",
        "metadata": {"tenant_id": "tenant-a"},
    })
    .as_object()
    .cloned()
    .unwrap_or_default()
}

#[tokio::test]
async fn test_summaries_returns_matched_nodes() {
    let repository = Arc::new(FakeRepository::default());
    *repository.summary_rows.lock() = vec![summary_row("s1", 0.72), summary_row("s2", 0.61)];
    let service = service_with(repository);

    let request: evidence_core::SummaryRetrievalRequest = serde_json::from_value(json!({
        "query": "resumen del sistema de gestion",
        "tenant_id": "tenant-a",
        "summary_k": 2,
    }))
    .expect("valid request");
    let response = service.run_summaries(&request).await.expect("summaries");
    assert_eq!(response.items.len(), 2);
    assert_eq!(response.trace.engine_mode, "summary");
    assert!(response.trace.timings_ms.contains_key("total"));
}

// Hydrated leaf chunks inherit the best summary similarity over the
// 0.0 the hydration RPC seeds.
#[tokio::test]
async fn test_summaries_expand_to_leaf_chunks() {
    let repository = Arc::new(FakeRepository::default());
    *repository.summary_rows.lock() = vec![summary_row("s1", 0.72)];
    *repository.leaf_chunk_ids.lock() = vec!["leaf-1".to_string()];
    *repository.chunk_rows.lock() = vec![row("leaf-1", "texto del capitulo", 0.9, "tenant-a")];
    let service = service_with(repository);

    let request: evidence_core::SummaryRetrievalRequest = serde_json::from_value(json!({
        "query": "resumen del sistema",
        "tenant_id": "tenant-a",
        "include_chunks": true,
    }))
    .expect("valid request");
    let response = service.run_summaries(&request).await.expect("summaries");
    assert_eq!(response.items.len(), 2);

    let chunk = response
        .items
        .iter()
        .find(|item| item.metadata.get("source_layer") == Some(&json!("graph_grounded")))
        .expect("hydrated chunk");
    assert_eq!(chunk.metadata.get("similarity"), Some(&json!(0.72)));
}

#[tokio::test]
async fn test_summaries_detect_cross_tenant_leak() {
    let repository = Arc::new(FakeRepository::default());
    *repository.summary_rows.lock() = vec![{
        let mut r = summary_row("s1", 0.7);
        r.insert("metadata".into(), json!({"tenant_id": "tenant-other"}));
        r
    }];
    let service = service_with(repository);

    let request: evidence_core::SummaryRetrievalRequest = serde_json::from_value(json!({
        "query": "resumen",
        "tenant_id": "tenant-a",
    }))
    .expect("valid request");
    let err = service
        .run_summaries(&request)
        .await
        .expect_err("leak must be fatal");
    assert_eq!(err.code, "SECURITY_ISOLATION_BREACH");
}

// S6: ambiguous scope short-circuits the knowledge path.
#[tokio::test]
async fn test_knowledge_answer_ambiguous_scope() {
    let repository = Arc::new(FakeRepository::with_default_rows(vec![row(
        "doc-1", "texto", 0.9, "tenant-a",
    )]));
    let service = service_with(repository);
    let knowledge = KnowledgeService::new(service);

    let context = knowledge
        .grounded_context("Que exige la clausula 9.1.2?", "tenant-demo", None)
        .await
        .expect("ambiguous context");
    assert_eq!(context.mode, "AMBIGUOUS_SCOPE");
    assert!(context.context_chunks.is_empty());
    assert!(context.requires_scope_clarification);
    assert!(!context.scope_candidates.is_empty());
    assert!(context.scope_message.is_some());
}

#[tokio::test]
async fn test_knowledge_answer_grounded_context() {
    let repository = Arc::new(FakeRepository::default());
    repository.script(
        "politica",
        HybridSearchResponse {
            items: vec![{
                let mut r = row("doc-1", "la politica ambiental debe", 0.9, "tenant-a");
                r.insert("source_standard".into(), json!("ISO 14001"));
                r
            }],
            trace: RepositoryTrace::default(),
        },
    );
    let service = service_with(repository);
    let knowledge = KnowledgeService::new(service);

    let context = knowledge
        .grounded_context("politica ambiental ISO 14001", "tenant-a", None)
        .await
        .expect("grounded context");
    assert_eq!(context.mode, "HYBRID");
    assert_eq!(context.context_chunks.len(), 1);
    assert_eq!(context.citations, vec!["doc-1"]);
    assert!(!context.scope_mismatch_detected);
}

// Explain decorates hybrid results with score components.
#[tokio::test]
async fn test_explain_reports_score_components() {
    let repository = Arc::new(FakeRepository::with_default_rows(vec![row(
        "doc-1",
        "evidencia",
        0.88,
        "tenant-a",
    )]));
    let service = service_with(repository);

    let request: evidence_core::ExplainRetrievalRequest = serde_json::from_value(json!({
        "query": "evidencia de auditoria",
        "tenant_id": "tenant-a",
        "top_n": 1,
    }))
    .expect("valid request");
    let response = service.run_explain(&request).await.expect("explain");
    assert_eq!(response.items.len(), 1);
    let explain = &response.items[0].explain;
    assert!((explain.score_components.base_similarity - 0.88).abs() < 1e-9);
    assert_eq!(explain.retrieval_path.source_layer, "hybrid");
    assert_eq!(response.top_n, 1);
}
