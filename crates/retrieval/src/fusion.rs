//! Fusion engine
//!
//! Deterministic merging of heterogeneous retrieval outputs: quota-based
//! late fusion for the comprehensive path, reciprocal rank fusion for
//! multi-query, and coverage diagnostics over the merged set.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde_json::Value;

use evidence_core::{
    extract_row, item_clause_refs, item_identity, normalize_scope_name, Metadata, RetrievalItem,
    ScoreSpace,
};
use evidence_config::constants::retrieval::{QUOTA_CHUNKS, QUOTA_GRAPH, QUOTA_RAPTOR};

/// Assemble final results from parallel pipelines using strict quotas.
///
/// Slots fill in fixed order: chunks up to 3, graph up to 2, raptor up to
/// 1, skipping identities already seen. Remaining capacity up to `k` is
/// drained from chunks, then graph, then raptor.
pub fn fuse_late_results(
    chunks: &[RetrievalItem],
    graph: &[RetrievalItem],
    raptor: &[RetrievalItem],
    k: usize,
) -> Vec<RetrievalItem> {
    let mut merged: Vec<RetrievalItem> = Vec::with_capacity(k);
    let mut seen_identities: HashSet<String> = HashSet::new();

    let mut add_items = |source_items: &[RetrievalItem],
                         limit: usize,
                         merged: &mut Vec<RetrievalItem>,
                         seen: &mut HashSet<String>| {
        let mut added = 0usize;
        for item in source_items {
            if added >= limit {
                break;
            }
            let identity = item_identity(item);
            if seen.insert(identity) {
                merged.push(item.clone());
                added += 1;
            }
        }
    };

    add_items(chunks, QUOTA_CHUNKS, &mut merged, &mut seen_identities);
    add_items(graph, QUOTA_GRAPH, &mut merged, &mut seen_identities);
    add_items(raptor, QUOTA_RAPTOR, &mut merged, &mut seen_identities);

    for source in [chunks, graph, raptor] {
        if merged.len() >= k {
            break;
        }
        let remaining = k - merged.len();
        add_items(source, remaining, &mut merged, &mut seen_identities);
    }

    merged.truncate(k);
    merged
}

/// Reciprocal rank fusion across grouped sub-query results.
///
/// `score(id) = sum over groups of 1 / (rrf_k + rank)`. Ties break by
/// first-seen order across input groups, which makes the output
/// deterministic for identical grouped inputs.
pub fn rrf_merge(
    grouped_items: &[(String, Vec<RetrievalItem>)],
    rrf_k: u32,
    top_k: usize,
) -> Vec<RetrievalItem> {
    let mut score_by_id: HashMap<String, f64> = HashMap::new();
    let mut first_seen: Vec<String> = Vec::new();
    let mut item_by_id: HashMap<String, &RetrievalItem> = HashMap::new();

    for (seq, (_, items)) in grouped_items.iter().enumerate() {
        for (rank0, item) in items.iter().enumerate() {
            let rank = rank0 + 1;
            let row = extract_row(item);
            let row_id = row
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("synthetic-{}-{}", seq + 1, rank));

            *score_by_id.entry(row_id.clone()).or_insert(0.0) +=
                1.0 / (f64::from(rrf_k) + rank as f64);
            if !item_by_id.contains_key(&row_id) {
                first_seen.push(row_id.clone());
                item_by_id.insert(row_id, item);
            }
        }
    }

    let mut ranked_ids: Vec<&String> = first_seen.iter().collect();
    // Stable sort keeps first-seen order among equal scores.
    ranked_ids.sort_by(|a, b| {
        let sa = score_by_id.get(*a).copied().unwrap_or(0.0);
        let sb = score_by_id.get(*b).copied().unwrap_or(0.0);
        sb.partial_cmp(&sa).unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut merged = Vec::with_capacity(top_k.max(1));
    for row_id in ranked_ids.into_iter().take(top_k.max(1)) {
        let Some(source) = item_by_id.get(row_id) else {
            continue;
        };
        let mut metadata = source.metadata.clone();
        metadata.insert(
            "score_space".into(),
            Value::String(ScoreSpace::Rrf.as_str().to_string()),
        );
        merged.push(RetrievalItem {
            source: source.source.clone(),
            content: source.content.clone(),
            score: score_by_id.get(row_id).copied().unwrap_or(0.0),
            metadata,
        });
    }
    merged
}

/// Requested standards with no matching item scope in the results.
pub fn missing_scopes(
    items: &[RetrievalItem],
    requested_standards: &[String],
    require_all_scopes: bool,
) -> Vec<String> {
    if !require_all_scopes || requested_standards.is_empty() {
        return Vec::new();
    }
    let mut present: HashSet<String> = HashSet::new();
    for item in items {
        let scope = normalize_scope_name(&row_scope(extract_row(item)));
        if !scope.is_empty() {
            present.insert(scope);
        }
    }
    requested_standards
        .iter()
        .filter(|scope| !present.contains(*scope))
        .cloned()
        .collect()
}

fn row_scope(row: &Metadata) -> String {
    evidence_core::extract_row_scope(row)
}

/// Required clause references not covered by any returned item.
///
/// Only reported when the uncovered count reaches the configured minimum;
/// below that, partial coverage is acceptable.
pub fn missing_clause_refs(
    items: &[RetrievalItem],
    query_clause_refs: &[String],
    min_clause_refs_required: usize,
) -> Vec<String> {
    if min_clause_refs_required == 0 || query_clause_refs.is_empty() {
        return Vec::new();
    }
    let query_clause_set: BTreeSet<String> = query_clause_refs
        .iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if query_clause_set.is_empty() {
        return Vec::new();
    }

    let mut covered: BTreeSet<String> = BTreeSet::new();
    for item in items {
        covered.extend(item_clause_refs(item));
    }

    let uncovered: Vec<String> = query_clause_refs
        .iter()
        .filter(|c| !covered.contains(c.as_str()))
        .cloned()
        .collect();

    let uncovered_distinct = query_clause_set.difference(&covered).count();
    if uncovered_distinct >= min_clause_refs_required {
        let mut deduped = Vec::new();
        for clause in uncovered {
            if !deduped.contains(&clause) {
                deduped.push(clause);
            }
        }
        deduped
    } else {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item_with_row(row_id: &str, score: f64) -> RetrievalItem {
        RetrievalItem {
            source: format!("src-{row_id}"),
            content: format!("content-{row_id}"),
            score,
            metadata: json!({"row": {"id": row_id, "metadata": {"tenant_id": "tenant-a"}}})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        }
    }

    fn tagged(row_id: &str, fusion_source: &str) -> RetrievalItem {
        RetrievalItem {
            source: row_id.to_string(),
            content: format!("content {row_id}"),
            score: 0.5,
            metadata: json!({
                "fusion_source": fusion_source,
                "row": {"id": row_id},
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        }
    }

    #[test]
    fn test_rrf_merge_is_deterministic_and_dedupes_by_row_id() {
        let grouped = vec![
            (
                "q1".to_string(),
                vec![item_with_row("doc-1", 0.95), item_with_row("doc-2", 0.90)],
            ),
            (
                "q2".to_string(),
                vec![item_with_row("doc-3", 0.92), item_with_row("doc-1", 0.91)],
            ),
        ];

        let merged = rrf_merge(&grouped, 60, 5);
        let ids: Vec<&str> = merged
            .iter()
            .map(|i| {
                extract_row(i)
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
            })
            .collect();
        assert_eq!(ids, vec!["doc-1", "doc-3", "doc-2"]);
        assert_eq!(merged.len(), 3);
        for item in &merged {
            assert_eq!(item.metadata.get("score_space"), Some(&json!("rrf")));
        }
    }

    #[test]
    fn test_rrf_merge_respects_top_k() {
        let grouped = vec![
            (
                "q1".to_string(),
                vec![item_with_row("doc-1", 0.95), item_with_row("doc-2", 0.90)],
            ),
            (
                "q2".to_string(),
                vec![item_with_row("doc-3", 0.92), item_with_row("doc-1", 0.91)],
            ),
        ];
        let merged = rrf_merge(&grouped, 60, 2);
        assert_eq!(merged.len(), 2);
        let ids: Vec<&str> = merged
            .iter()
            .map(|i| {
                extract_row(i)
                    .get("id")
                    .and_then(Value::as_str)
                    .unwrap_or("")
            })
            .collect();
        assert_eq!(ids, vec!["doc-1", "doc-3"]);
    }

    #[test]
    fn test_rrf_merge_identical_inputs_identical_output() {
        let grouped = vec![
            ("a".to_string(), vec![item_with_row("x", 0.9)]),
            ("b".to_string(), vec![item_with_row("y", 0.9)]),
        ];
        let first = rrf_merge(&grouped, 60, 5);
        let second = rrf_merge(&grouped, 60, 5);
        let ids =
            |items: &[RetrievalItem]| items.iter().map(item_identity).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_late_fusion_quota_order() {
        let chunks: Vec<_> = (0..5).map(|i| tagged(&format!("c{i}"), "chunks")).collect();
        let graph: Vec<_> = (0..4).map(|i| tagged(&format!("g{i}"), "graph")).collect();
        let raptor: Vec<_> = (0..3).map(|i| tagged(&format!("r{i}"), "raptor")).collect();

        let merged = fuse_late_results(&chunks, &graph, &raptor, 6);
        let sources: Vec<&str> = merged
            .iter()
            .map(|i| {
                i.metadata
                    .get("fusion_source")
                    .and_then(Value::as_str)
                    .unwrap_or("")
            })
            .collect();
        assert_eq!(
            sources,
            vec!["chunks", "chunks", "chunks", "graph", "graph", "raptor"]
        );
    }

    #[test]
    fn test_late_fusion_tops_up_from_chunks() {
        let chunks: Vec<_> = (0..8).map(|i| tagged(&format!("c{i}"), "chunks")).collect();
        let graph = vec![tagged("g0", "graph")];
        let raptor: Vec<RetrievalItem> = Vec::new();

        let merged = fuse_late_results(&chunks, &graph, &raptor, 8);
        assert_eq!(merged.len(), 8);
        let chunk_count = merged
            .iter()
            .filter(|i| i.metadata.get("fusion_source") == Some(&json!("chunks")))
            .count();
        assert_eq!(chunk_count, 7);
    }

    #[test]
    fn test_late_fusion_dedupes_identities() {
        let shared = tagged("dup", "chunks");
        let mut graph_dup = tagged("dup", "graph");
        graph_dup.content = shared.content.clone();
        let merged = fuse_late_results(&[shared], &[graph_dup], &[], 4);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn test_missing_scopes() {
        let mut item = item_with_row("a", 0.9);
        item.metadata.insert(
            "row".into(),
            json!({"id": "a", "source_standard": "ISO 9001"}),
        );
        let requested = vec!["ISO 9001".to_string(), "ISO 14001".to_string()];
        let missing = missing_scopes(&[item], &requested, true);
        assert_eq!(missing, vec!["ISO 14001"]);
    }

    #[test]
    fn test_missing_scopes_disabled() {
        let missing = missing_scopes(&[], &["ISO 9001".to_string()], false);
        assert!(missing.is_empty());
    }

    #[test]
    fn test_missing_clause_refs_threshold() {
        let item = RetrievalItem {
            source: "C1".into(),
            content: "cubre la clausula 9.1.2".into(),
            score: 0.9,
            metadata: Metadata::new(),
        };
        let query_refs = vec!["9.1.2".to_string(), "10.2".to_string()];

        // One uncovered clause, threshold 2: below threshold, not reported.
        assert!(missing_clause_refs(&[item.clone()], &query_refs, 2).is_empty());
        // Threshold 1: reported.
        assert_eq!(
            missing_clause_refs(&[item], &query_refs, 1),
            vec!["10.2".to_string()]
        );
    }
}
