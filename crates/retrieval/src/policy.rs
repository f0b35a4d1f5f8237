//! Retrieval policy
//!
//! Post-retrieval filtering that keeps structural noise (tables of
//! contents, frontmatter, dot-leader lines) and sub-threshold matches out
//! of the evidence set, plus query expansion via caller-declared hints.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use evidence_core::{
    safe_float, AppliedHint, HintTrace, Metadata, MinScoreTrace, NoiseTrace, RetrievalItem,
    ScoreSpace,
};
use evidence_core::contracts::SearchHint;

static WS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

static TABLE_BORDER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\s|:+\-]{4,}$").expect("valid regex"));

static MARKDOWN_LINK_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid regex"));

static TOC_DOT_LEADER_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*.+\.{3,}\s*\d+\s*$").expect("valid regex"));

static TOC_KEYWORD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b(table of contents|contents|indice|\u{ed}ndice|contenido)\b")
        .expect("valid regex")
});

/// Expand the query with hint terms that are not already present.
///
/// A hint fires when its `term` appears in the query (case-insensitive
/// substring). Fired expansions are appended to the query text.
pub fn apply_search_hints(query: &str, hints: &[SearchHint]) -> (String, HintTrace) {
    let text = query.trim().to_string();
    if text.is_empty() || hints.is_empty() {
        return (text, HintTrace::default());
    }

    let lower_text = text.to_lowercase();
    let mut expanded_terms: Vec<String> = Vec::new();
    let mut applied: Vec<AppliedHint> = Vec::new();

    for hint in hints {
        let term = hint.term.trim();
        if term.is_empty() || !lower_text.contains(&term.to_lowercase()) {
            continue;
        }
        let mut additions: Vec<String> = Vec::new();
        for raw in &hint.expand_to {
            let value = raw.trim();
            if value.is_empty() {
                continue;
            }
            let value_lower = value.to_lowercase();
            let already_present = lower_text.contains(&value_lower)
                || expanded_terms.iter().any(|t| t.to_lowercase() == value_lower);
            if already_present {
                continue;
            }
            additions.push(value.to_string());
        }
        if !additions.is_empty() {
            expanded_terms.extend(additions.iter().cloned());
            applied.push(AppliedHint {
                term: term.to_string(),
                expand_to: additions,
            });
        }
    }

    if expanded_terms.is_empty() {
        return (text, HintTrace::default());
    }

    let expanded_query = format!("{} {}", text, expanded_terms.join(" "));
    (
        expanded_query,
        HintTrace {
            applied: true,
            applied_hints: applied,
            expanded_terms,
        },
    )
}

fn item_score_space(item: &RetrievalItem) -> Option<ScoreSpace> {
    let raw = item
        .metadata
        .get("score_space")
        .and_then(Value::as_str)
        .or_else(|| match item.metadata.get("row") {
            Some(Value::Object(row)) => row.get("score_space").and_then(Value::as_str),
            _ => None,
        })?;
    ScoreSpace::parse(raw)
}

/// Drop items below the similarity threshold.
///
/// Items whose score space is rank-derived (rrf, mixed) bypass the gate:
/// their scores are not on the similarity scale.
pub fn filter_items_by_min_score(
    items: Vec<RetrievalItem>,
    min_score: Option<f64>,
) -> (Vec<RetrievalItem>, MinScoreTrace) {
    let Some(threshold) = min_score else {
        let kept_count = items.len();
        return (
            items,
            MinScoreTrace {
                applied: false,
                threshold: None,
                kept: kept_count,
                dropped: 0,
                score_space_bypassed: 0,
            },
        );
    };

    let mut kept = Vec::with_capacity(items.len());
    let mut dropped = 0usize;
    let mut bypassed = 0usize;

    for item in items {
        if item_score_space(&item).is_some_and(|s| s.is_rank_derived()) {
            bypassed += 1;
            kept.push(item);
            continue;
        }
        let score = match item.metadata.get("similarity") {
            Some(value) => safe_float(Some(value), item.score),
            None => item.score,
        };
        if score >= threshold {
            kept.push(item);
        } else {
            dropped += 1;
        }
    }

    let trace = MinScoreTrace {
        applied: true,
        threshold: Some(threshold),
        kept: kept.len(),
        dropped,
        score_space_bypassed: bypassed,
    };
    (kept, trace)
}

fn metadata_view(item: &RetrievalItem) -> Metadata {
    // Row-nested metadata is authoritative; top-level lifted keys win on
    // collision because they were normalized later.
    let mut merged = Metadata::new();
    if let Some(Value::Object(row)) = item.metadata.get("row") {
        if let Some(Value::Object(nested)) = row.get("metadata") {
            for (k, v) in nested {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    for (k, v) in &item.metadata {
        if k != "row" {
            merged.insert(k.clone(), v.clone());
        }
    }
    merged
}

fn is_structural_only(item: &RetrievalItem) -> bool {
    let metadata = metadata_view(item);
    if metadata.get("retrieval_eligible") == Some(&Value::Bool(false)) {
        return true;
    }
    if metadata.get("is_toc") == Some(&Value::Bool(true)) {
        return true;
    }
    if metadata.get("is_frontmatter") == Some(&Value::Bool(true)) {
        return true;
    }

    let content = item.content.as_str();
    let dot_leaders = TOC_DOT_LEADER_LINE_RE.find_iter(content).count();
    if dot_leaders >= 2 {
        return true;
    }
    if dot_leaders >= 1 && TOC_KEYWORD_RE.is_match(&content.to_lowercase()) {
        return true;
    }
    false
}

fn clean_content(text: &str) -> String {
    let mut cleaned_lines: Vec<String> = Vec::new();
    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() {
            continue;
        }
        if TABLE_BORDER_RE.is_match(line) {
            continue;
        }
        let line = MARKDOWN_LINK_RE.replace_all(line, "$1");
        let line = WS_RE.replace_all(line.trim(), " ").trim().to_string();
        if !line.is_empty() {
            cleaned_lines.push(line);
        }
    }
    cleaned_lines.join("\n")
}

/// Drop structurally non-informative items and clean survivors.
pub fn reduce_structural_noise(items: Vec<RetrievalItem>) -> (Vec<RetrievalItem>, NoiseTrace) {
    let mut cleaned_items = Vec::with_capacity(items.len());
    let mut changed = 0usize;
    let mut dropped = 0usize;
    let mut dropped_structural = 0usize;

    for mut item in items {
        if is_structural_only(&item) {
            dropped += 1;
            dropped_structural += 1;
            continue;
        }
        let cleaned = clean_content(&item.content);
        if cleaned.is_empty() {
            dropped += 1;
            continue;
        }
        if cleaned != item.content.trim() {
            item.content = cleaned;
            changed += 1;
        }
        cleaned_items.push(item);
    }

    let trace = NoiseTrace {
        applied: true,
        changed,
        dropped,
        dropped_structural,
        kept: cleaned_items.len(),
    };
    (cleaned_items, trace)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(content: &str, score: f64, metadata: Value) -> RetrievalItem {
        RetrievalItem {
            source: "C1".to_string(),
            content: content.to_string(),
            score,
            metadata: metadata.as_object().cloned().unwrap_or_default(),
        }
    }

    #[test]
    fn test_apply_search_hints_expands_query() {
        let hints = vec![SearchHint {
            term: "ec".to_string(),
            expand_to: vec!["economia circular".to_string(), "ISO 14001".to_string()],
        }];
        let (query, trace) = apply_search_hints("requisitos de ec", &hints);
        assert!(query.contains("economia circular"));
        assert!(trace.applied);
        assert!(!trace.expanded_terms.is_empty());
    }

    #[test]
    fn test_apply_search_hints_skips_present_terms() {
        let hints = vec![SearchHint {
            term: "legal".to_string(),
            expand_to: vec!["cumplimiento legal".to_string()],
        }];
        let (query, trace) = apply_search_hints("requisitos de cumplimiento legal", &hints);
        assert_eq!(query, "requisitos de cumplimiento legal");
        assert!(!trace.applied);
    }

    #[test]
    fn test_min_score_gate_bypasses_rrf_space() {
        let items = vec![
            item("a", 0.9, json!({"similarity": 0.9})),
            item("b", 0.5, json!({"similarity": 0.5})),
            item("c", 0.01, json!({"similarity": 0.01, "score_space": "rrf"})),
        ];
        let (kept, trace) = filter_items_by_min_score(items, Some(0.7));
        let contents: Vec<&str> = kept.iter().map(|i| i.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "c"]);
        assert_eq!(trace.score_space_bypassed, 1);
        assert_eq!(trace.dropped, 1);
    }

    #[test]
    fn test_min_score_gate_disabled_without_threshold() {
        let items = vec![item("a", 0.1, json!({}))];
        let (kept, trace) = filter_items_by_min_score(items, None);
        assert_eq!(kept.len(), 1);
        assert!(!trace.applied);
    }

    #[test]
    fn test_noise_reduction_cleans_table_borders_and_links() {
        let items = vec![item(
            "|---|---|\n[Texto](https://example.com)   con  espacios\n",
            0.9,
            json!({}),
        )];
        let (cleaned, trace) = reduce_structural_noise(items);
        assert_eq!(cleaned.len(), 1);
        assert_eq!(cleaned[0].content, "Texto con espacios");
        assert_eq!(trace.changed, 1);
    }

    #[test]
    fn test_noise_reduction_drops_flagged_toc_rows() {
        let items = vec![
            item(
                "9.1.2 Evaluacion del cumplimiento .......... 14\n10 Mejora .......... 15",
                0.91,
                json!({"is_toc": true}),
            ),
            item(
                "La organizacion debe evaluar el cumplimiento de sus obligaciones.",
                0.75,
                json!({"is_normative_body": true}),
            ),
        ];
        let (cleaned, trace) = reduce_structural_noise(items);
        assert_eq!(cleaned.len(), 1);
        assert!(cleaned[0].content.starts_with("La organizacion"));
        assert_eq!(trace.dropped_structural, 1);
    }

    #[test]
    fn test_noise_reduction_drops_dot_leader_rows_without_flags() {
        let items = vec![item(
            "9.1 Evaluacion ............ 14\n10 Mejora ............ 15",
            0.9,
            json!({}),
        )];
        let (cleaned, trace) = reduce_structural_noise(items);
        assert!(cleaned.is_empty());
        assert_eq!(trace.dropped_structural, 1);
    }

    #[test]
    fn test_noise_reduction_respects_retrieval_eligible_false() {
        let items = vec![item("contenido normal", 0.9, json!({"retrieval_eligible": false}))];
        let (cleaned, trace) = reduce_structural_noise(items);
        assert!(cleaned.is_empty());
        assert_eq!(trace.dropped_structural, 1);
    }
}
