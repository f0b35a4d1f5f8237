//! Retrieval items
//!
//! The single result shape shared by vector chunks, graph nodes and
//! summary nodes. Layers are distinguished by `source_layer` metadata, not
//! by type (flat struct + enum, no hierarchy).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::scope::extract_clause_refs;

/// Open metadata map carried by every item and row.
pub type Metadata = Map<String, Value>;

/// Layer a row was retrieved from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceLayer {
    Vector,
    Graph,
    GraphGrounded,
    Raptor,
    Hybrid,
}

impl SourceLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLayer::Vector => "vector",
            SourceLayer::Graph => "graph",
            SourceLayer::GraphGrounded => "graph_grounded",
            SourceLayer::Raptor => "raptor",
            SourceLayer::Hybrid => "hybrid",
        }
    }
}

/// Semantic scale of a score. Rank-derived spaces are not comparable to
/// similarity thresholds, which is why the min-score gate bypasses them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreSpace {
    Similarity,
    Rerank,
    Rrf,
    Mixed,
}

impl ScoreSpace {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoreSpace::Similarity => "similarity",
            ScoreSpace::Rerank => "rerank",
            ScoreSpace::Rrf => "rrf",
            ScoreSpace::Mixed => "mixed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "similarity" => Some(ScoreSpace::Similarity),
            "rerank" => Some(ScoreSpace::Rerank),
            "rrf" => Some(ScoreSpace::Rrf),
            "mixed" => Some(ScoreSpace::Mixed),
            _ => None,
        }
    }

    /// True for rank-derived spaces that must not be compared against
    /// similarity thresholds.
    pub fn is_rank_derived(&self) -> bool {
        matches!(self, ScoreSpace::Rrf | ScoreSpace::Mixed)
    }
}

/// A single text fragment returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalItem {
    /// Short label ("C1", "G2", "R1")
    pub source: String,
    /// Fragment text
    pub content: String,
    /// Finite score; non-finite values are coerced before construction
    pub score: f64,
    /// Open metadata, always carrying source_layer / source_type /
    /// similarity / jina_relevance_score / scope_penalized
    #[serde(default)]
    pub metadata: Metadata,
}

/// Coerce any JSON value to a finite float, falling back to `default`.
pub fn safe_float(value: Option<&Value>, default: f64) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()).unwrap_or(default),
        Some(Value::String(s)) => s.parse::<f64>().ok().filter(|f| f.is_finite()).unwrap_or(default),
        _ => default,
    }
}

/// Coerce to a finite float or `None`.
pub fn finite_or_none(value: Option<&Value>) -> Option<f64> {
    match value {
        Some(Value::Number(n)) => n.as_f64().filter(|f| f.is_finite()),
        Some(Value::String(s)) => s.parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// The original row a retrieval item was built from.
///
/// Items built by [`to_retrieval_items`] keep the raw row under
/// `metadata.row`; items built elsewhere use the metadata map itself.
pub fn extract_row(item: &RetrievalItem) -> &Metadata {
    match item.metadata.get("row") {
        Some(Value::Object(row)) => row,
        _ => &item.metadata,
    }
}

/// Deterministic identity for deduplication across sources.
///
/// `row::<id>` when a stable id exists, else a content-derived fallback.
pub fn item_identity(item: &RetrievalItem) -> String {
    let row = extract_row(item);
    let row_id = row
        .get("id")
        .map(json_to_trimmed_string)
        .unwrap_or_default();
    if !row_id.is_empty() {
        return format!("row::{row_id}");
    }
    let content_key: String = item.content.trim().chars().take(120).collect();
    format!("fallback::{}::{}", item.source.trim(), content_key)
}

/// Clause references carried by an item: `metadata.clause_id`, each entry
/// of `metadata.clause_refs`, and every dotted reference in the content.
pub fn item_clause_refs(item: &RetrievalItem) -> BTreeSet<String> {
    let row = extract_row(item);
    let mut refs = BTreeSet::new();

    let meta = match row.get("metadata") {
        Some(Value::Object(m)) => m.clone(),
        _ => Metadata::new(),
    };
    let clause_id = meta
        .get("clause_id")
        .or_else(|| row.get("clause_id"))
        .map(json_to_trimmed_string)
        .unwrap_or_default();
    if !clause_id.is_empty() {
        refs.insert(clause_id);
    }
    if let Some(Value::Array(raw)) = meta.get("clause_refs") {
        for value in raw {
            let text = json_to_trimmed_string(value);
            if !text.is_empty() {
                refs.insert(text);
            }
        }
    }
    for clause in extract_clause_refs(&item.content) {
        refs.insert(clause);
    }
    refs
}

/// Convert raw repository rows to retrieval items.
///
/// Rows without content are skipped. Trace-relevant row fields are lifted
/// into item metadata so downstream policy and explain stages never have
/// to reach back into the raw row.
pub fn to_retrieval_items(rows: &[Metadata]) -> Vec<RetrievalItem> {
    let mut items = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let content = row
            .get("content")
            .map(json_to_trimmed_string)
            .unwrap_or_default();
        if content.is_empty() {
            continue;
        }

        let mut metadata = match row.get("metadata") {
            Some(Value::Object(m)) => m.clone(),
            _ => Metadata::new(),
        };
        metadata.insert(
            "source_layer".into(),
            Value::String(
                row.get("source_layer")
                    .map(json_to_trimmed_string)
                    .unwrap_or_default(),
            ),
        );
        metadata.insert(
            "source_type".into(),
            Value::String(
                row.get("source_type")
                    .map(json_to_trimmed_string)
                    .unwrap_or_default(),
            ),
        );
        metadata.insert(
            "similarity".into(),
            json_f64(safe_float(row.get("similarity"), 0.0)),
        );
        metadata.insert(
            "jina_relevance_score".into(),
            json_f64(safe_float(row.get("jina_relevance_score"), 0.0)),
        );
        metadata.insert(
            "scope_penalized".into(),
            Value::Bool(
                row.get("scope_penalized")
                    .and_then(Value::as_bool)
                    .unwrap_or(false),
            ),
        );
        let score_space = {
            let from_row = row.get("score_space").and_then(Value::as_str);
            let from_meta = metadata.get("score_space").and_then(Value::as_str);
            from_row
                .or(from_meta)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("similarity")
                .to_string()
        };
        metadata.insert("score_space".into(), Value::String(score_space));
        metadata.insert("row".into(), Value::Object(row.clone()));

        let score = match row.get("score") {
            Some(v) if finite_or_none(Some(v)).is_some() => safe_float(Some(v), 0.0),
            _ => safe_float(row.get("similarity"), 0.0),
        };

        let source = row
            .get("source")
            .map(json_to_trimmed_string)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| format!("R{}", idx + 1));

        items.push(RetrievalItem {
            source,
            content,
            score,
            metadata,
        });
    }
    items
}

fn json_to_trimmed_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

pub(crate) fn json_f64(value: f64) -> Value {
    serde_json::Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_safe_float_coerces_non_finite() {
        assert_eq!(safe_float(Some(&json!(0.5)), 0.0), 0.5);
        assert_eq!(safe_float(Some(&json!("nan")), 0.0), 0.0);
        assert_eq!(safe_float(Some(&json!(null)), 0.1), 0.1);
    }

    #[test]
    fn test_to_retrieval_items_skips_empty_content() {
        let rows = vec![
            row(json!({"id": "a", "content": "  ", "similarity": 0.9})),
            row(json!({"id": "b", "content": "texto", "similarity": 0.8})),
        ];
        let items = to_retrieval_items(&rows);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "texto");
        assert_eq!(items[0].score, 0.8);
    }

    #[test]
    fn test_to_retrieval_items_normalizes_metadata() {
        let rows = vec![row(json!({
            "id": "r1",
            "content": "la organizacion debe",
            "similarity": 0.77,
            "score": 0.81,
            "source_layer": "hybrid",
            "source_type": "content_chunk",
            "scope_penalized": true,
            "metadata": {"tenant_id": "tenant-a"},
        }))];
        let items = to_retrieval_items(&rows);
        let meta = &items[0].metadata;
        assert_eq!(meta.get("source_layer"), Some(&json!("hybrid")));
        assert_eq!(meta.get("scope_penalized"), Some(&json!(true)));
        assert_eq!(meta.get("similarity"), Some(&json!(0.77)));
        assert_eq!(meta.get("score_space"), Some(&json!("similarity")));
        assert_eq!(items[0].score, 0.81);
    }

    #[test]
    fn test_item_identity_prefers_row_id() {
        let items = to_retrieval_items(&[row(json!({"id": "doc-1", "content": "x"}))]);
        assert_eq!(item_identity(&items[0]), "row::doc-1");
    }

    #[test]
    fn test_item_identity_fallback_truncates_content() {
        let long = "x".repeat(500);
        let item = RetrievalItem {
            source: "C1".into(),
            content: long,
            score: 0.0,
            metadata: Metadata::new(),
        };
        let identity = item_identity(&item);
        assert!(identity.starts_with("fallback::C1::"));
        assert!(identity.len() <= "fallback::C1::".len() + 120);
    }

    #[test]
    fn test_item_clause_refs_union() {
        let rows = vec![row(json!({
            "id": "r1",
            "content": "ver 9.1.2 y tambien 4.4",
            "metadata": {"clause_id": "9.1", "clause_refs": ["10.2"]},
        }))];
        let items = to_retrieval_items(&rows);
        let refs = item_clause_refs(&items[0]);
        for expected in ["9.1", "9.1.2", "4.4", "10.2"] {
            assert!(refs.contains(expected), "missing {expected}");
        }
    }
}
