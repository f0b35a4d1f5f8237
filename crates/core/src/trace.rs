//! Retrieval traces
//!
//! Every response carries a trace describing what the engine actually did:
//! filters applied, fallbacks taken, per-phase timings, warnings and scope
//! penalty accounting. `timings_ms.total` is always set.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trace attached to single-query (hybrid / explain) responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HybridTrace {
    #[serde(default)]
    pub filters_applied: HashMap<String, Value>,
    #[serde(default)]
    pub engine_mode: String,
    #[serde(default)]
    pub planner_used: bool,
    #[serde(default)]
    pub planner_multihop: bool,
    #[serde(default)]
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_contract_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rpc_compat_mode: Option<String>,
    /// Per-phase timings in milliseconds; `total` is always present.
    #[serde(default)]
    pub timings_ms: HashMap<String, f64>,
    /// Plain warnings, validation warnings first, first-seen order.
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Uppercase warning codes.
    #[serde(default)]
    pub warning_codes: Vec<String>,
    #[serde(default)]
    pub scope_penalized_count: u64,
    #[serde(default)]
    pub scope_candidate_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope_penalized_ratio: Option<f64>,
    /// Score space of the final ranking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score_space: Option<String>,
}

/// Status of a single sub-query inside a multi-query request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubQueryStatus {
    Ok,
    Error,
}

/// Per-sub-query execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubQueryExecution {
    pub id: String,
    pub status: SubQueryStatus,
    pub items_count: usize,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SubQueryExecution {
    pub fn ok(id: impl Into<String>, items_count: usize, latency_ms: f64) -> Self {
        Self {
            id: id.into(),
            status: SubQueryStatus::Ok,
            items_count,
            latency_ms,
            error_code: None,
            error_message: None,
        }
    }

    pub fn error(
        id: impl Into<String>,
        latency_ms: f64,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            status: SubQueryStatus::Error,
            items_count: 0,
            latency_ms,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }
}

/// Trace attached to multi-query responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiQueryTrace {
    pub merge_strategy: String,
    pub rrf_k: u32,
    pub failed_count: usize,
    pub timed_out_count: usize,
    pub max_parallel: usize,
    #[serde(default)]
    pub timings_ms: HashMap<String, f64>,
    pub score_space: String,
}

/// Which search hints fired and what they appended.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HintTrace {
    pub applied: bool,
    #[serde(default)]
    pub applied_hints: Vec<AppliedHint>,
    #[serde(default)]
    pub expanded_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppliedHint {
    pub term: String,
    pub expand_to: Vec<String>,
}

/// Min-score gate accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinScoreTrace {
    pub applied: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub kept: usize,
    #[serde(default)]
    pub dropped: usize,
    /// Rows kept because their score space is rank-derived.
    #[serde(default)]
    pub score_space_bypassed: usize,
}

/// Structural-noise reduction accounting.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NoiseTrace {
    pub applied: bool,
    #[serde(default)]
    pub changed: usize,
    #[serde(default)]
    pub dropped: usize,
    #[serde(default)]
    pub dropped_structural: usize,
    #[serde(default)]
    pub kept: usize,
}

/// Combined policy post-processing trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyTrace {
    pub min_score: MinScoreTrace,
    pub noise_reduction: NoiseTrace,
}

/// Scope / clause coverage diagnostics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoverageTrace {
    #[serde(default)]
    pub requested_standards: Vec<String>,
    #[serde(default)]
    pub missing_scopes: Vec<String>,
    #[serde(default)]
    pub query_clause_refs: Vec<String>,
    #[serde(default)]
    pub missing_clause_refs: Vec<String>,
}

/// Item counts per fusion pipeline.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PipelineCounts {
    pub chunks: usize,
    pub graph: usize,
    pub raptor: usize,
    pub merged: usize,
}

/// Trace attached to comprehensive (late fusion) responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ComprehensiveTrace {
    pub engine_mode: String,
    pub pipeline_counts: PipelineCounts,
    pub hints: HintTrace,
    pub policy: PolicyTrace,
    pub coverage: CoverageTrace,
    /// Trace of the chunks pipeline's underlying hybrid call, when it ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunks_trace: Option<HybridTrace>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub timings_ms: HashMap<String, f64>,
    pub score_space: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subquery_execution_serializes_status() {
        let record = SubQueryExecution::error("q1", 12.0, "SUBQUERY_TIMEOUT", "timed out");
        let json = serde_json::to_value(&record).expect("serializable");
        assert_eq!(json["status"], "error");
        assert_eq!(json["error_code"], "SUBQUERY_TIMEOUT");
    }

    #[test]
    fn test_hybrid_trace_round_trip() {
        let mut trace = HybridTrace::default();
        trace.timings_ms.insert("total".into(), 4.2);
        trace.warnings.push("fallback".into());
        let json = serde_json::to_string(&trace).expect("serializable");
        let back: HybridTrace = serde_json::from_str(&json).expect("deserializable");
        assert_eq!(back.timings_ms.get("total"), Some(&4.2));
        assert_eq!(back.warnings, vec!["fallback"]);
    }
}
