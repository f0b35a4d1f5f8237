//! Query intent classification
//!
//! Heuristic planner: marker tokens in the query select a retrieval mode,
//! and the mode fixes the chunk and summary candidate counts. Literal
//! modes demand more candidates because the answer must quote the norm,
//! not paraphrase it.

use evidence_core::{has_clause_reference, PlanMode, RetrievalPlan};

use crate::scope::ScopeResolver;

const LITERAL_LIST_HINTS: [&str; 7] = [
    "entradas",
    "salidas",
    "lista",
    "exclusivas",
    "enumera",
    "listado",
    "vi\u{f1}etas",
];

const LITERAL_NORMATIVE_HINTS: [&str; 8] = [
    "clausula",
    "cl\u{e1}usula",
    "documento obligatorio",
    "obligatorio",
    "exacto",
    "literal",
    "que exige",
    "qu\u{e9} exige",
];

const COMPARATIVE_HINTS: [&str; 5] = ["compar", "difer", "vs", "ambas", "respecto"];

/// Classifies queries into retrieval plans.
#[derive(Debug, Clone, Default)]
pub struct QueryPlanner {
    resolver: ScopeResolver,
}

impl QueryPlanner {
    pub fn new(resolver: ScopeResolver) -> Self {
        Self { resolver }
    }

    /// Classify the query's intent mode.
    pub fn classify(&self, query: &str) -> PlanMode {
        let text = query.trim().to_lowercase();
        let requested = self.resolver.extract_requested_standards(query);

        if LITERAL_LIST_HINTS.iter().any(|h| text.contains(h)) {
            return PlanMode::LiteralList;
        }
        if LITERAL_NORMATIVE_HINTS.iter().any(|h| text.contains(h)) {
            if has_clause_reference(query) && requested.is_empty() {
                return PlanMode::AmbiguousScope;
            }
            return PlanMode::LiteralNormative;
        }
        if COMPARATIVE_HINTS.iter().any(|h| text.contains(h)) || requested.len() > 1 {
            return PlanMode::Comparative;
        }
        PlanMode::Explanatory
    }

    /// Build the retrieval plan for a query.
    pub fn plan(&self, query: &str) -> RetrievalPlan {
        let mode = self.classify(query);
        let requested_standards = self.resolver.extract_requested_standards(query);
        match mode {
            PlanMode::LiteralList | PlanMode::LiteralNormative => RetrievalPlan {
                mode,
                chunk_k: 45,
                chunk_fetch_k: 220,
                summary_k: 3,
                require_literal_evidence: true,
                requested_standards,
            },
            PlanMode::Comparative => RetrievalPlan {
                mode,
                chunk_k: 35,
                chunk_fetch_k: 140,
                summary_k: 5,
                require_literal_evidence: true,
                requested_standards,
            },
            PlanMode::AmbiguousScope => RetrievalPlan {
                mode,
                chunk_k: 0,
                chunk_fetch_k: 0,
                summary_k: 0,
                require_literal_evidence: true,
                requested_standards,
            },
            PlanMode::Explanatory => RetrievalPlan {
                mode,
                chunk_k: 30,
                chunk_fetch_k: 120,
                summary_k: 5,
                require_literal_evidence: false,
                requested_standards,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_literal_list_detection() {
        let planner = QueryPlanner::default();
        let plan = planner.plan("enumera las entradas de la revision por la direccion ISO 9001");
        assert_eq!(plan.mode, PlanMode::LiteralList);
        assert_eq!(plan.chunk_k, 45);
        assert!(plan.require_literal_evidence);
    }

    #[test]
    fn test_clause_without_standard_is_ambiguous() {
        let planner = QueryPlanner::default();
        let plan = planner.plan("que exige la clausula 9.1.2?");
        assert_eq!(plan.mode, PlanMode::AmbiguousScope);
        assert_eq!(plan.chunk_k, 0);
    }

    #[test]
    fn test_comparative_detection() {
        let planner = QueryPlanner::default();
        assert_eq!(
            planner.classify("diferencias entre ISO 9001 e ISO 14001"),
            PlanMode::Comparative
        );
    }

    #[test]
    fn test_default_is_explanatory() {
        let planner = QueryPlanner::default();
        let plan = planner.plan("como funciona la mejora continua");
        assert_eq!(plan.mode, PlanMode::Explanatory);
        assert!(!plan.require_literal_evidence);
        assert_eq!(plan.chunk_k, 30);
        assert_eq!(plan.chunk_fetch_k, 120);
    }
}
