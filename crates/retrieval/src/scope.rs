//! Scope Resolver
//!
//! Extracts explicit normative-standard references from a query, detects
//! ambiguous clause-only questions and suggests probable scopes from
//! configured hint tokens. All domain data (which standards, which hints)
//! is configuration; nothing here hardcodes a single standard family
//! beyond the defaults.

use serde::{Deserialize, Serialize};

use evidence_core::{
    extract_standard_refs, has_clause_reference, normalize_scope_name, Metadata,
    QueryScopeSummary,
};

/// One standard the deployment knows about: its canonical name, its bare
/// number and the lowercase tokens that hint at it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardProfile {
    pub canonical: String,
    pub number: String,
    #[serde(default)]
    pub hint_tokens: Vec<String>,
}

impl StandardProfile {
    pub fn new(number: &str, hint_tokens: &[&str]) -> Self {
        Self {
            canonical: format!("ISO {number}"),
            number: number.to_string(),
            hint_tokens: hint_tokens.iter().map(|t| t.to_lowercase()).collect(),
        }
    }
}

/// What the resolver derived from a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScopeResolution {
    /// Ordered, deduplicated canonical standard names
    pub requested_standards: Vec<String>,
    /// Clause reference present but no standard extracted
    pub requires_scope_clarification: bool,
    /// Probable candidates, hint-ranked; full domain set when nothing hints
    pub suggested_scopes: Vec<String>,
}

/// Query-side scope resolution over a configured domain set.
#[derive(Debug, Clone)]
pub struct ScopeResolver {
    standards: Vec<StandardProfile>,
}

impl Default for ScopeResolver {
    fn default() -> Self {
        Self::new(vec![
            StandardProfile::new("9001", &["calidad", "cliente", "producto", "servicio"]),
            StandardProfile::new(
                "14001",
                &["ambient", "legal", "cumplimiento", "aspecto ambiental"],
            ),
            StandardProfile::new(
                "45001",
                &["seguridad", "salud", "sst", "riesgo laboral", "trabajador"],
            ),
        ])
    }
}

impl ScopeResolver {
    pub fn new(standards: Vec<StandardProfile>) -> Self {
        Self { standards }
    }

    /// Full resolution: requested standards, ambiguity flag, suggestions.
    ///
    /// Idempotent over its own output: resolving a query that already names
    /// canonical standards returns the same standards.
    pub fn resolve(&self, query: &str) -> ScopeResolution {
        let requested = self.extract_requested_standards(query);
        let ambiguous = has_clause_reference(query) && requested.is_empty();
        ScopeResolution {
            suggested_scopes: self.suggest_scope_candidates(query),
            requires_scope_clarification: ambiguous,
            requested_standards: requested,
        }
    }

    /// Explicit standard references: `ISO\s*[-:_]?\s*\d{4,5}` plus bare
    /// numbers from the domain set. First-seen order, deduplicated.
    pub fn extract_requested_standards(&self, query: &str) -> Vec<String> {
        let mut ordered = extract_standard_refs(query);
        for profile in &self.standards {
            if query_has_bare_number(query, &profile.number)
                && !ordered.contains(&profile.canonical)
            {
                ordered.push(profile.canonical.clone());
            }
        }
        ordered
    }

    /// Standards whose hint tokens appear in the query; the whole domain
    /// set when nothing matches.
    pub fn suggest_scope_candidates(&self, query: &str) -> Vec<String> {
        let text = query.trim().to_lowercase();
        let ranked: Vec<String> = self
            .standards
            .iter()
            .filter(|p| p.hint_tokens.iter().any(|h| text.contains(h.as_str())))
            .map(|p| p.canonical.clone())
            .collect();

        if ranked.is_empty() {
            self.standards.iter().map(|p| p.canonical.clone()).collect()
        } else {
            ranked
        }
    }

    /// Canonicalize a caller-supplied standard token. Returns `None` for
    /// input that cannot be recognized as a standard reference.
    pub fn canonicalize(&self, raw: &str) -> Option<String> {
        let normalized = normalize_scope_name(raw);
        if normalized.is_empty() {
            return None;
        }
        let refs = extract_standard_refs(&normalized);
        refs.into_iter().next()
    }

    /// Scope of a retrieved row, canonicalized.
    pub fn extract_item_scope(&self, row: &Metadata) -> String {
        let raw = evidence_core::extract_row_scope(row);
        if raw.is_empty() {
            return String::new();
        }
        normalize_scope_name(&raw)
    }

    /// Filter rows to the requested scopes. Rows with no recognizable
    /// scope are dropped; callers treat an all-dropped result as a scope
    /// mismatch signal, not an empty corpus.
    pub fn filter_rows_by_scope<'a>(
        &self,
        rows: &'a [Metadata],
        requested_standards: &[String],
    ) -> Vec<&'a Metadata> {
        if requested_standards.is_empty() {
            return rows.iter().collect();
        }
        let requested_upper: Vec<String> = requested_standards
            .iter()
            .map(|s| s.to_uppercase())
            .collect();
        rows.iter()
            .filter(|row| {
                let scope = self.extract_item_scope(row).to_uppercase();
                !scope.is_empty() && requested_upper.iter().any(|r| scope.contains(r.as_str()))
            })
            .collect()
    }

    /// Summary shape returned by validate-scope.
    pub fn summarize(&self, query: &str) -> QueryScopeSummary {
        let resolution = self.resolve(query);
        QueryScopeSummary {
            requested_standards: resolution.requested_standards,
            requires_scope_clarification: resolution.requires_scope_clarification,
            suggested_scopes: resolution.suggested_scopes,
        }
    }
}

fn query_has_bare_number(query: &str, number: &str) -> bool {
    let bytes = query.as_bytes();
    let mut start = 0;
    while let Some(pos) = query[start..].find(number) {
        let begin = start + pos;
        let end = begin + number.len();
        let left_ok = begin == 0 || !bytes[begin - 1].is_ascii_digit();
        let right_ok = end >= bytes.len() || !bytes[end].is_ascii_digit();
        if left_ok && right_ok {
            return true;
        }
        start = end;
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_explicit_and_bare_standards() {
        let resolver = ScopeResolver::default();
        let standards =
            resolver.extract_requested_standards("compara ISO 9001 con la 14001 y ISO-9001");
        assert_eq!(standards, vec!["ISO 9001", "ISO 14001"]);
    }

    #[test]
    fn test_clause_without_standard_requires_clarification() {
        let resolver = ScopeResolver::default();
        let resolution = resolver.resolve("Que exige la clausula 9.1.2?");
        assert!(resolution.requested_standards.is_empty());
        assert!(resolution.requires_scope_clarification);
        assert!(!resolution.suggested_scopes.is_empty());
    }

    #[test]
    fn test_clause_with_standard_is_unambiguous() {
        let resolver = ScopeResolver::default();
        let resolution = resolver.resolve("Que exige la clausula 9.1.2 de ISO 14001?");
        assert_eq!(resolution.requested_standards, vec!["ISO 14001"]);
        assert!(!resolution.requires_scope_clarification);
    }

    #[test]
    fn test_suggestions_ranked_by_hints() {
        let resolver = ScopeResolver::default();
        let suggested = resolver.suggest_scope_candidates("obligaciones de cumplimiento legal");
        assert_eq!(suggested, vec!["ISO 14001"]);
    }

    #[test]
    fn test_suggestions_fall_back_to_domain_set() {
        let resolver = ScopeResolver::default();
        let suggested = resolver.suggest_scope_candidates("requisitos generales");
        assert_eq!(suggested, vec!["ISO 9001", "ISO 14001", "ISO 45001"]);
    }

    #[test]
    fn test_resolve_is_idempotent() {
        let resolver = ScopeResolver::default();
        let first = resolver.resolve("auditoria interna ISO 9001");
        let again = resolver.resolve(&first.requested_standards.join(" y "));
        assert_eq!(first.requested_standards, again.requested_standards);
    }

    #[test]
    fn test_canonicalize() {
        let resolver = ScopeResolver::default();
        assert_eq!(resolver.canonicalize("iso_9001"), Some("ISO 9001".into()));
        assert_eq!(resolver.canonicalize("45001"), Some("ISO 45001".into()));
        assert_eq!(resolver.canonicalize("not a standard"), None);
    }

    #[test]
    fn test_filter_rows_by_scope() {
        let resolver = ScopeResolver::default();
        let rows: Vec<Metadata> = vec![
            json!({"id": "a", "source_standard": "ISO 9001", "content": "x"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
            json!({"id": "b", "source_standard": "ISO 14001", "content": "y"})
                .as_object()
                .cloned()
                .unwrap_or_default(),
        ];
        let kept = resolver.filter_rows_by_scope(&rows, &["ISO 9001".to_string()]);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].get("id"), Some(&json!("a")));
    }
}
