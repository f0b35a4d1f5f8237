//! Tenant isolation
//!
//! Second line of defense at the application level: after every retrieval,
//! verify that each returned row belongs to the requesting tenant or is
//! explicitly global. Violations are fatal and never recovered.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::SecurityViolation;
use crate::item::{extract_row, Metadata, RetrievalItem};

/// Tenant identifiers: alphanumeric head, then `[A-Za-z0-9_-]`, 2..=128
/// chars total.
pub static TENANT_ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{1,127}$").expect("valid regex"));

/// True when the string is a well-formed tenant id.
pub fn validate_tenant_id(raw: &str) -> bool {
    TENANT_ID_PATTERN.is_match(raw)
}

/// Post-retrieval invariant check over returned rows.
pub struct LeakCanary;

impl LeakCanary {
    /// Verify every item against the requesting tenant.
    ///
    /// Ownership precedence: `metadata.tenant_id`, then
    /// `metadata.institution_id`, then the row-level fields. A row with no
    /// owner must carry `metadata.is_global = true`.
    pub fn verify_items(
        current_tenant_id: &str,
        items: &[RetrievalItem],
    ) -> Result<(), SecurityViolation> {
        let rows: Vec<&Metadata> = items.iter().map(extract_row).collect();
        Self::verify_rows(current_tenant_id, &rows)
    }

    /// Verify raw repository rows.
    pub fn verify_rows(
        current_tenant_id: &str,
        rows: &[&Metadata],
    ) -> Result<(), SecurityViolation> {
        if current_tenant_id.trim().is_empty() {
            return Err(SecurityViolation::MissingRequester);
        }

        for row in rows {
            let metadata = match row.get("metadata") {
                Some(Value::Object(m)) => Some(m),
                _ => None,
            };
            let doc_id = row
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or("<unknown>")
                .to_string();

            let doc_tenant = lookup_str(metadata, "tenant_id")
                .or_else(|| lookup_str(metadata, "institution_id"))
                .or_else(|| row.get("institution_id").and_then(Value::as_str))
                .or_else(|| row.get("tenant_id").and_then(Value::as_str))
                .map(str::trim)
                .filter(|s| !s.is_empty());

            let Some(doc_tenant) = doc_tenant else {
                let is_global = metadata
                    .and_then(|m| m.get("is_global"))
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if is_global {
                    continue;
                }
                tracing::error!(
                    doc_id = %doc_id,
                    tenant_id = %current_tenant_id,
                    "security alert: document has no tenant_id and is not global"
                );
                return Err(SecurityViolation::MissingOwnership { doc_id });
            };

            if doc_tenant != current_tenant_id {
                tracing::error!(
                    doc_id = %doc_id,
                    doc_tenant = %doc_tenant,
                    tenant_id = %current_tenant_id,
                    "data leak detected"
                );
                return Err(SecurityViolation::CrossTenantLeak {
                    doc_id,
                    doc_tenant: doc_tenant.to_string(),
                    requester: current_tenant_id.to_string(),
                });
            }
        }

        tracing::debug!(
            tenant_id = %current_tenant_id,
            verified = rows.len(),
            "leak canary verified rows, no leaks"
        );
        Ok(())
    }
}

fn lookup_str<'a>(metadata: Option<&'a Metadata>, key: &str) -> Option<&'a str> {
    metadata?.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn row(value: Value) -> Metadata {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_tenant_id_pattern() {
        assert!(validate_tenant_id("tenant-demo"));
        assert!(validate_tenant_id("T1_alpha"));
        assert!(!validate_tenant_id(""));
        assert!(!validate_tenant_id("-leading-dash"));
        assert!(!validate_tenant_id("a"));
        assert!(!validate_tenant_id(&"x".repeat(200)));
    }

    #[test]
    fn test_canary_rejects_missing_tenant_non_global() {
        let doc = row(json!({"id": "doc-1", "metadata": {"is_global": false}}));
        let result = LeakCanary::verify_rows("tenant-a", &[&doc]);
        assert!(matches!(
            result,
            Err(SecurityViolation::MissingOwnership { .. })
        ));
    }

    #[test]
    fn test_canary_allows_global_rows() {
        let doc = row(json!({"id": "doc-1", "metadata": {"is_global": true}}));
        assert!(LeakCanary::verify_rows("tenant-a", &[&doc]).is_ok());
    }

    #[test]
    fn test_canary_rejects_cross_tenant() {
        let doc = row(json!({"id": "doc-2", "metadata": {"tenant_id": "tenant-b"}}));
        let result = LeakCanary::verify_rows("tenant-a", &[&doc]);
        assert!(matches!(
            result,
            Err(SecurityViolation::CrossTenantLeak { .. })
        ));
    }

    #[test]
    fn test_canary_accepts_matching_tenant_and_row_level_field() {
        let doc_meta = row(json!({"id": "d1", "metadata": {"tenant_id": "tenant-a"}}));
        let doc_row = row(json!({"id": "d2", "institution_id": "tenant-a"}));
        assert!(LeakCanary::verify_rows("tenant-a", &[&doc_meta, &doc_row]).is_ok());
    }

    #[test]
    fn test_canary_rejects_empty_requester() {
        let doc = row(json!({"id": "d1", "metadata": {"tenant_id": "tenant-a"}}));
        assert!(LeakCanary::verify_rows("", &[&doc]).is_err());
    }
}
