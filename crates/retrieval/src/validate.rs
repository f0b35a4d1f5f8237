//! Scope Validator
//!
//! Normalizes caller-supplied filters and rejects what the contract does
//! not allow: unknown filter keys, non-scalar metadata values, malformed
//! time ranges, unrecognizable standard tokens. Output feeds the scope
//! context sent to the repository.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};

use evidence_core::{
    Metadata, ScopeIssue, TimeRangeFilter, ValidateScopeRequest, ValidateScopeResponse,
};

use crate::scope::ScopeResolver;

const ALLOWED_FILTER_KEYS: [&str; 4] =
    ["metadata", "time_range", "source_standard", "source_standards"];

const TIME_RANGE_KEYS: [&str; 3] = ["from", "to", "field"];

/// Normalized filter set produced by validation.
#[derive(Debug, Clone, Default)]
pub struct NormalizedFilters {
    pub metadata: Option<Metadata>,
    pub time_range: Option<TimeRangeFilter>,
    pub source_standard: Option<String>,
    pub source_standards: Vec<String>,
}

/// Validates raw filter maps against the retrieval contract.
#[derive(Debug, Clone, Default)]
pub struct ScopeValidator {
    resolver: ScopeResolver,
}

impl ScopeValidator {
    pub fn new(resolver: ScopeResolver) -> Self {
        Self { resolver }
    }

    pub fn resolver(&self) -> &ScopeResolver {
        &self.resolver
    }

    /// Validate a request's query + filters into a normalized scope.
    pub fn validate(&self, request: &ValidateScopeRequest) -> ValidateScopeResponse {
        let empty = Metadata::new();
        let raw_filters = request.filters.as_ref().unwrap_or(&empty);

        let mut violations: Vec<ScopeIssue> = Vec::new();
        let mut warnings: Vec<ScopeIssue> = Vec::new();

        let mut unknown_keys: Vec<&String> = raw_filters
            .keys()
            .filter(|key| !ALLOWED_FILTER_KEYS.contains(&key.as_str()))
            .collect();
        unknown_keys.sort();
        for key in unknown_keys {
            violations.push(ScopeIssue::new(
                "INVALID_SCOPE_FILTER",
                format!("filters.{key}"),
                "filter key is not allowed",
            ));
        }

        let metadata = self.validate_metadata(raw_filters.get("metadata"), &mut violations);
        let time_range = self.validate_time_range(raw_filters.get("time_range"), &mut violations);
        let (source_standard, source_standards) =
            self.validate_source_standards(raw_filters, &mut violations);

        let query_scope = self.resolver.summarize(&request.query);
        if query_scope.requires_scope_clarification {
            warnings.push(ScopeIssue::new(
                "SCOPE_CLARIFICATION_RECOMMENDED",
                "query",
                "Query appears ambiguous; caller should disambiguate requested standard",
            ));
        }

        let normalized = NormalizedFilters {
            metadata,
            time_range,
            source_standard,
            source_standards,
        };
        let normalized_scope = normalized_scope_json(
            &request.tenant_id,
            request.collection_id.as_deref(),
            &normalized,
        );

        ValidateScopeResponse {
            valid: violations.is_empty(),
            normalized_scope,
            violations,
            warnings,
            query_scope,
        }
    }

    /// Metadata values must be scalars.
    fn validate_metadata(
        &self,
        raw: Option<&Value>,
        violations: &mut Vec<ScopeIssue>,
    ) -> Option<Metadata> {
        let map = match raw {
            None | Some(Value::Null) => return None,
            Some(Value::Object(map)) => map,
            Some(_) => {
                violations.push(ScopeIssue::new(
                    "INVALID_SCOPE_FILTER",
                    "filters.metadata",
                    "metadata must be an object of scalar values",
                ));
                return None;
            }
        };

        let mut normalized = Metadata::new();
        for (key, value) in map {
            match value {
                Value::String(_) | Value::Number(_) | Value::Bool(_) => {
                    normalized.insert(key.clone(), value.clone());
                }
                _ => violations.push(ScopeIssue::new(
                    "INVALID_SCOPE_FILTER",
                    format!("filters.metadata.{key}"),
                    "metadata values must be scalar",
                )),
            }
        }
        if normalized.is_empty() {
            None
        } else {
            Some(normalized)
        }
    }

    /// Time-range fields are parsed to ISO-8601 UTC.
    fn validate_time_range(
        &self,
        raw: Option<&Value>,
        violations: &mut Vec<ScopeIssue>,
    ) -> Option<TimeRangeFilter> {
        let map = match raw {
            None | Some(Value::Null) => return None,
            Some(Value::Object(map)) => map,
            Some(_) => {
                violations.push(ScopeIssue::new(
                    "INVALID_TIME_RANGE",
                    "filters.time_range",
                    "time_range must be an object",
                ));
                return None;
            }
        };

        for key in map.keys() {
            if !TIME_RANGE_KEYS.contains(&key.as_str()) {
                violations.push(ScopeIssue::new(
                    "INVALID_TIME_RANGE",
                    format!("filters.time_range.{key}"),
                    "unknown time_range field",
                ));
            }
        }

        let mut normalized = TimeRangeFilter::default();
        for bound in ["from", "to"] {
            let Some(value) = map.get(bound) else {
                continue;
            };
            match parse_utc(value) {
                Some(instant) => {
                    let rendered = instant.to_rfc3339();
                    if bound == "from" {
                        normalized.from = Some(rendered);
                    } else {
                        normalized.to = Some(rendered);
                    }
                }
                None => violations.push(ScopeIssue::new(
                    "INVALID_TIME_RANGE",
                    format!("filters.time_range.{bound}"),
                    "value is not a valid ISO-8601 timestamp",
                )),
            }
        }

        if let (Some(from), Some(to)) = (&normalized.from, &normalized.to) {
            if from > to {
                violations.push(ScopeIssue::new(
                    "INVALID_TIME_RANGE",
                    "filters.time_range",
                    "from must not be after to",
                ));
            }
        }

        match map.get("field") {
            None => {}
            Some(Value::String(field)) if !field.trim().is_empty() => {
                normalized.field = Some(field.trim().to_string());
            }
            Some(_) => violations.push(ScopeIssue::new(
                "INVALID_TIME_RANGE",
                "filters.time_range.field",
                "field must be a non-empty string",
            )),
        }

        if normalized.from.is_none() && normalized.to.is_none() && normalized.field.is_none() {
            None
        } else {
            Some(normalized)
        }
    }

    /// Canonicalize `source_standard` / `source_standards` through the
    /// resolver; unrecognizable tokens are violations.
    fn validate_source_standards(
        &self,
        raw_filters: &Metadata,
        violations: &mut Vec<ScopeIssue>,
    ) -> (Option<String>, Vec<String>) {
        let mut standards: Vec<String> = Vec::new();

        let mut push_token = |raw: &Value, field: String, violations: &mut Vec<ScopeIssue>| {
            let token = match raw {
                Value::String(s) => s.trim().to_string(),
                Value::Number(n) => n.to_string(),
                _ => String::new(),
            };
            if token.is_empty() {
                violations.push(ScopeIssue::new(
                    "INVALID_SCOPE_FILTER",
                    field,
                    "source standard must be a string",
                ));
                return;
            }
            match self.resolver.canonicalize(&token) {
                Some(canonical) => {
                    if !standards.contains(&canonical) {
                        standards.push(canonical);
                    }
                }
                None => violations.push(ScopeIssue::new(
                    "INVALID_SCOPE_FILTER",
                    field,
                    format!("unrecognized standard token: {token}"),
                )),
            }
        };

        if let Some(value) = raw_filters.get("source_standard") {
            if !value.is_null() {
                push_token(value, "filters.source_standard".to_string(), violations);
            }
        }

        match raw_filters.get("source_standards") {
            None | Some(Value::Null) => {}
            Some(Value::Array(values)) => {
                for (idx, value) in values.iter().enumerate() {
                    push_token(
                        value,
                        format!("filters.source_standards[{idx}]"),
                        violations,
                    );
                }
            }
            Some(_) => violations.push(ScopeIssue::new(
                "INVALID_SCOPE_FILTER",
                "filters.source_standards",
                "source_standards must be a list",
            )),
        }

        let source_standard = standards.first().cloned();
        (source_standard, standards)
    }
}

/// Does a row fall inside a normalized time range? `None` when the row
/// carries no usable timestamp.
pub fn matches_time_range(row: &Metadata, time_range: Option<&TimeRangeFilter>) -> Option<bool> {
    let range = time_range?;
    let field = range.field.as_deref().unwrap_or("created_at");
    let raw = row
        .get(field)
        .or_else(|| match row.get("metadata") {
            Some(Value::Object(meta)) => meta.get(field),
            _ => None,
        })?
        .clone();
    let instant = parse_utc(&raw)?;

    if let Some(from) = range.from.as_deref().and_then(parse_utc_str) {
        if instant < from {
            return Some(false);
        }
    }
    if let Some(to) = range.to.as_deref().and_then(parse_utc_str) {
        if instant > to {
            return Some(false);
        }
    }
    Some(true)
}

/// Metadata filter keys a row satisfies with equal scalar values.
pub fn metadata_keys_matched(row: &Metadata, metadata_filter: Option<&Metadata>) -> Vec<String> {
    let Some(filter) = metadata_filter else {
        return Vec::new();
    };
    let row_meta = match row.get("metadata") {
        Some(Value::Object(meta)) => Some(meta),
        _ => None,
    };
    filter
        .iter()
        .filter(|(key, expected)| {
            let actual = row
                .get(key.as_str())
                .or_else(|| row_meta.and_then(|m| m.get(key.as_str())));
            actual == Some(expected)
        })
        .map(|(key, _)| key.clone())
        .collect()
}

fn parse_utc(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => parse_utc_str(s),
        _ => None,
    }
}

fn parse_utc_str(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    // Bare dates are accepted as midnight UTC.
    if let Ok(date) = chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    }
    None
}

fn normalized_scope_json(
    tenant_id: &str,
    collection_id: Option<&str>,
    filters: &NormalizedFilters,
) -> Value {
    json!({
        "tenant_id": tenant_id,
        "collection_id": collection_id,
        "filters": {
            "metadata": filters.metadata,
            "time_range": filters.time_range,
            "source_standard": filters.source_standard,
            "source_standards": if filters.source_standards.is_empty() {
                Value::Null
            } else {
                json!(filters.source_standards)
            },
        },
    })
}

/// Rebuild [`NormalizedFilters`] from a validate-scope response payload.
pub fn filters_from_normalized_scope(normalized_scope: &Value) -> NormalizedFilters {
    let filters = normalized_scope
        .get("filters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_else(Map::new);

    NormalizedFilters {
        metadata: filters
            .get("metadata")
            .and_then(Value::as_object)
            .cloned(),
        time_range: filters
            .get("time_range")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok()),
        source_standard: filters
            .get("source_standard")
            .and_then(Value::as_str)
            .map(str::to_string),
        source_standards: filters
            .get("source_standards")
            .and_then(Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
    }
}
