//! Scope text utilities
//!
//! Shared helpers for working with normative-standard references ("ISO
//! 9001") and clause references ("9.1.2") in free text and in retrieved
//! rows. The scope resolver in the retrieval crate builds on these.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static ISO_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\biso\s*[-:_]?\s*(\d{4,5})\b").expect("valid regex"));

static CLAUSE_REF_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b\d+(?:\.\d+)+\b").expect("valid regex"));

/// Normalize a standard reference to canonical `ISO <number>` form.
///
/// Idempotent: normalizing an already-canonical name returns it unchanged.
/// Unrecognized input is uppercased and whitespace-collapsed so scope
/// comparisons stay case-insensitive.
pub fn normalize_scope_name(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    if let Some(caps) = ISO_REF_RE.captures(trimmed) {
        return format!("ISO {}", &caps[1]);
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if !digits.is_empty() && digits.len() >= 4 && digits.len() <= 5 && digits == trimmed {
        return format!("ISO {digits}");
    }
    trimmed
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// Extract every `ISO <number>` reference from free text, first-seen order,
/// deduplicated.
pub fn extract_standard_refs(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for caps in ISO_REF_RE.captures_iter(text) {
        let value = format!("ISO {}", &caps[1]);
        if !seen.contains(&value) {
            seen.push(value);
        }
    }
    seen
}

/// Extract every dotted clause reference (`9.1.2`) from free text.
pub fn extract_clause_refs(text: &str) -> Vec<String> {
    let mut refs = Vec::new();
    for m in CLAUSE_REF_RE.find_iter(text) {
        let value = m.as_str().to_string();
        if !refs.contains(&value) {
            refs.push(value);
        }
    }
    refs
}

/// True when the text carries a clause reference.
pub fn has_clause_reference(text: &str) -> bool {
    CLAUSE_REF_RE.is_match(text)
}

/// Determine the normative scope of a retrieved row.
///
/// Looks at `source_standard` on the row, then on its metadata, then falls
/// back to scanning the content for an explicit standard reference.
pub fn extract_row_scope(row: &serde_json::Map<String, Value>) -> String {
    for key in ["source_standard", "standard", "scope"] {
        if let Some(Value::String(s)) = row.get(key) {
            if !s.trim().is_empty() {
                return s.clone();
            }
        }
    }
    if let Some(Value::Object(meta)) = row.get("metadata") {
        for key in ["source_standard", "standard", "scope"] {
            if let Some(Value::String(s)) = meta.get(key) {
                if !s.trim().is_empty() {
                    return s.clone();
                }
            }
        }
    }
    if let Some(Value::String(content)) = row.get("content") {
        if let Some(first) = extract_standard_refs(content).into_iter().next() {
            return first;
        }
    }
    String::new()
}
