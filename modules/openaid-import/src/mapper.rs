//! Field mapper: one source's raw record shape → the canonical schema.
//!
//! Pure and deterministic apart from the `fetched_at` timestamp. Driven
//! entirely by a per-source `SourceMapping`; adding a source means adding
//! a mapping, not code.

use std::collections::HashMap;

use chrono::Utc;
use openaid_common::{
    Category, NormalizedResource, OpenAidError, SourceProvenance, VerificationLevel,
};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Raw fields consulted, in order, when resolving the category.
const CATEGORY_FIELDS: &[&str] = &["type", "category", "program_type", "facility_type", "service_type"];

/// Canonical required fields, in reporting order.
const REQUIRED_FIELDS: &[&str] = &["name", "address", "city", "state"];

/// Synthesized source IDs are truncated to this many hex chars.
const SOURCE_ID_LEN: usize = 16;

/// Declarative mapping for one source.
#[derive(Debug, Clone)]
pub struct SourceMapping {
    pub source_name: String,
    pub display_name: String,
    /// Raw key (dot-paths allowed) → canonical field name.
    pub field_map: Vec<(String, String)>,
    /// Raw category value (lowercased) → canonical category. The `"*"`
    /// entry is the wildcard default.
    pub category_map: HashMap<String, Category>,
    /// Raw service name → canonical service name.
    pub service_map: HashMap<String, String>,
    /// Appended to every record from this source.
    pub tags: Vec<String>,
    pub verification_level: VerificationLevel,
    pub requires_geocoding: bool,
    /// External budget the orchestrator must respect between batches.
    pub requests_per_minute: Option<u32>,
    /// Raw fields tried, in order, for a native record ID.
    pub id_fields: Vec<String>,
}

/// Map one raw record into the canonical schema.
pub fn normalize(raw: &Value, mapping: &SourceMapping) -> Result<NormalizedResource, OpenAidError> {
    let mut mapped: HashMap<&str, Value> = HashMap::new();
    for (raw_key, canonical) in &mapping.field_map {
        if let Some(value) = get_path(raw, raw_key) {
            if !is_empty(value) {
                mapped.insert(canonical.as_str(), value.clone());
            }
        }
    }

    let missing: Vec<String> = REQUIRED_FIELDS
        .iter()
        .filter(|f| !mapped.contains_key(*f))
        .map(|f| f.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(OpenAidError::MissingRequiredFields {
            source_name: mapping.source_name.clone(),
            fields: missing,
        });
    }

    let primary_category = resolve_category(raw, mapping)?;

    let services_offered = string_list(mapped.get("services_offered"))
        .into_iter()
        .map(|s| resolve_service(&s, &mapping.service_map))
        .collect();

    let source_id = resolve_source_id(raw, &mapped, mapping);

    Ok(NormalizedResource {
        name: text(&mapped, "name").unwrap_or_default(),
        address: text(&mapped, "address").unwrap_or_default(),
        city: text(&mapped, "city").unwrap_or_default(),
        state: text(&mapped, "state").unwrap_or_default(),
        zip: text(&mapped, "zip"),
        primary_category,
        phone: text(&mapped, "phone"),
        email: text(&mapped, "email"),
        website: text(&mapped, "website"),
        description: text(&mapped, "description"),
        services_offered,
        eligibility_requirements: text(&mapped, "eligibility_requirements"),
        fees: text(&mapped, "fees"),
        languages: string_list(mapped.get("languages")),
        accessibility_features: string_list(mapped.get("accessibility_features")),
        latitude: mapped.get("latitude").and_then(Value::as_f64),
        longitude: mapped.get("longitude").and_then(Value::as_f64),
        formatted_address: None,
        county: text(&mapped, "county"),
        tags: mapping.tags.clone(),
        source: SourceProvenance {
            source_id,
            source_name: mapping.source_name.clone(),
            display_name: mapping.display_name.clone(),
            fetched_at: Utc::now(),
        },
    })
}

// ---------------------------------------------------------------------------
// Category and service resolution
// ---------------------------------------------------------------------------

fn resolve_category(raw: &Value, mapping: &SourceMapping) -> Result<Category, OpenAidError> {
    let mut first_seen: Option<String> = None;

    for field in CATEGORY_FIELDS {
        let Some(value) = raw.get(field).and_then(Value::as_str) else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        if first_seen.is_none() {
            first_seen = Some(value.to_string());
        }
        if let Some(category) = mapping.category_map.get(&value.to_lowercase()) {
            return Ok(*category);
        }
    }

    if let Some(category) = mapping.category_map.get("*") {
        return Ok(*category);
    }

    Err(OpenAidError::UnknownCategory {
        source_name: mapping.source_name.clone(),
        raw: first_seen.unwrap_or_default(),
    })
}

/// Exact table match, else case-insensitive substring match, else the raw
/// string passes through unchanged. When several keys substring-match, the
/// longest key wins and ties break lexically, so resolution never depends
/// on map iteration order.
fn resolve_service(raw: &str, service_map: &HashMap<String, String>) -> String {
    if let Some(mapped) = service_map.get(raw) {
        return mapped.clone();
    }
    let lower = raw.to_lowercase();
    let mut candidates: Vec<(&String, &String)> = service_map
        .iter()
        .filter(|(key, _)| {
            let key_lower = key.to_lowercase();
            lower.contains(&key_lower) || key_lower.contains(&lower)
        })
        .collect();
    candidates.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    match candidates.first() {
        Some((_, mapped)) => (*mapped).clone(),
        None => raw.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Source ID
// ---------------------------------------------------------------------------

fn resolve_source_id(
    raw: &Value,
    mapped: &HashMap<&str, Value>,
    mapping: &SourceMapping,
) -> String {
    for field in &mapping.id_fields {
        if let Some(value) = get_path(raw, field) {
            if let Some(id) = coerce_string(value) {
                if !id.trim().is_empty() {
                    return id.trim().to_string();
                }
            }
        }
    }

    derive_source_id(
        mapped.get("name").and_then(coerce_string).as_deref().unwrap_or(""),
        mapped.get("address").and_then(coerce_string).as_deref().unwrap_or(""),
        mapped.get("city").and_then(coerce_string).as_deref().unwrap_or(""),
    )
}

/// Deterministic identity for records with no native ID: hash of the
/// lower-cased, alphanumeric-only name+address+city. Stable across
/// re-imports so duplicate detection works.
pub fn derive_source_id(name: &str, address: &str, city: &str) -> String {
    let mut key = String::with_capacity(name.len() + address.len() + city.len());
    for part in [name, address, city] {
        key.extend(part.chars().filter(|c| c.is_alphanumeric()).flat_map(|c| c.to_lowercase()));
    }
    let digest = Sha256::digest(key.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    hex[..SOURCE_ID_LEN].to_string()
}

// ---------------------------------------------------------------------------
// Raw value plumbing
// ---------------------------------------------------------------------------

/// Raw-side value for a canonical field, resolved through the mapping's
/// rename table. Lets callers filter raw records (say, by state) before
/// normalization.
pub fn raw_field<'a>(raw: &'a Value, mapping: &SourceMapping, canonical: &str) -> Option<&'a Value> {
    let (raw_key, _) = mapping
        .field_map
        .iter()
        .find(|(_, c)| c == canonical)?;
    get_path(raw, raw_key)
}

/// Look up a dot-path ("contact.phone") in a raw record.
fn get_path<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = raw;
    for segment in path.split('.') {
        current = current.get(segment)?;
    }
    Some(current)
}

/// Null, blank strings, and empty arrays never overwrite anything.
fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn coerce_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn text(mapped: &HashMap<&str, Value>, field: &str) -> Option<String> {
    mapped
        .get(field)
        .and_then(coerce_string)
        .map(|s| s.trim().to_string())
}

/// Accepts a JSON array of strings or a single delimited string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(coerce_string)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(|c| c == ',' || c == ';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}
