//! Conflict detection between a candidate's claimed fields and the
//! snapshot a cross-reference source returned.
//!
//! Comparison is type-aware: coordinates get a numeric tolerance, phones
//! are compared digit-for-digit, everything else is compared after
//! case/punctuation normalization. A conflict's confidence encodes how
//! material the mismatch is: near-misses (one value containing the
//! other, heavy token overlap) rank well below outright disagreement.

use openaid_common::NormalizedResource;
use serde_json::Value;

use crate::types::FieldConflict;

/// ~100m at mid-latitudes. Coordinate differences under this are noise.
const COORD_TOLERANCE: f64 = 1e-3;

/// Mismatch confidence when values disagree outright, by field weight.
fn field_weight(field: &str) -> f32 {
    match field {
        "name" => 0.9,
        "state" => 0.9,
        "phone" => 0.85,
        "city" => 0.8,
        "address" => 0.75,
        "zip" => 0.7,
        "website" => 0.6,
        _ => 0.5,
    }
}

/// Compare every overlapping field between the candidate and an observed
/// snapshot. Emits one conflict per materially disagreeing field.
pub fn detect_conflicts(
    candidate: &NormalizedResource,
    source_name: &str,
    observed: &serde_json::Map<String, Value>,
) -> Vec<FieldConflict> {
    let mut conflicts = Vec::new();

    let claimed_strings: [(&str, Option<&str>); 6] = [
        ("name", Some(candidate.name.as_str())),
        ("address", Some(candidate.address.as_str())),
        ("city", Some(candidate.city.as_str())),
        ("state", Some(candidate.state.as_str())),
        ("zip", candidate.zip.as_deref()),
        ("phone", candidate.phone.as_deref()),
    ];

    for (field, claimed) in claimed_strings {
        let Some(claimed) = claimed else { continue };
        let Some(observed_value) = observed.get(field).and_then(Value::as_str) else {
            continue;
        };
        if let Some(confidence) = string_mismatch(field, claimed, observed_value) {
            conflicts.push(FieldConflict {
                field: field.to_string(),
                claimed: claimed.to_string(),
                observed: observed_value.to_string(),
                source: source_name.to_string(),
                confidence,
            });
        }
    }

    if let Some(website) = candidate.website.as_deref() {
        if let Some(observed_site) = observed.get("website").and_then(Value::as_str) {
            if normalize_url(website) != normalize_url(observed_site) {
                conflicts.push(FieldConflict {
                    field: "website".to_string(),
                    claimed: website.to_string(),
                    observed: observed_site.to_string(),
                    source: source_name.to_string(),
                    confidence: field_weight("website"),
                });
            }
        }
    }

    for (field, claimed) in [
        ("latitude", candidate.latitude),
        ("longitude", candidate.longitude),
    ] {
        let Some(claimed) = claimed else { continue };
        let Some(observed_value) = observed.get(field).and_then(Value::as_f64) else {
            continue;
        };
        if (claimed - observed_value).abs() > COORD_TOLERANCE {
            conflicts.push(FieldConflict {
                field: field.to_string(),
                claimed: format!("{claimed:.6}"),
                observed: format!("{observed_value:.6}"),
                source: source_name.to_string(),
                confidence: 0.8,
            });
        }
    }

    conflicts
}

/// None when the values agree; otherwise a mismatch confidence.
fn string_mismatch(field: &str, claimed: &str, observed: &str) -> Option<f32> {
    if field == "phone" {
        return if same_phone(claimed, observed) {
            None
        } else {
            Some(field_weight(field))
        };
    }

    let a = normalize_text(claimed);
    let b = normalize_text(observed);
    if a == b || a.is_empty() || b.is_empty() {
        return None;
    }

    // Containment reads as a formatting difference ("Harbor Light" vs
    // "Harbor Light Center"), not a disagreement.
    if a.contains(&b) || b.contains(&a) {
        return Some(0.3);
    }
    if token_overlap(&a, &b) >= 0.5 {
        return Some(0.5);
    }
    Some(field_weight(field))
}

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut last_space = true;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    out.trim_end().to_string()
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Phones match when their digits agree, ignoring a leading country code.
fn same_phone(a: &str, b: &str) -> bool {
    let mut a = digits_only(a);
    let mut b = digits_only(b);
    if a.len() == 11 && a.starts_with('1') {
        a.remove(0);
    }
    if b.len() == 11 && b.starts_with('1') {
        b.remove(0);
    }
    !a.is_empty() && a == b
}

fn normalize_url(url: &str) -> String {
    url.trim()
        .to_lowercase()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .trim_end_matches('/')
        .to_string()
}

/// Jaccard overlap of whitespace tokens on normalized text. Also used for
/// cross-reference match scoring.
pub fn token_overlap(a: &str, b: &str) -> f32 {
    let ta: std::collections::HashSet<&str> = a.split_whitespace().collect();
    let tb: std::collections::HashSet<&str> = b.split_whitespace().collect();
    if ta.is_empty() || tb.is_empty() {
        return 0.0;
    }
    let shared = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    shared as f32 / union as f32
}

/// Similarity of two names, 0.0–1.0.
pub fn name_similarity(a: &str, b: &str) -> f32 {
    let a = normalize_text(a);
    let b = normalize_text(b);
    if a == b {
        return 1.0;
    }
    if a.contains(&b) || b.contains(&a) {
        return 0.85;
    }
    token_overlap(&a, &b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use openaid_common::{Category, SourceProvenance};
    use serde_json::json;

    fn candidate() -> NormalizedResource {
        NormalizedResource {
            name: "Harbor Light Center".to_string(),
            address: "1010 Currie Ave".to_string(),
            city: "Minneapolis".to_string(),
            state: "MN".to_string(),
            zip: Some("55403".to_string()),
            primary_category: Category::Housing,
            phone: Some("(612) 555-0139".to_string()),
            email: None,
            website: Some("https://www.harborlight.example.org/".to_string()),
            description: None,
            services_offered: vec![],
            eligibility_requirements: None,
            fees: None,
            languages: vec![],
            accessibility_features: vec![],
            latitude: Some(44.9786),
            longitude: Some(-93.2790),
            formatted_address: None,
            county: None,
            tags: vec![],
            source: SourceProvenance {
                source_id: "x".to_string(),
                source_name: "test".to_string(),
                display_name: "Test".to_string(),
                fetched_at: Utc::now(),
            },
        }
    }

    #[test]
    fn formatting_differences_are_not_conflicts() {
        let observed = json!({
            "name": "HARBOR LIGHT CENTER",
            "address": "1010 Currie Ave.",
            "phone": "+1 612-555-0139",
            "website": "http://harborlight.example.org",
        });
        let conflicts = detect_conflicts(
            &candidate(),
            "google_places",
            observed.as_object().unwrap(),
        );
        assert!(conflicts.is_empty(), "got: {conflicts:?}");
    }

    #[test]
    fn different_phone_is_a_high_confidence_conflict() {
        let observed = json!({ "phone": "(612) 555-0200" });
        let conflicts = detect_conflicts(
            &candidate(),
            "google_places",
            observed.as_object().unwrap(),
        );
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "phone");
        assert!(conflicts[0].confidence > 0.7);
    }

    #[test]
    fn coordinate_noise_is_tolerated_but_drift_is_not() {
        let near = json!({ "latitude": 44.9790, "longitude": -93.2793 });
        assert!(detect_conflicts(&candidate(), "s", near.as_object().unwrap()).is_empty());

        let far = json!({ "latitude": 45.1, "longitude": -93.2790 });
        let conflicts = detect_conflicts(&candidate(), "s", far.as_object().unwrap());
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].field, "latitude");
    }

    #[test]
    fn name_containment_scores_low_confidence() {
        let observed = json!({ "name": "Harbor Light" });
        let conflicts = detect_conflicts(&candidate(), "s", observed.as_object().unwrap());
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].confidence <= 0.3);
    }

    #[test]
    fn unrelated_name_scores_field_weight() {
        let observed = json!({ "name": "Downtown Dental Clinic" });
        let conflicts = detect_conflicts(&candidate(), "s", observed.as_object().unwrap());
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].confidence >= 0.9);
    }

    #[test]
    fn name_similarity_ranks_exact_then_contains_then_overlap() {
        assert_eq!(name_similarity("Harbor Light", "harbor light"), 1.0);
        assert!(name_similarity("Harbor Light", "Harbor Light Center") > 0.8);
        assert!(name_similarity("Harbor Light", "Harbor House") > 0.0);
        assert_eq!(name_similarity("Harbor Light", "Dental Clinic"), 0.0);
    }
}
