use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// --- Categories ---

/// Canonical service category every source maps into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Food,
    Housing,
    Healthcare,
    MentalHealth,
    SubstanceUse,
    Legal,
    Employment,
    Education,
    Transportation,
    Childcare,
    Seniors,
    Veterans,
    DomesticViolence,
    FinancialAssistance,
    Clothing,
    Utilities,
    Other,
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Food => write!(f, "food"),
            Category::Housing => write!(f, "housing"),
            Category::Healthcare => write!(f, "healthcare"),
            Category::MentalHealth => write!(f, "mental_health"),
            Category::SubstanceUse => write!(f, "substance_use"),
            Category::Legal => write!(f, "legal"),
            Category::Employment => write!(f, "employment"),
            Category::Education => write!(f, "education"),
            Category::Transportation => write!(f, "transportation"),
            Category::Childcare => write!(f, "childcare"),
            Category::Seniors => write!(f, "seniors"),
            Category::Veterans => write!(f, "veterans"),
            Category::DomesticViolence => write!(f, "domestic_violence"),
            Category::FinancialAssistance => write!(f, "financial_assistance"),
            Category::Clothing => write!(f, "clothing"),
            Category::Utilities => write!(f, "utilities"),
            Category::Other => write!(f, "other"),
        }
    }
}

// --- Verification levels ---

/// Trust tier of a source, from authoritative government data down to
/// unverified scraped or ad-hoc submissions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationLevel {
    /// L1: government or otherwise authoritative feed.
    Government,
    /// L2: partially verified directory export.
    PartiallyVerified,
    /// L3: unverified scraped or ad-hoc data.
    Unverified,
}

impl std::fmt::Display for VerificationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationLevel::Government => write!(f, "L1"),
            VerificationLevel::PartiallyVerified => write!(f, "L2"),
            VerificationLevel::Unverified => write!(f, "L3"),
        }
    }
}

// --- Provenance ---

/// Where a normalized record came from. `source_id` is the dedup identity:
/// stable across re-imports of the same origin record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceProvenance {
    pub source_id: String,
    pub source_name: String,
    pub display_name: String,
    pub fetched_at: DateTime<Utc>,
}

// --- Canonical resource ---

/// Canonical, source-agnostic representation of one candidate listing.
/// Required fields are enforced by the mapper, not the type, so partially
/// mapped intermediates can be built up before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedResource {
    pub name: String,
    pub address: String,
    pub city: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub zip: Option<String>,
    pub primary_category: Category,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services_offered: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub eligibility_requirements: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub languages: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accessibility_features: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub formatted_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub county: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    pub source: SourceProvenance,
}

impl NormalizedResource {
    /// Full address string for geocoding: street address plus whichever of
    /// city/state/zip are not already present in it.
    pub fn geocodable_address(&self) -> String {
        let mut out = self.address.clone();
        let lower = out.to_lowercase();
        if !lower.contains(&self.city.to_lowercase()) {
            out.push_str(", ");
            out.push_str(&self.city);
        }
        if !out.to_lowercase().contains(&self.state.to_lowercase()) {
            out.push_str(", ");
            out.push_str(&self.state);
        }
        if let Some(zip) = &self.zip {
            if !out.contains(zip.as_str()) {
                out.push(' ');
                out.push_str(zip);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_resource() -> NormalizedResource {
        NormalizedResource {
            name: "Harbor Light Shelter".to_string(),
            address: "1010 Currie Ave".to_string(),
            city: "Minneapolis".to_string(),
            state: "MN".to_string(),
            zip: Some("55403".to_string()),
            primary_category: Category::Housing,
            phone: None,
            email: None,
            website: None,
            description: None,
            services_offered: vec![],
            eligibility_requirements: None,
            fees: None,
            languages: vec![],
            accessibility_features: vec![],
            latitude: None,
            longitude: None,
            formatted_address: None,
            county: None,
            tags: vec![],
            source: SourceProvenance {
                source_id: "abc123".to_string(),
                source_name: "test_source".to_string(),
                display_name: "Test Source".to_string(),
                fetched_at: Utc::now(),
            },
        }
    }

    #[test]
    fn geocodable_address_appends_missing_context() {
        let r = test_resource();
        assert_eq!(
            r.geocodable_address(),
            "1010 Currie Ave, Minneapolis, MN 55403"
        );
    }

    #[test]
    fn geocodable_address_skips_present_context() {
        let mut r = test_resource();
        r.address = "1010 Currie Ave, Minneapolis, MN 55403".to_string();
        assert_eq!(
            r.geocodable_address(),
            "1010 Currie Ave, Minneapolis, MN 55403"
        );
    }

    #[test]
    fn verification_level_displays_tier() {
        assert_eq!(VerificationLevel::Government.to_string(), "L1");
        assert_eq!(VerificationLevel::Unverified.to_string(), "L3");
    }

    #[test]
    fn category_serializes_snake_case() {
        let json = serde_json::to_string(&Category::MentalHealth).unwrap();
        assert_eq!(json, "\"mental_health\"");
    }
}
