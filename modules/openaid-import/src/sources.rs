//! Built-in source mappings.
//!
//! Each function describes one feed we regularly ingest. The registry is
//! compile-time; one-off sources can construct a `SourceMapping` directly.

use std::collections::HashMap;

use openaid_common::{Category, VerificationLevel};

use crate::mapper::SourceMapping;

pub fn available_sources() -> Vec<&'static str> {
    vec!["hud_housing_counselors", "findhelp_export", "community_sheet"]
}

pub fn mapping_for(source: &str) -> Option<SourceMapping> {
    match source {
        "hud_housing_counselors" => Some(hud_housing_counselors()),
        "findhelp_export" => Some(findhelp_export()),
        "community_sheet" => Some(community_sheet()),
        _ => None,
    }
}

/// HUD-approved housing counseling agencies. Authoritative government feed
/// with native agency IDs and pre-resolved coordinates.
fn hud_housing_counselors() -> SourceMapping {
    SourceMapping {
        source_name: "hud_housing_counselors".to_string(),
        display_name: "HUD Housing Counseling Agencies".to_string(),
        field_map: field_map(&[
            ("agcName", "name"),
            ("adr1", "address"),
            ("city", "city"),
            ("statecd", "state"),
            ("zipcd", "zip"),
            ("phone1", "phone"),
            ("email", "email"),
            ("weburl", "website"),
            ("services", "services_offered"),
            ("languages", "languages"),
            ("latitude", "latitude"),
            ("longitude", "longitude"),
            ("county", "county"),
        ]),
        category_map: HashMap::from([
            ("housing counseling".to_string(), Category::Housing),
            ("*".to_string(), Category::Housing),
        ]),
        service_map: HashMap::from([
            ("FBC".to_string(), "financial counseling".to_string()),
            ("DFC".to_string(), "mortgage default counseling".to_string()),
            ("PPC".to_string(), "pre-purchase counseling".to_string()),
            ("RHC".to_string(), "rental counseling".to_string()),
            ("HMC".to_string(), "reverse mortgage counseling".to_string()),
        ]),
        tags: vec!["hud".to_string(), "housing".to_string()],
        verification_level: VerificationLevel::Government,
        requires_geocoding: false,
        requests_per_minute: Some(120),
        id_fields: vec!["agcid".to_string()],
    }
}

/// Structured directory export. Decent field coverage, IDs present, but
/// listings age and need corroboration.
fn findhelp_export() -> SourceMapping {
    SourceMapping {
        source_name: "findhelp_export".to_string(),
        display_name: "FindHelp Directory Export".to_string(),
        field_map: field_map(&[
            ("provider_name", "name"),
            ("location.street", "address"),
            ("location.city", "city"),
            ("location.state", "state"),
            ("location.zip", "zip"),
            ("contact.phone", "phone"),
            ("contact.email", "email"),
            ("contact.website", "website"),
            ("about", "description"),
            ("programs", "services_offered"),
            ("eligibility", "eligibility_requirements"),
            ("cost", "fees"),
            ("languages", "languages"),
            ("accessibility", "accessibility_features"),
        ]),
        category_map: HashMap::from([
            ("food".to_string(), Category::Food),
            ("food pantry".to_string(), Category::Food),
            ("housing".to_string(), Category::Housing),
            ("shelter".to_string(), Category::Housing),
            ("health".to_string(), Category::Healthcare),
            ("mental health".to_string(), Category::MentalHealth),
            ("substance use".to_string(), Category::SubstanceUse),
            ("legal".to_string(), Category::Legal),
            ("work".to_string(), Category::Employment),
            ("education".to_string(), Category::Education),
            ("transit".to_string(), Category::Transportation),
            ("care".to_string(), Category::Childcare),
            ("money".to_string(), Category::FinancialAssistance),
            ("goods".to_string(), Category::Clothing),
            ("*".to_string(), Category::Other),
        ]),
        service_map: HashMap::new(),
        tags: vec!["directory".to_string()],
        verification_level: VerificationLevel::PartiallyVerified,
        requires_geocoding: true,
        requests_per_minute: Some(60),
        id_fields: vec!["provider_id".to_string(), "id".to_string()],
    }
}

/// Ad-hoc community spreadsheet submissions. No native IDs, no trust,
/// full verification required.
fn community_sheet() -> SourceMapping {
    SourceMapping {
        source_name: "community_sheet".to_string(),
        display_name: "Community Resource Sheet".to_string(),
        field_map: field_map(&[
            ("Organization", "name"),
            ("Address", "address"),
            ("City", "city"),
            ("State", "state"),
            ("Zip", "zip"),
            ("Phone", "phone"),
            ("Email", "email"),
            ("Website", "website"),
            ("Notes", "description"),
            ("Services", "services_offered"),
        ]),
        category_map: HashMap::from([
            ("food".to_string(), Category::Food),
            ("meals".to_string(), Category::Food),
            ("shelter".to_string(), Category::Housing),
            ("housing".to_string(), Category::Housing),
            ("clinic".to_string(), Category::Healthcare),
            ("counseling".to_string(), Category::MentalHealth),
            ("legal aid".to_string(), Category::Legal),
            ("jobs".to_string(), Category::Employment),
            ("clothing".to_string(), Category::Clothing),
            ("*".to_string(), Category::Other),
        ]),
        service_map: HashMap::new(),
        tags: vec!["community-submitted".to_string()],
        verification_level: VerificationLevel::Unverified,
        requires_geocoding: true,
        requests_per_minute: Some(30),
        id_fields: Vec::new(),
    }
}

fn field_map(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(raw, canonical)| (raw.to_string(), canonical.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_source_resolves() {
        for source in available_sources() {
            let mapping = mapping_for(source).expect(source);
            assert_eq!(mapping.source_name, source);
            assert!(
                mapping.category_map.contains_key("*"),
                "{source} needs a wildcard category"
            );
        }
    }

    #[test]
    fn unknown_source_is_none() {
        assert!(mapping_for("nope").is_none());
    }

    #[test]
    fn trust_tiers_match_source_nature() {
        assert_eq!(
            mapping_for("hud_housing_counselors").unwrap().verification_level,
            VerificationLevel::Government
        );
        assert_eq!(
            mapping_for("community_sheet").unwrap().verification_level,
            VerificationLevel::Unverified
        );
    }
}
