//! Scenario tests for the verification agent: mocks at every seam, no
//! network, no database. Each scenario wires the checks to land in a
//! specific decision-policy rule.

use std::sync::Arc;

use serde_json::json;

use ai_client::testing::ScriptedJudge;
use openaid_common::{Category, CostTracker, NormalizedResource, SourceProvenance};
use openaid_verify::agent::VerificationAgent;
use openaid_verify::testing::{MockCrossReference, MockGeocoder, MockProbe};
use openaid_verify::types::check;
use openaid_verify::{Decision, VerificationType};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const SITE: &str = "https://harborlight.example.org";

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
        website: Some(SITE.to_string()),
        description: Some("Emergency shelter and meals".to_string()),
        services_offered: vec!["emergency shelter".to_string()],
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
            source_id: "hud-001".to_string(),
            source_name: "hud_housing_counselors".to_string(),
            display_name: "HUD Housing Counselors".to_string(),
            fetched_at: chrono::Utc::now(),
        },
    }
}

fn strong_agent(cross_refs: Vec<Arc<dyn openaid_verify::traits::CrossReference>>) -> VerificationAgent {
    VerificationAgent::new(
        Arc::new(MockProbe::new().with_page(SITE, "Harbor Light Center emergency shelter and meals")),
        Arc::new(MockGeocoder::resolving(44.9786, -93.2790, 0.95)),
        Arc::new(ScriptedJudge::passing(0.9)),
        cross_refs,
        Arc::new(CostTracker::new()),
    )
}

fn two_matching_sources() -> Vec<Arc<dyn openaid_verify::traits::CrossReference>> {
    vec![
        Arc::new(MockCrossReference::matching("google_places", 0.9)),
        Arc::new(MockCrossReference::matching("civic_directory", 0.9)),
    ]
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

/// A strong candidate corroborated by two sources auto-approves.
#[tokio::test]
async fn corroborated_candidate_auto_approves() {
    let agent = strong_agent(two_matching_sources());
    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    assert!(result.overall_score >= 0.85, "score {}", result.overall_score);
    assert_eq!(result.cross_ref_matches, 2);
    assert!(result.conflicts.is_empty());
    assert_eq!(result.decision, Decision::AutoApprove);
}

/// An unreachable website whose repair also fails is always rejected,
/// no matter how strong the rest of the record is.
#[tokio::test]
async fn unreachable_website_auto_rejects_even_when_everything_else_passes() {
    let agent = VerificationAgent::new(
        // No URLs reachable: the listed site and the repair both fail.
        Arc::new(MockProbe::new()),
        Arc::new(MockGeocoder::resolving(44.9786, -93.2790, 0.95)),
        Arc::new(ScriptedJudge::passing(0.9).with_url_proposal("https://repaired.example.org")),
        two_matching_sources(),
        Arc::new(CostTracker::new()),
    );

    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    assert_eq!(result.decision, Decision::AutoReject);
    assert_eq!(result.decision_reason, "website unreachable");
    // The repair attempt was made and metered.
    assert!(result.cost_usd > 0.0);
}

/// A repairable website passes reachability through the corrected URL.
#[tokio::test]
async fn repaired_url_counts_as_reachable() {
    let repaired = "https://harborlight-new.example.org";
    let agent = VerificationAgent::new(
        Arc::new(MockProbe::new().with_page(repaired, "Harbor Light Center shelter")),
        Arc::new(MockGeocoder::resolving(44.9786, -93.2790, 0.95)),
        Arc::new(ScriptedJudge::passing(0.9).with_url_proposal(repaired)),
        two_matching_sources(),
        Arc::new(CostTracker::new()),
    );

    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    let url_check = &result.checks[check::URL_REACHABLE];
    assert!(url_check.pass);
    assert!(
        url_check.evidence.as_deref().unwrap_or("").contains(repaired),
        "evidence should name the repaired URL"
    );
    assert_ne!(result.decision, Decision::AutoReject);
}

/// A high-confidence field conflict routes to a human and names the field.
#[tokio::test]
async fn high_confidence_conflict_flags_for_human() {
    let cross_refs: Vec<Arc<dyn openaid_verify::traits::CrossReference>> = vec![
        Arc::new(
            MockCrossReference::matching("google_places", 0.9)
                .with_data(json!({ "phone": "(612) 555-0200" })),
        ),
        Arc::new(MockCrossReference::matching("civic_directory", 0.9)),
    ];
    let agent = strong_agent(cross_refs);

    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    assert_eq!(result.conflicts.len(), 1);
    assert!(result.conflicts[0].confidence > 0.7);
    assert_eq!(result.decision, Decision::FlagForHuman);
    assert!(
        result.decision_reason.contains("phone"),
        "got: {}",
        result.decision_reason
    );
}

/// A single corroborating source is not enough for auto-approval.
#[tokio::test]
async fn single_cross_reference_match_is_insufficient() {
    let cross_refs: Vec<Arc<dyn openaid_verify::traits::CrossReference>> = vec![
        Arc::new(MockCrossReference::matching("google_places", 0.95)),
        Arc::new(MockCrossReference::not_found("civic_directory")),
    ];
    let agent = strong_agent(cross_refs);

    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    assert!(result.overall_score >= 0.85, "score {}", result.overall_score);
    assert_eq!(result.cross_ref_matches, 1);
    assert_eq!(result.decision, Decision::FlagForHuman);
    assert!(
        result.decision_reason.contains("insufficient cross-reference"),
        "got: {}",
        result.decision_reason
    );
}

/// A downed directory degrades to a non-match instead of aborting the run.
#[tokio::test]
async fn cross_reference_outage_does_not_abort_verification() {
    let cross_refs: Vec<Arc<dyn openaid_verify::traits::CrossReference>> = vec![
        Arc::new(MockCrossReference::erroring("google_places")),
        Arc::new(MockCrossReference::matching("civic_directory", 0.9)),
    ];
    let agent = strong_agent(cross_refs);

    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    assert_eq!(result.cross_ref_matches, 1);
    // One match still counts; the outage only costs corroboration.
    assert!(result.checks[check::CROSS_REFERENCED].pass);
}

/// Cost and call accounting ride along on the result.
#[tokio::test]
async fn verification_meters_cost_and_external_calls() {
    let costs = Arc::new(CostTracker::new());
    let agent = VerificationAgent::new(
        Arc::new(MockProbe::new().with_page(SITE, "Harbor Light Center emergency shelter")),
        Arc::new(MockGeocoder::resolving(44.9786, -93.2790, 0.95)),
        Arc::new(ScriptedJudge::passing(0.9)),
        two_matching_sources(),
        costs.clone(),
    );

    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    // probe + geocode + fetch + judgment + two lookups
    assert_eq!(result.external_calls, 6);
    assert!(result.cost_usd > 0.0);
    assert_eq!(costs.call_count(), 1);
    assert!((costs.total_usd() - result.cost_usd).abs() < 1e-12);
}

/// An exhausted budget skips the content judgment instead of failing the
/// candidate for it.
#[tokio::test]
async fn exhausted_budget_skips_content_judgment() {
    let agent = VerificationAgent::new(
        Arc::new(MockProbe::new().with_page(SITE, "Harbor Light Center emergency shelter")),
        Arc::new(MockGeocoder::resolving(44.9786, -93.2790, 0.95)),
        Arc::new(ScriptedJudge::passing(0.9)),
        two_matching_sources(),
        Arc::new(CostTracker::with_budget_usd(0.0)),
    );

    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    assert!(!result.checks.contains_key(check::CONTENT_MATCH));
    assert_eq!(result.cost_usd, 0.0);
    // Absent check drops out of the weighting: still approvable.
    assert_eq!(result.decision, Decision::AutoApprove);
}

/// A failed geocode is a failed critical check: flag, not reject.
#[tokio::test]
async fn failed_geocode_flags_for_human() {
    let agent = VerificationAgent::new(
        Arc::new(MockProbe::new().with_page(SITE, "Harbor Light Center emergency shelter")),
        Arc::new(MockGeocoder::failing()),
        Arc::new(ScriptedJudge::passing(0.9)),
        two_matching_sources(),
        Arc::new(CostTracker::new()),
    );

    let result = agent.verify(&candidate(), VerificationType::Initial).await;

    assert!(!result.checks[check::ADDRESS_GEOCODED].pass);
    assert_eq!(result.decision, Decision::FlagForHuman);
    assert!(
        result.decision_reason.contains("address_geocoded"),
        "got: {}",
        result.decision_reason
    );
}
