//! The verification agent: tiered checks over one candidate listing.
//!
//! Tier 1 is deterministic (reachability, phone grammar, geocoding).
//! Tier 2 asks the judge whether the candidate's website content matches
//! its claims. Tier 3 corroborates against cross-reference directories and
//! compares overlapping fields. A failed check degrades the score; it
//! never aborts the tiers that follow.
//!
//! `verify` has no side effects on storage. Callers persist the returned
//! result and apply the decision.

use std::collections::BTreeMap;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use ai_client::{Claim, Judge, JudgmentRequest};
use chrono::Utc;
use openaid_common::{CostEntry, CostTracker, NormalizedResource};
use regex::Regex;
use tracing::{debug, info, warn};

use crate::score;
use crate::traits::{CrossReference, GeocodeRequest, Geocoder, WebProbe};
use crate::types::{check, CheckResult, Decision, FieldConflict, VerificationResult, VerificationType};

/// One or more conflicts above this confidence routes the candidate to a
/// human regardless of score.
const CONFLICT_FLAG_THRESHOLD: f32 = 0.7;

const AUTO_REJECT_SCORE: f32 = 0.5;
const REVIEW_SCORE: f32 = 0.7;
const AUTO_APPROVE_SCORE: f32 = 0.85;

/// Auto-approval requires corroboration from at least this many sources.
const MIN_CROSS_REF_SOURCES: u32 = 2;

pub struct VerificationAgent {
    probe: Arc<dyn WebProbe>,
    geocoder: Arc<dyn Geocoder>,
    judge: Arc<dyn Judge>,
    cross_refs: Vec<Arc<dyn CrossReference>>,
    costs: Arc<CostTracker>,
}

impl VerificationAgent {
    pub fn new(
        probe: Arc<dyn WebProbe>,
        geocoder: Arc<dyn Geocoder>,
        judge: Arc<dyn Judge>,
        cross_refs: Vec<Arc<dyn CrossReference>>,
        costs: Arc<CostTracker>,
    ) -> Self {
        Self {
            probe,
            geocoder,
            judge,
            cross_refs,
            costs,
        }
    }

    /// Run all tiers against one candidate and render a decision.
    pub async fn verify(
        &self,
        candidate: &NormalizedResource,
        run_type: VerificationType,
    ) -> VerificationResult {
        let started = Instant::now();
        let mut run = RunState::default();
        let mut checks = BTreeMap::new();

        // --- Tier 1: deterministic checks ---

        let reachable_url = self.check_url(candidate, &mut checks, &mut run).await;
        checks.insert(
            check::PHONE_VALID.to_string(),
            check_phone(candidate.phone.as_deref()),
        );
        self.check_address(candidate, &mut checks, &mut run).await;

        // --- Tier 2: content judgment ---

        if let Some(url) = reachable_url {
            self.check_content(candidate, &url, &mut checks, &mut run)
                .await;
        }

        // --- Tier 3: cross-referencing ---

        let (matched, conflicts) = self.cross_reference(candidate, &mut checks, &mut run).await;

        let overall_score = score::combine(&checks);
        let (decision, decision_reason) = decide(
            candidate.website.is_some(),
            &checks,
            &conflicts,
            overall_score,
            matched,
        );

        info!(
            candidate = candidate.name.as_str(),
            run_type = %run_type,
            score = overall_score,
            decision = %decision,
            external_calls = run.external_calls,
            cost_usd = run.cost_usd,
            "Verification complete"
        );

        VerificationResult {
            overall_score,
            checks,
            conflicts,
            decision,
            decision_reason,
            cross_ref_matches: matched,
            cost_usd: run.cost_usd,
            duration_ms: started.elapsed().as_millis() as u64,
            external_calls: run.external_calls,
        }
    }

    /// Probe the website; on failure ask the judge for a corrected URL and
    /// re-probe once. Returns the URL that answered, for tier 2.
    async fn check_url(
        &self,
        candidate: &NormalizedResource,
        checks: &mut BTreeMap<String, CheckResult>,
        run: &mut RunState,
    ) -> Option<String> {
        let website = candidate.website.as_deref()?;

        run.external_calls += 1;
        let outcome = self.probe.probe(website).await;
        if outcome.reachable {
            checks.insert(
                check::URL_REACHABLE.to_string(),
                CheckResult::passed(1.0).with_evidence(format!(
                    "status {}",
                    outcome.status.unwrap_or_default()
                )),
            );
            return Some(website.to_string());
        }

        // One automated repair attempt, budget permitting.
        if !self.costs.budget_exhausted() {
            run.external_calls += 1;
            match self
                .judge
                .propose_url(&candidate.name, &candidate.city, &candidate.state)
                .await
            {
                Ok(proposal) => {
                    self.record_cost(
                        "url_repair",
                        proposal.input_tokens,
                        proposal.output_tokens,
                        proposal.cost_usd,
                        run,
                    );
                    if let Some(repaired) = proposal.url {
                        run.external_calls += 1;
                        let retry = self.probe.probe(&repaired).await;
                        if retry.reachable {
                            checks.insert(
                                check::URL_REACHABLE.to_string(),
                                CheckResult::passed(0.8).with_evidence(format!(
                                    "{website} unreachable; repaired to {repaired}"
                                )),
                            );
                            return Some(repaired);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "URL repair proposal failed"),
            }
        }

        checks.insert(
            check::URL_REACHABLE.to_string(),
            CheckResult::failed(match outcome.status {
                Some(status) => format!("{website} returned status {status}; repair failed"),
                None => format!("{website} did not respond; repair failed"),
            }),
        );
        None
    }

    async fn check_address(
        &self,
        candidate: &NormalizedResource,
        checks: &mut BTreeMap<String, CheckResult>,
        run: &mut RunState,
    ) {
        let request = GeocodeRequest {
            address: candidate.address.clone(),
            city: Some(candidate.city.clone()),
            state: Some(candidate.state.clone()),
            zip: candidate.zip.clone(),
        };

        run.external_calls += 1;
        match self.geocoder.geocode(&request).await {
            Ok(resolved) => {
                checks.insert(
                    check::ADDRESS_GEOCODED.to_string(),
                    CheckResult::passed(resolved.confidence).with_evidence(format!(
                        "{} ({:.6}, {:.6})",
                        resolved.formatted_address, resolved.latitude, resolved.longitude
                    )),
                );
            }
            Err(e) => {
                debug!(error = %e, "Geocoding failed during verification");
                checks.insert(
                    check::ADDRESS_GEOCODED.to_string(),
                    CheckResult::failed(e.to_string()),
                );
            }
        }
    }

    async fn check_content(
        &self,
        candidate: &NormalizedResource,
        url: &str,
        checks: &mut BTreeMap<String, CheckResult>,
        run: &mut RunState,
    ) {
        if self.costs.budget_exhausted() {
            debug!("Budget exhausted; skipping content judgment");
            return;
        }

        run.external_calls += 1;
        let content = match self.probe.fetch_text(url).await {
            Ok(text) if !text.is_empty() => text,
            Ok(_) => {
                checks.insert(
                    check::CONTENT_MATCH.to_string(),
                    CheckResult::failed("site returned no readable text"),
                );
                return;
            }
            Err(e) => {
                checks.insert(
                    check::CONTENT_MATCH.to_string(),
                    CheckResult::failed(format!("content fetch failed: {e}")),
                );
                return;
            }
        };

        let mut claims = vec![
            Claim::new("name", &candidate.name),
            Claim::new("category", candidate.primary_category.to_string()),
        ];
        if let Some(description) = &candidate.description {
            claims.push(Claim::new("description", description));
        }

        let request = JudgmentRequest {
            question: "Is this website's content consistent with the claimed \
                organization name, service category, and description?"
                .to_string(),
            claims,
            evidence: content,
        };

        run.external_calls += 1;
        match self.judge.judge(&request).await {
            Ok(judgment) => {
                self.record_cost(
                    "content_match",
                    judgment.input_tokens,
                    judgment.output_tokens,
                    judgment.cost_usd,
                    run,
                );
                checks.insert(
                    check::CONTENT_MATCH.to_string(),
                    CheckResult {
                        pass: judgment.pass,
                        confidence: Some(judgment.confidence),
                        evidence: Some(judgment.evidence),
                    },
                );
            }
            Err(e) => {
                warn!(error = %e, "Content judgment failed");
                checks.insert(
                    check::CONTENT_MATCH.to_string(),
                    CheckResult::failed(format!("judgment failed: {e}")),
                );
            }
        }
    }

    async fn cross_reference(
        &self,
        candidate: &NormalizedResource,
        checks: &mut BTreeMap<String, CheckResult>,
        run: &mut RunState,
    ) -> (u32, Vec<FieldConflict>) {
        let mut matched = 0u32;
        let mut score_sum = 0.0f32;
        let mut scored = 0u32;
        let mut conflicts = Vec::new();

        for source in &self.cross_refs {
            run.external_calls += 1;
            match source.lookup(&candidate.name, &candidate.address).await {
                Ok(m) if m.found => {
                    matched += 1;
                    if let Some(s) = m.match_score {
                        score_sum += s;
                        scored += 1;
                    }
                    if let Some(data) = &m.data {
                        conflicts.extend(crate::conflict::detect_conflicts(
                            candidate,
                            source.name(),
                            data,
                        ));
                    }
                }
                Ok(_) => {}
                Err(e) => warn!(source = source.name(), error = %e, "Cross-reference lookup failed"),
            }
        }

        let confidence = if scored > 0 {
            score_sum / scored as f32
        } else {
            1.0
        };

        checks.insert(
            check::CROSS_REFERENCED.to_string(),
            if matched > 0 {
                CheckResult::passed(confidence).with_evidence(format!(
                    "{matched} of {} sources matched",
                    self.cross_refs.len()
                ))
            } else {
                CheckResult::failed(format!("0 of {} sources matched", self.cross_refs.len()))
            },
        );

        checks.insert(
            check::CONFLICT_DETECTION.to_string(),
            if conflicts.is_empty() {
                CheckResult::passed(1.0)
            } else {
                CheckResult::failed(format!(
                    "conflicts on: {}",
                    conflict_fields(&conflicts).join(", ")
                ))
            },
        );

        (matched, conflicts)
    }

    fn record_cost(
        &self,
        purpose: &str,
        input_tokens: u32,
        output_tokens: u32,
        cost_usd: f64,
        run: &mut RunState,
    ) {
        run.cost_usd += cost_usd;
        self.costs.record(CostEntry {
            provider: self.judge.provider().to_string(),
            model: self.judge.model().to_string(),
            purpose: purpose.to_string(),
            input_tokens,
            output_tokens,
            cost_usd,
            at: Utc::now(),
        });
    }
}

#[derive(Default)]
struct RunState {
    external_calls: u32,
    cost_usd: f64,
}

// ---------------------------------------------------------------------------
// Pure pieces: phone grammar, decision policy
// ---------------------------------------------------------------------------

fn phone_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^\s*(\+?1[\s.-]?)?(\(\d{3}\)|\d{3})[\s.-]?\d{3}[\s.-]?\d{4}\s*$")
            .expect("phone regex is valid")
    })
}

fn check_phone(phone: Option<&str>) -> CheckResult {
    match phone {
        Some(phone) if phone_regex().is_match(phone) => CheckResult::passed(1.0),
        Some(phone) => CheckResult::failed(format!("{phone:?} is not a valid NANP number")),
        None => CheckResult::failed("no phone number supplied"),
    }
}

/// Unique field names, preserving first-seen order.
fn conflict_fields<'a>(conflicts: impl IntoIterator<Item = &'a FieldConflict>) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for c in conflicts {
        if !fields.contains(&c.field) {
            fields.push(c.field.clone());
        }
    }
    fields
}

/// The decision policy. Rules apply in order; first match wins.
pub fn decide(
    website_present: bool,
    checks: &BTreeMap<String, CheckResult>,
    conflicts: &[FieldConflict],
    score: f32,
    matched_sources: u32,
) -> (Decision, String) {
    // 1. A claimed website that stayed unreachable after repair is
    //    disqualifying on its own.
    if website_present {
        if let Some(url_check) = checks.get(check::URL_REACHABLE) {
            if !url_check.pass {
                return (Decision::AutoReject, "website unreachable".to_string());
            }
        }
    }

    // 2. Hopeless scores are rejected outright.
    if score < AUTO_REJECT_SCORE {
        return (
            Decision::AutoReject,
            format!("score {score:.2} below auto-reject threshold {AUTO_REJECT_SCORE}"),
        );
    }

    // 3. Material conflicts go to a human.
    let high_conflicts: Vec<&FieldConflict> = conflicts
        .iter()
        .filter(|c| c.confidence > CONFLICT_FLAG_THRESHOLD)
        .collect();
    if !high_conflicts.is_empty() {
        let fields = conflict_fields(high_conflicts.iter().copied());
        return (
            Decision::FlagForHuman,
            format!("conflicting fields: {}", fields.join(", ")),
        );
    }

    // 4. Phone and address are critical fields.
    let failed_critical: Vec<&str> = [check::PHONE_VALID, check::ADDRESS_GEOCODED]
        .into_iter()
        .filter(|name| checks.get(*name).map(|c| !c.pass).unwrap_or(true))
        .collect();
    if !failed_critical.is_empty() {
        return (
            Decision::FlagForHuman,
            format!("critical checks failed: {}", failed_critical.join(", ")),
        );
    }

    // 5. Middling scores go to a human.
    if score < REVIEW_SCORE {
        return (
            Decision::FlagForHuman,
            format!("score {score:.2} requires human review"),
        );
    }

    // 6–7. High scores auto-approve only with enough corroboration and a
    //      clean conflict slate.
    if score >= AUTO_APPROVE_SCORE {
        if matched_sources < MIN_CROSS_REF_SOURCES {
            return (
                Decision::FlagForHuman,
                format!(
                    "insufficient cross-reference: {matched_sources} of {MIN_CROSS_REF_SOURCES} required sources matched"
                ),
            );
        }
        if conflicts.is_empty() {
            return (
                Decision::AutoApprove,
                format!("score {score:.2} with {matched_sources} corroborating sources and no conflicts"),
            );
        }
    }

    // 8. Default safety net.
    (
        Decision::FlagForHuman,
        format!("score {score:.2} requires human review"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passing_checks() -> BTreeMap<String, CheckResult> {
        [
            check::URL_REACHABLE,
            check::PHONE_VALID,
            check::ADDRESS_GEOCODED,
            check::CONTENT_MATCH,
            check::CROSS_REFERENCED,
            check::CONFLICT_DETECTION,
        ]
        .into_iter()
        .map(|name| (name.to_string(), CheckResult::passed(1.0)))
        .collect()
    }

    fn conflict(confidence: f32) -> FieldConflict {
        FieldConflict {
            field: "phone".to_string(),
            claimed: "612-555-0139".to_string(),
            observed: "612-555-0200".to_string(),
            source: "google_places".to_string(),
            confidence,
        }
    }

    #[test]
    fn unreachable_website_rejects_regardless_of_score() {
        let mut checks = passing_checks();
        checks.insert(
            check::URL_REACHABLE.to_string(),
            CheckResult::failed("dead"),
        );
        let (decision, reason) = decide(true, &checks, &[], 0.99, 3);
        assert_eq!(decision, Decision::AutoReject);
        assert_eq!(reason, "website unreachable");
    }

    #[test]
    fn no_website_skips_the_reachability_rule() {
        let mut checks = passing_checks();
        checks.remove(check::URL_REACHABLE);
        let (decision, _) = decide(false, &checks, &[], 0.92, 2);
        assert_eq!(decision, Decision::AutoApprove);
    }

    #[test]
    fn low_score_rejects_with_score_in_reason() {
        let (decision, reason) = decide(false, &passing_checks(), &[], 0.42, 2);
        assert_eq!(decision, Decision::AutoReject);
        assert!(reason.contains("0.42"), "got: {reason}");
    }

    #[test]
    fn high_confidence_conflict_flags_and_names_the_field() {
        let conflicts = vec![conflict(0.8)];
        let (decision, reason) = decide(false, &passing_checks(), &conflicts, 0.90, 2);
        assert_eq!(decision, Decision::FlagForHuman);
        assert!(reason.contains("phone"), "got: {reason}");
    }

    #[test]
    fn failed_critical_check_flags() {
        let mut checks = passing_checks();
        checks.insert(
            check::PHONE_VALID.to_string(),
            CheckResult::failed("no phone number supplied"),
        );
        let (decision, reason) = decide(false, &checks, &[], 0.88, 2);
        assert_eq!(decision, Decision::FlagForHuman);
        assert!(reason.contains("phone_valid"), "got: {reason}");
    }

    #[test]
    fn single_source_match_flags_for_insufficient_cross_reference() {
        let (decision, reason) = decide(false, &passing_checks(), &[], 0.95, 1);
        assert_eq!(decision, Decision::FlagForHuman);
        assert!(reason.contains("insufficient cross-reference"), "got: {reason}");
    }

    #[test]
    fn strong_corroborated_candidate_auto_approves() {
        let (decision, _) = decide(false, &passing_checks(), &[], 0.92, 2);
        assert_eq!(decision, Decision::AutoApprove);
    }

    #[test]
    fn low_confidence_conflict_still_blocks_auto_approval() {
        // Not material enough to flag on its own, but approval requires a
        // completely clean slate.
        let conflicts = vec![conflict(0.3)];
        let (decision, _) = decide(false, &passing_checks(), &conflicts, 0.92, 2);
        assert_eq!(decision, Decision::FlagForHuman);
    }

    #[test]
    fn middling_score_flags_by_default() {
        let (decision, _) = decide(false, &passing_checks(), &[], 0.75, 2);
        assert_eq!(decision, Decision::FlagForHuman);
    }

    #[test]
    fn phone_grammar_accepts_common_formats() {
        for phone in [
            "612-555-0139",
            "(612) 555-0139",
            "612.555.0139",
            "+1 612 555 0139",
            "16125550139",
        ] {
            assert!(check_phone(Some(phone)).pass, "rejected {phone}");
        }
    }

    #[test]
    fn phone_grammar_rejects_garbage() {
        for phone in ["555-0139", "not a phone", "612-555-01", ""] {
            assert!(!check_phone(Some(phone)).pass, "accepted {phone}");
        }
        assert!(!check_phone(None).pass);
    }
}
