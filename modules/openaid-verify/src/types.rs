use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// --- Check names ---

pub mod check {
    pub const URL_REACHABLE: &str = "url_reachable";
    pub const PHONE_VALID: &str = "phone_valid";
    pub const ADDRESS_GEOCODED: &str = "address_geocoded";
    pub const CONTENT_MATCH: &str = "content_match";
    pub const CROSS_REFERENCED: &str = "cross_referenced";
    pub const CONFLICT_DETECTION: &str = "conflict_detection";
}

// --- Decisions ---

/// Terminal classification a verification run assigns to a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    AutoApprove,
    FlagForHuman,
    AutoReject,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Decision::AutoApprove => write!(f, "auto_approve"),
            Decision::FlagForHuman => write!(f, "flag_for_human"),
            Decision::AutoReject => write!(f, "auto_reject"),
        }
    }
}

/// Why a verification run happened. Keyed into the verification log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationType {
    Initial,
    Periodic,
    Triggered,
}

impl std::fmt::Display for VerificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationType::Initial => write!(f, "initial"),
            VerificationType::Periodic => write!(f, "periodic"),
            VerificationType::Triggered => write!(f, "triggered"),
        }
    }
}

// --- Check results ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub pass: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evidence: Option<String>,
}

impl CheckResult {
    pub fn passed(confidence: f32) -> Self {
        Self {
            pass: true,
            confidence: Some(confidence),
            evidence: None,
        }
    }

    pub fn failed(evidence: impl Into<String>) -> Self {
        Self {
            pass: false,
            confidence: None,
            evidence: Some(evidence.into()),
        }
    }

    pub fn with_evidence(mut self, evidence: impl Into<String>) -> Self {
        self.evidence = Some(evidence.into());
        self
    }
}

// --- Conflicts ---

/// Disagreement between a candidate's claimed field value and a value
/// observed in a cross-referenced source. `confidence` is how likely the
/// disagreement is a genuine error rather than formatting noise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConflict {
    pub field: String,
    pub claimed: String,
    pub observed: String,
    /// Which cross-reference source observed the other value.
    pub source: String,
    /// 0.0–1.0
    pub confidence: f32,
}

// --- Result ---

/// Output of one verification run over one candidate. Immutable once
/// produced; persisted verbatim to the verification log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    /// 0.0–1.0
    pub overall_score: f32,
    /// Named checks, ordered for stable serialization.
    pub checks: BTreeMap<String, CheckResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<FieldConflict>,
    pub decision: Decision,
    pub decision_reason: String,
    /// Cross-reference sources that matched this candidate.
    pub cross_ref_matches: u32,
    pub cost_usd: f64,
    pub duration_ms: u64,
    /// Network calls made during the run (probes, geocodes, lookups, LLM).
    pub external_calls: u32,
}
