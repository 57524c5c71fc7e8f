//! Combine check outcomes into one score in [0, 1].
//!
//! The score is a weighted average over the checks that actually ran. A
//! check that was not applicable (no website supplied, say) is absent from
//! the map and drops out of both numerator and denominator, so candidates
//! are not punished for fields they never claimed. A passed check
//! contributes its confidence (1.0 when the check reports none); a failed
//! check contributes zero. Flipping any single check fail→pass therefore
//! never lowers the score, and pass→fail never raises it.

use std::collections::BTreeMap;

use crate::types::{check, CheckResult};

/// Relative weight of each named check.
pub const CHECK_WEIGHTS: &[(&str, f32)] = &[
    (check::URL_REACHABLE, 0.20),
    (check::PHONE_VALID, 0.15),
    (check::ADDRESS_GEOCODED, 0.20),
    (check::CONTENT_MATCH, 0.20),
    (check::CROSS_REFERENCED, 0.15),
    (check::CONFLICT_DETECTION, 0.10),
];

/// Weight for a check name outside the table (custom/triggered checks).
const DEFAULT_WEIGHT: f32 = 0.10;

fn weight_for(name: &str) -> f32 {
    CHECK_WEIGHTS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, w)| *w)
        .unwrap_or(DEFAULT_WEIGHT)
}

/// Weighted average over the checks present. Empty map scores 0.
pub fn combine(checks: &BTreeMap<String, CheckResult>) -> f32 {
    let mut total_weight = 0.0f32;
    let mut weighted_sum = 0.0f32;

    for (name, result) in checks {
        let weight = weight_for(name);
        total_weight += weight;
        if result.pass {
            weighted_sum += weight * result.confidence.unwrap_or(1.0).clamp(0.0, 1.0);
        }
    }

    if total_weight == 0.0 {
        return 0.0;
    }
    (weighted_sum / total_weight).clamp(0.0, 1.0)
}
