//! Cost accounting for automated-reasoning calls.
//!
//! A `CostTracker` is constructed per run and injected into whatever makes
//! metered calls. No shared base class, no globals: components that spend
//! money take an `Arc<CostTracker>` and record each call explicitly.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One metered external-reasoning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostEntry {
    pub provider: String,
    pub model: String,
    /// What the call was for, e.g. "content_match" or "url_repair".
    pub purpose: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub at: DateTime<Utc>,
}

struct TrackerState {
    /// Entries not yet drained to the cost log.
    pending: Vec<CostEntry>,
    /// Cumulative spend for the whole run; survives drains.
    spent_usd: f64,
    calls: usize,
}

/// Accumulates metered calls for one run, with an optional spend ceiling.
///
/// Interior mutability so callers can share it behind an `Arc`. The lock is
/// never held across an await point.
pub struct CostTracker {
    state: Mutex<TrackerState>,
    budget_usd: Option<f64>,
}

impl CostTracker {
    pub fn new() -> Self {
        Self::with_budget(None)
    }

    pub fn with_budget_usd(budget_usd: f64) -> Self {
        Self::with_budget(Some(budget_usd))
    }

    fn with_budget(budget_usd: Option<f64>) -> Self {
        Self {
            state: Mutex::new(TrackerState {
                pending: Vec::new(),
                spent_usd: 0.0,
                calls: 0,
            }),
            budget_usd,
        }
    }

    pub fn record(&self, entry: CostEntry) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.spent_usd += entry.cost_usd;
        state.calls += 1;
        state.pending.push(entry);
    }

    /// Cumulative spend for the run, including drained entries.
    pub fn total_usd(&self) -> f64 {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.spent_usd
    }

    pub fn call_count(&self) -> usize {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.calls
    }

    /// True once accumulated spend has reached the ceiling. Callers skip
    /// further metered calls rather than failing the records they were
    /// about to verify.
    pub fn budget_exhausted(&self) -> bool {
        match self.budget_usd {
            Some(budget) => self.total_usd() >= budget,
            None => false,
        }
    }

    pub fn remaining_usd(&self) -> Option<f64> {
        self.budget_usd.map(|b| (b - self.total_usd()).max(0.0))
    }

    /// Remove and return entries recorded since the last drain. Callers
    /// persist the drained entries to the cost log after each verification.
    pub fn drain(&self) -> Vec<CostEntry> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut state.pending)
    }
}

impl Default for CostTracker {
    fn default() -> Self {
        Self::new()
    }
}
