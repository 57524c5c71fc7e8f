//! Import run log: persisted JSON timeline of every action taken during
//! a job.
//!
//! Each job produces a single `{DATA_DIR}/import-runs/{source}/{job_id}.json`
//! file containing an ordered list of events with timestamps.

use std::path::PathBuf;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::stats::ImportStats;

// ---------------------------------------------------------------------------
// data_dir helper
// ---------------------------------------------------------------------------

/// Root data directory, controlled by `DATA_DIR` env var (default: `"data"`).
pub fn data_dir() -> PathBuf {
    PathBuf::from(std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_string()))
}

// ---------------------------------------------------------------------------
// RunLog
// ---------------------------------------------------------------------------

pub struct RunLog {
    pub job_id: Uuid,
    pub source: String,
    pub started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

#[derive(Serialize)]
struct RunEvent {
    seq: u32,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    JobCreated {
        total_records: u32,
        batch_size: usize,
    },
    BatchStarted {
        index: usize,
        size: usize,
    },
    NormalizationFailed {
        record_index: usize,
        error: String,
    },
    GeocodeFailed {
        address: String,
        error: String,
    },
    BatchSubmitted {
        size: usize,
        approved: u32,
        flagged: u32,
        rejected: u32,
        skipped: u32,
        errors: u32,
    },
    CheckpointSaved {
        last_processed_index: usize,
        remaining: usize,
    },
    BudgetCheckpoint {
        spent_usd: f64,
    },
    JobPaused,
    JobResumed {
        from_index: usize,
    },
    JobCompleted,
    JobFailed {
        error: String,
    },
}

impl RunLog {
    pub fn new(job_id: Uuid, source: String) -> Self {
        Self {
            job_id,
            source,
            started_at: Utc::now(),
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    /// Serialize the run log to JSON and write to disk.
    /// Returns the file path on success.
    pub fn save(&self, stats: &ImportStats) -> Result<PathBuf> {
        let dir = data_dir().join("import-runs").join(&self.source);
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(format!("{}.json", self.job_id));

        let output = SerializedRunLog {
            job_id: self.job_id,
            source: &self.source,
            started_at: self.started_at,
            finished_at: Utc::now(),
            stats: SerializedStats::from(stats),
            events: &self.events,
        };

        std::fs::write(&path, serde_json::to_string_pretty(&output)?)?;
        info!(path = %path.display(), events = self.events.len(), "Import run log saved");

        Ok(path)
    }
}

// ---------------------------------------------------------------------------
// Serialization wrappers
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct SerializedRunLog<'a> {
    job_id: Uuid,
    source: &'a str,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    stats: SerializedStats,
    events: &'a [RunEvent],
}

#[derive(Serialize)]
struct SerializedStats {
    total_records: u32,
    processed: u32,
    successful: u32,
    failed: u32,
    flagged: u32,
    rejected: u32,
    skipped: u32,
    batches: u32,
    geocode_failures: u32,
    llm_cost_usd: f64,
}

impl From<&ImportStats> for SerializedStats {
    fn from(s: &ImportStats) -> Self {
        Self {
            total_records: s.total_records,
            processed: s.processed,
            successful: s.successful,
            failed: s.failed,
            flagged: s.flagged,
            rejected: s.rejected,
            skipped: s.skipped,
            batches: s.batches,
            geocode_failures: s.geocode_failures,
            llm_cost_usd: s.llm_cost_usd,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn saves_ordered_events_under_the_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("DATA_DIR", dir.path());

        let job_id = Uuid::new_v4();
        let mut log = RunLog::new(job_id, "test_feed".to_string());
        log.log(EventKind::JobCreated {
            total_records: 2,
            batch_size: 50,
        });
        log.log(EventKind::BatchStarted { index: 0, size: 2 });
        log.log(EventKind::JobCompleted);

        let path = log.save(&ImportStats::default()).unwrap();
        assert!(path.ends_with(format!("import-runs/test_feed/{job_id}.json")));

        let text = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&text).unwrap();
        let events = parsed["events"].as_array().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0]["type"], "job_created");
        assert_eq!(events[0]["seq"], 0);
        assert_eq!(events[1]["size"], 2);
        assert_eq!(events[2]["type"], "job_completed");
    }
}
