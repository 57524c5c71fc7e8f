//! Import job and record state machines.
//!
//! The orchestrator is the only writer of these statuses. Every transition
//! goes through `JobStatus::can_transition_to` so an illegal move is a bug
//! surfaced at the call site, not silent row corruption.

use chrono::{DateTime, Utc};
use openaid_common::VerificationLevel;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running => write!(f, "running"),
            JobStatus::Paused => write!(f, "paused"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed => write!(f, "failed"),
            JobStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl JobStatus {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "running" => JobStatus::Running,
            "paused" => JobStatus::Paused,
            "completed" => JobStatus::Completed,
            "failed" => JobStatus::Failed,
            "cancelled" => JobStatus::Cancelled,
            _ => JobStatus::Pending,
        }
    }

    /// `pending → running → {paused, completed, failed, cancelled}`;
    /// resume (`paused → running`) is the only way out of paused.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Paused, Running)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

/// One job-level failure, ordered by time in the job's error log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub message: String,
    pub at: DateTime<Utc>,
}

impl JobError {
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            at: Utc::now(),
        }
    }
}

/// Resume state persisted at batch boundaries. Carries the remaining raw
/// records so resume never depends on the caller re-deriving the source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub last_processed_index: usize,
    pub pending_batch_queue: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub source_name: String,
    pub status: JobStatus,
    pub total_records: u32,
    pub processed_records: u32,
    pub successful_records: u32,
    pub failed_records: u32,
    pub flagged_records: u32,
    pub rejected_records: u32,
    pub skipped_records: u32,
    pub checkpoint: Option<Checkpoint>,
    pub error_log: Vec<JobError>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(source_name: impl Into<String>, total_records: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_name: source_name.into(),
            status: JobStatus::Pending,
            total_records,
            processed_records: 0,
            successful_records: 0,
            failed_records: 0,
            flagged_records: 0,
            rejected_records: 0,
            skipped_records: 0,
            checkpoint: None,
            error_log: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// `processed = successful + failed + flagged + rejected + skipped`
    /// whenever no batch is in flight.
    pub fn counts_consistent(&self) -> bool {
        self.processed_records
            == self.successful_records
                + self.failed_records
                + self.flagged_records
                + self.rejected_records
                + self.skipped_records
    }
}

// ---------------------------------------------------------------------------
// Record
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Processing,
    Geocoding,
    Verifying,
    Approved,
    Flagged,
    Rejected,
    Error,
    Skipped,
}

impl std::fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordStatus::Pending => write!(f, "pending"),
            RecordStatus::Processing => write!(f, "processing"),
            RecordStatus::Geocoding => write!(f, "geocoding"),
            RecordStatus::Verifying => write!(f, "verifying"),
            RecordStatus::Approved => write!(f, "approved"),
            RecordStatus::Flagged => write!(f, "flagged"),
            RecordStatus::Rejected => write!(f, "rejected"),
            RecordStatus::Error => write!(f, "error"),
            RecordStatus::Skipped => write!(f, "skipped"),
        }
    }
}

impl RecordStatus {
    pub fn from_str_loose(s: &str) -> Self {
        match s {
            "processing" => RecordStatus::Processing,
            "geocoding" => RecordStatus::Geocoding,
            "verifying" => RecordStatus::Verifying,
            "approved" => RecordStatus::Approved,
            "flagged" => RecordStatus::Flagged,
            "rejected" => RecordStatus::Rejected,
            "error" => RecordStatus::Error,
            "skipped" => RecordStatus::Skipped,
            _ => RecordStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RecordStatus::Approved
                | RecordStatus::Flagged
                | RecordStatus::Rejected
                | RecordStatus::Error
                | RecordStatus::Skipped
        )
    }
}

/// One raw record's journey through the pipeline. `raw_data` is the
/// untouched source payload; everything else is filled in as the record
/// advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub source_id: Option<String>,
    pub raw_data: Value,
    pub normalized_data: Option<Value>,
    pub status: RecordStatus,
    pub error_message: Option<String>,
    pub verification_score: Option<f32>,
    pub verification_decision: Option<String>,
    pub verification_reason: Option<String>,
    pub resource_id: Option<Uuid>,
    pub suggestion_id: Option<Uuid>,
    pub geocoding_success: Option<bool>,
    pub processing_ms: Option<u64>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ImportRecord {
    pub fn new(job_id: Uuid, raw_data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            source_id: None,
            raw_data,
            normalized_data: None,
            status: RecordStatus::Pending,
            error_message: None,
            verification_score: None,
            verification_decision: None,
            verification_reason: None,
            resource_id: None,
            suggestion_id: None,
            geocoding_success: None,
            processing_ms: None,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Per-job configuration captured at creation time.
#[derive(Debug, Clone)]
pub struct ImportOptions {
    pub batch_size: usize,
    pub skip_geocoding: bool,
    /// Overrides the mapping's verification level when set.
    pub verification_level: Option<VerificationLevel>,
    pub submitter: String,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            batch_size: 50,
            skip_geocoding: false,
            verification_level: None,
            submitter: "import-pipeline".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_is_only_exited_by_resume() {
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Completed));
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Failed));
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Cancelled));
    }

    #[test]
    fn terminal_states_have_no_exits() {
        for terminal in [JobStatus::Completed, JobStatus::Failed, JobStatus::Cancelled] {
            for next in [
                JobStatus::Pending,
                JobStatus::Running,
                JobStatus::Paused,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Cancelled,
            ] {
                assert!(!terminal.can_transition_to(next), "{terminal} → {next}");
            }
        }
    }

    #[test]
    fn fresh_job_counts_are_consistent() {
        let job = ImportJob::new("hud_housing_counselors", 120);
        assert!(job.counts_consistent());
        assert_eq!(job.status, JobStatus::Pending);
    }
}
