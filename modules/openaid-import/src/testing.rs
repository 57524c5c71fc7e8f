//! In-memory store, resource sink, and scripted publisher for pipeline
//! tests. No database, no network.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use openaid_common::{NormalizedResource, VerificationLevel};
use uuid::Uuid;

use crate::job::{Checkpoint, ImportJob, ImportRecord, JobStatus, RecordStatus};
use crate::publisher::{
    Publisher, ResourceSink, SubmissionRequest, SubmissionResponse, SubmissionResult,
    SubmissionStats,
};
use crate::store::ImportStore;

// ---------------------------------------------------------------------------
// MemoryImportStore
// ---------------------------------------------------------------------------

/// Everything behind mutexes for inspection from tests. `job_status` can be
/// scripted to flip to `paused` after N polls, standing in for an operator
/// pausing the row while a batch is in flight.
#[derive(Default)]
pub struct MemoryImportStore {
    jobs: Mutex<Vec<ImportJob>>,
    records: Mutex<Vec<ImportRecord>>,
    pause_after_polls: Mutex<Option<usize>>,
    polls: AtomicUsize,
}

impl MemoryImportStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `paused` from `job_status` once it has been polled more than
    /// `polls` times.
    pub fn pause_after_polls(&self, polls: usize) {
        *self.pause_after_polls.lock().unwrap_or_else(|e| e.into_inner()) = Some(polls);
    }

    pub fn clear_pause(&self) {
        *self.pause_after_polls.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Flip a stored job row's status directly, standing in for an
    /// operator editing the row.
    pub fn set_status(&self, id: Uuid, status: JobStatus) {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(job) = jobs.iter_mut().find(|j| j.id == id) {
            job.status = status;
        }
    }

    pub fn job(&self, id: Uuid) -> Option<ImportJob> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|j| j.id == id)
            .cloned()
    }

    pub fn records(&self, job_id: Uuid) -> Vec<ImportRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect()
    }

    pub fn records_with_status(&self, job_id: Uuid, status: RecordStatus) -> usize {
        self.records(job_id)
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

#[async_trait]
impl ImportStore for MemoryImportStore {
    async fn insert_job(&self, job: &ImportJob) -> Result<()> {
        self.jobs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(job.clone());
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<ImportJob>> {
        Ok(self.job(id))
    }

    async fn job_status(&self, id: Uuid) -> Result<JobStatus> {
        let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = *self.pause_after_polls.lock().unwrap_or_else(|e| e.into_inner()) {
            if polls > limit {
                return Ok(JobStatus::Paused);
            }
        }
        self.job(id)
            .map(|j| j.status)
            .ok_or_else(|| anyhow!("job {id} not found"))
    }

    async fn update_job(&self, job: &ImportJob) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let stored = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| anyhow!("job {} not found", job.id))?;
        *stored = job.clone();
        Ok(())
    }

    async fn update_progress(&self, job: &ImportJob) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let stored = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| anyhow!("job {} not found", job.id))?;
        let status = stored.status;
        *stored = job.clone();
        stored.status = status;
        Ok(())
    }

    async fn save_checkpoint(&self, id: Uuid, checkpoint: &Checkpoint) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap_or_else(|e| e.into_inner());
        let stored = jobs
            .iter_mut()
            .find(|j| j.id == id)
            .ok_or_else(|| anyhow!("job {id} not found"))?;
        stored.checkpoint = Some(checkpoint.clone());
        Ok(())
    }

    async fn insert_records(&self, records: &[ImportRecord]) -> Result<()> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(records.iter().cloned());
        Ok(())
    }

    async fn update_record(&self, record: &ImportRecord) -> Result<()> {
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        let stored = records
            .iter_mut()
            .find(|r| r.id == record.id)
            .ok_or_else(|| anyhow!("record {} not found", record.id))?;
        *stored = record.clone();
        Ok(())
    }

    async fn records_for_job(&self, job_id: Uuid) -> Result<Vec<ImportRecord>> {
        Ok(self.records(job_id))
    }
}

// ---------------------------------------------------------------------------
// MemoryResourceSink
// ---------------------------------------------------------------------------

pub struct StoredResource {
    pub id: Uuid,
    pub resource: NormalizedResource,
    pub level: VerificationLevel,
    pub score: f32,
}

pub struct StoredSuggestion {
    pub id: Uuid,
    pub resource: NormalizedResource,
    pub flag_reason: String,
    pub score: f32,
}

/// In-memory stand-in for the resource store the pipeline publishes into.
#[derive(Default)]
pub struct MemoryResourceSink {
    resources: Mutex<Vec<StoredResource>>,
    suggestions: Mutex<Vec<StoredSuggestion>>,
}

impl MemoryResourceSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a resource so a later submission reads as a duplicate.
    pub fn seed(&self, resource: &NormalizedResource) -> Uuid {
        let id = Uuid::new_v4();
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StoredResource {
                id,
                resource: resource.clone(),
                level: VerificationLevel::PartiallyVerified,
                score: 1.0,
            });
        id
    }

    pub fn resource_count(&self) -> usize {
        self.resources.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn suggestion_count(&self) -> usize {
        self.suggestions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn flag_reasons(&self) -> Vec<String> {
        self.suggestions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|s| s.flag_reason.clone())
            .collect()
    }
}

#[async_trait]
impl ResourceSink for MemoryResourceSink {
    async fn find_by_source_id(&self, source_id: &str) -> Result<Option<Uuid>> {
        Ok(self
            .resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|r| r.resource.source.source_id == source_id)
            .map(|r| r.id))
    }

    async fn create_resource(
        &self,
        resource: &NormalizedResource,
        level: VerificationLevel,
        score: f32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.resources
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StoredResource {
                id,
                resource: resource.clone(),
                level,
                score,
            });
        Ok(id)
    }

    async fn create_suggestion(
        &self,
        resource: &NormalizedResource,
        flag_reason: &str,
        score: f32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.suggestions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(StoredSuggestion {
                id,
                resource: resource.clone(),
                flag_reason: flag_reason.to_string(),
                score,
            });
        Ok(id)
    }
}

// ---------------------------------------------------------------------------
// ScriptedPublisher
// ---------------------------------------------------------------------------

/// Approves every resource, unless scripted to fail a specific submit call.
/// Records every submitted source_id for reprocessing assertions.
#[derive(Default)]
pub struct ScriptedPublisher {
    fail_on_call: Option<usize>,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedPublisher {
    pub fn approving() -> Self {
        Self::default()
    }

    /// The nth submit call (1-based) returns Err, as if the publication
    /// endpoint went away mid-run.
    pub fn failing_on_call(n: usize) -> Self {
        Self {
            fail_on_call: Some(n),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Every source_id ever submitted, in order.
    pub fn submitted_source_ids(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .flatten()
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Publisher for ScriptedPublisher {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionResponse> {
        let call = {
            let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
            calls.push(
                request
                    .resources
                    .iter()
                    .map(|r| r.source.source_id.clone())
                    .collect(),
            );
            calls.len()
        };

        if self.fail_on_call == Some(call) {
            return Err(anyhow!("publication endpoint unreachable"));
        }

        let results: Vec<SubmissionResult> = request
            .resources
            .iter()
            .map(|resource| SubmissionResult {
                source_id: resource.source.source_id.clone(),
                status: RecordStatus::Approved,
                resource_id: Some(Uuid::new_v4()),
                suggestion_id: None,
                verification_score: Some(0.9),
                decision_reason: Some("scripted approval".to_string()),
                error: None,
            })
            .collect();

        Ok(SubmissionResponse {
            success: true,
            stats: SubmissionStats {
                total: results.len() as u32,
                submitted: results.len() as u32,
                auto_approved: results.len() as u32,
                ..Default::default()
            },
            results,
        })
    }
}
