//! Import orchestrator: owns the lifecycle of one import job.
//!
//! Raw records are normalized, optionally geocoded, and submitted to the
//! publisher in fixed-size batches, strictly sequentially. Pause is
//! cooperative and only honored at batch boundaries; a checkpoint carrying
//! the remaining record queue is durably written before the pause returns,
//! so a crash immediately after pausing loses nothing.
//!
//! Failure isolation: a record that fails normalization or geocoding is
//! marked and the batch continues. A failed batch submission marks the
//! whole in-flight batch `error` and is fatal to the job. Anything else
//! that escapes is caught once at the top, appended to the job's error
//! log, and the job is marked `failed`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::Utc;
use openaid_common::{CostTracker, NormalizedResource, OpenAidError};
use openaid_verify::traits::{GeocodeRequest, Geocoder};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::job::{Checkpoint, ImportJob, ImportOptions, ImportRecord, JobError, JobStatus, RecordStatus};
use crate::mapper::{normalize, SourceMapping};
use crate::publisher::{Publisher, SubmissionRequest};
use crate::run_log::{EventKind, RunLog};
use crate::stats::ImportStats;
use crate::store::ImportStore;

pub struct ImportOrchestrator {
    store: Arc<dyn ImportStore>,
    publisher: Arc<dyn Publisher>,
    geocoder: Option<Arc<dyn Geocoder>>,
    costs: Arc<CostTracker>,
    mapping: SourceMapping,
    options: ImportOptions,
    job: ImportJob,
    run_log: RunLog,
    batches: u32,
    geocode_failures: u32,
}

impl std::fmt::Debug for ImportOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImportOrchestrator")
            .field("job", &self.job)
            .field("batches", &self.batches)
            .field("geocode_failures", &self.geocode_failures)
            .finish()
    }
}

impl ImportOrchestrator {
    /// Insert a `pending` job and return an orchestrator ready to `run`.
    pub async fn create(
        store: Arc<dyn ImportStore>,
        publisher: Arc<dyn Publisher>,
        geocoder: Option<Arc<dyn Geocoder>>,
        costs: Arc<CostTracker>,
        mapping: SourceMapping,
        options: ImportOptions,
        total_records: u32,
    ) -> Result<Self> {
        let job = ImportJob::new(mapping.source_name.clone(), total_records);
        store.insert_job(&job).await?;

        let mut run_log = RunLog::new(job.id, mapping.source_name.clone());
        run_log.log(EventKind::JobCreated {
            total_records,
            batch_size: options.batch_size,
        });

        info!(
            job_id = %job.id,
            source = mapping.source_name.as_str(),
            total_records,
            batch_size = options.batch_size,
            "Import job created"
        );

        Ok(Self {
            store,
            publisher,
            geocoder,
            costs,
            mapping,
            options,
            job,
            run_log,
            batches: 0,
            geocode_failures: 0,
        })
    }

    /// Load a paused job for resumption. Requires a saved checkpoint.
    pub async fn resume(
        store: Arc<dyn ImportStore>,
        publisher: Arc<dyn Publisher>,
        geocoder: Option<Arc<dyn Geocoder>>,
        costs: Arc<CostTracker>,
        mapping: SourceMapping,
        options: ImportOptions,
        job_id: Uuid,
    ) -> Result<Self> {
        let job = store
            .load_job(job_id)
            .await?
            .ok_or_else(|| anyhow!("job {job_id} not found"))?;

        if job.status != JobStatus::Paused {
            return Err(anyhow!(
                "job {job_id} is {}, only paused jobs can resume",
                job.status
            ));
        }
        let checkpoint = job
            .checkpoint
            .as_ref()
            .ok_or_else(|| anyhow!("job {job_id} has no checkpoint to resume from"))?;

        let mut run_log = RunLog::new(job.id, mapping.source_name.clone());
        run_log.log(EventKind::JobResumed {
            from_index: checkpoint.last_processed_index,
        });

        info!(
            job_id = %job.id,
            from_index = checkpoint.last_processed_index,
            remaining = checkpoint.pending_batch_queue.len(),
            "Resuming import job"
        );

        Ok(Self {
            store,
            publisher,
            geocoder,
            costs,
            mapping,
            options,
            job,
            run_log,
            batches: 0,
            geocode_failures: 0,
        })
    }

    pub fn job_id(&self) -> Uuid {
        self.job.id
    }

    /// Process every raw record and return the run's stats. Errors have
    /// already been logged against the job by the time this returns Err.
    pub async fn run(&mut self, raw_records: Vec<Value>) -> Result<ImportStats> {
        self.transition(JobStatus::Running)?;
        self.job.started_at = Some(Utc::now());
        self.store.update_job(&self.job).await?;

        let outcome = self.drive(raw_records, 0).await;
        self.settle(outcome).await
    }

    /// Continue a paused job from its checkpoint. When the caller still has
    /// the original record list it may pass it for a consistency check; the
    /// records actually processed come from the checkpoint either way.
    pub async fn run_resumed(&mut self, original: Option<&[Value]>) -> Result<ImportStats> {
        let checkpoint = self
            .job
            .checkpoint
            .clone()
            .ok_or_else(|| anyhow!("job {} has no checkpoint", self.job.id))?;

        if let Some(original) = original {
            let expected = checkpoint.last_processed_index + checkpoint.pending_batch_queue.len();
            if original.len() != expected {
                return Err(anyhow!(
                    "original record list has {} records, checkpoint expects {expected}",
                    original.len()
                ));
            }
        }

        self.transition(JobStatus::Running)?;
        self.store.update_job(&self.job).await?;

        let outcome = self
            .drive(
                checkpoint.pending_batch_queue,
                checkpoint.last_processed_index,
            )
            .await;
        self.settle(outcome).await
    }

    /// True when the job's stored status has been externally flipped to
    /// `paused`. Re-reads storage so no shared memory is needed.
    async fn should_pause(&self) -> Result<bool> {
        Ok(self.store.job_status(self.job.id).await? == JobStatus::Paused)
    }

    // -----------------------------------------------------------------------
    // Batch loop
    // -----------------------------------------------------------------------

    async fn drive(&mut self, queue: Vec<Value>, base_index: usize) -> Result<ImportStats> {
        let batch_size = self.options.batch_size.max(1);
        let mut index = base_index;
        let mut remaining = queue;

        while !remaining.is_empty() {
            if self.should_pause().await? {
                return self.pause(index, remaining).await;
            }

            let take = remaining.len().min(batch_size);
            let batch: Vec<Value> = remaining.drain(..take).collect();
            let started = Instant::now();

            self.run_log.log(EventKind::BatchStarted {
                index,
                size: batch.len(),
            });
            self.process_batch(index, batch).await?;
            index += take;
            self.batches += 1;

            // Checkpoint after every batch, not just on pause, so a crash
            // loses at most one batch of progress. Progress writes leave the
            // status column alone: an external pause flipped onto the row
            // while this batch ran must survive until the next poll.
            let checkpoint = Checkpoint {
                last_processed_index: index,
                pending_batch_queue: remaining.clone(),
            };
            self.store.save_checkpoint(self.job.id, &checkpoint).await?;
            self.job.checkpoint = Some(checkpoint);
            self.store.update_progress(&self.job).await?;
            self.run_log.log(EventKind::CheckpointSaved {
                last_processed_index: index,
                remaining: remaining.len(),
            });
            self.run_log.log(EventKind::BudgetCheckpoint {
                spent_usd: self.costs.total_usd(),
            });

            if !remaining.is_empty() {
                if let Some(wait) = pace(self.mapping.requests_per_minute, take, started.elapsed())
                {
                    tokio::time::sleep(wait).await;
                }
            }
        }

        self.transition(JobStatus::Completed)?;
        self.job.completed_at = Some(Utc::now());
        self.store.update_job(&self.job).await?;
        self.run_log.log(EventKind::JobCompleted);

        let stats = self.stats_snapshot();
        if let Err(e) = self.run_log.save(&stats) {
            warn!(error = %e, "Run log save failed");
        }
        info!(job_id = %self.job.id, "Import job complete. {stats}");
        Ok(stats)
    }

    async fn pause(&mut self, index: usize, remaining: Vec<Value>) -> Result<ImportStats> {
        let checkpoint = Checkpoint {
            last_processed_index: index,
            pending_batch_queue: remaining,
        };
        // The checkpoint must be durable before we hand back control.
        self.store.save_checkpoint(self.job.id, &checkpoint).await?;
        self.run_log.log(EventKind::CheckpointSaved {
            last_processed_index: index,
            remaining: checkpoint.pending_batch_queue.len(),
        });
        self.job.checkpoint = Some(checkpoint);

        self.transition(JobStatus::Paused)?;
        self.store.update_job(&self.job).await?;
        self.run_log.log(EventKind::JobPaused);

        let stats = self.stats_snapshot();
        if let Err(e) = self.run_log.save(&stats) {
            warn!(error = %e, "Run log save failed");
        }
        info!(
            job_id = %self.job.id,
            processed = self.job.processed_records,
            "Import job paused at batch boundary"
        );
        Ok(stats)
    }

    async fn process_batch(&mut self, base_index: usize, batch: Vec<Value>) -> Result<()> {
        let mut records: Vec<ImportRecord> = batch
            .into_iter()
            .map(|raw| ImportRecord::new(self.job.id, raw))
            .collect();
        self.store.insert_records(&records).await?;

        // Normalize and geocode. `submitted` remembers which record each
        // surviving resource came from so results map back by position.
        let mut resources: Vec<NormalizedResource> = Vec::new();
        let mut submitted: Vec<usize> = Vec::new();

        for (offset, record) in records.iter_mut().enumerate() {
            record.status = RecordStatus::Processing;
            let started = Instant::now();

            let mut resource = match normalize(&record.raw_data, &self.mapping) {
                Ok(resource) => resource,
                Err(e) => {
                    record.status = RecordStatus::Error;
                    record.error_message = Some(e.to_string());
                    record.processing_ms = Some(started.elapsed().as_millis() as u64);
                    record.processed_at = Some(Utc::now());
                    self.job.failed_records += 1;
                    self.run_log.log(EventKind::NormalizationFailed {
                        record_index: base_index + offset,
                        error: e.to_string(),
                    });
                    warn!(
                        record_index = base_index + offset,
                        error = %e,
                        "Record failed normalization"
                    );
                    continue;
                }
            };
            record.source_id = Some(resource.source.source_id.clone());

            if self.needs_geocoding(&resource) {
                record.status = RecordStatus::Geocoding;
                self.geocode(&mut resource, record).await;
            }

            record.normalized_data = Some(serde_json::to_value(&resource)?);
            record.status = RecordStatus::Verifying;
            record.processing_ms = Some(started.elapsed().as_millis() as u64);
            resources.push(resource);
            submitted.push(offset);
        }

        if !resources.is_empty() {
            let request = SubmissionRequest {
                resources,
                submitter: self.options.submitter.clone(),
                verification_level: self
                    .options
                    .verification_level
                    .unwrap_or(self.mapping.verification_level),
                notes: None,
            };

            match self.publisher.submit(&request).await {
                Ok(response) => {
                    for (result, &offset) in response.results.iter().zip(&submitted) {
                        let record = &mut records[offset];
                        record.status = result.status;
                        record.resource_id = result.resource_id;
                        record.suggestion_id = result.suggestion_id;
                        record.verification_score = result.verification_score;
                        record.verification_decision =
                            decision_for(result.status).map(str::to_string);
                        record.verification_reason = result.decision_reason.clone();
                        record.error_message = result.error.clone();
                        record.processed_at = Some(Utc::now());
                        self.count(result.status);
                    }
                    self.run_log.log(EventKind::BatchSubmitted {
                        size: response.stats.total as usize,
                        approved: response.stats.auto_approved,
                        flagged: response.stats.flagged,
                        rejected: response.stats.rejected,
                        skipped: response.stats.skipped_duplicates,
                        errors: response.stats.errors,
                    });
                }
                Err(e) => {
                    // Fatal: the whole in-flight batch is marked error.
                    for record in &mut records {
                        if !record.status.is_terminal() {
                            record.status = RecordStatus::Error;
                            record.error_message =
                                Some(format!("batch submission failed: {e}"));
                            record.processed_at = Some(Utc::now());
                            self.job.failed_records += 1;
                        }
                        if let Err(persist) = self.store.update_record(record).await {
                            error!(
                                record_id = %record.id,
                                error = %persist,
                                "Record update failed while handling batch failure"
                            );
                        }
                    }
                    self.job.processed_records += records.len() as u32;
                    return Err(OpenAidError::BatchSubmission(e.to_string()).into());
                }
            }
        }

        self.job.processed_records += records.len() as u32;
        for record in &records {
            self.store.update_record(record).await?;
        }
        Ok(())
    }

    fn needs_geocoding(&self, resource: &NormalizedResource) -> bool {
        self.mapping.requires_geocoding
            && !self.options.skip_geocoding
            && self.geocoder.is_some()
            && (resource.latitude.is_none() || resource.longitude.is_none())
    }

    /// Resolve coordinates for one record. Failure is non-fatal: the record
    /// proceeds without coordinates.
    async fn geocode(&mut self, resource: &mut NormalizedResource, record: &mut ImportRecord) {
        let Some(geocoder) = self.geocoder.clone() else {
            return;
        };
        let request = GeocodeRequest {
            address: resource.address.clone(),
            city: Some(resource.city.clone()),
            state: Some(resource.state.clone()),
            zip: resource.zip.clone(),
        };

        match geocoder.geocode(&request).await {
            Ok(resolved) => {
                resource.latitude = Some(resolved.latitude);
                resource.longitude = Some(resolved.longitude);
                resource.formatted_address = Some(resolved.formatted_address);
                if resource.county.is_none() {
                    resource.county = resolved.county;
                }
                record.geocoding_success = Some(true);
            }
            Err(e) => {
                record.geocoding_success = Some(false);
                self.geocode_failures += 1;
                self.run_log.log(EventKind::GeocodeFailed {
                    address: resource.address.clone(),
                    error: e.to_string(),
                });
                warn!(address = resource.address.as_str(), error = %e, "Geocoding failed");
            }
        }
    }

    // -----------------------------------------------------------------------
    // Bookkeeping
    // -----------------------------------------------------------------------

    /// Top-level catch: anything that escaped the batch loop lands in the
    /// job's error log and the job is marked `failed`, never left `running`.
    async fn settle(&mut self, outcome: Result<ImportStats>) -> Result<ImportStats> {
        match outcome {
            Ok(stats) => Ok(stats),
            Err(e) => {
                self.job.error_log.push(JobError::now(e.to_string()));
                if self.job.status.can_transition_to(JobStatus::Failed) {
                    self.job.status = JobStatus::Failed;
                    self.job.completed_at = Some(Utc::now());
                }
                if let Err(persist) = self.store.update_job(&self.job).await {
                    error!(error = %persist, "Failed to persist failed job state");
                }
                self.run_log.log(EventKind::JobFailed {
                    error: e.to_string(),
                });
                if let Err(save) = self.run_log.save(&self.stats_snapshot()) {
                    warn!(error = %save, "Run log save failed");
                }
                error!(job_id = %self.job.id, error = %e, "Import job failed");
                Err(e)
            }
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.job.status.can_transition_to(next) {
            return Err(anyhow!(
                "illegal job transition {} -> {next}",
                self.job.status
            ));
        }
        self.job.status = next;
        Ok(())
    }

    fn count(&mut self, status: RecordStatus) {
        match status {
            RecordStatus::Approved => self.job.successful_records += 1,
            RecordStatus::Flagged => self.job.flagged_records += 1,
            RecordStatus::Rejected => self.job.rejected_records += 1,
            RecordStatus::Skipped => self.job.skipped_records += 1,
            RecordStatus::Error => self.job.failed_records += 1,
            _ => {}
        }
    }

    fn stats_snapshot(&self) -> ImportStats {
        ImportStats {
            total_records: self.job.total_records,
            processed: self.job.processed_records,
            successful: self.job.successful_records,
            failed: self.job.failed_records,
            flagged: self.job.flagged_records,
            rejected: self.job.rejected_records,
            skipped: self.job.skipped_records,
            batches: self.batches,
            geocode_failures: self.geocode_failures,
            llm_cost_usd: self.costs.total_usd(),
        }
    }
}

fn decision_for(status: RecordStatus) -> Option<&'static str> {
    match status {
        RecordStatus::Approved => Some("auto_approve"),
        RecordStatus::Flagged => Some("flag_for_human"),
        RecordStatus::Rejected => Some("auto_reject"),
        _ => None,
    }
}

/// Remaining wait before the next batch may start, given the source's
/// requests-per-minute budget and how long the last batch took.
fn pace(requests_per_minute: Option<u32>, batch_len: usize, elapsed: Duration) -> Option<Duration> {
    let rpm = requests_per_minute.filter(|rpm| *rpm > 0)?;
    let budget = Duration::from_secs_f64(batch_len as f64 * 60.0 / rpm as f64);
    budget.checked_sub(elapsed).filter(|d| !d.is_zero())
}
