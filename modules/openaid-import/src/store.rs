//! Postgres persistence for jobs and records.
//!
//! The orchestrator is the only writer. `job_status` is re-read from
//! storage at every batch boundary so an external pause (an operator
//! flipping the row to `paused`) is honored without shared memory.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::job::{Checkpoint, ImportJob, ImportRecord, JobStatus, RecordStatus};

#[async_trait]
pub trait ImportStore: Send + Sync {
    async fn insert_job(&self, job: &ImportJob) -> Result<()>;

    async fn load_job(&self, id: Uuid) -> Result<Option<ImportJob>>;

    /// Current status straight from storage, not from memory.
    async fn job_status(&self, id: Uuid) -> Result<JobStatus>;

    /// Persist counters, status, checkpoint, error log, and timestamps.
    async fn update_job(&self, job: &ImportJob) -> Result<()>;

    /// Persist counters, checkpoint, and error log WITHOUT touching the
    /// status column. Used between batches so an external pause (the row
    /// flipped to `paused` by an operator) is never overwritten by the
    /// orchestrator's own progress writes.
    async fn update_progress(&self, job: &ImportJob) -> Result<()>;

    /// Durably write the checkpoint. Must complete before a pause returns.
    async fn save_checkpoint(&self, id: Uuid, checkpoint: &Checkpoint) -> Result<()>;

    async fn insert_records(&self, records: &[ImportRecord]) -> Result<()>;

    async fn update_record(&self, record: &ImportRecord) -> Result<()>;

    async fn records_for_job(&self, job_id: Uuid) -> Result<Vec<ImportRecord>>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgImportStore {
    pool: PgPool,
}

impl PgImportStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ImportStore for PgImportStore {
    async fn insert_job(&self, job: &ImportJob) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO import_jobs
                (id, source_name, status, total_records, processed_records,
                 successful_records, failed_records, flagged_records,
                 rejected_records, skipped_records, checkpoint, error_log,
                 created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(job.id)
        .bind(&job.source_name)
        .bind(job.status.to_string())
        .bind(job.total_records as i64)
        .bind(job.processed_records as i64)
        .bind(job.successful_records as i64)
        .bind(job.failed_records as i64)
        .bind(job.flagged_records as i64)
        .bind(job.rejected_records as i64)
        .bind(job.skipped_records as i64)
        .bind(checkpoint_json(job)?)
        .bind(serde_json::to_value(&job.error_log)?)
        .bind(job.created_at)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_job(&self, id: Uuid) -> Result<Option<ImportJob>> {
        let row = sqlx::query("SELECT * FROM import_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(job_from_row).transpose()
    }

    async fn job_status(&self, id: Uuid) -> Result<JobStatus> {
        let row = sqlx::query_as::<_, (String,)>("SELECT status FROM import_jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| anyhow!("job {id} not found"))?;
        Ok(JobStatus::from_str_loose(&row.0))
    }

    async fn update_job(&self, job: &ImportJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs SET
                status = $2, processed_records = $3, successful_records = $4,
                failed_records = $5, flagged_records = $6, rejected_records = $7,
                skipped_records = $8, checkpoint = $9, error_log = $10,
                started_at = $11, completed_at = $12
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(job.processed_records as i64)
        .bind(job.successful_records as i64)
        .bind(job.failed_records as i64)
        .bind(job.flagged_records as i64)
        .bind(job.rejected_records as i64)
        .bind(job.skipped_records as i64)
        .bind(checkpoint_json(job)?)
        .bind(serde_json::to_value(&job.error_log)?)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_progress(&self, job: &ImportJob) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_jobs SET
                processed_records = $2, successful_records = $3,
                failed_records = $4, flagged_records = $5,
                rejected_records = $6, skipped_records = $7,
                checkpoint = $8, error_log = $9
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.processed_records as i64)
        .bind(job.successful_records as i64)
        .bind(job.failed_records as i64)
        .bind(job.flagged_records as i64)
        .bind(job.rejected_records as i64)
        .bind(job.skipped_records as i64)
        .bind(checkpoint_json(job)?)
        .bind(serde_json::to_value(&job.error_log)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_checkpoint(&self, id: Uuid, checkpoint: &Checkpoint) -> Result<()> {
        sqlx::query("UPDATE import_jobs SET checkpoint = $2 WHERE id = $1")
            .bind(id)
            .bind(serde_json::to_value(checkpoint)?)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_records(&self, records: &[ImportRecord]) -> Result<()> {
        for record in records {
            sqlx::query(
                r#"
                INSERT INTO import_records
                    (id, job_id, source_id, raw_data, normalized_data, status,
                     error_message, verification_score, verification_decision,
                     verification_reason, resource_id, suggestion_id,
                     geocoding_success, processing_ms, created_at, processed_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
                "#,
            )
            .bind(record.id)
            .bind(record.job_id)
            .bind(&record.source_id)
            .bind(&record.raw_data)
            .bind(&record.normalized_data)
            .bind(record.status.to_string())
            .bind(&record.error_message)
            .bind(record.verification_score)
            .bind(&record.verification_decision)
            .bind(&record.verification_reason)
            .bind(record.resource_id)
            .bind(record.suggestion_id)
            .bind(record.geocoding_success)
            .bind(record.processing_ms.map(|ms| ms as i64))
            .bind(record.created_at)
            .bind(record.processed_at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn update_record(&self, record: &ImportRecord) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE import_records SET
                source_id = $2, normalized_data = $3, status = $4,
                error_message = $5, verification_score = $6,
                verification_decision = $7, verification_reason = $8,
                resource_id = $9, suggestion_id = $10, geocoding_success = $11,
                processing_ms = $12, processed_at = $13
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(&record.source_id)
        .bind(&record.normalized_data)
        .bind(record.status.to_string())
        .bind(&record.error_message)
        .bind(record.verification_score)
        .bind(&record.verification_decision)
        .bind(&record.verification_reason)
        .bind(record.resource_id)
        .bind(record.suggestion_id)
        .bind(record.geocoding_success)
        .bind(record.processing_ms.map(|ms| ms as i64))
        .bind(record.processed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn records_for_job(&self, job_id: Uuid) -> Result<Vec<ImportRecord>> {
        let rows = sqlx::query("SELECT * FROM import_records WHERE job_id = $1 ORDER BY created_at")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(record_from_row).collect()
    }
}

fn checkpoint_json(job: &ImportJob) -> Result<Option<serde_json::Value>> {
    job.checkpoint
        .as_ref()
        .map(serde_json::to_value)
        .transpose()
        .map_err(Into::into)
}

fn job_from_row(row: PgRow) -> Result<ImportJob> {
    let checkpoint: Option<serde_json::Value> = row.try_get("checkpoint")?;
    let error_log: serde_json::Value = row.try_get("error_log")?;
    let status: String = row.try_get("status")?;
    Ok(ImportJob {
        id: row.try_get("id")?,
        source_name: row.try_get("source_name")?,
        status: JobStatus::from_str_loose(&status),
        total_records: row.try_get::<i64, _>("total_records")? as u32,
        processed_records: row.try_get::<i64, _>("processed_records")? as u32,
        successful_records: row.try_get::<i64, _>("successful_records")? as u32,
        failed_records: row.try_get::<i64, _>("failed_records")? as u32,
        flagged_records: row.try_get::<i64, _>("flagged_records")? as u32,
        rejected_records: row.try_get::<i64, _>("rejected_records")? as u32,
        skipped_records: row.try_get::<i64, _>("skipped_records")? as u32,
        checkpoint: checkpoint.map(serde_json::from_value).transpose()?,
        error_log: serde_json::from_value(error_log)?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
        completed_at: row.try_get("completed_at")?,
    })
}

fn record_from_row(row: PgRow) -> Result<ImportRecord> {
    let status: String = row.try_get("status")?;
    Ok(ImportRecord {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        source_id: row.try_get("source_id")?,
        raw_data: row.try_get("raw_data")?,
        normalized_data: row.try_get("normalized_data")?,
        status: RecordStatus::from_str_loose(&status),
        error_message: row.try_get("error_message")?,
        verification_score: row.try_get("verification_score")?,
        verification_decision: row.try_get("verification_decision")?,
        verification_reason: row.try_get("verification_reason")?,
        resource_id: row.try_get("resource_id")?,
        suggestion_id: row.try_get("suggestion_id")?,
        geocoding_success: row.try_get("geocoding_success")?,
        processing_ms: row
            .try_get::<Option<i64>, _>("processing_ms")?
            .map(|ms| ms as u64),
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

/// Idempotent schema creation for the import tables.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_jobs (
            id UUID PRIMARY KEY,
            source_name TEXT NOT NULL,
            status TEXT NOT NULL,
            total_records BIGINT NOT NULL,
            processed_records BIGINT NOT NULL,
            successful_records BIGINT NOT NULL,
            failed_records BIGINT NOT NULL,
            flagged_records BIGINT NOT NULL,
            rejected_records BIGINT NOT NULL,
            skipped_records BIGINT NOT NULL,
            checkpoint JSONB,
            error_log JSONB NOT NULL DEFAULT '[]'::jsonb,
            created_at TIMESTAMPTZ NOT NULL,
            started_at TIMESTAMPTZ,
            completed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_records (
            id UUID PRIMARY KEY,
            job_id UUID NOT NULL REFERENCES import_jobs(id),
            source_id TEXT,
            raw_data JSONB NOT NULL,
            normalized_data JSONB,
            status TEXT NOT NULL,
            error_message TEXT,
            verification_score REAL,
            verification_decision TEXT,
            verification_reason TEXT,
            resource_id UUID,
            suggestion_id UUID,
            geocoding_success BOOLEAN,
            processing_ms BIGINT,
            created_at TIMESTAMPTZ NOT NULL,
            processed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS import_records_job_idx ON import_records (job_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
