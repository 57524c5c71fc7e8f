//! Publication seam: the orchestrator hands a batch of normalized
//! resources to a `Publisher` and maps the per-record results back by
//! position.
//!
//! `PipelinePublisher` is the in-process wiring: duplicate check, then the
//! verification agent, then create/flag/reject against the resource sink,
//! logging the result and draining metered costs. `HttpPublisher` speaks
//! the same contract to a remote endpoint.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use openaid_common::{CostTracker, NormalizedResource, VerificationLevel};
use openaid_verify::agent::VerificationAgent;
use openaid_verify::flush::CostLogQueue;
use openaid_verify::log::{VerificationLog, VerificationLogEntry};
use openaid_verify::types::{Decision, VerificationType};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::job::RecordStatus;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct SubmissionRequest {
    pub resources: Vec<NormalizedResource>,
    pub submitter: String,
    pub verification_level: VerificationLevel,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmissionStats {
    pub total: u32,
    pub submitted: u32,
    pub auto_approved: u32,
    pub flagged: u32,
    pub rejected: u32,
    pub skipped_duplicates: u32,
    pub errors: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResult {
    pub source_id: String,
    pub status: RecordStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_score: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `results[i]` corresponds to `resources[i]` of the request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionResponse {
    pub success: bool,
    pub stats: SubmissionStats,
    pub results: Vec<SubmissionResult>,
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Submit one batch. Err is fatal to the calling job.
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionResponse>;
}

// ---------------------------------------------------------------------------
// ResourceSink: where approved/flagged records land
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ResourceSink: Send + Sync {
    /// Existing resource with this source_id, if any.
    async fn find_by_source_id(&self, source_id: &str) -> Result<Option<Uuid>>;

    async fn create_resource(
        &self,
        resource: &NormalizedResource,
        level: VerificationLevel,
        score: f32,
    ) -> Result<Uuid>;

    async fn create_suggestion(
        &self,
        resource: &NormalizedResource,
        flag_reason: &str,
        score: f32,
    ) -> Result<Uuid>;
}

/// Postgres-backed sink.
pub struct PgResourceSink {
    pool: sqlx::PgPool,
}

impl PgResourceSink {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceSink for PgResourceSink {
    async fn find_by_source_id(&self, source_id: &str) -> Result<Option<Uuid>> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM resources WHERE source_id = $1",
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn create_resource(
        &self,
        resource: &NormalizedResource,
        level: VerificationLevel,
        score: f32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO resources (id, source_id, payload, verification_level, verification_score, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(id)
        .bind(&resource.source.source_id)
        .bind(serde_json::to_value(resource)?)
        .bind(level.to_string())
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }

    async fn create_suggestion(
        &self,
        resource: &NormalizedResource,
        flag_reason: &str,
        score: f32,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO suggestions (id, source_id, payload, flag_reason, verification_score, created_at)
            VALUES ($1, $2, $3, $4, $5, NOW())
            "#,
        )
        .bind(id)
        .bind(&resource.source.source_id)
        .bind(serde_json::to_value(resource)?)
        .bind(flag_reason)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(id)
    }
}

/// Idempotent schema creation for the sink tables.
pub async fn migrate_sink(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            id UUID PRIMARY KEY,
            source_id TEXT NOT NULL UNIQUE,
            payload JSONB NOT NULL,
            verification_level TEXT NOT NULL,
            verification_score REAL NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS suggestions (
            id UUID PRIMARY KEY,
            source_id TEXT NOT NULL,
            payload JSONB NOT NULL,
            flag_reason TEXT NOT NULL,
            verification_score REAL NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// PipelinePublisher
// ---------------------------------------------------------------------------

pub struct PipelinePublisher {
    agent: VerificationAgent,
    sink: Arc<dyn ResourceSink>,
    log: Arc<dyn VerificationLog>,
    costs: Arc<CostTracker>,
    cost_queue: Option<CostLogQueue>,
}

impl PipelinePublisher {
    pub fn new(
        agent: VerificationAgent,
        sink: Arc<dyn ResourceSink>,
        log: Arc<dyn VerificationLog>,
        costs: Arc<CostTracker>,
    ) -> Self {
        Self {
            agent,
            sink,
            log,
            costs,
            cost_queue: None,
        }
    }

    /// Route drained cost entries through a background flusher instead of
    /// writing them inline on the verification path.
    pub fn with_cost_queue(mut self, queue: CostLogQueue) -> Self {
        self.cost_queue = Some(queue);
        self
    }

    async fn publish_one(
        &self,
        resource: &NormalizedResource,
        level: VerificationLevel,
        stats: &mut SubmissionStats,
    ) -> SubmissionResult {
        let source_id = resource.source.source_id.clone();

        // Re-imports are idempotent by source identity.
        match self.sink.find_by_source_id(&source_id).await {
            Ok(Some(existing)) => {
                stats.skipped_duplicates += 1;
                return SubmissionResult {
                    source_id,
                    status: RecordStatus::Skipped,
                    resource_id: Some(existing),
                    suggestion_id: None,
                    verification_score: None,
                    decision_reason: Some("duplicate of existing resource".to_string()),
                    error: None,
                };
            }
            Ok(None) => {}
            Err(e) => {
                stats.errors += 1;
                return error_result(source_id, format!("duplicate check failed: {e}"));
            }
        }

        let verification = self.agent.verify(resource, VerificationType::Initial).await;
        stats.submitted += 1;

        let (status, resource_id, suggestion_id) = match verification.decision {
            Decision::AutoApprove => {
                match self
                    .sink
                    .create_resource(resource, level, verification.overall_score)
                    .await
                {
                    Ok(id) => {
                        stats.auto_approved += 1;
                        (RecordStatus::Approved, Some(id), None)
                    }
                    Err(e) => {
                        stats.errors += 1;
                        return error_result(source_id, format!("resource create failed: {e}"));
                    }
                }
            }
            Decision::FlagForHuman => {
                match self
                    .sink
                    .create_suggestion(
                        resource,
                        &verification.decision_reason,
                        verification.overall_score,
                    )
                    .await
                {
                    Ok(id) => {
                        stats.flagged += 1;
                        (RecordStatus::Flagged, None, Some(id))
                    }
                    Err(e) => {
                        stats.errors += 1;
                        return error_result(source_id, format!("suggestion create failed: {e}"));
                    }
                }
            }
            Decision::AutoReject => {
                stats.rejected += 1;
                (RecordStatus::Rejected, None, None)
            }
        };

        // Persist the run verbatim, then the costs it accrued. Log failures
        // lose telemetry, not the record.
        let log_entry = VerificationLogEntry {
            resource_id,
            suggestion_id,
            run_type: VerificationType::Initial,
            result: verification.clone(),
        };
        if let Err(e) = self.log.record_verification(&log_entry).await {
            warn!(source_id = source_id.as_str(), error = %e, "Verification log write failed");
        }
        let drained = self.costs.drain();
        if !drained.is_empty() {
            let outcome = match &self.cost_queue {
                Some(queue) => queue.enqueue(drained).await,
                None => self.log.record_costs(&drained).await,
            };
            if let Err(e) = outcome {
                warn!(error = %e, "Cost log write failed");
            }
        }

        SubmissionResult {
            source_id,
            status,
            resource_id,
            suggestion_id,
            verification_score: Some(verification.overall_score),
            decision_reason: Some(verification.decision_reason),
            error: None,
        }
    }
}

fn error_result(source_id: String, error: String) -> SubmissionResult {
    SubmissionResult {
        source_id,
        status: RecordStatus::Error,
        resource_id: None,
        suggestion_id: None,
        verification_score: None,
        decision_reason: None,
        error: Some(error),
    }
}

#[async_trait]
impl Publisher for PipelinePublisher {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionResponse> {
        let mut stats = SubmissionStats {
            total: request.resources.len() as u32,
            ..Default::default()
        };
        let mut results = Vec::with_capacity(request.resources.len());

        for resource in &request.resources {
            results.push(
                self.publish_one(resource, request.verification_level, &mut stats)
                    .await,
            );
        }

        info!(
            submitter = request.submitter.as_str(),
            total = stats.total,
            approved = stats.auto_approved,
            flagged = stats.flagged,
            rejected = stats.rejected,
            skipped = stats.skipped_duplicates,
            errors = stats.errors,
            "Batch published"
        );

        Ok(SubmissionResponse {
            success: true,
            stats,
            results,
        })
    }
}

// ---------------------------------------------------------------------------
// HttpPublisher
// ---------------------------------------------------------------------------

const SUBMIT_TIMEOUT: Duration = Duration::from_secs(120);

/// Posts the batch to a remote publication endpoint speaking the same
/// request/response contract.
pub struct HttpPublisher {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpPublisher {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key,
        }
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    async fn submit(&self, request: &SubmissionRequest) -> Result<SubmissionResponse> {
        let mut req = self
            .http
            .post(&self.endpoint)
            .timeout(SUBMIT_TIMEOUT)
            .json(request);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req.send().await?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "publication endpoint returned status {}",
                response.status()
            ));
        }

        let body: SubmissionResponse = response.json().await?;
        if body.results.len() != request.resources.len() {
            return Err(anyhow!(
                "publication endpoint returned {} results for {} resources",
                body.results.len(),
                request.resources.len()
            ));
        }
        Ok(body)
    }
}
