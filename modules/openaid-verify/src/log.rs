//! Verification and cost logs.
//!
//! Every verification run is persisted verbatim, keyed by the resource or
//! suggestion it produced (both nullable: rejected candidates still get a
//! log row). Metered LLM calls land in a separate cost log.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use openaid_common::CostEntry;
use sqlx::PgPool;
use uuid::Uuid;

use crate::types::{VerificationResult, VerificationType};

/// One persisted verification run.
#[derive(Debug, Clone)]
pub struct VerificationLogEntry {
    pub resource_id: Option<Uuid>,
    pub suggestion_id: Option<Uuid>,
    pub run_type: VerificationType,
    pub result: VerificationResult,
}

#[async_trait]
pub trait VerificationLog: Send + Sync {
    async fn record_verification(&self, entry: &VerificationLogEntry) -> Result<Uuid>;

    async fn record_costs(&self, entries: &[CostEntry]) -> Result<()>;
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

pub struct PgVerificationLog {
    pool: PgPool,
}

impl PgVerificationLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VerificationLog for PgVerificationLog {
    async fn record_verification(&self, entry: &VerificationLogEntry) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let result_json = serde_json::to_value(&entry.result)?;

        sqlx::query(
            r#"
            INSERT INTO verification_log
                (id, resource_id, suggestion_id, run_type, result,
                 score, decision, cost_usd, duration_ms, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(id)
        .bind(entry.resource_id)
        .bind(entry.suggestion_id)
        .bind(entry.run_type.to_string())
        .bind(&result_json)
        .bind(entry.result.overall_score)
        .bind(entry.result.decision.to_string())
        .bind(entry.result.cost_usd)
        .bind(entry.result.duration_ms as i64)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(id)
    }

    async fn record_costs(&self, entries: &[CostEntry]) -> Result<()> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO cost_log
                    (id, provider, model, purpose, input_tokens, output_tokens, cost_usd, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(&entry.provider)
            .bind(&entry.model)
            .bind(&entry.purpose)
            .bind(entry.input_tokens as i64)
            .bind(entry.output_tokens as i64)
            .bind(entry.cost_usd)
            .bind(entry.at)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

/// Create the log tables if they do not exist. Idempotent.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS verification_log (
            id UUID PRIMARY KEY,
            resource_id UUID,
            suggestion_id UUID,
            run_type TEXT NOT NULL,
            result JSONB NOT NULL,
            score REAL NOT NULL,
            decision TEXT NOT NULL,
            cost_usd DOUBLE PRECISION NOT NULL,
            duration_ms BIGINT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cost_log (
            id UUID PRIMARY KEY,
            provider TEXT NOT NULL,
            model TEXT NOT NULL,
            purpose TEXT NOT NULL,
            input_tokens BIGINT NOT NULL,
            output_tokens BIGINT NOT NULL,
            cost_usd DOUBLE PRECISION NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

// ---------------------------------------------------------------------------
// In-memory (tests)
// ---------------------------------------------------------------------------

/// Keeps everything in a mutex for inspection from tests.
#[derive(Default)]
pub struct MemoryVerificationLog {
    verifications: std::sync::Mutex<Vec<(Uuid, DateTime<Utc>, VerificationLogEntry)>>,
    costs: std::sync::Mutex<Vec<CostEntry>>,
}

impl MemoryVerificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn verification_count(&self) -> usize {
        self.verifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn cost_entries(&self) -> Vec<CostEntry> {
        self.costs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl VerificationLog for MemoryVerificationLog {
    async fn record_verification(&self, entry: &VerificationLogEntry) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.verifications
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Utc::now(), entry.clone()));
        Ok(id)
    }

    async fn record_costs(&self, entries: &[CostEntry]) -> Result<()> {
        self.costs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(entries.iter().cloned());
        Ok(())
    }
}
