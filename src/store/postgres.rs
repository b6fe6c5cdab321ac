use super::{lease_cutoff, JobStore};
use crate::error::StoreError;
use crate::models::{
    ClaimedJob, JobClaim, JobStatus, TranslatedField, TranslationFieldRecord, TranslationJob,
};
use crate::retry::RetryDecision;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Job store backed by PostgreSQL.
///
/// `organizations` and `languages` belong to the registration platform; this
/// store only reads them. It owns `translation_jobs` (rows are created by the
/// platform, mutated here) and `organization_translation_fields`.
#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

#[derive(sqlx::FromRow)]
struct ClaimedRow {
    #[sqlx(flatten)]
    job: TranslationJob,
    language_code: Option<String>,
    source: Option<serde_json::Value>,
}

const JOB_COLUMNS: &str = "id, organization_id, language_id, status, retry_count, error_message, \
     created_at, updated_at, claimed_at, next_attempt_after";

impl PgJobStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await
            .context("Failed to connect to database")?;

        Ok(Self { pool })
    }

    /// Create the pipeline-owned tables and columns if they are missing.
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS translation_jobs (
                id TEXT PRIMARY KEY,
                organization_id TEXT NOT NULL,
                language_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'PENDING_TRANSLATION',
                retry_count INTEGER NOT NULL DEFAULT 0,
                error_message TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create translation_jobs table")?;

        // Columns added after the original table shipped
        for statement in [
            "ALTER TABLE translation_jobs ADD COLUMN IF NOT EXISTS claimed_at TIMESTAMPTZ",
            "ALTER TABLE translation_jobs ADD COLUMN IF NOT EXISTS next_attempt_after TIMESTAMPTZ",
            "CREATE INDEX IF NOT EXISTS translation_jobs_status_created_at_idx
                ON translation_jobs (status, created_at)",
        ] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Failed to migrate translation_jobs: {}", statement))?;
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS organization_translation_fields (
                organization_id TEXT NOT NULL,
                language_id TEXT NOT NULL,
                field_name TEXT NOT NULL,
                translated_text TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (organization_id, language_id, field_name)
            )",
        )
        .execute(&self.pool)
        .await
        .context("Failed to create organization_translation_fields table")?;

        info!("✓ Translation schema ready");
        Ok(())
    }

    pub async fn fetch_job(&self, job_id: &str) -> Result<Option<TranslationJob>, StoreError> {
        let job = sqlx::query_as::<_, TranslationJob>(&format!(
            "SELECT {} FROM translation_jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(job)
    }

    pub async fn fields_for(
        &self,
        organization_id: &str,
        language_id: &str,
    ) -> Result<Vec<TranslationFieldRecord>, StoreError> {
        let fields = sqlx::query_as::<_, TranslationFieldRecord>(
            "SELECT organization_id, language_id, field_name, translated_text, status, created_at, updated_at
             FROM organization_translation_fields
             WHERE organization_id = $1 AND language_id = $2
             ORDER BY field_name",
        )
        .bind(organization_id)
        .bind(language_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(fields)
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<ClaimedJob>, StoreError> {
        // SKIP LOCKED lets a concurrent run claim a disjoint set instead of waiting
        let sql = format!(
            "WITH claimed AS (
                UPDATE translation_jobs
                SET status = 'TRANSLATION_IN_PROGRESS', claimed_at = $2, updated_at = $2
                WHERE id IN (
                    SELECT id FROM translation_jobs
                    WHERE (status = 'PENDING_TRANSLATION'
                           AND (next_attempt_after IS NULL OR next_attempt_after <= $2))
                       OR (status = 'TRANSLATION_IN_PROGRESS'
                           AND (claimed_at IS NULL OR claimed_at < $3))
                    ORDER BY created_at ASC
                    LIMIT $1
                    FOR UPDATE SKIP LOCKED
                )
                RETURNING {}
            )
            SELECT c.*, l.code AS language_code, to_jsonb(o) AS source
            FROM claimed c
            LEFT JOIN languages l ON l.id = c.language_id
            LEFT JOIN organizations o ON o.id = c.organization_id
            ORDER BY c.created_at ASC",
            JOB_COLUMNS
        );

        let rows = sqlx::query_as::<_, ClaimedRow>(&sql)
            .bind(limit as i64)
            .bind(now)
            .bind(lease_cutoff(now, lease))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ClaimedJob {
                job: row.job,
                language_code: row.language_code.unwrap_or_default(),
                source: row.source.unwrap_or(serde_json::Value::Null),
            })
            .collect())
    }

    async fn complete_job(
        &self,
        claim: &JobClaim,
        fields: &[TranslatedField],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // Lock the row and make sure our claim still stands
        let (organization_id, language_id) = sqlx::query_as::<_, (String, String)>(
            "SELECT organization_id, language_id FROM translation_jobs
             WHERE id = $1 AND status = 'TRANSLATION_IN_PROGRESS' AND claimed_at = $2
             FOR UPDATE",
        )
        .bind(&claim.job_id)
        .bind(claim.claimed_at)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| StoreError::NotClaimed(claim.job_id.clone()))?;

        for field in fields {
            sqlx::query(
                "INSERT INTO organization_translation_fields
                    (organization_id, language_id, field_name, translated_text, status, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $6)
                 ON CONFLICT (organization_id, language_id, field_name)
                 DO UPDATE SET translated_text = EXCLUDED.translated_text,
                               status = EXCLUDED.status,
                               updated_at = EXCLUDED.updated_at",
            )
            .bind(&organization_id)
            .bind(&language_id)
            .bind(&field.field_name)
            .bind(&field.text)
            .bind(JobStatus::MachineTranslated.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "UPDATE translation_jobs
             SET status = $2, error_message = NULL, claimed_at = NULL,
                 next_attempt_after = NULL, updated_at = $3
             WHERE id = $1",
        )
        .bind(&claim.job_id)
        .bind(JobStatus::MachineTranslated.as_str())
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn record_failure(
        &self,
        claim: &JobClaim,
        decision: &RetryDecision,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE translation_jobs
             SET retry_count = $2, status = $3, error_message = $4,
                 next_attempt_after = $5, claimed_at = NULL, updated_at = $6
             WHERE id = $1 AND status = 'TRANSLATION_IN_PROGRESS' AND claimed_at = $7",
        )
        .bind(&claim.job_id)
        .bind(decision.retry_count)
        .bind(decision.status.as_str())
        .bind(message)
        .bind(decision.next_attempt_after)
        .bind(now)
        .bind(claim.claimed_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotClaimed(claim.job_id.clone()));
        }
        Ok(())
    }

    async fn release_job(&self, claim: &JobClaim, now: DateTime<Utc>) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE translation_jobs
             SET status = 'PENDING_TRANSLATION', claimed_at = NULL, updated_at = $2
             WHERE id = $1 AND status = 'TRANSLATION_IN_PROGRESS' AND claimed_at = $3",
        )
        .bind(&claim.job_id)
        .bind(now)
        .bind(claim.claimed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
