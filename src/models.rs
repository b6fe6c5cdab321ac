use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    PendingTranslation,
    /// Held by a running batch; reverts to pending if the claim lease lapses.
    TranslationInProgress,
    MachineTranslated,
    TranslationFailed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::PendingTranslation => "PENDING_TRANSLATION",
            JobStatus::TranslationInProgress => "TRANSLATION_IN_PROGRESS",
            JobStatus::MachineTranslated => "MACHINE_TRANSLATED",
            JobStatus::TranslationFailed => "TRANSLATION_FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for JobStatus {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "PENDING_TRANSLATION" => Ok(JobStatus::PendingTranslation),
            "TRANSLATION_IN_PROGRESS" => Ok(JobStatus::TranslationInProgress),
            "MACHINE_TRANSLATED" => Ok(JobStatus::MachineTranslated),
            "TRANSLATION_FAILED" => Ok(JobStatus::TranslationFailed),
            other => Err(format!("unknown translation job status: {}", other)),
        }
    }
}

/// One "translate this organization into this language" unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TranslationJob {
    pub id: String,
    pub organization_id: String,
    pub language_id: String,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub retry_count: i32,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub next_attempt_after: Option<DateTime<Utc>>,
}

impl TranslationJob {
    pub fn pending(
        id: impl Into<String>,
        organization_id: impl Into<String>,
        language_id: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            organization_id: organization_id.into(),
            language_id: language_id.into(),
            status: JobStatus::PendingTranslation,
            retry_count: 0,
            error_message: None,
            created_at,
            updated_at: created_at,
            claimed_at: None,
            next_attempt_after: None,
        }
    }
}

/// A job taken by the current batch, with everything needed to process it.
#[derive(Debug, Clone)]
pub struct ClaimedJob {
    pub job: TranslationJob,
    pub language_code: String,
    /// The organization record as a JSON object; fields are read by name.
    pub source: serde_json::Value,
}

/// Proof of a claim: the job id plus the `claimed_at` written when it was
/// taken. Writes are refused once the row carries a different claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobClaim {
    pub job_id: String,
    pub claimed_at: DateTime<Utc>,
}

impl ClaimedJob {
    pub fn claim(&self) -> JobClaim {
        JobClaim {
            job_id: self.job.id.clone(),
            claimed_at: self.job.claimed_at.unwrap_or(self.job.updated_at),
        }
    }

    /// Source text for `field`, or `None` when absent, non-string or blank.
    pub fn source_text(&self, field: &str) -> Option<&str> {
        self.source
            .get(field)
            .and_then(serde_json::Value::as_str)
            .filter(|text| !text.trim().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatedField {
    pub field_name: String,
    pub text: String,
}

/// Per-field translation, unique on (organization, language, field).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct TranslationFieldRecord {
    pub organization_id: String,
    pub language_id: String,
    pub field_name: String,
    pub translated_text: String,
    #[sqlx(try_from = "String")]
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total: usize,
    /// Claimed but not finished by this run: handed back when the run ran out
    /// of time, or left to another run that reclaimed it.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub deferred: usize,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}
