use super::{lease_cutoff, JobStore};
use crate::error::StoreError;
use crate::models::{
    ClaimedJob, JobClaim, JobStatus, TranslatedField, TranslationFieldRecord, TranslationJob,
};
use crate::retry::RetryDecision;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

type FieldKey = (String, String, String);

#[derive(Default)]
struct State {
    jobs: Vec<TranslationJob>,
    organizations: HashMap<String, serde_json::Value>,
    languages: HashMap<String, String>,
    fields: BTreeMap<FieldKey, TranslationFieldRecord>,
    failing_commits: usize,
}

/// In-process job store with the same claim and commit semantics as
/// `PgJobStore`.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<State>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_language(&self, language_id: &str, code: &str) {
        self.state()
            .languages
            .insert(language_id.to_string(), code.to_string());
    }

    pub fn add_organization(&self, organization_id: &str, record: serde_json::Value) {
        self.state()
            .organizations
            .insert(organization_id.to_string(), record);
    }

    pub fn insert_job(&self, job: TranslationJob) {
        let mut state = self.state();
        state.jobs.retain(|existing| existing.id != job.id);
        state.jobs.push(job);
    }

    pub fn job(&self, job_id: &str) -> Option<TranslationJob> {
        self.state().jobs.iter().find(|job| job.id == job_id).cloned()
    }

    pub fn jobs(&self) -> Vec<TranslationJob> {
        self.state().jobs.clone()
    }

    pub fn field(
        &self,
        organization_id: &str,
        language_id: &str,
        field_name: &str,
    ) -> Option<TranslationFieldRecord> {
        let key = (
            organization_id.to_string(),
            language_id.to_string(),
            field_name.to_string(),
        );
        self.state().fields.get(&key).cloned()
    }

    pub fn field_records(&self) -> Vec<TranslationFieldRecord> {
        self.state().fields.values().cloned().collect()
    }

    /// Make the next `count` calls to `complete_job` fail before writing.
    pub fn fail_next_commits(&self, count: usize) {
        self.state().failing_commits = count;
    }
}

impl State {
    /// Index of the job if `claim` still holds it.
    fn held(&self, claim: &JobClaim) -> Result<usize, StoreError> {
        self.jobs
            .iter()
            .position(|job| {
                job.id == claim.job_id
                    && job.status == JobStatus::TranslationInProgress
                    && job.claimed_at == Some(claim.claimed_at)
            })
            .ok_or_else(|| StoreError::NotClaimed(claim.job_id.clone()))
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<ClaimedJob>, StoreError> {
        let cutoff = lease_cutoff(now, lease);
        let mut state = self.state();

        let mut eligible: Vec<usize> = state
            .jobs
            .iter()
            .enumerate()
            .filter(|(_, job)| match job.status {
                JobStatus::PendingTranslation => {
                    job.next_attempt_after.map_or(true, |after| after <= now)
                }
                JobStatus::TranslationInProgress => {
                    job.claimed_at.map_or(true, |claimed| claimed < cutoff)
                }
                _ => false,
            })
            .map(|(index, _)| index)
            .collect();
        eligible.sort_by_key(|&index| state.jobs[index].created_at);
        eligible.truncate(limit);

        let mut claimed = Vec::with_capacity(eligible.len());
        for index in eligible {
            let job = &mut state.jobs[index];
            job.status = JobStatus::TranslationInProgress;
            job.claimed_at = Some(now);
            job.updated_at = now;
            let job = job.clone();

            claimed.push(ClaimedJob {
                language_code: state
                    .languages
                    .get(&job.language_id)
                    .cloned()
                    .unwrap_or_default(),
                source: state
                    .organizations
                    .get(&job.organization_id)
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
                job,
            });
        }

        Ok(claimed)
    }

    async fn complete_job(
        &self,
        claim: &JobClaim,
        fields: &[TranslatedField],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let index = state.held(claim)?;

        if state.failing_commits > 0 {
            state.failing_commits -= 1;
            return Err(StoreError::Injected(format!(
                "simulated commit failure for job {}",
                claim.job_id
            )));
        }

        let organization_id = state.jobs[index].organization_id.clone();
        let language_id = state.jobs[index].language_id.clone();

        for field in fields {
            let key = (
                organization_id.clone(),
                language_id.clone(),
                field.field_name.clone(),
            );
            state
                .fields
                .entry(key)
                .and_modify(|record| {
                    record.translated_text = field.text.clone();
                    record.status = JobStatus::MachineTranslated;
                    record.updated_at = now;
                })
                .or_insert_with(|| TranslationFieldRecord {
                    organization_id: organization_id.clone(),
                    language_id: language_id.clone(),
                    field_name: field.field_name.clone(),
                    translated_text: field.text.clone(),
                    status: JobStatus::MachineTranslated,
                    created_at: now,
                    updated_at: now,
                });
        }

        let job = &mut state.jobs[index];
        job.status = JobStatus::MachineTranslated;
        job.error_message = None;
        job.claimed_at = None;
        job.next_attempt_after = None;
        job.updated_at = now;

        Ok(())
    }

    async fn record_failure(
        &self,
        claim: &JobClaim,
        decision: &RetryDecision,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        let index = state.held(claim)?;
        let job = &mut state.jobs[index];

        job.retry_count = decision.retry_count;
        job.status = decision.status;
        job.error_message = Some(message.to_string());
        job.next_attempt_after = decision.next_attempt_after;
        job.claimed_at = None;
        job.updated_at = now;

        Ok(())
    }

    async fn release_job(&self, claim: &JobClaim, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state();
        if let Ok(index) = state.held(claim) {
            let job = &mut state.jobs[index];
            job.status = JobStatus::PendingTranslation;
            job.claimed_at = None;
            job.updated_at = now;
        }
        Ok(())
    }
}
