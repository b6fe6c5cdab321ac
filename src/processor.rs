//! Batch processing of pending translation jobs.
//!
//! One `run_batch` call claims up to `batch_size` of the oldest pending jobs
//! and drives each one to a terminal state for this run:
//!
//! - target language == source language: marked translated, no provider call
//! - every present translatable field translated: fields and job status are
//!   committed in one transaction
//! - any translation or persistence failure: retry count bumped, job goes back
//!   to pending (or to failed once the attempt limit is reached)
//!
//! A job whose claim was taken over by a newer run (after our lease ran out)
//! is left to that run and counted as deferred.
//!
//! A failing job never stops the rest of the batch. The only errors returned
//! to the caller are the ones no job could survive: missing provider
//! credentials and a failed claim.

use crate::clock::Clock;
use crate::config::Config;
use crate::error::{BatchError, JobError, StoreError, TranslateError};
use crate::models::{BatchSummary, ClaimedJob, JobClaim, JobStatus, TranslatedField};
use crate::retry::RetryPolicy;
use crate::store::JobStore;
use crate::translation::Translator;
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub batch_size: usize,
    /// Organization fields to translate, by name
    pub fields: Vec<String>,
    pub retry: RetryPolicy,
    pub claim_lease: Duration,
    /// Jobs not started within this window are handed back for the next run
    pub time_budget: Duration,
    pub workers: usize,
}

impl ProcessorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            batch_size: config.batch_size,
            fields: config.translatable_fields.clone(),
            retry: RetryPolicy::new(config.max_attempts)
                .with_backoff(config.retry_backoff)
                .with_max_delay(config.retry_max_delay)
                .with_backoff_multiplier(config.retry_backoff_multiplier),
            claim_lease: config.claim_lease,
            time_budget: config.batch_time_budget,
            workers: config.workers,
        }
    }
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            batch_size: 20,
            fields: vec!["name".to_string()],
            retry: RetryPolicy::default(),
            claim_lease: Duration::from_secs(600),
            time_budget: Duration::from_secs(50),
            workers: 1,
        }
    }
}

#[derive(Debug)]
enum JobOutcome {
    Translated,
    Skipped,
    Failed,
    Deferred,
    /// Another run reclaimed the job; nothing was written
    Superseded,
    /// Stopped by a configuration error; the job was released untouched
    Aborted(TranslateError),
}

pub struct JobProcessor {
    store: Arc<dyn JobStore>,
    translator: Arc<dyn Translator>,
    clock: Arc<dyn Clock>,
    settings: ProcessorSettings,
}

impl JobProcessor {
    pub fn new(
        store: Arc<dyn JobStore>,
        translator: Arc<dyn Translator>,
        clock: Arc<dyn Clock>,
        settings: ProcessorSettings,
    ) -> Self {
        Self {
            store,
            translator,
            clock,
            settings,
        }
    }

    pub async fn run_batch(&self) -> Result<BatchSummary, BatchError> {
        let started = Instant::now();

        let jobs = self
            .store
            .claim_pending(
                self.settings.batch_size,
                self.clock.now(),
                self.settings.claim_lease,
            )
            .await
            .map_err(BatchError::Claim)?;

        let mut summary = BatchSummary {
            total: jobs.len(),
            ..BatchSummary::default()
        };

        if jobs.is_empty() {
            debug!("No pending translation jobs");
            return Ok(summary);
        }

        info!("Claimed {} translation jobs", jobs.len());

        let aborted = AtomicBool::new(false);
        let outcomes: Vec<JobOutcome> = stream::iter(jobs)
            .map(|job| self.process_claimed(job, started, &aborted))
            .buffer_unordered(self.settings.workers.max(1))
            .collect()
            .await;

        let mut fatal = None;
        for outcome in outcomes {
            match outcome {
                JobOutcome::Translated => summary.processed += 1,
                JobOutcome::Skipped => summary.skipped += 1,
                JobOutcome::Failed => summary.failed += 1,
                JobOutcome::Deferred | JobOutcome::Superseded => summary.deferred += 1,
                JobOutcome::Aborted(err) => {
                    if fatal.is_none() {
                        fatal = Some(err);
                    }
                }
            }
        }

        if let Some(err) = fatal {
            error!("Translation batch aborted: {}", err);
            return Err(BatchError::Configuration(err));
        }

        info!(
            "✓ Translation batch done in {:?}: {} processed, {} failed, {} skipped, {} deferred of {}",
            started.elapsed(),
            summary.processed,
            summary.failed,
            summary.skipped,
            summary.deferred,
            summary.total
        );

        Ok(summary)
    }

    /// Process one claimed job unless the batch is already out of time or
    /// has hit a fatal error, in which case the job is handed back.
    async fn process_claimed(
        &self,
        claimed: ClaimedJob,
        started: Instant,
        aborted: &AtomicBool,
    ) -> JobOutcome {
        let claim = claimed.claim();

        if aborted.load(Ordering::SeqCst) {
            self.release(&claim).await;
            return JobOutcome::Deferred;
        }

        if started.elapsed() >= self.settings.time_budget {
            warn!("Batch time budget spent, deferring job {}", claim.job_id);
            self.release(&claim).await;
            return JobOutcome::Deferred;
        }

        match self.process_job(&claimed, &claim).await {
            Ok(outcome) => outcome,
            Err(JobError::Translate(err)) if err.is_fatal() => {
                aborted.store(true, Ordering::SeqCst);
                self.release(&claim).await;
                JobOutcome::Aborted(err)
            }
            Err(JobError::Persistence(StoreError::NotClaimed(_))) => {
                warn!(
                    "Job {} was reclaimed by another run, dropping this attempt",
                    claim.job_id
                );
                JobOutcome::Superseded
            }
            Err(err) => self.record_failure(&claimed, &claim, &err).await,
        }
    }

    async fn process_job(
        &self,
        claimed: &ClaimedJob,
        claim: &JobClaim,
    ) -> Result<JobOutcome, JobError> {
        let job = &claimed.job;
        let target = claimed.language_code.as_str();
        if target.is_empty() {
            return Err(JobError::UnknownLanguage(job.language_id.clone()));
        }

        if target.eq_ignore_ascii_case(self.translator.source_language()) {
            debug!("Job {} targets the source language, nothing to translate", job.id);
            self.store.complete_job(claim, &[], self.clock.now()).await?;
            return Ok(JobOutcome::Skipped);
        }

        let mut translated = Vec::with_capacity(self.settings.fields.len());
        for field in &self.settings.fields {
            let Some(text) = claimed.source_text(field) else {
                debug!("Job {}: no source value for '{}', skipping field", job.id, field);
                continue;
            };

            let text = self.translator.translate(text, target).await?;
            translated.push(TranslatedField {
                field_name: field.clone(),
                text,
            });
        }

        self.store
            .complete_job(claim, &translated, self.clock.now())
            .await?;

        info!(
            "Job {} translated {} field(s) into {}",
            job.id,
            translated.len(),
            target
        );
        Ok(JobOutcome::Translated)
    }

    async fn record_failure(
        &self,
        claimed: &ClaimedJob,
        claim: &JobClaim,
        err: &JobError,
    ) -> JobOutcome {
        let job = &claimed.job;
        let now = self.clock.now();
        let decision = self.settings.retry.on_failure(job.retry_count, now);
        let message = err.to_string();

        warn!(
            "Job {} ({} -> {}) failed on attempt {}: {}",
            job.id, job.organization_id, claimed.language_code, decision.retry_count, message
        );
        if decision.status == JobStatus::TranslationFailed {
            warn!(
                "Job {} marked {} after {} attempts",
                job.id, decision.status, decision.retry_count
            );
        }

        match self
            .store
            .record_failure(claim, &decision, &message, now)
            .await
        {
            Ok(()) => JobOutcome::Failed,
            Err(StoreError::NotClaimed(_)) => {
                warn!("Job {} was reclaimed by another run, failure not recorded", job.id);
                JobOutcome::Superseded
            }
            Err(e) => {
                // The claim lease will hand the job to a later run
                error!("Failed to record failure for job {}: {}", job.id, e);
                JobOutcome::Failed
            }
        }
    }

    async fn release(&self, claim: &JobClaim) {
        if let Err(e) = self.store.release_job(claim, self.clock.now()).await {
            error!("Failed to release job {}: {}", claim.job_id, e);
        }
    }
}
