//! Durable storage for translation jobs and their per-field translations.
//!
//! - `postgres`: production store on sqlx/PostgreSQL
//! - `memory`: in-process store with the same semantics, for tests and local runs
//!
//! Claiming is an atomic conditional update: a job moves from
//! `PENDING_TRANSLATION` to `TRANSLATION_IN_PROGRESS` only if nobody else took
//! it first, so overlapping batch runs never process the same job twice.
//! Every later write carries the `JobClaim` it was given and is refused once a
//! newer run has reclaimed the job after the lease ran out.

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

use crate::error::StoreError;
use crate::models::{ClaimedJob, JobClaim, TranslatedField};
use crate::retry::RetryDecision;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Claim up to `limit` of the oldest pending jobs eligible at `now`.
    ///
    /// In-progress jobs whose claim is older than `lease` belong to a run that
    /// died mid-batch and are claimed again.
    async fn claim_pending(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> Result<Vec<ClaimedJob>, StoreError>;

    /// Upsert `fields` and mark the job `MACHINE_TRANSLATED`, all or nothing.
    ///
    /// Fails with `NotClaimed` when `claim` no longer holds the job.
    async fn complete_job(
        &self,
        claim: &JobClaim,
        fields: &[TranslatedField],
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Fails with `NotClaimed` when `claim` no longer holds the job.
    async fn record_failure(
        &self,
        claim: &JobClaim,
        decision: &RetryDecision,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    /// Hand a claimed job back untouched (no retry is consumed). A lost claim
    /// is left alone.
    async fn release_job(&self, claim: &JobClaim, now: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Oldest moment a still-valid claim could have been made.
pub(crate) fn lease_cutoff(now: DateTime<Utc>, lease: Duration) -> DateTime<Utc> {
    now - chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::days(365))
}
