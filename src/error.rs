//! Error types for the translation pipeline.
//!
//! Per-job errors (`TranslateError`, `StoreError` wrapped in `JobError`) are
//! recovered by the batch processor and end up on the job's `error_message`.
//! Only `BatchError` reaches the entry point's caller.

use thiserror::Error;

/// Failure to obtain a usable pipeline configuration from the MT provider.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("translation provider credentials not configured: {0} is missing")]
    MissingCredentials(&'static str),

    #[error("pipeline discovery request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("pipeline discovery failed ({status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("pipeline discovery returned an unparseable body ({source}): {body}")]
    InvalidBody {
        #[source]
        source: serde_json::Error,
        body: String,
    },

    #[error("pipeline discovery response is missing {missing}; parsed {partial}")]
    Incomplete {
        missing: &'static str,
        partial: String,
    },
}

/// Failure to translate a single string.
#[derive(Debug, Error)]
pub enum TranslateError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("translation request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("translation failed ({status}): {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("translation response has no translated text at pipelineResponse[0].output[0].target: {raw}")]
    MissingOutput { raw: String },
}

impl TranslateError {
    /// True when no job in the batch can succeed, so the batch should stop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TranslateError::Config(ConfigError::MissingCredentials(_)))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("job {0} is not claimed by this run")]
    NotClaimed(String),

    #[error("{0}")]
    Injected(String),
}

/// Anything that fails one job's attempt and counts against its retries.
#[derive(Debug, Error)]
pub enum JobError {
    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error("failed to persist translation: {0}")]
    Persistence(#[from] StoreError),

    #[error("no language code found for language {0}")]
    UnknownLanguage(String),
}

/// Errors that abort a whole batch invocation.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("configuration error: {0}")]
    Configuration(#[source] TranslateError),

    #[error("failed to claim pending jobs: {0}")]
    Claim(#[source] StoreError),
}
