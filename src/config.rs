use anyhow::{Context, Result};
use std::time::Duration;

pub const DEFAULT_DISCOVERY_URL: &str =
    "https://meity-auth.ulcacontrib.org/ulca/apis/v0/model/getModelsPipeline";
pub const DEFAULT_PIPELINE_ID: &str = "64392f96daac500b55c543cd";

#[derive(Debug, Clone)]
pub struct Config {
    // Database
    pub database_url: String,

    // Entry point auth
    pub cron_secret: Option<String>,

    // MT provider
    pub provider_user_id: Option<String>,
    pub provider_api_key: Option<String>,
    pub provider_discovery_url: String,
    pub provider_pipeline_id: String,
    pub provider_timeout: Duration,
    pub pipeline_config_ttl: Duration,

    // Batch processing
    pub source_language: String,
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_backoff: Duration,
    pub retry_max_delay: Duration,
    pub retry_backoff_multiplier: f64,
    pub translatable_fields: Vec<String>,
    pub batch_time_budget: Duration,
    pub claim_lease: Duration,
    pub workers: usize,

    // Service
    pub interval_minutes: Option<u32>,
    pub port: u16,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: std::env::var("DATABASE_URL").context("DATABASE_URL not set")?,

            // Checked per request: a missing secret is a 500, not a startup failure
            cron_secret: non_empty_var("CRON_SECRET"),

            // Checked on first discovery call
            provider_user_id: non_empty_var("TRANSLATION_PROVIDER_USER_ID"),
            provider_api_key: non_empty_var("TRANSLATION_PROVIDER_API_KEY"),
            provider_discovery_url: std::env::var("TRANSLATION_PROVIDER_DISCOVERY_URL")
                .unwrap_or_else(|_| DEFAULT_DISCOVERY_URL.to_string()),
            provider_pipeline_id: std::env::var("TRANSLATION_PROVIDER_PIPELINE_ID")
                .unwrap_or_else(|_| DEFAULT_PIPELINE_ID.to_string()),
            provider_timeout: Duration::from_secs(parse_var("PROVIDER_TIMEOUT_SECS", 15)),
            pipeline_config_ttl: Duration::from_secs(
                parse_var::<u64>("PIPELINE_CONFIG_TTL_HOURS", 23).saturating_mul(60 * 60),
            ),

            source_language: std::env::var("SOURCE_LANGUAGE")
                .unwrap_or_else(|_| "en".to_string()),
            batch_size: parse_var("TRANSLATION_BATCH_SIZE", 20),
            max_attempts: parse_var("TRANSLATION_MAX_ATTEMPTS", 3),
            retry_backoff: Duration::from_secs(parse_var("TRANSLATION_RETRY_BACKOFF_SECS", 0)),
            retry_max_delay: Duration::from_secs(parse_var(
                "TRANSLATION_RETRY_MAX_DELAY_SECS",
                60 * 60,
            )),
            retry_backoff_multiplier: parse_var("TRANSLATION_RETRY_BACKOFF_MULTIPLIER", 2.0),
            translatable_fields: parse_field_list(
                &std::env::var("TRANSLATABLE_FIELDS").unwrap_or_else(|_| "name".to_string()),
            ),
            batch_time_budget: Duration::from_secs(parse_var("BATCH_TIME_BUDGET_SECS", 50)),
            claim_lease: Duration::from_secs(parse_var("CLAIM_LEASE_SECS", 600)),
            workers: parse_var::<usize>("TRANSLATION_WORKERS", 1).max(1),

            interval_minutes: std::env::var("TRANSLATION_INTERVAL_MINUTES")
                .ok()
                .and_then(|v| v.parse().ok()),
            port: parse_var("PORT", 8080),
        })
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated field list, dropping blanks and duplicates.
pub fn parse_field_list(raw: &str) -> Vec<String> {
    let mut fields: Vec<String> = Vec::new();
    for field in raw.split(',').map(str::trim).filter(|f| !f.is_empty()) {
        if !fields.iter().any(|f| f == field) {
            fields.push(field.to_string());
        }
    }
    fields
}
