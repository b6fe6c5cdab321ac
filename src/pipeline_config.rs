//! Pipeline configuration discovery with an in-memory TTL cache.
//!
//! Before translating into a language, the MT provider has to tell us which
//! backend service handles the (source, target) pair, where to send requests,
//! and which credential to send them with. That answer is stable for hours,
//! so it is cached per language pair.

use crate::clock::Clock;
use crate::config::Config;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

const TASK_TYPE: &str = "translation";
const DEFAULT_AUTH_HEADER: &str = "Authorization";

/// Everything needed to call the provider's translate endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub service_id: String,
    pub callback_url: String,
    pub auth_header: String,
    /// Sent verbatim; the provider may already include a scheme prefix.
    pub auth_value: String,
}

// Hand-written so the credential never ends up in logs
impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("service_id", &self.service_id)
            .field("callback_url", &self.callback_url)
            .field("auth_header", &self.auth_header)
            .field("auth_value", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub user_id: Option<String>,
    pub api_key: Option<String>,
    pub discovery_url: String,
    pub pipeline_id: String,
}

impl ProviderSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            user_id: config.provider_user_id.clone(),
            api_key: config.provider_api_key.clone(),
            discovery_url: config.provider_discovery_url.clone(),
            pipeline_id: config.provider_pipeline_id.clone(),
        }
    }
}

// ==================== Discovery contract ====================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct LanguagePair<'a> {
    pub source_language: &'a str,
    pub target_language: &'a str,
}

#[derive(Debug, Serialize)]
struct DiscoveryRequest<'a> {
    #[serde(rename = "pipelineTasks")]
    pipeline_tasks: Vec<DiscoveryTask<'a>>,
    #[serde(rename = "pipelineRequestConfig")]
    pipeline_request_config: PipelineRequestConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DiscoveryTask<'a> {
    task_type: &'static str,
    config: DiscoveryTaskConfig<'a>,
}

#[derive(Debug, Serialize)]
struct DiscoveryTaskConfig<'a> {
    language: LanguagePair<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PipelineRequestConfig<'a> {
    pipeline_id: &'a str,
}

#[derive(Debug, Default, Deserialize)]
struct DiscoveryResponse {
    #[serde(rename = "pipelineResponseConfig", default)]
    pipeline_response_config: Vec<TaskResponseConfig>,
    #[serde(rename = "pipelineInferenceAPIEndPoint")]
    inference_endpoint: Option<InferenceEndpoint>,
}

#[derive(Debug, Default, Deserialize)]
struct TaskResponseConfig {
    #[serde(default)]
    config: Vec<ServiceConfig>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceConfig {
    service_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InferenceEndpoint {
    callback_url: Option<String>,
    inference_api_key: Option<InferenceApiKey>,
}

#[derive(Debug, Default, Deserialize)]
struct InferenceApiKey {
    name: Option<String>,
    value: Option<String>,
}

fn present(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

/// Non-blank, but returned untouched: the credential is opaque.
fn present_verbatim(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|v| !v.trim().is_empty())
}

impl DiscoveryResponse {
    fn service_id(&self) -> Option<&str> {
        present(
            self.pipeline_response_config
                .first()
                .and_then(|task| task.config.first())
                .and_then(|service| service.service_id.as_ref()),
        )
    }

    fn callback_url(&self) -> Option<&str> {
        present(
            self.inference_endpoint
                .as_ref()
                .and_then(|endpoint| endpoint.callback_url.as_ref()),
        )
    }

    fn api_key(&self) -> Option<&InferenceApiKey> {
        self.inference_endpoint
            .as_ref()
            .and_then(|endpoint| endpoint.inference_api_key.as_ref())
    }

    /// What was found, without the credential itself.
    fn describe(&self) -> String {
        format!(
            "{{serviceId: {:?}, callbackUrl: {:?}, inferenceApiKey.value: {}}}",
            self.service_id(),
            self.callback_url(),
            if self.api_key().and_then(|key| present_verbatim(key.value.as_ref())).is_some() {
                "present"
            } else {
                "absent"
            }
        )
    }

    fn into_config(self) -> Result<PipelineConfig, ConfigError> {
        let incomplete = |missing: &'static str| ConfigError::Incomplete {
            missing,
            partial: self.describe(),
        };

        let service_id = self.service_id().ok_or_else(|| incomplete("serviceId"))?;
        let callback_url = self
            .callback_url()
            .ok_or_else(|| incomplete("pipelineInferenceAPIEndPoint.callbackUrl"))?;
        let key = self.api_key();
        let auth_value = key
            .and_then(|key| present_verbatim(key.value.as_ref()))
            .ok_or_else(|| incomplete("pipelineInferenceAPIEndPoint.inferenceApiKey.value"))?;
        let auth_header = key
            .and_then(|key| present(key.name.as_ref()))
            .unwrap_or(DEFAULT_AUTH_HEADER);

        Ok(PipelineConfig {
            service_id: service_id.to_string(),
            callback_url: callback_url.to_string(),
            auth_header: auth_header.to_string(),
            auth_value: auth_value.to_string(),
        })
    }
}

// ==================== Resolver ====================

#[derive(Debug, Clone)]
struct CacheEntry {
    config: PipelineConfig,
    expires_at: DateTime<Utc>,
}

/// Resolves and caches pipeline configuration per target language.
///
/// The cache is owned by the resolver (one per process). Concurrent misses
/// for the same pair may each hit the discovery endpoint; the last write wins
/// and every answer is equally valid.
pub struct PipelineConfigResolver {
    http: reqwest::Client,
    settings: ProviderSettings,
    source_language: String,
    ttl: chrono::Duration,
    clock: Arc<dyn Clock>,
    cache: RwLock<HashMap<String, CacheEntry>>,
}

impl PipelineConfigResolver {
    pub fn new(
        http: reqwest::Client,
        settings: ProviderSettings,
        source_language: impl Into<String>,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            http,
            settings,
            source_language: source_language.into(),
            ttl: chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::hours(23)),
            clock,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn source_language(&self) -> &str {
        &self.source_language
    }

    fn cache_key(&self, target_language: &str) -> String {
        format!("{}-{}", self.source_language, target_language)
    }

    pub async fn resolve(&self, target_language: &str) -> Result<PipelineConfig, ConfigError> {
        let key = self.cache_key(target_language);

        if let Some(entry) = self.cache.read().await.get(&key) {
            if self.clock.now() < entry.expires_at {
                debug!("Pipeline config cache hit for {}", key);
                return Ok(entry.config.clone());
            }
        }

        let config = self.discover(target_language).await?;
        let expires_at = self.clock.now() + self.ttl;
        info!(
            "Discovered pipeline for {} (service {}), cached until {}",
            key,
            config.service_id,
            expires_at.to_rfc3339()
        );

        self.cache.write().await.insert(
            key,
            CacheEntry {
                config: config.clone(),
                expires_at,
            },
        );

        Ok(config)
    }

    /// Forget the cached pipeline for `target_language`.
    pub async fn invalidate(&self, target_language: &str) {
        let key = self.cache_key(target_language);
        if self.cache.write().await.remove(&key).is_some() {
            debug!("Invalidated pipeline config for {}", key);
        }
    }

    async fn discover(&self, target_language: &str) -> Result<PipelineConfig, ConfigError> {
        let user_id = self
            .settings
            .user_id
            .as_deref()
            .ok_or(ConfigError::MissingCredentials("TRANSLATION_PROVIDER_USER_ID"))?;
        let api_key = self
            .settings
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredentials("TRANSLATION_PROVIDER_API_KEY"))?;

        let request = DiscoveryRequest {
            pipeline_tasks: vec![DiscoveryTask {
                task_type: TASK_TYPE,
                config: DiscoveryTaskConfig {
                    language: LanguagePair {
                        source_language: &self.source_language,
                        target_language,
                    },
                },
            }],
            pipeline_request_config: PipelineRequestConfig {
                pipeline_id: &self.settings.pipeline_id,
            },
        };

        debug!(
            "Requesting pipeline config for {}",
            self.cache_key(target_language)
        );

        let response = self
            .http
            .post(&self.settings.discovery_url)
            .header("userID", user_id)
            .header("ulcaApiKey", api_key)
            .json(&request)
            .send()
            .await
            .map_err(ConfigError::Request)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read body: {}>", e));

        if !status.is_success() {
            return Err(ConfigError::Status { status, body });
        }

        let parsed: DiscoveryResponse =
            serde_json::from_str(&body).map_err(|source| ConfigError::InvalidBody { source, body })?;

        parsed.into_config()
    }
}
