use crate::error::TranslateError;
use crate::pipeline_config::{LanguagePair, PipelineConfigResolver};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Turns source-language text into a target language.
#[async_trait]
pub trait Translator: Send + Sync {
    fn source_language(&self) -> &str;

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError>;
}

/// Translate request sent to the pipeline callback URL
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateRequest<'a> {
    pipeline_tasks: Vec<TranslateTask<'a>>,
    input_data: InputData<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateTask<'a> {
    task_type: &'static str,
    config: TranslateTaskConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TranslateTaskConfig<'a> {
    language: LanguagePair<'a>,
    service_id: &'a str,
}

#[derive(Debug, Serialize)]
struct InputData<'a> {
    input: Vec<InputItem<'a>>,
}

#[derive(Debug, Serialize)]
struct InputItem<'a> {
    source: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranslateResponse {
    #[serde(default)]
    pipeline_response: Vec<TaskOutput>,
}

#[derive(Debug, Deserialize)]
struct TaskOutput {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Debug, Deserialize)]
struct OutputItem {
    target: Option<String>,
}

impl TranslateResponse {
    fn first_target(self) -> Option<String> {
        self.pipeline_response
            .into_iter()
            .next()?
            .output
            .into_iter()
            .next()?
            .target
            .filter(|text| !text.trim().is_empty())
    }
}

/// Client for the MT provider's translate call.
///
/// One request per string, no retries: a failed translation fails the job,
/// and the job is retried on a later batch run.
pub struct TranslationClient {
    http: reqwest::Client,
    resolver: Arc<PipelineConfigResolver>,
}

impl TranslationClient {
    pub fn new(http: reqwest::Client, resolver: Arc<PipelineConfigResolver>) -> Self {
        Self { http, resolver }
    }
}

#[async_trait]
impl Translator for TranslationClient {
    fn source_language(&self) -> &str {
        self.resolver.source_language()
    }

    async fn translate(&self, text: &str, target_language: &str) -> Result<String, TranslateError> {
        let pipeline = self.resolver.resolve(target_language).await?;

        let request = TranslateRequest {
            pipeline_tasks: vec![TranslateTask {
                task_type: "translation",
                config: TranslateTaskConfig {
                    language: LanguagePair {
                        source_language: self.resolver.source_language(),
                        target_language,
                    },
                    service_id: &pipeline.service_id,
                },
            }],
            input_data: InputData {
                input: vec![InputItem { source: text }],
            },
        };

        debug!(
            "Translating {} chars to {} via {}",
            text.chars().count(),
            target_language,
            pipeline.service_id
        );

        let response = self
            .http
            .post(&pipeline.callback_url)
            .header(pipeline.auth_header.as_str(), pipeline.auth_value.as_str())
            .json(&request)
            .send()
            .await
            .map_err(TranslateError::Request)?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<failed to read body: {}>", e));

        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
                // Credential was probably rotated; rediscover on the next attempt
                warn!(
                    "Translate call rejected the pipeline credential for {} ({}), dropping cached config",
                    target_language, status
                );
                self.resolver.invalidate(target_language).await;
            }
            return Err(TranslateError::Status { status, body });
        }

        serde_json::from_str::<TranslateResponse>(&body)
            .ok()
            .and_then(TranslateResponse::first_target)
            .ok_or(TranslateError::MissingOutput { raw: body })
    }
}
