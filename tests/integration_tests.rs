//! Integration tests for the organization translation pipeline
//!
//! These drive the real translation client against a mocked MT provider,
//! the batch processor against the in-memory job store, and the HTTP entry
//! point over a real socket.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate, Times,
};

use org_translation_pipeline::{
    clock::{Clock, ManualClock},
    models::{JobStatus, TranslationJob},
    pipeline_config::{PipelineConfigResolver, ProviderSettings},
    processor::{JobProcessor, ProcessorSettings},
    server::{self, AppState, TRIGGER_PATH},
    store::MemoryJobStore,
    translation::TranslationClient,
};

const SECRET: &str = "test-cron-secret";

// ==================== Test Helpers ====================

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
}

fn provider_settings(server: &MockServer) -> ProviderSettings {
    ProviderSettings {
        user_id: Some("test-user".to_string()),
        api_key: Some("test-ulca-key".to_string()),
        discovery_url: format!("{}/ulca/apis/v0/model/getModelsPipeline", server.uri()),
        pipeline_id: "test-pipeline".to_string(),
    }
}

fn discovery_body(server: &MockServer) -> serde_json::Value {
    json!({
        "pipelineResponseConfig": [{
            "taskType": "translation",
            "config": [{"serviceId": "ai4bharat/indictrans-v2-all-gpu"}]
        }],
        "pipelineInferenceAPIEndPoint": {
            "callbackUrl": format!("{}/services/inference/pipeline", server.uri()),
            "inferenceApiKey": {"name": "Authorization", "value": "inference-secret"}
        }
    })
}

async fn mount_discovery(server: &MockServer, body: serde_json::Value, expected: impl Into<Times>) {
    Mock::given(method("POST"))
        .and(path("/ulca/apis/v0/model/getModelsPipeline"))
        .and(header("userID", "test-user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(expected)
        .mount(server)
        .await;
}

async fn mount_translation(server: &MockServer, target_language: &str, translated: &str) {
    Mock::given(method("POST"))
        .and(path("/services/inference/pipeline"))
        .and(header("Authorization", "inference-secret"))
        .and(body_partial_json(json!({
            "pipelineTasks": [{"config": {"language": {"targetLanguage": target_language}}}]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "pipelineResponse": [{
                "taskType": "translation",
                "output": [{"source": "ABC Trust", "target": translated}]
            }]
        })))
        .mount(server)
        .await;
}

fn seeded_store() -> Arc<MemoryJobStore> {
    let store = MemoryJobStore::new();
    store.add_language("lang-en", "en");
    store.add_language("lang-hi", "hi");
    store.add_language("lang-ta", "ta");
    store.add_organization(
        "org-abc",
        json!({"id": "org-abc", "name": "ABC Trust", "city": "Pune"}),
    );
    Arc::new(store)
}

fn processor(
    server: &MockServer,
    store: Arc<MemoryJobStore>,
    clock: Arc<ManualClock>,
) -> Arc<JobProcessor> {
    processor_with_timeout(server, store, clock, Duration::from_secs(5))
}

fn processor_with_timeout(
    server: &MockServer,
    store: Arc<MemoryJobStore>,
    clock: Arc<ManualClock>,
    provider_timeout: Duration,
) -> Arc<JobProcessor> {
    let http = reqwest::Client::builder()
        .timeout(provider_timeout)
        .build()
        .unwrap();
    let resolver = Arc::new(PipelineConfigResolver::new(
        http.clone(),
        provider_settings(server),
        "en",
        Duration::from_secs(23 * 60 * 60),
        clock.clone(),
    ));

    Arc::new(JobProcessor::new(
        store,
        Arc::new(TranslationClient::new(http, resolver)),
        clock,
        ProcessorSettings::default(),
    ))
}

async fn serve(processor: Arc<JobProcessor>) -> String {
    let app = server::router(AppState {
        processor,
        cron_secret: Some(Arc::from(SECRET)),
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}{}", addr, TRIGGER_PATH)
}

async fn trigger(url: &str) -> (reqwest::StatusCode, serde_json::Value) {
    let response = reqwest::Client::new()
        .post(url)
        .bearer_auth(SECRET)
        .send()
        .await
        .expect("trigger request");
    let status = response.status();
    (status, response.json().await.expect("json body"))
}

// ==================== Scenario Tests ====================

#[tokio::test]
async fn test_hindi_job_is_translated_and_field_stored() {
    let server = MockServer::start().await;
    mount_discovery(&server, discovery_body(&server), 1).await;
    mount_translation(&server, "hi", "एबीसी ट्रस्ट").await;

    let store = seeded_store();
    store.insert_job(TranslationJob::pending("job-1", "org-abc", "lang-hi", start_time()));
    let clock = Arc::new(ManualClock::new(start_time()));
    let url = serve(processor(&server, store.clone(), clock)).await;

    let (status, body) = trigger(&url).await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(
        body,
        json!({"success": true, "data": {"processed": 1, "failed": 0, "skipped": 0, "total": 1}})
    );
    assert_eq!(store.job("job-1").unwrap().status, JobStatus::MachineTranslated);
    let field = store.field("org-abc", "lang-hi", "name").expect("field record");
    assert_eq!(field.translated_text, "एबीसी ट्रस्ट");
    assert_eq!(field.status, JobStatus::MachineTranslated);
}

#[tokio::test]
async fn test_source_language_job_makes_no_provider_call() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&server)
        .await;

    let store = seeded_store();
    store.insert_job(TranslationJob::pending("job-en", "org-abc", "lang-en", start_time()));
    let clock = Arc::new(ManualClock::new(start_time()));
    let url = serve(processor(&server, store.clone(), clock)).await;

    let (status, body) = trigger(&url).await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["data"]["skipped"], 1);
    assert_eq!(store.job("job-en").unwrap().status, JobStatus::MachineTranslated);
}

#[tokio::test]
async fn test_provider_500_on_last_attempt_fails_job() {
    let server = MockServer::start().await;
    mount_discovery(&server, discovery_body(&server), 1).await;
    Mock::given(method("POST"))
        .and(path("/services/inference/pipeline"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Inference service unavailable"))
        .mount(&server)
        .await;

    let store = seeded_store();
    let mut job = TranslationJob::pending("job-1", "org-abc", "lang-hi", start_time());
    job.retry_count = 2;
    store.insert_job(job);
    let clock = Arc::new(ManualClock::new(start_time()));
    let url = serve(processor(&server, store.clone(), clock)).await;

    let (status, body) = trigger(&url).await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body["data"]["failed"], 1);
    let job = store.job("job-1").unwrap();
    assert_eq!(job.retry_count, 3);
    assert_eq!(job.status, JobStatus::TranslationFailed);
    assert!(job
        .error_message
        .unwrap()
        .contains("Inference service unavailable"));
}

#[tokio::test]
async fn test_discovery_without_credential_fails_only_the_job() {
    let server = MockServer::start().await;
    let mut body = discovery_body(&server);
    body["pipelineInferenceAPIEndPoint"]
        .as_object_mut()
        .unwrap()
        .remove("inferenceApiKey");
    mount_discovery(&server, body, 2).await;

    let store = seeded_store();
    store.insert_job(TranslationJob::pending("job-hi", "org-abc", "lang-hi", start_time()));
    store.insert_job(TranslationJob::pending(
        "job-en",
        "org-abc",
        "lang-en",
        start_time() + chrono::Duration::minutes(1),
    ));
    store.insert_job(TranslationJob::pending(
        "job-ta",
        "org-abc",
        "lang-ta",
        start_time() + chrono::Duration::minutes(2),
    ));
    let clock = Arc::new(ManualClock::new(start_time()));
    let url = serve(processor(&server, store.clone(), clock)).await;

    let (status, body) = trigger(&url).await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(
        body["data"],
        json!({"processed": 0, "failed": 2, "skipped": 1, "total": 3})
    );
    let job = store.job("job-hi").unwrap();
    assert_eq!(job.retry_count, 1);
    assert_eq!(job.status, JobStatus::PendingTranslation);
    assert!(job.error_message.unwrap().contains("inferenceApiKey"));
}

#[tokio::test]
async fn test_empty_queue_writes_nothing() {
    let server = MockServer::start().await;
    let store = seeded_store();
    let clock = Arc::new(ManualClock::new(start_time()));
    let url = serve(processor(&server, store.clone(), clock)).await;

    let (status, body) = trigger(&url).await;

    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body, json!({"processed": 0, "message": "No pending jobs"}));
    assert!(store.jobs().is_empty());
    assert!(store.field_records().is_empty());
}

// ==================== Property Tests ====================

#[tokio::test]
async fn test_pipeline_config_cached_across_runs_until_ttl() {
    let server = MockServer::start().await;
    mount_discovery(&server, discovery_body(&server), 2).await;
    mount_translation(&server, "hi", "एबीसी ट्रस्ट").await;

    let store = seeded_store();
    let clock = Arc::new(ManualClock::new(start_time()));
    let processor = processor(&server, store.clone(), clock.clone());

    for (i, offset_hours) in [0i64, 1, 22, 23].into_iter().enumerate() {
        clock.set(start_time() + chrono::Duration::hours(offset_hours));
        store.insert_job(TranslationJob::pending(
            format!("job-{}", i),
            "org-abc",
            "lang-hi",
            clock.now(),
        ));
        let summary = processor.run_batch().await.unwrap();
        assert_eq!(summary.processed, 1);
    }
    // Discovery at hour 0 and again at hour 23; verified on drop
}

#[tokio::test]
async fn test_overlapping_runs_never_process_a_job_twice() {
    let server = MockServer::start().await;
    mount_discovery(&server, discovery_body(&server), 1..=2).await;
    Mock::given(method("POST"))
        .and(path("/services/inference/pipeline"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"pipelineResponse": [{"output": [{"target": "अनुवाद"}]}]}))
                .set_delay(Duration::from_millis(20)),
        )
        .expect(10)
        .mount(&server)
        .await;

    let store = seeded_store();
    for i in 0..10 {
        store.insert_job(TranslationJob::pending(
            format!("job-{}", i),
            "org-abc",
            "lang-hi",
            start_time() + chrono::Duration::minutes(i),
        ));
    }
    let clock = Arc::new(ManualClock::new(start_time()));
    let processor = processor(&server, store.clone(), clock);

    let (first, second) = tokio::join!(processor.run_batch(), processor.run_batch());
    let first = first.unwrap();
    let second = second.unwrap();

    assert_eq!(first.total + second.total, 10);
    assert_eq!(first.processed + second.processed, 10);
    assert!(store
        .jobs()
        .iter()
        .all(|job| job.status == JobStatus::MachineTranslated));
}

#[tokio::test]
async fn test_persistence_failure_leaves_job_pending_without_fields() {
    let server = MockServer::start().await;
    mount_discovery(&server, discovery_body(&server), 1).await;
    mount_translation(&server, "hi", "एबीसी ट्रस्ट").await;

    let store = seeded_store();
    store.insert_job(TranslationJob::pending("job-1", "org-abc", "lang-hi", start_time()));
    store.fail_next_commits(1);
    let clock = Arc::new(ManualClock::new(start_time()));
    let processor = processor(&server, store.clone(), clock);

    let summary = processor.run_batch().await.unwrap();

    assert_eq!(summary.failed, 1);
    let job = store.job("job-1").unwrap();
    assert_eq!(job.status, JobStatus::PendingTranslation);
    assert_eq!(job.retry_count, 1);
    assert!(store.field("org-abc", "lang-hi", "name").is_none());

    // Next run succeeds
    let summary = processor.run_batch().await.unwrap();
    assert_eq!(summary.processed, 1);
    assert!(store.field("org-abc", "lang-hi", "name").is_some());
}

#[tokio::test]
async fn test_missing_provider_credentials_is_server_error() {
    let server = MockServer::start().await;
    let store = seeded_store();
    store.insert_job(TranslationJob::pending("job-1", "org-abc", "lang-hi", start_time()));
    let clock = Arc::new(ManualClock::new(start_time()));

    let mut settings = provider_settings(&server);
    settings.user_id = None;
    let http = reqwest::Client::new();
    let resolver = Arc::new(PipelineConfigResolver::new(
        http.clone(),
        settings,
        "en",
        Duration::from_secs(60),
        clock.clone(),
    ));
    let processor = Arc::new(JobProcessor::new(
        store.clone(),
        Arc::new(TranslationClient::new(http, resolver)),
        clock,
        ProcessorSettings::default(),
    ));
    let url = serve(processor).await;

    let (status, body) = trigger(&url).await;

    assert_eq!(status, reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
    let job = store.job("job-1").unwrap();
    assert_eq!(job.status, JobStatus::PendingTranslation);
    assert_eq!(job.retry_count, 0);
}

#[tokio::test]
async fn test_hung_provider_call_fails_only_that_job() {
    let server = MockServer::start().await;
    mount_discovery(&server, discovery_body(&server), 2).await;
    Mock::given(method("POST"))
        .and(path("/services/inference/pipeline"))
        .and(body_partial_json(json!({
            "pipelineTasks": [{"config": {"language": {"targetLanguage": "hi"}}}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"pipelineResponse": [{"output": [{"target": "late"}]}]}))
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;
    mount_translation(&server, "ta", "ஏபிசி அறக்கட்டளை").await;

    let store = seeded_store();
    store.insert_job(TranslationJob::pending("job-hi", "org-abc", "lang-hi", start_time()));
    store.insert_job(TranslationJob::pending(
        "job-ta",
        "org-abc",
        "lang-ta",
        start_time() + chrono::Duration::minutes(1),
    ));
    let clock = Arc::new(ManualClock::new(start_time()));
    let processor =
        processor_with_timeout(&server, store.clone(), clock, Duration::from_millis(300));

    let summary = processor.run_batch().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.processed, 1);
    let hung = store.job("job-hi").unwrap();
    assert_eq!(hung.status, JobStatus::PendingTranslation);
    assert_eq!(hung.retry_count, 1);
    assert!(hung.error_message.unwrap().contains("translation request failed"));
    assert!(store.field("org-abc", "lang-hi", "name").is_none());
    assert_eq!(
        store.job("job-ta").unwrap().status,
        JobStatus::MachineTranslated
    );
}
