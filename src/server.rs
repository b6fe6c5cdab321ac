use crate::processor::JobProcessor;
use crate::security::{authorize_bearer, AuthError};
use axum::{
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

pub const TRIGGER_PATH: &str = "/api/cron/translation-jobs";

#[derive(Clone)]
pub struct AppState {
    pub processor: Arc<JobProcessor>,
    pub cron_secret: Option<Arc<str>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(TRIGGER_PATH, get(process_jobs).post(process_jobs))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(json!({ "success": false, "error": message.into() })),
    )
        .into_response()
}

/// Scheduler entry point: run one translation batch.
async fn process_jobs(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let header = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

    if let Err(err) = authorize_bearer(header, state.cron_secret.as_deref()) {
        return match err {
            AuthError::SecretNotConfigured => {
                error!("CRON_SECRET is not configured, refusing to run translation batch");
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "Server misconfigured")
            }
            AuthError::MissingCredential | AuthError::InvalidCredential => {
                warn!("Rejected translation trigger: {}", err);
                error_response(StatusCode::UNAUTHORIZED, "Unauthorized")
            }
        };
    }

    match state.processor.run_batch().await {
        Ok(summary) if summary.total == 0 => (
            StatusCode::OK,
            Json(json!({ "processed": 0, "message": "No pending jobs" })),
        )
            .into_response(),
        Ok(summary) => (
            StatusCode::OK,
            Json(json!({ "success": true, "data": summary })),
        )
            .into_response(),
        Err(err) => {
            error!("Translation batch failed: {}", err);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}
