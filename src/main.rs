use anyhow::{Context, Result};
use org_translation_pipeline::{
    clock::SystemClock,
    config::Config,
    pipeline_config::{PipelineConfigResolver, ProviderSettings},
    processor::{JobProcessor, ProcessorSettings},
    scheduler,
    server::{self, AppState},
    store::PgJobStore,
    translation::TranslationClient,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("org_translation_pipeline=info".parse()?),
        )
        .init();

    info!("Starting organization translation pipeline");

    let config = Config::from_env()?;

    if config.cron_secret.is_none() {
        warn!("CRON_SECRET not set; the trigger endpoint will answer 500 until it is");
    }
    if config.provider_user_id.is_none() || config.provider_api_key.is_none() {
        warn!("Translation provider credentials not set; batches will abort on the first job needing translation");
    }

    let store = PgJobStore::connect(&config.database_url).await?;
    store.ensure_schema().await?;

    // Every provider call is bounded so a stuck request cannot stall the batch
    let http = reqwest::Client::builder()
        .timeout(config.provider_timeout)
        .build()
        .context("Failed to create HTTP client")?;

    let clock = Arc::new(SystemClock);
    let resolver = Arc::new(PipelineConfigResolver::new(
        http.clone(),
        ProviderSettings::from_config(&config),
        config.source_language.clone(),
        config.pipeline_config_ttl,
        clock.clone(),
    ));
    let translator = Arc::new(TranslationClient::new(http, resolver));

    let processor = Arc::new(JobProcessor::new(
        Arc::new(store),
        translator,
        clock,
        ProcessorSettings::from_config(&config),
    ));

    // Keep the scheduler alive for the lifetime of the server
    let _scheduler = match config.interval_minutes {
        Some(minutes) => Some(scheduler::start_scheduler(processor.clone(), minutes).await?),
        None => {
            info!("No TRANSLATION_INTERVAL_MINUTES set; waiting for external triggers");
            None
        }
    };

    let app = server::router(AppState {
        processor,
        cron_secret: config.cron_secret.as_deref().map(Arc::from),
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!("Listening on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;
    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}
