use crate::processor::JobProcessor;
use anyhow::Result;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

/// Run translation batches every `interval_minutes` from inside the service.
///
/// This is an alternative to an external trigger calling the HTTP entry
/// point. Both may run at once; claiming keeps them off each other's jobs.
pub async fn start_scheduler(
    processor: Arc<JobProcessor>,
    interval_minutes: u32,
) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let cron_expr = interval_to_cron(interval_minutes)?;
    info!(
        "Scheduling translation batches every {} minute(s) (cron: {})",
        interval_minutes, cron_expr
    );

    let job = Job::new_async(cron_expr.as_str(), move |_uuid, _l| {
        let processor = Arc::clone(&processor);

        Box::pin(async move {
            info!("⏰ Scheduled translation batch triggered");
            match processor.run_batch().await {
                Ok(summary) => info!(
                    "Scheduled batch: {} processed, {} failed, {} skipped of {}",
                    summary.processed, summary.failed, summary.skipped, summary.total
                ),
                Err(e) => error!("Scheduled translation batch failed: {}", e),
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!("✓ Scheduler started");

    Ok(scheduler)
}

/// Convert a minute interval into a cron expression firing at second 0
fn interval_to_cron(interval_minutes: u32) -> Result<String> {
    if !(1..=59).contains(&interval_minutes) {
        anyhow::bail!(
            "Invalid translation interval: {} minutes. Expected 1-59",
            interval_minutes
        );
    }

    // Cron format: "second minute hour day month day_of_week"
    Ok(format!("0 */{} * * * *", interval_minutes))
}
