//! Daily batch job: the 4:00 PM ET trigger for the full pipeline.
//!
//! Delegates to the orchestrator, which handles gap backfill on its own:
//! any trading days missed since the last complete snapshot are processed
//! in order before today. A run already in flight (e.g. an admin trigger)
//! makes this a no-op rather than a failure.

use crate::errors::AppError;
use crate::models::batch::BatchRunOptions;
use crate::services::job_scheduler_service::{JobContext, JobResult};
use tracing::{info, warn};

pub async fn run_daily_batch(ctx: JobContext) -> Result<JobResult, AppError> {
    info!("📦 Starting scheduled daily batch");

    let options = BatchRunOptions::default();

    match ctx.orchestrator.run_daily(options, "scheduler").await {
        Ok(summary) => {
            info!(
                "Daily batch {}: {} portfolio-days completed, {} skipped, {} failed",
                summary.batch_run_id,
                summary.portfolio_days_completed,
                summary.portfolio_days_skipped,
                summary.portfolio_days_failed
            );
            Ok(JobResult {
                items_processed: (summary.portfolio_days_completed + summary.portfolio_days_skipped)
                    as i32,
                items_failed: summary.portfolio_days_failed as i32,
            })
        }
        Err(AppError::Conflict(msg)) => {
            warn!("Daily batch skipped, another run is active: {}", msg);
            Ok(JobResult { items_processed: 0, items_failed: 0 })
        }
        Err(e) => Err(e),
    }
}
