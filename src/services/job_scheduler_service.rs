use crate::calendar::TradingCalendar;
use crate::config::BatchConfig;
use crate::errors::AppError;
use crate::external::market_provider::MarketDataProvider;
use crate::jobs::{company_profile_sync_job, correlations_job, daily_batch_job, historical_backfill_job};
use crate::services::batch_orchestrator::BatchOrchestrator;
use crate::services::rate_limiter::RateLimiter;
use chrono::Utc;
use sqlx::PgPool;
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

// Context passed to job functions
#[derive(Clone)]
pub struct JobContext {
    pub pool: Arc<PgPool>,
    pub provider: Arc<dyn MarketDataProvider>,
    pub rate_limiter: Arc<RateLimiter>,
    pub calendar: Arc<TradingCalendar>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub config: BatchConfig,
}

#[derive(Debug)]
pub struct JobResult {
    pub items_processed: i32,
    pub items_failed: i32,
}

pub struct JobSchedulerService {
    scheduler: JobScheduler,
    context: JobContext,
}

impl JobSchedulerService {
    pub async fn new(context: JobContext) -> Result<Self, AppError> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| AppError::External(format!("Failed to create scheduler: {}", e)))?;

        Ok(Self { scheduler, context })
    }

    /// Wire and start the batch job set. Cron times follow the process
    /// timezone, which deployment pins to US/Eastern (market hours).
    ///
    /// With `BATCH_V2_ENABLED=false` only the profile sync runs here; the
    /// daily pipeline is assumed to be triggered externally (legacy mode).
    pub async fn start(&mut self) -> Result<(), AppError> {
        info!("🚀 Starting job scheduler...");

        let v2 = self.context.config.batch_v2_enabled;

        if v2 {
            // Daily batch + automatic backfill after market close
            self.schedule_job(
                "0 0 16 * * *",
                "daily_batch",
                "Daily at 4:00 PM ET",
                daily_batch_job::run_daily_batch,
            )
            .await?;

            // Correlations retry path for portfolios skipped on early dates
            self.schedule_job(
                "0 0 18 * * *",
                "daily_correlations",
                "Daily at 6:00 PM ET",
                correlations_job::run_all_correlations,
            )
            .await?;

            // Weekly 90-day historical backfill
            self.schedule_job(
                "0 0 2 * * SUN",
                "historical_backfill",
                "Every Sunday at 2:00 AM ET",
                historical_backfill_job::run_historical_backfill,
            )
            .await?;
        } else {
            info!("⚠️  BATCH_V2_ENABLED=false - daily batch jobs disabled, external triggers only");
        }

        self.schedule_job(
            "0 0 19 * * *",
            "company_profile_sync",
            "Daily at 7:00 PM ET",
            company_profile_sync_job::sync_company_profiles,
        )
        .await?;

        self.scheduler
            .start()
            .await
            .map_err(|e| AppError::External(format!("Failed to start scheduler: {}", e)))?;

        info!("✅ Job scheduler started");
        Ok(())
    }

    #[allow(dead_code)]
    pub async fn stop(&mut self) -> Result<(), AppError> {
        info!("🛑 Stopping job scheduler...");
        self.scheduler
            .shutdown()
            .await
            .map_err(|e| AppError::External(format!("Failed to stop scheduler: {}", e)))?;
        Ok(())
    }

    /// Helper to schedule a job with run tracking.
    async fn schedule_job<F, Fut>(
        &mut self,
        schedule: &str,
        job_name: &'static str,
        description: &str,
        job_fn: F,
    ) -> Result<(), AppError>
    where
        F: Fn(JobContext) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<JobResult, AppError>> + Send + 'static,
    {
        let context = self.context.clone();
        let job_fn = Arc::new(job_fn);

        let job = Job::new_async(schedule, move |_uuid, _l| {
            let context = context.clone();
            let job_fn = job_fn.clone();
            Box::pin(async move {
                let pool = context.pool.clone();
                execute_job_with_tracking(&pool, job_name, context, job_fn).await;
            })
        })
        .map_err(|e| AppError::External(format!("Failed to create job {}: {}", job_name, e)))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| AppError::External(format!("Failed to add job {}: {}", job_name, e)))?;

        info!("📅 Scheduled: {} - {} [cron: {}]", job_name, description, schedule);
        Ok(())
    }
}

// Job tracking wrapper
async fn execute_job_with_tracking<F, Fut>(
    pool: &PgPool,
    job_name: &str,
    context: JobContext,
    job_fn: Arc<F>,
) where
    F: Fn(JobContext) -> Fut,
    Fut: std::future::Future<Output = Result<JobResult, AppError>>,
{
    info!("🏃 Starting job: {}", job_name);
    let started_at = Utc::now();

    let job_id = match record_job_start(pool, job_name).await {
        Ok(id) => id,
        Err(e) => {
            error!("Failed to record job start: {}", e);
            return;
        }
    };

    let result = job_fn(context).await;

    let duration_ms = (Utc::now() - started_at).num_milliseconds();

    match result {
        Ok(job_result) => {
            info!(
                "✅ Job completed: {} (processed: {}, failed: {}, duration: {}ms)",
                job_name, job_result.items_processed, job_result.items_failed, duration_ms
            );
            if let Err(e) = record_job_success(
                pool,
                job_id,
                job_result.items_processed,
                job_result.items_failed,
                duration_ms,
            )
            .await
            {
                error!("Failed to record job success: {}", e);
            }
        }
        Err(e) => {
            error!("❌ Job failed: {} - {}", job_name, e);
            if let Err(e) = record_job_failure(pool, job_id, &e.to_string(), duration_ms).await {
                error!("Failed to record job failure: {}", e);
            }
        }
    }
}

async fn record_job_start(pool: &PgPool, job_name: &str) -> Result<i32, AppError> {
    let id: i32 = sqlx::query_scalar(
        r#"
        INSERT INTO job_runs (job_name, status, started_at)
        VALUES ($1, 'running', NOW())
        RETURNING id
        "#,
    )
    .bind(job_name)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

async fn record_job_success(
    pool: &PgPool,
    job_id: i32,
    items_processed: i32,
    items_failed: i32,
    duration_ms: i64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE job_runs
        SET completed_at = NOW(),
            status = 'success',
            items_processed = $2,
            items_failed = $3,
            duration_ms = $4
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(items_processed)
    .bind(items_failed)
    .bind(duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}

async fn record_job_failure(
    pool: &PgPool,
    job_id: i32,
    error_message: &str,
    duration_ms: i64,
) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE job_runs
        SET completed_at = NOW(),
            status = 'failed',
            error_message = $2,
            duration_ms = $3
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(error_message)
    .bind(duration_ms)
    .execute(pool)
    .await?;
    Ok(())
}
