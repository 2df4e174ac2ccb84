//! Evening correlations pass (6:00 PM ET).
//!
//! The in-pipeline correlation phase skips portfolios whose symbols lack
//! enough aligned history; by evening the day's refresh has usually
//! landed, so this job retries every active portfolio for the most recent
//! trading day. Failures stay per-portfolio.

use crate::db::portfolio_queries;
use crate::errors::{AppError, CalcOutcome};
use crate::services::job_scheduler_service::{JobContext, JobResult};
use crate::services::market_data::PriceCache;
use crate::services::correlation_service;
use tracing::{info, warn};

pub async fn run_all_correlations(ctx: JobContext) -> Result<JobResult, AppError> {
    info!("🔗 Starting correlations retry job");

    let date = ctx.calendar.most_recent_trading_day();
    let portfolios = portfolio_queries::fetch_active_portfolios(&ctx.pool).await?;

    if portfolios.is_empty() {
        info!("No active portfolios, nothing to correlate");
        return Ok(JobResult { items_processed: 0, items_failed: 0 });
    }

    let cache = PriceCache::new();
    let mut processed = 0;
    let mut failed = 0;

    for portfolio in portfolios {
        match correlation_service::portfolio_correlations(
            &ctx.pool,
            &cache,
            &ctx.config,
            portfolio.id,
            date,
        )
        .await
        {
            Ok(CalcOutcome::Completed(matrix)) => {
                processed += 1;
                info!(
                    "✅ Correlations for {} ({} symbols, {} pairs)",
                    portfolio.name,
                    matrix.symbols.len(),
                    matrix.pairs.len()
                );
            }
            Ok(CalcOutcome::Skipped { reason }) => {
                processed += 1;
                info!("Correlations skipped for {}: {}", portfolio.name, reason);
            }
            Err(e) => {
                failed += 1;
                warn!("Correlations failed for {}: {}", portfolio.name, e);
            }
        }
    }

    info!("🏁 Correlations job done: {} processed, {} failed", processed, failed);
    Ok(JobResult { items_processed: processed, items_failed: failed })
}
