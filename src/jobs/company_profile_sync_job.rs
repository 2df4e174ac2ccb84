//! Nightly company-profile sync (7:00 PM ET).
//!
//! Resyncs sector/industry metadata and analyst price targets for every
//! symbol held across active portfolios. Per-symbol failures are logged
//! and skipped; profiles feed the next day's sector exposure calculation
//! and targets feed the snapshot projection.

use crate::db::{position_queries, profile_queries, target_queries};
use crate::errors::AppError;
use crate::services::job_scheduler_service::{JobContext, JobResult};
use tracing::{info, warn};

const TARGET_MAX_AGE_DAYS: i64 = 7;

pub async fn sync_company_profiles(ctx: JobContext) -> Result<JobResult, AppError> {
    info!("🏢 Starting company profile sync");

    let date = ctx.calendar.most_recent_trading_day();
    let symbols = position_queries::fetch_universe_symbols(&ctx.pool, date).await?;

    if symbols.is_empty() {
        return Ok(JobResult { items_processed: 0, items_failed: 0 });
    }

    let mut processed = 0;
    let mut failed = 0;

    for symbol in &symbols {
        let _guard = ctx.rate_limiter.acquire().await;
        match ctx.provider.fetch_company_profile(symbol).await {
            Ok(profile) => {
                profile_queries::upsert_profile(&ctx.pool, &profile).await?;
                processed += 1;
            }
            Err(e) => {
                warn!("Profile sync failed for {}: {}", symbol, e);
                failed += 1;
            }
        }
    }

    // Analyst targets move slowly; only refresh the stale ones
    let stale =
        target_queries::fetch_stale_target_symbols(&ctx.pool, &symbols, date, TARGET_MAX_AGE_DAYS)
            .await?;
    let mut targets_updated = 0;
    for symbol in &stale {
        let _guard = ctx.rate_limiter.acquire().await;
        match ctx.provider.fetch_price_target(symbol).await {
            Ok(target) => {
                target_queries::upsert_price_target(
                    &ctx.pool,
                    symbol,
                    target.target_consensus,
                    target.analyst_count,
                )
                .await?;
                targets_updated += 1;
            }
            Err(e) => {
                warn!("Price target fetch failed for {}: {}", symbol, e);
            }
        }
    }

    info!(
        "🏁 Profile sync done: {} profiles updated, {} targets refreshed, {} failed",
        processed, targets_updated, failed
    );
    Ok(JobResult { items_processed: processed, items_failed: failed })
}
