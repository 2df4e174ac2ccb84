//! Weekly historical backfill (Sunday 2:00 AM ET).
//!
//! Re-fetches the trailing 90 calendar days of bars for the whole symbol
//! universe so any gaps the daily refresh missed (provider outages,
//! late-listed symbols) are healed before the new week.

use crate::db::{factor_queries, position_queries};
use crate::errors::AppError;
use crate::services::job_scheduler_service::{JobContext, JobResult};
use crate::services::market_data::{self, PriceCache};
use chrono::Duration;
use std::collections::HashSet;
use tracing::info;

const BACKFILL_CALENDAR_DAYS: i64 = 90;

pub async fn run_historical_backfill(ctx: JobContext) -> Result<JobResult, AppError> {
    info!("📦 Starting weekly historical backfill");

    let end = ctx.calendar.most_recent_trading_day();
    let start = end - Duration::days(BACKFILL_CALENDAR_DAYS);

    factor_queries::ensure_factor_definitions(&ctx.pool).await?;
    let factors = factor_queries::fetch_factor_definitions(&ctx.pool).await?;

    let mut symbols: HashSet<String> =
        position_queries::fetch_universe_symbols(&ctx.pool, end).await?.into_iter().collect();
    for factor in &factors {
        symbols.insert(factor.long_etf.clone());
        if let Some(short) = &factor.short_etf {
            symbols.insert(short.clone());
        }
    }
    let mut symbols: Vec<String> = symbols.into_iter().collect();
    symbols.sort();

    let cache = PriceCache::new();
    let (refreshed, failed) = market_data::refresh_symbols(
        &ctx.pool,
        ctx.provider.as_ref(),
        &ctx.rate_limiter,
        &cache,
        &symbols,
        start,
        end,
        ctx.config.provider_batch_size,
    )
    .await?;

    info!("🏁 Historical backfill done: {} refreshed, {} failed", refreshed, failed);
    Ok(JobResult { items_processed: refreshed as i32, items_failed: failed as i32 })
}
