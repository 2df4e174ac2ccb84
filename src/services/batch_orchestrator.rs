use chrono::{NaiveDate, Utc};
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use sqlx::PgPool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::calendar::TradingCalendar;
use crate::config::BatchConfig;
use crate::db::{
    cleanup_queries, factor_queries, market_data_queries, portfolio_queries, snapshot_queries,
};
use crate::errors::{AppError, CalcOutcome};
use crate::external::market_provider::MarketDataProvider;
use crate::models::batch::{BatchRunOptions, BatchRunState, BatchRunSummary, PortfolioDayStatus};
use crate::models::snapshot::SnapshotMetrics;
use crate::models::Portfolio;
use crate::services::rate_limiter::RateLimiter;
use crate::services::{
    beta_service, correlation_service, factor_service, market_data, sector_service,
    snapshot_service, stress_service, symbol_universe, volatility_service,
};

/// Process-wide guard around the single in-flight batch run.
/// Single writer (the orchestrator), many readers (admin status polling).
pub struct BatchRunTracker {
    inner: RwLock<Option<BatchRunState>>,
}

impl BatchRunTracker {
    pub fn new() -> Self {
        Self { inner: RwLock::new(None) }
    }

    pub fn current(&self) -> Option<BatchRunState> {
        self.inner.read().clone()
    }

    /// Claim the tracker. A second claim conflicts unless `force`, which
    /// replaces the stale state (the previous run is assumed dead).
    pub fn try_start(&self, triggered_by: &str, force: bool) -> Result<BatchRunState, AppError> {
        let mut guard = self.inner.write();
        if let Some(active) = guard.as_ref() {
            if !force {
                return Err(AppError::Conflict(format!(
                    "Batch run {} already active (started {})",
                    active.batch_run_id, active.started_at
                )));
            }
            warn!("Force-claiming batch tracker from run {}", active.batch_run_id);
        }
        let state = BatchRunState::new(triggered_by);
        *guard = Some(state.clone());
        Ok(state)
    }

    pub fn update(&self, f: impl FnOnce(&mut BatchRunState)) {
        if let Some(state) = self.inner.write().as_mut() {
            f(state);
        }
    }

    pub fn complete(&self) {
        *self.inner.write() = None;
    }
}

impl Default for BatchRunTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Clears the tracker on drop so every exit path (including panics inside
/// a phase) releases the run.
struct TrackerGuard(Arc<BatchRunTracker>);

impl Drop for TrackerGuard {
    fn drop(&mut self) {
        self.0.complete();
    }
}

pub struct BatchOrchestrator {
    pool: PgPool,
    provider: Arc<dyn MarketDataProvider>,
    rate_limiter: Arc<RateLimiter>,
    calendar: Arc<TradingCalendar>,
    config: BatchConfig,
    tracker: Arc<BatchRunTracker>,
}

impl BatchOrchestrator {
    pub fn new(
        pool: PgPool,
        provider: Arc<dyn MarketDataProvider>,
        rate_limiter: Arc<RateLimiter>,
        calendar: Arc<TradingCalendar>,
        config: BatchConfig,
    ) -> Self {
        Self {
            pool,
            provider,
            rate_limiter,
            calendar,
            config,
            tracker: Arc::new(BatchRunTracker::new()),
        }
    }

    pub fn tracker(&self) -> Arc<BatchRunTracker> {
        self.tracker.clone()
    }

    /// Run the daily pipeline: gap backfill per portfolio, symbol universe
    /// once per date, then the per-portfolio phase sequence under bounded
    /// concurrency. Returns a summary once every portfolio-day settled.
    pub async fn run_daily(
        &self,
        options: BatchRunOptions,
        triggered_by: &str,
    ) -> Result<BatchRunSummary, AppError> {
        self.validate_options(&options)?;

        let state = self.tracker.try_start(triggered_by, options.force)?;
        let _guard = TrackerGuard(self.tracker.clone());

        let result = self.run_inner(&options, &state).await;
        if let Err(e) = &result {
            error!("Batch run {} failed: {}", state.batch_run_id, e);
        }
        result
    }

    /// Claim the tracker, then run the pipeline on a background task.
    /// Returns the claimed run state immediately so admin callers can
    /// poll `/batch/run/current`; the guard clears the tracker whenever
    /// the task exits.
    pub fn start_background(
        self: &Arc<Self>,
        options: BatchRunOptions,
        triggered_by: &str,
    ) -> Result<BatchRunState, AppError> {
        self.validate_options(&options)?;

        let state = self.tracker.try_start(triggered_by, options.force)?;
        let this = self.clone();
        let task_state = state.clone();

        tokio::spawn(async move {
            let _guard = TrackerGuard(this.tracker.clone());
            match this.run_inner(&options, &task_state).await {
                Ok(summary) => info!(
                    "Background batch run {} finished: {} completed, {} failed",
                    summary.batch_run_id,
                    summary.portfolio_days_completed,
                    summary.portfolio_days_failed
                ),
                Err(e) => error!("Background batch run {} failed: {}", task_state.batch_run_id, e),
            }
        });

        Ok(state)
    }

    fn validate_options(&self, options: &BatchRunOptions) -> Result<(), AppError> {
        if options.force_rerun && options.start_date.is_none() {
            return Err(AppError::Validation(
                "force_rerun requires start_date".to_string(),
            ));
        }
        let today = self.calendar.most_recent_trading_day();
        for date in [options.start_date, options.end_date].into_iter().flatten() {
            if date > today {
                return Err(AppError::Validation(format!(
                    "date {} is after the most recent trading day {}",
                    date, today
                )));
            }
        }
        if let (Some(start), Some(end)) = (options.start_date, options.end_date) {
            if start > end {
                return Err(AppError::Validation("start_date is after end_date".to_string()));
            }
        }
        Ok(())
    }

    async fn run_inner(
        &self,
        options: &BatchRunOptions,
        state: &BatchRunState,
    ) -> Result<BatchRunSummary, AppError> {
        let run_date = self.calendar.most_recent_trading_day();
        let started_at = Utc::now();

        let portfolios = self.resolve_portfolios(options).await?;
        if portfolios.is_empty() {
            info!("No active portfolios, batch run {} is a no-op", state.batch_run_id);
            return Ok(self.summary(state, run_date, started_at, 0, 0, 0, 0, 0));
        }

        // Force-rerun wipes the range child-first, then rebases each
        // portfolio's equity balance to the last snapshot before the
        // range so the rollforward does not re-add realized P&L.
        if options.force_rerun {
            let start = options.start_date.expect("validated above");
            let end = options.end_date.unwrap_or(run_date);
            cleanup_queries::clear_calculation_range(&self.pool, start, end, options.portfolio_id)
                .await?;

            for portfolio in &portfolios {
                if let Some(prev) =
                    snapshot_queries::fetch_previous_snapshot(&self.pool, portfolio.id, start).await?
                {
                    if let Some(balance) = prev.equity_balance {
                        portfolio_queries::update_equity_balance(&self.pool, portfolio.id, &balance)
                            .await?;
                    }
                }
            }
        }

        // Pending (portfolio, dates) with chronological order per portfolio
        let mut pending: Vec<(Portfolio, Vec<NaiveDate>)> = Vec::new();
        for portfolio in portfolios {
            let dates = self.pending_dates(&portfolio, options, run_date).await?;
            if !dates.is_empty() {
                pending.push((portfolio, dates));
            }
        }

        let total_jobs: usize = pending.iter().map(|(_, d)| d.len()).sum();
        self.tracker.update(|s| s.total_jobs = total_jobs);

        if total_jobs == 0 {
            info!("All snapshots current, batch run {} has nothing to do", state.batch_run_id);
            return Ok(self.summary(state, run_date, started_at, 0, 0, 0, 0, 0));
        }

        let all_dates: BTreeSet<NaiveDate> =
            pending.iter().flat_map(|(_, dates)| dates.iter().copied()).collect();
        let earliest = *all_dates.iter().next().expect("non-empty");

        // One refresh covers every regression window in the run
        let cache = market_data::PriceCache::new();
        factor_queries::ensure_factor_definitions(&self.pool).await?;
        let factors = factor_queries::fetch_factor_definitions(&self.pool).await?;
        let symbols =
            symbol_universe::collect_universe_symbols(&self.pool, &factors, run_date).await?;
        let refresh_start =
            symbol_universe::lookback_start(earliest, self.config.spread_window_days);

        self.tracker.update(|s| s.current_job_name = Some("market_data_refresh".to_string()));
        market_data::refresh_symbols(
            &self.pool,
            self.provider.as_ref(),
            &self.rate_limiter,
            &cache,
            &symbols,
            refresh_start,
            run_date,
            self.config.provider_batch_size,
        )
        .await?;

        // Treasury yield series ride along with the refresh; a miss is a
        // warning, not a failed run (IR beta regresses on TLT returns)
        match self.provider.fetch_treasury_yields("DGS10", refresh_start, run_date).await {
            Ok(points) => {
                market_data_queries::upsert_treasury_yields(
                    &self.pool,
                    "DGS10",
                    self.provider.name(),
                    &points,
                )
                .await?;
            }
            Err(e) => warn!("Treasury yield refresh failed: {}", e),
        }

        // Shared read-only by all portfolios this run
        let correlations =
            stress_service::factor_correlation_matrix(&self.pool, &cache, &self.config, run_date)
                .await?;

        let mut universe_symbols = 0usize;
        let mut completed = 0usize;
        let mut skipped = 0usize;
        let mut failed = 0usize;

        for date in all_dates {
            self.tracker.update(|s| {
                s.current_job_name = Some(format!("symbol_universe {}", date));
            });
            let universe =
                symbol_universe::run_universe(&self.pool, &cache, &self.config, date).await?;
            universe_symbols = universe_symbols.max(universe.symbols_total);

            // Portfolios with this date pending, bounded fan-out. Dates
            // ascend in the outer loop, so each portfolio still sees its
            // own days in chronological order.
            let due: Vec<Portfolio> = pending
                .iter()
                .filter(|(_, dates)| dates.contains(&date))
                .map(|(p, _)| p.clone())
                .collect();

            let statuses: Vec<PortfolioDayStatus> = stream::iter(due)
                .map(|portfolio: Portfolio| {
                    let cache = &cache;
                    let correlations = &correlations;
                    async move {
                        self.track_and_process_portfolio_date(cache, correlations, &portfolio, date, options.force_rerun)
                            .await
                    }
                })
                .buffer_unordered(self.config.max_portfolio_concurrency.max(1))
                .collect()
                .await;

            for status in statuses {
                match status {
                    PortfolioDayStatus::Completed => completed += 1,
                    PortfolioDayStatus::SkippedAlreadyComplete => skipped += 1,
                    PortfolioDayStatus::Failed => failed += 1,
                }
            }
        }

        info!(
            "🏁 Batch run {} finished: {} completed, {} skipped, {} failed",
            state.batch_run_id, completed, skipped, failed
        );

        Ok(self.summary(state, run_date, started_at, pending.len(), completed, skipped, failed, universe_symbols))
    }

    #[allow(clippy::too_many_arguments)]
    fn summary(
        &self,
        state: &BatchRunState,
        run_date: NaiveDate,
        started_at: chrono::DateTime<Utc>,
        portfolios: usize,
        completed: usize,
        skipped: usize,
        failed: usize,
        universe_symbols: usize,
    ) -> BatchRunSummary {
        BatchRunSummary {
            batch_run_id: state.batch_run_id.clone(),
            run_date,
            portfolios_processed: portfolios,
            portfolio_days_completed: completed,
            portfolio_days_skipped: skipped,
            portfolio_days_failed: failed,
            universe_symbols,
            started_at,
            finished_at: Utc::now(),
        }
    }

    async fn resolve_portfolios(
        &self,
        options: &BatchRunOptions,
    ) -> Result<Vec<Portfolio>, AppError> {
        match options.portfolio_id {
            Some(id) => {
                let portfolio = portfolio_queries::fetch_portfolio(&self.pool, id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Portfolio {} not found", id)))?;
                Ok(vec![portfolio])
            }
            None => Ok(portfolio_queries::fetch_active_portfolios(&self.pool).await?),
        }
    }

    /// Trading days this portfolio still needs, in chronological order.
    ///
    /// Normal runs backfill the gap between the latest complete snapshot
    /// and the run date; force-reruns take the whole requested range.
    async fn pending_dates(
        &self,
        portfolio: &Portfolio,
        options: &BatchRunOptions,
        run_date: NaiveDate,
    ) -> Result<Vec<NaiveDate>, AppError> {
        if options.force_rerun {
            let start = options.start_date.expect("validated");
            let end = options.end_date.unwrap_or(run_date);
            return Ok(self.calendar.trading_days_between(start, end));
        }

        let latest = snapshot_queries::fetch_latest_complete_date(&self.pool, portfolio.id).await?;
        let dates = match latest {
            None => vec![run_date],
            Some(latest) if latest >= run_date => Vec::new(),
            Some(latest) => {
                let next = latest.succ_opt().unwrap_or(run_date);
                self.calendar.trading_days_between(next, run_date)
            }
        };
        Ok(dates)
    }

    /// Phases P1-P8 for one (portfolio, date). Strictly sequential; the
    /// first hard failure aborts the remaining phases and leaves any
    /// placeholder for admin cleanup.
    async fn track_and_process_portfolio_date(
        &self,
        cache: &market_data::PriceCache,
        correlations: &stress_service::FactorCorrelations,
        portfolio: &Portfolio,
        date: NaiveDate,
        force_rerun: bool,
    ) -> PortfolioDayStatus {
        self.tracker.update(|s| {
            s.current_job_name = Some(format!("portfolio_pipeline {}", date));
            s.current_portfolio_name = Some(portfolio.name.clone());
        });
        let status = self
            .process_portfolio_date(cache, correlations, portfolio, date, force_rerun)
            .await;
        self.tracker.update(|s| match status {
            PortfolioDayStatus::Failed => s.failed_jobs += 1,
            _ => s.completed_jobs += 1,
        });
        status
    }

    async fn process_portfolio_date(
        &self,
        cache: &market_data::PriceCache,
        correlations: &stress_service::FactorCorrelations,
        portfolio: &Portfolio,
        date: NaiveDate,
        force_rerun: bool,
    ) -> PortfolioDayStatus {
        match self
            .run_phases(cache, correlations, portfolio, date, force_rerun)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                error!(
                    "Portfolio {} failed on {}: {} (placeholder left for cleanup)",
                    portfolio.id, date, e
                );
                PortfolioDayStatus::Failed
            }
        }
    }

    async fn run_phases(
        &self,
        cache: &market_data::PriceCache,
        correlations: &stress_service::FactorCorrelations,
        portfolio: &Portfolio,
        date: NaiveDate,
        force_rerun: bool,
    ) -> Result<PortfolioDayStatus, AppError> {
        let pool = &self.pool;
        let config = &self.config;
        let pid = portfolio.id;

        // Idempotency gate doubles as the P5 placeholder write
        if !snapshot_service::write_placeholder(pool, pid, date, force_rerun).await? {
            return Ok(PortfolioDayStatus::SkippedAlreadyComplete);
        }

        // P1 position valuation
        snapshot_service::update_position_values(pool, cache, pid, date).await?;

        // P2 equity rollforward
        let rollforward = snapshot_service::update_equity_balance(pool, pid, date).await?;

        // P3 gross/net exposure
        let exposures = snapshot_service::aggregate_exposures(pool, cache, pid, date).await?;

        // P4 factor lookups and risk metrics; skips are recorded, not fatal
        let factor_outcome =
            factor_service::aggregate_portfolio_factors(pool, cache, pid, date, true).await?;
        if let CalcOutcome::Skipped { reason } = &factor_outcome {
            info!("Factor aggregation skipped for {} on {}: {}", pid, date, reason);
        }

        let market_beta = beta_service::portfolio_market_beta(pool, cache, config, pid, date)
            .await?
            .completed()
            .map(|b| b.beta);
        let ir_beta = beta_service::portfolio_ir_beta(pool, cache, config, pid, date)
            .await?
            .completed()
            .map(|b| b.beta);

        let sector = sector_service::sector_and_concentration(pool, cache, pid, date)
            .await?
            .completed();
        let volatility = volatility_service::portfolio_volatility(pool, cache, config, pid, date)
            .await?
            .completed();
        let greeks = snapshot_service::portfolio_greeks(pool, pid, date).await?;
        let target_price_value = snapshot_service::target_price_projection(pool, pid, date).await?;

        // P6 snapshot completion
        let metrics = SnapshotMetrics {
            market_beta,
            ir_beta,
            portfolio_delta: greeks.as_ref().map(|g| g.delta),
            portfolio_gamma: greeks.as_ref().map(|g| g.gamma),
            portfolio_theta: greeks.as_ref().map(|g| g.theta),
            portfolio_vega: greeks.as_ref().map(|g| g.vega),
            target_price_value,
            realized_vol_21d: volatility.as_ref().and_then(|v| v.realized_vol_21d),
            realized_vol_63d: volatility.as_ref().and_then(|v| v.realized_vol_63d),
            expected_vol_21d: volatility.as_ref().and_then(|v| v.expected_vol_21d),
            volatility_trend: volatility.as_ref().map(|v| v.vol_trend.clone()),
            volatility_percentile: volatility.as_ref().and_then(|v| v.vol_percentile),
            hhi: sector.as_ref().map(|s| s.hhi),
            effective_positions: sector.as_ref().map(|s| s.effective_positions),
            top3_concentration: sector.as_ref().map(|s| s.top3_concentration),
            top10_concentration: sector.as_ref().map(|s| s.top10_concentration),
            sector_exposure: sector
                .as_ref()
                .and_then(|s| serde_json::to_value(&s.sector_weights).ok()),
            ..Default::default()
        };
        snapshot_service::complete_snapshot(pool, pid, date, &exposures, &rollforward, metrics)
            .await?;

        // P7 stress tests read the exposures persisted in P4/P6
        if let CalcOutcome::Skipped { reason } =
            stress_service::run_stress_tests(pool, config, correlations, pid, date).await?
        {
            info!("Stress tests skipped for {} on {}: {}", pid, date, reason);
        }

        // P8 correlations; early dates fail gracefully and the evening
        // retry job picks them up
        match correlation_service::portfolio_correlations(pool, cache, config, pid, date).await {
            Ok(CalcOutcome::Skipped { reason }) => {
                info!("Correlations skipped for {} on {}: {}", pid, date, reason);
            }
            Ok(CalcOutcome::Completed(_)) => {}
            Err(e) => {
                warn!("Correlations failed for {} on {} (snapshot kept): {}", pid, date, e);
            }
        }

        Ok(PortfolioDayStatus::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_conflict_without_force() {
        let tracker = BatchRunTracker::new();
        let first = tracker.try_start("admin", false).unwrap();
        assert!(tracker.current().is_some());

        let second = tracker.try_start("admin", false);
        assert!(matches!(second, Err(AppError::Conflict(_))));

        // The original run is untouched
        assert_eq!(tracker.current().unwrap().batch_run_id, first.batch_run_id);
    }

    #[test]
    fn test_tracker_force_replaces_active_run() {
        let tracker = BatchRunTracker::new();
        let first = tracker.try_start("scheduler", false).unwrap();
        let second = tracker.try_start("admin", true).unwrap();
        assert_ne!(first.batch_run_id, second.batch_run_id);
        assert_eq!(tracker.current().unwrap().batch_run_id, second.batch_run_id);
    }

    #[test]
    fn test_tracker_cleared_after_complete() {
        let tracker = BatchRunTracker::new();
        tracker.try_start("admin", false).unwrap();
        tracker.complete();
        assert!(tracker.current().is_none());
        // And a fresh run can start
        assert!(tracker.try_start("admin", false).is_ok());
    }

    #[test]
    fn test_tracker_guard_clears_on_drop() {
        let tracker = Arc::new(BatchRunTracker::new());
        tracker.try_start("admin", false).unwrap();
        {
            let _guard = TrackerGuard(tracker.clone());
        }
        assert!(tracker.current().is_none());
    }

    #[test]
    fn test_tracker_update_counts() {
        let tracker = BatchRunTracker::new();
        tracker.try_start("admin", false).unwrap();
        tracker.update(|s| {
            s.total_jobs = 5;
            s.completed_jobs = 2;
        });
        let state = tracker.current().unwrap();
        assert_eq!(state.total_jobs, 5);
        assert_eq!(state.completed_jobs, 2);
    }
}
