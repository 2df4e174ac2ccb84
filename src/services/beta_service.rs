use bigdecimal::ToPrimitive;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::db::{factor_queries, portfolio_queries, position_queries};
use crate::errors::{AppError, CalcOutcome};
use crate::models::position::{InvestmentClass, Position};
use crate::services::market_data::{self, PriceCache};
use crate::services::regression;
use crate::services::symbol_universe::{lookback_start, MARKET_BENCHMARK, RATES_BENCHMARK};

#[derive(Debug, Clone)]
pub struct PortfolioBeta {
    pub beta: f64,
    pub positions_count: usize,
    pub min_observations: usize,
}

/// Equity-weighted portfolio beta against SPY.
pub async fn portfolio_market_beta(
    pool: &PgPool,
    cache: &PriceCache,
    config: &BatchConfig,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<CalcOutcome<PortfolioBeta>, AppError> {
    portfolio_benchmark_beta(pool, cache, config, portfolio_id, date, MARKET_BENCHMARK).await
}

/// Equity-weighted portfolio beta against TLT returns. Typically negative
/// for equity-heavy books.
pub async fn portfolio_ir_beta(
    pool: &PgPool,
    cache: &PriceCache,
    config: &BatchConfig,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<CalcOutcome<PortfolioBeta>, AppError> {
    portfolio_benchmark_beta(pool, cache, config, portfolio_id, date, RATES_BENCHMARK).await
}

/// Position-first benchmark beta:
/// 1. resolve active PUBLIC positions,
/// 2. bulk-load cached per-position betas for (position, date, benchmark),
/// 3. regress only the uncached positions and persist immediately,
/// 4. aggregate with signed equity weights.
async fn portfolio_benchmark_beta(
    pool: &PgPool,
    cache: &PriceCache,
    config: &BatchConfig,
    portfolio_id: Uuid,
    date: NaiveDate,
    benchmark: &str,
) -> Result<CalcOutcome<PortfolioBeta>, AppError> {
    let portfolio = portfolio_queries::fetch_portfolio(pool, portfolio_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Portfolio {} not found", portfolio_id)))?;

    let equity = portfolio.equity_balance.to_f64().unwrap_or(0.0);
    if equity <= 0.0 {
        return Ok(CalcOutcome::skipped("invalid_equity_balance"));
    }

    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let public: Vec<&Position> = positions
        .iter()
        .filter(|p| p.investment_class == InvestmentClass::Public)
        .collect();

    if public.is_empty() {
        return Ok(CalcOutcome::skipped("no_public_positions"));
    }

    let position_ids: Vec<Uuid> = public.iter().map(|p| p.id).collect();
    let cached_rows =
        factor_queries::fetch_position_benchmark_betas(pool, &position_ids, date, benchmark).await?;
    let mut betas: HashMap<Uuid, (f64, usize)> = cached_rows
        .into_iter()
        .filter_map(|row| {
            let beta = row.beta.to_f64()?;
            Some((row.position_id, (beta, row.observations as usize)))
        })
        .collect();

    let uncached: Vec<&&Position> = public.iter().filter(|p| !betas.contains_key(&p.id)).collect();

    if !uncached.is_empty() {
        let start = lookback_start(date, config.market_beta_window_days);

        let bench_returns = market_data::get_returns(
            pool,
            Some(cache),
            &[benchmark.to_string()],
            start,
            date,
            false,
        )
        .await?;
        let Some((bench_dates, bench_values)) = bench_returns.series(benchmark) else {
            warn!("No {} return data for beta calculation on {}", benchmark, date);
            return Ok(CalcOutcome::skipped("no_benchmark_data"));
        };
        let bench_by_date: HashMap<NaiveDate, f64> =
            bench_dates.iter().copied().zip(bench_values.iter().copied()).collect();

        for position in uncached {
            let symbol = position.returns_symbol();
            let symbol_returns = market_data::get_returns(
                pool,
                Some(cache),
                &[symbol.to_string()],
                start,
                date,
                false,
            )
            .await?;
            let Some((dates, values)) = symbol_returns.series(symbol) else {
                debug!("No return data for {} ({})", symbol, position.id);
                continue;
            };

            // Align on common dates, then trim to the regression window
            let mut y = Vec::new();
            let mut x = Vec::new();
            for (d, v) in dates.iter().zip(values.iter()) {
                if let Some(b) = bench_by_date.get(d) {
                    y.push(*v);
                    x.push(*b);
                }
            }
            let window = config.market_beta_window_days;
            if y.len() > window {
                y.drain(..y.len() - window);
                x.drain(..x.len() - window);
            }

            if y.len() < config.min_regression_days {
                debug!(
                    "Insufficient aligned data for {} vs {}: {} days",
                    symbol,
                    benchmark,
                    y.len()
                );
                continue;
            }

            let Some(fit) =
                regression::ols_single_factor(&y, &x, config.beta_cap, config.beta_confidence)
            else {
                continue;
            };

            if fit.capped {
                warn!(
                    "Beta capped for {} vs {}: {:.3} -> {:.3}",
                    symbol, benchmark, fit.raw_beta, fit.beta
                );
            }
            debug!(
                "{} vs {}: beta={:.3} alpha={:.5} r2={:.3} n={}",
                symbol, benchmark, fit.beta, fit.alpha, fit.r_squared, fit.observations
            );

            factor_queries::upsert_position_benchmark_beta(
                pool,
                position.id,
                date,
                benchmark,
                fit.beta,
                Some(fit.r_squared),
                fit.p_value,
                fit.observations as i32,
                fit.is_significant,
            )
            .await?;

            betas.insert(position.id, (fit.beta, fit.observations));
        }
    }

    if betas.is_empty() {
        return Ok(CalcOutcome::skipped("no_position_betas"));
    }

    // Signed equity weights over positions that have a beta
    let mut portfolio_beta = 0.0;
    let mut min_observations = usize::MAX;
    for position in &public {
        let Some((beta, observations)) = betas.get(&position.id) else { continue };
        let close =
            market_data::latest_close(pool, Some(cache), position.returns_symbol(), date).await?;
        let weight = market_data::position_value(position, close, true) / equity;
        portfolio_beta += beta * weight;
        min_observations = min_observations.min(*observations);
    }

    info!(
        "Portfolio {} beta vs {}: {:.3} ({} positions)",
        portfolio_id,
        benchmark,
        portfolio_beta,
        betas.len()
    );

    Ok(CalcOutcome::Completed(PortfolioBeta {
        beta: portfolio_beta,
        positions_count: betas.len(),
        min_observations: if min_observations == usize::MAX { 0 } else { min_observations },
    }))
}
