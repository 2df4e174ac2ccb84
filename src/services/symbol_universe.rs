use chrono::{Duration, NaiveDate};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::db::{factor_queries, position_queries};
use crate::errors::AppError;
use crate::models::factor::{FactorDefinition, FactorKind, QualityFlag};
use crate::services::market_data::{self, PriceCache, ReturnMatrix};
use crate::services::regression;

pub const MARKET_BENCHMARK: &str = "SPY";
pub const RATES_BENCHMARK: &str = "TLT";

#[derive(Debug, Clone, Default)]
pub struct UniverseSummary {
    pub symbols_total: usize,
    pub symbols_computed: usize,
    pub symbols_cached: usize,
    pub symbols_insufficient: usize,
}

/// All symbols the daily run must have prices for: the position universe,
/// every factor ETF leg and the regression benchmarks.
pub async fn collect_universe_symbols(
    pool: &PgPool,
    factors: &[FactorDefinition],
    date: NaiveDate,
) -> Result<Vec<String>, AppError> {
    let mut symbols: HashSet<String> =
        position_queries::fetch_universe_symbols(pool, date).await?.into_iter().collect();

    for factor in factors {
        symbols.insert(factor.long_etf.clone());
        if let Some(short) = &factor.short_etf {
            symbols.insert(short.clone());
        }
    }
    symbols.insert(MARKET_BENCHMARK.to_string());
    symbols.insert(RATES_BENCHMARK.to_string());

    let mut symbols: Vec<String> = symbols.into_iter().collect();
    symbols.sort();
    Ok(symbols)
}

/// Calendar lookback generous enough to cover `trading_days` observations
/// (7/5 ratio plus holiday slack).
pub fn lookback_start(date: NaiveDate, trading_days: usize) -> NaiveDate {
    date - Duration::days((trading_days as i64 * 7) / 5 + 15)
}

/// Window coverage classification; `Insufficient` rows are never persisted.
pub fn classify_quality(observations: usize, min_days: usize, window_days: usize) -> Option<QualityFlag> {
    if observations >= window_days {
        Some(QualityFlag::FullHistory)
    } else if observations >= min_days {
        Some(QualityFlag::PartialHistory)
    } else {
        None
    }
}

/// Long minus short return per aligned date for one spread factor.
pub fn build_spread_series(
    etf_returns: &ReturnMatrix,
    long_etf: &str,
    short_etf: &str,
) -> Option<Vec<f64>> {
    let long = etf_returns.column(long_etf)?;
    let short = etf_returns.column(short_etf)?;
    Some(long.iter().zip(short.iter()).map(|(l, s)| l - s).collect())
}

/// Rebuild the per-symbol factor beta cache for one trading day.
///
/// Runs once per day before portfolio fan-out: every symbol's ridge and
/// spread betas are computed against the factor ETF universe and upserted
/// so portfolio aggregation becomes a pure lookup. Cost is O(|symbols|)
/// regardless of how many portfolios share a symbol.
pub async fn run_universe(
    pool: &PgPool,
    cache: &PriceCache,
    config: &BatchConfig,
    date: NaiveDate,
) -> Result<UniverseSummary, AppError> {
    factor_queries::ensure_factor_definitions(pool).await?;
    let factors = factor_queries::fetch_factor_definitions(pool).await?;

    let ridge_factors: Vec<&FactorDefinition> =
        factors.iter().filter(|f| f.factor_kind == FactorKind::Ridge).collect();
    let spread_factors: Vec<&FactorDefinition> =
        factors.iter().filter(|f| f.factor_kind == FactorKind::Spread).collect();

    let symbols = collect_universe_symbols(pool, &factors, date).await?;
    let mut summary = UniverseSummary { symbols_total: symbols.len(), ..Default::default() };

    if symbols.is_empty() {
        info!("Symbol universe empty for {}, nothing to compute", date);
        return Ok(summary);
    }

    let expected_count = (ridge_factors.len() + spread_factors.len()) as i64;
    let cached: HashSet<String> =
        factor_queries::fetch_cached_universe_symbols(pool, date, expected_count)
            .await?
            .into_iter()
            .collect();

    // One ETF return load serves every symbol regression today.
    let etf_symbols: Vec<String> = {
        let mut set: HashSet<String> = HashSet::new();
        for f in &factors {
            set.insert(f.long_etf.clone());
            if let Some(s) = &f.short_etf {
                set.insert(s.clone());
            }
        }
        let mut v: Vec<String> = set.into_iter().collect();
        v.sort();
        v
    };

    let start = lookback_start(date, config.spread_window_days);
    let etf_returns =
        market_data::get_returns(pool, Some(cache), &etf_symbols, start, date, true).await?;

    if etf_returns.is_empty() {
        warn!("No factor ETF return data available on {}, skipping universe run", date);
        return Ok(summary);
    }

    let spread_series: HashMap<Uuid, Vec<f64>> = spread_factors
        .iter()
        .filter_map(|f| {
            let short = f.short_etf.as_deref()?;
            let series = build_spread_series(&etf_returns, &f.long_etf, short)?;
            Some((f.id, series))
        })
        .collect();

    info!(
        "Running symbol universe for {}: {} symbols ({} already cached), {} aligned ETF days",
        date,
        symbols.len(),
        cached.len(),
        etf_returns.dates.len()
    );

    for symbol in &symbols {
        if cached.contains(symbol) {
            summary.symbols_cached += 1;
            continue;
        }

        let symbol_returns = market_data::get_returns(
            pool,
            Some(cache),
            std::slice::from_ref(symbol),
            start,
            date,
            false,
        )
        .await?;

        let Some((sym_dates, sym_values)) = symbol_returns.series(symbol) else {
            summary.symbols_insufficient += 1;
            continue;
        };
        let by_date: HashMap<NaiveDate, f64> =
            sym_dates.iter().copied().zip(sym_values.iter().copied()).collect();

        // Inner join with the aligned ETF dates once, reused by both fits
        let mut y_aligned = Vec::with_capacity(etf_returns.dates.len());
        let mut row_indices = Vec::with_capacity(etf_returns.dates.len());
        for (row, d) in etf_returns.dates.iter().enumerate() {
            if let Some(r) = by_date.get(d) {
                y_aligned.push(*r);
                row_indices.push(row);
            }
        }

        let persisted = persist_symbol_factors(
            pool,
            config,
            symbol,
            date,
            &y_aligned,
            &row_indices,
            &etf_returns,
            &ridge_factors,
            &spread_factors,
            &spread_series,
        )
        .await?;

        if persisted {
            summary.symbols_computed += 1;
        } else {
            summary.symbols_insufficient += 1;
        }
    }

    info!(
        "✅ Symbol universe complete for {}: {} computed, {} cached, {} insufficient",
        date, summary.symbols_computed, summary.symbols_cached, summary.symbols_insufficient
    );
    Ok(summary)
}

/// Fit and upsert all factor rows for one symbol. Returns false when no
/// factor produced a persistable beta.
#[allow(clippy::too_many_arguments)]
async fn persist_symbol_factors(
    pool: &PgPool,
    config: &BatchConfig,
    symbol: &str,
    date: NaiveDate,
    y_aligned: &[f64],
    row_indices: &[usize],
    etf_returns: &ReturnMatrix,
    ridge_factors: &[&FactorDefinition],
    spread_factors: &[&FactorDefinition],
    spread_series: &HashMap<Uuid, Vec<f64>>,
) -> Result<bool, AppError> {
    let mut persisted_any = false;

    // Ridge: joint fit over the last `ridge_window_days` aligned rows
    let ridge_window = config.ridge_window_days;
    let ridge_n = y_aligned.len().min(ridge_window);
    if let Some(quality) = classify_quality(y_aligned.len(), config.min_regression_days, ridge_window) {
        let tail = &row_indices[row_indices.len() - ridge_n..];
        let y_tail = &y_aligned[y_aligned.len() - ridge_n..];

        let x_columns: Vec<Vec<f64>> = ridge_factors
            .iter()
            .filter_map(|f| {
                let col = etf_returns.column(&f.long_etf)?;
                Some(tail.iter().map(|&row| col[row]).collect())
            })
            .collect();

        if x_columns.len() == ridge_factors.len() {
            if let Some(fit) =
                regression::ridge_regression(y_tail, &x_columns, config.ridge_lambda, config.beta_cap)
            {
                for (raw, capped) in fit.raw_betas.iter().zip(fit.betas.iter()) {
                    if raw != capped {
                        warn!("Ridge beta capped for {}: {:.3} -> {:.3}", symbol, raw, capped);
                    }
                }
                for (factor, beta) in ridge_factors.iter().zip(fit.betas.iter()) {
                    factor_queries::upsert_symbol_exposure(
                        pool,
                        symbol,
                        factor.id,
                        date,
                        *beta,
                        Some(fit.r_squared),
                        fit.observations as i32,
                        false,
                        quality,
                    )
                    .await?;
                }
                persisted_any = true;
            } else {
                debug!("Ridge fit failed for {} on {}", symbol, date);
            }
        }
    }

    // Spread: four independent univariate fits over the longer window
    for factor in spread_factors {
        let Some(series) = spread_series.get(&factor.id) else { continue };

        let spread_n = y_aligned.len().min(config.spread_window_days);
        let Some(quality) =
            classify_quality(spread_n, config.spread_min_days, config.spread_window_days)
        else {
            continue;
        };

        let tail = &row_indices[row_indices.len() - spread_n..];
        let y_tail = &y_aligned[y_aligned.len() - spread_n..];
        let x_tail: Vec<f64> = tail.iter().map(|&row| series[row]).collect();

        if let Some(fit) =
            regression::ols_single_factor(y_tail, &x_tail, config.beta_cap, config.beta_confidence)
        {
            if fit.capped {
                warn!(
                    "Spread beta capped for {} / {}: {:.3} -> {:.3}",
                    symbol, factor.name, fit.raw_beta, fit.beta
                );
            }
            factor_queries::upsert_symbol_exposure(
                pool,
                symbol,
                factor.id,
                date,
                fit.beta,
                Some(fit.r_squared),
                fit.observations as i32,
                fit.is_significant,
                quality,
            )
            .await?;
            persisted_any = true;
        }
    }

    Ok(persisted_any)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_quality_bands() {
        assert_eq!(classify_quality(60, 60, 60), Some(QualityFlag::FullHistory));
        assert_eq!(classify_quality(75, 60, 60), Some(QualityFlag::FullHistory));
        assert_eq!(classify_quality(65, 60, 180), Some(QualityFlag::PartialHistory));
        assert_eq!(classify_quality(59, 60, 180), None);
    }

    #[test]
    fn test_lookback_covers_window() {
        let date = NaiveDate::from_ymd_opt(2026, 6, 1).unwrap();
        let start = lookback_start(date, 180);
        // 180 trading days is roughly 252 calendar days
        assert!((date - start).num_days() >= 252);
    }

    #[test]
    fn test_build_spread_series() {
        let matrix = ReturnMatrix {
            dates: vec![
                NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
            ],
            symbols: vec!["VUG".to_string(), "VTV".to_string()],
            columns: vec![vec![0.02, -0.01], vec![0.005, 0.01]],
        };
        let spread = build_spread_series(&matrix, "VUG", "VTV").unwrap();
        assert!((spread[0] - 0.015).abs() < 1e-12);
        assert!((spread[1] + 0.02).abs() < 1e-12);
        assert!(build_spread_series(&matrix, "VUG", "MISSING").is_none());
    }
}
