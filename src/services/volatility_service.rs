use bigdecimal::ToPrimitive;
use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::db::{factor_queries, portfolio_queries, position_queries};
use crate::errors::{AppError, CalcOutcome};
use crate::models::position::InvestmentClass;
use crate::services::market_data::{self, PriceCache};

pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const VOL_LOOKBACK_TRADING_DAYS: usize = 252;
const MIN_VOL_OBSERVATIONS: usize = 63;

#[derive(Debug, Clone)]
pub struct VolatilityMetrics {
    pub realized_vol_21d: Option<f64>,
    pub realized_vol_63d: Option<f64>,
    pub expected_vol_21d: Option<f64>,
    pub vol_trend: String,
    pub vol_percentile: Option<f64>,
    pub observations: usize,
}

/// Annualised standard deviation of the last `window` returns.
pub fn realized_vol(returns: &[f64], window: usize) -> Option<f64> {
    if returns.len() < window.min(2) || window < 2 {
        return None;
    }
    let tail = &returns[returns.len().saturating_sub(window)..];
    let n = tail.len() as f64;
    let mean = tail.iter().sum::<f64>() / n;
    let variance = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    Some(variance.sqrt() * TRADING_DAYS_PER_YEAR.sqrt())
}

/// HAR(1,5,21) one-step forecast of annualised volatility.
///
/// Fits `v_{t+1} = c + bd*v_t + bw*mean(v_{t-4..t}) + bm*mean(v_{t-20..t})`
/// by least squares over the trailing history, where `v_t` is the
/// annualised absolute-return proxy. Falls back to 21-day realized vol
/// when the sample is too short for a stable fit.
pub fn har_forecast(returns: &[f64]) -> (Option<f64>, f64) {
    let v: Vec<f64> = returns.iter().map(|r| r.abs() * TRADING_DAYS_PER_YEAR.sqrt()).collect();
    let n = v.len();

    if n < 45 {
        return (realized_vol(returns, 21), 0.0);
    }

    let window_mean = |end: usize, len: usize| -> f64 {
        let start = end + 1 - len;
        v[start..=end].iter().sum::<f64>() / len as f64
    };

    let mut rows = Vec::new();
    let mut targets = Vec::new();
    for t in 20..n - 1 {
        rows.push([1.0, v[t], window_mean(t, 5), window_mean(t, 21)]);
        targets.push(v[t + 1]);
    }

    let m = rows.len();
    let x = DMatrix::from_fn(m, 4, |i, j| rows[i][j]);
    let y = DVector::from_vec(targets);

    let xtx = x.transpose() * &x;
    let xty = x.transpose() * &y;
    let Some(coef) = xtx.lu().solve(&xty) else {
        return (realized_vol(returns, 21), 0.0);
    };

    let fitted = &x * &coef;
    let mean_y = y.iter().sum::<f64>() / m as f64;
    let sse = (&y - &fitted).norm_squared();
    let sst = y.iter().map(|v| (v - mean_y).powi(2)).sum::<f64>();
    let r_squared = if sst > f64::EPSILON { (1.0 - sse / sst).clamp(0.0, 1.0) } else { 0.0 };

    let last = n - 1;
    let forecast =
        coef[0] + coef[1] * v[last] + coef[2] * window_mean(last, 5) + coef[3] * window_mean(last, 21);

    (Some(forecast.max(0.0)), r_squared)
}

/// Direction of the rolling 21-day vol over the recent past, from the
/// slope of a linear fit on the rolling series.
pub fn vol_trend(returns: &[f64]) -> String {
    let rolling = rolling_vol_series(returns, 21);
    let recent: Vec<f64> = rolling.iter().rev().take(21).rev().copied().collect();
    if recent.len() < 5 {
        return "stable".to_string();
    }

    let n = recent.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = recent.iter().sum::<f64>() / n;
    let mut s_xy = 0.0;
    let mut s_xx = 0.0;
    for (i, y) in recent.iter().enumerate() {
        let dx = i as f64 - mean_x;
        s_xy += dx * (y - mean_y);
        s_xx += dx * dx;
    }
    if s_xx < f64::EPSILON || mean_y < f64::EPSILON {
        return "stable".to_string();
    }

    // Slope per step relative to the level
    let relative_slope = (s_xy / s_xx) / mean_y;
    if relative_slope > 0.005 {
        "increasing".to_string()
    } else if relative_slope < -0.005 {
        "decreasing".to_string()
    } else {
        "stable".to_string()
    }
}

/// Percentile (0..1) of the current 21-day vol within its one-year
/// rolling distribution.
pub fn vol_percentile(returns: &[f64]) -> Option<f64> {
    let rolling = rolling_vol_series(returns, 21);
    if rolling.len() < 2 {
        return None;
    }
    let current = *rolling.last()?;
    let below = rolling.iter().filter(|v| **v <= current).count();
    Some(below as f64 / rolling.len() as f64)
}

fn rolling_vol_series(returns: &[f64], window: usize) -> Vec<f64> {
    if returns.len() < window {
        return Vec::new();
    }
    (window..=returns.len())
        .filter_map(|end| realized_vol(&returns[..end], window))
        .collect()
}

pub fn metrics_from_returns(returns: &[f64]) -> VolatilityMetrics {
    let (expected, _r2) = har_forecast(returns);
    VolatilityMetrics {
        realized_vol_21d: realized_vol(returns, 21),
        realized_vol_63d: realized_vol(returns, 63),
        expected_vol_21d: expected,
        vol_trend: vol_trend(returns),
        vol_percentile: vol_percentile(returns),
        observations: returns.len(),
    }
}

/// Position-first volatility for a portfolio-date: per-position metrics
/// are cached and persisted, then portfolio volatility is computed from
/// the weighted return series (portfolio vol is NOT the weighted average
/// of position vols).
pub async fn portfolio_volatility(
    pool: &PgPool,
    cache: &PriceCache,
    config: &BatchConfig,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<CalcOutcome<VolatilityMetrics>, AppError> {
    let portfolio = portfolio_queries::fetch_portfolio(pool, portfolio_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Portfolio {} not found", portfolio_id)))?;
    let equity = portfolio.equity_balance.to_f64().unwrap_or(0.0);
    if equity <= 0.0 {
        return Ok(CalcOutcome::skipped("invalid_equity_balance"));
    }

    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let marketable: Vec<_> = positions
        .iter()
        .filter(|p| p.investment_class != InvestmentClass::Private)
        .collect();

    if marketable.is_empty() {
        return Ok(CalcOutcome::skipped("no_public_positions"));
    }

    let start = date - chrono::Duration::days((VOL_LOOKBACK_TRADING_DAYS as i64 * 7) / 5 + 15);

    // Options measure volatility on the underlying's returns
    let symbols: Vec<String> = {
        let mut set: Vec<String> =
            marketable.iter().map(|p| p.returns_symbol().to_string()).collect();
        set.sort();
        set.dedup();
        set
    };

    let matrix = market_data::get_returns(pool, Some(cache), &symbols, start, date, false).await?;
    if matrix.is_empty() {
        return Ok(CalcOutcome::skipped("no_return_data"));
    }

    // Per-position metrics, cached rows first
    let position_ids: Vec<Uuid> = marketable.iter().map(|p| p.id).collect();
    let cached: HashMap<Uuid, ()> =
        factor_queries::fetch_position_volatilities(pool, &position_ids, date)
            .await?
            .into_iter()
            .map(|row| (row.position_id, ()))
            .collect();

    for position in &marketable {
        if cached.contains_key(&position.id) {
            continue;
        }
        let Some((_, values)) = matrix.series(position.returns_symbol()) else {
            debug!("No return series for {}", position.returns_symbol());
            continue;
        };
        if values.len() < MIN_VOL_OBSERVATIONS.min(config.min_regression_days) {
            continue;
        }
        let metrics = metrics_from_returns(&values);
        factor_queries::upsert_position_volatility(
            pool,
            position.id,
            date,
            metrics.realized_vol_21d,
            metrics.realized_vol_63d,
            metrics.expected_vol_21d,
            Some(&metrics.vol_trend),
            metrics.vol_percentile,
            metrics.observations as i32,
        )
        .await?;
    }

    // Portfolio return series from signed equity weights
    let mut weights: HashMap<String, f64> = HashMap::new();
    for position in &marketable {
        let close =
            market_data::latest_close(pool, Some(cache), position.returns_symbol(), date).await?;
        let signed = market_data::position_value(position, close, true);
        *weights.entry(position.returns_symbol().to_string()).or_insert(0.0) += signed / equity;
    }

    let portfolio_returns = weighted_portfolio_returns(&matrix, &weights);
    if portfolio_returns.len() < MIN_VOL_OBSERVATIONS {
        return Ok(CalcOutcome::skipped("insufficient_portfolio_returns"));
    }

    let metrics = metrics_from_returns(&portfolio_returns);
    info!(
        "Portfolio {} volatility: 21d={:?} 63d={:?} trend={}",
        portfolio_id, metrics.realized_vol_21d, metrics.realized_vol_63d, metrics.vol_trend
    );
    Ok(CalcOutcome::Completed(metrics))
}

/// Weighted daily portfolio returns; a date contributes only when every
/// weighted symbol has a return on it.
pub fn weighted_portfolio_returns(
    matrix: &market_data::ReturnMatrix,
    weights: &HashMap<String, f64>,
) -> Vec<f64> {
    let columns: Vec<(&[f64], f64)> = matrix
        .symbols
        .iter()
        .enumerate()
        .filter_map(|(i, s)| weights.get(s).map(|w| (matrix.columns[i].as_slice(), *w)))
        .collect();

    if columns.is_empty() {
        return Vec::new();
    }

    let mut out = Vec::new();
    'rows: for row in 0..matrix.dates.len() {
        let mut total = 0.0;
        for (col, w) in &columns {
            let r = col[row];
            if !r.is_finite() {
                continue 'rows;
            }
            total += w * r;
        }
        out.push(total);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alternating_returns(n: usize, magnitude: f64) -> Vec<f64> {
        (0..n).map(|i| if i % 2 == 0 { magnitude } else { -magnitude }).collect()
    }

    #[test]
    fn test_realized_vol_flat_series() {
        let returns = vec![0.0; 63];
        let vol = realized_vol(&returns, 21).unwrap();
        assert_eq!(vol, 0.0);
    }

    #[test]
    fn test_realized_vol_annualization() {
        // Alternating +-1% has a daily std of ~1%
        let returns = alternating_returns(100, 0.01);
        let vol = realized_vol(&returns, 21).unwrap();
        let expected = 0.01 * TRADING_DAYS_PER_YEAR.sqrt();
        assert!((vol - expected).abs() / expected < 0.05, "vol = {}", vol);
    }

    #[test]
    fn test_realized_vol_insufficient_window() {
        assert!(realized_vol(&[0.01], 21).is_none());
    }

    #[test]
    fn test_har_forecast_tracks_level() {
        let returns = alternating_returns(300, 0.01);
        let (forecast, _r2) = har_forecast(&returns);
        let forecast = forecast.unwrap();
        let level = 0.01 * TRADING_DAYS_PER_YEAR.sqrt();
        assert!(
            (forecast - level).abs() / level < 0.25,
            "forecast {} should be near {}",
            forecast,
            level
        );
    }

    #[test]
    fn test_har_short_sample_falls_back() {
        let returns = alternating_returns(30, 0.02);
        let (forecast, r2) = har_forecast(&returns);
        assert!(forecast.is_some());
        assert_eq!(r2, 0.0);
    }

    #[test]
    fn test_vol_trend_increasing() {
        // Magnitude ramps up over time
        let returns: Vec<f64> = (0..120)
            .map(|i| {
                let mag = 0.005 + (i as f64) * 0.0004;
                if i % 2 == 0 { mag } else { -mag }
            })
            .collect();
        assert_eq!(vol_trend(&returns), "increasing");
    }

    #[test]
    fn test_vol_trend_stable() {
        let returns = alternating_returns(120, 0.01);
        assert_eq!(vol_trend(&returns), "stable");
    }

    #[test]
    fn test_vol_percentile_bounds() {
        let returns: Vec<f64> = (0..260)
            .map(|i| {
                let mag = 0.005 + (i as f64) * 0.0002;
                if i % 2 == 0 { mag } else { -mag }
            })
            .collect();
        let pct = vol_percentile(&returns).unwrap();
        assert!(pct > 0.9, "rising vol should sit near the top percentile, got {}", pct);
    }

    #[test]
    fn test_weighted_portfolio_returns_skips_incomplete_rows() {
        let matrix = market_data::ReturnMatrix {
            dates: vec![
                NaiveDate::from_ymd_opt(2026, 1, 6).unwrap(),
                NaiveDate::from_ymd_opt(2026, 1, 7).unwrap(),
            ],
            symbols: vec!["A".to_string(), "B".to_string()],
            columns: vec![vec![0.01, 0.02], vec![0.03, f64::NAN]],
        };
        let weights = HashMap::from([("A".to_string(), 0.5), ("B".to_string(), 0.5)]);
        let returns = weighted_portfolio_returns(&matrix, &weights);
        assert_eq!(returns.len(), 1);
        assert!((returns[0] - 0.02).abs() < 1e-12);
    }
}
