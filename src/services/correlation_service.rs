use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::db::{correlation_queries, position_queries};
use crate::errors::{AppError, CalcOutcome};
use crate::models::correlation::{CorrelationMatrix, CorrelationPairResult};
use crate::models::position::InvestmentClass;
use crate::services::clustering;
use crate::services::market_data::{self, PriceCache, ReturnMatrix};
use crate::services::regression;
use crate::services::symbol_universe::lookback_start;

/// Log-return correlation matrix for a portfolio's PUBLIC symbols,
/// persisted with its pairwise rows and threshold clusters.
///
/// Early dates with thin history produce a skip, not an error; the 18:00
/// retry job picks them up once enough bars exist.
pub async fn portfolio_correlations(
    pool: &PgPool,
    cache: &PriceCache,
    config: &BatchConfig,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<CalcOutcome<CorrelationMatrix>, AppError> {
    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let mut symbols: Vec<String> = positions
        .iter()
        .filter(|p| p.investment_class == InvestmentClass::Public)
        .map(|p| p.symbol.clone())
        .collect();
    symbols.sort();
    symbols.dedup();

    if symbols.len() < 2 {
        return Ok(CalcOutcome::skipped("fewer_than_two_public_symbols"));
    }

    let start = lookback_start(date, config.correlation_window_days);
    let returns =
        market_data::get_log_returns(pool, Some(cache), &symbols, start, date, false).await?;

    if returns.is_empty() {
        return Ok(CalcOutcome::skipped("no_return_data"));
    }

    let matrix = pairwise_correlations(&returns, config.corr_min_pair_obs);
    if matrix.pairs.is_empty() {
        return Ok(CalcOutcome::skipped("no_pairs_met_min_observations"));
    }

    let clusters = clustering::threshold_clusters(
        &matrix.symbols,
        &matrix.matrix,
        config.cluster_corr_threshold,
    );

    correlation_queries::replace_calculation(
        pool,
        portfolio_id,
        date,
        config.correlation_window_days as i32,
        &matrix,
        &clusters,
    )
    .await?;

    info!(
        "Correlations for portfolio {} on {}: {} symbols, {} pairs, {} clusters",
        portfolio_id,
        date,
        matrix.symbols.len(),
        matrix.pairs.len(),
        clusters.len()
    );

    Ok(CalcOutcome::Completed(matrix))
}

/// Pairwise-aligned correlations: each pair inner-joins its own date sets
/// (both series must have a return on the date), and the p-value comes
/// from that same aligned sample. Pairs below `min_obs` are omitted and
/// left NaN in the matrix.
pub fn pairwise_correlations(returns: &ReturnMatrix, min_obs: usize) -> CorrelationMatrix {
    let n = returns.symbols.len();
    let mut matrix = vec![vec![f64::NAN; n]; n];
    let mut pairs = Vec::new();

    for (i, row) in matrix.iter_mut().enumerate().take(n) {
        row[i] = 1.0;
    }

    for i in 0..n {
        for j in (i + 1)..n {
            let col_i = &returns.columns[i];
            let col_j = &returns.columns[j];

            // Date-aligned inner join for this pair only
            let mut a = Vec::new();
            let mut b = Vec::new();
            for (x, y) in col_i.iter().zip(col_j.iter()) {
                if x.is_finite() && y.is_finite() {
                    a.push(*x);
                    b.push(*y);
                }
            }

            if a.len() < min_obs {
                continue;
            }

            if let Some((rho, p_value)) = regression::pearson_correlation(&a, &b) {
                matrix[i][j] = rho;
                matrix[j][i] = rho;
                pairs.push(CorrelationPairResult {
                    symbol_1: returns.symbols[i].clone(),
                    symbol_2: returns.symbols[j].clone(),
                    correlation: rho,
                    p_value,
                    observations: a.len(),
                });
            }
        }
    }

    CorrelationMatrix { symbols: returns.symbols.clone(), matrix, pairs }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix_from(columns: Vec<Vec<f64>>, symbols: &[&str]) -> ReturnMatrix {
        let n = columns.first().map(|c| c.len()).unwrap_or(0);
        ReturnMatrix {
            dates: (0..n)
                .map(|i| {
                    NaiveDate::from_ymd_opt(2026, 1, 1).unwrap() + chrono::Duration::days(i as i64)
                })
                .collect(),
            symbols: symbols.iter().map(|s| s.to_string()).collect(),
            columns,
        }
    }

    fn wave(n: usize, scale: f64) -> Vec<f64> {
        (0..n).map(|i| ((i * 37) % 97) as f64 / 97.0 * scale - scale / 2.0).collect()
    }

    #[test]
    fn test_perfectly_correlated_pair() {
        let a = wave(60, 0.02);
        let b: Vec<f64> = a.iter().map(|v| v * 2.0).collect();
        let returns = matrix_from(vec![a, b], &["A", "B"]);

        let result = pairwise_correlations(&returns, 30);
        assert_eq!(result.pairs.len(), 1);
        let pair = &result.pairs[0];
        assert!((pair.correlation - 1.0).abs() < 1e-9);
        assert_eq!(pair.observations, 60);
    }

    #[test]
    fn test_matrix_symmetric_unit_diagonal() {
        let a = wave(60, 0.02);
        let b: Vec<f64> = a.iter().map(|v| -v).collect();
        let c = wave(60, 0.015).iter().map(|v| v * 0.5 + 0.001).collect();
        let returns = matrix_from(vec![a, b, c], &["A", "B", "C"]);

        let result = pairwise_correlations(&returns, 30);
        let m = &result.matrix;
        for i in 0..3 {
            assert_eq!(m[i][i], 1.0);
            for j in 0..3 {
                if m[i][j].is_finite() {
                    assert!((m[i][j] - m[j][i]).abs() < 1e-12);
                    assert!(m[i][j] >= -1.0 && m[i][j] <= 1.0);
                }
            }
        }
    }

    #[test]
    fn test_pair_below_min_obs_is_omitted() {
        // B only overlaps A on 10 dates
        let mut a = wave(40, 0.02);
        let mut b = vec![f64::NAN; 40];
        for (i, item) in b.iter_mut().enumerate().take(10) {
            *item = a[i] * 0.8;
        }
        a.truncate(40);
        let returns = matrix_from(vec![a, b], &["A", "B"]);

        let result = pairwise_correlations(&returns, 30);
        assert!(result.pairs.is_empty());
        assert!(result.matrix[0][1].is_nan());
    }

    #[test]
    fn test_pairwise_alignment_uses_common_dates_only() {
        // A and B correlate perfectly on their shared dates; A's extra
        // dates carry no B return and must drop out of the pair sample.
        let a = wave(80, 0.02);
        let mut b: Vec<f64> = a.clone();
        for item in b.iter_mut().take(20) {
            *item = f64::NAN;
        }
        let returns = matrix_from(vec![a, b], &["A", "B"]);
        let result = pairwise_correlations(&returns, 30);
        assert_eq!(result.pairs.len(), 1);
        assert!((result.pairs[0].correlation - 1.0).abs() < 1e-9);
        assert_eq!(result.pairs[0].observations, 60);
    }
}
