use chrono::NaiveDate;
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::db::{position_queries, profile_queries};
use crate::errors::{AppError, CalcOutcome};
use crate::models::position::InvestmentClass;
use crate::services::market_data::{self, PriceCache};

/// Portfolio sector exposure versus the benchmark plus concentration
/// metrics for one portfolio-date.
#[derive(Debug, Clone, Serialize)]
pub struct SectorConcentration {
    pub sector_weights: HashMap<String, f64>,
    pub benchmark_weights: HashMap<String, f64>,
    /// sector -> portfolio weight minus benchmark weight
    pub active_weights: HashMap<String, f64>,
    pub hhi: f64,
    pub effective_positions: f64,
    pub top3_concentration: f64,
    pub top10_concentration: f64,
}

/// Herfindahl-Hirschman Index over position weights, scaled by 10,000.
/// 10,000 = single position; 1,000 = ten equal positions.
pub fn calculate_hhi(weights: &[f64]) -> f64 {
    weights.iter().map(|w| w * w).sum::<f64>() * 10_000.0
}

pub fn effective_positions(hhi: f64) -> f64 {
    if hhi <= 0.0 {
        0.0
    } else {
        10_000.0 / hhi
    }
}

/// Sum of the k largest weights (weights need not be sorted).
pub fn top_k_concentration(weights: &[f64], k: usize) -> f64 {
    let mut sorted: Vec<f64> = weights.to_vec();
    sorted.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    sorted.iter().take(k).sum()
}

/// Static S&P 500 sector weights used as the comparison benchmark when no
/// fresher set has been loaded.
pub fn default_benchmark_weights() -> HashMap<String, f64> {
    [
        ("Information Technology", 0.31),
        ("Financials", 0.13),
        ("Health Care", 0.12),
        ("Consumer Discretionary", 0.10),
        ("Communication Services", 0.09),
        ("Industrials", 0.08),
        ("Consumer Staples", 0.06),
        ("Energy", 0.04),
        ("Utilities", 0.025),
        ("Real Estate", 0.023),
        ("Materials", 0.022),
    ]
    .into_iter()
    .map(|(s, w)| (s.to_string(), w))
    .collect()
}

/// Sector and concentration metrics over active positions.
///
/// Sector weights use absolute market value shares; positions without a
/// profile roll into "Unknown". Concentration uses absolute weights so
/// shorts concentrate rather than net out.
pub async fn sector_and_concentration(
    pool: &PgPool,
    cache: &PriceCache,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<CalcOutcome<SectorConcentration>, AppError> {
    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let marketable: Vec<_> = positions
        .iter()
        .filter(|p| p.investment_class != InvestmentClass::Private)
        .collect();

    if marketable.is_empty() {
        return Ok(CalcOutcome::skipped("no_public_positions"));
    }

    let symbols: Vec<String> = {
        let mut v: Vec<String> = marketable.iter().map(|p| p.symbol.clone()).collect();
        v.sort();
        v.dedup();
        v
    };
    let sector_map = profile_queries::fetch_sector_map(pool, &symbols).await?;

    let mut values = Vec::with_capacity(marketable.len());
    for position in &marketable {
        let close =
            market_data::latest_close(pool, Some(cache), position.returns_symbol(), date).await?;
        values.push((position, market_data::position_value(position, close, false)));
    }

    let gross: f64 = values.iter().map(|(_, v)| v).sum();
    if gross <= 0.0 {
        return Ok(CalcOutcome::skipped("zero_gross_value"));
    }

    let position_weights: Vec<f64> = values.iter().map(|(_, v)| v / gross).collect();

    let mut sector_weights: HashMap<String, f64> = HashMap::new();
    for (position, value) in &values {
        let sector = sector_map
            .get(&position.symbol)
            .cloned()
            .unwrap_or_else(|| "Unknown".to_string());
        *sector_weights.entry(sector).or_insert(0.0) += value / gross;
    }

    let benchmark_weights = default_benchmark_weights();
    let mut active_weights = HashMap::new();
    for (sector, weight) in &sector_weights {
        let bench = benchmark_weights.get(sector).copied().unwrap_or(0.0);
        active_weights.insert(sector.clone(), weight - bench);
    }
    for (sector, bench) in &benchmark_weights {
        active_weights.entry(sector.clone()).or_insert(-bench);
    }

    let hhi = calculate_hhi(&position_weights);

    Ok(CalcOutcome::Completed(SectorConcentration {
        sector_weights,
        benchmark_weights,
        active_weights,
        hhi,
        effective_positions: effective_positions(hhi),
        top3_concentration: top_k_concentration(&position_weights, 3),
        top10_concentration: top_k_concentration(&position_weights, 10),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hhi_reference_values() {
        // {0.5, 0.3, 0.2} => 3,800
        let hhi = calculate_hhi(&[0.5, 0.3, 0.2]);
        assert!((hhi - 3_800.0).abs() < 1e-9);

        // Effective positions = 10,000 / 3,800 ~= 2.63
        let eff = effective_positions(hhi);
        assert!((eff - 2.6315789).abs() < 1e-4);
    }

    #[test]
    fn test_hhi_single_position() {
        assert_eq!(calculate_hhi(&[1.0]), 10_000.0);
        assert_eq!(effective_positions(10_000.0), 1.0);
    }

    #[test]
    fn test_hhi_ten_equal_positions() {
        let weights = vec![0.1; 10];
        assert!((calculate_hhi(&weights) - 1_000.0).abs() < 1e-9);
        assert!((effective_positions(1_000.0) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_k_concentration() {
        let weights = [0.5, 0.3, 0.2];
        assert!((top_k_concentration(&weights, 3) - 1.0).abs() < 1e-12);
        assert!((top_k_concentration(&weights, 2) - 0.8).abs() < 1e-12);
        // k beyond len just sums everything
        assert!((top_k_concentration(&weights, 10) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_effective_positions_zero_hhi() {
        assert_eq!(effective_positions(0.0), 0.0);
    }

    #[test]
    fn test_benchmark_weights_roughly_sum_to_one() {
        let total: f64 = default_benchmark_weights().values().sum();
        assert!(total > 0.95 && total < 1.05, "benchmark weights sum to {}", total);
    }
}
