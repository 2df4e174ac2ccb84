use bigdecimal::ToPrimitive;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{factor_queries, greeks_queries, portfolio_queries, position_queries};
use crate::errors::{AppError, CalcOutcome};
use crate::models::position::InvestmentClass;
use crate::services::market_data::{self, PriceCache};

/// Signed weight of one position against portfolio equity, with the
/// option delta when delta-adjusted aggregation applies.
#[derive(Debug, Clone)]
pub struct PositionWeight {
    pub position_id: Uuid,
    pub symbol: String,
    pub weight: f64,
    pub delta: Option<f64>,
    pub is_option: bool,
}

#[derive(Debug, Clone)]
pub struct FactorAggregation {
    pub factor_betas: HashMap<Uuid, f64>,
    pub positions_count: usize,
    pub symbols_with_betas: usize,
    pub symbols_missing: usize,
}

/// Aggregate cached symbol betas to the portfolio: a lookup, not a
/// regression. Assumes the universe job already ran for `date`.
///
/// Betas aggregate by signed weight; short option deltas are not flipped
/// here because the signed market value already carries the direction.
pub async fn aggregate_portfolio_factors(
    pool: &PgPool,
    cache: &PriceCache,
    portfolio_id: Uuid,
    date: NaiveDate,
    delta_adjusted: bool,
) -> Result<CalcOutcome<FactorAggregation>, AppError> {
    let portfolio = portfolio_queries::fetch_portfolio(pool, portfolio_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Portfolio {} not found", portfolio_id)))?;

    let equity = portfolio.equity_balance.to_f64().unwrap_or(0.0);
    if equity <= 0.0 {
        warn!("Portfolio {} has non-positive equity balance, skipping factors", portfolio_id);
        return Ok(CalcOutcome::skipped("invalid_equity_balance"));
    }

    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let eligible: Vec<_> = positions
        .iter()
        .filter(|p| {
            matches!(p.investment_class, InvestmentClass::Public | InvestmentClass::Options)
        })
        .collect();

    if eligible.is_empty() {
        return Ok(CalcOutcome::skipped("no_public_positions"));
    }

    // Deltas only matter for option positions
    let option_ids: Vec<Uuid> =
        eligible.iter().filter(|p| p.position_type.is_option()).map(|p| p.id).collect();
    let deltas = greeks_queries::fetch_deltas(pool, &option_ids, date).await?;

    let mut weights = Vec::with_capacity(eligible.len());
    for position in &eligible {
        // Positions were marked in the valuation phase; trust the stored
        // value and fall back to a fresh close only when it is absent.
        let signed_value = if position.market_value.is_some() {
            market_data::position_value_cached(position, true)
        } else {
            let close =
                market_data::latest_close(pool, Some(cache), position.returns_symbol(), date).await?;
            market_data::position_value(position, close, true)
        };
        weights.push(PositionWeight {
            position_id: position.id,
            symbol: position.returns_symbol().to_string(),
            weight: signed_value / equity,
            delta: deltas.get(&position.id).copied(),
            is_option: position.position_type.is_option(),
        });
    }

    let symbols: Vec<String> = {
        let set: HashSet<String> = weights.iter().map(|w| w.symbol.clone()).collect();
        let mut v: Vec<String> = set.into_iter().collect();
        v.sort();
        v
    };

    let symbol_betas = factor_queries::fetch_symbol_betas(pool, &symbols, date).await?;
    if symbol_betas.is_empty() {
        return Ok(CalcOutcome::skipped("no_symbol_betas"));
    }

    let aggregation = aggregate_symbol_betas(&weights, &symbol_betas, delta_adjusted);

    for (factor_id, beta) in &aggregation.factor_betas {
        factor_queries::upsert_portfolio_exposure(
            pool,
            portfolio_id,
            *factor_id,
            date,
            *beta,
            beta * equity,
        )
        .await?;
    }

    info!(
        "Aggregated {} factors for portfolio {} ({} positions, {} symbols missing betas)",
        aggregation.factor_betas.len(),
        portfolio_id,
        aggregation.positions_count,
        aggregation.symbols_missing
    );

    Ok(CalcOutcome::Completed(aggregation))
}

/// `beta_P[f] = sum(w_i * beta_sym_i[f])`, options optionally scaled by
/// delta. Symbols without a cached beta contribute zero and are counted
/// as missing coverage.
pub fn aggregate_symbol_betas(
    weights: &[PositionWeight],
    symbol_betas: &HashMap<String, HashMap<Uuid, f64>>,
    delta_adjusted: bool,
) -> FactorAggregation {
    let factor_ids: HashSet<Uuid> =
        symbol_betas.values().flat_map(|m| m.keys().copied()).collect();

    let mut factor_totals: HashMap<Uuid, f64> =
        factor_ids.iter().map(|id| (*id, 0.0)).collect();

    let mut symbols_with = HashSet::new();
    let mut symbols_missing = HashSet::new();

    for pw in weights {
        let Some(betas) = symbol_betas.get(&pw.symbol) else {
            symbols_missing.insert(pw.symbol.clone());
            continue;
        };
        symbols_with.insert(pw.symbol.clone());

        let effective_weight = if delta_adjusted && pw.is_option {
            match pw.delta {
                Some(delta) => pw.weight * delta,
                None => pw.weight,
            }
        } else {
            pw.weight
        };

        for (factor_id, beta) in betas {
            *factor_totals.entry(*factor_id).or_insert(0.0) += effective_weight * beta;
        }
    }

    FactorAggregation {
        factor_betas: factor_totals,
        positions_count: weights.len(),
        symbols_with_betas: symbols_with.len(),
        symbols_missing: symbols_missing.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn weight(symbol: &str, w: f64) -> PositionWeight {
        PositionWeight {
            position_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            weight: w,
            delta: None,
            is_option: false,
        }
    }

    fn option_weight(symbol: &str, w: f64, delta: Option<f64>) -> PositionWeight {
        PositionWeight {
            position_id: Uuid::new_v4(),
            symbol: symbol.to_string(),
            weight: w,
            delta,
            is_option: true,
        }
    }

    #[test]
    fn test_weighted_sum_matches_independent_resum() {
        let factor = Uuid::new_v4();
        let mut betas = HashMap::new();
        betas.insert("AAPL".to_string(), HashMap::from([(factor, 1.2)]));
        betas.insert("SPY".to_string(), HashMap::from([(factor, 1.0)]));

        let weights = vec![weight("AAPL", 0.032), weight("SPY", 0.045)];
        let agg = aggregate_symbol_betas(&weights, &betas, false);

        let expected = 0.032 * 1.2 + 0.045 * 1.0;
        assert!((agg.factor_betas[&factor] - expected).abs() < 1e-4);
        assert_eq!(agg.symbols_with_betas, 2);
        assert_eq!(agg.symbols_missing, 0);
    }

    #[test]
    fn test_missing_symbol_contributes_zero() {
        let factor = Uuid::new_v4();
        let mut betas = HashMap::new();
        betas.insert("AAPL".to_string(), HashMap::from([(factor, 2.0)]));

        let weights = vec![weight("AAPL", 0.5), weight("UNKNOWN", 0.5)];
        let agg = aggregate_symbol_betas(&weights, &betas, false);

        assert!((agg.factor_betas[&factor] - 1.0).abs() < 1e-12);
        assert_eq!(agg.symbols_missing, 1);
    }

    #[test]
    fn test_delta_adjustment_scales_option_weight() {
        let factor = Uuid::new_v4();
        let mut betas = HashMap::new();
        betas.insert("SPY".to_string(), HashMap::from([(factor, 1.0)]));

        let weights = vec![option_weight("SPY", 0.10, Some(0.5))];

        let adjusted = aggregate_symbol_betas(&weights, &betas, true);
        assert!((adjusted.factor_betas[&factor] - 0.05).abs() < 1e-12);

        let notional = aggregate_symbol_betas(&weights, &betas, false);
        assert!((notional.factor_betas[&factor] - 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_short_option_sign_comes_from_weight() {
        // SC position: signed value already negative, put delta negative
        let factor = Uuid::new_v4();
        let mut betas = HashMap::new();
        betas.insert("SPY".to_string(), HashMap::from([(factor, 1.0)]));

        // short call: weight -0.1, call delta +0.6 => -0.06 exposure
        let weights = vec![option_weight("SPY", -0.10, Some(0.6))];
        let agg = aggregate_symbol_betas(&weights, &betas, true);
        assert!((agg.factor_betas[&factor] + 0.06).abs() < 1e-12);
    }
}
