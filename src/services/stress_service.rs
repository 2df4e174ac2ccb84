use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::db::{factor_queries, portfolio_queries, stress_queries};
use crate::errors::{AppError, CalcOutcome};
use crate::models::stress::{
    FactorImpact, ScenarioCategory, ScenarioPnl, ScenarioSeverity, StressScenario,
};
use crate::services::market_data::{self, PriceCache};
use crate::services::regression;
use crate::services::symbol_universe::lookback_start;

/// Factor correlation matrix shared read-only by every portfolio in one
/// orchestrator run. Clamped element-wise at load time, before any use.
#[derive(Debug, Clone)]
pub struct FactorCorrelations {
    pub factors: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
}

impl FactorCorrelations {
    pub fn correlation(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.factors.iter().position(|f| f == a)?;
        let j = self.factors.iter().position(|f| f == b)?;
        let rho = self.matrix[i][j];
        rho.is_finite().then_some(rho)
    }
}

/// Built-in scenario library. Historical replays ship inactive; the
/// active set keeps at least 20% base scenarios and under 20% extreme.
pub fn default_scenarios() -> Vec<StressScenario> {
    fn shocks(entries: &[(&str, f64)]) -> HashMap<String, f64> {
        entries.iter().map(|(f, s)| (f.to_string(), *s)).collect()
    }

    vec![
        StressScenario {
            name: "market_unchanged".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Base,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("market", 0.0)]),
        },
        StressScenario {
            name: "market_drift_up".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Base,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("market", 0.02)]),
        },
        StressScenario {
            name: "market_pullback_5".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Mild,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("market", -0.05)]),
        },
        StressScenario {
            name: "market_correction_10".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Moderate,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("market", -0.10)]),
        },
        StressScenario {
            name: "market_selloff_20".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Severe,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("market", -0.20), ("low_volatility", 0.05)]),
        },
        StressScenario {
            name: "rates_up_100bp".to_string(),
            category: ScenarioCategory::Rates,
            severity: ScenarioSeverity::Moderate,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("rates", -0.07), ("growth", -0.04)]),
        },
        StressScenario {
            name: "rates_down_50bp".to_string(),
            category: ScenarioCategory::Rates,
            severity: ScenarioSeverity::Mild,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("rates", 0.035), ("growth", 0.02)]),
        },
        StressScenario {
            name: "growth_rotation".to_string(),
            category: ScenarioCategory::Sector,
            severity: ScenarioSeverity::Moderate,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("growth_value_spread", -0.08), ("momentum_spread", -0.05)]),
        },
        StressScenario {
            name: "small_cap_squeeze".to_string(),
            category: ScenarioCategory::Sector,
            severity: ScenarioSeverity::Mild,
            active: true,
            optional: true,
            shocked_factors: shocks(&[("size_spread", 0.06)]),
        },
        StressScenario {
            name: "flight_to_quality".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Severe,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("market", -0.15), ("quality_spread", 0.05), ("rates", 0.04)]),
        },
        StressScenario {
            name: "liquidity_crunch".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Extreme,
            active: true,
            optional: false,
            shocked_factors: shocks(&[("market", -0.30), ("size_spread", -0.10), ("momentum", -0.12)]),
        },
        StressScenario {
            name: "replay_gfc_2008".to_string(),
            category: ScenarioCategory::Historical,
            severity: ScenarioSeverity::Extreme,
            active: false,
            optional: true,
            shocked_factors: shocks(&[("market", -0.45), ("size_spread", -0.15), ("rates", 0.10)]),
        },
        StressScenario {
            name: "replay_covid_2020".to_string(),
            category: ScenarioCategory::Historical,
            severity: ScenarioSeverity::Extreme,
            active: false,
            optional: true,
            shocked_factors: shocks(&[("market", -0.34), ("momentum", -0.10)]),
        },
    ]
}

/// Library from the configured JSON file when present, defaults otherwise.
pub fn load_scenarios(config: &BatchConfig) -> Vec<StressScenario> {
    if let Some(path) = &config.stress_scenarios_path {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str::<Vec<StressScenario>>(&raw) {
                Ok(scenarios) if !scenarios.is_empty() => return scenarios,
                Ok(_) => warn!("Scenario file {} is empty, using defaults", path),
                Err(e) => warn!("Failed to parse scenario file {}: {}", path, e),
            },
            Err(e) => warn!("Failed to read scenario file {}: {}", path, e),
        }
    }
    default_scenarios()
}

/// Clamp every off-diagonal element into [min, max]; the diagonal stays 1.
pub fn clamp_matrix(matrix: &mut [Vec<f64>], min: f64, max: f64) {
    for (i, row) in matrix.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            if i == j {
                *cell = 1.0;
            } else if cell.is_finite() {
                *cell = cell.clamp(min, max);
            }
        }
    }
}

/// Factor correlation matrix from the factor proxy return series, plus
/// synthetic "market" (SPY) and "rates" (TLT) rows used by macro
/// scenarios. Computed once per orchestrator run.
pub async fn factor_correlation_matrix(
    pool: &PgPool,
    cache: &PriceCache,
    config: &BatchConfig,
    date: NaiveDate,
) -> Result<FactorCorrelations, AppError> {
    let definitions = factor_queries::fetch_factor_definitions(pool).await?;

    // factor name -> (long, optional short) proxy legs
    let mut proxies: Vec<(String, String, Option<String>)> = vec![
        ("market".to_string(), "SPY".to_string(), None),
        ("rates".to_string(), "TLT".to_string(), None),
    ];
    for def in &definitions {
        proxies.push((def.name.clone(), def.long_etf.clone(), def.short_etf.clone()));
    }

    let mut symbols: Vec<String> = proxies
        .iter()
        .flat_map(|(_, long, short)| {
            std::iter::once(long.clone()).chain(short.clone())
        })
        .collect();
    symbols.sort();
    symbols.dedup();

    let start = lookback_start(date, config.correlation_window_days);
    let returns = market_data::get_returns(pool, Some(cache), &symbols, start, date, true).await?;

    let factors: Vec<String> = proxies.iter().map(|(name, _, _)| name.clone()).collect();
    let n = factors.len();
    let mut series: Vec<Option<Vec<f64>>> = Vec::with_capacity(n);
    for (_, long, short) in &proxies {
        let leg = returns.column(long).map(|col| col.to_vec());
        let combined = match (leg, short) {
            (Some(long_col), Some(short_sym)) => returns.column(short_sym).map(|short_col| {
                long_col.iter().zip(short_col.iter()).map(|(l, s)| l - s).collect()
            }),
            (leg, None) => leg,
            (None, _) => None,
        };
        series.push(combined);
    }

    let mut matrix = vec![vec![f64::NAN; n]; n];
    for i in 0..n {
        matrix[i][i] = 1.0;
        for j in (i + 1)..n {
            if let (Some(a), Some(b)) = (&series[i], &series[j]) {
                if let Some((rho, _)) = regression::pearson_correlation(a, b) {
                    matrix[i][j] = rho;
                    matrix[j][i] = rho;
                }
            }
        }
    }

    let (min, max) = config.stress_corr_clamp;
    clamp_matrix(&mut matrix, min, max);

    Ok(FactorCorrelations { factors, matrix })
}

/// Direct and correlation-amplified P&L for one scenario.
///
/// Per shocked factor: `impact = shock x basis` where the basis is the
/// stored dollar exposure for the factor, falling back to `beta x equity`
/// (tagged). Unshocked factors receive a damped spillover of the shocked
/// impacts through the clamped correlation matrix.
pub fn scenario_pnl(
    scenario: &StressScenario,
    exposures: &HashMap<String, (f64, f64)>,
    equity: f64,
    correlations: &FactorCorrelations,
    correlation_scale: f64,
) -> ScenarioPnl {
    let mut factor_impacts = Vec::new();
    let mut direct_pnl = 0.0;

    for (factor, shock) in &scenario.shocked_factors {
        let (beta, stored_exposure) = exposures.get(factor).copied().unwrap_or((0.0, 0.0));
        let fallback = stored_exposure == 0.0 && beta != 0.0;
        let basis = if fallback { beta * equity } else { stored_exposure };
        let impact = shock * basis;

        direct_pnl += impact;
        factor_impacts.push(FactorImpact {
            factor: factor.clone(),
            beta,
            shock: *shock,
            exposure_basis: basis,
            impact,
            fallback,
        });
    }

    // Spillover into factors the scenario did not shock
    let shocked: HashSet<&String> = scenario.shocked_factors.keys().collect();
    let mut spillover = 0.0;
    for unshocked in &correlations.factors {
        if shocked.contains(unshocked) {
            continue;
        }
        let mut coupled = 0.0;
        for fi in &factor_impacts {
            if let Some(rho) = correlations.correlation(unshocked, &fi.factor) {
                coupled += rho * fi.impact;
            }
        }
        spillover += coupled * correlation_scale;
    }

    ScenarioPnl {
        scenario_name: scenario.name.clone(),
        severity: scenario.severity,
        direct_pnl,
        correlated_pnl: direct_pnl + spillover,
        correlation_effect: spillover,
        factor_impacts,
    }
}

/// Run every active scenario for one portfolio-date and persist results.
/// Reads the factor exposures written in the factor phase.
pub async fn run_stress_tests(
    pool: &PgPool,
    config: &BatchConfig,
    correlations: &FactorCorrelations,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<CalcOutcome<Vec<ScenarioPnl>>, AppError> {
    use bigdecimal::ToPrimitive;

    let portfolio = portfolio_queries::fetch_portfolio(pool, portfolio_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Portfolio {} not found", portfolio_id)))?;
    let equity = portfolio.equity_balance.to_f64().unwrap_or(0.0);
    if equity <= 0.0 {
        return Ok(CalcOutcome::skipped("invalid_equity_balance"));
    }

    let mut exposures = factor_queries::fetch_portfolio_exposures(pool, portfolio_id, date).await?;

    // Market and rates betas live on the snapshot, not in the exposure
    // table; expose them to macro scenarios with no stored dollar basis so
    // the beta x equity fallback applies.
    if let Some(snapshot) = crate::db::snapshot_queries::fetch_snapshot(pool, portfolio_id, date).await? {
        if let Some(mb) = snapshot.market_beta.as_ref().and_then(|b| b.to_f64()) {
            exposures.entry("market".to_string()).or_insert((mb, 0.0));
        }
        if let Some(irb) = snapshot.ir_beta.as_ref().and_then(|b| b.to_f64()) {
            exposures.entry("rates".to_string()).or_insert((irb, 0.0));
        }
    }

    if exposures.is_empty() {
        return Ok(CalcOutcome::skipped("no_factor_exposures"));
    }

    let scenarios = load_scenarios(config);
    let mut results = Vec::new();

    for scenario in scenarios.iter().filter(|s| s.active) {
        let pnl = scenario_pnl(scenario, &exposures, equity, correlations, config.stress_correlation_scale);
        stress_queries::upsert_result(pool, portfolio_id, date, &pnl).await?;
        results.push(pnl);
    }

    info!(
        "Stress tests for portfolio {} on {}: {} scenarios persisted",
        portfolio_id,
        date,
        results.len()
    );

    Ok(CalcOutcome::Completed(results))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity_correlations(factors: &[&str]) -> FactorCorrelations {
        let n = factors.len();
        let mut matrix = vec![vec![0.0; n]; n];
        for (i, row) in matrix.iter_mut().enumerate() {
            row[i] = 1.0;
        }
        FactorCorrelations {
            factors: factors.iter().map(|f| f.to_string()).collect(),
            matrix,
        }
    }

    #[test]
    fn test_scenario_distribution_targets() {
        let scenarios = default_scenarios();
        let active: Vec<_> = scenarios.iter().filter(|s| s.active).collect();
        let base = active.iter().filter(|s| s.severity == ScenarioSeverity::Base).count();
        let extreme = active.iter().filter(|s| s.severity == ScenarioSeverity::Extreme).count();

        assert!(base as f64 / active.len() as f64 >= 0.20, "base share too small");
        assert!((extreme as f64 / active.len() as f64) < 0.20, "extreme share too large");
    }

    #[test]
    fn test_historical_replays_inactive_by_default() {
        for scenario in default_scenarios() {
            if scenario.category == ScenarioCategory::Historical {
                assert!(!scenario.active, "{} should ship inactive", scenario.name);
            }
        }
    }

    #[test]
    fn test_fallback_direct_pnl_matches_beta_times_equity() {
        // Market -10%, beta 1.2, equity 1,000,000, no stored exposure
        let scenario = StressScenario {
            name: "test".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Moderate,
            active: true,
            optional: false,
            shocked_factors: HashMap::from([("market".to_string(), -0.10)]),
        };
        let exposures = HashMap::from([("market".to_string(), (1.2, 0.0))]);
        let corr = identity_correlations(&["market", "growth"]);

        let pnl = scenario_pnl(&scenario, &exposures, 1_000_000.0, &corr, 0.25);
        assert!((pnl.direct_pnl + 120_000.0).abs() < 1e-6);
        assert!(pnl.factor_impacts[0].fallback);
        // Identity correlations: no spillover
        assert_eq!(pnl.correlation_effect, 0.0);
    }

    #[test]
    fn test_stored_exposure_preferred_over_fallback() {
        let scenario = StressScenario {
            name: "test".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Mild,
            active: true,
            optional: false,
            shocked_factors: HashMap::from([("market".to_string(), -0.05)]),
        };
        let exposures = HashMap::from([("market".to_string(), (1.0, 800_000.0))]);
        let corr = identity_correlations(&["market"]);

        let pnl = scenario_pnl(&scenario, &exposures, 1_000_000.0, &corr, 0.25);
        assert!((pnl.direct_pnl + 40_000.0).abs() < 1e-6);
        assert!(!pnl.factor_impacts[0].fallback);
    }

    #[test]
    fn test_correlation_spillover_is_damped_and_separate() {
        let scenario = StressScenario {
            name: "test".to_string(),
            category: ScenarioCategory::Macro,
            severity: ScenarioSeverity::Moderate,
            active: true,
            optional: false,
            shocked_factors: HashMap::from([("market".to_string(), -0.10)]),
        };
        let exposures = HashMap::from([("market".to_string(), (1.0, 1_000_000.0))]);

        let corr = FactorCorrelations {
            factors: vec!["market".to_string(), "growth".to_string()],
            matrix: vec![vec![1.0, 0.8], vec![0.8, 1.0]],
        };

        let pnl = scenario_pnl(&scenario, &exposures, 1_000_000.0, &corr, 0.25);
        // direct = -100k; spillover = 0.8 * -100k * 0.25 = -20k
        assert!((pnl.direct_pnl + 100_000.0).abs() < 1e-6);
        assert!((pnl.correlation_effect + 20_000.0).abs() < 1e-6);
        assert!((pnl.correlated_pnl + 120_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_clamp_matrix_bounds_and_diagonal() {
        let mut matrix = vec![vec![1.0, 0.99, -0.99], vec![0.99, 0.5, 0.3], vec![-0.99, 0.3, 1.0]];
        clamp_matrix(&mut matrix, -0.95, 0.95);
        assert_eq!(matrix[0][1], 0.95);
        assert_eq!(matrix[0][2], -0.95);
        // Diagonal is forced back to exactly 1
        assert_eq!(matrix[1][1], 1.0);
    }

    #[test]
    fn test_unknown_factor_contributes_zero() {
        let scenario = StressScenario {
            name: "test".to_string(),
            category: ScenarioCategory::Sector,
            severity: ScenarioSeverity::Mild,
            active: true,
            optional: false,
            shocked_factors: HashMap::from([("nonexistent".to_string(), -0.10)]),
        };
        let exposures = HashMap::new();
        let corr = identity_correlations(&["market"]);
        let pnl = scenario_pnl(&scenario, &exposures, 1_000_000.0, &corr, 0.25);
        assert_eq!(pnl.direct_pnl, 0.0);
        assert!(!pnl.factor_impacts[0].fallback);
    }
}
