use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::factor::{
    FactorDefinition, FactorKind, PortfolioFactorExposure, PositionBenchmarkBeta,
    PositionVolatility, QualityFlag, SymbolFactorExposure,
};

/// Seed the ten built-in factor definitions; idempotent.
pub async fn ensure_factor_definitions(pool: &PgPool) -> Result<(), sqlx::Error> {
    for (name, display_name, kind, long_etf, short_etf) in FactorDefinition::builtin() {
        sqlx::query(
            r#"
            INSERT INTO factor_definitions (id, name, display_name, factor_kind, long_etf, short_etf, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(display_name)
        .bind(kind)
        .bind(long_etf)
        .bind(short_etf)
        .execute(pool)
        .await?;
    }
    Ok(())
}

pub async fn fetch_factor_definitions(pool: &PgPool) -> Result<Vec<FactorDefinition>, sqlx::Error> {
    sqlx::query_as::<_, FactorDefinition>(
        r#"
        SELECT id, name, display_name, factor_kind, long_etf, short_etf, is_active
        FROM factor_definitions
        WHERE is_active = TRUE
        ORDER BY name
        "#,
    )
    .fetch_all(pool)
    .await
}

#[allow(clippy::too_many_arguments)]
pub async fn upsert_symbol_exposure(
    pool: &PgPool,
    symbol: &str,
    factor_id: Uuid,
    calculation_date: NaiveDate,
    beta: f64,
    r_squared: Option<f64>,
    observations: i32,
    is_significant: bool,
    quality_flag: QualityFlag,
) -> Result<SymbolFactorExposure, sqlx::Error> {
    sqlx::query_as::<_, SymbolFactorExposure>(
        r#"
        INSERT INTO symbol_factor_exposures
            (id, symbol, factor_id, calculation_date, beta, r_squared, observations,
             is_significant, quality_flag)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (symbol, factor_id, calculation_date)
        DO UPDATE SET beta = EXCLUDED.beta,
                      r_squared = EXCLUDED.r_squared,
                      observations = EXCLUDED.observations,
                      is_significant = EXCLUDED.is_significant,
                      quality_flag = EXCLUDED.quality_flag
        RETURNING id, symbol, factor_id, calculation_date, beta, r_squared, observations,
                  is_significant, quality_flag
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(symbol)
    .bind(factor_id)
    .bind(calculation_date)
    .bind(big(beta))
    .bind(r_squared.map(big))
    .bind(observations)
    .bind(is_significant)
    .bind(quality_flag)
    .fetch_one(pool)
    .await
}

/// Cached symbol betas for one date, grouped symbol -> factor_id -> beta.
pub async fn fetch_symbol_betas(
    pool: &PgPool,
    symbols: &[String],
    calculation_date: NaiveDate,
) -> Result<HashMap<String, HashMap<Uuid, f64>>, sqlx::Error> {
    use bigdecimal::ToPrimitive;

    if symbols.is_empty() {
        return Ok(HashMap::new());
    }

    let rows: Vec<(String, Uuid, BigDecimal)> = sqlx::query_as(
        r#"
        SELECT symbol, factor_id, beta
        FROM symbol_factor_exposures
        WHERE symbol = ANY($1) AND calculation_date = $2
        "#,
    )
    .bind(symbols)
    .bind(calculation_date)
    .fetch_all(pool)
    .await?;

    let mut out: HashMap<String, HashMap<Uuid, f64>> = HashMap::new();
    for (symbol, factor_id, beta) in rows {
        if let Some(b) = beta.to_f64() {
            out.entry(symbol).or_default().insert(factor_id, b);
        }
    }
    Ok(out)
}

/// Symbols that already carry a full factor set for the date; the universe
/// job skips them.
pub async fn fetch_cached_universe_symbols(
    pool: &PgPool,
    calculation_date: NaiveDate,
    expected_factor_count: i64,
) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT symbol
        FROM symbol_factor_exposures
        WHERE calculation_date = $1
        GROUP BY symbol
        HAVING COUNT(*) >= $2
        "#,
    )
    .bind(calculation_date)
    .bind(expected_factor_count)
    .fetch_all(pool)
    .await
}

pub async fn upsert_portfolio_exposure(
    pool: &PgPool,
    portfolio_id: Uuid,
    factor_id: Uuid,
    calculation_date: NaiveDate,
    beta: f64,
    dollar_exposure: f64,
) -> Result<PortfolioFactorExposure, sqlx::Error> {
    sqlx::query_as::<_, PortfolioFactorExposure>(
        r#"
        INSERT INTO portfolio_factor_exposures
            (id, portfolio_id, factor_id, calculation_date, beta, dollar_exposure)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (portfolio_id, factor_id, calculation_date)
        DO UPDATE SET beta = EXCLUDED.beta,
                      dollar_exposure = EXCLUDED.dollar_exposure
        RETURNING id, portfolio_id, factor_id, calculation_date, beta, dollar_exposure
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(portfolio_id)
    .bind(factor_id)
    .bind(calculation_date)
    .bind(big(beta))
    .bind(big(dollar_exposure))
    .fetch_one(pool)
    .await
}

/// factor name -> (beta, dollar_exposure) for one portfolio-date.
pub async fn fetch_portfolio_exposures(
    pool: &PgPool,
    portfolio_id: Uuid,
    calculation_date: NaiveDate,
) -> Result<HashMap<String, (f64, f64)>, sqlx::Error> {
    use bigdecimal::ToPrimitive;

    let rows: Vec<(String, BigDecimal, BigDecimal)> = sqlx::query_as(
        r#"
        SELECT fd.name, pfe.beta, pfe.dollar_exposure
        FROM portfolio_factor_exposures pfe
        JOIN factor_definitions fd ON fd.id = pfe.factor_id
        WHERE pfe.portfolio_id = $1 AND pfe.calculation_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(calculation_date)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|(name, beta, dollars)| {
            Some((name, (beta.to_f64()?, dollars.to_f64()?)))
        })
        .collect())
}

pub async fn upsert_position_benchmark_beta(
    pool: &PgPool,
    position_id: Uuid,
    calculation_date: NaiveDate,
    benchmark: &str,
    beta: f64,
    r_squared: Option<f64>,
    p_value: Option<f64>,
    observations: i32,
    is_significant: bool,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO position_market_betas
            (id, position_id, calculation_date, benchmark, beta, r_squared,
             p_value, observations, is_significant)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (position_id, calculation_date, benchmark)
        DO UPDATE SET beta = EXCLUDED.beta,
                      r_squared = EXCLUDED.r_squared,
                      p_value = EXCLUDED.p_value,
                      observations = EXCLUDED.observations,
                      is_significant = EXCLUDED.is_significant
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(position_id)
    .bind(calculation_date)
    .bind(benchmark)
    .bind(big(beta))
    .bind(r_squared.map(big))
    .bind(p_value.map(big))
    .bind(observations)
    .bind(is_significant)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_position_benchmark_betas(
    pool: &PgPool,
    position_ids: &[Uuid],
    calculation_date: NaiveDate,
    benchmark: &str,
) -> Result<Vec<PositionBenchmarkBeta>, sqlx::Error> {
    if position_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, PositionBenchmarkBeta>(
        r#"
        SELECT id, position_id, calculation_date, benchmark, beta, r_squared,
               p_value, observations, is_significant
        FROM position_market_betas
        WHERE position_id = ANY($1) AND calculation_date = $2 AND benchmark = $3
        "#,
    )
    .bind(position_ids)
    .bind(calculation_date)
    .bind(benchmark)
    .fetch_all(pool)
    .await
}

pub async fn upsert_position_volatility(
    pool: &PgPool,
    position_id: Uuid,
    calculation_date: NaiveDate,
    realized_vol_21d: Option<f64>,
    realized_vol_63d: Option<f64>,
    expected_vol_21d: Option<f64>,
    vol_trend: Option<&str>,
    vol_percentile: Option<f64>,
    observations: i32,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO position_volatility
            (id, position_id, calculation_date, realized_vol_21d, realized_vol_63d,
             expected_vol_21d, vol_trend, vol_percentile, observations)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (position_id, calculation_date)
        DO UPDATE SET realized_vol_21d = EXCLUDED.realized_vol_21d,
                      realized_vol_63d = EXCLUDED.realized_vol_63d,
                      expected_vol_21d = EXCLUDED.expected_vol_21d,
                      vol_trend = EXCLUDED.vol_trend,
                      vol_percentile = EXCLUDED.vol_percentile,
                      observations = EXCLUDED.observations
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(position_id)
    .bind(calculation_date)
    .bind(realized_vol_21d.map(big))
    .bind(realized_vol_63d.map(big))
    .bind(expected_vol_21d.map(big))
    .bind(vol_trend)
    .bind(vol_percentile.map(big))
    .bind(observations)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_position_volatilities(
    pool: &PgPool,
    position_ids: &[Uuid],
    calculation_date: NaiveDate,
) -> Result<Vec<PositionVolatility>, sqlx::Error> {
    if position_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, PositionVolatility>(
        r#"
        SELECT id, position_id, calculation_date, realized_vol_21d, realized_vol_63d,
               expected_vol_21d, vol_trend, vol_percentile, observations
        FROM position_volatility
        WHERE position_id = ANY($1) AND calculation_date = $2
        "#,
    )
    .bind(position_ids)
    .bind(calculation_date)
    .fetch_all(pool)
    .await
}

fn big(v: f64) -> BigDecimal {
    use std::str::FromStr;
    BigDecimal::from_str(&format!("{v:.10}")).unwrap_or_else(|_| BigDecimal::from(0))
}
