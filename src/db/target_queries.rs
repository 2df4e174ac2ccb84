use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::HashMap;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::market_data::PriceTarget;

pub async fn upsert_price_target(
    pool: &PgPool,
    symbol: &str,
    target_consensus: f64,
    analyst_count: Option<i32>,
) -> Result<PriceTarget, sqlx::Error> {
    let target = BigDecimal::from_str(&format!("{target_consensus:.4}"))
        .unwrap_or_else(|_| BigDecimal::from(0));

    sqlx::query_as::<_, PriceTarget>(
        r#"
        INSERT INTO price_targets (id, symbol, target_consensus, analyst_count, updated_at)
        VALUES ($1, $2, $3, $4, NOW())
        ON CONFLICT (symbol)
        DO UPDATE SET target_consensus = EXCLUDED.target_consensus,
                      analyst_count = EXCLUDED.analyst_count,
                      updated_at = NOW()
        RETURNING id, symbol, target_consensus, analyst_count, updated_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(symbol)
    .bind(target)
    .bind(analyst_count)
    .fetch_one(pool)
    .await
}

/// symbol -> consensus target for the requested symbols.
pub async fn fetch_price_targets(
    pool: &PgPool,
    symbols: &[String],
) -> Result<HashMap<String, f64>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = sqlx::query_as::<_, PriceTarget>(
        r#"
        SELECT id, symbol, target_consensus, analyst_count, updated_at
        FROM price_targets
        WHERE symbol = ANY($1)
        "#,
    )
    .bind(symbols)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .filter_map(|t| t.target_consensus.to_f64().map(|v| (t.symbol, v)))
        .collect())
}

/// Targets older than `max_age_days` are treated as missing by callers.
pub async fn fetch_stale_target_symbols(
    pool: &PgPool,
    symbols: &[String],
    as_of: NaiveDate,
    max_age_days: i64,
) -> Result<Vec<String>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(Vec::new());
    }

    let cutoff = as_of - chrono::Duration::days(max_age_days);

    let fresh: Vec<String> = sqlx::query_scalar(
        r#"
        SELECT symbol FROM price_targets
        WHERE symbol = ANY($1) AND updated_at::date >= $2
        "#,
    )
    .bind(symbols)
    .bind(cutoff)
    .fetch_all(pool)
    .await?;

    Ok(symbols
        .iter()
        .filter(|s| !fresh.contains(s))
        .cloned()
        .collect())
}
