use chrono::NaiveDate;
use sqlx::PgPool;
use tracing::error;
use uuid::Uuid;

use crate::external::market_provider::{ProviderBar, ProviderYieldPoint};
use crate::models::MarketDataPoint;

/// Upsert a batch of provider bars for one symbol inside a single
/// transaction. Rows are append-only at the (symbol, date) key; re-fetches
/// overwrite the bar in place.
pub async fn upsert_bars(
    pool: &PgPool,
    symbol: &str,
    source: &str,
    bars: &[ProviderBar],
) -> Result<(), sqlx::Error> {
    let mut tx = pool.begin().await.map_err(|e| {
        error!("Failed to begin transaction for symbol {}: {}", symbol, e);
        e
    })?;

    for bar in bars {
        sqlx::query(
            r#"
            INSERT INTO market_data (id, symbol, date, open, high, low, close, volume, data_source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (symbol, date)
            DO UPDATE SET open = EXCLUDED.open,
                          high = EXCLUDED.high,
                          low = EXCLUDED.low,
                          close = EXCLUDED.close,
                          volume = EXCLUDED.volume,
                          data_source = EXCLUDED.data_source
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(symbol)
        .bind(bar.date)
        .bind(&bar.open)
        .bind(&bar.high)
        .bind(&bar.low)
        .bind(&bar.close)
        .bind(bar.volume)
        .bind(source)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await.map_err(|e| {
        error!("Failed to commit bar upsert for symbol {}: {}", symbol, e);
        e
    })?;
    Ok(())
}

/// Treasury yield observations share the bar table: the series name is
/// the symbol and the yield percent lands in `close`.
pub async fn upsert_treasury_yields(
    pool: &PgPool,
    series: &str,
    source: &str,
    points: &[ProviderYieldPoint],
) -> Result<(), sqlx::Error> {
    use bigdecimal::BigDecimal;
    use std::str::FromStr;

    let bars: Vec<ProviderBar> = points
        .iter()
        .filter_map(|p| {
            Some(ProviderBar {
                date: p.date,
                open: None,
                high: None,
                low: None,
                close: BigDecimal::from_str(&format!("{:.4}", p.yield_pct)).ok()?,
                volume: None,
            })
        })
        .collect();

    upsert_bars(pool, series, source, &bars).await
}

/// Bars for many symbols over a date range in one query, ascending by date
/// within each symbol.
pub async fn fetch_bars_window(
    pool: &PgPool,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<Vec<MarketDataPoint>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, MarketDataPoint>(
        r#"
        SELECT id, symbol, date, open, high, low, close, volume, data_source
        FROM market_data
        WHERE symbol = ANY($1) AND date >= $2 AND date <= $3
        ORDER BY symbol, date
        "#,
    )
    .bind(symbols)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await
}

pub async fn fetch_latest_bar(
    pool: &PgPool,
    symbol: &str,
    on_or_before: NaiveDate,
) -> Result<Option<MarketDataPoint>, sqlx::Error> {
    sqlx::query_as::<_, MarketDataPoint>(
        r#"
        SELECT id, symbol, date, open, high, low, close, volume, data_source
        FROM market_data
        WHERE symbol = $1 AND date <= $2
        ORDER BY date DESC
        LIMIT 1
        "#,
    )
    .bind(symbol)
    .bind(on_or_before)
    .fetch_optional(pool)
    .await
}

/// Most recent bar date per symbol; symbols with no rows are absent.
pub async fn fetch_latest_dates(
    pool: &PgPool,
    symbols: &[String],
) -> Result<std::collections::HashMap<String, NaiveDate>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(std::collections::HashMap::new());
    }

    let rows: Vec<(String, NaiveDate)> = sqlx::query_as(
        r#"
        SELECT symbol, MAX(date)
        FROM market_data
        WHERE symbol = ANY($1)
        GROUP BY symbol
        "#,
    )
    .bind(symbols)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().collect())
}
