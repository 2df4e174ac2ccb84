use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::Position;

const POSITION_COLUMNS: &str = r#"
    id, portfolio_id, symbol, position_type, investment_class, quantity,
    entry_price, entry_date, exit_date, exit_price, underlying_symbol,
    strike_price, expiration_date, market_value, last_price, deleted_at,
    created_at
"#;

/// Positions active on `date` for one portfolio: entered on or before the
/// date, not yet exited, not soft-deleted.
pub async fn fetch_active_positions(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>(&format!(
        r#"
        SELECT {POSITION_COLUMNS}
        FROM positions
        WHERE portfolio_id = $1
          AND entry_date <= $2
          AND (exit_date IS NULL OR exit_date > $2)
          AND deleted_at IS NULL
        ORDER BY symbol
        "#
    ))
    .bind(portfolio_id)
    .bind(date)
    .fetch_all(pool)
    .await
}

/// Positions that exited exactly on `date` (their realized P&L lands on
/// that day's rollforward).
pub async fn fetch_positions_exited_on(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Vec<Position>, sqlx::Error> {
    sqlx::query_as::<_, Position>(&format!(
        r#"
        SELECT {POSITION_COLUMNS}
        FROM positions
        WHERE portfolio_id = $1 AND exit_date = $2 AND deleted_at IS NULL
        "#
    ))
    .bind(portfolio_id)
    .bind(date)
    .fetch_all(pool)
    .await
}

/// Union of symbols held across all active portfolios on `date`, with
/// options contributing their underlying. Feeds the symbol universe job
/// and the market-data refresh.
pub async fn fetch_universe_symbols(pool: &PgPool, date: NaiveDate) -> Result<Vec<String>, sqlx::Error> {
    sqlx::query_scalar::<_, String>(
        r#"
        SELECT DISTINCT COALESCE(p.underlying_symbol, p.symbol)
        FROM positions p
        JOIN portfolios pf ON pf.id = p.portfolio_id
        WHERE pf.is_active = TRUE AND pf.deleted_at IS NULL
          AND p.entry_date <= $1
          AND (p.exit_date IS NULL OR p.exit_date > $1)
          AND p.deleted_at IS NULL
          AND p.investment_class IN ('PUBLIC', 'OPTIONS')
        ORDER BY 1
        "#,
    )
    .bind(date)
    .fetch_all(pool)
    .await
}

pub async fn update_position_mark(
    pool: &PgPool,
    position_id: Uuid,
    last_price: &BigDecimal,
    market_value: &BigDecimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE positions
        SET last_price = $2, market_value = $3
        WHERE id = $1
        "#,
    )
    .bind(position_id)
    .bind(last_price)
    .bind(market_value)
    .execute(pool)
    .await?;
    Ok(())
}
