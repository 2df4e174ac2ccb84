use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::portfolio::CapitalFlow;
use crate::models::Portfolio;

pub async fn fetch_active_portfolios(pool: &PgPool) -> Result<Vec<Portfolio>, sqlx::Error> {
    sqlx::query_as::<_, Portfolio>(
        r#"
        SELECT id, user_id, name, equity_balance, base_currency, is_active,
               deleted_at, created_at, updated_at
        FROM portfolios
        WHERE is_active = TRUE AND deleted_at IS NULL
        ORDER BY created_at
        "#,
    )
    .fetch_all(pool)
    .await
}

pub async fn fetch_portfolio(pool: &PgPool, portfolio_id: Uuid) -> Result<Option<Portfolio>, sqlx::Error> {
    sqlx::query_as::<_, Portfolio>(
        r#"
        SELECT id, user_id, name, equity_balance, base_currency, is_active,
               deleted_at, created_at, updated_at
        FROM portfolios
        WHERE id = $1 AND deleted_at IS NULL
        "#,
    )
    .bind(portfolio_id)
    .fetch_optional(pool)
    .await
}

/// Writes the rolled-forward balance back so the next day's pipeline reads
/// it as input.
pub async fn update_equity_balance(
    pool: &PgPool,
    portfolio_id: Uuid,
    equity_balance: &BigDecimal,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE portfolios
        SET equity_balance = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(portfolio_id)
    .bind(equity_balance)
    .execute(pool)
    .await?;
    Ok(())
}

/// Capital-flow rows for one portfolio-day, written by the surrounding
/// ingestion system.
pub async fn fetch_capital_flows(
    pool: &PgPool,
    portfolio_id: Uuid,
    flow_date: NaiveDate,
) -> Result<Vec<CapitalFlow>, sqlx::Error> {
    sqlx::query_as::<_, CapitalFlow>(
        r#"
        SELECT id, portfolio_id, flow_date, amount
        FROM capital_flows
        WHERE portfolio_id = $1 AND flow_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(flow_date)
    .fetch_all(pool)
    .await
}

/// Net capital flow for one portfolio-day; absence means zero.
pub async fn fetch_daily_capital_flow(
    pool: &PgPool,
    portfolio_id: Uuid,
    flow_date: NaiveDate,
) -> Result<BigDecimal, sqlx::Error> {
    let flows = fetch_capital_flows(pool, portfolio_id, flow_date).await?;
    Ok(flows
        .into_iter()
        .fold(BigDecimal::from(0), |total, flow| total + flow.amount))
}
