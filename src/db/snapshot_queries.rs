use bigdecimal::BigDecimal;
use chrono::{NaiveDate, Utc};
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::snapshot::{PortfolioSnapshot, SnapshotMetrics};

const SNAPSHOT_COLUMNS: &str = r#"
    id, portfolio_id, snapshot_date, total_value, cash_value, long_value,
    short_value, gross_exposure, net_exposure, daily_pnl, daily_realized_pnl,
    cumulative_pnl, daily_capital_flow, num_positions, equity_balance,
    portfolio_delta, portfolio_gamma, portfolio_theta, portfolio_vega,
    target_price_value, realized_vol_21d, realized_vol_63d, expected_vol_21d,
    volatility_trend, volatility_percentile, market_beta, ir_beta, hhi,
    effective_positions, top3_concentration, top10_concentration,
    sector_exposure, is_complete, created_at, updated_at
"#;

pub async fn fetch_snapshot(
    pool: &PgPool,
    portfolio_id: Uuid,
    snapshot_date: NaiveDate,
) -> Result<Option<PortfolioSnapshot>, sqlx::Error> {
    sqlx::query_as::<_, PortfolioSnapshot>(&format!(
        r#"
        SELECT {SNAPSHOT_COLUMNS}
        FROM portfolio_snapshots
        WHERE portfolio_id = $1 AND snapshot_date = $2
        "#
    ))
    .bind(portfolio_id)
    .bind(snapshot_date)
    .fetch_optional(pool)
    .await
}

/// Most recent snapshot strictly before `date` (complete or not); the
/// rollforward reads its equity balance.
pub async fn fetch_previous_snapshot(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Option<PortfolioSnapshot>, sqlx::Error> {
    sqlx::query_as::<_, PortfolioSnapshot>(&format!(
        r#"
        SELECT {SNAPSHOT_COLUMNS}
        FROM portfolio_snapshots
        WHERE portfolio_id = $1 AND snapshot_date < $2 AND is_complete = TRUE
        ORDER BY snapshot_date DESC
        LIMIT 1
        "#
    ))
    .bind(portfolio_id)
    .bind(date)
    .fetch_optional(pool)
    .await
}

pub async fn fetch_latest_complete_date(
    pool: &PgPool,
    portfolio_id: Uuid,
) -> Result<Option<NaiveDate>, sqlx::Error> {
    sqlx::query_scalar::<_, Option<NaiveDate>>(
        r#"
        SELECT MAX(snapshot_date)
        FROM portfolio_snapshots
        WHERE portfolio_id = $1 AND is_complete = TRUE
        "#,
    )
    .bind(portfolio_id)
    .fetch_one(pool)
    .await
}

/// Phase-one write: a placeholder row marking the calculation as in
/// flight. Re-running over an existing row resets its timestamp but never
/// flips a completed row back to incomplete.
pub async fn upsert_placeholder(
    pool: &PgPool,
    portfolio_id: Uuid,
    snapshot_date: NaiveDate,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO portfolio_snapshots (id, portfolio_id, snapshot_date, is_complete, created_at, updated_at)
        VALUES ($1, $2, $3, FALSE, NOW(), NOW())
        ON CONFLICT (portfolio_id, snapshot_date)
        DO UPDATE SET updated_at = NOW()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(portfolio_id)
    .bind(snapshot_date)
    .execute(pool)
    .await?;
    Ok(())
}

/// Phase-two write: fill every computed column and mark the row complete.
pub async fn complete_snapshot(
    pool: &PgPool,
    portfolio_id: Uuid,
    snapshot_date: NaiveDate,
    metrics: &SnapshotMetrics,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE portfolio_snapshots
        SET total_value = $3,
            cash_value = $4,
            long_value = $5,
            short_value = $6,
            gross_exposure = $7,
            net_exposure = $8,
            daily_pnl = $9,
            daily_realized_pnl = $10,
            cumulative_pnl = $11,
            daily_capital_flow = $12,
            num_positions = $13,
            equity_balance = $14,
            portfolio_delta = $15,
            portfolio_gamma = $16,
            portfolio_theta = $17,
            portfolio_vega = $18,
            target_price_value = $19,
            realized_vol_21d = $20,
            realized_vol_63d = $21,
            expected_vol_21d = $22,
            volatility_trend = $23,
            volatility_percentile = $24,
            market_beta = $25,
            ir_beta = $26,
            hhi = $27,
            effective_positions = $28,
            top3_concentration = $29,
            top10_concentration = $30,
            sector_exposure = $31,
            is_complete = TRUE,
            updated_at = NOW()
        WHERE portfolio_id = $1 AND snapshot_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(snapshot_date)
    .bind(big(metrics.total_value))
    .bind(big(metrics.cash_value))
    .bind(big(metrics.long_value))
    .bind(big(metrics.short_value))
    .bind(big(metrics.gross_exposure))
    .bind(big(metrics.net_exposure))
    .bind(big(metrics.daily_pnl))
    .bind(big(metrics.daily_realized_pnl))
    .bind(big(metrics.cumulative_pnl))
    .bind(big(metrics.daily_capital_flow))
    .bind(metrics.num_positions)
    .bind(big(metrics.equity_balance))
    .bind(metrics.portfolio_delta.map(big))
    .bind(metrics.portfolio_gamma.map(big))
    .bind(metrics.portfolio_theta.map(big))
    .bind(metrics.portfolio_vega.map(big))
    .bind(metrics.target_price_value.map(big))
    .bind(metrics.realized_vol_21d.map(big))
    .bind(metrics.realized_vol_63d.map(big))
    .bind(metrics.expected_vol_21d.map(big))
    .bind(metrics.volatility_trend.as_deref())
    .bind(metrics.volatility_percentile.map(big))
    .bind(metrics.market_beta.map(big))
    .bind(metrics.ir_beta.map(big))
    .bind(metrics.hhi.map(big))
    .bind(metrics.effective_positions.map(big))
    .bind(metrics.top3_concentration.map(big))
    .bind(metrics.top10_concentration.map(big))
    .bind(metrics.sector_exposure.clone())
    .execute(pool)
    .await?;
    Ok(())
}

/// Replace only the sector-exposure JSON on an existing snapshot row
/// (admin restore path after profile updates).
pub async fn update_sector_exposure(
    pool: &PgPool,
    portfolio_id: Uuid,
    snapshot_date: NaiveDate,
    sector_exposure: &serde_json::Value,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE portfolio_snapshots
        SET sector_exposure = $3, updated_at = NOW()
        WHERE portfolio_id = $1 AND snapshot_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(snapshot_date)
    .bind(sector_exposure)
    .execute(pool)
    .await?;
    Ok(())
}

/// Delete abandoned placeholders older than the grace window, optionally
/// scoped to one portfolio. Returns the number of rows removed.
pub async fn delete_stale_placeholders(
    pool: &PgPool,
    age_hours: i64,
    portfolio_id: Option<Uuid>,
) -> Result<u64, sqlx::Error> {
    let cutoff = Utc::now() - chrono::Duration::hours(age_hours);

    let result = match portfolio_id {
        Some(pid) => {
            sqlx::query(
                r#"
                DELETE FROM portfolio_snapshots
                WHERE is_complete = FALSE AND updated_at < $1 AND portfolio_id = $2
                "#,
            )
            .bind(cutoff)
            .bind(pid)
            .execute(pool)
            .await?
        }
        None => {
            sqlx::query(
                r#"
                DELETE FROM portfolio_snapshots
                WHERE is_complete = FALSE AND updated_at < $1
                "#,
            )
            .bind(cutoff)
            .execute(pool)
            .await?
        }
    };

    Ok(result.rows_affected())
}

fn big(v: f64) -> BigDecimal {
    BigDecimal::from_str(&format!("{v:.10}")).unwrap_or_else(|_| BigDecimal::from(0))
}
