use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::info;
use uuid::Uuid;

/// Wipe every calculation artifact in [start, end] ahead of a force-rerun,
/// optionally scoped to one portfolio. Market data, positions and company
/// profiles are never touched.
///
/// Order is strictly child-first: cluster members, clusters, pairwise rows,
/// correlation calculations, stress results, snapshots, portfolio factor
/// exposures, symbol factor exposures, position-level betas and
/// volatilities.
pub async fn clear_calculation_range(
    pool: &PgPool,
    start: NaiveDate,
    end: NaiveDate,
    portfolio_id: Option<Uuid>,
) -> Result<u64, sqlx::Error> {
    let mut tx = pool.begin().await?;
    let mut deleted = 0u64;

    let calc_ids: Vec<Uuid> = match portfolio_id {
        Some(pid) => {
            sqlx::query_scalar(
                r#"
                SELECT id FROM correlation_calculations
                WHERE calculation_date >= $1 AND calculation_date <= $2 AND portfolio_id = $3
                "#,
            )
            .bind(start)
            .bind(end)
            .bind(pid)
            .fetch_all(&mut *tx)
            .await?
        }
        None => {
            sqlx::query_scalar(
                r#"
                SELECT id FROM correlation_calculations
                WHERE calculation_date >= $1 AND calculation_date <= $2
                "#,
            )
            .bind(start)
            .bind(end)
            .fetch_all(&mut *tx)
            .await?
        }
    };

    if !calc_ids.is_empty() {
        deleted += exec(
            &mut tx,
            r#"
            DELETE FROM correlation_cluster_members
            WHERE cluster_id IN (SELECT id FROM correlation_clusters WHERE calculation_id = ANY($1))
            "#,
            &calc_ids,
        )
        .await?;
        deleted += exec(
            &mut tx,
            "DELETE FROM correlation_clusters WHERE calculation_id = ANY($1)",
            &calc_ids,
        )
        .await?;
        deleted += exec(
            &mut tx,
            "DELETE FROM pairwise_correlations WHERE calculation_id = ANY($1)",
            &calc_ids,
        )
        .await?;
        deleted += exec(
            &mut tx,
            "DELETE FROM correlation_calculations WHERE id = ANY($1)",
            &calc_ids,
        )
        .await?;
    }

    deleted += exec_range(
        &mut tx,
        "stress_test_results",
        "calculation_date",
        "portfolio_id",
        start,
        end,
        portfolio_id,
    )
    .await?;
    deleted += exec_range(
        &mut tx,
        "portfolio_snapshots",
        "snapshot_date",
        "portfolio_id",
        start,
        end,
        portfolio_id,
    )
    .await?;
    deleted += exec_range(
        &mut tx,
        "portfolio_factor_exposures",
        "calculation_date",
        "portfolio_id",
        start,
        end,
        portfolio_id,
    )
    .await?;

    // Symbol-level rows are portfolio-agnostic: only wiped on a global reset.
    if portfolio_id.is_none() {
        let result = sqlx::query(
            "DELETE FROM symbol_factor_exposures WHERE calculation_date >= $1 AND calculation_date <= $2",
        )
        .bind(start)
        .bind(end)
        .execute(&mut *tx)
        .await?;
        deleted += result.rows_affected();
    }

    deleted += exec_position_range(&mut tx, "position_market_betas", start, end, portfolio_id).await?;
    deleted += exec_position_range(&mut tx, "position_volatility", start, end, portfolio_id).await?;

    tx.commit().await?;
    info!("🧹 Cleared {} calculation rows in {}..{}", deleted, start, end);
    Ok(deleted)
}

async fn exec(
    tx: &mut Transaction<'_, Postgres>,
    sql: &str,
    ids: &[Uuid],
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(sql).bind(ids).execute(&mut **tx).await?;
    Ok(result.rows_affected())
}

async fn exec_range(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    date_column: &str,
    scope_column: &str,
    start: NaiveDate,
    end: NaiveDate,
    portfolio_id: Option<Uuid>,
) -> Result<u64, sqlx::Error> {
    let result = match portfolio_id {
        Some(pid) => {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE {date_column} >= $1 AND {date_column} <= $2 AND {scope_column} = $3"
            ))
            .bind(start)
            .bind(end)
            .bind(pid)
            .execute(&mut **tx)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE {date_column} >= $1 AND {date_column} <= $2"
            ))
            .bind(start)
            .bind(end)
            .execute(&mut **tx)
            .await?
        }
    };
    Ok(result.rows_affected())
}

async fn exec_position_range(
    tx: &mut Transaction<'_, Postgres>,
    table: &str,
    start: NaiveDate,
    end: NaiveDate,
    portfolio_id: Option<Uuid>,
) -> Result<u64, sqlx::Error> {
    let result = match portfolio_id {
        Some(pid) => {
            sqlx::query(&format!(
                r#"
                DELETE FROM {table}
                WHERE calculation_date >= $1 AND calculation_date <= $2
                  AND position_id IN (SELECT id FROM positions WHERE portfolio_id = $3)
                "#
            ))
            .bind(start)
            .bind(end)
            .bind(pid)
            .execute(&mut **tx)
            .await?
        }
        None => {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE calculation_date >= $1 AND calculation_date <= $2"
            ))
            .bind(start)
            .bind(end)
            .execute(&mut **tx)
            .await?
        }
    };
    Ok(result.rows_affected())
}
