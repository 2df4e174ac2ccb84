use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::correlation::{
    ClusterResult, CorrelationCalculation, CorrelationCluster, CorrelationClusterMember,
    CorrelationMatrix, PairwiseCorrelation,
};

/// Persist one calculation with its pairwise rows and clusters, replacing
/// any prior calculation for the same (portfolio, date). Children go first
/// on delete, parent first on insert, all in one transaction.
pub async fn replace_calculation(
    pool: &PgPool,
    portfolio_id: Uuid,
    calculation_date: NaiveDate,
    window_days: i32,
    matrix: &CorrelationMatrix,
    clusters: &[ClusterResult],
) -> Result<CorrelationCalculation, sqlx::Error> {
    let mut tx = pool.begin().await?;

    let old_ids: Vec<Uuid> = sqlx::query_scalar(
        r#"
        SELECT id FROM correlation_calculations
        WHERE portfolio_id = $1 AND calculation_date = $2
        "#,
    )
    .bind(portfolio_id)
    .bind(calculation_date)
    .fetch_all(&mut *tx)
    .await?;

    if !old_ids.is_empty() {
        sqlx::query(
            r#"
            DELETE FROM correlation_cluster_members
            WHERE cluster_id IN (
                SELECT id FROM correlation_clusters WHERE calculation_id = ANY($1)
            )
            "#,
        )
        .bind(&old_ids)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM correlation_clusters WHERE calculation_id = ANY($1)")
            .bind(&old_ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM pairwise_correlations WHERE calculation_id = ANY($1)")
            .bind(&old_ids)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM correlation_calculations WHERE id = ANY($1)")
            .bind(&old_ids)
            .execute(&mut *tx)
            .await?;
    }

    let avg_correlation = if matrix.pairs.is_empty() {
        None
    } else {
        Some(matrix.pairs.iter().map(|p| p.correlation).sum::<f64>() / matrix.pairs.len() as f64)
    };

    let calculation = sqlx::query_as::<_, CorrelationCalculation>(
        r#"
        INSERT INTO correlation_calculations
            (id, portfolio_id, calculation_date, window_days, symbol_count, avg_correlation, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, NOW())
        RETURNING id, portfolio_id, calculation_date, window_days, symbol_count, avg_correlation, created_at
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(portfolio_id)
    .bind(calculation_date)
    .bind(window_days)
    .bind(matrix.symbols.len() as i32)
    .bind(avg_correlation.map(big))
    .fetch_one(&mut *tx)
    .await?;

    for pair in &matrix.pairs {
        let row = PairwiseCorrelation {
            id: Uuid::new_v4(),
            calculation_id: calculation.id,
            symbol_1: pair.symbol_1.clone(),
            symbol_2: pair.symbol_2.clone(),
            correlation: big(pair.correlation),
            observations: pair.observations as i32,
        };
        sqlx::query(
            r#"
            INSERT INTO pairwise_correlations
                (id, calculation_id, symbol_1, symbol_2, correlation, observations)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(row.id)
        .bind(row.calculation_id)
        .bind(&row.symbol_1)
        .bind(&row.symbol_2)
        .bind(&row.correlation)
        .bind(row.observations)
        .execute(&mut *tx)
        .await?;
    }

    for cluster in clusters {
        let cluster_row = CorrelationCluster {
            id: Uuid::new_v4(),
            calculation_id: calculation.id,
            cluster_label: cluster.label.clone(),
            avg_intra_correlation: Some(big(cluster.avg_intra_correlation)),
        };
        sqlx::query(
            r#"
            INSERT INTO correlation_clusters (id, calculation_id, cluster_label, avg_intra_correlation)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(cluster_row.id)
        .bind(cluster_row.calculation_id)
        .bind(&cluster_row.cluster_label)
        .bind(&cluster_row.avg_intra_correlation)
        .execute(&mut *tx)
        .await?;

        for symbol in &cluster.symbols {
            let member = CorrelationClusterMember {
                id: Uuid::new_v4(),
                cluster_id: cluster_row.id,
                symbol: symbol.clone(),
            };
            sqlx::query(
                r#"
                INSERT INTO correlation_cluster_members (id, cluster_id, symbol)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(member.id)
            .bind(member.cluster_id)
            .bind(&member.symbol)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    Ok(calculation)
}

fn big(v: f64) -> BigDecimal {
    BigDecimal::from_str(&format!("{v:.10}")).unwrap_or_else(|_| BigDecimal::from(0))
}
