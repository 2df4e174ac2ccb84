use bigdecimal::ToPrimitive;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::models::position::PositionGreeks;

/// Latest Greeks row per position on or before `date`. Rows are written
/// by the sibling pricing service.
pub async fn fetch_latest_greeks(
    pool: &PgPool,
    position_ids: &[Uuid],
    date: NaiveDate,
) -> Result<Vec<PositionGreeks>, sqlx::Error> {
    if position_ids.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, PositionGreeks>(
        r#"
        SELECT DISTINCT ON (position_id)
               id, position_id, calculation_date, delta, gamma, theta, vega
        FROM position_greeks
        WHERE position_id = ANY($1) AND calculation_date <= $2
        ORDER BY position_id, calculation_date DESC
        "#,
    )
    .bind(position_ids)
    .bind(date)
    .fetch_all(pool)
    .await
}

/// Delta per position, for the factor aggregator's option adjustment.
pub async fn fetch_deltas(
    pool: &PgPool,
    position_ids: &[Uuid],
    date: NaiveDate,
) -> Result<HashMap<Uuid, f64>, sqlx::Error> {
    let greeks = fetch_latest_greeks(pool, position_ids, date).await?;
    Ok(greeks
        .into_iter()
        .filter_map(|g| g.delta.and_then(|d| d.to_f64()).map(|d| (g.position_id, d)))
        .collect())
}
