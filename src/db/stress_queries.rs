use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use sqlx::PgPool;
use std::str::FromStr;
use uuid::Uuid;

use crate::models::stress::{ScenarioPnl, StressTestResult};

pub async fn upsert_result(
    pool: &PgPool,
    portfolio_id: Uuid,
    calculation_date: NaiveDate,
    pnl: &ScenarioPnl,
) -> Result<StressTestResult, sqlx::Error> {
    let factor_impacts = serde_json::to_value(&pnl.factor_impacts)
        .unwrap_or(serde_json::Value::Null);
    let severity = serde_json::to_value(pnl.severity)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_else(|| "base".to_string());

    sqlx::query_as::<_, StressTestResult>(
        r#"
        INSERT INTO stress_test_results
            (id, portfolio_id, scenario_name, calculation_date, severity,
             direct_pnl, correlated_pnl, correlation_effect, factor_impacts)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        ON CONFLICT (portfolio_id, scenario_name, calculation_date)
        DO UPDATE SET severity = EXCLUDED.severity,
                      direct_pnl = EXCLUDED.direct_pnl,
                      correlated_pnl = EXCLUDED.correlated_pnl,
                      correlation_effect = EXCLUDED.correlation_effect,
                      factor_impacts = EXCLUDED.factor_impacts
        RETURNING id, portfolio_id, scenario_name, calculation_date, severity,
                  direct_pnl, correlated_pnl, correlation_effect, factor_impacts
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(portfolio_id)
    .bind(&pnl.scenario_name)
    .bind(calculation_date)
    .bind(severity)
    .bind(big(pnl.direct_pnl))
    .bind(big(pnl.correlated_pnl))
    .bind(big(pnl.correlation_effect))
    .bind(factor_impacts)
    .fetch_one(pool)
    .await
}

fn big(v: f64) -> BigDecimal {
    BigDecimal::from_str(&format!("{v:.6}")).unwrap_or_else(|_| BigDecimal::from(0))
}
