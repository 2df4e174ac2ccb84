use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The single end-of-day row per (portfolio, trading date).
///
/// `is_complete = false` marks a placeholder written at the start of the
/// snapshot phase; placeholders older than the configured grace window are
/// abandoned and eligible for admin cleanup.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioSnapshot {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub snapshot_date: NaiveDate,
    pub total_value: Option<BigDecimal>,
    pub cash_value: Option<BigDecimal>,
    pub long_value: Option<BigDecimal>,
    pub short_value: Option<BigDecimal>,
    pub gross_exposure: Option<BigDecimal>,
    pub net_exposure: Option<BigDecimal>,
    pub daily_pnl: Option<BigDecimal>,
    pub daily_realized_pnl: Option<BigDecimal>,
    pub cumulative_pnl: Option<BigDecimal>,
    pub daily_capital_flow: Option<BigDecimal>,
    pub num_positions: Option<i32>,
    pub equity_balance: Option<BigDecimal>,
    pub portfolio_delta: Option<BigDecimal>,
    pub portfolio_gamma: Option<BigDecimal>,
    pub portfolio_theta: Option<BigDecimal>,
    pub portfolio_vega: Option<BigDecimal>,
    pub target_price_value: Option<BigDecimal>,
    pub realized_vol_21d: Option<BigDecimal>,
    pub realized_vol_63d: Option<BigDecimal>,
    pub expected_vol_21d: Option<BigDecimal>,
    pub volatility_trend: Option<String>,
    pub volatility_percentile: Option<BigDecimal>,
    pub market_beta: Option<BigDecimal>,
    pub ir_beta: Option<BigDecimal>,
    pub hhi: Option<BigDecimal>,
    pub effective_positions: Option<BigDecimal>,
    pub top3_concentration: Option<BigDecimal>,
    pub top10_concentration: Option<BigDecimal>,
    pub sector_exposure: Option<serde_json::Value>,
    pub is_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Computed fields filled in at the completion phase. Everything not yet
/// known stays None and is written as NULL.
#[derive(Debug, Clone, Default)]
pub struct SnapshotMetrics {
    pub total_value: f64,
    pub cash_value: f64,
    pub long_value: f64,
    pub short_value: f64,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub daily_pnl: f64,
    pub daily_realized_pnl: f64,
    pub cumulative_pnl: f64,
    pub daily_capital_flow: f64,
    pub num_positions: i32,
    pub equity_balance: f64,
    pub portfolio_delta: Option<f64>,
    pub portfolio_gamma: Option<f64>,
    pub portfolio_theta: Option<f64>,
    pub portfolio_vega: Option<f64>,
    pub target_price_value: Option<f64>,
    pub realized_vol_21d: Option<f64>,
    pub realized_vol_63d: Option<f64>,
    pub expected_vol_21d: Option<f64>,
    pub volatility_trend: Option<String>,
    pub volatility_percentile: Option<f64>,
    pub market_beta: Option<f64>,
    pub ir_beta: Option<f64>,
    pub hhi: Option<f64>,
    pub effective_positions: Option<f64>,
    pub top3_concentration: Option<f64>,
    pub top10_concentration: Option<f64>,
    pub sector_exposure: Option<serde_json::Value>,
}
