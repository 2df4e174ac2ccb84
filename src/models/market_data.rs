use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// One daily bar per (symbol, date), upsert-only. Treasury yield series
// (DGS10 etc.) share the table with the yield percent stored in `close`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MarketDataPoint {
    pub id: Uuid,
    pub symbol: String,
    pub date: NaiveDate,
    pub open: Option<BigDecimal>,
    pub high: Option<BigDecimal>,
    pub low: Option<BigDecimal>,
    pub close: BigDecimal,
    pub volume: Option<i64>,
    pub data_source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CompanyProfile {
    pub id: Uuid,
    pub symbol: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Analyst consensus price target, refreshed alongside company profiles.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PriceTarget {
    pub id: Uuid,
    pub symbol: String,
    pub target_consensus: BigDecimal,
    pub analyst_count: Option<i32>,
    pub updated_at: DateTime<Utc>,
}
