use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One daily OHLCV bar as returned by a provider. Only `close` is
/// guaranteed; sparse providers leave the rest empty.
#[derive(Debug, Clone)]
pub struct ProviderBar {
    pub date: NaiveDate,
    pub open: Option<BigDecimal>,
    pub high: Option<BigDecimal>,
    pub low: Option<BigDecimal>,
    pub close: BigDecimal,
    pub volume: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderProfile {
    pub symbol: String,
    pub company_name: Option<String>,
    pub sector: Option<String>,
    pub industry: Option<String>,
}

/// Analyst consensus price target for one symbol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderPriceTarget {
    pub symbol: String,
    pub target_consensus: f64,
    pub analyst_count: Option<i32>,
}

/// One observation of a treasury yield series (percent).
#[derive(Debug, Clone)]
pub struct ProviderYieldPoint {
    pub date: NaiveDate,
    pub yield_pct: f64,
}

#[derive(Debug, Error)]
pub enum MarketProviderError {
    #[error("network error: {0}")]
    Network(String),

    #[error("bad response: {0}")]
    BadResponse(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("rate limited")]
    RateLimited,

    #[error("symbol not found")]
    NotFound,
}

/// Capability interface every concrete market-data adapter implements.
/// Adapters that cannot serve a capability return `NotFound` and the
/// chain moves on to the next provider; the optional capabilities default
/// to `NotFound` so sparse adapters only implement what they have.
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderBar>, MarketProviderError>;

    async fn fetch_company_profile(
        &self,
        symbol: &str,
    ) -> Result<ProviderProfile, MarketProviderError>;

    async fn fetch_price_target(
        &self,
        _symbol: &str,
    ) -> Result<ProviderPriceTarget, MarketProviderError> {
        Err(MarketProviderError::NotFound)
    }

    async fn fetch_treasury_yields(
        &self,
        _series: &str,
        _start: NaiveDate,
        _end: NaiveDate,
    ) -> Result<Vec<ProviderYieldPoint>, MarketProviderError> {
        Err(MarketProviderError::NotFound)
    }

    fn supports_profiles(&self) -> bool {
        false
    }
}
