use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::external::market_provider::{
    MarketDataProvider, MarketProviderError, ProviderBar, ProviderProfile,
};

/// Yahoo Finance chart adapter - fallback provider, no API key required.
/// Bars only; profile requests are answered with NotFound so the chain
/// keeps looking.
pub struct YahooProvider {
    client: reqwest::Client,
}

impl YahooProvider {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("Mozilla/5.0 (compatible; Quantfolio/0.1)")
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }
}

impl Default for YahooProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Deserialize)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Debug, Deserialize)]
struct YahooChart {
    result: Option<Vec<YahooResult>>,
    error: Option<YahooApiError>,
}

#[derive(Debug, Deserialize)]
struct YahooApiError {
    description: String,
}

#[derive(Debug, Deserialize)]
struct YahooResult {
    timestamp: Option<Vec<i64>>,
    indicators: YahooIndicators,
}

#[derive(Debug, Deserialize)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Debug, Deserialize)]
struct YahooQuote {
    open: Option<Vec<Option<f64>>>,
    high: Option<Vec<Option<f64>>>,
    low: Option<Vec<Option<f64>>>,
    close: Vec<Option<f64>>,
    volume: Option<Vec<Option<i64>>>,
}

#[async_trait]
impl MarketDataProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderBar>, MarketProviderError> {
        let url = format!("https://query1.finance.yahoo.com/v8/finance/chart/{}", symbol);

        let period1 = start
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);
        let period2 = end
            .and_hms_opt(23, 59, 59)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or(0);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("interval", "1d".to_string()),
                ("period1", period1.to_string()),
                ("period2", period2.to_string()),
            ])
            .send()
            .await
            .map_err(|e| MarketProviderError::Network(e.to_string()))?;

        match resp.status().as_u16() {
            404 => return Err(MarketProviderError::NotFound),
            429 => return Err(MarketProviderError::RateLimited),
            s if s >= 400 => {
                return Err(MarketProviderError::BadResponse(format!("HTTP {}", s)));
            }
            _ => {}
        }

        let body: YahooChartResponse = resp
            .json()
            .await
            .map_err(|e| MarketProviderError::Parse(e.to_string()))?;

        if let Some(error) = body.chart.error {
            if error.description.contains("No data found") {
                return Err(MarketProviderError::NotFound);
            }
            return Err(MarketProviderError::BadResponse(error.description));
        }

        let results = body
            .chart
            .result
            .ok_or_else(|| MarketProviderError::BadResponse("no results in response".into()))?;
        let result = results.first().ok_or(MarketProviderError::NotFound)?;

        let timestamps = result
            .timestamp
            .as_ref()
            .ok_or(MarketProviderError::NotFound)?;
        let quote = result
            .indicators
            .quote
            .first()
            .ok_or_else(|| MarketProviderError::BadResponse("no quote data in response".into()))?;

        if timestamps.len() != quote.close.len() {
            return Err(MarketProviderError::Parse(
                "timestamp and close arrays have different lengths".into(),
            ));
        }

        let series = |opt: &Option<Vec<Option<f64>>>, i: usize| -> Option<f64> {
            opt.as_ref().and_then(|v| v.get(i).copied().flatten())
        };

        let mut bars: Vec<ProviderBar> = timestamps
            .iter()
            .enumerate()
            .filter_map(|(i, ts)| {
                let close = quote.close.get(i).copied().flatten()?;
                let date = chrono::DateTime::from_timestamp(*ts, 0)?.date_naive();
                Some(ProviderBar {
                    date,
                    open: series(&quote.open, i).and_then(|v| BigDecimal::try_from(v).ok()),
                    high: series(&quote.high, i).and_then(|v| BigDecimal::try_from(v).ok()),
                    low: series(&quote.low, i).and_then(|v| BigDecimal::try_from(v).ok()),
                    close: BigDecimal::try_from(close).ok()?,
                    volume: quote.volume.as_ref().and_then(|v| v.get(i).copied().flatten()),
                })
            })
            .collect();

        bars.sort_by(|a, b| a.date.cmp(&b.date));

        if bars.is_empty() {
            return Err(MarketProviderError::NotFound);
        }

        Ok(bars)
    }

    async fn fetch_company_profile(
        &self,
        _symbol: &str,
    ) -> Result<ProviderProfile, MarketProviderError> {
        Err(MarketProviderError::NotFound)
    }
}
