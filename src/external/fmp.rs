use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::Deserialize;

use crate::external::market_provider::{
    MarketDataProvider, MarketProviderError, ProviderBar, ProviderPriceTarget, ProviderProfile,
    ProviderYieldPoint,
};

/// Financial Modeling Prep adapter - primary provider.
///
/// Serves daily OHLCV history, company profiles and treasury series. Needs
/// an API key (`FMP_API_KEY`); the free tier covers US equities and ETFs.
pub struct FmpProvider {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl FmpProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            api_key,
            base_url: "https://financialmodelingprep.com/api/v3".to_string(),
        }
    }

}

#[derive(Debug, Deserialize)]
struct FmpHistoricalResponse {
    historical: Option<Vec<FmpBar>>,
}

#[derive(Debug, Deserialize)]
struct FmpBar {
    date: String,
    open: Option<f64>,
    high: Option<f64>,
    low: Option<f64>,
    close: f64,
    volume: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FmpProfile {
    symbol: String,
    #[serde(rename = "companyName")]
    company_name: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FmpPriceTarget {
    symbol: String,
    #[serde(rename = "targetConsensus")]
    target_consensus: Option<f64>,
    #[serde(rename = "targetMedian")]
    target_median: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FmpTreasuryRow {
    date: String,
    #[serde(rename = "year10")]
    year10: Option<f64>,
    #[serde(rename = "year30")]
    year30: Option<f64>,
    #[serde(rename = "month3")]
    month3: Option<f64>,
}

#[async_trait]
impl MarketDataProvider for FmpProvider {
    fn name(&self) -> &'static str {
        "fmp"
    }

    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderBar>, MarketProviderError> {
        let url = format!("{}/historical-price-full/{}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("from", start.to_string().as_str()),
                ("to", end.to_string().as_str()),
                ("apikey", self.api_key.as_str()),
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

        let body: FmpHistoricalResponse = resp
            .json()
            .await
            .map_err(|e| MarketProviderError::Parse(e.to_string()))?;

        let mut bars: Vec<ProviderBar> = body
            .historical
            .unwrap_or_default()
            .into_iter()
            .filter_map(|bar| {
                let date = NaiveDate::parse_from_str(&bar.date, "%Y-%m-%d").ok()?;
                let close = BigDecimal::try_from(bar.close).ok()?;
                Some(ProviderBar {
                    date,
                    open: bar.open.and_then(|v| BigDecimal::try_from(v).ok()),
                    high: bar.high.and_then(|v| BigDecimal::try_from(v).ok()),
                    low: bar.low.and_then(|v| BigDecimal::try_from(v).ok()),
                    close,
                    volume: bar.volume,
                })
            })
            .collect();

        // FMP returns newest-first
        bars.sort_by(|a, b| a.date.cmp(&b.date));

        if bars.is_empty() {
            return Err(MarketProviderError::NotFound);
        }

        Ok(bars)
    }

    async fn fetch_company_profile(
        &self,
        symbol: &str,
    ) -> Result<ProviderProfile, MarketProviderError> {
        let url = format!("{}/profile/{}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .query(&[("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| MarketProviderError::Network(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(MarketProviderError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(MarketProviderError::BadResponse(format!(
                "HTTP {}",
                resp.status()
            )));
        }

        let profiles: Vec<FmpProfile> = resp
            .json()
            .await
            .map_err(|e| MarketProviderError::Parse(e.to_string()))?;

        let profile = profiles
            .into_iter()
            .next()
            .ok_or(MarketProviderError::NotFound)?;

        Ok(ProviderProfile {
            symbol: profile.symbol,
            company_name: profile.company_name,
            sector: profile.sector,
            industry: profile.industry,
        })
    }

    async fn fetch_price_target(
        &self,
        symbol: &str,
    ) -> Result<ProviderPriceTarget, MarketProviderError> {
        let url = format!("{}/price-target-consensus", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[("symbol", symbol), ("apikey", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| MarketProviderError::Network(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(MarketProviderError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(MarketProviderError::BadResponse(format!("HTTP {}", resp.status())));
        }

        let targets: Vec<FmpPriceTarget> = resp
            .json()
            .await
            .map_err(|e| MarketProviderError::Parse(e.to_string()))?;

        let target = targets.into_iter().next().ok_or(MarketProviderError::NotFound)?;
        let consensus = target
            .target_consensus
            .or(target.target_median)
            .ok_or(MarketProviderError::NotFound)?;

        Ok(ProviderPriceTarget {
            symbol: target.symbol,
            target_consensus: consensus,
            analyst_count: None,
        })
    }

    async fn fetch_treasury_yields(
        &self,
        series: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderYieldPoint>, MarketProviderError> {
        let url = format!("{}/treasury", self.base_url);

        let resp = self
            .client
            .get(&url)
            .query(&[
                ("from", start.to_string().as_str()),
                ("to", end.to_string().as_str()),
                ("apikey", self.api_key.as_str()),
            ])
            .send()
            .await
            .map_err(|e| MarketProviderError::Network(e.to_string()))?;

        if resp.status().as_u16() == 429 {
            return Err(MarketProviderError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(MarketProviderError::BadResponse(format!("HTTP {}", resp.status())));
        }

        let rows: Vec<FmpTreasuryRow> = resp
            .json()
            .await
            .map_err(|e| MarketProviderError::Parse(e.to_string()))?;

        let mut points: Vec<ProviderYieldPoint> = rows
            .into_iter()
            .filter_map(|row| {
                let date = NaiveDate::parse_from_str(&row.date, "%Y-%m-%d").ok()?;
                let yield_pct = match series {
                    "DGS30" => row.year30,
                    "DGS3MO" => row.month3,
                    _ => row.year10,
                }?;
                Some(ProviderYieldPoint { date, yield_pct })
            })
            .collect();

        points.sort_by(|a, b| a.date.cmp(&b.date));

        if points.is_empty() {
            return Err(MarketProviderError::NotFound);
        }

        Ok(points)
    }

    fn supports_profiles(&self) -> bool {
        true
    }
}
