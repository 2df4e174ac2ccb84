use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{info, warn};

use crate::external::market_provider::{
    MarketDataProvider, MarketProviderError, ProviderBar, ProviderPriceTarget, ProviderProfile,
    ProviderYieldPoint,
};

/// Ordered list of providers tried front to back; the first non-empty
/// answer wins.
///
/// Rate limits propagate immediately (retrying a different provider will
/// not un-throttle the caller); everything else falls through to the next
/// adapter.
pub struct ProviderChain {
    providers: Vec<Box<dyn MarketDataProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Box<dyn MarketDataProvider>>) -> Self {
        Self { providers }
    }
}

#[async_trait]
impl MarketDataProvider for ProviderChain {
    fn name(&self) -> &'static str {
        "chain"
    }

    async fn fetch_daily_bars(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderBar>, MarketProviderError> {
        let mut last_error = MarketProviderError::NotFound;

        for provider in &self.providers {
            match provider.fetch_daily_bars(symbol, start, end).await {
                Ok(bars) if !bars.is_empty() => {
                    info!("Fetched {} bars for {} from {}", bars.len(), symbol, provider.name());
                    return Ok(bars);
                }
                Ok(_) => {
                    warn!("{} returned no bars for {}, trying next provider", provider.name(), symbol);
                    last_error = MarketProviderError::NotFound;
                }
                Err(MarketProviderError::RateLimited) => {
                    return Err(MarketProviderError::RateLimited);
                }
                Err(e) => {
                    warn!("{} failed for {}: {}", provider.name(), symbol, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn fetch_company_profile(
        &self,
        symbol: &str,
    ) -> Result<ProviderProfile, MarketProviderError> {
        let mut last_error = MarketProviderError::NotFound;

        for provider in &self.providers {
            if !provider.supports_profiles() {
                continue;
            }
            match provider.fetch_company_profile(symbol).await {
                Ok(profile) => return Ok(profile),
                Err(MarketProviderError::RateLimited) => {
                    return Err(MarketProviderError::RateLimited);
                }
                Err(e) => {
                    warn!("{} profile lookup failed for {}: {}", provider.name(), symbol, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn fetch_price_target(
        &self,
        symbol: &str,
    ) -> Result<ProviderPriceTarget, MarketProviderError> {
        let mut last_error = MarketProviderError::NotFound;

        for provider in &self.providers {
            match provider.fetch_price_target(symbol).await {
                Ok(target) => return Ok(target),
                Err(MarketProviderError::RateLimited) => {
                    return Err(MarketProviderError::RateLimited);
                }
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }

    async fn fetch_treasury_yields(
        &self,
        series: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<ProviderYieldPoint>, MarketProviderError> {
        let mut last_error = MarketProviderError::NotFound;

        for provider in &self.providers {
            match provider.fetch_treasury_yields(series, start, end).await {
                Ok(points) if !points.is_empty() => return Ok(points),
                Ok(_) => last_error = MarketProviderError::NotFound,
                Err(MarketProviderError::RateLimited) => {
                    return Err(MarketProviderError::RateLimited);
                }
                Err(e) => {
                    warn!("{} treasury fetch failed for {}: {}", provider.name(), series, e);
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    fn supports_profiles(&self) -> bool {
        self.providers.iter().any(|p| p.supports_profiles())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bigdecimal::BigDecimal;
    use std::str::FromStr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StubProvider {
        name: &'static str,
        bars: Vec<ProviderBar>,
        fail: bool,
        calls: AtomicUsize,
    }

    impl StubProvider {
        fn with_bars(name: &'static str, closes: &[f64]) -> Self {
            let bars = closes
                .iter()
                .enumerate()
                .map(|(i, c)| ProviderBar {
                    date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap() + chrono::Duration::days(i as i64),
                    open: None,
                    high: None,
                    low: None,
                    close: BigDecimal::from_str(&c.to_string()).unwrap(),
                    volume: None,
                })
                .collect();
            Self { name, bars, fail: false, calls: AtomicUsize::new(0) }
        }

        fn failing(name: &'static str) -> Self {
            Self { name, bars: Vec::new(), fail: true, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl MarketDataProvider for StubProvider {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_daily_bars(
            &self,
            _symbol: &str,
            _start: NaiveDate,
            _end: NaiveDate,
        ) -> Result<Vec<ProviderBar>, MarketProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MarketProviderError::BadResponse("boom".into()))
            } else if self.bars.is_empty() {
                Err(MarketProviderError::NotFound)
            } else {
                Ok(self.bars.clone())
            }
        }

        async fn fetch_company_profile(
            &self,
            _symbol: &str,
        ) -> Result<ProviderProfile, MarketProviderError> {
            Err(MarketProviderError::NotFound)
        }
    }

    fn window() -> (NaiveDate, NaiveDate) {
        (
            NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            NaiveDate::from_ymd_opt(2026, 1, 9).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_first_non_empty_wins() {
        let chain = ProviderChain::new(vec![
            Box::new(StubProvider::with_bars("primary", &[100.0, 101.0])),
            Box::new(StubProvider::with_bars("fallback", &[1.0])),
        ]);
        let (start, end) = window();
        let bars = chain.fetch_daily_bars("AAPL", start, end).await.unwrap();
        assert_eq!(bars.len(), 2);
    }

    #[tokio::test]
    async fn test_falls_through_on_failure() {
        let chain = ProviderChain::new(vec![
            Box::new(StubProvider::failing("primary")),
            Box::new(StubProvider::with_bars("fallback", &[100.0])),
        ]);
        let (start, end) = window();
        let bars = chain.fetch_daily_bars("AAPL", start, end).await.unwrap();
        assert_eq!(bars.len(), 1);
    }

    #[tokio::test]
    async fn test_all_failed_returns_error() {
        let chain = ProviderChain::new(vec![
            Box::new(StubProvider::failing("primary")),
            Box::new(StubProvider::failing("fallback")),
        ]);
        let (start, end) = window();
        assert!(chain.fetch_daily_bars("AAPL", start, end).await.is_err());
    }
}
