use bigdecimal::ToPrimitive;
use chrono::NaiveDate;
use dashmap::DashMap;
use sqlx::PgPool;
use std::collections::{BTreeMap, HashMap};
use tracing::{info, warn};

use crate::db::market_data_queries;
use crate::errors::AppError;
use crate::external::market_provider::MarketDataProvider;
use crate::models::position::{InvestmentClass, Position};
use crate::services::rate_limiter::RateLimiter;

/// Contract multiplier for listed equity options.
pub const OPTION_MULTIPLIER: f64 = 100.0;

/// Per-run close cache keyed by (symbol, date). Filled during refresh and
/// by the first window load of each symbol; discarded with the run.
pub struct PriceCache {
    closes: DashMap<(String, NaiveDate), f64>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self { closes: DashMap::new() }
    }

    pub fn get(&self, symbol: &str, date: NaiveDate) -> Option<f64> {
        self.closes.get(&(symbol.to_string(), date)).map(|v| *v)
    }

    pub fn insert(&self, symbol: &str, date: NaiveDate, close: f64) {
        self.closes.insert((symbol.to_string(), date), close);
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }
}

impl Default for PriceCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Aligned `(dates x symbols)` table of simple daily returns. The single
/// source of return series for every regression and correlation.
#[derive(Debug, Clone)]
pub struct ReturnMatrix {
    pub dates: Vec<NaiveDate>,
    pub symbols: Vec<String>,
    /// One column per symbol, same order as `symbols`; with
    /// `align_dates=false` a column carries NaN where that symbol had no
    /// bar on the date.
    pub columns: Vec<Vec<f64>>,
}

impl ReturnMatrix {
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty() || self.symbols.is_empty()
    }

    pub fn column(&self, symbol: &str) -> Option<&[f64]> {
        let idx = self.symbols.iter().position(|s| s == symbol)?;
        Some(&self.columns[idx])
    }

    /// (dates, values) for one symbol with NaN rows dropped.
    pub fn series(&self, symbol: &str) -> Option<(Vec<NaiveDate>, Vec<f64>)> {
        let col = self.column(symbol)?;
        let mut dates = Vec::new();
        let mut values = Vec::new();
        for (d, v) in self.dates.iter().zip(col.iter()) {
            if v.is_finite() {
                dates.push(*d);
                values.push(*v);
            }
        }
        Some((dates, values))
    }
}

/// Refresh market data for a set of symbols over a date window.
///
/// Symbols whose cache is already current for `end` are skipped. Fetching
/// is chunked (`batch_size`) and paced by the shared rate limiter; a
/// symbol no provider can serve is logged and skipped, never fatal.
/// Returns (refreshed, failed) counts.
pub async fn refresh_symbols(
    pool: &PgPool,
    provider: &dyn MarketDataProvider,
    rate_limiter: &RateLimiter,
    cache: &PriceCache,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    batch_size: usize,
) -> Result<(usize, usize), AppError> {
    if symbols.is_empty() {
        return Ok((0, 0));
    }

    let latest_dates = market_data_queries::fetch_latest_dates(pool, symbols).await?;

    let mut refreshed = 0;
    let mut failed = 0;

    for chunk in symbols.chunks(batch_size.max(1)) {
        for symbol in chunk {
            if latest_dates.get(symbol).is_some_and(|latest| *latest >= end) {
                continue;
            }

            let _guard = rate_limiter.acquire().await;
            match provider.fetch_daily_bars(symbol, start, end).await {
                Ok(bars) => {
                    for bar in &bars {
                        if let Some(close) = bar.close.to_f64() {
                            cache.insert(symbol, bar.date, close);
                        }
                    }
                    market_data_queries::upsert_bars(pool, symbol, provider.name(), &bars).await?;
                    refreshed += 1;
                }
                Err(crate::external::market_provider::MarketProviderError::RateLimited) => {
                    // Remaining symbols defer to the next scheduled run
                    warn!("Provider chain rate limited at {}, aborting refresh", symbol);
                    return Err(AppError::RateLimited);
                }
                Err(e) => {
                    warn!("Skipping {}: no provider could serve it ({})", symbol, e);
                    failed += 1;
                }
            }
        }
    }

    info!("Market data refresh complete: {} refreshed, {} failed, cache has {} closes",
          refreshed, failed, cache.len());
    Ok((refreshed, failed))
}

/// Load closes for a symbol set into date-keyed maps, serving from the
/// per-run cache where possible.
async fn load_close_maps(
    pool: &PgPool,
    cache: Option<&PriceCache>,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<HashMap<String, BTreeMap<NaiveDate, f64>>, AppError> {
    let bars = market_data_queries::fetch_bars_window(pool, symbols, start, end).await?;

    let mut maps: HashMap<String, BTreeMap<NaiveDate, f64>> = HashMap::new();
    for bar in bars {
        if let Some(close) = bar.close.to_f64() {
            if let Some(cache) = cache {
                cache.insert(&bar.symbol, bar.date, close);
            }
            maps.entry(bar.symbol).or_default().insert(bar.date, close);
        }
    }
    Ok(maps)
}

/// Simple percentage returns `close_t / close_{t-1} - 1` per symbol over
/// [start, end]. With `align_dates` only dates where every requested
/// symbol has a return survive (inner join); otherwise missing cells are
/// NaN. Non-trading days never appear because no bars exist for them.
pub async fn get_returns(
    pool: &PgPool,
    cache: Option<&PriceCache>,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    align_dates: bool,
) -> Result<ReturnMatrix, AppError> {
    build_return_matrix(pool, cache, symbols, start, end, align_dates, false).await
}

/// Log returns `ln(close_t / close_{t-1})`; correlation engine only.
pub async fn get_log_returns(
    pool: &PgPool,
    cache: Option<&PriceCache>,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    align_dates: bool,
) -> Result<ReturnMatrix, AppError> {
    build_return_matrix(pool, cache, symbols, start, end, align_dates, true).await
}

async fn build_return_matrix(
    pool: &PgPool,
    cache: Option<&PriceCache>,
    symbols: &[String],
    start: NaiveDate,
    end: NaiveDate,
    align_dates: bool,
    log_returns: bool,
) -> Result<ReturnMatrix, AppError> {
    let close_maps = load_close_maps(pool, cache, symbols, start, end).await?;

    let mut per_symbol: HashMap<String, BTreeMap<NaiveDate, f64>> = HashMap::new();
    for symbol in symbols {
        let Some(closes) = close_maps.get(symbol) else { continue };
        per_symbol.insert(symbol.clone(), compute_returns(closes, log_returns));
    }

    Ok(assemble_matrix(symbols, &per_symbol, align_dates))
}

fn compute_returns(closes: &BTreeMap<NaiveDate, f64>, log_returns: bool) -> BTreeMap<NaiveDate, f64> {
    let mut out = BTreeMap::new();
    let mut prev: Option<f64> = None;
    for (date, close) in closes {
        if let Some(p) = prev {
            if p > 0.0 && *close > 0.0 {
                let r = if log_returns { (close / p).ln() } else { close / p - 1.0 };
                out.insert(*date, r);
            }
        }
        prev = Some(*close);
    }
    out
}

fn assemble_matrix(
    symbols: &[String],
    per_symbol: &HashMap<String, BTreeMap<NaiveDate, f64>>,
    align_dates: bool,
) -> ReturnMatrix {
    let present: Vec<String> = symbols
        .iter()
        .filter(|s| per_symbol.get(*s).is_some_and(|m| !m.is_empty()))
        .cloned()
        .collect();

    if present.is_empty() {
        return ReturnMatrix { dates: Vec::new(), symbols: Vec::new(), columns: Vec::new() };
    }

    let dates: Vec<NaiveDate> = if align_dates {
        let mut iter = present.iter();
        let first = per_symbol[iter.next().unwrap()].keys().copied().collect::<Vec<_>>();
        let mut common: Vec<NaiveDate> = first;
        for symbol in iter {
            let keys = &per_symbol[symbol];
            common.retain(|d| keys.contains_key(d));
        }
        common
    } else {
        let mut union: Vec<NaiveDate> = present
            .iter()
            .flat_map(|s| per_symbol[s].keys().copied())
            .collect();
        union.sort();
        union.dedup();
        union
    };

    let columns: Vec<Vec<f64>> = present
        .iter()
        .map(|s| {
            let map = &per_symbol[s];
            dates.iter().map(|d| map.get(d).copied().unwrap_or(f64::NAN)).collect()
        })
        .collect();

    ReturnMatrix { dates, symbols: present, columns }
}

/// Canonical position valuation, reused by every downstream calculation.
///
/// PUBLIC: qty x last close. OPTIONS: qty x 100 x last close, sign from
/// long/short. PRIVATE: qty x entry price (no mark). With `signed=false`
/// the magnitude is returned for gross aggregation.
pub fn position_value(position: &Position, last_close: Option<f64>, signed: bool) -> f64 {
    let qty = position.quantity_f64().abs();
    let direction = position.position_type.direction();

    let value = match position.investment_class {
        InvestmentClass::Private => qty * position.entry_price_f64(),
        InvestmentClass::Options => {
            let close = last_close.unwrap_or_else(|| position.entry_price_f64());
            qty * OPTION_MULTIPLIER * close
        }
        InvestmentClass::Public => {
            let close = last_close.unwrap_or_else(|| position.entry_price_f64());
            qty * close
        }
    };

    if signed {
        value * direction
    } else {
        value
    }
}

/// Valuation that trusts the stored mark when asked not to recalculate.
pub fn position_value_cached(position: &Position, signed: bool) -> f64 {
    if let Some(mv) = position.market_value.as_ref().and_then(|v| v.to_f64()) {
        return if signed { mv } else { mv.abs() };
    }
    position_value(position, position.last_price.as_ref().and_then(|v| v.to_f64()), signed)
}

/// Latest close on or before `date`, cache first.
pub async fn latest_close(
    pool: &PgPool,
    cache: Option<&PriceCache>,
    symbol: &str,
    date: NaiveDate,
) -> Result<Option<f64>, AppError> {
    if let Some(cache) = cache {
        if let Some(close) = cache.get(symbol, date) {
            return Ok(Some(close));
        }
    }

    let bar = market_data_queries::fetch_latest_bar(pool, symbol, date).await?;
    Ok(bar.and_then(|b| {
        let close = b.close.to_f64();
        if let (Some(cache), Some(c)) = (cache, close) {
            cache.insert(symbol, b.date, c);
        }
        close
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::position::PositionType;
    use bigdecimal::BigDecimal;
    use chrono::Utc;
    use std::str::FromStr;
    use uuid::Uuid;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).unwrap()
    }

    fn position(
        position_type: PositionType,
        investment_class: InvestmentClass,
        quantity: f64,
        entry_price: f64,
    ) -> Position {
        Position {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            symbol: "TEST".to_string(),
            position_type,
            investment_class,
            quantity: BigDecimal::from_str(&quantity.to_string()).unwrap(),
            entry_price: BigDecimal::from_str(&entry_price.to_string()).unwrap(),
            entry_date: date(5),
            exit_date: None,
            exit_price: None,
            underlying_symbol: None,
            strike_price: None,
            expiration_date: None,
            market_value: None,
            last_price: None,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_public_long_valuation() {
        let p = position(PositionType::Long, InvestmentClass::Public, 100.0, 158.0);
        assert_eq!(position_value(&p, Some(160.0), false), 16_000.0);
        assert_eq!(position_value(&p, Some(160.0), true), 16_000.0);
    }

    #[test]
    fn test_public_short_signed() {
        let p = position(PositionType::Short, InvestmentClass::Public, 50.0, 445.0);
        assert_eq!(position_value(&p, Some(450.0), false), 22_500.0);
        assert_eq!(position_value(&p, Some(450.0), true), -22_500.0);
    }

    #[test]
    fn test_option_contract_multiplier() {
        let p = position(PositionType::LongCall, InvestmentClass::Options, 2.0, 3.0);
        assert_eq!(position_value(&p, Some(4.5), true), 2.0 * 100.0 * 4.5);
        let sc = position(PositionType::ShortCall, InvestmentClass::Options, 2.0, 3.0);
        assert_eq!(position_value(&sc, Some(4.5), true), -900.0);
    }

    #[test]
    fn test_private_uses_entry_price() {
        let p = position(PositionType::Long, InvestmentClass::Private, 1.0, 100_000.0);
        // Last close must be ignored for private assets
        assert_eq!(position_value(&p, Some(5.0), true), 100_000.0);
    }

    #[test]
    fn test_cached_value_trusts_mark() {
        let mut p = position(PositionType::Long, InvestmentClass::Public, 10.0, 100.0);
        p.market_value = Some(BigDecimal::from_str("1234.5").unwrap());
        assert_eq!(position_value_cached(&p, true), 1234.5);
    }

    fn closes(pairs: &[(u32, f64)]) -> BTreeMap<NaiveDate, f64> {
        pairs.iter().map(|(d, c)| (date(*d), *c)).collect()
    }

    #[test]
    fn test_simple_returns() {
        let returns = compute_returns(&closes(&[(5, 100.0), (6, 110.0), (7, 99.0)]), false);
        assert_eq!(returns.len(), 2);
        assert!((returns[&date(6)] - 0.10).abs() < 1e-12);
        assert!((returns[&date(7)] - (-0.10)).abs() < 1e-12);
    }

    #[test]
    fn test_log_returns() {
        let returns = compute_returns(&closes(&[(5, 100.0), (6, 110.0)]), true);
        assert!((returns[&date(6)] - (1.1_f64).ln()).abs() < 1e-12);
    }

    #[test]
    fn test_aligned_matrix_inner_joins_dates() {
        let mut per_symbol = HashMap::new();
        per_symbol.insert(
            "A".to_string(),
            closes(&[(6, 0.01), (7, 0.02), (8, 0.03)]),
        );
        per_symbol.insert("B".to_string(), closes(&[(6, 0.05), (8, -0.01)]));

        let symbols = vec!["A".to_string(), "B".to_string()];
        let aligned = assemble_matrix(&symbols, &per_symbol, true);
        assert_eq!(aligned.dates, vec![date(6), date(8)]);
        assert_eq!(aligned.column("A").unwrap(), &[0.01, 0.03]);

        let unaligned = assemble_matrix(&symbols, &per_symbol, false);
        assert_eq!(unaligned.dates.len(), 3);
        assert!(unaligned.column("B").unwrap()[1].is_nan());
    }

    #[test]
    fn test_series_drops_nan() {
        let mut per_symbol = HashMap::new();
        per_symbol.insert("A".to_string(), closes(&[(6, 0.01), (8, 0.03)]));
        per_symbol.insert("B".to_string(), closes(&[(6, 0.05), (7, 0.02), (8, -0.01)]));
        let symbols = vec!["A".to_string(), "B".to_string()];
        let matrix = assemble_matrix(&symbols, &per_symbol, false);
        let (dates, values) = matrix.series("A").unwrap();
        assert_eq!(dates, vec![date(6), date(8)]);
        assert_eq!(values, vec![0.01, 0.03]);
    }

    #[test]
    fn test_price_cache_roundtrip() {
        let cache = PriceCache::new();
        assert!(cache.is_empty());
        cache.insert("AAPL", date(5), 160.0);
        assert_eq!(cache.get("AAPL", date(5)), Some(160.0));
        assert_eq!(cache.get("AAPL", date(6)), None);
    }
}
