use std::sync::Arc;

use sqlx::PgPool;

use crate::calendar::TradingCalendar;
use crate::config::BatchConfig;
use crate::external::market_provider::MarketDataProvider;
use crate::services::batch_orchestrator::BatchOrchestrator;
use crate::services::rate_limiter::RateLimiter;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub provider: Arc<dyn MarketDataProvider>,
    pub rate_limiter: Arc<RateLimiter>,
    pub calendar: Arc<TradingCalendar>,
    pub orchestrator: Arc<BatchOrchestrator>,
    pub config: BatchConfig,
}
