mod app;
mod calendar;
mod config;
mod db;
mod errors;
mod external;
mod jobs;
mod logging;
mod models;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;

use crate::calendar::TradingCalendar;
use crate::config::BatchConfig;
use crate::external::fmp::FmpProvider;
use crate::external::market_provider::MarketDataProvider;
use crate::external::provider_chain::ProviderChain;
use crate::external::yahoo::YahooProvider;
use crate::services::batch_orchestrator::BatchOrchestrator;
use crate::services::job_scheduler_service::{JobContext, JobSchedulerService};
use crate::services::rate_limiter::RateLimiter;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    logging::init_logging(logging::LoggingConfig::from_env())
        .map_err(|e| anyhow::anyhow!("logging init failed: {}", e))?;

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    let config = BatchConfig::from_env();

    // Provider chain: FMP primary (when a key is configured), Yahoo fallback
    let mut providers: Vec<Box<dyn MarketDataProvider>> = Vec::new();
    if let Ok(api_key) = std::env::var("FMP_API_KEY") {
        providers.push(Box::new(FmpProvider::new(api_key)));
    } else {
        tracing::warn!("FMP_API_KEY not set, running on the fallback provider only");
    }
    providers.push(Box::new(YahooProvider::new()));
    let provider: Arc<dyn MarketDataProvider> = Arc::new(ProviderChain::new(providers));

    let rate_limiter = Arc::new(RateLimiter::new(3, 60));
    let calendar = Arc::new(TradingCalendar::new());

    let orchestrator = Arc::new(BatchOrchestrator::new(
        pool.clone(),
        provider.clone(),
        rate_limiter.clone(),
        calendar.clone(),
        config.clone(),
    ));

    let mut scheduler = JobSchedulerService::new(JobContext {
        pool: Arc::new(pool.clone()),
        provider: provider.clone(),
        rate_limiter: rate_limiter.clone(),
        calendar: calendar.clone(),
        orchestrator: orchestrator.clone(),
        config: config.clone(),
    })
    .await
    .map_err(|e| anyhow::anyhow!("scheduler init failed: {}", e))?;
    scheduler
        .start()
        .await
        .map_err(|e| anyhow::anyhow!("scheduler start failed: {}", e))?;

    let state = AppState {
        pool,
        provider,
        rate_limiter,
        calendar,
        orchestrator,
        config,
    };
    let app = app::create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    let listener = TcpListener::bind(&addr).await.context("failed to bind listener")?;
    tracing::info!("🚀 Quantfolio analytics engine running at http://{}/", addr);
    axum::serve(listener, app).await.context("server exited")?;

    Ok(())
}
