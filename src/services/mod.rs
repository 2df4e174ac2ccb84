pub mod batch_orchestrator;
pub mod beta_service;
pub mod clustering;
pub mod correlation_service;
pub mod factor_service;
pub mod job_scheduler_service;
pub mod market_data;
pub mod rate_limiter;
pub mod regression;
pub mod sector_service;
pub mod snapshot_service;
pub mod stress_service;
pub mod symbol_universe;
pub mod volatility_service;
