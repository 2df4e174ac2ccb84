pub mod cleanup_queries;
pub mod correlation_queries;
pub mod factor_queries;
pub mod greeks_queries;
pub mod market_data_queries;
pub mod portfolio_queries;
pub mod position_queries;
pub mod profile_queries;
pub mod snapshot_queries;
pub mod stress_queries;
pub mod target_queries;
