pub mod company_profile_sync_job;
pub mod correlations_job;
pub mod daily_batch_job;
pub mod historical_backfill_job;
