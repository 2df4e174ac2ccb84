use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// In-memory state of the single in-flight batch run. Never persisted;
/// exposed through the admin status endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct BatchRunState {
    pub batch_run_id: String,
    pub started_at: DateTime<Utc>,
    pub triggered_by: String,
    pub total_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub current_job_name: Option<String>,
    pub current_portfolio_name: Option<String>,
}

impl BatchRunState {
    pub fn new(triggered_by: impl Into<String>) -> Self {
        Self {
            batch_run_id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            triggered_by: triggered_by.into(),
            total_jobs: 0,
            completed_jobs: 0,
            failed_jobs: 0,
            current_job_name: None,
            current_portfolio_name: None,
        }
    }
}

/// Options accepted by the admin run endpoint and the scheduler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BatchRunOptions {
    pub portfolio_id: Option<Uuid>,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub force_rerun: bool,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// What one (portfolio, date) pipeline pass produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PortfolioDayStatus {
    Completed,
    SkippedAlreadyComplete,
    Failed,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchRunSummary {
    pub batch_run_id: String,
    pub run_date: NaiveDate,
    pub portfolios_processed: usize,
    pub portfolio_days_completed: usize,
    pub portfolio_days_skipped: usize,
    pub portfolio_days_failed: usize,
    pub universe_symbols: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}
