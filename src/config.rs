/// Batch-engine tunables, loaded once at startup and passed by handle.
///
/// Every knob has the production default baked in so a bare environment
/// still produces a working engine.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub batch_v2_enabled: bool,
    pub market_beta_window_days: usize,
    pub min_regression_days: usize,
    pub ridge_window_days: usize,
    pub spread_window_days: usize,
    pub spread_min_days: usize,
    pub beta_cap: f64,
    pub beta_confidence: f64,
    pub ridge_lambda: f64,
    pub correlation_window_days: usize,
    pub corr_min_pair_obs: usize,
    pub cluster_corr_threshold: f64,
    pub stress_corr_clamp: (f64, f64),
    pub stress_correlation_scale: f64,
    pub stress_scenarios_path: Option<String>,
    pub snapshot_placeholder_grace_hours: i64,
    pub max_portfolio_concurrency: usize,
    pub provider_batch_size: usize,
    pub risk_free_rate: f64,
    pub admin_api_token: Option<String>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_v2_enabled: true,
            market_beta_window_days: 90,
            min_regression_days: 60,
            ridge_window_days: 60,
            spread_window_days: 180,
            spread_min_days: 60,
            beta_cap: 5.0,
            beta_confidence: 0.10,
            ridge_lambda: 1.0,
            correlation_window_days: 90,
            corr_min_pair_obs: 30,
            cluster_corr_threshold: 0.7,
            stress_corr_clamp: (-0.95, 0.95),
            stress_correlation_scale: 0.25,
            stress_scenarios_path: None,
            snapshot_placeholder_grace_hours: 1,
            max_portfolio_concurrency: 8,
            provider_batch_size: 50,
            risk_free_rate: 0.045,
            admin_api_token: None,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl BatchConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            batch_v2_enabled: env_parse("BATCH_V2_ENABLED", defaults.batch_v2_enabled),
            market_beta_window_days: env_parse("MARKET_BETA_WINDOW_DAYS", defaults.market_beta_window_days),
            min_regression_days: env_parse("MIN_REGRESSION_DAYS", defaults.min_regression_days),
            ridge_window_days: env_parse("RIDGE_WINDOW_DAYS", defaults.ridge_window_days),
            spread_window_days: env_parse("SPREAD_WINDOW_DAYS", defaults.spread_window_days),
            spread_min_days: env_parse("SPREAD_MIN_DAYS", defaults.spread_min_days),
            beta_cap: env_parse("BETA_CAP", defaults.beta_cap),
            beta_confidence: env_parse("BETA_CONFIDENCE", defaults.beta_confidence),
            ridge_lambda: env_parse("RIDGE_LAMBDA", defaults.ridge_lambda),
            correlation_window_days: env_parse("CORRELATION_WINDOW_DAYS", defaults.correlation_window_days),
            corr_min_pair_obs: env_parse("CORR_MIN_PAIR_OBS", defaults.corr_min_pair_obs),
            cluster_corr_threshold: env_parse("CLUSTER_CORR_THRESHOLD", defaults.cluster_corr_threshold),
            stress_corr_clamp: (
                env_parse("STRESS_CORR_CLAMP_MIN", defaults.stress_corr_clamp.0),
                env_parse("STRESS_CORR_CLAMP_MAX", defaults.stress_corr_clamp.1),
            ),
            stress_correlation_scale: env_parse("STRESS_CORRELATION_SCALE", defaults.stress_correlation_scale),
            stress_scenarios_path: std::env::var("STRESS_SCENARIOS_PATH").ok(),
            snapshot_placeholder_grace_hours: env_parse(
                "SNAPSHOT_PLACEHOLDER_GRACE_HOURS",
                defaults.snapshot_placeholder_grace_hours,
            ),
            max_portfolio_concurrency: env_parse(
                "ORCHESTRATOR_MAX_PORTFOLIO_CONCURRENCY",
                defaults.max_portfolio_concurrency,
            ),
            provider_batch_size: env_parse("PROVIDER_BATCH_SIZE", defaults.provider_batch_size),
            risk_free_rate: env_parse("RISK_FREE_RATE", defaults.risk_free_rate),
            admin_api_token: std::env::var("ADMIN_API_TOKEN").ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let cfg = BatchConfig::default();
        assert_eq!(cfg.market_beta_window_days, 90);
        assert_eq!(cfg.min_regression_days, 60);
        assert_eq!(cfg.spread_window_days, 180);
        assert_eq!(cfg.beta_cap, 5.0);
        assert_eq!(cfg.ridge_lambda, 1.0);
        assert_eq!(cfg.corr_min_pair_obs, 30);
        assert_eq!(cfg.stress_corr_clamp, (-0.95, 0.95));
        assert_eq!(cfg.snapshot_placeholder_grace_hours, 1);
        assert_eq!(cfg.max_portfolio_concurrency, 8);
    }
}
