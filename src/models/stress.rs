use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioSeverity {
    Base,
    Mild,
    Moderate,
    Severe,
    Extreme,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScenarioCategory {
    Macro,
    Rates,
    Sector,
    Historical,
}

/// One shock definition: factor name -> shock as a decimal (-0.10 = -10%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StressScenario {
    pub name: String,
    pub category: ScenarioCategory,
    pub severity: ScenarioSeverity,
    pub active: bool,
    #[serde(default)]
    pub optional: bool,
    pub shocked_factors: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StressTestResult {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub scenario_name: String,
    pub calculation_date: NaiveDate,
    pub severity: String,
    pub direct_pnl: BigDecimal,
    pub correlated_pnl: BigDecimal,
    pub correlation_effect: BigDecimal,
    pub factor_impacts: serde_json::Value,
}

/// Per-factor contribution to a scenario's direct P&L.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactorImpact {
    pub factor: String,
    pub beta: f64,
    pub shock: f64,
    pub exposure_basis: f64,
    pub impact: f64,
    /// True when the stored dollar exposure was missing and the basis fell
    /// back to beta x equity.
    pub fallback: bool,
}

#[derive(Debug, Clone)]
pub struct ScenarioPnl {
    pub scenario_name: String,
    pub severity: ScenarioSeverity,
    pub direct_pnl: f64,
    pub correlated_pnl: f64,
    pub correlation_effect: f64,
    pub factor_impacts: Vec<FactorImpact>,
}
