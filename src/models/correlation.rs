use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Parent row owning the pairwise correlations and clusters for one
/// (portfolio, date). Children are deleted first, then the parent.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrelationCalculation {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub calculation_date: NaiveDate,
    pub window_days: i32,
    pub symbol_count: i32,
    pub avg_correlation: Option<BigDecimal>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PairwiseCorrelation {
    pub id: Uuid,
    pub calculation_id: Uuid,
    pub symbol_1: String,
    pub symbol_2: String,
    pub correlation: BigDecimal,
    pub observations: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrelationCluster {
    pub id: Uuid,
    pub calculation_id: Uuid,
    pub cluster_label: String,
    pub avg_intra_correlation: Option<BigDecimal>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrelationClusterMember {
    pub id: Uuid,
    pub cluster_id: Uuid,
    pub symbol: String,
}

/// In-memory result handed between the correlation service and persistence.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationMatrix {
    pub symbols: Vec<String>,
    /// Symmetric with unit diagonal; NaN where a pair fell below the
    /// minimum observation count.
    pub matrix: Vec<Vec<f64>>,
    pub pairs: Vec<CorrelationPairResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationPairResult {
    pub symbol_1: String,
    pub symbol_2: String,
    pub correlation: f64,
    pub p_value: Option<f64>,
    pub observations: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ClusterResult {
    pub label: String,
    pub symbols: Vec<String>,
    pub avg_intra_correlation: f64,
}
