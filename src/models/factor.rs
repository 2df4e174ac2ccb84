use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum FactorKind {
    #[serde(rename = "ridge")]
    #[sqlx(rename = "ridge")]
    Ridge,
    #[serde(rename = "spread")]
    #[sqlx(rename = "spread")]
    Spread,
}

/// A named factor mapped to a long ETF or a long-short ETF pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FactorDefinition {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub factor_kind: FactorKind,
    pub long_etf: String,
    pub short_etf: Option<String>,
    pub is_active: bool,
}

impl FactorDefinition {
    /// The ten-factor universe: six ridge factors and four spreads.
    pub fn builtin() -> Vec<(&'static str, &'static str, FactorKind, &'static str, Option<&'static str>)> {
        vec![
            ("value", "Value", FactorKind::Ridge, "VTV", None),
            ("growth", "Growth", FactorKind::Ridge, "VUG", None),
            ("momentum", "Momentum", FactorKind::Ridge, "MTUM", None),
            ("quality", "Quality", FactorKind::Ridge, "QUAL", None),
            ("size", "Size", FactorKind::Ridge, "IWM", None),
            ("low_volatility", "Low Volatility", FactorKind::Ridge, "USMV", None),
            ("growth_value_spread", "Growth-Value Spread", FactorKind::Spread, "VUG", Some("VTV")),
            ("momentum_spread", "Momentum Spread", FactorKind::Spread, "MTUM", Some("SPY")),
            ("size_spread", "Size Spread", FactorKind::Spread, "IWM", Some("SPY")),
            ("quality_spread", "Quality Spread", FactorKind::Spread, "QUAL", Some("SPY")),
        ]
    }
}

/// How much of the regression window a symbol's history actually covered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum QualityFlag {
    #[serde(rename = "full_history")]
    #[sqlx(rename = "full_history")]
    FullHistory,
    #[serde(rename = "partial_history")]
    #[sqlx(rename = "partial_history")]
    PartialHistory,
}

/// Per-symbol factor beta for one calculation date. Intrinsic to the
/// symbol: the same row serves every portfolio holding it.
/// `is_significant` applies to the univariate spread fits (90% level);
/// ridge rows carry false.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SymbolFactorExposure {
    pub id: Uuid,
    pub symbol: String,
    pub factor_id: Uuid,
    pub calculation_date: NaiveDate,
    pub beta: BigDecimal,
    pub r_squared: Option<BigDecimal>,
    pub observations: i32,
    pub is_significant: bool,
    pub quality_flag: QualityFlag,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PortfolioFactorExposure {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub factor_id: Uuid,
    pub calculation_date: NaiveDate,
    pub beta: BigDecimal,
    pub dollar_exposure: BigDecimal,
}

/// Position-level regression cache row shared by the market-beta and
/// IR-beta paths (`benchmark` distinguishes SPY from TLT).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionBenchmarkBeta {
    pub id: Uuid,
    pub position_id: Uuid,
    pub calculation_date: NaiveDate,
    pub benchmark: String,
    pub beta: BigDecimal,
    pub r_squared: Option<BigDecimal>,
    pub p_value: Option<BigDecimal>,
    pub observations: i32,
    pub is_significant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionVolatility {
    pub id: Uuid,
    pub position_id: Uuid,
    pub calculation_date: NaiveDate,
    pub realized_vol_21d: Option<BigDecimal>,
    pub realized_vol_63d: Option<BigDecimal>,
    pub expected_vol_21d: Option<BigDecimal>,
    pub vol_trend: Option<String>,
    pub vol_percentile: Option<BigDecimal>,
    pub observations: i32,
}
