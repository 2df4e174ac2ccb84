use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// LONG/SHORT are equity directions; LC/LP/SC/SP are long/short call/put.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum PositionType {
    #[serde(rename = "LONG")]
    #[sqlx(rename = "LONG")]
    Long,
    #[serde(rename = "SHORT")]
    #[sqlx(rename = "SHORT")]
    Short,
    #[serde(rename = "LC")]
    #[sqlx(rename = "LC")]
    LongCall,
    #[serde(rename = "LP")]
    #[sqlx(rename = "LP")]
    LongPut,
    #[serde(rename = "SC")]
    #[sqlx(rename = "SC")]
    ShortCall,
    #[serde(rename = "SP")]
    #[sqlx(rename = "SP")]
    ShortPut,
}

impl PositionType {
    pub fn is_option(&self) -> bool {
        matches!(
            self,
            PositionType::LongCall | PositionType::LongPut | PositionType::ShortCall | PositionType::ShortPut
        )
    }

    /// +1 for long exposure, -1 for short.
    pub fn direction(&self) -> f64 {
        match self {
            PositionType::Long | PositionType::LongCall | PositionType::LongPut => 1.0,
            PositionType::Short | PositionType::ShortCall | PositionType::ShortPut => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "TEXT")]
pub enum InvestmentClass {
    #[serde(rename = "PUBLIC")]
    #[sqlx(rename = "PUBLIC")]
    Public,
    #[serde(rename = "OPTIONS")]
    #[sqlx(rename = "OPTIONS")]
    Options,
    #[serde(rename = "PRIVATE")]
    #[sqlx(rename = "PRIVATE")]
    Private,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Position {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub symbol: String,
    pub position_type: PositionType,
    pub investment_class: InvestmentClass,
    pub quantity: BigDecimal,
    pub entry_price: BigDecimal,
    pub entry_date: NaiveDate,
    pub exit_date: Option<NaiveDate>,
    pub exit_price: Option<BigDecimal>,
    pub underlying_symbol: Option<String>,
    pub strike_price: Option<BigDecimal>,
    pub expiration_date: Option<NaiveDate>,
    pub market_value: Option<BigDecimal>,
    pub last_price: Option<BigDecimal>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Position {
    /// A position is active on D iff it was entered on or before D and not
    /// yet exited (exit on D itself counts as the last active day's close).
    pub fn is_active_on(&self, d: NaiveDate) -> bool {
        self.entry_date <= d && self.exit_date.map_or(true, |exit| exit > d) && self.deleted_at.is_none()
    }

    /// Symbol whose price history drives returns-based metrics: the
    /// underlying for options, the position symbol otherwise.
    pub fn returns_symbol(&self) -> &str {
        self.underlying_symbol.as_deref().unwrap_or(&self.symbol)
    }

    pub fn quantity_f64(&self) -> f64 {
        self.quantity.to_f64().unwrap_or(0.0)
    }

    pub fn entry_price_f64(&self) -> f64 {
        self.entry_price.to_f64().unwrap_or(0.0)
    }
}

/// Option Greeks written by the pricing sibling service; only delta is
/// consumed here (factor aggregation delta adjustment).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PositionGreeks {
    pub id: Uuid,
    pub position_id: Uuid,
    pub calculation_date: NaiveDate,
    pub delta: Option<BigDecimal>,
    pub gamma: Option<BigDecimal>,
    pub theta: Option<BigDecimal>,
    pub vega: Option<BigDecimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn base_position() -> Position {
        Position {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            symbol: "AAPL".to_string(),
            position_type: PositionType::Long,
            investment_class: InvestmentClass::Public,
            quantity: BigDecimal::from_str("100").unwrap(),
            entry_price: BigDecimal::from_str("158").unwrap(),
            entry_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            exit_date: None,
            exit_price: None,
            underlying_symbol: None,
            strike_price: None,
            expiration_date: None,
            market_value: None,
            last_price: None,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_active_window() {
        let mut p = base_position();
        let d = |day| NaiveDate::from_ymd_opt(2026, 1, day).unwrap();
        assert!(!p.is_active_on(d(2)));
        assert!(p.is_active_on(d(5)));
        p.exit_date = Some(d(9));
        assert!(p.is_active_on(d(8)));
        assert!(!p.is_active_on(d(9)));
    }

    #[test]
    fn test_direction_signs() {
        assert_eq!(PositionType::Long.direction(), 1.0);
        assert_eq!(PositionType::Short.direction(), -1.0);
        assert_eq!(PositionType::ShortCall.direction(), -1.0);
        assert!(PositionType::LongPut.is_option());
        assert!(!PositionType::Short.is_option());
    }

    #[test]
    fn test_returns_symbol_uses_underlying() {
        let mut p = base_position();
        assert_eq!(p.returns_symbol(), "AAPL");
        p.underlying_symbol = Some("SPY".to_string());
        assert_eq!(p.returns_symbol(), "SPY");
    }
}
