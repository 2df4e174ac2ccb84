use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// A user-owned book of positions. `equity_balance` is starting capital
// rolled forward by realized P&L and capital flows; for leveraged books it
// can be far smaller than gross exposure.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Portfolio {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub equity_balance: BigDecimal,
    pub base_currency: String,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CapitalFlow {
    pub id: Uuid,
    pub portfolio_id: Uuid,
    pub flow_date: chrono::NaiveDate,
    pub amount: BigDecimal,
}
