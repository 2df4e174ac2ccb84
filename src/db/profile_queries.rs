use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;

use crate::external::market_provider::ProviderProfile;
use crate::models::market_data::CompanyProfile;

pub async fn upsert_profile(pool: &PgPool, profile: &ProviderProfile) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO company_profiles (id, symbol, company_name, sector, industry, updated_at)
        VALUES ($1, $2, $3, $4, $5, NOW())
        ON CONFLICT (symbol)
        DO UPDATE SET company_name = EXCLUDED.company_name,
                      sector = EXCLUDED.sector,
                      industry = EXCLUDED.industry,
                      updated_at = NOW()
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&profile.symbol)
    .bind(&profile.company_name)
    .bind(&profile.sector)
    .bind(&profile.industry)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fetch_profiles(
    pool: &PgPool,
    symbols: &[String],
) -> Result<Vec<CompanyProfile>, sqlx::Error> {
    if symbols.is_empty() {
        return Ok(Vec::new());
    }

    sqlx::query_as::<_, CompanyProfile>(
        r#"
        SELECT id, symbol, company_name, sector, industry, updated_at
        FROM company_profiles
        WHERE symbol = ANY($1)
        "#,
    )
    .bind(symbols)
    .fetch_all(pool)
    .await
}

/// symbol -> sector for every profile that has one.
pub async fn fetch_sector_map(
    pool: &PgPool,
    symbols: &[String],
) -> Result<HashMap<String, String>, sqlx::Error> {
    let profiles = fetch_profiles(pool, symbols).await?;
    Ok(profiles
        .into_iter()
        .filter_map(|p| p.sector.map(|s| (p.symbol, s)))
        .collect())
}

