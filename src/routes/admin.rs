use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::{portfolio_queries, profile_queries, snapshot_queries};
use crate::errors::{AppError, CalcOutcome};
use crate::models::batch::BatchRunOptions;
use crate::services::market_data::PriceCache;
use crate::services::{correlation_service, sector_service, snapshot_service};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/admin/batch/run", post(run_batch))
        .route("/admin/batch/run/current", get(current_batch_run))
        .route("/admin/batch/trigger/market-data", post(trigger_market_data))
        .route("/admin/batch/trigger/correlations", post(trigger_correlations))
        .route("/admin/batch/trigger/company-profiles", post(trigger_company_profiles))
        .route("/admin/batch/cleanup-incomplete", post(cleanup_incomplete))
        .route("/admin/batch/restore-sector-tags", post(restore_sector_tags))
}

/// Shared-token admin guard. The surrounding platform owns real identity;
/// this service only verifies the deployment secret.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), AppError> {
    let expected = state.config.admin_api_token.as_deref().ok_or(AppError::Unauthorized)?;
    let presented = headers
        .get("x-admin-token")
        .and_then(|v| v.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    if presented != expected {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// POST /api/admin/batch/run
///
/// Starts a batch run in the background and returns the run id for
/// polling. 409 when a run is already active and `force` is not set.
async fn run_batch(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<BatchRunOptions>>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;

    let options = body.map(|Json(o)| o).unwrap_or_default();
    let run = state.orchestrator.start_background(options, "admin")?;
    info!("Admin triggered batch run {}", run.batch_run_id);

    Ok(Json(json!({
        "status": "started",
        "batch_run_id": run.batch_run_id,
        "started_at": run.started_at,
        "poll_url": "/api/admin/batch/run/current",
    })))
}

/// GET /api/admin/batch/run/current
///
/// Always answers with consistent field names, idle or running. Safe to
/// poll every few seconds.
async fn current_batch_run(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;

    match state.orchestrator.tracker().current() {
        Some(run) => Ok(Json(json!({
            "status": "running",
            "batch_run_id": run.batch_run_id,
            "started_at": run.started_at,
            "triggered_by": run.triggered_by,
            "total_jobs": run.total_jobs,
            "completed_jobs": run.completed_jobs,
            "failed_jobs": run.failed_jobs,
            "current_job_name": run.current_job_name,
            "current_portfolio_name": run.current_portfolio_name,
        }))),
        None => Ok(Json(json!({
            "status": "idle",
            "batch_run_id": null,
        }))),
    }
}

/// POST /api/admin/batch/trigger/market-data
///
/// Kicks off a market-data refresh for the current symbol universe in the
/// background and returns immediately.
async fn trigger_market_data(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;

    let started_at = Utc::now();
    tokio::spawn(async move {
        use crate::db::{factor_queries, position_queries};
        use crate::services::market_data;
        use crate::services::symbol_universe::lookback_start;

        let date = state.calendar.most_recent_trading_day();
        let result: Result<(), AppError> = async {
            factor_queries::ensure_factor_definitions(&state.pool).await?;
            let factors = factor_queries::fetch_factor_definitions(&state.pool).await?;
            let mut symbols = position_queries::fetch_universe_symbols(&state.pool, date).await?;
            for factor in &factors {
                symbols.push(factor.long_etf.clone());
                if let Some(short) = &factor.short_etf {
                    symbols.push(short.clone());
                }
            }
            symbols.sort();
            symbols.dedup();

            let cache = PriceCache::new();
            let start = lookback_start(date, state.config.spread_window_days);
            market_data::refresh_symbols(
                &state.pool,
                state.provider.as_ref(),
                &state.rate_limiter,
                &cache,
                &symbols,
                start,
                date,
                state.config.provider_batch_size,
            )
            .await?;
            Ok(())
        }
        .await;

        if let Err(e) = result {
            warn!("Background market-data refresh failed: {}", e);
        }
    });

    Ok(Json(json!({
        "status": "started",
        "started_at": started_at,
    })))
}

#[derive(Debug, Default, Deserialize)]
struct CorrelationsRequest {
    portfolio_id: Option<Uuid>,
}

/// POST /api/admin/batch/trigger/correlations
async fn trigger_correlations(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CorrelationsRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;
    let request = body.map(|Json(r)| r).unwrap_or_default();

    let date = state.calendar.most_recent_trading_day();
    let portfolios = match request.portfolio_id {
        Some(id) => vec![portfolio_queries::fetch_portfolio(&state.pool, id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Portfolio {} not found", id)))?],
        None => portfolio_queries::fetch_active_portfolios(&state.pool).await?,
    };

    let cache = PriceCache::new();
    let mut processed = 0;
    let mut skipped = 0;
    let mut failed = 0;

    for portfolio in &portfolios {
        match correlation_service::portfolio_correlations(
            &state.pool,
            &cache,
            &state.config,
            portfolio.id,
            date,
        )
        .await
        {
            Ok(CalcOutcome::Completed(_)) => processed += 1,
            Ok(CalcOutcome::Skipped { .. }) => skipped += 1,
            Err(e) => {
                warn!("Correlations failed for {}: {}", portfolio.id, e);
                failed += 1;
            }
        }
    }

    Ok(Json(json!({
        "status": "completed",
        "calculation_date": date,
        "processed": processed,
        "skipped": skipped,
        "failed": failed,
    })))
}

/// POST /api/admin/batch/trigger/company-profiles
async fn trigger_company_profiles(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;

    let started_at = Utc::now();
    tokio::spawn(async move {
        use crate::db::position_queries;

        let date = state.calendar.most_recent_trading_day();
        let result: Result<(usize, usize), AppError> = async {
            let symbols = position_queries::fetch_universe_symbols(&state.pool, date).await?;
            let mut processed = 0;
            let mut failed = 0;
            for symbol in &symbols {
                let _guard = state.rate_limiter.acquire().await;
                match state.provider.fetch_company_profile(symbol).await {
                    Ok(profile) => {
                        profile_queries::upsert_profile(&state.pool, &profile).await?;
                        processed += 1;
                    }
                    Err(e) => {
                        warn!("Profile sync failed for {}: {}", symbol, e);
                        failed += 1;
                    }
                }
            }
            Ok((processed, failed))
        }
        .await;

        match result {
            Ok((processed, failed)) => {
                info!("Profile sync finished: {} updated, {} failed", processed, failed)
            }
            Err(e) => warn!("Profile sync failed: {}", e),
        }
    });

    Ok(Json(json!({
        "status": "started",
        "started_at": started_at,
    })))
}

#[derive(Debug, Deserialize)]
struct CleanupRequest {
    age_threshold_hours: Option<i64>,
    portfolio_id: Option<Uuid>,
}

/// POST /api/admin/batch/cleanup-incomplete
async fn cleanup_incomplete(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<CleanupRequest>>,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;

    let (age_hours, portfolio_id) = body
        .map(|Json(r)| (r.age_threshold_hours, r.portfolio_id))
        .unwrap_or((None, None));
    let age_hours = age_hours.unwrap_or(state.config.snapshot_placeholder_grace_hours);

    let deleted = snapshot_service::cleanup_incomplete(&state.pool, age_hours, portfolio_id).await?;

    Ok(Json(json!({
        "status": "completed",
        "deleted": deleted,
        "age_threshold_hours": age_hours,
    })))
}

/// POST /api/admin/batch/restore-sector-tags
///
/// Recomputes the sector-exposure JSON on each portfolio's latest
/// complete snapshot from the current company profiles.
async fn restore_sector_tags(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    require_admin(&state, &headers)?;

    let portfolios = portfolio_queries::fetch_active_portfolios(&state.pool).await?;
    let cache = PriceCache::new();
    let mut updated = 0;
    let mut skipped = 0;

    for portfolio in &portfolios {
        let Some(date) =
            snapshot_queries::fetch_latest_complete_date(&state.pool, portfolio.id).await?
        else {
            skipped += 1;
            continue;
        };

        match sector_service::sector_and_concentration(&state.pool, &cache, portfolio.id, date)
            .await?
        {
            CalcOutcome::Completed(sector) => {
                let exposure = serde_json::to_value(&sector.sector_weights)
                    .unwrap_or(serde_json::Value::Null);
                snapshot_queries::update_sector_exposure(&state.pool, portfolio.id, date, &exposure)
                    .await?;
                updated += 1;
            }
            CalcOutcome::Skipped { .. } => skipped += 1,
        }
    }

    Ok(Json(json!({
        "status": "completed",
        "updated": updated,
        "skipped": skipped,
    })))
}
