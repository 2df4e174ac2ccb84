use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::NaiveDate;
use sqlx::PgPool;
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{greeks_queries, portfolio_queries, position_queries, snapshot_queries, target_queries};
use crate::errors::AppError;
use crate::models::position::{InvestmentClass, Position, PositionGreeks};
use crate::models::snapshot::SnapshotMetrics;
use crate::services::market_data::{self, PriceCache, OPTION_MULTIPLIER};

/// Signed exposure aggregates over one portfolio-date. PRIVATE positions
/// carry their entry-price value in `private_value` and stay out of the
/// exposure numbers.
#[derive(Debug, Clone, Default)]
pub struct ExposureAggregates {
    pub long_value: f64,
    pub short_value: f64,
    pub gross_exposure: f64,
    pub net_exposure: f64,
    pub private_value: f64,
    pub invested_basis: f64,
    pub num_positions: usize,
}

/// Equity rollforward components for one day.
#[derive(Debug, Clone)]
pub struct Rollforward {
    pub previous_equity: f64,
    pub daily_realized_pnl: f64,
    pub daily_capital_flow: f64,
    pub new_equity: f64,
}

/// Phase P1: mark every active position with the canonical value and
/// store it back on the row.
pub async fn update_position_values(
    pool: &PgPool,
    cache: &PriceCache,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<usize, AppError> {
    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let mut updated = 0;

    for position in &positions {
        let close =
            market_data::latest_close(pool, Some(cache), position.returns_symbol(), date).await?;
        let signed_value = market_data::position_value(position, close, true);
        let last_price = close.unwrap_or_else(|| position.entry_price_f64());

        position_queries::update_position_mark(pool, position.id, &big(last_price), &big(signed_value))
            .await?;
        updated += 1;
    }

    debug!("Updated {} position marks for portfolio {} on {}", updated, portfolio_id, date);
    Ok(updated)
}

/// Realized P&L from positions whose exit date is exactly `date`:
/// `(exit - entry) x qty x direction x multiplier`.
pub fn realized_pnl(positions: &[Position]) -> f64 {
    positions
        .iter()
        .filter_map(|p| {
            let exit = p.exit_price.as_ref()?.to_f64()?;
            let entry = p.entry_price_f64();
            let qty = p.quantity_f64().abs();
            let multiplier = if p.position_type.is_option() { OPTION_MULTIPLIER } else { 1.0 };
            Some((exit - entry) * qty * multiplier * p.position_type.direction())
        })
        .sum()
}

/// Phase P2: equity rollforward. `equity(D) = equity(D-1) + realized(D) +
/// capital_flow(D)`, where `equity(D-1)` is the previous complete
/// snapshot's balance (or the portfolio's stored balance on the first
/// processed day). The new balance is written back to the portfolio row.
pub async fn update_equity_balance(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Rollforward, AppError> {
    let portfolio = portfolio_queries::fetch_portfolio(pool, portfolio_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Portfolio {} not found", portfolio_id)))?;

    let previous_equity = match snapshot_queries::fetch_previous_snapshot(pool, portfolio_id, date).await? {
        Some(prev) => prev
            .equity_balance
            .as_ref()
            .and_then(|b| b.to_f64())
            .unwrap_or_else(|| portfolio.equity_balance.to_f64().unwrap_or(0.0)),
        None => portfolio.equity_balance.to_f64().unwrap_or(0.0),
    };

    let exited = position_queries::fetch_positions_exited_on(pool, portfolio_id, date).await?;
    let daily_realized_pnl = realized_pnl(&exited);

    let daily_capital_flow = portfolio_queries::fetch_daily_capital_flow(pool, portfolio_id, date)
        .await?
        .to_f64()
        .unwrap_or(0.0);

    let new_equity = previous_equity + daily_realized_pnl + daily_capital_flow;
    portfolio_queries::update_equity_balance(pool, portfolio_id, &big(new_equity)).await?;

    Ok(Rollforward { previous_equity, daily_realized_pnl, daily_capital_flow, new_equity })
}

/// Phase P3: gross/net exposure aggregation over active positions using
/// the canonical valuation. PRIVATE assets are tracked separately and do
/// not enter exposure.
pub async fn aggregate_exposures(
    pool: &PgPool,
    cache: &PriceCache,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<ExposureAggregates, AppError> {
    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let mut agg = ExposureAggregates { num_positions: positions.len(), ..Default::default() };

    for position in &positions {
        let close =
            market_data::latest_close(pool, Some(cache), position.returns_symbol(), date).await?;
        let signed = market_data::position_value(position, close, true);

        let entry_close = Some(position.entry_price_f64());
        let entry_signed = market_data::position_value(position, entry_close, true);

        if position.investment_class == InvestmentClass::Private {
            agg.private_value += signed;
            continue;
        }

        if signed >= 0.0 {
            agg.long_value += signed;
        } else {
            agg.short_value += -signed;
        }
        agg.invested_basis += entry_signed;
    }

    agg.gross_exposure = agg.long_value + agg.short_value;
    agg.net_exposure = agg.long_value - agg.short_value;
    Ok(agg)
}

/// Net option Greeks for one portfolio-date, scaled to share terms:
/// each Greek is `per-share value x contracts x 100`, signed by position
/// direction (Greeks are stored from the long perspective).
#[derive(Debug, Clone, Default)]
pub struct PortfolioGreeks {
    pub delta: f64,
    pub gamma: f64,
    pub theta: f64,
    pub vega: f64,
    pub positions_with_greeks: usize,
}

pub fn sum_option_greeks(positions: &[&Position], greeks: &[PositionGreeks]) -> PortfolioGreeks {
    use std::collections::HashMap;

    let by_position: HashMap<Uuid, &PositionGreeks> =
        greeks.iter().map(|g| (g.position_id, g)).collect();

    let mut totals = PortfolioGreeks::default();
    for position in positions {
        let Some(g) = by_position.get(&position.id) else { continue };
        let scale = position.quantity_f64().abs() * OPTION_MULTIPLIER * position.position_type.direction();

        let mut any = false;
        let mut add = |value: &Option<BigDecimal>, slot: &mut f64| {
            if let Some(v) = value.as_ref().and_then(|v| v.to_f64()) {
                *slot += v * scale;
                any = true;
            }
        };
        add(&g.delta, &mut totals.delta);
        add(&g.gamma, &mut totals.gamma);
        add(&g.theta, &mut totals.theta);
        add(&g.vega, &mut totals.vega);

        if any {
            totals.positions_with_greeks += 1;
        }
    }
    totals
}

/// Aggregate option Greeks over active positions; None when the book has
/// no options with Greeks rows.
pub async fn portfolio_greeks(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Option<PortfolioGreeks>, AppError> {
    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let options: Vec<&Position> =
        positions.iter().filter(|p| p.position_type.is_option()).collect();
    if options.is_empty() {
        return Ok(None);
    }

    let ids: Vec<Uuid> = options.iter().map(|p| p.id).collect();
    let greeks = greeks_queries::fetch_latest_greeks(pool, &ids, date).await?;
    if greeks.is_empty() {
        return Ok(None);
    }

    let totals = sum_option_greeks(&options, &greeks);
    Ok((totals.positions_with_greeks > 0).then_some(totals))
}

/// Projected PUBLIC sleeve value at analyst consensus targets: `sum of
/// signed qty x target` over positions whose symbol has a fresh target.
pub async fn target_price_projection(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
) -> Result<Option<f64>, AppError> {
    let positions = position_queries::fetch_active_positions(pool, portfolio_id, date).await?;
    let public: Vec<&Position> = positions
        .iter()
        .filter(|p| p.investment_class == InvestmentClass::Public)
        .collect();
    if public.is_empty() {
        return Ok(None);
    }

    let symbols: Vec<String> = {
        let mut v: Vec<String> = public.iter().map(|p| p.symbol.clone()).collect();
        v.sort();
        v.dedup();
        v
    };
    let targets = target_queries::fetch_price_targets(pool, &symbols).await?;
    if targets.is_empty() {
        return Ok(None);
    }

    let mut projected = 0.0;
    let mut covered = 0usize;
    for position in &public {
        let Some(target) = targets.get(&position.symbol) else { continue };
        projected += position.quantity_f64().abs() * target * position.position_type.direction();
        covered += 1;
    }

    Ok((covered > 0).then_some(projected))
}

/// Phase P5: placeholder write. Returns false when a complete snapshot
/// already exists and this run is not a force-rerun (the day is done).
pub async fn write_placeholder(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
    force_rerun: bool,
) -> Result<bool, AppError> {
    if !force_rerun {
        if let Some(existing) = snapshot_queries::fetch_snapshot(pool, portfolio_id, date).await? {
            if existing.is_complete {
                return Ok(false);
            }
        }
    }

    snapshot_queries::upsert_placeholder(pool, portfolio_id, date).await?;
    Ok(true)
}

/// Phase P6: assemble the full row and flip it to complete.
#[allow(clippy::too_many_arguments)]
pub async fn complete_snapshot(
    pool: &PgPool,
    portfolio_id: Uuid,
    date: NaiveDate,
    exposures: &ExposureAggregates,
    rollforward: &Rollforward,
    mut metrics: SnapshotMetrics,
) -> Result<(), AppError> {
    let previous = snapshot_queries::fetch_previous_snapshot(pool, portfolio_id, date).await?;

    // Cash is the equity not tied up in marketable cost basis; total value
    // is cash plus marks plus private carrying value, i.e. equity plus
    // unrealized P&L.
    let cash_value = rollforward.new_equity - exposures.invested_basis - exposures.private_value;
    let total_value = cash_value + exposures.net_exposure + exposures.private_value;

    let prev_total = previous
        .as_ref()
        .and_then(|p| p.total_value.as_ref())
        .and_then(|v| v.to_f64())
        .unwrap_or(total_value - rollforward.daily_capital_flow);
    let prev_cumulative = previous
        .as_ref()
        .and_then(|p| p.cumulative_pnl.as_ref())
        .and_then(|v| v.to_f64())
        .unwrap_or(0.0);

    let daily_pnl = total_value - prev_total - rollforward.daily_capital_flow;

    metrics.total_value = total_value;
    metrics.cash_value = cash_value;
    metrics.long_value = exposures.long_value;
    metrics.short_value = exposures.short_value;
    metrics.gross_exposure = exposures.gross_exposure;
    metrics.net_exposure = exposures.net_exposure;
    metrics.daily_pnl = daily_pnl;
    metrics.daily_realized_pnl = rollforward.daily_realized_pnl;
    metrics.cumulative_pnl = prev_cumulative + daily_pnl;
    metrics.daily_capital_flow = rollforward.daily_capital_flow;
    metrics.num_positions = exposures.num_positions as i32;
    metrics.equity_balance = rollforward.new_equity;

    snapshot_queries::complete_snapshot(pool, portfolio_id, date, &metrics).await?;
    info!("📸 Snapshot complete for portfolio {} on {}", portfolio_id, date);
    Ok(())
}

/// Admin cleanup: drop placeholders older than the grace window.
pub async fn cleanup_incomplete(
    pool: &PgPool,
    age_hours: i64,
    portfolio_id: Option<Uuid>,
) -> Result<u64, AppError> {
    let deleted = snapshot_queries::delete_stale_placeholders(pool, age_hours, portfolio_id).await?;
    if deleted > 0 {
        info!("🧹 Removed {} abandoned placeholder snapshots", deleted);
    }
    Ok(deleted)
}

fn big(v: f64) -> BigDecimal {
    BigDecimal::from_str(&format!("{v:.10}")).unwrap_or_else(|_| BigDecimal::from(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::position::PositionType;
    use chrono::Utc;

    fn closed_position(
        position_type: PositionType,
        investment_class: InvestmentClass,
        qty: f64,
        entry: f64,
        exit: f64,
    ) -> Position {
        Position {
            id: Uuid::new_v4(),
            portfolio_id: Uuid::new_v4(),
            symbol: "TEST".to_string(),
            position_type,
            investment_class,
            quantity: BigDecimal::from_str(&qty.to_string()).unwrap(),
            entry_price: BigDecimal::from_str(&entry.to_string()).unwrap(),
            entry_date: NaiveDate::from_ymd_opt(2026, 1, 5).unwrap(),
            exit_date: Some(NaiveDate::from_ymd_opt(2026, 1, 9).unwrap()),
            exit_price: Some(BigDecimal::from_str(&exit.to_string()).unwrap()),
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
    fn test_realized_pnl_long_gain() {
        let positions = vec![closed_position(
            PositionType::Long,
            InvestmentClass::Public,
            100.0,
            150.0,
            160.0,
        )];
        assert!((realized_pnl(&positions) - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_realized_pnl_short_gain_on_decline() {
        let positions = vec![closed_position(
            PositionType::Short,
            InvestmentClass::Public,
            50.0,
            100.0,
            90.0,
        )];
        // Short profits when price falls: (90 - 100) * 50 * -1 = +500
        assert!((realized_pnl(&positions) - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_realized_pnl_option_multiplier() {
        let positions = vec![closed_position(
            PositionType::LongCall,
            InvestmentClass::Options,
            2.0,
            3.0,
            5.0,
        )];
        assert!((realized_pnl(&positions) - 400.0).abs() < 1e-9);
    }

    #[test]
    fn test_realized_pnl_missing_exit_price_contributes_zero() {
        let mut p = closed_position(PositionType::Long, InvestmentClass::Public, 10.0, 100.0, 110.0);
        p.exit_price = None;
        assert_eq!(realized_pnl(&[p]), 0.0);
    }

    fn greeks_row(position_id: Uuid, delta: f64, gamma: f64) -> PositionGreeks {
        PositionGreeks {
            id: Uuid::new_v4(),
            position_id,
            calculation_date: NaiveDate::from_ymd_opt(2026, 1, 9).unwrap(),
            delta: Some(BigDecimal::from_str(&delta.to_string()).unwrap()),
            gamma: Some(BigDecimal::from_str(&gamma.to_string()).unwrap()),
            theta: None,
            vega: None,
        }
    }

    #[test]
    fn test_portfolio_greeks_scale_and_sign() {
        // 2 long calls (delta 0.6) and 1 short put (delta -0.4)
        let mut lc = closed_position(PositionType::LongCall, InvestmentClass::Options, 2.0, 3.0, 3.0);
        lc.exit_date = None;
        let mut sp = closed_position(PositionType::ShortPut, InvestmentClass::Options, 1.0, 1.5, 1.5);
        sp.exit_date = None;

        let greeks = vec![greeks_row(lc.id, 0.6, 0.02), greeks_row(sp.id, -0.4, 0.03)];
        let positions = vec![&lc, &sp];

        let totals = sum_option_greeks(&positions, &greeks);
        // LC: 0.6 * 2 * 100 = 120; SP: -0.4 * 1 * 100 * -1 = +40
        assert!((totals.delta - 160.0).abs() < 1e-9);
        // Gamma: 0.02 * 200 - 0.03 * 100 = 1.0
        assert!((totals.gamma - 1.0).abs() < 1e-9);
        assert_eq!(totals.positions_with_greeks, 2);
    }

    #[test]
    fn test_portfolio_greeks_missing_rows_skipped() {
        let mut lc = closed_position(PositionType::LongCall, InvestmentClass::Options, 1.0, 2.0, 2.0);
        lc.exit_date = None;
        let totals = sum_option_greeks(&[&lc], &[]);
        assert_eq!(totals.positions_with_greeks, 0);
        assert_eq!(totals.delta, 0.0);
    }

    #[test]
    fn test_rollforward_arithmetic() {
        // P3: equity(Dk) = equity(D0-) + sum(realized + flows)
        let mut equity: f64 = 500_000.0;
        let days = [(1_000.0, 0.0), (-250.0, 10_000.0), (0.0, -5_000.0)];
        for (realized, flow) in days {
            equity = equity + realized + flow;
        }
        assert!((equity - 505_750.0).abs() < 1e-9);
    }
}
