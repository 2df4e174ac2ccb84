/// Portfolio Calculation Accuracy Tests
///
/// End-to-end numeric checks over the valuation, concentration, and
/// stress formulas used by the daily batch, exercised with literal
/// book examples so regressions show up as changed dollar amounts.

// ---------------------------------------------------------------------------
// Canonical position valuation
// ---------------------------------------------------------------------------

#[cfg(test)]
mod position_valuation {
    const OPTION_MULTIPLIER: f64 = 100.0;

    #[derive(Clone, Copy)]
    enum Class {
        Public,
        Options,
        Private,
    }

    fn value(class: Class, qty: f64, close: f64, entry: f64, direction: f64, signed: bool) -> f64 {
        let magnitude = match class {
            Class::Public => qty.abs() * close,
            Class::Options => qty.abs() * OPTION_MULTIPLIER * close,
            Class::Private => qty.abs() * entry,
        };
        if signed { magnitude * direction } else { magnitude }
    }

    #[test]
    fn test_mixed_book_long_value() {
        // LONG 100 AAPL @ close 160, LONG 50 SPY @ close 450,
        // PRIVATE 1 unit @ 100,000 entry
        let aapl = value(Class::Public, 100.0, 160.0, 158.0, 1.0, true);
        let spy = value(Class::Public, 50.0, 450.0, 445.0, 1.0, true);
        let pe = value(Class::Private, 1.0, 0.0, 100_000.0, 1.0, true);

        // Marketable long value excludes the private sleeve
        assert_eq!(aapl + spy, 38_500.0);
        assert_eq!(pe, 100_000.0);

        // Net exposure over marketable positions only
        let net_exposure = aapl + spy;
        assert_eq!(net_exposure, 38_500.0);
    }

    #[test]
    fn test_short_position_signed_vs_gross() {
        let short = value(Class::Public, 200.0, 50.0, 55.0, -1.0, true);
        assert_eq!(short, -10_000.0);
        let gross = value(Class::Public, 200.0, 50.0, 55.0, -1.0, false);
        assert_eq!(gross, 10_000.0);
    }

    #[test]
    fn test_option_contract_multiplier() {
        // 3 long calls at $4.20
        let lc = value(Class::Options, 3.0, 4.20, 3.00, 1.0, true);
        assert!((lc - 1_260.0).abs() < 1e-9);

        // 2 short puts at $1.10
        let sp = value(Class::Options, 2.0, 1.10, 1.50, -1.0, true);
        assert!((sp + 220.0).abs() < 1e-9);
    }

    #[test]
    fn test_private_ignores_market_close() {
        let with_mark = value(Class::Private, 10.0, 999.0, 5_000.0, 1.0, true);
        let without_mark = value(Class::Private, 10.0, 0.0, 5_000.0, 1.0, true);
        assert_eq!(with_mark, without_mark);
    }
}

// ---------------------------------------------------------------------------
// Concentration metrics
// ---------------------------------------------------------------------------

#[cfg(test)]
mod concentration {
    fn hhi(weights: &[f64]) -> f64 {
        weights.iter().map(|w| w * w).sum::<f64>() * 10_000.0
    }

    fn effective_positions(hhi: f64) -> f64 {
        if hhi <= 0.0 { 0.0 } else { 10_000.0 / hhi }
    }

    fn top_k(weights: &[f64], k: usize) -> f64 {
        let mut sorted = weights.to_vec();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        sorted.iter().take(k).sum()
    }

    #[test]
    fn test_hhi_three_position_book() {
        // Weights {0.5, 0.3, 0.2}
        let weights = [0.5, 0.3, 0.2];
        assert!((hhi(&weights) - 3_800.0).abs() < 1e-9);
        assert!((effective_positions(3_800.0) - 2.631578).abs() < 1e-4);
        assert!((top_k(&weights, 3) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_hhi_monotone_in_concentration() {
        let concentrated = hhi(&[0.9, 0.1]);
        let balanced = hhi(&[0.5, 0.5]);
        assert!(concentrated > balanced);
    }

    #[test]
    fn test_equal_weight_limits() {
        for n in [2usize, 5, 20, 100] {
            let w = vec![1.0 / n as f64; n];
            let h = hhi(&w);
            assert!((effective_positions(h) - n as f64).abs() < 1e-6);
        }
    }
}

// ---------------------------------------------------------------------------
// Stress P&L
// ---------------------------------------------------------------------------

#[cfg(test)]
mod stress_pnl {
    /// Direct impact of a single-factor shock with the beta x equity
    /// fallback exposure basis.
    fn direct_pnl_fallback(beta: f64, shock: f64, equity: f64) -> f64 {
        shock * (beta * equity)
    }

    #[test]
    fn test_market_down_ten_with_fallback_basis() {
        // beta 1.2, equity 1,000,000, shock -10% => about -120,000
        let pnl = direct_pnl_fallback(1.2, -0.10, 1_000_000.0);
        assert!((pnl + 120_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_correlation_amplification_is_bounded() {
        // Spillover through a clamped correlation must stay a fraction of
        // the direct impact for any |rho| <= 0.95 and scale 0.25
        let direct = -120_000.0_f64;
        for rho in [-0.95, -0.5, 0.0, 0.5, 0.95] {
            let spillover = rho * direct * 0.25;
            assert!(spillover.abs() <= direct.abs() * 0.25 * 0.95 + 1e-9);
        }
    }

    #[test]
    fn test_clamp_applies_before_matrix_use() {
        let raw = [-0.99_f64, 0.99, 0.3];
        let clamped: Vec<f64> = raw.iter().map(|r| r.clamp(-0.95, 0.95)).collect();
        assert_eq!(clamped, vec![-0.95, 0.95, 0.3]);
    }
}

// ---------------------------------------------------------------------------
// Equity rollforward
// ---------------------------------------------------------------------------

#[cfg(test)]
mod rollforward {
    fn roll(mut equity: f64, days: &[(f64, f64)]) -> f64 {
        for (realized, flow) in days {
            equity += realized + flow;
        }
        equity
    }

    #[test]
    fn test_rollforward_equals_cumulative_sum() {
        // equity(Dk) = equity(D0-) + sum(realized + flows)
        let days = [
            (1_500.0, 0.0),
            (0.0, 25_000.0),
            (-3_200.0, 0.0),
            (840.0, -10_000.0),
        ];
        let terminal = roll(500_000.0, &days);
        let expected = 500_000.0 + 1_500.0 + 25_000.0 - 3_200.0 + 840.0 - 10_000.0;
        assert!((terminal - expected).abs() < 1e-9);
    }

    #[test]
    fn test_order_of_days_does_not_change_terminal_balance() {
        let days = [(100.0, 0.0), (-50.0, 500.0), (75.0, -25.0)];
        let mut reversed = days;
        reversed.reverse();
        assert_eq!(roll(10_000.0, &days), roll(10_000.0, &reversed));
    }

    #[test]
    fn test_short_sale_realized_pnl_sign() {
        // Short 50 shares entered at 100, exited at 90: +500 realized
        let realized = (90.0_f64 - 100.0) * 50.0 * -1.0;
        assert_eq!(realized, 500.0);
    }
}
