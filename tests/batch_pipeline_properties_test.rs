/// Batch Pipeline Property Tests
///
/// Structural properties the daily pipeline must hold: return alignment,
/// pairwise correlation invariants, beta capping and aggregation, and
/// the backfill date arithmetic.

// ---------------------------------------------------------------------------
// Return alignment
// ---------------------------------------------------------------------------

#[cfg(test)]
mod return_alignment {
    use std::collections::BTreeMap;

    type Series = BTreeMap<u32, f64>;

    fn inner_join_dates(series: &[&Series]) -> Vec<u32> {
        let mut dates: Vec<u32> = series[0].keys().copied().collect();
        for s in &series[1..] {
            dates.retain(|d| s.contains_key(d));
        }
        dates
    }

    fn series(pairs: &[(u32, f64)]) -> Series {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_inner_join_drops_dates_missing_anywhere() {
        let a = series(&[(1, 0.01), (2, 0.02), (3, 0.03), (4, 0.04)]);
        let b = series(&[(1, 0.05), (3, -0.01), (4, 0.00)]);
        let c = series(&[(1, 0.02), (2, 0.01), (4, 0.03)]);

        let aligned = inner_join_dates(&[&a, &b, &c]);
        assert_eq!(aligned, vec![1, 4]);
    }

    #[test]
    fn test_simple_return_formula() {
        // close_t / close_{t-1} - 1
        let closes = [100.0, 110.0, 99.0];
        let returns: Vec<f64> = closes.windows(2).map(|w| w[1] / w[0] - 1.0).collect();
        assert!((returns[0] - 0.10).abs() < 1e-12);
        assert!((returns[1] + 0.10).abs() < 1e-12);
    }

    #[test]
    fn test_log_return_formula() {
        let closes: [f64; 2] = [100.0, 110.0];
        let log_return = (closes[1] / closes[0]).ln();
        assert!((log_return - 0.0953101798).abs() < 1e-9);
    }
}

// ---------------------------------------------------------------------------
// Correlation invariants
// ---------------------------------------------------------------------------

#[cfg(test)]
mod correlation_invariants {
    fn pearson(a: &[f64], b: &[f64]) -> Option<f64> {
        let n = a.len().min(b.len());
        if n < 3 {
            return None;
        }
        let mean_a = a[..n].iter().sum::<f64>() / n as f64;
        let mean_b = b[..n].iter().sum::<f64>() / n as f64;
        let mut cov = 0.0;
        let mut va = 0.0;
        let mut vb = 0.0;
        for (x, y) in a[..n].iter().zip(b[..n].iter()) {
            cov += (x - mean_a) * (y - mean_b);
            va += (x - mean_a).powi(2);
            vb += (y - mean_b).powi(2);
        }
        if va < f64::EPSILON || vb < f64::EPSILON {
            return None;
        }
        Some((cov / (va.sqrt() * vb.sqrt())).clamp(-1.0, 1.0))
    }

    fn noise(n: usize, seed: u64) -> Vec<f64> {
        (0..n).map(|i| (((i as u64).wrapping_mul(seed) % 1009) as f64 / 1009.0) - 0.5).collect()
    }

    #[test]
    fn test_correlation_in_unit_interval() {
        let a = noise(90, 7919);
        let b = noise(90, 104729);
        let rho = pearson(&a, &b).unwrap();
        assert!((-1.0..=1.0).contains(&rho));
    }

    #[test]
    fn test_correlation_is_symmetric() {
        let a = noise(60, 31);
        let b = noise(60, 57);
        assert_eq!(pearson(&a, &b), pearson(&b, &a));
    }

    #[test]
    fn test_min_pair_observations_policy() {
        // Pairs with fewer than 30 aligned observations are omitted
        const MIN_PAIR_OBS: usize = 30;
        let aligned_lengths = [10usize, 29, 30, 45];
        let kept: Vec<usize> =
            aligned_lengths.iter().copied().filter(|n| *n >= MIN_PAIR_OBS).collect();
        assert_eq!(kept, vec![30, 45]);
    }

    #[test]
    fn test_constant_series_yields_no_correlation() {
        let flat = vec![0.0; 50];
        let moving = noise(50, 13);
        assert!(pearson(&flat, &moving).is_none());
    }
}

// ---------------------------------------------------------------------------
// Beta policy
// ---------------------------------------------------------------------------

#[cfg(test)]
mod beta_policy {
    const BETA_CAP: f64 = 5.0;

    fn cap(beta: f64) -> f64 {
        beta.clamp(-BETA_CAP, BETA_CAP)
    }

    #[test]
    fn test_no_persisted_beta_exceeds_cap() {
        let raw = [0.8, -1.2, 7.5, -12.0, 4.99, 5.0];
        for b in raw {
            assert!(cap(b).abs() <= BETA_CAP);
        }
        assert_eq!(cap(7.5), 5.0);
        assert_eq!(cap(-12.0), -5.0);
    }

    #[test]
    fn test_portfolio_beta_is_weighted_sum_of_symbol_betas() {
        // Symbol betas are portfolio-agnostic: moving a symbol between
        // books changes weights, never the cached beta.
        let symbol_betas = [("AAPL", 1.25), ("SPY", 1.0), ("TLT", -0.4)];
        let weights_book_a = [("AAPL", 0.04), ("SPY", 0.10), ("TLT", 0.02)];
        let weights_book_b = [("AAPL", 0.50), ("SPY", 0.00), ("TLT", 0.00)];

        let beta_of = |weights: &[(&str, f64)]| -> f64 {
            weights
                .iter()
                .map(|(sym, w)| {
                    let beta = symbol_betas.iter().find(|(s, _)| s == sym).unwrap().1;
                    w * beta
                })
                .sum()
        };

        let beta_a = beta_of(&weights_book_a);
        let beta_b = beta_of(&weights_book_b);

        assert!((beta_a - (0.04 * 1.25 + 0.10 * 1.0 + 0.02 * -0.4)).abs() < 1e-4);
        assert!((beta_b - 0.625).abs() < 1e-4);
    }

    #[test]
    fn test_missing_symbol_beta_contributes_zero() {
        let cached: Option<f64> = None;
        let weight = 0.3;
        let contribution = cached.map(|b| weight * b).unwrap_or(0.0);
        assert_eq!(contribution, 0.0);
    }
}

// ---------------------------------------------------------------------------
// Backfill arithmetic
// ---------------------------------------------------------------------------

#[cfg(test)]
mod backfill {
    /// Simplified weekday-only calendar for the property: real holidays
    /// are covered by the calendar module's own tests.
    fn weekdays_between(start: u32, end: u32) -> Vec<u32> {
        (start..=end).filter(|d| d % 7 != 0 && d % 7 != 6).collect()
    }

    #[test]
    fn test_gap_processing_is_exact_and_ordered() {
        // Latest complete snapshot at day 2, run date day 12: exactly the
        // intermediate weekdays are processed, ascending, no repeats.
        let pending = weekdays_between(3, 12);
        let mut sorted = pending.clone();
        sorted.sort_unstable();
        assert_eq!(pending, sorted);
        assert!(!pending.contains(&2), "completed day must not reprocess");
        let mut dedup = pending.clone();
        dedup.dedup();
        assert_eq!(dedup.len(), pending.len());
    }

    #[test]
    fn test_no_gap_means_no_work() {
        assert!(weekdays_between(13, 12).is_empty());
    }

    #[test]
    fn test_five_day_force_rerun_range() {
        // A Monday-to-Friday force-rerun covers exactly five days
        let days = weekdays_between(1, 5);
        assert_eq!(days.len(), 5);
    }
}

// ---------------------------------------------------------------------------
// Volatility annualisation
// ---------------------------------------------------------------------------

#[cfg(test)]
mod volatility {
    fn realized_vol(returns: &[f64], window: usize) -> Option<f64> {
        if returns.len() < window || window < 2 {
            return None;
        }
        let tail = &returns[returns.len() - window..];
        let n = tail.len() as f64;
        let mean = tail.iter().sum::<f64>() / n;
        let var = tail.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt() * 252.0_f64.sqrt())
    }

    #[test]
    fn test_sqrt_252_annualisation() {
        let returns: Vec<f64> =
            (0..63).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }).collect();
        let vol = realized_vol(&returns, 21).unwrap();
        let expected_daily = 0.01;
        assert!((vol / 252.0_f64.sqrt() - expected_daily).abs() < 0.002);
    }

    #[test]
    fn test_21d_and_63d_windows_differ_on_regime_change() {
        // Calm first two months, violent last month
        let mut returns = vec![0.001; 42];
        returns.extend((0..21).map(|i| if i % 2 == 0 { 0.03 } else { -0.03 }));
        let short = realized_vol(&returns, 21).unwrap();
        let long = realized_vol(&returns, 63).unwrap();
        assert!(short > long, "recent window must react faster: {} vs {}", short, long);
    }
}
