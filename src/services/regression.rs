use nalgebra::{DMatrix, DVector};
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Result of a univariate OLS fit with the production beta policy applied:
/// the stored slope is capped, the raw slope stays available for
/// diagnostics only.
#[derive(Debug, Clone)]
pub struct OlsResult {
    pub beta: f64,
    pub raw_beta: f64,
    pub alpha: f64,
    pub r_squared: f64,
    pub p_value: Option<f64>,
    pub observations: usize,
    pub is_significant: bool,
    pub capped: bool,
}

/// Univariate OLS of y on x with slope capping and a two-sided Student-t
/// significance test at `confidence` (0.10 = 90%).
///
/// Returns None when the sample is too small or x is degenerate.
pub fn ols_single_factor(y: &[f64], x: &[f64], cap: f64, confidence: f64) -> Option<OlsResult> {
    let n = y.len().min(x.len());
    if n < 3 {
        return None;
    }
    let y = &y[..n];
    let x = &x[..n];

    let mean_x = x.iter().sum::<f64>() / n as f64;
    let mean_y = y.iter().sum::<f64>() / n as f64;

    let mut s_xy = 0.0;
    let mut s_xx = 0.0;
    let mut s_yy = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        s_xy += dx * dy;
        s_xx += dx * dx;
        s_yy += dy * dy;
    }

    if s_xx < f64::EPSILON {
        return None;
    }

    let raw_beta = s_xy / s_xx;
    let alpha = mean_y - raw_beta * mean_x;

    // Residual sum of squares for R^2 and the slope standard error
    let mut sse = 0.0;
    for (xi, yi) in x.iter().zip(y.iter()) {
        let resid = yi - (alpha + raw_beta * xi);
        sse += resid * resid;
    }
    let r_squared = if s_yy > f64::EPSILON { (1.0 - sse / s_yy).clamp(0.0, 1.0) } else { 0.0 };

    let df = n as f64 - 2.0;
    let p_value = if df > 0.0 && sse > 0.0 {
        let se = (sse / df / s_xx).sqrt();
        if se > 0.0 {
            let t_stat = raw_beta / se;
            StudentsT::new(0.0, 1.0, df)
                .ok()
                .map(|dist| 2.0 * (1.0 - dist.cdf(t_stat.abs())))
        } else {
            None
        }
    } else {
        None
    };

    let beta = raw_beta.clamp(-cap, cap);

    Some(OlsResult {
        beta,
        raw_beta,
        alpha,
        r_squared,
        p_value,
        observations: n,
        is_significant: p_value.is_some_and(|p| p < confidence),
        capped: raw_beta.abs() > cap,
    })
}

#[derive(Debug, Clone)]
pub struct RidgeResult {
    /// Capped coefficients, one per input column.
    pub betas: Vec<f64>,
    pub raw_betas: Vec<f64>,
    pub r_squared: f64,
    pub observations: usize,
}

/// Multivariate ridge regression: solve `(X'X + lambda I) b = X'y` on
/// demeaned data (the intercept is not penalised), then cap each
/// coefficient at +-cap.
///
/// `x_columns` is column-major: k columns of equal length n.
pub fn ridge_regression(
    y: &[f64],
    x_columns: &[Vec<f64>],
    lambda: f64,
    cap: f64,
) -> Option<RidgeResult> {
    let k = x_columns.len();
    if k == 0 {
        return None;
    }
    let n = y.len();
    if n < k + 2 || x_columns.iter().any(|c| c.len() != n) {
        return None;
    }

    let mean_y = y.iter().sum::<f64>() / n as f64;
    let col_means: Vec<f64> = x_columns.iter().map(|c| c.iter().sum::<f64>() / n as f64).collect();

    let x = DMatrix::from_fn(n, k, |i, j| x_columns[j][i] - col_means[j]);
    let yv = DVector::from_fn(n, |i, _| y[i] - mean_y);

    let mut xtx = x.transpose() * &x;
    for i in 0..k {
        xtx[(i, i)] += lambda;
    }
    let xty = x.transpose() * &yv;

    let raw = xtx.lu().solve(&xty)?;

    // Fit quality from the raw solution
    let fitted = &x * &raw;
    let sse = (&yv - &fitted).norm_squared();
    let sst = yv.norm_squared();
    let r_squared = if sst > f64::EPSILON { (1.0 - sse / sst).clamp(0.0, 1.0) } else { 0.0 };

    let raw_betas: Vec<f64> = raw.iter().copied().collect();
    let betas: Vec<f64> = raw_betas.iter().map(|b| b.clamp(-cap, cap)).collect();

    Some(RidgeResult { betas, raw_betas, r_squared, observations: n })
}

/// Pearson correlation of two equally-indexed samples, with the p-value
/// computed on the same aligned sample.
pub fn pearson_correlation(a: &[f64], b: &[f64]) -> Option<(f64, Option<f64>)> {
    let n = a.len().min(b.len());
    if n < 3 {
        return None;
    }

    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a[..n].iter().zip(b[..n].iter()) {
        let dx = x - mean_a;
        let dy = y - mean_b;
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a < f64::EPSILON || var_b < f64::EPSILON {
        return None;
    }

    let rho = (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0);

    let df = n as f64 - 2.0;
    let p_value = if df > 0.0 && rho.abs() < 1.0 {
        let t_stat = rho * (df / (1.0 - rho * rho)).sqrt();
        StudentsT::new(0.0, 1.0, df)
            .ok()
            .map(|dist| 2.0 * (1.0 - dist.cdf(t_stat.abs())))
    } else {
        None
    };

    Some((rho, p_value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ols_recovers_known_slope() {
        // y = 2x exactly
        let x: Vec<f64> = (0..100).map(|i| (i as f64) / 100.0 - 0.5).collect();
        let y: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
        let result = ols_single_factor(&y, &x, 5.0, 0.10).unwrap();
        assert!((result.beta - 2.0).abs() < 1e-10);
        assert!((result.r_squared - 1.0).abs() < 1e-10);
        assert!(!result.capped);
    }

    #[test]
    fn test_ols_caps_extreme_slope() {
        let x: Vec<f64> = (0..80).map(|i| (i as f64) / 1000.0).collect();
        let y: Vec<f64> = x.iter().map(|v| 12.0 * v).collect();
        let result = ols_single_factor(&y, &x, 5.0, 0.10).unwrap();
        assert_eq!(result.beta, 5.0);
        assert!((result.raw_beta - 12.0).abs() < 1e-9);
        assert!(result.capped);
    }

    #[test]
    fn test_ols_noisy_slope_significance() {
        // Deterministic pseudo-noise keeps the test stable
        let x: Vec<f64> = (0..90).map(|i| ((i * 37) % 97) as f64 / 97.0 - 0.5).collect();
        let y: Vec<f64> = x
            .iter()
            .enumerate()
            .map(|(i, v)| 1.5 * v + ((i * 17) % 13) as f64 * 1e-4)
            .collect();
        let result = ols_single_factor(&y, &x, 5.0, 0.10).unwrap();
        assert!((result.beta - 1.5).abs() < 0.01);
        assert!(result.is_significant);
    }

    #[test]
    fn test_ols_rejects_degenerate_x() {
        let x = vec![0.01; 50];
        let y: Vec<f64> = (0..50).map(|i| i as f64).collect();
        assert!(ols_single_factor(&y, &x, 5.0, 0.10).is_none());
    }

    #[test]
    fn test_ridge_recovers_two_factor_model() {
        // y = 0.8*f1 - 0.3*f2, orthogonal-ish factors
        let n = 120;
        let f1: Vec<f64> = (0..n).map(|i| ((i * 31) % 113) as f64 / 113.0 - 0.5).collect();
        let f2: Vec<f64> = (0..n).map(|i| ((i * 57) % 127) as f64 / 127.0 - 0.5).collect();
        let y: Vec<f64> = (0..n).map(|i| 0.8 * f1[i] - 0.3 * f2[i]).collect();

        let result = ridge_regression(&y, &[f1, f2], 0.001, 5.0).unwrap();
        assert!((result.betas[0] - 0.8).abs() < 0.05, "beta0 = {}", result.betas[0]);
        assert!((result.betas[1] + 0.3).abs() < 0.05, "beta1 = {}", result.betas[1]);
        assert!(result.r_squared > 0.95);
    }

    #[test]
    fn test_ridge_lambda_shrinks_coefficients() {
        let n = 80;
        let f1: Vec<f64> = (0..n).map(|i| ((i * 31) % 113) as f64 / 113.0 - 0.5).collect();
        let y: Vec<f64> = f1.iter().map(|v| 1.0 * v).collect();

        let loose = ridge_regression(&y, &[f1.clone()], 0.0001, 5.0).unwrap();
        let tight = ridge_regression(&y, &[f1], 50.0, 5.0).unwrap();
        assert!(tight.betas[0].abs() < loose.betas[0].abs());
    }

    #[test]
    fn test_ridge_caps_each_beta() {
        let n = 60;
        let f1: Vec<f64> = (0..n).map(|i| (i as f64) / 1000.0).collect();
        let y: Vec<f64> = f1.iter().map(|v| 40.0 * v).collect();
        let result = ridge_regression(&y, &[f1], 1e-9, 5.0).unwrap();
        assert_eq!(result.betas[0], 5.0);
        assert!(result.raw_betas[0] > 5.0);
    }

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let a: Vec<f64> = (0..50).map(|i| i as f64).collect();
        let b: Vec<f64> = a.iter().map(|v| 3.0 * v + 1.0).collect();
        let (rho, p) = pearson_correlation(&a, &b).unwrap();
        assert!((rho - 1.0).abs() < 1e-12);
        assert!(p.is_none() || p.unwrap() < 0.01);

        let c: Vec<f64> = a.iter().map(|v| -v).collect();
        let (rho_neg, _) = pearson_correlation(&a, &c).unwrap();
        assert!((rho_neg + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_pearson_rejects_constant_series() {
        let a = vec![1.0; 40];
        let b: Vec<f64> = (0..40).map(|i| i as f64).collect();
        assert!(pearson_correlation(&a, &b).is_none());
    }
}
