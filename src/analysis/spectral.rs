//! Heidelberger-Welch spectral variance estimation.
//!
//! the steady-state variance of a correlated sample path is estimated from
//! the spectral density at zero frequency: compute a periodogram, smooth it
//! by averaging adjacent pairs of log-ordinates, fit a low-degree polynomial
//! by least squares in an orthonormal basis, and read the fit off at zero.

use crate::dist::student_t_quantile;

/// normalising constant C1(K, d) and degrees of freedom for the fitted
/// log-periodogram, per number of points K and polynomial degree d
const CONSTANTS: [(usize, usize, f64, usize); 9] = [
    (25, 0, 0.987, 76),
    (25, 1, 0.948, 18),
    (25, 2, 0.882, 7),
    (25, 3, 0.784, 3),
    (50, 0, 0.994, 154),
    (50, 1, 0.974, 37),
    (50, 2, 0.941, 16),
    (50, 3, 0.895, 8),
    (5, 2, 0.882, 7),
];

/// what to do when the fitted polynomial slopes upward at zero frequency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SlopeProtection {
    #[default]
    Off,
    /// always fall back on the degree-zero fit
    Unconditional,
    /// fall back only when the degree-zero fit is more conservative
    Conditional,
}

pub(crate) fn lookup_constants(points: usize, degree: usize) -> Option<(f64, usize)> {
    CONSTANTS
        .iter()
        .find(|&&(k, d, _, _)| k == points && d == degree)
        .map(|&(_, _, c1, kappa)| (c1, kappa))
}

/// periodogram ordinates I(k/n) for k = 1..=points
pub(crate) fn periodogram(x: &[f64], points: usize) -> Vec<f64> {
    let n = x.len() as f64;
    (1..=points)
        .map(|k| {
            let mut re = 0.0;
            let mut im = 0.0;
            for (j, &v) in x.iter().enumerate() {
                let theta = -(2.0 * std::f64::consts::PI * j as f64 * k as f64) / n;
                re += v * theta.cos();
                im += v * theta.sin();
            }
            (re * re + im * im) / n
        })
        .collect()
}

/// log of pairwise-averaged ordinates plus the smoothing bias offset.
/// all-equal samples yield zero ordinates; those are floored to the
/// smallest positive double to avoid log singularities.
pub(crate) fn log_smoothed(p: &[f64], offset: f64) -> Vec<f64> {
    (0..p.len() / 2)
        .map(|j| {
            let x = (p[2 * j] + p[2 * j + 1]) / 2.0;
            let x = if x == 0.0 { f64::MIN_POSITIVE } else { x };
            x.ln() + offset
        })
        .collect()
}

/// build the orthonormal polynomial basis over the abscissas x under the
/// discrete inner product, returning (phi[i][j] = phi_i(x_j), a, b)
fn orthonormal_tables(x: &[f64], degree: usize) -> (Vec<Vec<f64>>, Vec<f64>, Vec<f64>) {
    let n = x.len();
    let mut phi = vec![vec![0.0; n]; degree + 1];
    let mut a = vec![0.0; degree + 1];
    let mut b = vec![0.0; degree + 1];
    let p0 = 1.0 / (n as f64).sqrt();
    for j in 0..n {
        phi[0][j] = p0;
    }
    let mut q = vec![0.0; n];
    for i in 0..degree {
        b[i] = (0..n).map(|j| x[j] * phi[i][j] * phi[i][j]).sum();
        for j in 0..n {
            let prev = if i > 0 { phi[i - 1][j] / a[i - 1] } else { 0.0 };
            q[j] = (x[j] - b[i]) * phi[i][j] - prev;
        }
        let s = q.iter().map(|v| v * v).sum::<f64>();
        a[i] = 1.0 / s.sqrt();
        for j in 0..n {
            phi[i + 1][j] = a[i] * q[j];
        }
    }
    (phi, a, b)
}

/// evaluate the basis polynomials and their derivatives at a point
fn orthonormal_at(a: &[f64], b: &[f64], n: usize, x: f64) -> (Vec<f64>, Vec<f64>) {
    let degree = a.len() - 1;
    let mut p = vec![0.0; degree + 1];
    let mut dp = vec![0.0; degree + 1];
    p[0] = 1.0 / (n as f64).sqrt();
    for i in 0..degree {
        let prev = if i > 0 { p[i - 1] / a[i - 1] } else { 0.0 };
        p[i + 1] = a[i] * ((x - b[i]) * p[i] - prev);
    }
    dp[0] = 0.0;
    for i in 0..degree {
        let prev = if i > 0 { dp[i - 1] / a[i - 1] } else { 0.0 };
        dp[i + 1] = a[i] * (p[i] + (x - b[i]) * dp[i] - prev);
    }
    (p, dp)
}

/// least-squares polynomial fit of f over x in the orthonormal basis,
/// evaluated at zero; returns (p(0), p'(0))
pub(crate) fn least_squares_at_zero(x: &[f64], f: &[f64], degree: usize) -> (f64, f64) {
    let n = x.len();
    let (phi, a, b) = orthonormal_tables(x, degree);
    let c = (0..=degree)
        .map(|i| (0..n).map(|j| f[j] * phi[i][j]).sum::<f64>())
        .collect::<Vec<_>>();
    let (phi0, dphi0) = orthonormal_at(&a, &b, n, 0.0);
    let p0 = c.iter().zip(&phi0).map(|(c, p)| c * p).sum();
    let dp0 = c.iter().zip(&dphi0).map(|(c, p)| c * p).sum();
    (p0, dp0)
}

/// spectral ANOVA: estimate the steady-state variance of the mean of x and
/// the degrees of freedom of the estimator. returns `None` when the (K, d)
/// pair is not tabulated or the estimate degenerates.
pub(crate) fn spectral_variance(
    x: &[f64],
    points: usize,
    degree: usize,
    slope: SlopeProtection,
) -> Option<(f64, usize)> {
    let (c1, mut kappa) = lookup_constants(points, degree)?;
    let p = periodogram(x, 2 * points);
    let n = x.len() as f64;
    let f = (1..=points)
        .map(|j| (4 * j - 1) as f64 / (2.0 * n))
        .collect::<Vec<_>>();
    let l = log_smoothed(&p, 0.270);
    let (a0, da0) = least_squares_at_zero(&f, &l, degree);
    let mut var = c1 * a0.exp() / n;
    // a fit curving upward at zero frequency overestimates nothing but
    // noise; fall back on the flat fit per the protection policy
    if slope != SlopeProtection::Off && da0 > 0.0 {
        if let Some((c1_flat, kappa_flat)) = lookup_constants(points, 0) {
            let (a0_flat, _) = least_squares_at_zero(&f, &l, 0);
            let var_flat = c1_flat * a0_flat.exp() / n;
            let corrected = match slope {
                SlopeProtection::Unconditional => true,
                SlopeProtection::Conditional => var_flat > var,
                SlopeProtection::Off => false,
            };
            if corrected {
                kappa = kappa_flat;
                var = var_flat;
            }
        }
    }
    if var < 0.0 || !var.is_finite() {
        log::warn!("spectral variance estimate degenerated to {}", var);
        return None;
    }
    Some((var, kappa))
}

/// Schruben's standardized time-average deviation statistic over the test
/// window, using the spectral variance of the last n_v samples
pub(crate) fn schruben_statistic(x: &[f64], n_v: usize, var: f64) -> f64 {
    let n_t = x.len();
    let mean = x.iter().sum::<f64>() / n_t as f64;
    let mut prefix = 0.0;
    let mut sum = 0.0;
    for (k, &v) in x.iter().enumerate() {
        let k = (k + 1) as f64;
        prefix += v;
        sum += k * (1.0 - k / n_t as f64) * (mean - prefix / k);
    }
    sum * 45.0_f64.sqrt() / (n_t as f64 * (n_t as f64 * n_v as f64 * var).sqrt())
}

/// two-sided t-threshold for the Schruben test
pub(crate) fn schruben_threshold(alpha: f64, kappa: usize) -> f64 {
    student_t_quantile(1.0 - alpha / 2.0, kappa as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use rand::SeedableRng;
    use rand::rngs::SmallRng;

    #[test]
    fn constant_signal_has_a_zero_periodogram() {
        let x = vec![3.0; 64];
        let p = periodogram(&x, 8);
        assert!(p.iter().all(|&v| v.abs() < 1e-18));
    }

    #[test]
    fn pure_tone_concentrates_at_its_frequency() {
        let n = 64;
        let x = (0..n)
            .map(|j| (2.0 * std::f64::consts::PI * 4.0 * j as f64 / n as f64).cos())
            .collect::<Vec<_>>();
        let p = periodogram(&x, 8);
        let peak = p
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i + 1);
        assert!(peak == Some(4));
    }

    #[test]
    fn fit_recovers_an_exact_polynomial() {
        let x = (1..=20).map(|i| i as f64 / 20.0).collect::<Vec<_>>();
        let f = x.iter().map(|v| 2.0 + 3.0 * v - v * v).collect::<Vec<_>>();
        let (p0, dp0) = least_squares_at_zero(&x, &f, 2);
        assert!((p0 - 2.0).abs() < 1e-9, "p(0) {}", p0);
        assert!((dp0 - 3.0).abs() < 1e-8, "p'(0) {}", dp0);
    }

    #[test]
    fn lookup_covers_the_tabulated_grid() {
        assert!(lookup_constants(25, 2) == Some((0.882, 7)));
        assert!(lookup_constants(50, 0) == Some((0.994, 154)));
        assert!(lookup_constants(30, 2).is_none());
    }

    #[test]
    fn white_noise_variance_is_near_sigma_squared_over_n() {
        let mut rng = SmallRng::seed_from_u64(42);
        let n = 100;
        let x = (0..n).map(|_| rng.random::<f64>() - 0.5).collect::<Vec<_>>();
        let (var, kappa) = spectral_variance(&x, 25, 2, SlopeProtection::Off).unwrap();
        // var estimates Var(mean) = sigma^2 / n = (1/12) / 100
        let expected = 1.0 / 12.0 / n as f64;
        assert!(var > expected / 5.0 && var < expected * 5.0, "var {}", var);
        assert!(kappa == 7);
    }

    #[test]
    fn schruben_statistic_separates_stationary_from_drifting() {
        let mut rng = SmallRng::seed_from_u64(7);
        let flat = (0..200).map(|_| rng.random::<f64>()).collect::<Vec<_>>();
        let (var, _) = spectral_variance(&flat[100..], 25, 2, SlopeProtection::Off).unwrap();
        let t_flat = schruben_statistic(&flat, 100, var).abs();
        let drifting = (0..200)
            .map(|i| rng.random::<f64>() + 10.0 * (-(i as f64) / 40.0).exp())
            .collect::<Vec<_>>();
        let (var, _) = spectral_variance(&drifting[100..], 25, 2, SlopeProtection::Off).unwrap();
        let t_drift = schruben_statistic(&drifting, 100, var).abs();
        // a decaying level inflates the standardized deviation by orders
        // of magnitude over stationary noise
        assert!(t_drift > 10.0 * t_flat, "flat {} drift {}", t_flat, t_drift);
    }
}
