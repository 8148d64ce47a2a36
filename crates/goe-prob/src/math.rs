//! Small numerically-stable math utilities used across probability code.

/// Stable `log(1 + exp(x))`.
///
/// Branchless: `log(1+exp(x)) = max(x,0) + log(1+exp(-|x|))`.
#[inline]
pub fn log1pexp(x: f64) -> f64 {
    let abs_x = x.abs();
    let e = (-abs_x).exp(); // always in (0, 1], no overflow
    x.max(0.0) + e.ln_1p()
}

/// Stable sigmoid: `1 / (1 + exp(-x))`.
#[inline]
pub fn sigmoid(x: f64) -> f64 {
    let abs_x = x.abs();
    let e = (-abs_x).exp();
    let recip = 1.0 / (1.0 + e);
    // x >= 0: sigmoid = 1/(1+exp(-x)) = recip
    // x <  0: sigmoid = exp(x)/(1+exp(x)) = e/(1+e) = e*recip
    if x >= 0.0 { recip } else { e * recip }
}

/// Stable `log(sigmoid(x))`.
#[inline]
pub fn log_sigmoid(x: f64) -> f64 {
    // log(sigmoid(x)) = -log(1 + exp(-x))
    if x >= 0.0 { -(-x).exp().ln_1p() } else { x - x.exp().ln_1p() }
}

/// Stable softplus: `log(1 + exp(x))`.
#[inline]
pub fn softplus(x: f64) -> f64 {
    log1pexp(x)
}

/// Central finite-difference gradient of a scalar function.
///
/// `g[i] = (f(x + eps e_i) - f(x - eps e_i)) / (2 eps)`. Used as a fallback when
/// no analytic gradient exists and to cross-check analytic gradients.
pub fn central_difference_grad<F>(f: F, x: &[f64], eps: f64) -> Vec<f64>
where
    F: Fn(&[f64]) -> f64,
{
    let mut xp = x.to_vec();
    let mut g = vec![0.0; x.len()];
    for i in 0..x.len() {
        let orig = xp[i];
        xp[i] = orig + eps;
        let f_plus = f(&xp);
        xp[i] = orig - eps;
        let f_minus = f(&xp);
        xp[i] = orig;
        g[i] = (f_plus - f_minus) / (2.0 * eps);
    }
    g
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log1pexp_matches_naive_moderate_values() {
        let xs: [f64; 7] = [-10.0, -2.0, -0.1, 0.0, 0.1, 2.0, 10.0];
        for x in xs {
            let naive = (1.0 + x.exp()).ln();
            let stable = log1pexp(x);
            assert!((naive - stable).abs() < 1e-12, "x={}: {} vs {}", x, naive, stable);
        }
    }

    #[test]
    fn test_log1pexp_is_finite_extremes() {
        for x in [-1e6, -100.0, 100.0, 1e6] {
            let y = log1pexp(x);
            assert!(y.is_finite(), "x={} produced {}", x, y);
        }
        assert!((log1pexp(1e6) - 1e6).abs() < 1e-6);
    }

    #[test]
    fn test_sigmoid_bounds_and_symmetry() {
        for x in [-50.0, -10.0, -1.0, 0.0, 1.0, 10.0, 50.0] {
            let s = sigmoid(x);
            assert!((0.0..=1.0).contains(&s), "sigmoid({})={}", x, s);
            let t = sigmoid(-x);
            assert!((s + t - 1.0).abs() < 1e-15, "sigmoid symmetry failed at {}", x);
        }
    }

    #[test]
    fn test_log_sigmoid_matches_naive_moderate_values() {
        for x in [-10.0, -2.0, -0.1, 0.0, 0.1, 2.0, 10.0] {
            let naive = sigmoid(x).ln();
            let stable = log_sigmoid(x);
            assert!((naive - stable).abs() < 1e-12, "x={}: {} vs {}", x, naive, stable);
        }
    }

    #[test]
    fn test_log_sigmoid_far_tail_is_finite() {
        // Naive ln(sigmoid(-800)) underflows to -inf.
        let v = log_sigmoid(-800.0);
        assert!(v.is_finite() && (v + 800.0).abs() < 1e-9, "log_sigmoid(-800)={}", v);
    }

    #[test]
    fn test_central_difference_grad_quadratic() {
        let f = |x: &[f64]| x[0] * x[0] + 3.0 * x[1];
        let g = central_difference_grad(f, &[2.0, -1.0], 1e-6);
        approx::assert_abs_diff_eq!(g[0], 4.0, epsilon = 1e-6);
        approx::assert_abs_diff_eq!(g[1], 3.0, epsilon = 1e-6);
    }
}
