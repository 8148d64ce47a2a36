//! Bijective transforms (bijectors) for unconstrained parameterization.
//!
//! NUTS operates in unconstrained space `z ∈ R^n`. These transforms map between
//! unconstrained `z` and constrained parameters `theta`, and provide the
//! Jacobian terms needed to keep the target density correct.

use goe_core::ParameterScale;

use crate::math::{log_sigmoid, sigmoid};

/// Clamp for probabilities fed into `logit` by the interval inverses.
const LOGIT_CLAMP: f64 = 1e-15;

/// A bijective transform from unconstrained `z` to constrained `theta`.
pub trait Bijector: Send + Sync {
    /// Map unconstrained -> constrained: `theta = forward(z)`
    fn forward(&self, z: f64) -> f64;
    /// Map constrained -> unconstrained: `z = inverse(theta)`
    fn inverse(&self, theta: f64) -> f64;
    /// Log absolute determinant of Jacobian: `log|dtheta/dz|`
    fn log_abs_det_jacobian(&self, z: f64) -> f64;
    /// Derivative of log|J| w.r.t. z: `d/dz log|dtheta/dz|`
    fn grad_log_abs_det_jacobian(&self, z: f64) -> f64;
    /// Jacobian element: `dtheta/dz`
    fn jacobian(&self, z: f64) -> f64;
}

#[inline]
fn logit_clamped(p: f64) -> f64 {
    let p = p.clamp(LOGIT_CLAMP, 1.0 - LOGIT_CLAMP);
    (p / (1.0 - p)).ln()
}

/// Identity: `(-inf, inf) -> (-inf, inf)`.
pub struct IdentityBijector;

impl Bijector for IdentityBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        z
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        theta
    }
    #[inline]
    fn log_abs_det_jacobian(&self, _z: f64) -> f64 {
        0.0
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, _z: f64) -> f64 {
        0.0
    }
    #[inline]
    fn jacobian(&self, _z: f64) -> f64 {
        1.0
    }
}

/// Exp: `(-inf, inf) -> (0, inf)`, `theta = exp(z)`, `log|J| = z`.
pub struct ExpBijector;

impl Bijector for ExpBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        z.exp()
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        theta.ln()
    }
    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        z
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, _z: f64) -> f64 {
        1.0
    }
    #[inline]
    fn jacobian(&self, z: f64) -> f64 {
        z.exp()
    }
}

/// LowerBounded: `(-inf, inf) -> (a, inf)`, `theta = a + exp(z)`.
pub struct LowerBoundedBijector {
    lower: f64,
}

impl LowerBoundedBijector {
    pub fn new(lower: f64) -> Self {
        Self { lower }
    }
}

impl Bijector for LowerBoundedBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        self.lower + z.exp()
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        (theta - self.lower).max(LOGIT_CLAMP).ln()
    }
    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        z
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, _z: f64) -> f64 {
        1.0
    }
    #[inline]
    fn jacobian(&self, z: f64) -> f64 {
        z.exp()
    }
}

/// UpperBounded: `(-inf, inf) -> (-inf, b)`, `theta = b - exp(z)`.
pub struct UpperBoundedBijector {
    upper: f64,
}

impl UpperBoundedBijector {
    pub fn new(upper: f64) -> Self {
        Self { upper }
    }
}

impl Bijector for UpperBoundedBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        self.upper - z.exp()
    }
    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        (self.upper - theta).max(LOGIT_CLAMP).ln()
    }
    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        // dtheta/dz = -exp(z)
        z
    }
    #[inline]
    fn grad_log_abs_det_jacobian(&self, _z: f64) -> f64 {
        1.0
    }
    #[inline]
    fn jacobian(&self, z: f64) -> f64 {
        -z.exp()
    }
}

/// Sigmoid: `(-inf, inf) -> (a, b)`, `theta = a + (b-a)*sigmoid(z)`.
pub struct SigmoidBijector {
    lower: f64,
    upper: f64,
    width: f64,
    log_width: f64,
}

impl SigmoidBijector {
    pub fn new(lower: f64, upper: f64) -> Self {
        let width = upper - lower;
        Self { lower, upper, width, log_width: width.ln() }
    }
}

impl Bijector for SigmoidBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        (self.lower + self.width * sigmoid(z)).clamp(self.lower, self.upper)
    }

    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        logit_clamped((theta - self.lower) / self.width)
    }

    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        // log|J| = log(b-a) + log_sigmoid(z) + log_sigmoid(-z)
        self.log_width + log_sigmoid(z) + log_sigmoid(-z)
    }

    #[inline]
    fn grad_log_abs_det_jacobian(&self, z: f64) -> f64 {
        // sigmoid(-z) - sigmoid(z)
        1.0 - 2.0 * sigmoid(z)
    }

    #[inline]
    fn jacobian(&self, z: f64) -> f64 {
        let s = sigmoid(z);
        self.width * s * (1.0 - s)
    }
}

/// LogInterval: `(-inf, inf) -> (a, b)` with `0 < a < b`, sigmoid in log space.
///
/// `theta = exp(ln a + (ln b - ln a) * sigmoid(z))`. Parameters spanning several
/// decades (densities, masses) mix far better under this map than under
/// [`SigmoidBijector`], which crowds almost all of its volume near `b`.
pub struct LogIntervalBijector {
    lower: f64,
    upper: f64,
    log_lower: f64,
    log_width: f64,
    ln_log_width: f64,
}

impl LogIntervalBijector {
    /// Requires `0 < lower < upper`; callers go through [`ParameterTransform`],
    /// which falls back to [`SigmoidBijector`] otherwise.
    pub fn new(lower: f64, upper: f64) -> Self {
        let log_lower = lower.ln();
        let log_width = upper.ln() - log_lower;
        Self { lower, upper, log_lower, log_width, ln_log_width: log_width.ln() }
    }

    #[inline]
    fn log_theta(&self, z: f64) -> f64 {
        self.log_lower + self.log_width * sigmoid(z)
    }
}

impl Bijector for LogIntervalBijector {
    #[inline]
    fn forward(&self, z: f64) -> f64 {
        self.log_theta(z).exp().clamp(self.lower, self.upper)
    }

    #[inline]
    fn inverse(&self, theta: f64) -> f64 {
        logit_clamped((theta.ln() - self.log_lower) / self.log_width)
    }

    #[inline]
    fn log_abs_det_jacobian(&self, z: f64) -> f64 {
        // dtheta/dz = theta * (ln b - ln a) * sigmoid(z) * sigmoid(-z)
        self.log_theta(z) + self.ln_log_width + log_sigmoid(z) + log_sigmoid(-z)
    }

    #[inline]
    fn grad_log_abs_det_jacobian(&self, z: f64) -> f64 {
        let s = sigmoid(z);
        self.log_width * s * (1.0 - s) + 1.0 - 2.0 * s
    }

    #[inline]
    fn jacobian(&self, z: f64) -> f64 {
        let s = sigmoid(z);
        self.log_theta(z).exp() * self.log_width * s * (1.0 - s)
    }
}

/// Composite transform for a vector of parameters.
///
/// Each parameter gets its own bijector, selected from bounds (and scale).
pub struct ParameterTransform {
    bijectors: Vec<Box<dyn Bijector>>,
}

fn select_bijector(lo: f64, hi: f64, scale: ParameterScale) -> Box<dyn Bijector> {
    let lo_finite = lo.is_finite();
    let hi_finite = hi.is_finite();

    match (lo_finite, hi_finite) {
        (true, true) if hi > lo => match scale {
            ParameterScale::Log if lo > 0.0 => Box::new(LogIntervalBijector::new(lo, hi)),
            _ => Box::new(SigmoidBijector::new(lo, hi)),
        },
        (true, false) if hi == f64::INFINITY => {
            if lo == 0.0 {
                Box::new(ExpBijector)
            } else {
                Box::new(LowerBoundedBijector::new(lo))
            }
        }
        (false, true) if lo == f64::NEG_INFINITY => Box::new(UpperBoundedBijector::new(hi)),
        _ => Box::new(IdentityBijector),
    }
}

impl ParameterTransform {
    /// Create transforms from parameter bounds, every parameter on a linear scale.
    ///
    /// Selection logic:
    /// - `(-inf, inf)` -> Identity
    /// - `(0, inf)` -> Exp
    /// - `(a, inf)` -> LowerBounded(a)
    /// - `(-inf, b)` -> UpperBounded(b)
    /// - `(a, b)` both finite -> Sigmoid(a, b)
    ///
    /// Degenerate or NaN bounds fall back to Identity.
    pub fn from_bounds(bounds: &[(f64, f64)]) -> Self {
        let scales = vec![ParameterScale::Linear; bounds.len()];
        Self::from_bounds_and_scales(bounds, &scales)
    }

    /// Like [`Self::from_bounds`], but finite positive intervals with
    /// [`ParameterScale::Log`] get a [`LogIntervalBijector`].
    ///
    /// Missing scale entries are treated as linear.
    pub fn from_bounds_and_scales(bounds: &[(f64, f64)], scales: &[ParameterScale]) -> Self {
        let bijectors = bounds
            .iter()
            .enumerate()
            .map(|(i, &(lo, hi))| {
                let scale = scales.get(i).copied().unwrap_or_default();
                select_bijector(lo, hi, scale)
            })
            .collect();
        Self { bijectors }
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.bijectors.len()
    }

    /// Map unconstrained -> constrained.
    pub fn forward(&self, z: &[f64]) -> Vec<f64> {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.forward(zi)).collect()
    }

    /// Map constrained -> unconstrained.
    pub fn inverse(&self, theta: &[f64]) -> Vec<f64> {
        theta.iter().zip(&self.bijectors).map(|(&ti, b)| b.inverse(ti)).collect()
    }

    /// Sum of log|J| over all parameters.
    pub fn log_abs_det_jacobian(&self, z: &[f64]) -> f64 {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.log_abs_det_jacobian(zi)).sum()
    }

    /// Gradient of sum(log|J|) w.r.t. z.
    pub fn grad_log_abs_det_jacobian(&self, z: &[f64]) -> Vec<f64> {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.grad_log_abs_det_jacobian(zi)).collect()
    }

    /// Diagonal Jacobian: `dtheta_i/dz_i` for each parameter.
    pub fn jacobian_diag(&self, z: &[f64]) -> Vec<f64> {
        z.iter().zip(&self.bijectors).map(|(&zi, b)| b.jacobian(zi)).collect()
    }
}
