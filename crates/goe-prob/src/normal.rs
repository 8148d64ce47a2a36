//! Normal distribution utilities.

use goe_core::{Error, Result};

/// Natural log of `sqrt(2π)`.
const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_7;

fn check_sigma(sigma: f64) -> Result<()> {
    if !sigma.is_finite() || sigma <= 0.0 {
        return Err(Error::Validation(format!("sigma must be finite and > 0, got {}", sigma)));
    }
    Ok(())
}

/// Log-PDF of a Normal distribution `N(mu, sigma)` at `x`.
///
/// `log p(x) = -0.5 * ((x-mu)/sigma)^2 - ln(sigma) - ln(sqrt(2π))`
pub fn logpdf(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    check_sigma(sigma)?;
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z - sigma.ln() - LN_SQRT_2PI)
}

/// Unnormalized Gaussian log-kernel `-0.5 * ((x-mu)/sigma)^2`.
///
/// This is the form used for soft physical penalties where the normalization
/// constant is irrelevant.
pub fn log_kernel(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    check_sigma(sigma)?;
    let z = (x - mu) / sigma;
    Ok(-0.5 * z * z)
}

/// Derivative of [`log_kernel`] w.r.t. `x`: `-(x-mu)/sigma^2`.
pub fn grad_log_kernel(x: f64, mu: f64, sigma: f64) -> Result<f64> {
    check_sigma(sigma)?;
    Ok(-(x - mu) / (sigma * sigma))
}
