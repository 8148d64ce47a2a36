//! Reference models shared by unit tests.

use goe_core::traits::LogDensityModel;
use goe_core::{Error, Result};

/// Independent Gaussian with known mean and scale per coordinate.
#[derive(Debug, Clone)]
pub(crate) struct GaussianModel {
    mean: Vec<f64>,
    sigma: Vec<f64>,
    bounds: Vec<(f64, f64)>,
}

impl GaussianModel {
    pub(crate) fn new(mean: Vec<f64>, sigma: Vec<f64>) -> Self {
        let bounds = vec![(f64::NEG_INFINITY, f64::INFINITY); mean.len()];
        Self { mean, sigma, bounds }
    }

    pub(crate) fn with_bounds(mut self, bounds: Vec<(f64, f64)>) -> Self {
        self.bounds = bounds;
        self
    }

    fn check(&self, params: &[f64]) -> Result<()> {
        if params.len() != self.mean.len() {
            return Err(Error::Validation(format!(
                "expected {} parameters, got {}",
                self.mean.len(),
                params.len()
            )));
        }
        Ok(())
    }
}

impl LogDensityModel for GaussianModel {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn parameter_names(&self) -> Vec<String> {
        (0..self.mean.len()).map(|i| format!("x{}", i)).collect()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        self.bounds.clone()
    }

    fn parameter_init(&self) -> Vec<f64> {
        self.bounds
            .iter()
            .zip(&self.mean)
            .map(|(&(lo, hi), &m)| if lo.is_finite() && hi.is_finite() { 0.5 * (lo + hi) } else { m })
            .collect()
    }

    fn nll(&self, params: &[f64]) -> Result<f64> {
        self.check(params)?;
        Ok(params
            .iter()
            .zip(&self.mean)
            .zip(&self.sigma)
            .map(|((&x, &m), &s)| 0.5 * ((x - m) / s).powi(2))
            .sum())
    }

    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
        self.check(params)?;
        Ok(params.iter().zip(&self.mean).zip(&self.sigma).map(|((&x, &m), &s)| (x - m) / (s * s)).collect())
    }
}

/// Model whose density is zero everywhere (`nll = +inf`).
#[derive(Debug, Clone)]
pub(crate) struct ZeroDensityModel {
    pub(crate) dim: usize,
}

impl LogDensityModel for ZeroDensityModel {
    fn dim(&self) -> usize {
        self.dim
    }

    fn parameter_names(&self) -> Vec<String> {
        (0..self.dim).map(|i| format!("x{}", i)).collect()
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        vec![(f64::NEG_INFINITY, f64::INFINITY); self.dim]
    }

    fn parameter_init(&self) -> Vec<f64> {
        vec![0.0; self.dim]
    }

    fn nll(&self, _params: &[f64]) -> Result<f64> {
        Ok(f64::INFINITY)
    }

    fn grad_nll(&self, _params: &[f64]) -> Result<Vec<f64>> {
        Ok(vec![0.0; self.dim])
    }
}
