//! Core traits for the GoE toolkit
//!
//! Samplers in `goe-inference` are written against [`LogDensityModel`] and do
//! not depend on any concrete physics model.

use crate::Result;
use crate::types::ParameterScale;

/// Model interface for gradient-based inference.
///
/// Parameters live in *constrained* (physical) space. Samplers map them to an
/// unconstrained space using the bounds and scales reported here.
pub trait LogDensityModel: Send + Sync {
    /// Number of parameters.
    fn dim(&self) -> usize;

    /// Parameter names (stable order).
    fn parameter_names(&self) -> Vec<String>;

    /// Parameter bounds (min, max) (stable order).
    fn parameter_bounds(&self) -> Vec<(f64, f64)>;

    /// How each interval-bounded parameter is traversed.
    ///
    /// Parameters spanning several orders of magnitude should report
    /// [`ParameterScale::Log`]. Default: all linear.
    fn parameter_scales(&self) -> Vec<ParameterScale> {
        vec![ParameterScale::Linear; self.dim()]
    }

    /// Suggested initial values (stable order).
    fn parameter_init(&self) -> Vec<f64>;

    /// Negative log-density (up to a constant).
    ///
    /// Points outside the support return `+inf`, never `NaN`.
    fn nll(&self, params: &[f64]) -> Result<f64>;

    /// Gradient of NLL.
    fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quadratic;

    impl LogDensityModel for Quadratic {
        fn dim(&self) -> usize {
            2
        }

        fn parameter_names(&self) -> Vec<String> {
            vec!["x".to_string(), "y".to_string()]
        }

        fn parameter_bounds(&self) -> Vec<(f64, f64)> {
            vec![(f64::NEG_INFINITY, f64::INFINITY); 2]
        }

        fn parameter_init(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn nll(&self, params: &[f64]) -> Result<f64> {
            Ok(0.5 * params.iter().map(|x| x * x).sum::<f64>())
        }

        fn grad_nll(&self, params: &[f64]) -> Result<Vec<f64>> {
            Ok(params.to_vec())
        }
    }

    #[test]
    fn test_default_scales_are_linear() {
        let m = Quadratic;
        assert_eq!(m.parameter_scales(), vec![ParameterScale::Linear; 2]);
        assert_eq!(m.nll(&[1.0, 1.0]).unwrap(), 1.0);
    }
}
