//! Posterior distribution for Bayesian inference.
//!
//! Wraps any [`LogDensityModel`] and provides the log-posterior density and
//! its gradient in both constrained and unconstrained parameterizations.
//!
//! The model's NLL already carries the physical prior. The [`Posterior`]
//! adds only user-specified extra priors (if any).

use goe_core::traits::LogDensityModel;
use goe_core::{Error, Result};
use goe_prob::normal;
use goe_prob::transforms::ParameterTransform;
use serde::{Deserialize, Serialize};

/// Prior distribution for a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Prior {
    /// Flat (improper) prior, contributes 0 to the log-posterior.
    Flat,
    /// Normal prior: `log p(theta) = -0.5 * ((theta - center) / width)^2 + const`.
    Normal {
        /// Center of the Gaussian prior.
        center: f64,
        /// Width (standard deviation) of the Gaussian prior.
        width: f64,
    },
}

/// Posterior over a model with transforms and priors.
///
/// - `logpdf(theta) = -model.nll(theta) + sum(prior_logpdf)`
/// - `logpdf_unconstrained(z) = logpdf(transform(z)) + log|J(z)|`
pub struct Posterior<'a, M: LogDensityModel + ?Sized> {
    model: &'a M,
    transform: ParameterTransform,
    priors: Vec<Prior>,
}

impl<'a, M: LogDensityModel + ?Sized> Posterior<'a, M> {
    /// Create a posterior with flat extra priors; the transform follows the
    /// model's bounds and scales.
    pub fn new(model: &'a M) -> Self {
        let transform =
            ParameterTransform::from_bounds_and_scales(&model.parameter_bounds(), &model.parameter_scales());
        let priors = vec![Prior::Flat; model.dim()];
        Self { model, transform, priors }
    }

    /// Set priors (one per parameter).
    pub fn with_priors(mut self, priors: Vec<Prior>) -> Result<Self> {
        if priors.len() != self.model.dim() {
            return Err(Error::Validation(format!(
                "expected {} priors, got {}",
                self.model.dim(),
                priors.len()
            )));
        }
        for p in &priors {
            if let Prior::Normal { width, .. } = p {
                if !(width.is_finite() && *width > 0.0) {
                    return Err(Error::Validation(format!("prior width must be > 0, got {}", width)));
                }
            }
        }
        self.priors = priors;
        Ok(self)
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        self.model.dim()
    }

    /// Reference to the underlying model.
    pub fn model(&self) -> &M {
        self.model
    }

    /// Reference to the parameter transform.
    pub fn transform(&self) -> &ParameterTransform {
        &self.transform
    }

    /// Log-posterior in constrained space: `-model.nll(theta) + sum(prior_logpdf)`.
    pub fn logpdf(&self, theta: &[f64]) -> Result<f64> {
        let mut lp = -self.model.nll(theta)?;
        for (prior, &t) in self.priors.iter().zip(theta) {
            if let Prior::Normal { center, width } = prior {
                lp += normal::log_kernel(t, *center, *width)?;
            }
        }
        Ok(lp)
    }

    /// Gradient of the log-posterior in constrained space.
    pub fn grad(&self, theta: &[f64]) -> Result<Vec<f64>> {
        let mut g = self.model.grad_nll(theta)?;
        for ((gi, prior), &t) in g.iter_mut().zip(&self.priors).zip(theta) {
            *gi = -*gi;
            if let Prior::Normal { center, width } = prior {
                *gi += normal::grad_log_kernel(t, *center, *width)?;
            }
        }
        Ok(g)
    }

    /// Log-posterior in unconstrained space: `logpdf(transform(z)) + log|J(z)|`.
    ///
    /// Non-finite results collapse to `-inf` so the sampler can treat them as
    /// rejected points instead of aborting.
    pub fn logpdf_unconstrained(&self, z: &[f64]) -> Result<f64> {
        let theta = self.transform.forward(z);
        let lp = self.logpdf(&theta)?;
        let log_jac = self.transform.log_abs_det_jacobian(z);
        let total = lp + log_jac;
        if lp.is_finite() && log_jac.is_finite() && total.is_finite() {
            Ok(total)
        } else {
            Ok(f64::NEG_INFINITY)
        }
    }

    /// Gradient of the log-posterior in unconstrained space.
    ///
    /// Chain rule (diagonal Jacobian):
    /// `grad_z[i] = (dtheta_i/dz_i) * grad_theta[i] + d/dz_i log|J_i|`
    pub fn grad_unconstrained(&self, z: &[f64]) -> Result<Vec<f64>> {
        let theta = self.transform.forward(z);
        let grad_theta = self.grad(&theta)?;
        let jac_diag = self.transform.jacobian_diag(z);
        let grad_log_jac = self.transform.grad_log_abs_det_jacobian(z);

        Ok(grad_theta
            .iter()
            .zip(&jac_diag)
            .zip(&grad_log_jac)
            .map(|((&gt, &jd), &glj)| gt * jd + glj)
            .collect())
    }

    /// Map constrained -> unconstrained.
    pub fn to_unconstrained(&self, theta: &[f64]) -> Vec<f64> {
        self.transform.inverse(theta)
    }

    /// Map unconstrained -> constrained.
    pub fn to_constrained(&self, z: &[f64]) -> Vec<f64> {
        self.transform.forward(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goe::{GoeData, GoeModel};
    use goe_prob::math::central_difference_grad;

    fn model() -> GoeModel {
        GoeModel::new(GoeData::synthetic(11)).unwrap()
    }

    #[test]
    fn test_flat_prior_equals_neg_nll() {
        let m = model();
        let posterior = Posterior::new(&m);
        let theta = m.parameter_init();
        let lp = posterior.logpdf(&theta).unwrap();
        let nll = m.nll(&theta).unwrap();
        assert!((lp + nll).abs() < 1e-12, "lp={} nll={}", lp, nll);
    }

    #[test]
    fn test_normal_prior_shifts_logpdf_and_grad() {
        let m = model();
        let mut priors = vec![Prior::Flat; 5];
        priors[0] = Prior::Normal { center: 0.5, width: 0.1 };
        let flat = Posterior::new(&m);
        let posterior = Posterior::new(&m).with_priors(priors).unwrap();
        let theta = vec![0.7, 1e-4, 1e-30, 1e5, 0.01];
        let d = flat.logpdf(&theta).unwrap() - posterior.logpdf(&theta).unwrap();
        assert!((d - 2.0).abs() < 1e-9, "d={}", d);
        let dg = flat.grad(&theta).unwrap()[0] - posterior.grad(&theta).unwrap()[0];
        assert!((dg - 20.0).abs() < 1e-9, "dg={}", dg);
    }

    #[test]
    fn test_with_priors_rejects_bad_input() {
        let m = model();
        assert!(Posterior::new(&m).with_priors(vec![Prior::Flat; 3]).is_err());
        let mut priors = vec![Prior::Flat; 5];
        priors[1] = Prior::Normal { center: 0.0, width: 0.0 };
        assert!(Posterior::new(&m).with_priors(priors).is_err());
    }

    #[test]
    fn test_unconstrained_logpdf_includes_log_jac() {
        let m = model();
        let posterior = Posterior::new(&m);
        let theta = vec![0.42, 3e-4, 2e-30, 4e5, 0.03];
        let z = posterior.to_unconstrained(&theta);
        let back = posterior.to_constrained(&z);
        for (a, b) in theta.iter().zip(&back) {
            assert!((a - b).abs() / a.abs() < 1e-10, "{} vs {}", a, b);
        }
        let lp = posterior.logpdf(&theta).unwrap();
        let lpu = posterior.logpdf_unconstrained(&z).unwrap();
        let lj = posterior.transform().log_abs_det_jacobian(&z);
        assert!((lpu - lp - lj).abs() < 1e-8 * lp.abs().max(1.0));
    }

    #[test]
    fn test_unconstrained_grad_vs_finite_diff() {
        let m = model();
        let posterior = Posterior::new(&m);
        for z in [vec![0.1, 0.2, -0.3, 0.25, 0.05], vec![0.8, -1.1, 0.4, -0.6, 1.3], vec![-2.0, 1.5, -0.5, 2.0, -1.0]] {
            let g = posterior.grad_unconstrained(&z).unwrap();
            let g_fd =
                central_difference_grad(|x: &[f64]| posterior.logpdf_unconstrained(x).unwrap(), &z, 1e-6);
            for i in 0..5 {
                let scale = g[i].abs().max(1.0);
                assert!(
                    (g[i] - g_fd[i]).abs() / scale < 1e-4,
                    "z={:?} [{}]: analytic={} fd={}",
                    z,
                    i,
                    g[i],
                    g_fd[i]
                );
            }
        }
    }

    #[test]
    fn test_logpdf_unconstrained_is_finite_far_out() {
        let m = model();
        let posterior = Posterior::new(&m);
        let lp = posterior.logpdf_unconstrained(&[40.0, -40.0, 40.0, -40.0, 40.0]).unwrap();
        assert!(!lp.is_nan(), "lp={}", lp);
    }
}
