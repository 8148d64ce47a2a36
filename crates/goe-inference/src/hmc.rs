//! Hamiltonian dynamics: the Euclidean metric, phase-space state and the
//! leapfrog integrator that NUTS builds its trajectories from.

use crate::posterior::Posterior;
use goe_core::Result;
use goe_core::traits::LogDensityModel;
use nalgebra::{DMatrix, DVector};
use rand::Rng;
use rand_distr::StandardNormal;

/// Euclidean metric for HMC/NUTS.
///
/// We store the *inverse* mass matrix because that is what leapfrog needs for
/// the velocity `dq/dt = M^{-1} p` and the kinetic energy `K = 0.5 p^T M^{-1} p`.
/// After adaptation the inverse mass is the estimated posterior covariance.
///
/// The dense case keeps the lower Cholesky factor `L` with `M^{-1} = L L^T`:
/// `M^{-1} p` is two triangular products and `p ~ N(0, M)` is `L^T p = z`.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    /// Diagonal inverse mass matrix.
    Diag(Vec<f64>),
    /// Lower Cholesky factor of a dense inverse mass matrix.
    DenseCholesky(DMatrix<f64>),
}

impl Metric {
    /// Unit metric.
    pub fn identity(dim: usize) -> Self {
        Self::Diag(vec![1.0; dim])
    }

    /// Dense metric whose inverse mass is `cov`; `None` if `cov` is not SPD.
    pub fn dense_from_covariance(cov: DMatrix<f64>) -> Option<Self> {
        cov.cholesky().map(|ch| Self::DenseCholesky(ch.l()))
    }

    /// Dimension.
    pub fn dim(&self) -> usize {
        match self {
            Metric::Diag(v) => v.len(),
            Metric::DenseCholesky(l) => l.nrows(),
        }
    }

    /// Multiply by inverse mass: `v = M^{-1} p`.
    pub fn mul_inv_mass(&self, p: &[f64]) -> Vec<f64> {
        match self {
            Metric::Diag(inv_mass) => inv_mass.iter().zip(p).map(|(&m, &pi)| m * pi).collect(),
            Metric::DenseCholesky(l) => {
                let p = DVector::from_column_slice(p);
                let t = l.tr_mul(&p);
                (l * t).as_slice().to_vec()
            }
        }
    }

    /// Kinetic energy `0.5 p^T M^{-1} p`.
    pub fn kinetic_energy(&self, p: &[f64]) -> f64 {
        let v = self.mul_inv_mass(p);
        0.5 * p.iter().zip(&v).map(|(&pi, &vi)| pi * vi).sum::<f64>()
    }

    /// Draw `p ~ N(0, M)`.
    pub fn sample_momentum<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        match self {
            Metric::Diag(inv_mass) => inv_mass
                .iter()
                .map(|&inv_m| {
                    let z: f64 = rng.sample(StandardNormal);
                    let sigma = if inv_m > 0.0 { (1.0 / inv_m).sqrt() } else { 1.0 };
                    sigma * z
                })
                .collect(),
            Metric::DenseCholesky(l) => {
                let z = DVector::from_fn(l.nrows(), |_, _| rng.sample::<f64, _>(StandardNormal));
                match l.tr_solve_lower_triangular(&z) {
                    Some(p) => p.as_slice().to_vec(),
                    // Singular factor: fall back to unit mass.
                    None => z.as_slice().to_vec(),
                }
            }
        }
    }

    /// Mass matrix diagonal (for reporting): `diag(M)`.
    pub fn mass_diag(&self) -> Vec<f64> {
        match self {
            Metric::Diag(inv_mass) => {
                inv_mass.iter().map(|&q| if q > 0.0 { 1.0 / q } else { 1.0 }).collect()
            }
            Metric::DenseCholesky(l) => {
                // M = L^{-T} L^{-1}, so M_ii is the squared norm of column i of L^{-1}.
                let n = l.nrows();
                match l.solve_lower_triangular(&DMatrix::identity(n, n)) {
                    Some(l_inv) => (0..n).map(|i| l_inv.column(i).norm_squared().max(1e-12)).collect(),
                    None => vec![1.0; n],
                }
            }
        }
    }

    /// Inverse mass diagonal, i.e. the per-parameter variance the metric encodes.
    pub fn inv_mass_diag(&self) -> Vec<f64> {
        match self {
            Metric::Diag(inv_mass) => inv_mass.clone(),
            Metric::DenseCholesky(l) => (0..l.nrows()).map(|i| l.row(i).norm_squared()).collect(),
        }
    }
}

/// HMC phase-space state: position + momentum + cached potential/gradient.
#[derive(Debug, Clone)]
pub struct HmcState {
    /// Position in unconstrained space.
    pub q: Vec<f64>,
    /// Momentum.
    pub p: Vec<f64>,
    /// Potential energy: `-logpdf_unconstrained(q)`.
    pub potential: f64,
    /// Gradient of potential: `-grad_unconstrained(q)`.
    pub grad_potential: Vec<f64>,
}

impl HmcState {
    /// Kinetic energy: `0.5 * p^T * M^{-1} * p`.
    pub fn kinetic_energy(&self, metric: &Metric) -> f64 {
        metric.kinetic_energy(&self.p)
    }

    /// Total Hamiltonian: `H = U(q) + K(p)`.
    pub fn hamiltonian(&self, metric: &Metric) -> f64 {
        self.potential + self.kinetic_energy(metric)
    }
}

/// Leapfrog integrator over a posterior.
pub struct LeapfrogIntegrator<'a, 'b, M: LogDensityModel + ?Sized> {
    posterior: &'a Posterior<'b, M>,
    step_size: f64,
    metric: Metric,
}

impl<'a, 'b, M: LogDensityModel + ?Sized> LeapfrogIntegrator<'a, 'b, M> {
    /// Create a new leapfrog integrator.
    pub fn new(posterior: &'a Posterior<'b, M>, step_size: f64, metric: Metric) -> Self {
        Self { posterior, step_size, metric }
    }

    /// Current step size.
    pub fn step_size(&self) -> f64 {
        self.step_size
    }

    /// Current metric.
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// Initialize an HMC state (zero momentum) at position `q`.
    pub fn init_state(&self, q: Vec<f64>) -> Result<HmcState> {
        let potential = -self.posterior.logpdf_unconstrained(&q)?;
        let grad_potential: Vec<f64> =
            self.posterior.grad_unconstrained(&q)?.into_iter().map(|g| -g).collect();
        Ok(HmcState { p: vec![0.0; q.len()], q, potential, grad_potential })
    }

    /// Single leapfrog step with the configured step size.
    pub fn step(&self, state: &mut HmcState) -> Result<()> {
        self.step_with_eps(state, self.step_size)
    }

    /// Single leapfrog step with explicit (possibly negative) step size.
    ///
    /// Returns `Err` only if the model gradient fails; a non-finite potential
    /// is left in the state for the caller to flag as divergent.
    pub fn step_with_eps(&self, state: &mut HmcState, eps: f64) -> Result<()> {
        for (p, g) in state.p.iter_mut().zip(&state.grad_potential) {
            *p -= 0.5 * eps * g;
        }

        let v = self.metric.mul_inv_mass(&state.p);
        for (q, vi) in state.q.iter_mut().zip(&v) {
            *q += eps * vi;
        }

        state.potential = -self.posterior.logpdf_unconstrained(&state.q)?;
        let grad_lp = self.posterior.grad_unconstrained(&state.q)?;
        for (gp, g) in state.grad_potential.iter_mut().zip(&grad_lp) {
            *gp = -g;
        }

        for (p, g) in state.p.iter_mut().zip(&state.grad_potential) {
            *p -= 0.5 * eps * g;
        }
        Ok(())
    }

    /// Take one leapfrog step in the given direction (`+1` forward, `-1` backward).
    pub fn step_dir(&self, state: &mut HmcState, direction: i32) -> Result<()> {
        debug_assert!(direction == 1 || direction == -1);
        self.step_with_eps(state, self.step_size * f64::from(direction))
    }

    /// `n_steps` leapfrog steps.
    pub fn integrate(&self, mut state: HmcState, n_steps: usize) -> Result<HmcState> {
        for _ in 0..n_steps {
            self.step(&mut state)?;
        }
        Ok(state)
    }
}
