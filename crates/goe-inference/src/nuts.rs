//! No-U-Turn Sampler (NUTS).
//!
//! Multinomial NUTS: trajectories grow by repeated doubling in a random
//! direction, and the next state is drawn from the whole trajectory with
//! weights `exp(-(H - H0))`. Subtrees are merged with uniform progressive
//! sampling; the top level uses biased progressive sampling, which favours
//! states far from the starting point.

use crate::adapt::{WindowedAdaptation, find_reasonable_step_size};
use crate::chain::Chain;
use crate::hmc::{HmcState, LeapfrogIntegrator, Metric};
use crate::posterior::Posterior;
use goe_core::traits::LogDensityModel;
use goe_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

/// Energy error beyond which a trajectory is declared divergent.
pub const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// Attempts at finding an initial point with finite log density.
const MAX_INIT_ATTEMPTS: usize = 100;

/// How the initial unconstrained position is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InitStrategy {
    /// The model's `parameter_init`, mapped to unconstrained space.
    ModelInit,
    /// `parameter_init` plus `N(0, scale^2)` jitter in unconstrained space.
    Jitter {
        /// Jitter standard deviation.
        scale: f64,
    },
    /// `z ~ N(0, scale^2)` in unconstrained space.
    Random {
        /// Standard deviation of the draw.
        scale: f64,
    },
}

impl Default for InitStrategy {
    fn default() -> Self {
        Self::Random { scale: 1.0 }
    }
}

/// Which metric warmup estimates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Diagonal inverse mass.
    #[default]
    Diag,
    /// Dense inverse mass (falls back to diagonal above 32 parameters).
    Dense,
}

/// NUTS sampler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NutsConfig {
    /// Deepest subtree built in one transition (0-based, so at most
    /// `2^(max_treedepth + 1) - 1` leapfrog steps).
    pub max_treedepth: usize,
    /// Target mean acceptance statistic for dual averaging.
    pub target_accept: f64,
    /// Starting point of the initial step-size search.
    pub init_step: f64,
    /// Initial position.
    pub init: InitStrategy,
    /// Metric estimated during warmup.
    pub metric: MetricKind,
}

impl Default for NutsConfig {
    fn default() -> Self {
        Self {
            max_treedepth: 10,
            target_accept: 0.8,
            init_step: 0.1,
            init: InitStrategy::default(),
            metric: MetricKind::Diag,
        }
    }
}

impl NutsConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_treedepth == 0 {
            return Err(Error::Validation("max_treedepth must be >= 1".to_string()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::Validation(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        if !(self.init_step.is_finite() && self.init_step > 0.0) {
            return Err(Error::Validation(format!("init_step must be > 0, got {}", self.init_step)));
        }
        match self.init {
            InitStrategy::Jitter { scale } | InitStrategy::Random { scale }
                if !(scale.is_finite() && scale >= 0.0) =>
            {
                Err(Error::Validation(format!("init scale must be finite and >= 0, got {}", scale)))
            }
            _ => Ok(()),
        }
    }
}

/// Result of one NUTS transition.
#[derive(Debug, Clone)]
pub(crate) struct NutsTransition {
    pub state: HmcState,
    pub depth: usize,
    pub divergent: bool,
    pub accept_prob: f64,
    pub energy: f64,
    pub n_leapfrog: usize,
}

/// A (sub)trajectory: its two edges, the selected state and the bookkeeping
/// needed to merge it into a larger tree.
struct Subtree {
    left: HmcState,
    right: HmcState,
    proposal: HmcState,
    log_sum_weight: f64,
    n_leapfrog: usize,
    sum_accept_prob: f64,
    divergent: bool,
    turning: bool,
}

impl Subtree {
    fn invalid(&self) -> bool {
        self.divergent || self.turning
    }

    fn edge(&self, direction: i32) -> &HmcState {
        if direction > 0 { &self.right } else { &self.left }
    }
}

fn log_sum_exp(a: f64, b: f64) -> f64 {
    let max = a.max(b);
    if max == f64::NEG_INFINITY { f64::NEG_INFINITY } else { max + ((a - max).exp() + (b - max).exp()).ln() }
}

/// No-U-turn check: the trajectory `left -> right` turns back on itself when
/// either edge velocity points against the displacement.
fn is_turning(left: &HmcState, right: &HmcState, metric: &Metric) -> bool {
    let dq: Vec<f64> = right.q.iter().zip(&left.q).map(|(&r, &l)| r - l).collect();
    let v_left = metric.mul_inv_mass(&left.p);
    let v_right = metric.mul_inv_mass(&right.p);
    let dot = |v: &[f64]| dq.iter().zip(v).map(|(&d, &vi)| d * vi).sum::<f64>();
    dot(&v_left) < 0.0 || dot(&v_right) < 0.0
}

/// One leapfrog step from `from`.
fn build_leaf<M: LogDensityModel + ?Sized>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    from: &HmcState,
    direction: i32,
    h0: f64,
) -> Result<Subtree> {
    let mut state = from.clone();
    // A gradient failure mid-trajectory ends the tree like any other divergence.
    let stepped = match integrator.step_dir(&mut state, direction) {
        Ok(()) => true,
        Err(e) => {
            tracing::trace!(error = %e, "leapfrog step failed");
            false
        }
    };

    let h = state.hamiltonian(integrator.metric());
    let finite = stepped && h.is_finite() && state.grad_potential.iter().all(|g| g.is_finite());
    let energy_error = h - h0;
    let divergent = !finite || energy_error > DIVERGENCE_THRESHOLD;
    let (log_weight, accept) = if finite { (-energy_error, (-energy_error).exp().min(1.0)) } else { (f64::NEG_INFINITY, 0.0) };

    Ok(Subtree {
        left: state.clone(),
        right: state.clone(),
        proposal: state,
        log_sum_weight: log_weight,
        n_leapfrog: 1,
        sum_accept_prob: accept,
        divergent,
        turning: false,
    })
}

/// Recursively build a subtree of `2^depth` leapfrog steps starting after `from`.
fn build_tree<M: LogDensityModel + ?Sized, R: Rng>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    from: &HmcState,
    depth: usize,
    direction: i32,
    h0: f64,
    rng: &mut R,
) -> Result<Subtree> {
    if depth == 0 {
        return build_leaf(integrator, from, direction, h0);
    }

    let mut inner = build_tree(integrator, from, depth - 1, direction, h0, rng)?;
    if inner.invalid() {
        return Ok(inner);
    }

    let outer = build_tree(integrator, inner.edge(direction), depth - 1, direction, h0, rng)?;
    inner.n_leapfrog += outer.n_leapfrog;
    inner.sum_accept_prob += outer.sum_accept_prob;
    if outer.invalid() {
        inner.divergent |= outer.divergent;
        inner.turning |= outer.turning;
        return Ok(inner);
    }

    // Uniform progressive sampling inside subtrees.
    let log_sum_weight = log_sum_exp(inner.log_sum_weight, outer.log_sum_weight);
    let accept_outer = (outer.log_sum_weight - log_sum_weight).exp();
    if rng.random::<f64>() < accept_outer {
        inner.proposal = outer.proposal;
    }
    inner.log_sum_weight = log_sum_weight;

    if direction > 0 {
        inner.right = outer.right;
    } else {
        inner.left = outer.left;
    }
    inner.turning = is_turning(&inner.left, &inner.right, integrator.metric());
    Ok(inner)
}

/// Run one NUTS transition from `current` (its momentum is ignored).
pub(crate) fn nuts_transition<M: LogDensityModel + ?Sized, R: Rng>(
    integrator: &LeapfrogIntegrator<'_, '_, M>,
    current: &HmcState,
    max_treedepth: usize,
    rng: &mut R,
) -> Result<NutsTransition> {
    let metric = integrator.metric();
    let mut start = current.clone();
    start.p = metric.sample_momentum(rng);
    let h0 = start.hamiltonian(metric);

    let mut tree = Subtree {
        left: start.clone(),
        right: start.clone(),
        proposal: start,
        log_sum_weight: 0.0,
        n_leapfrog: 0,
        sum_accept_prob: 0.0,
        divergent: false,
        turning: false,
    };

    // Depth is 0-based: the subtree built at depth `d` holds `2^d` steps, so a
    // trajectory that reaches the cap holds `2^(max_treedepth + 1) - 1` steps.
    let mut depth = 0;
    let mut depth_reached = 0;
    while depth <= max_treedepth {
        depth_reached = depth;
        let direction: i32 = if rng.random::<bool>() { 1 } else { -1 };
        let subtree = build_tree(integrator, tree.edge(direction), depth, direction, h0, rng)?;
        depth += 1;

        tree.n_leapfrog += subtree.n_leapfrog;
        tree.sum_accept_prob += subtree.sum_accept_prob;
        if subtree.invalid() {
            tree.divergent = subtree.divergent;
            break;
        }

        // Biased progressive sampling at the top level.
        let accept_subtree = (subtree.log_sum_weight - tree.log_sum_weight).exp().min(1.0);
        if rng.random::<f64>() < accept_subtree {
            tree.proposal = subtree.proposal;
        }
        tree.log_sum_weight = log_sum_exp(tree.log_sum_weight, subtree.log_sum_weight);

        if direction > 0 {
            tree.right = subtree.right;
        } else {
            tree.left = subtree.left;
        }
        if is_turning(&tree.left, &tree.right, metric) {
            break;
        }
    }

    let accept_prob = tree.sum_accept_prob / tree.n_leapfrog.max(1) as f64;
    let mut state = tree.proposal;
    state.p.fill(0.0);

    Ok(NutsTransition {
        state,
        depth: depth_reached,
        divergent: tree.divergent,
        accept_prob,
        energy: h0,
        n_leapfrog: tree.n_leapfrog,
    })
}

/// Draw a starting position with finite log density and gradient.
fn initial_position<M: LogDensityModel + ?Sized>(
    posterior: &Posterior<'_, M>,
    init: InitStrategy,
    rng: &mut StdRng,
) -> Result<Vec<f64>> {
    let base = posterior.to_unconstrained(&posterior.model().parameter_init());
    let attempts = if init == InitStrategy::ModelInit { 1 } else { MAX_INIT_ATTEMPTS };

    for _ in 0..attempts {
        let z: Vec<f64> = match init {
            InitStrategy::ModelInit => base.clone(),
            InitStrategy::Jitter { scale } => {
                base.iter().map(|&b| b + scale * rng.sample::<f64, _>(StandardNormal)).collect()
            }
            InitStrategy::Random { scale } => {
                (0..base.len()).map(|_| scale * rng.sample::<f64, _>(StandardNormal)).collect()
            }
        };
        let lp = posterior.logpdf_unconstrained(&z)?;
        if !lp.is_finite() {
            continue;
        }
        if posterior.grad_unconstrained(&z)?.iter().all(|g| g.is_finite()) {
            return Ok(z);
        }
    }

    Err(Error::Computation(format!(
        "no initial point with finite log density after {} attempt(s) ({:?})",
        attempts, init
    )))
}

/// Run NUTS on any [`LogDensityModel`].
///
/// Warmup adapts the step size and metric; the sampling phase runs with both
/// frozen. Returns draws in unconstrained and constrained space together with
/// per-draw diagnostics. The same `seed` and `config` reproduce the chain
/// exactly.
pub fn sample_nuts<M: LogDensityModel + ?Sized>(
    model: &M,
    n_warmup: usize,
    n_samples: usize,
    seed: u64,
    config: NutsConfig,
) -> Result<Chain> {
    config.validate()?;

    let posterior = Posterior::new(model);
    let dim = posterior.dim();
    let mut rng = StdRng::seed_from_u64(seed);

    let z_init = initial_position(&posterior, config.init, &mut rng)?;
    let init_eps =
        find_reasonable_step_size(&posterior, &z_init, &Metric::identity(dim), config.init_step, &mut rng);

    let mut adaptation = WindowedAdaptation::new(
        dim,
        n_warmup,
        config.target_accept,
        init_eps,
        config.metric == MetricKind::Dense,
    );
    let mut state = LeapfrogIntegrator::new(&posterior, init_eps, Metric::identity(dim)).init_state(z_init)?;

    let mut warmup_divergences = 0usize;
    for i in 0..n_warmup {
        let integrator = LeapfrogIntegrator::new(&posterior, adaptation.step_size(), adaptation.metric().clone());
        let transition = nuts_transition(&integrator, &state, config.max_treedepth, &mut rng)?;
        warmup_divergences += usize::from(transition.divergent);
        state = transition.state;

        if adaptation.update(i, &state.q, transition.accept_prob) {
            let eps = find_reasonable_step_size(
                &posterior,
                &state.q,
                adaptation.metric(),
                adaptation.step_size(),
                &mut rng,
            );
            adaptation.restart_step_size(eps);
        }
    }

    let step_size = if n_warmup > 0 { adaptation.adapted_step_size() } else { init_eps };
    let metric = adaptation.metric().clone();
    tracing::debug!(
        seed,
        step_size,
        warmup_divergences,
        mass_diag = ?metric.mass_diag(),
        "warmup finished"
    );
    let integrator = LeapfrogIntegrator::new(&posterior, step_size, metric.clone());

    let mut chain = Chain::with_capacity(n_samples, config.max_treedepth, step_size, metric.mass_diag());
    for _ in 0..n_samples {
        let transition = nuts_transition(&integrator, &state, config.max_treedepth, &mut rng)?;
        state = transition.state;

        chain.draws_constrained.push(posterior.to_constrained(&state.q));
        chain.draws_unconstrained.push(state.q.clone());
        chain.log_densities.push(-state.potential);
        chain.divergences.push(transition.divergent);
        chain.tree_depths.push(transition.depth);
        chain.n_leapfrogs.push(transition.n_leapfrog);
        chain.accept_probs.push(transition.accept_prob);
        chain.energies.push(transition.energy);
    }
    chain.warmup_divergences = warmup_divergences;

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goe::{GoeData, GoeModel};
    use crate::testing::{GaussianModel, ZeroDensityModel};

    #[test]
    fn test_nuts_transition_runs_and_is_deterministic() {
        let model = GaussianModel::new(vec![0.0; 3], vec![1.0, 2.0, 0.5]);
        let posterior = Posterior::new(&model);
        let integrator = LeapfrogIntegrator::new(&posterior, 0.3, Metric::identity(3));
        let state = integrator.init_state(vec![0.5, -1.0, 0.2]).unwrap();

        let mut rng1 = StdRng::seed_from_u64(42);
        let t1 = nuts_transition(&integrator, &state, 10, &mut rng1).unwrap();
        let mut rng2 = StdRng::seed_from_u64(42);
        let t2 = nuts_transition(&integrator, &state, 10, &mut rng2).unwrap();

        assert!(t1.depth <= 10);
        assert!(t1.n_leapfrog >= 1 && t1.n_leapfrog < (1 << 11));
        assert!((0.0..=1.0).contains(&t1.accept_prob));
        assert!(!t1.divergent);
        assert_eq!(t1.state.q, t2.state.q);
        assert_eq!(t1.depth, t2.depth);
    }

    #[test]
    fn test_huge_step_is_divergent() {
        let model = GaussianModel::new(vec![0.0; 2], vec![0.01, 0.01]);
        let posterior = Posterior::new(&model);
        let integrator = LeapfrogIntegrator::new(&posterior, 50.0, Metric::identity(2));
        let state = integrator.init_state(vec![0.01, -0.01]).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        let t = nuts_transition(&integrator, &state, 10, &mut rng).unwrap();
        assert!(t.divergent);
        // The divergent step itself is never selected.
        assert_eq!(t.state.q, state.q);
        assert!(t.accept_prob < 1e-6);
    }

    #[test]
    fn test_treedepth_is_capped() {
        let model = GaussianModel::new(vec![0.0], vec![1.0]);
        let posterior = Posterior::new(&model);
        // Tiny steps never turn, so every subtree up to depth 3 is built.
        let integrator = LeapfrogIntegrator::new(&posterior, 1e-4, Metric::identity(1));
        let state = integrator.init_state(vec![0.0]).unwrap();
        let mut rng = StdRng::seed_from_u64(5);
        let t = nuts_transition(&integrator, &state, 3, &mut rng).unwrap();
        assert_eq!(t.depth, 3);
        assert_eq!(t.n_leapfrog, 15);
    }

    #[test]
    fn test_sample_nuts_recovers_gaussian_moments() {
        let model = GaussianModel::new(vec![1.0, -2.0], vec![0.5, 3.0]);
        let chain = sample_nuts(&model, 500, 2000, 17, NutsConfig::default()).unwrap();
        assert_eq!(chain.draws_constrained.len(), 2000);

        for (i, (&mu, &sd)) in [1.0, -2.0].iter().zip(&[0.5, 3.0]).enumerate() {
            let xs: Vec<f64> = chain.draws_constrained.iter().map(|d| d[i]).collect();
            let mean = xs.iter().sum::<f64>() / xs.len() as f64;
            let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;
            assert!((mean - mu).abs() < 0.15 * sd, "x{} mean={} expected {}", i, mean, mu);
            assert!((var.sqrt() / sd - 1.0).abs() < 0.15, "x{} sd={} expected {}", i, var.sqrt(), sd);
        }
        // The metric learned the scales.
        assert!(chain.mass_diag[0] > chain.mass_diag[1]);
        let div = chain.divergences.iter().filter(|&&d| d).count();
        assert_eq!(div, 0);
    }

    #[test]
    fn test_sample_nuts_bounded_parameter_stays_in_support() {
        let model = GaussianModel::new(vec![0.9], vec![0.3]).with_bounds(vec![(0.0, 1.0)]);
        let chain = sample_nuts(&model, 200, 300, 3, NutsConfig::default()).unwrap();
        assert!(chain.draws_constrained.iter().all(|d| d[0] >= 0.0 && d[0] <= 1.0));
        let mean = chain.draws_constrained.iter().map(|d| d[0]).sum::<f64>() / 300.0;
        assert!(mean > 0.5 && mean < 0.9, "mean={}", mean);
    }

    #[test]
    fn test_sample_nuts_deterministic() {
        let model = GoeModel::new(GoeData::synthetic(2025)).unwrap();
        let config = NutsConfig { max_treedepth: 8, ..NutsConfig::default() };
        let c1 = sample_nuts(&model, 60, 20, 123, config.clone()).unwrap();
        let c2 = sample_nuts(&model, 60, 20, 123, config).unwrap();
        assert_eq!(c1.draws_unconstrained, c2.draws_unconstrained);
        assert_eq!(c1.energies, c2.energies);
        assert_eq!(c1.step_size, c2.step_size);
        let c3 = sample_nuts(&model, 60, 20, 124, NutsConfig { max_treedepth: 8, ..NutsConfig::default() }).unwrap();
        assert_ne!(c1.draws_unconstrained, c3.draws_unconstrained);
    }

    #[test]
    fn test_sample_nuts_goe_draws_in_support() {
        let model = GoeModel::new(GoeData::synthetic(2025)).unwrap();
        let config = NutsConfig { target_accept: 0.9, init_step: 0.05, ..NutsConfig::default() };
        let chain = sample_nuts(&model, 150, 100, 7, config).unwrap();
        for d in &chain.draws_constrained {
            assert!(GoeModel::in_support(d), "draw outside support: {:?}", d);
        }
        assert!(chain.log_densities.iter().all(|lp| lp.is_finite()));
        assert!(chain.step_size > 0.0 && chain.step_size.is_finite());
        assert_eq!(chain.mass_diag.len(), 5);
    }

    #[test]
    fn test_dense_metric_option() {
        let model = GaussianModel::new(vec![0.0, 0.0], vec![1.0, 4.0]);
        let config = NutsConfig { metric: MetricKind::Dense, ..NutsConfig::default() };
        let chain = sample_nuts(&model, 300, 200, 8, config).unwrap();
        assert!(chain.mass_diag[0] > chain.mass_diag[1]);
    }

    #[test]
    fn test_init_strategies() {
        let model = GoeModel::new(GoeData::synthetic(1)).unwrap();
        let posterior = Posterior::new(&model);
        let mut rng = StdRng::seed_from_u64(0);

        let z = initial_position(&posterior, InitStrategy::ModelInit, &mut rng).unwrap();
        assert!(z.iter().all(|v| v.abs() < 1e-9), "midpoints map to z = 0: {:?}", z);

        let z = initial_position(&posterior, InitStrategy::Jitter { scale: 0.0 }, &mut rng).unwrap();
        assert!(z.iter().all(|v| v.abs() < 1e-9));

        let z = initial_position(&posterior, InitStrategy::Random { scale: 2.0 }, &mut rng).unwrap();
        assert_eq!(z.len(), 5);
        assert!(z.iter().any(|v| v.abs() > 1e-3));
    }

    #[test]
    fn test_init_fails_when_density_is_zero_everywhere() {
        let model = ZeroDensityModel { dim: 2 };
        let posterior = Posterior::new(&model);
        let mut rng = StdRng::seed_from_u64(0);

        let err = initial_position(&posterior, InitStrategy::default(), &mut rng).unwrap_err();
        assert!(matches!(err, Error::Computation(_)), "{}", err);
        assert!(err.to_string().contains("100 attempt"), "{}", err);

        let err = initial_position(&posterior, InitStrategy::ModelInit, &mut rng).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));

        let err = sample_nuts(&model, 10, 10, 1, NutsConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_config_validation() {
        let mut c = NutsConfig::default();
        assert!(c.validate().is_ok());
        c.target_accept = 1.0;
        assert!(c.validate().is_err());
        let c = NutsConfig { max_treedepth: 0, ..NutsConfig::default() };
        assert!(c.validate().is_err());
        let c = NutsConfig { init_step: 0.0, ..NutsConfig::default() };
        assert!(c.validate().is_err());
        let c = NutsConfig { init: InitStrategy::Random { scale: f64::NAN }, ..NutsConfig::default() };
        assert!(c.validate().is_err());
        let model = GaussianModel::new(vec![0.0], vec![1.0]);
        assert!(sample_nuts(&model, 10, 10, 0, NutsConfig { target_accept: 0.0, ..NutsConfig::default() }).is_err());
    }
}
