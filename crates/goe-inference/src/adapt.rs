//! Warmup adaptation for NUTS: step size (dual averaging) and mass matrix
//! (Welford variance / covariance) on the Stan windowed schedule.

use crate::hmc::{LeapfrogIntegrator, Metric};
use crate::posterior::Posterior;
use goe_core::traits::LogDensityModel;
use nalgebra::{DMatrix, DVector};
use rand::Rng;

/// Largest dimension for which a dense metric is estimated.
pub const MAX_DENSE_DIM: usize = 32;

/// Variance the mass estimate is shrunk towards.
const METRIC_REGULARIZER: f64 = 1e-3;
/// Pseudo-count of the shrinkage.
const METRIC_PRIOR_COUNT: f64 = 5.0;

/// Dual averaging for step size adaptation (Hoffman & Gelman 2014, Stan constants).
///
/// Adapts `epsilon` to achieve a target average acceptance statistic.
#[derive(Debug, Clone)]
pub struct DualAveraging {
    target_accept: f64,
    log_eps: f64,
    log_eps_bar: f64,
    h_bar: f64,
    mu: f64,
    gamma: f64,
    t0: f64,
    kappa: f64,
    step: usize,
}

impl DualAveraging {
    /// Create with target acceptance rate and initial step size.
    pub fn new(target_accept: f64, init_eps: f64) -> Self {
        let mut da = Self {
            target_accept,
            log_eps: 0.0,
            log_eps_bar: 0.0,
            h_bar: 0.0,
            mu: 0.0,
            gamma: 0.05,
            t0: 10.0,
            kappa: 0.75,
            step: 0,
        };
        da.reset(init_eps);
        da
    }

    /// Update with the acceptance statistic of one transition.
    pub fn update(&mut self, accept_prob: f64) {
        // A NaN statistic counts as a full rejection.
        let accept_prob = if accept_prob.is_finite() { accept_prob.clamp(0.0, 1.0) } else { 0.0 };
        self.step += 1;
        let m = self.step as f64;
        let w = 1.0 / (m + self.t0);
        self.h_bar = (1.0 - w) * self.h_bar + w * (self.target_accept - accept_prob);

        self.log_eps = self.mu - (m.sqrt() / self.gamma) * self.h_bar;
        let m_kappa = m.powf(-self.kappa);
        self.log_eps_bar = m_kappa * self.log_eps + (1.0 - m_kappa) * self.log_eps_bar;
    }

    /// Current step size (during warmup).
    pub fn current_step_size(&self) -> f64 {
        self.log_eps.exp()
    }

    /// Smoothed step size, used once warmup is over.
    pub fn adapted_step_size(&self) -> f64 {
        self.log_eps_bar.exp()
    }

    /// Restart from `init_eps` with `mu = ln(10 init_eps)`.
    ///
    /// The smoothed iterate starts at `init_eps` rather than 1.0 so that very
    /// short windows still end near a sensible step size.
    pub fn reset(&mut self, init_eps: f64) {
        self.log_eps = init_eps.ln();
        self.log_eps_bar = init_eps.ln();
        self.h_bar = 0.0;
        self.mu = (10.0 * init_eps).ln();
        self.step = 0;
    }
}

/// Online Welford variance estimator (diagonal mass matrix).
#[derive(Debug, Clone)]
pub struct WelfordVariance {
    mean: Vec<f64>,
    m2: Vec<f64>,
    count: usize,
}

impl WelfordVariance {
    /// Create for a `dim`-dimensional parameter vector.
    pub fn new(dim: usize) -> Self {
        Self { mean: vec![0.0; dim], m2: vec![0.0; dim], count: 0 }
    }

    /// Number of samples seen.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Incorporate a new sample.
    pub fn update(&mut self, x: &[f64]) {
        self.count += 1;
        let n = self.count as f64;
        for ((mean, m2), &xi) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(x) {
            let delta = xi - *mean;
            *mean += delta / n;
            *m2 += delta * (xi - *mean);
        }
    }

    /// Sample variance (`n - 1` denominator); `None` with fewer than 2 samples.
    pub fn variance(&self) -> Option<Vec<f64>> {
        if self.count < 2 {
            return None;
        }
        let denom = (self.count - 1) as f64;
        Some(self.m2.iter().map(|&m| m / denom).collect())
    }

    /// Reset the estimator.
    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.m2.fill(0.0);
        self.count = 0;
    }
}

/// Online Welford covariance estimator (dense).
#[derive(Debug, Clone)]
pub struct WelfordCovariance {
    mean: DVector<f64>,
    m2: DMatrix<f64>,
    count: usize,
}

impl WelfordCovariance {
    /// Create for a `dim`-dimensional parameter vector.
    pub fn new(dim: usize) -> Self {
        Self { mean: DVector::zeros(dim), m2: DMatrix::zeros(dim, dim), count: 0 }
    }

    /// Number of samples seen.
    pub fn count(&self) -> usize {
        self.count
    }

    /// Incorporate a new sample.
    pub fn update(&mut self, x: &[f64]) {
        self.count += 1;
        let x = DVector::from_column_slice(x);
        let delta = &x - &self.mean;
        self.mean += &delta / self.count as f64;
        let delta2 = &x - &self.mean;
        self.m2 += &delta * delta2.transpose();
    }

    /// Sample covariance; `None` with fewer than 2 samples.
    pub fn covariance(&self) -> Option<DMatrix<f64>> {
        if self.count < 2 {
            return None;
        }
        Some(&self.m2 / (self.count - 1) as f64)
    }

    /// Reset the estimator.
    pub fn reset(&mut self) {
        self.mean.fill(0.0);
        self.m2.fill(0.0);
        self.count = 0;
    }
}

/// Shrink a variance estimate from `n` draws towards [`METRIC_REGULARIZER`].
#[inline]
fn regularize(var: f64, n: f64) -> f64 {
    var * n / (n + METRIC_PRIOR_COUNT) + METRIC_REGULARIZER * METRIC_PRIOR_COUNT / (n + METRIC_PRIOR_COUNT)
}

/// Kind of warmup window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowKind {
    /// Step size only (initial and terminal buffers).
    Fast,
    /// Step size plus mass-matrix estimation, metric updated at the end.
    Slow,
}

/// One contiguous warmup window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdaptWindow {
    /// First iteration (inclusive).
    pub start: usize,
    /// Last iteration (exclusive).
    pub end: usize,
    /// What is adapted inside the window.
    pub kind: WindowKind,
}

/// Stan-style window schedule.
///
/// ```text
/// n_warmup = 1000:
///   [0, 75)      fast
///   [75, 100)    slow
///   [100, 150)   slow
///   [150, 250)   slow
///   [250, 450)   slow
///   [450, 950)   slow (last slow window absorbs the remainder)
///   [950, 1000)  fast
/// ```
///
/// Below 50 warmup iterations only the step size is adapted. Below 150 the
/// buffers shrink to 15 % / 10 % of warmup.
pub fn compute_windows(n_warmup: usize) -> Vec<AdaptWindow> {
    if n_warmup == 0 {
        return Vec::new();
    }
    if n_warmup < 50 {
        return vec![AdaptWindow { start: 0, end: n_warmup, kind: WindowKind::Fast }];
    }

    let (init_buffer, term_buffer, base_window) = if n_warmup < 75 + 50 + 25 {
        let init = (0.15 * n_warmup as f64) as usize;
        let term = (0.1 * n_warmup as f64) as usize;
        (init, term, n_warmup - init - term)
    } else {
        (75, 50, 25)
    };
    let slow_end = n_warmup - term_buffer;

    let mut windows = vec![AdaptWindow { start: 0, end: init_buffer, kind: WindowKind::Fast }];

    let mut start = init_buffer;
    let mut size = base_window;
    while start < slow_end {
        let mut end = start + size;
        // Stretch the window when the next (doubled) one would not fit.
        if end + 2 * size > slow_end {
            end = slow_end;
        }
        windows.push(AdaptWindow { start, end, kind: WindowKind::Slow });
        start = end;
        size *= 2;
    }

    windows.push(AdaptWindow { start: slow_end, end: n_warmup, kind: WindowKind::Fast });
    windows.retain(|w| w.end > w.start);
    windows
}

/// Windowed adaptation combining step size and mass-matrix tuning.
#[derive(Debug, Clone)]
pub struct WindowedAdaptation {
    dual_avg: DualAveraging,
    welford: WelfordVariance,
    welford_cov: Option<WelfordCovariance>,
    windows: Vec<AdaptWindow>,
    current_window: usize,
    metric: Metric,
}

impl WindowedAdaptation {
    /// Create for a dimension and warmup length. `dense` requests a dense
    /// metric, honoured only for `dim <= MAX_DENSE_DIM`.
    pub fn new(dim: usize, n_warmup: usize, target_accept: f64, init_eps: f64, dense: bool) -> Self {
        let welford_cov = (dense && dim <= MAX_DENSE_DIM).then(|| WelfordCovariance::new(dim));
        Self {
            dual_avg: DualAveraging::new(target_accept, init_eps),
            welford: WelfordVariance::new(dim),
            welford_cov,
            windows: compute_windows(n_warmup),
            current_window: 0,
            metric: Metric::identity(dim),
        }
    }

    /// Feed warmup iteration `iter` (position after the transition and its
    /// acceptance statistic).
    ///
    /// Returns `true` when the metric was replaced at the end of a slow window.
    pub fn update(&mut self, iter: usize, q: &[f64], accept_prob: f64) -> bool {
        self.dual_avg.update(accept_prob);

        let Some(window) = self.windows.get(self.current_window).copied() else {
            return false;
        };

        if window.kind == WindowKind::Slow {
            self.welford.update(q);
            if let Some(wc) = self.welford_cov.as_mut() {
                wc.update(q);
            }
        }

        if iter + 1 < window.end {
            return false;
        }

        let mut metric_updated = false;
        if window.kind == WindowKind::Slow {
            if let Some(metric) = self.estimate_metric() {
                self.metric = metric;
                metric_updated = true;
            }
            self.welford.reset();
            if let Some(wc) = self.welford_cov.as_mut() {
                wc.reset();
            }
        }

        let eps = self.dual_avg.adapted_step_size();
        self.dual_avg.reset(eps);
        self.current_window += 1;
        metric_updated
    }

    fn estimate_metric(&self) -> Option<Metric> {
        if let Some(wc) = &self.welford_cov {
            if let Some(cov) = wc.covariance() {
                let n = wc.count() as f64;
                let mut reg = cov * (n / (n + METRIC_PRIOR_COUNT));
                for i in 0..reg.nrows() {
                    reg[(i, i)] += METRIC_REGULARIZER * METRIC_PRIOR_COUNT / (n + METRIC_PRIOR_COUNT);
                }
                // Not SPD (e.g. collinear draws): fall through to the diagonal estimate.
                if let Some(metric) = Metric::dense_from_covariance(reg) {
                    return Some(metric);
                }
            }
        }
        let n = self.welford.count() as f64;
        self.welford.variance().map(|var| Metric::Diag(var.iter().map(|&v| regularize(v, n)).collect()))
    }

    /// Restart dual averaging from a fresh step size (after a metric change).
    pub fn restart_step_size(&mut self, eps: f64) {
        self.dual_avg.reset(eps);
    }

    /// Current step size.
    pub fn step_size(&self) -> f64 {
        self.dual_avg.current_step_size()
    }

    /// Final adapted step size (smoothed).
    pub fn adapted_step_size(&self) -> f64 {
        self.dual_avg.adapted_step_size()
    }

    /// Current metric (inverse mass matrix).
    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    /// The window schedule.
    pub fn windows(&self) -> &[AdaptWindow] {
        &self.windows
    }
}

/// Find a reasonable initial step size (Hoffman & Gelman 2014, Algorithm 4).
///
/// Starting from `init_eps`, doubles or halves the step until the one-step
/// acceptance probability crosses 0.5, using a momentum drawn from `metric`.
pub fn find_reasonable_step_size<M: LogDensityModel + ?Sized, R: Rng>(
    posterior: &Posterior<'_, M>,
    q: &[f64],
    metric: &Metric,
    init_eps: f64,
    rng: &mut R,
) -> f64 {
    let integrator = LeapfrogIntegrator::new(posterior, 1.0, metric.clone());
    let Ok(mut state) = integrator.init_state(q.to_vec()) else {
        return init_eps;
    };
    state.p = metric.sample_momentum(rng);
    let h0 = state.hamiltonian(metric);
    if !h0.is_finite() {
        return init_eps;
    }

    let log_accept = |eps: f64| -> f64 {
        let mut s = state.clone();
        match integrator.step_with_eps(&mut s, eps) {
            Ok(()) => {
                let h1 = s.hamiltonian(metric);
                if h1.is_finite() { h0 - h1 } else { f64::NEG_INFINITY }
            }
            Err(_) => f64::NEG_INFINITY,
        }
    };

    let mut eps = init_eps;
    let ln_half = 0.5f64.ln();
    let direction = if log_accept(eps) > ln_half { 1.0 } else { -1.0 };

    for _ in 0..100 {
        let next = eps * 2.0f64.powf(direction);
        if !(1e-10..=1e3).contains(&next) {
            break;
        }
        let la = log_accept(next);
        // Stop once the acceptance crosses 0.5 in the search direction.
        if direction > 0.0 && la <= ln_half {
            break;
        }
        eps = next;
        if direction < 0.0 && la > ln_half {
            break;
        }
    }

    eps.clamp(1e-10, 1e3)
}
