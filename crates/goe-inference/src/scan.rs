//! Monte Carlo prior scan of the GoE contribution to the muon g-2.
//!
//! Points `(Lambda, kappa, eps)` are drawn from their priors and scored
//! against the measured anomaly. Batches run in parallel; batch `b` draws
//! from its own RNG seeded with `seed + b`, so results depend only on the
//! seed and the batch size, never on the thread count.

use goe_core::{Error, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Uniform};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::validation::PHI;

/// Measured muon anomaly `a_mu`.
pub const A_MU_EXP: f64 = 11_659_209.1e-10;
/// Standard Model prediction of `a_mu`.
pub const A_MU_SM: f64 = 11_659_181.0e-10;
/// Uncertainty on `delta a_mu` used in the chi-squared.
pub const DELTA_A_MU_SIGMA: f64 = 8e-10;
/// Muon mass in GeV.
pub const MUON_MASS_GEV: f64 = 0.105_658_375_5;

/// `a_mu(exp) - a_mu(SM)`.
pub fn delta_a_mu_exp() -> f64 {
    A_MU_EXP - A_MU_SM
}

/// GoE contribution `kappa m^2 / Lambda^2 / phi^2 + eps` (`m`, `Lambda` in GeV).
pub fn goe_g2(mass_gev: f64, lambda_gev: f64, kappa: f64, eps_theta: f64) -> f64 {
    kappa * mass_gev * mass_gev / (lambda_gev * lambda_gev) / (PHI * PHI) + eps_theta
}

/// Scan settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Total prior draws.
    pub n_points: usize,
    /// Draws per parallel batch.
    pub batch_size: usize,
    /// Base seed.
    pub seed: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { n_points: 1_000_000, batch_size: 10_000, seed: 123 }
    }
}

impl ScanConfig {
    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if self.n_points == 0 {
            return Err(Error::Validation("n_points must be >= 1".to_string()));
        }
        if self.batch_size == 0 {
            return Err(Error::Validation("batch_size must be >= 1".to_string()));
        }
        Ok(())
    }
}

/// One scored prior draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScanPoint {
    /// New-physics scale (GeV).
    pub lambda: f64,
    /// Coupling.
    pub kappa: f64,
    /// Additive offset.
    pub eps_theta: f64,
    /// Predicted `delta a_mu`.
    pub predicted: f64,
    /// `((predicted - delta_exp) / sigma)^2`.
    pub chi2: f64,
}

/// Aggregated scan outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanReport {
    /// Points evaluated.
    pub n_points: usize,
    /// Batches evaluated.
    pub n_batches: usize,
    /// Target `delta a_mu`.
    pub delta_a_mu_exp: f64,
    /// Lowest chi-squared point.
    pub best: ScanPoint,
    /// Points with `chi2 < 1`.
    pub within_1sigma: usize,
    /// Points with `chi2 < 4`.
    pub within_2sigma: usize,
    /// `within_1sigma / n_points`.
    pub fraction_1sigma: f64,
    /// `within_2sigma / n_points`.
    pub fraction_2sigma: f64,
    /// `(min, max)` of `Lambda` over the 1-sigma set.
    pub lambda_1sigma: Option<(f64, f64)>,
}

#[derive(Debug, Clone)]
struct BatchStats {
    n: usize,
    best: Option<ScanPoint>,
    within_1sigma: usize,
    within_2sigma: usize,
    lambda_1sigma: Option<(f64, f64)>,
}

impl BatchStats {
    fn empty() -> Self {
        Self { n: 0, best: None, within_1sigma: 0, within_2sigma: 0, lambda_1sigma: None }
    }

    fn push(&mut self, p: ScanPoint) {
        self.n += 1;
        if self.best.is_none_or(|b| p.chi2 < b.chi2) {
            self.best = Some(p);
        }
        if p.chi2 < 4.0 {
            self.within_2sigma += 1;
        }
        if p.chi2 < 1.0 {
            self.within_1sigma += 1;
            self.lambda_1sigma = Some(match self.lambda_1sigma {
                Some((lo, hi)) => (lo.min(p.lambda), hi.max(p.lambda)),
                None => (p.lambda, p.lambda),
            });
        }
    }

    fn merge(self, other: Self) -> Self {
        let best = match (self.best, other.best) {
            (Some(a), Some(b)) => Some(if b.chi2 < a.chi2 { b } else { a }),
            (a, b) => a.or(b),
        };
        let lambda_1sigma = match (self.lambda_1sigma, other.lambda_1sigma) {
            (Some((a0, a1)), Some((b0, b1))) => Some((a0.min(b0), a1.max(b1))),
            (a, b) => a.or(b),
        };
        Self {
            n: self.n + other.n,
            best,
            within_1sigma: self.within_1sigma + other.within_1sigma,
            within_2sigma: self.within_2sigma + other.within_2sigma,
            lambda_1sigma,
        }
    }
}

/// Prior draws for one batch, scored.
pub fn scan_batch<R: Rng>(n: usize, rng: &mut R) -> Result<Vec<ScanPoint>> {
    let lambda_prior = Uniform::new(100.0, 2000.0).map_err(|e| Error::Computation(e.to_string()))?;
    let kappa_prior = Normal::new(1.0, 0.3).map_err(|e| Error::Computation(e.to_string()))?;
    let eps_prior = Normal::new(0.0, 1e-10).map_err(|e| Error::Computation(e.to_string()))?;
    let target = delta_a_mu_exp();

    Ok((0..n)
        .map(|_| {
            let lambda = lambda_prior.sample(rng);
            let kappa = kappa_prior.sample(rng);
            let eps_theta = eps_prior.sample(rng);
            let predicted = goe_g2(MUON_MASS_GEV, lambda, kappa, eps_theta);
            let chi2 = ((predicted - target) / DELTA_A_MU_SIGMA).powi(2);
            ScanPoint { lambda, kappa, eps_theta, predicted, chi2 }
        })
        .collect())
}

/// Run the full scan.
pub fn run_scan(config: &ScanConfig) -> Result<ScanReport> {
    config.validate()?;
    let n_batches = config.n_points.div_ceil(config.batch_size);
    tracing::info!(n_points = config.n_points, n_batches, seed = config.seed, "starting prior scan");

    let stats = (0..n_batches)
        .into_par_iter()
        .map(|b| -> Result<BatchStats> {
            let start = b * config.batch_size;
            let n = config.batch_size.min(config.n_points - start);
            let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(b as u64));
            let mut stats = BatchStats::empty();
            for p in scan_batch(n, &mut rng)? {
                stats.push(p);
            }
            tracing::debug!(batch = b, n, within_1sigma = stats.within_1sigma, "batch done");
            Ok(stats)
        })
        .collect::<Result<Vec<_>>>()?
        .into_iter()
        .fold(BatchStats::empty(), BatchStats::merge);

    let best = stats.best.ok_or_else(|| Error::Computation("scan produced no points".to_string()))?;
    let n = stats.n as f64;
    let report = ScanReport {
        n_points: stats.n,
        n_batches,
        delta_a_mu_exp: delta_a_mu_exp(),
        best,
        within_1sigma: stats.within_1sigma,
        within_2sigma: stats.within_2sigma,
        fraction_1sigma: stats.within_1sigma as f64 / n,
        fraction_2sigma: stats.within_2sigma as f64 / n,
        lambda_1sigma: stats.lambda_1sigma,
    };
    tracing::info!(
        best_chi2 = report.best.chi2,
        best_lambda = report.best.lambda,
        within_1sigma = report.within_1sigma,
        "prior scan finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_delta_exp() {
        assert_relative_eq!(delta_a_mu_exp(), 28.1e-10, max_relative = 1e-6);
    }

    #[test]
    fn test_goe_g2_formula() {
        let pred = goe_g2(MUON_MASS_GEV, 1000.0, 1.0, 0.0);
        let expected = MUON_MASS_GEV.powi(2) / 1e6 / (PHI * PHI);
        assert_relative_eq!(pred, expected, max_relative = 1e-12);
        assert_relative_eq!(goe_g2(MUON_MASS_GEV, 1000.0, 2.0, 1e-10), 2.0 * expected + 1e-10, max_relative = 1e-12);
    }

    #[test]
    fn test_batch_respects_priors() {
        let mut rng = StdRng::seed_from_u64(1);
        let pts = scan_batch(2000, &mut rng).unwrap();
        assert_eq!(pts.len(), 2000);
        assert!(pts.iter().all(|p| (100.0..2000.0).contains(&p.lambda)));
        let kappa_mean = pts.iter().map(|p| p.kappa).sum::<f64>() / 2000.0;
        assert!((kappa_mean - 1.0).abs() < 0.05, "kappa mean {}", kappa_mean);
    }

    #[test]
    fn test_scan_report() {
        let config = ScanConfig { n_points: 20_500, batch_size: 1000, seed: 123 };
        let r = run_scan(&config).unwrap();
        assert_eq!(r.n_points, 20_500);
        assert_eq!(r.n_batches, 21);
        assert!(r.within_1sigma <= r.within_2sigma);
        assert!(r.within_1sigma > 0);
        assert!(r.best.chi2 < 1.0);
        let (lo, hi) = r.lambda_1sigma.unwrap();
        assert!(100.0 <= lo && lo <= r.best.lambda && r.best.lambda <= hi && hi < 2000.0);
        assert_relative_eq!(r.fraction_2sigma, r.within_2sigma as f64 / 20_500.0);
    }

    #[test]
    fn test_scan_is_deterministic() {
        let config = ScanConfig { n_points: 5000, batch_size: 700, seed: 9 };
        let a = run_scan(&config).unwrap();
        let b = run_scan(&config).unwrap();
        assert_eq!(a.best, b.best);
        assert_eq!(a.within_2sigma, b.within_2sigma);
    }

    #[test]
    fn test_scan_config_validation() {
        assert!(run_scan(&ScanConfig { n_points: 0, ..ScanConfig::default() }).is_err());
        assert!(run_scan(&ScanConfig { batch_size: 0, ..ScanConfig::default() }).is_err());
    }
}
