//! Statistical validation of the golden-ratio fermion mass model.
//!
//! Each sector (three fermions) is fitted with `m = m0 phi^n`, `m0` the
//! lightest mass and `n` rounded, and the predictions are checked against
//! PDG 2025 masses with a battery of goodness-of-fit, normality,
//! randomness and resampling tests. A two-parameter power law in a charge
//! `q` is fitted alongside and the two models are compared by BIC and by the
//! variance of their residuals.

use std::fmt;
use std::str::FromStr;

use goe_core::{Error, Result};
use nalgebra::DMatrix;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, FisherSnedecor};
use statrs::function::erf::{erfc, erfc_inv};

use crate::summary::{mean, quantile_sorted, std_pop};

/// Golden ratio.
pub const PHI: f64 = 1.618_033_988_749_895;

/// Significance level used for every accept/reject decision.
pub const ALPHA: f64 = 0.05;

/// A fermion with its PDG 2025 mass (MeV) and uncertainty.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fermion {
    /// Short name (`e`, `mu`, ...).
    pub name: &'static str,
    /// Mass in MeV.
    pub mass: f64,
    /// Upper uncertainty.
    pub unc_plus: f64,
    /// Lower uncertainty (equal to `unc_plus` when symmetric).
    pub unc_minus: f64,
}

impl Fermion {
    const fn symmetric(name: &'static str, mass: f64, unc: f64) -> Self {
        Self { name, mass, unc_plus: unc, unc_minus: unc }
    }

    const fn asymmetric(name: &'static str, mass: f64, plus: f64, minus: f64) -> Self {
        Self { name, mass, unc_plus: plus, unc_minus: minus }
    }

    /// Uncertainty used in fits: asymmetric pairs are averaged.
    pub fn uncertainty(&self) -> f64 {
        0.5 * (self.unc_plus + self.unc_minus)
    }
}

const LEPTONS: [Fermion; 3] = [
    Fermion::symmetric("e", 0.510_998_95, 0.000_000_000_15),
    Fermion::symmetric("mu", 105.658_375_5, 0.000_002_3),
    Fermion::symmetric("tau", 1776.86, 0.12),
];

const UP_QUARKS: [Fermion; 3] = [
    Fermion::asymmetric("u", 2.16, 0.49, 0.26),
    Fermion::symmetric("c", 1273.0, 4.6),
    Fermion::symmetric("t", 172_500.0, 500.0),
];

const DOWN_QUARKS: [Fermion; 3] = [
    Fermion::asymmetric("d", 4.67, 0.48, 0.17),
    Fermion::asymmetric("s", 93.4, 8.6, 3.4),
    Fermion::symmetric("b", 4183.0, 7.0),
];

/// Fermion sector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sector {
    /// e, mu, tau.
    Leptons,
    /// u, c, t.
    UpQuarks,
    /// d, s, b.
    DownQuarks,
}

impl Sector {
    /// All sectors in report order.
    pub const ALL: [Sector; 3] = [Sector::Leptons, Sector::UpQuarks, Sector::DownQuarks];

    /// Fermions of this sector, lightest first.
    pub fn fermions(&self) -> &'static [Fermion] {
        match self {
            Sector::Leptons => &LEPTONS,
            Sector::UpQuarks => &UP_QUARKS,
            Sector::DownQuarks => &DOWN_QUARKS,
        }
    }

    /// Name used in reports and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Sector::Leptons => "leptons",
            Sector::UpQuarks => "up_quarks",
            Sector::DownQuarks => "down_quarks",
        }
    }
}

impl fmt::Display for Sector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Sector::ALL
            .into_iter()
            .find(|sector| sector.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown sector '{}' (leptons, up_quarks, down_quarks)", s)))
    }
}

/// Golden-ratio quantisation `m = m0 phi^n`.
#[derive(Debug, Clone, Copy, Default)]
pub struct GoldenRatioModel;

/// Result of fitting [`GoldenRatioModel`] to a mass list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenRatioFit {
    /// Reference mass (the first input mass).
    pub m0: f64,
    /// Continuous exponents `log(m / m0) / log(phi)`.
    pub n_extracted: Vec<f64>,
    /// Exponents rounded half-to-even.
    pub n_rounded: Vec<f64>,
    /// `m0 phi^n_rounded`.
    pub predicted: Vec<f64>,
}

impl GoldenRatioModel {
    /// `m0 phi^n`.
    pub fn predict_mass(&self, n: f64, m0: f64) -> f64 {
        m0 * PHI.powf(n)
    }

    /// `log(m / m0) / log(phi)`.
    pub fn extract_n(&self, mass: f64, m0: f64) -> f64 {
        (mass / m0).ln() / PHI.ln()
    }

    /// Predict every mass in `masses` from the reference `m0`.
    pub fn predict_all(&self, masses: &[f64], m0: f64) -> (Vec<f64>, Vec<f64>, Vec<f64>) {
        let n_extracted: Vec<f64> = masses.iter().map(|&m| self.extract_n(m, m0)).collect();
        let n_rounded: Vec<f64> = n_extracted.iter().map(|n| n.round_ties_even()).collect();
        let predicted = n_rounded.iter().map(|&n| self.predict_mass(n, m0)).collect();
        (n_extracted, n_rounded, predicted)
    }

    /// Fit with `m0 = masses[0]`.
    pub fn fit_and_predict(&self, masses: &[f64]) -> Result<GoldenRatioFit> {
        let Some(&m0) = masses.first() else {
            return Err(Error::Validation("cannot fit an empty mass list".to_string()));
        };
        if masses.iter().any(|&m| !(m.is_finite() && m > 0.0)) {
            return Err(Error::Validation("masses must be finite and > 0".to_string()));
        }
        let (n_extracted, n_rounded, predicted) = self.predict_all(masses, m0);
        Ok(GoldenRatioFit { m0, n_extracted, n_rounded, predicted })
    }
}

/// Charges `q` assigned to the three fermions of every sector for
/// [`PowerLawModel`].
pub const POWER_LAW_CHARGES: [f64; 3] = [1.0, 6.0, 12.0];

/// Power law `m = A |q|^p` in a per-fermion charge `q`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerLawModel;

/// Result of fitting [`PowerLawModel`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PowerLawFit {
    /// Mass scale `A` (MeV).
    pub amplitude: f64,
    /// Exponent `p`.
    pub exponent: f64,
    /// Charges the fit used.
    pub charges: Vec<f64>,
    /// `A |q|^p`.
    pub predicted: Vec<f64>,
}

impl PowerLawModel {
    /// `A |q|^p`.
    pub fn predict_mass(&self, q: f64, amplitude: f64, exponent: f64) -> f64 {
        amplitude * q.abs().powf(exponent)
    }

    /// Least-squares line through `(ln|q|, ln m)`.
    pub fn fit_and_predict(&self, masses: &[f64], charges: &[f64]) -> Result<PowerLawFit> {
        if masses.len() != charges.len() || masses.len() < 2 {
            return Err(Error::Validation(format!(
                "power-law fit needs at least two masses with one charge each, got {} masses and {} charges",
                masses.len(),
                charges.len()
            )));
        }
        if masses.iter().any(|&m| !(m.is_finite() && m > 0.0)) {
            return Err(Error::Validation("masses must be finite and > 0".to_string()));
        }
        if charges.iter().any(|&q| !q.is_finite() || q == 0.0) {
            return Err(Error::Validation("charges must be finite and non-zero".to_string()));
        }

        let x: Vec<f64> = charges.iter().map(|q| q.abs().ln()).collect();
        let y: Vec<f64> = masses.iter().map(|m| m.ln()).collect();
        if x.iter().all(|&xi| xi == x[0]) {
            return Err(Error::Validation("charges must not all have the same magnitude".to_string()));
        }
        let (mx, my) = (mean(&x), mean(&y));
        let sxx: f64 = x.iter().map(|&xi| (xi - mx).powi(2)).sum();
        let sxy: f64 = x.iter().zip(&y).map(|(&xi, &yi)| (xi - mx) * (yi - my)).sum();
        let exponent = sxy / sxx;
        let amplitude = (my - exponent * mx).exp();
        let predicted = charges.iter().map(|&q| self.predict_mass(q, amplitude, exponent)).collect();
        Ok(PowerLawFit { amplitude, exponent, charges: charges.to_vec(), predicted })
    }
}

fn norm_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / std::f64::consts::SQRT_2)
}

fn norm_ppf(p: f64) -> f64 {
    -std::f64::consts::SQRT_2 * erfc_inv(2.0 * p)
}

fn chi2_sf(x: f64, dof: f64) -> f64 {
    ChiSquared::new(dof).map(|d| 1.0 - d.cdf(x)).unwrap_or(f64::NAN)
}

fn standardize_pop(xs: &[f64]) -> Vec<f64> {
    let (m, s) = (mean(xs), std_pop(xs));
    xs.iter().map(|&x| (x - m) / s).collect()
}

fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let (ma, mb) = (mean(a), mean(b));
    let cov: f64 = a.iter().zip(b).map(|(&x, &y)| (x - ma) * (y - mb)).sum();
    let va: f64 = a.iter().map(|&x| (x - ma).powi(2)).sum();
    let vb: f64 = b.iter().map(|&y| (y - mb).powi(2)).sum();
    cov / (va * vb).sqrt()
}

fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => (0..n).map(|i| start + (stop - start) * i as f64 / (n - 1) as f64).collect(),
    }
}

fn ln_factorial(n: usize) -> f64 {
    (2..=n).map(|k| (k as f64).ln()).sum()
}

/// Exact CDF `P(D_n < d)` of the one-sample Kolmogorov statistic
/// (Marsaglia, Tsang & Wang 2003).
fn kolmogorov_cdf_exact(n: usize, d: f64) -> f64 {
    let nd = n as f64 * d;
    if nd <= 0.5 {
        return 0.0;
    }
    if d >= 1.0 {
        return 1.0;
    }
    let k = nd.floor() as usize + 1;
    let m = 2 * k - 1;
    let h = k as f64 - nd;

    let mut hm = DMatrix::from_fn(m, m, |i, j| if i + 1 >= j { 1.0 } else { 0.0 });
    for i in 0..m {
        hm[(i, 0)] -= h.powi(i as i32 + 1);
        hm[(m - 1, i)] -= h.powi((m - i) as i32);
    }
    if 2.0 * h - 1.0 > 0.0 {
        hm[(m - 1, 0)] += (2.0 * h - 1.0).powi(m as i32);
    }
    for i in 0..m {
        for j in 0..m {
            if i + 1 > j {
                hm[(i, j)] /= (ln_factorial(i + 1 - j)).exp();
            }
        }
    }

    let mut power = DMatrix::identity(m, m);
    for _ in 0..n {
        power = &power * &hm;
    }
    let scale = (ln_factorial(n) - n as f64 * (n as f64).ln()).exp();
    (power[(k - 1, k - 1)] * scale).clamp(0.0, 1.0)
}

/// Asymptotic Kolmogorov survival function `P(sqrt(n) D > t)`.
fn kolmogorov_sf_asymptotic(t: f64) -> f64 {
    if t <= 0.0 {
        return 1.0;
    }
    let s: f64 = (1..=100)
        .map(|k| {
            let k = k as f64;
            let sign = if k as u64 % 2 == 1 { 1.0 } else { -1.0 };
            sign * (-2.0 * k * k * t * t).exp()
        })
        .sum();
    (2.0 * s).clamp(0.0, 1.0)
}

/// Two-sided p-value of the one-sample KS statistic `d` with `n` draws.
pub fn kolmogorov_smirnov_pvalue(n: usize, d: f64) -> f64 {
    if n == 0 {
        return f64::NAN;
    }
    if n <= 100 {
        1.0 - kolmogorov_cdf_exact(n, d)
    } else {
        kolmogorov_sf_asymptotic((n as f64).sqrt() * d)
    }
}

/// Basic error metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicMetrics {
    /// Mean absolute percentage error.
    pub mape: f64,
    /// Root mean squared residual.
    pub rmse: f64,
    /// Mean absolute residual.
    pub mae: f64,
    /// Largest percent error.
    pub max_error_percent: f64,
    /// Smallest percent error.
    pub min_error_percent: f64,
}

/// Chi-squared goodness of fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChiSquaredResult {
    /// Statistic.
    pub chi2: f64,
    /// Degrees of freedom `n - n_params`.
    pub dof: i64,
    /// `chi2 / dof` (`inf` without freedom).
    pub chi2_reduced: f64,
    /// Upper-tail p-value (0 without freedom).
    pub p_value: f64,
    /// `chi2_reduced < 2`.
    pub good_fit: bool,
    /// `p_value < 0.05`.
    pub reject_h0: bool,
}

/// A test statistic with a p-value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    /// Statistic.
    pub statistic: f64,
    /// p-value.
    pub p_value: f64,
    /// `p_value < 0.05`.
    pub reject_h0: bool,
}

/// Anderson-Darling normality test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AndersonDarlingResult {
    /// `A^2` statistic.
    pub statistic: f64,
    /// Small-sample corrected 5% critical value.
    pub critical_value_5pct: f64,
    /// `statistic > critical_value_5pct`.
    pub reject_h0: bool,
}

/// Jarque-Bera normality test.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JarqueBeraResult {
    /// `n/6 (S^2 + K^2/4)`.
    pub statistic: f64,
    /// `chi2(2)` upper tail.
    pub p_value: f64,
    /// Population skewness.
    pub skewness: f64,
    /// Population excess kurtosis.
    pub kurtosis: f64,
    /// `p_value < 0.05`.
    pub reject_h0: bool,
}

/// Variance-ratio F test between two residual sets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FTestResult {
    /// Larger variance over smaller variance.
    pub f_statistic: f64,
    /// Numerator degrees of freedom.
    pub df1: usize,
    /// Denominator degrees of freedom.
    pub df2: usize,
    /// Two-sided p-value.
    pub p_value: f64,
    /// Sample variance of this model's residuals.
    pub var_model1: f64,
    /// Sample variance of the other residuals.
    pub var_model2: f64,
    /// `p_value < 0.05`.
    pub reject_h0: bool,
}

/// Durbin-Watson statistic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DurbinWatsonResult {
    /// `sum(diff(r)^2) / sum(r^2)`.
    pub statistic: f64,
    /// Outside `(1.5, 2.5)`.
    pub autocorrelated: bool,
}

/// Wald-Wolfowitz runs test around the median.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsTestResult {
    /// Observed runs.
    pub n_runs: usize,
    /// Expected runs under randomness.
    pub expected_runs: f64,
    /// Normal approximation z-score (0 when the variance vanishes).
    pub z_score: f64,
    /// Two-sided p-value.
    pub p_value: f64,
    /// `p_value < 0.05`.
    pub reject_h0: bool,
}

/// Cook's distance with equal leverage `1/n`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooksDistanceResult {
    /// Distance per point.
    pub distances: Vec<f64>,
    /// `4 / (n - n_params - 1)`.
    pub threshold: f64,
    /// Points above the threshold.
    pub outlier_indices: Vec<usize>,
}

/// Information criteria under Gaussian residuals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationCriteria {
    /// Akaike information criterion.
    pub aic: f64,
    /// Bayesian information criterion.
    pub bic: f64,
    /// Maximised Gaussian log-likelihood.
    pub log_likelihood: f64,
    /// Coefficient of determination.
    pub r_squared: f64,
    /// Adjusted `R^2`.
    pub r_squared_adjusted: f64,
}

/// Bootstrap confidence intervals on percent errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BootstrapResult {
    /// Resamples drawn.
    pub n_bootstrap: usize,
    /// Confidence level.
    pub confidence_level: f64,
    /// CI of the mean percent error (the MAPE).
    pub mape_ci: (f64, f64),
    /// CI of the percent-error standard deviation.
    pub std_error_ci: (f64, f64),
    /// Point estimate of the MAPE.
    pub mean_estimate: f64,
    /// Point estimate of the percent-error std.
    pub std_estimate: f64,
}

/// Leave-one-out cross-validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoocvResult {
    /// Mean held-out percent error.
    pub loocv_mape: f64,
    /// Std of held-out percent errors.
    pub loocv_std: f64,
    /// Largest held-out percent error.
    pub loocv_max: f64,
    /// Held-out percent errors (failed refits are skipped).
    pub loocv_errors: Vec<f64>,
    /// `loocv_mape < 10`.
    pub good_predictive_power: bool,
}

/// Permutation test on the MAPE.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PermutationResult {
    /// Permutations drawn.
    pub n_permutations: usize,
    /// `-MAPE` of the actual predictions.
    pub observed_statistic: f64,
    /// Mean of the null statistics.
    pub null_mean: f64,
    /// Std of the null statistics.
    pub null_std: f64,
    /// Fraction of permutations at least as good as the observed predictions.
    pub p_value: f64,
    /// `p_value < 0.05`.
    pub reject_h0: bool,
}

/// Q-Q correlation against normal quantiles.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QqResult {
    /// Pearson correlation of sorted standardised residuals with normal quantiles.
    pub correlation: f64,
    /// `correlation > 0.95`.
    pub normal: bool,
}

/// Tests over experimental values and model predictions.
#[derive(Debug, Clone)]
pub struct StatisticalTests {
    experimental: Vec<f64>,
    predicted: Vec<f64>,
    uncertainties: Option<Vec<f64>>,
    residuals: Vec<f64>,
    rel_residuals: Vec<f64>,
    percent_errors: Vec<f64>,
    std_residuals: Vec<f64>,
}

impl StatisticalTests {
    /// Residuals are `predicted - experimental`. Standardised residuals use
    /// the uncertainties when given, the residual std otherwise.
    pub fn new(experimental: Vec<f64>, predicted: Vec<f64>, uncertainties: Option<Vec<f64>>) -> Result<Self> {
        if experimental.is_empty() || experimental.len() != predicted.len() {
            return Err(Error::Validation(format!(
                "need matching non-empty experimental/predicted values, got {} and {}",
                experimental.len(),
                predicted.len()
            )));
        }
        if experimental.iter().any(|&m| m == 0.0 || !m.is_finite()) {
            return Err(Error::Validation("experimental values must be finite and non-zero".to_string()));
        }
        if let Some(u) = &uncertainties {
            if u.len() != experimental.len() || u.iter().any(|&s| !(s.is_finite() && s > 0.0)) {
                return Err(Error::Validation("uncertainties must match and be > 0".to_string()));
            }
        }

        let residuals: Vec<f64> = predicted.iter().zip(&experimental).map(|(p, e)| p - e).collect();
        let rel_residuals: Vec<f64> = residuals.iter().zip(&experimental).map(|(r, e)| r / e).collect();
        let percent_errors = rel_residuals.iter().map(|r| r.abs() * 100.0).collect();
        let std_residuals = match &uncertainties {
            Some(u) => residuals.iter().zip(u).map(|(r, s)| r / s).collect(),
            None => {
                let s = std_pop(&residuals);
                residuals.iter().map(|r| r / s).collect()
            }
        };

        Ok(Self { experimental, predicted, uncertainties, residuals, rel_residuals, percent_errors, std_residuals })
    }

    /// Number of points.
    pub fn n(&self) -> usize {
        self.experimental.len()
    }

    /// `predicted - experimental`.
    pub fn residuals(&self) -> &[f64] {
        &self.residuals
    }

    /// `|residual / experimental| * 100`.
    pub fn percent_errors(&self) -> &[f64] {
        &self.percent_errors
    }

    /// MAPE, RMSE, MAE and percent-error range.
    pub fn basic_metrics(&self) -> BasicMetrics {
        let pe = &self.percent_errors;
        BasicMetrics {
            mape: mean(pe),
            rmse: mean(&self.residuals.iter().map(|r| r * r).collect::<Vec<_>>()).sqrt(),
            mae: mean(&self.residuals.iter().map(|r| r.abs()).collect::<Vec<_>>()),
            max_error_percent: pe.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            min_error_percent: pe.iter().copied().fold(f64::INFINITY, f64::min),
        }
    }

    /// Chi-squared with uncertainties, or on relative residuals without them.
    pub fn chi_squared(&self, n_params: usize) -> ChiSquaredResult {
        let chi2: f64 = match &self.uncertainties {
            Some(u) => self.residuals.iter().zip(u).map(|(r, s)| (r / s).powi(2)).sum(),
            None => self.rel_residuals.iter().map(|r| r * r).sum(),
        };
        let dof = self.n() as i64 - n_params as i64;
        let (chi2_reduced, p_value) =
            if dof > 0 { (chi2 / dof as f64, chi2_sf(chi2, dof as f64)) } else { (f64::INFINITY, 0.0) };
        ChiSquaredResult { chi2, dof, chi2_reduced, p_value, good_fit: chi2_reduced < 2.0, reject_h0: p_value < ALPHA }
    }

    /// KS test of standardised residuals against `N(0, 1)`.
    pub fn kolmogorov_smirnov(&self) -> TestResult {
        let mut z = standardize_pop(&self.residuals);
        z.sort_by(f64::total_cmp);
        let n = z.len() as f64;
        let d = z
            .iter()
            .enumerate()
            .map(|(i, &x)| {
                let f = norm_cdf(x);
                ((i + 1) as f64 / n - f).max(f - i as f64 / n)
            })
            .fold(f64::NAN, f64::max);
        let p_value = kolmogorov_smirnov_pvalue(z.len(), d);
        TestResult { statistic: d, p_value, reject_h0: p_value < ALPHA }
    }

    /// Anderson-Darling normality test with estimated mean and variance.
    pub fn anderson_darling(&self) -> AndersonDarlingResult {
        let n = self.n();
        let nf = n as f64;
        let m = mean(&self.residuals);
        let s = (self.residuals.iter().map(|r| (r - m).powi(2)).sum::<f64>() / (nf - 1.0)).sqrt();
        let mut w: Vec<f64> = self.residuals.iter().map(|r| (r - m) / s).collect();
        w.sort_by(f64::total_cmp);

        let sum: f64 = (0..n)
            .map(|i| {
                let weight = (2 * i + 1) as f64 / nf;
                weight * (norm_cdf(w[i]).ln() + (1.0 - norm_cdf(w[n - 1 - i])).ln())
            })
            .sum();
        let statistic = -nf - sum;
        let critical_value_5pct = 0.787 / (1.0 + 4.0 / nf - 25.0 / (nf * nf));
        AndersonDarlingResult { statistic, critical_value_5pct, reject_h0: statistic > critical_value_5pct }
    }

    /// Jarque-Bera test on the raw residuals.
    pub fn jarque_bera(&self) -> JarqueBeraResult {
        let n = self.n() as f64;
        let m = mean(&self.residuals);
        let moment = |k: i32| self.residuals.iter().map(|r| (r - m).powi(k)).sum::<f64>() / n;
        let m2 = moment(2);
        let skewness = moment(3) / m2.powf(1.5);
        let kurtosis = moment(4) / (m2 * m2) - 3.0;
        let statistic = n / 6.0 * (skewness * skewness + 0.25 * kurtosis * kurtosis);
        let p_value = chi2_sf(statistic, 2.0);
        JarqueBeraResult { statistic, p_value, skewness, kurtosis, reject_h0: p_value < ALPHA }
    }

    /// F test comparing residual variances with another model.
    pub fn f_test_variance(&self, other_residuals: &[f64]) -> Result<FTestResult> {
        let sample_var = |xs: &[f64]| {
            let m = mean(xs);
            xs.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (xs.len() as f64 - 1.0)
        };
        if self.n() < 2 || other_residuals.len() < 2 {
            return Err(Error::Validation("F test needs at least two residuals per model".to_string()));
        }
        let var1 = sample_var(&self.residuals);
        let var2 = sample_var(other_residuals);
        let (f_statistic, df1, df2) = if var1 > var2 {
            (var1 / var2, self.n() - 1, other_residuals.len() - 1)
        } else {
            (var2 / var1, other_residuals.len() - 1, self.n() - 1)
        };
        let dist = FisherSnedecor::new(df1 as f64, df2 as f64).map_err(|e| Error::Computation(e.to_string()))?;
        let cdf = dist.cdf(f_statistic);
        let p_value = 2.0 * cdf.min(1.0 - cdf);
        Ok(FTestResult { f_statistic, df1, df2, p_value, var_model1: var1, var_model2: var2, reject_h0: p_value < ALPHA })
    }

    /// Durbin-Watson statistic of the residual sequence.
    pub fn durbin_watson(&self) -> DurbinWatsonResult {
        let num: f64 = self.residuals.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum();
        let den: f64 = self.residuals.iter().map(|r| r * r).sum();
        let statistic = num / den;
        DurbinWatsonResult { statistic, autocorrelated: !(statistic > 1.5 && statistic < 2.5) }
    }

    /// Runs test on residuals above/below their median.
    pub fn runs_test(&self) -> RunsTestResult {
        let mut sorted = self.residuals.clone();
        sorted.sort_by(f64::total_cmp);
        let median = quantile_sorted(&sorted, 0.5);
        let above: Vec<bool> = self.residuals.iter().map(|&r| r > median).collect();

        let n_runs = 1 + above.windows(2).filter(|w| w[0] != w[1]).count();
        let n_pos = above.iter().filter(|&&a| a).count() as f64;
        let n_neg = above.len() as f64 - n_pos;
        let n = n_pos + n_neg;

        let expected_runs = 1.0 + 2.0 * n_pos * n_neg / n;
        let var_runs = 2.0 * n_pos * n_neg * (2.0 * n_pos * n_neg - n) / (n * n * (n - 1.0));
        let z_score = if var_runs > 0.0 { (n_runs as f64 - expected_runs) / var_runs.sqrt() } else { 0.0 };
        let p_value = 2.0 * (1.0 - norm_cdf(z_score.abs()));
        RunsTestResult { n_runs, expected_runs, z_score, p_value, reject_h0: p_value < ALPHA }
    }

    /// Cook's distance under equal leverage.
    pub fn cooks_distance(&self, n_params: usize) -> CooksDistanceResult {
        let n = self.n() as f64;
        let leverage = 1.0 / n;
        let p = n_params.max(1) as f64;
        let distances: Vec<f64> =
            self.std_residuals.iter().map(|r| r * r / p * (leverage / (1.0 - leverage))).collect();
        let threshold = 4.0 / (n - n_params as f64 - 1.0);
        let outlier_indices = distances.iter().enumerate().filter(|&(_, &d)| d > threshold).map(|(i, _)| i).collect();
        CooksDistanceResult { distances, threshold, outlier_indices }
    }

    /// AIC, BIC and `R^2` assuming Gaussian residuals with ML variance.
    pub fn information_criteria(&self, n_params: usize) -> InformationCriteria {
        let n = self.n() as f64;
        let k = n_params as f64;
        let rss: f64 = self.residuals.iter().map(|r| r * r).sum();
        let sigma2 = rss / n;
        let log_likelihood = -0.5 * n * ((2.0 * std::f64::consts::PI).ln() + sigma2.ln() + 1.0);

        let m = mean(&self.experimental);
        let ss_tot: f64 = self.experimental.iter().map(|e| (e - m).powi(2)).sum();
        let r_squared = 1.0 - rss / ss_tot;
        InformationCriteria {
            aic: 2.0 * k - 2.0 * log_likelihood,
            bic: k * n.ln() - 2.0 * log_likelihood,
            log_likelihood,
            r_squared,
            r_squared_adjusted: 1.0 - (1.0 - r_squared) * (n - 1.0) / (n - k - 1.0),
        }
    }

    /// Percentile bootstrap of the percent errors.
    pub fn bootstrap(&self, n_bootstrap: usize, confidence: f64, seed: u64) -> BootstrapResult {
        let mut rng = StdRng::seed_from_u64(seed);
        let n = self.n();
        let mut means = Vec::with_capacity(n_bootstrap);
        let mut stds = Vec::with_capacity(n_bootstrap);
        let mut sample = vec![0.0; n];
        for _ in 0..n_bootstrap {
            for s in sample.iter_mut() {
                *s = self.percent_errors[rng.random_range(0..n)];
            }
            means.push(mean(&sample));
            stds.push(std_pop(&sample));
        }
        means.sort_by(f64::total_cmp);
        stds.sort_by(f64::total_cmp);

        let alpha = 1.0 - confidence;
        let ci = |v: &[f64]| (quantile_sorted(v, alpha / 2.0), quantile_sorted(v, 1.0 - alpha / 2.0));
        BootstrapResult {
            n_bootstrap,
            confidence_level: confidence,
            mape_ci: ci(&means),
            std_error_ci: ci(&stds),
            mean_estimate: mean(&self.percent_errors),
            std_estimate: std_pop(&self.percent_errors),
        }
    }

    /// Leave-one-out: `refit(i)` returns predictions for every point with
    /// point `i` held out of the fit, or `None` when the refit fails.
    pub fn loocv<F>(&self, refit: F) -> LoocvResult
    where
        F: Fn(usize) -> Option<Vec<f64>>,
    {
        let loocv_errors: Vec<f64> = (0..self.n())
            .filter_map(|i| {
                let pred = refit(i)?;
                let e = self.experimental[i];
                pred.get(i).map(|p| (p - e).abs() / e.abs() * 100.0)
            })
            .filter(|e| e.is_finite())
            .collect();
        let loocv_mape = mean(&loocv_errors);
        LoocvResult {
            loocv_mape,
            loocv_std: std_pop(&loocv_errors),
            loocv_max: loocv_errors.iter().copied().fold(f64::NAN, f64::max),
            loocv_errors,
            good_predictive_power: loocv_mape < 10.0,
        }
    }

    /// Permutation test: are the predictions better matched to their own
    /// targets than to a shuffled assignment?
    pub fn permutation_test(&self, n_permutations: usize, seed: u64) -> PermutationResult {
        let mut rng = StdRng::seed_from_u64(seed);
        let observed_statistic = -mean(&self.percent_errors);
        let mut perm = self.predicted.clone();
        let null_stats: Vec<f64> = (0..n_permutations)
            .map(|_| {
                perm.shuffle(&mut rng);
                let errs: Vec<f64> =
                    perm.iter().zip(&self.experimental).map(|(p, e)| (p - e).abs() / e.abs() * 100.0).collect();
                -mean(&errs)
            })
            .collect();
        let hits = null_stats.iter().filter(|&&s| s >= observed_statistic).count();
        let p_value = if n_permutations > 0 { hits as f64 / n_permutations as f64 } else { f64::NAN };
        PermutationResult {
            n_permutations,
            observed_statistic,
            null_mean: mean(&null_stats),
            null_std: std_pop(&null_stats),
            p_value,
            reject_h0: p_value < ALPHA,
        }
    }

    /// Q-Q correlation of standardised residuals.
    pub fn qq_correlation(&self) -> QqResult {
        let mut observed = standardize_pop(&self.residuals);
        observed.sort_by(f64::total_cmp);
        let theoretical: Vec<f64> = linspace(0.01, 0.99, observed.len()).into_iter().map(norm_ppf).collect();
        let correlation = pearson(&theoretical, &observed);
        QqResult { correlation, normal: correlation > 0.95 }
    }
}

/// `chi2 + k ln n`.
pub fn bic(chi2: f64, n_data: usize, n_params: usize) -> f64 {
    chi2 + n_params as f64 * (n_data as f64).ln()
}

fn relative_chi2(experimental: &[f64], predicted: &[f64]) -> f64 {
    experimental.iter().zip(predicted).map(|(&e, &p)| ((p - e) / e).powi(2)).sum()
}

/// Evidence band for `delta_bic = BIC(power law) - BIC(golden ratio)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BicPreference {
    /// `delta_bic > 10`.
    VeryStrongGoldenRatio,
    /// `6 < delta_bic <= 10`.
    StrongGoldenRatio,
    /// `2 < delta_bic <= 6`.
    PositiveGoldenRatio,
    /// `-2 < delta_bic <= 2`.
    NoClearPreference,
    /// `-6 < delta_bic <= -2`.
    PositivePowerLaw,
    /// `-10 < delta_bic <= -6`.
    StrongPowerLaw,
    /// `delta_bic <= -10`.
    VeryStrongPowerLaw,
}

impl BicPreference {
    /// Band containing `delta_bic`.
    pub fn from_delta(delta_bic: f64) -> Self {
        if delta_bic > 10.0 {
            Self::VeryStrongGoldenRatio
        } else if delta_bic > 6.0 {
            Self::StrongGoldenRatio
        } else if delta_bic > 2.0 {
            Self::PositiveGoldenRatio
        } else if delta_bic > -2.0 {
            Self::NoClearPreference
        } else if delta_bic > -6.0 {
            Self::PositivePowerLaw
        } else if delta_bic > -10.0 {
            Self::StrongPowerLaw
        } else {
            Self::VeryStrongPowerLaw
        }
    }
}

/// BIC comparison of the power law (`A`, `p`) against the golden ratio (`m0`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelComparison {
    /// Sum of squared relative residuals of the power law.
    pub chi2_power_law: f64,
    /// Sum of squared relative residuals of the golden-ratio model.
    pub chi2_golden_ratio: f64,
    /// BIC with two parameters.
    pub bic_power_law: f64,
    /// BIC with one parameter.
    pub bic_golden_ratio: f64,
    /// `bic_power_law - bic_golden_ratio`; positive favours the golden ratio.
    pub delta_bic: f64,
    /// Evidence band of `delta_bic`.
    pub preference: BicPreference,
}

/// Compare both models' predictions of `experimental`.
pub fn compare_models(experimental: &[f64], power_law: &[f64], golden_ratio: &[f64]) -> Result<ModelComparison> {
    let n = experimental.len();
    if n == 0 || power_law.len() != n || golden_ratio.len() != n {
        return Err(Error::Validation(format!(
            "model comparison needs matching non-empty predictions, got {} experimental, {} power-law, {} golden-ratio",
            n,
            power_law.len(),
            golden_ratio.len()
        )));
    }
    if experimental.iter().any(|&m| m == 0.0 || !m.is_finite()) {
        return Err(Error::Validation("experimental values must be finite and non-zero".to_string()));
    }
    let chi2_power_law = relative_chi2(experimental, power_law);
    let chi2_golden_ratio = relative_chi2(experimental, golden_ratio);
    let bic_power_law = bic(chi2_power_law, n, 2);
    let bic_golden_ratio = bic(chi2_golden_ratio, n, 1);
    let delta_bic = bic_power_law - bic_golden_ratio;
    Ok(ModelComparison {
        chi2_power_law,
        chi2_golden_ratio,
        bic_power_law,
        bic_golden_ratio,
        delta_bic,
        preference: BicPreference::from_delta(delta_bic),
    })
}

/// Resampling settings for [`analyze_sector`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Bootstrap resamples.
    pub n_bootstrap: usize,
    /// Permutations.
    pub n_permutations: usize,
    /// Bootstrap confidence level.
    pub confidence: f64,
    /// Seed for bootstrap and permutations.
    pub seed: u64,
    /// Free parameters of the model (`m0`).
    pub n_params: usize,
    /// Charges of the lightest to heaviest fermion for the power law.
    pub power_law_charges: Vec<f64>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            n_bootstrap: 10_000,
            n_permutations: 10_000,
            confidence: 0.95,
            seed: 42,
            n_params: 1,
            power_law_charges: POWER_LAW_CHARGES.to_vec(),
        }
    }
}

/// Full report for one sector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectorReport {
    /// Sector.
    pub sector: Sector,
    /// Fermion names, lightest first.
    pub fermions: Vec<String>,
    /// PDG masses.
    pub masses_experimental: Vec<f64>,
    /// Averaged uncertainties.
    pub uncertainties: Vec<f64>,
    /// Golden-ratio fit.
    pub fit: GoldenRatioFit,
    /// The golden ratio.
    pub phi: f64,
    /// Error metrics.
    pub basic_metrics: BasicMetrics,
    /// Chi-squared.
    pub chi_squared: ChiSquaredResult,
    /// Kolmogorov-Smirnov.
    pub kolmogorov_smirnov: TestResult,
    /// Anderson-Darling.
    pub anderson_darling: AndersonDarlingResult,
    /// Jarque-Bera.
    pub jarque_bera: JarqueBeraResult,
    /// Durbin-Watson.
    pub durbin_watson: DurbinWatsonResult,
    /// Runs test.
    pub runs_test: RunsTestResult,
    /// Cook's distance.
    pub cooks_distance: CooksDistanceResult,
    /// AIC/BIC/R^2.
    pub information_criteria: InformationCriteria,
    /// Bootstrap CIs.
    pub bootstrap: BootstrapResult,
    /// Leave-one-out.
    pub loocv: LoocvResult,
    /// Permutation test.
    pub permutation: PermutationResult,
    /// Q-Q correlation.
    pub qq_plot: QqResult,
    /// Power-law fit on the same masses.
    pub power_law: PowerLawFit,
    /// Residual variance of the golden ratio against the power law.
    pub f_test: FTestResult,
    /// BIC comparison of the two models.
    pub model_comparison: ModelComparison,
}

/// Fit a sector and run every test.
pub fn analyze_sector(sector: Sector, config: &ValidationConfig) -> Result<SectorReport> {
    let fermions = sector.fermions();
    let masses: Vec<f64> = fermions.iter().map(|f| f.mass).collect();
    let uncertainties: Vec<f64> = fermions.iter().map(|f| f.uncertainty()).collect();

    let model = GoldenRatioModel;
    let fit = model.fit_and_predict(&masses)?;
    let tests = StatisticalTests::new(masses.clone(), fit.predicted.clone(), Some(uncertainties.clone()))?;

    // Held-out refit: m0 is the first remaining mass; exponents still come
    // from every mass.
    let power_law = PowerLawModel.fit_and_predict(&masses, &config.power_law_charges)?;
    let power_law_residuals: Vec<f64> = power_law.predicted.iter().zip(&masses).map(|(p, e)| p - e).collect();
    let f_test = tests.f_test_variance(&power_law_residuals)?;
    let model_comparison = compare_models(&masses, &power_law.predicted, &fit.predicted)?;

    let loocv = tests.loocv(|i| {
        let m0 = masses.iter().enumerate().find(|&(j, _)| j != i).map(|(_, &m)| m)?;
        Some(model.predict_all(&masses, m0).2)
    });

    let report = SectorReport {
        sector,
        fermions: fermions.iter().map(|f| f.name.to_string()).collect(),
        masses_experimental: masses.clone(),
        uncertainties,
        phi: PHI,
        basic_metrics: tests.basic_metrics(),
        chi_squared: tests.chi_squared(config.n_params),
        kolmogorov_smirnov: tests.kolmogorov_smirnov(),
        anderson_darling: tests.anderson_darling(),
        jarque_bera: tests.jarque_bera(),
        durbin_watson: tests.durbin_watson(),
        runs_test: tests.runs_test(),
        cooks_distance: tests.cooks_distance(config.n_params),
        information_criteria: tests.information_criteria(config.n_params),
        bootstrap: tests.bootstrap(config.n_bootstrap, config.confidence, config.seed),
        loocv,
        permutation: tests.permutation_test(config.n_permutations, config.seed),
        qq_plot: tests.qq_correlation(),
        fit,
        power_law,
        f_test,
        model_comparison,
    };
    tracing::info!(
        sector = %sector,
        mape = report.basic_metrics.mape,
        delta_bic = report.model_comparison.delta_bic,
        preference = ?report.model_comparison.preference,
        "sector analysed"
    );
    Ok(report)
}
