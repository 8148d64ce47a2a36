//! MCMC diagnostics: R-hat, bulk/tail ESS, E-BFMI and quality gates.
//!
//! This module implements:
//! - Split R-hat (Gelman et al.) and the classic unsplit Gelman-Rubin R-hat
//! - Rank-normalized + folded split R-hat (Vehtari et al. 2021), used for gating
//! - Bulk ESS (Geyer initial monotone sequence) and tail ESS
//! - Autocorrelation function, E-BFMI, divergence and treedepth rates

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};

use crate::chain::SamplerResult;
use crate::summary::quantile_sorted;

/// Largest lag of the per-parameter autocorrelation in [`DiagnosticsResult`].
pub const ACF_MAX_LAG: usize = 20;

/// Diagnostics for a multi-chain NUTS run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsResult {
    /// Rank-normalized folded split R-hat per parameter.
    pub r_hat: Vec<f64>,
    /// Classic Gelman-Rubin R-hat per parameter (whole chains, no ranks).
    pub r_hat_classic: Vec<f64>,
    /// Bulk ESS per parameter.
    pub ess_bulk: Vec<f64>,
    /// Tail ESS per parameter.
    pub ess_tail: Vec<f64>,
    /// Number of divergent post-warmup transitions.
    pub n_divergent: usize,
    /// Fraction of divergent transitions.
    pub divergence_rate: f64,
    /// Fraction of transitions hitting max treedepth.
    pub max_treedepth_rate: f64,
    /// E-BFMI per chain (energy Bayesian fraction of missing information).
    pub ebfmi: Vec<f64>,
    /// Autocorrelation per parameter for lags `0..=ACF_MAX_LAG`, averaged over chains.
    #[serde(default)]
    pub autocorrelation: Vec<Vec<f64>>,
}

/// High-level sampling quality status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QualityStatus {
    /// All gates passed.
    Ok,
    /// Some gates emitted warnings.
    Warn,
    /// One or more gates failed.
    Fail,
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityStatus::Ok => write!(f, "ok"),
            QualityStatus::Warn => write!(f, "warn"),
            QualityStatus::Fail => write!(f, "fail"),
        }
    }
}

/// Thresholds for sampling quality gates.
///
/// Loose enough for short runs; production runs are expected to clear the
/// warn levels by a wide margin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityGates {
    /// Require at least this many chains before enabling R-hat/ESS gates.
    pub min_chains: usize,
    /// Require at least this many post-warmup draws per chain before enabling R-hat/ESS/E-BFMI gates.
    pub min_draws_per_chain: usize,

    /// Warn if divergence rate exceeds this threshold.
    pub max_divergence_rate_warn: f64,
    /// Fail if divergence rate exceeds this threshold.
    pub max_divergence_rate_fail: f64,

    /// Warn if max-treedepth rate exceeds this threshold.
    pub max_treedepth_rate_warn: f64,
    /// Fail if max-treedepth rate exceeds this threshold.
    pub max_treedepth_rate_fail: f64,

    /// Warn if max rank-normalized folded R-hat exceeds this threshold.
    pub max_rhat_warn: f64,
    /// Fail if max rank-normalized folded R-hat exceeds this threshold.
    pub max_rhat_fail: f64,

    /// Minimum bulk ESS as a fraction of total draws (n_chains * n_samples).
    pub min_ess_bulk_frac_warn: f64,
    /// Fail if bulk ESS falls below this fraction of total draws.
    pub min_ess_bulk_frac_fail: f64,

    /// Minimum E-BFMI per chain.
    pub min_ebfmi_warn: f64,
    /// Fail if E-BFMI falls below this threshold.
    pub min_ebfmi_fail: f64,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            min_chains: 2,
            min_draws_per_chain: 50,
            max_divergence_rate_warn: 0.01,
            max_divergence_rate_fail: 0.10,
            max_treedepth_rate_warn: 0.05,
            max_treedepth_rate_fail: 0.20,
            max_rhat_warn: 1.10,
            max_rhat_fail: 1.20,
            min_ess_bulk_frac_warn: 0.05,
            min_ess_bulk_frac_fail: 0.01,
            min_ebfmi_warn: 0.30,
            min_ebfmi_fail: 0.20,
        }
    }
}

/// Summary of sampling run quality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualitySummary {
    /// Aggregated status for the run.
    pub status: QualityStatus,
    /// Non-fatal issues (suggests longer warmup/samples or config tuning).
    pub warnings: Vec<String>,
    /// Hard failures (likely invalid or unusable sampling run).
    pub failures: Vec<String>,

    /// Whether R-hat/ESS/E-BFMI gates were enabled for this run.
    pub enabled: bool,
    /// Total post-warmup draws used for diagnostics.
    pub total_draws: usize,
    /// Max rank-normalized folded R-hat across parameters.
    pub max_r_hat: f64,
    /// Min bulk ESS across parameters.
    pub min_ess_bulk: f64,
    /// Min tail ESS across parameters.
    pub min_ess_tail: f64,
    /// Min E-BFMI across chains.
    pub min_ebfmi: f64,
}

fn finite_max(xs: &[f64]) -> f64 {
    xs.iter().copied().filter(|v| v.is_finite()).fold(f64::NEG_INFINITY, f64::max)
}

fn finite_min(xs: &[f64]) -> f64 {
    xs.iter().copied().filter(|v| v.is_finite()).fold(f64::INFINITY, f64::min)
}

fn gate(value: f64, warn: f64, fail: f64, above: bool, name: &str, warnings: &mut Vec<String>, failures: &mut Vec<String>) {
    let (hit_fail, hit_warn) = if above { (value > fail, value > warn) } else { (value < fail, value < warn) };
    if hit_fail {
        failures.push(name.to_string());
    } else if hit_warn {
        warnings.push(name.to_string());
    }
}

/// Compute the quality summary for a sampler run.
pub fn quality_summary(
    diag: &DiagnosticsResult,
    n_chains: usize,
    n_samples: usize,
    gates: &QualityGates,
) -> QualitySummary {
    let total_draws = n_chains.saturating_mul(n_samples);
    let enabled = n_chains >= gates.min_chains && n_samples >= gates.min_draws_per_chain;

    let max_r_hat = finite_max(&diag.r_hat);
    let min_ess_bulk = finite_min(&diag.ess_bulk);
    let min_ess_tail = finite_min(&diag.ess_tail);
    let min_ebfmi = finite_min(&diag.ebfmi);

    let mut warnings = Vec::new();
    let mut failures = Vec::new();

    if !diag.divergence_rate.is_finite() {
        failures.push("divergence_rate_not_finite".to_string());
    }
    if !diag.max_treedepth_rate.is_finite() {
        failures.push("max_treedepth_rate_not_finite".to_string());
    }

    // Divergences / treedepth are meaningful even for shorter runs.
    gate(
        diag.divergence_rate,
        gates.max_divergence_rate_warn,
        gates.max_divergence_rate_fail,
        true,
        "divergence_rate_high",
        &mut warnings,
        &mut failures,
    );
    gate(
        diag.max_treedepth_rate,
        gates.max_treedepth_rate_warn,
        gates.max_treedepth_rate_fail,
        true,
        "max_treedepth_rate_high",
        &mut warnings,
        &mut failures,
    );

    if !enabled {
        warnings.push("gates_disabled_short_run".to_string());
    } else {
        if !max_r_hat.is_finite() {
            failures.push("r_hat_missing".to_string());
        } else {
            gate(max_r_hat, gates.max_rhat_warn, gates.max_rhat_fail, true, "r_hat_high", &mut warnings, &mut failures);
        }

        if !(min_ess_bulk.is_finite() && min_ess_tail.is_finite()) {
            failures.push("ess_missing".to_string());
        } else if total_draws > 0 {
            let warn_thr = gates.min_ess_bulk_frac_warn * (total_draws as f64);
            let fail_thr = gates.min_ess_bulk_frac_fail * (total_draws as f64);
            gate(min_ess_bulk, warn_thr, fail_thr, false, "ess_bulk_low", &mut warnings, &mut failures);
            gate(min_ess_tail, warn_thr, fail_thr, false, "ess_tail_low", &mut warnings, &mut failures);
        }

        if !min_ebfmi.is_finite() {
            warnings.push("ebfmi_not_finite".to_string());
        } else {
            gate(min_ebfmi, gates.min_ebfmi_warn, gates.min_ebfmi_fail, false, "ebfmi_low", &mut warnings, &mut failures);
        }
    }

    let status = if !failures.is_empty() {
        QualityStatus::Fail
    } else if !warnings.is_empty() {
        QualityStatus::Warn
    } else {
        QualityStatus::Ok
    };

    QualitySummary { status, warnings, failures, enabled, total_draws, max_r_hat, min_ess_bulk, min_ess_tail, min_ebfmi }
}

/// Gelman-Rubin potential scale reduction over equal-length chains:
/// `sqrt(((n - 1)/n * W + B/n) / W)`.
fn gelman_rubin(chains: &[&[f64]]) -> f64 {
    let m = chains.len() as f64;
    let n = chains.first().map_or(0, |c| c.len()) as f64;
    if m < 2.0 || n < 2.0 {
        return f64::NAN;
    }

    let chain_means: Vec<f64> = chains.iter().map(|c| c.iter().sum::<f64>() / n).collect();
    let grand_mean: f64 = chain_means.iter().sum::<f64>() / m;

    // Between-chain variance: B = n/(m-1) * sum((chain_mean - grand_mean)^2)
    let b: f64 = chain_means.iter().map(|&cm| (cm - grand_mean).powi(2)).sum::<f64>() * n / (m - 1.0);

    // Within-chain variance: W = mean of chain variances
    let w: f64 = chains
        .iter()
        .zip(&chain_means)
        .map(|(c, &cm)| c.iter().map(|&x| (x - cm).powi(2)).sum::<f64>() / (n - 1.0))
        .sum::<f64>()
        / m;

    if w < 1e-30 {
        return f64::NAN;
    }

    let var_hat_plus = (n - 1.0) / n * w + b / n;
    (var_hat_plus / w).sqrt()
}

/// Compute split R-hat for one parameter across multiple chains.
///
/// Each chain is split in half, giving 2*M half-chains, truncated to a
/// common length.
pub fn r_hat(chains: &[&[f64]]) -> f64 {
    if chains.is_empty() {
        return f64::NAN;
    }

    let mut halves: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        let n = chain.len();
        if n < 4 {
            return f64::NAN;
        }
        let mid = n / 2;
        halves.push(&chain[..mid]);
        halves.push(&chain[mid..]);
    }

    let min_len = halves.iter().map(|c| c.len()).min().unwrap_or(0);
    let halves: Vec<&[f64]> = halves.iter().map(|c| &c[..min_len]).collect();
    gelman_rubin(&halves)
}

/// Classic Gelman-Rubin R-hat on whole chains (no splitting, no ranks).
///
/// Needs at least two chains; returns `NaN` otherwise.
pub fn r_hat_classic(chains: &[&[f64]]) -> f64 {
    let min_len = chains.iter().map(|c| c.len()).min().unwrap_or(0);
    let trimmed: Vec<&[f64]> = chains.iter().map(|c| &c[..min_len]).collect();
    gelman_rubin(&trimmed)
}

fn sort_total(xs: &mut [f64]) {
    xs.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Greater));
}

fn pooled_sorted(chains: &[&[f64]]) -> Vec<f64> {
    let mut all: Vec<f64> = chains.iter().flat_map(|c| c.iter().copied()).collect();
    sort_total(&mut all);
    all
}

fn as_refs(chains: &[Vec<f64>]) -> Vec<&[f64]> {
    chains.iter().map(|c| c.as_slice()).collect()
}

/// Replace draws by normal scores of their pooled ranks (average ranks for ties).
fn rank_normalize(chains: &[&[f64]]) -> Vec<Vec<f64>> {
    let mut out: Vec<Vec<f64>> = chains.iter().map(|c| vec![0.0; c.len()]).collect();
    let Ok(normal) = Normal::new(0.0, 1.0) else {
        return out;
    };

    let mut flat: Vec<(f64, usize, usize)> = chains
        .iter()
        .enumerate()
        .flat_map(|(ci, chain)| chain.iter().enumerate().map(move |(ti, &x)| (x, ci, ti)))
        .collect();
    // NaNs go to the end.
    flat.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Greater));

    let n = flat.len();
    let mut i = 0usize;
    while i < n {
        let mut j = i + 1;
        while j < n && flat[j].0 == flat[i].0 {
            j += 1;
        }

        let rank = 0.5 * ((i + 1) as f64 + j as f64);
        let p = ((rank - 0.375) / (n as f64 + 0.25)).clamp(1e-12, 1.0 - 1e-12);
        let z = normal.inverse_cdf(p);
        for &(_, ci, ti) in &flat[i..j] {
            out[ci][ti] = z;
        }

        i = j;
    }

    out
}

/// Rank-normalized folded split R-hat: the larger of the R-hat of the rank
/// scores and the R-hat of the folded draws `|x - median|`.
pub fn r_hat_rank_normalized_folded(chains: &[&[f64]]) -> f64 {
    if chains.is_empty() || chains.iter().any(|c| c.len() < 4) {
        return f64::NAN;
    }

    let z = rank_normalize(chains);
    let r_rank = r_hat(&as_refs(&z));

    let med = quantile_sorted(&pooled_sorted(chains), 0.5);
    let folded: Vec<Vec<f64>> = chains.iter().map(|c| c.iter().map(|&x| (x - med).abs()).collect()).collect();
    let z_fold = rank_normalize(&as_refs(&folded));
    let r_fold = r_hat(&as_refs(&z_fold));

    r_rank.max(r_fold)
}

fn split_chains_for_ess<'a>(chains: &[&'a [f64]]) -> Option<Vec<&'a [f64]>> {
    if chains.is_empty() {
        return None;
    }

    let mut halves: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for c in chains {
        if c.len() < 8 {
            return None;
        }
        let mid = c.len() / 2;
        halves.push(&c[..mid]);
        halves.push(&c[mid..]);
    }

    let min_len = halves.iter().map(|c| c.len()).min().unwrap_or(0);
    Some(halves.into_iter().map(|c| &c[..min_len]).collect())
}

fn mean_and_var(chain: &[f64]) -> (f64, f64) {
    let n = chain.len() as f64;
    let mean = chain.iter().sum::<f64>() / n;
    let var = chain.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n.max(2.0) - 1.0);
    (mean, var)
}

/// Effective sample size with the multi-chain initial monotone sequence
/// estimator (Geyer) on variogram autocorrelations.
///
/// Chains are split in half first. A constant input has no autocorrelation
/// to measure and reports the draw count.
pub fn ess(chains: &[&[f64]]) -> f64 {
    let Some(split) = split_chains_for_ess(chains) else {
        return 0.0;
    };

    let m = split.len();
    let n = split[0].len();
    let total_draws = (m * n) as f64;

    let (means, vars): (Vec<f64>, Vec<f64>) = split.iter().map(|c| mean_and_var(c)).unzip();
    let m_f = m as f64;
    let n_f = n as f64;
    let mean_all = means.iter().sum::<f64>() / m_f;
    let b = means.iter().map(|&mu| (mu - mean_all).powi(2)).sum::<f64>() * n_f / (m_f - 1.0);
    let w = vars.iter().sum::<f64>() / m_f;
    let var_hat_plus = (n_f - 1.0) / n_f * w + b / n_f;

    if !var_hat_plus.is_finite() || var_hat_plus < 1e-30 {
        return total_draws;
    }

    // rho_t = 1 - V_t / (2 var_hat_plus), V_t the mean squared lag-t difference.
    let mut rho: Vec<f64> = Vec::new();
    for lag in 1..n {
        let sum: f64 = split
            .iter()
            .map(|c| c.windows(lag + 1).map(|w| (w[0] - w[lag]).powi(2)).sum::<f64>())
            .sum();
        let v = sum / (m * (n - lag)) as f64;
        rho.push((1.0 - v / (2.0 * var_hat_plus)).clamp(-1.0, 1.0));

        let k = rho.len();
        if k % 2 == 0 && rho[k - 2] + rho[k - 1] < 0.0 {
            break;
        }
    }

    // Initial positive sequence, then made monotone.
    let mut gammas: Vec<f64> = rho.chunks_exact(2).map(|p| p[0] + p[1]).take_while(|&g| g >= 0.0).collect();
    for k in 1..gammas.len() {
        if gammas[k] > gammas[k - 1] {
            gammas[k] = gammas[k - 1];
        }
    }

    let tau = 1.0 + 2.0 * gammas.iter().sum::<f64>();
    if !tau.is_finite() || tau <= 0.0 {
        return total_draws;
    }

    (total_draws / tau).clamp(1.0, total_draws)
}

/// Bulk ESS: [`ess`] on rank-normalized draws.
pub fn ess_bulk(chains: &[&[f64]]) -> f64 {
    let z = rank_normalize(chains);
    ess(&as_refs(&z))
}

/// Tail ESS: `min(ESS(I[x <= q05]), ESS(I[x >= q95]))`.
pub fn ess_tail(chains: &[&[f64]]) -> f64 {
    if chains.is_empty() {
        return 0.0;
    }

    let all = pooled_sorted(chains);
    let q05 = quantile_sorted(&all, 0.05);
    let q95 = quantile_sorted(&all, 0.95);

    let indicator = |pred: &dyn Fn(f64) -> bool| -> Vec<Vec<f64>> {
        chains.iter().map(|c| c.iter().map(|&x| if pred(x) { 1.0 } else { 0.0 }).collect()).collect()
    };
    let lower = indicator(&|x: f64| x <= q05);
    let upper = indicator(&|x: f64| x >= q95);

    ess(&as_refs(&lower)).min(ess(&as_refs(&upper)))
}

/// Sample autocorrelation of one series for lags `0..=max_lag`
/// (biased estimator, normalised by the lag-0 variance).
///
/// A constant series yields `[1, 0, 0, ...]`.
pub fn autocorrelation(x: &[f64], max_lag: usize) -> Vec<f64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let max_lag = max_lag.min(n - 1);
    let mean = x.iter().sum::<f64>() / n as f64;
    let c0: f64 = x.iter().map(|&v| (v - mean).powi(2)).sum();
    if c0 < 1e-300 {
        let mut acf = vec![0.0; max_lag + 1];
        acf[0] = 1.0;
        return acf;
    }
    (0..=max_lag)
        .map(|lag| x.windows(lag + 1).map(|w| (w[0] - mean) * (w[lag] - mean)).sum::<f64>() / c0)
        .collect()
}

/// Chain-averaged autocorrelation, truncated to the shortest chain.
fn mean_autocorrelation(chains: &[Vec<f64>], max_lag: usize) -> Vec<f64> {
    let per_chain: Vec<Vec<f64>> = chains.iter().map(|c| autocorrelation(c, max_lag)).collect();
    let n_lags = per_chain.iter().map(Vec::len).min().unwrap_or(0);
    (0..n_lags)
        .map(|lag| per_chain.iter().map(|acf| acf[lag]).sum::<f64>() / per_chain.len() as f64)
        .collect()
}

/// Compute E-BFMI (energy Bayesian fraction of missing information) for one chain.
///
/// Definition (Stan): `mean((E_t - E_{t-1})^2) / var(E_t)`.
pub fn ebfmi(energies: &[f64]) -> f64 {
    let n = energies.len();
    if n < 4 {
        return f64::NAN;
    }
    let (_, var) = mean_and_var(energies);
    if var < 1e-30 {
        return f64::NAN;
    }
    let msd = energies.windows(2).map(|w| (w[1] - w[0]).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    msd / var
}

/// Compute full diagnostics for a [`SamplerResult`].
pub fn compute_diagnostics(result: &SamplerResult) -> DiagnosticsResult {
    let n_params = result.param_names.len();

    let mut r_hat_vals = Vec::with_capacity(n_params);
    let mut r_hat_classic_vals = Vec::with_capacity(n_params);
    let mut ess_bulk_vals = Vec::with_capacity(n_params);
    let mut ess_tail_vals = Vec::with_capacity(n_params);
    let mut acf_vals = Vec::with_capacity(n_params);

    for p in 0..n_params {
        let draws = result.param_draws(p);
        acf_vals.push(mean_autocorrelation(&draws, ACF_MAX_LAG));
        let refs = as_refs(&draws);
        r_hat_vals.push(r_hat_rank_normalized_folded(&refs));
        r_hat_classic_vals.push(r_hat_classic(&refs));
        ess_bulk_vals.push(ess_bulk(&refs));
        ess_tail_vals.push(ess_tail(&refs));
    }

    let total_samples: usize = result.chains.iter().map(|c| c.divergences.len()).sum();
    let n_divergent: usize = result.chains.iter().map(|c| c.n_divergent()).sum();
    // Depth is 0-based, so a capped transition reports depth == max_treedepth.
    let n_max_depth: usize = result
        .chains
        .iter()
        .map(|c| c.tree_depths.iter().filter(|&&d| d >= c.max_treedepth).count())
        .sum();
    let rate = |k: usize| if total_samples > 0 { k as f64 / total_samples as f64 } else { 0.0 };

    DiagnosticsResult {
        r_hat: r_hat_vals,
        r_hat_classic: r_hat_classic_vals,
        ess_bulk: ess_bulk_vals,
        ess_tail: ess_tail_vals,
        n_divergent,
        divergence_rate: rate(n_divergent),
        max_treedepth_rate: rate(n_max_depth),
        ebfmi: result.chains.iter().map(|c| ebfmi(&c.energies)).collect(),
        autocorrelation: acf_vals,
    }
}
