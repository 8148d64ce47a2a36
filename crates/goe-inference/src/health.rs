//! Chain health and geometric exploration indicators.
//!
//! These complement the convergence diagnostics with cheap checks that catch
//! frozen chains and collapsed exploration: per-chain log-density spread,
//! R-hat/ESS grades, explored volume and inter-chain separation.

use std::fmt;

use goe_core::ParameterSummary;
use serde::{Deserialize, Serialize};

use crate::chain::SamplerResult;
use crate::diagnostics::DiagnosticsResult;
use crate::summary::{mean, std_pop};

/// Log-density span above which exploration counts as healthy.
pub const HEALTHY_LOG_DENSITY_SPAN: f64 = 5.0;
/// Mean coefficient of variation above which the chains count as mobile.
pub const MOBILE_CV: f64 = 0.01;

/// Mobility of a single chain, graded by the std of its log density.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainStatus {
    /// std > 1.
    Excellent,
    /// std > 0.1.
    Good,
    /// std > 0.
    Low,
    /// The log density never moved.
    Stuck,
}

impl ChainStatus {
    /// Grade a log-density standard deviation.
    pub fn from_log_density_std(std: f64) -> Self {
        if std > 1.0 {
            Self::Excellent
        } else if std > 0.1 {
            Self::Good
        } else if std > 0.0 {
            Self::Low
        } else {
            Self::Stuck
        }
    }
}

impl fmt::Display for ChainStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Excellent => "EXCELLENT",
            Self::Good => "GOOD",
            Self::Low => "LOW",
            Self::Stuck => "STUCK",
        };
        f.write_str(s)
    }
}

/// Grade for R-hat and ESS. The lowest R-hat grade is `Poor`, the lowest
/// ESS grade is `Low`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    /// Meets the target.
    Good,
    /// Usable with care.
    Moderate,
    /// R-hat too high.
    Poor,
    /// Too few effective draws.
    Low,
}

/// `< 1.1` good, `< 1.2` moderate, else poor (NaN is poor).
pub fn grade_r_hat(r_hat: f64) -> Grade {
    if r_hat < 1.1 {
        Grade::Good
    } else if r_hat < 1.2 {
        Grade::Moderate
    } else {
        Grade::Poor
    }
}

/// ESS as a fraction of all draws: `> 0.1` good, `> 0.05` moderate, else low.
pub fn grade_ess(ess: f64, total_draws: usize) -> Grade {
    if total_draws == 0 {
        return Grade::Low;
    }
    let frac = ess / total_draws as f64;
    if frac > 0.1 {
        Grade::Good
    } else if frac > 0.05 {
        Grade::Moderate
    } else {
        Grade::Low
    }
}

/// Log-density statistics and status of one chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealth {
    /// Chain index.
    pub chain_id: usize,
    /// Mean log density.
    pub log_density_mean: f64,
    /// Population std of the log density.
    pub log_density_std: f64,
    /// Smallest log density.
    pub log_density_min: f64,
    /// Largest log density.
    pub log_density_max: f64,
    /// Mobility grade.
    pub status: ChainStatus,
}

impl ChainHealth {
    /// Statistics of one chain's log densities.
    pub fn from_log_densities(chain_id: usize, lp: &[f64]) -> Self {
        let std = std_pop(lp);
        Self {
            chain_id,
            log_density_mean: mean(lp),
            log_density_std: std,
            log_density_min: lp.iter().copied().fold(f64::INFINITY, f64::min),
            log_density_max: lp.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            status: ChainStatus::from_log_density_std(std),
        }
    }
}

/// Geometric exploration indicators over all chains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeometricHealth {
    /// Product of per-parameter ranges (constrained space).
    pub volume_span: f64,
    /// Mean pairwise L2 distance between chain mean vectors (`NaN` for one chain).
    pub chain_separation: f64,
    /// `max - min` of the log density over all draws.
    pub log_density_span: f64,
    /// `log_density_span > 5`.
    pub log_density_healthy: bool,
    /// Mean of per-parameter `std / |mean|`.
    pub mean_cv: f64,
    /// `mean_cv > 0.01`.
    pub mobile: bool,
}

impl GeometricHealth {
    /// Compute from parameter summaries and per-chain log densities.
    pub fn compute(params: &[ParameterSummary], log_densities: &[Vec<f64>]) -> Self {
        let volume_span = params.iter().map(|p| p.span()).product();

        let n_chains = params.first().map_or(0, |p| p.chain_means.len());
        let chain_mean = |c: usize| -> Vec<f64> { params.iter().map(|p| p.chain_means[c]).collect() };
        let mut distances = Vec::new();
        for i in 0..n_chains {
            let a = chain_mean(i);
            for j in (i + 1)..n_chains {
                let b = chain_mean(j);
                distances.push(a.iter().zip(&b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt());
            }
        }
        let chain_separation = if distances.is_empty() { f64::NAN } else { mean(&distances) };

        let lp_all: Vec<f64> = log_densities.iter().flatten().copied().collect();
        let log_density_span = if lp_all.is_empty() {
            0.0
        } else {
            lp_all.iter().copied().fold(f64::NEG_INFINITY, f64::max)
                - lp_all.iter().copied().fold(f64::INFINITY, f64::min)
        };

        let cvs: Vec<f64> = params.iter().map(|p| p.cv).collect();
        let mean_cv = mean(&cvs);

        Self {
            volume_span,
            chain_separation,
            log_density_span,
            log_density_healthy: log_density_span > HEALTHY_LOG_DENSITY_SPAN,
            mean_cv,
            mobile: mean_cv > MOBILE_CV,
        }
    }
}

/// Full health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    /// Per-chain log-density status.
    pub chains: Vec<ChainHealth>,
    /// R-hat grade per parameter (rank-normalized folded R-hat).
    pub r_hat_grades: Vec<Grade>,
    /// Bulk-ESS grade per parameter.
    pub ess_grades: Vec<Grade>,
    /// Geometric indicators.
    pub geometry: GeometricHealth,
}

impl HealthReport {
    /// `true` if any chain never moved.
    pub fn any_stuck(&self) -> bool {
        self.chains.iter().any(|c| c.status == ChainStatus::Stuck)
    }
}

/// Assess chain health for a run whose parameter summaries and diagnostics
/// are already computed.
pub fn assess(result: &SamplerResult, params: &[ParameterSummary], diag: &DiagnosticsResult) -> HealthReport {
    let log_densities = result.log_density_draws();
    let chains: Vec<ChainHealth> =
        log_densities.iter().enumerate().map(|(i, lp)| ChainHealth::from_log_densities(i, lp)).collect();

    for c in chains.iter().filter(|c| c.status == ChainStatus::Stuck) {
        tracing::warn!(chain_id = c.chain_id, "chain is stuck: log density never changed");
    }

    let total = result.total_draws();
    HealthReport {
        chains,
        r_hat_grades: diag.r_hat.iter().map(|&r| grade_r_hat(r)).collect(),
        ess_grades: diag.ess_bulk.iter().map(|&e| grade_ess(e, total)).collect(),
        geometry: GeometricHealth::compute(params, &log_densities),
    }
}
