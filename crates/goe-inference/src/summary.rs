//! Posterior summary report for a finished sampling run.

use goe_core::ParameterSummary;
use serde::{Deserialize, Serialize};

use crate::chain::SamplerResult;
use crate::diagnostics::{DiagnosticsResult, QualityGates, QualitySummary, compute_diagnostics, quality_summary};
use crate::health::{HealthReport, assess};
use crate::nuts::NutsConfig;

/// Arithmetic mean (`NaN` for empty input).
pub(crate) fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Population standard deviation (ddof = 0).
pub(crate) fn std_pop(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return f64::NAN;
    }
    let m = mean(xs);
    (xs.iter().map(|&x| (x - m).powi(2)).sum::<f64>() / xs.len() as f64).sqrt()
}

/// Linearly interpolated quantile of an ascending slice.
pub(crate) fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Summarise one parameter given its draws per chain.
pub fn summarize_parameter(name: &str, chains: &[Vec<f64>]) -> ParameterSummary {
    let mut all: Vec<f64> = chains.iter().flatten().copied().collect();
    all.sort_by(f64::total_cmp);
    let m = mean(&all);
    let std = std_pop(&all);

    ParameterSummary {
        name: name.to_string(),
        mean: m,
        std,
        min: all.first().copied().unwrap_or(f64::NAN),
        max: all.last().copied().unwrap_or(f64::NAN),
        q05: quantile_sorted(&all, 0.05),
        q50: quantile_sorted(&all, 0.5),
        q95: quantile_sorted(&all, 0.95),
        cv: if m != 0.0 { std / m.abs() } else { f64::NAN },
        chain_means: chains.iter().map(|c| mean(c)).collect(),
        chain_stds: chains.iter().map(|c| std_pop(c)).collect(),
    }
}

/// Log-density statistics over all draws and per chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogDensitySummary {
    /// Mean over all draws.
    pub mean: f64,
    /// Population std over all draws.
    pub std: f64,
    /// Smallest value.
    pub min: f64,
    /// Largest value.
    pub max: f64,
    /// Per-chain means.
    pub chain_means: Vec<f64>,
    /// Per-chain standard deviations.
    pub chain_stds: Vec<f64>,
}

/// Run configuration echoed into the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEcho {
    /// Number of chains.
    pub chains: usize,
    /// Warmup iterations per chain.
    pub n_warmup: usize,
    /// Post-warmup draws per chain.
    pub n_samples: usize,
    /// Base seed.
    pub seed: u64,
    /// Sampler settings.
    pub nuts: NutsConfig,
    /// Final step size per chain.
    pub step_sizes: Vec<f64>,
}

/// Everything `goe analyze` reports about a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PosteriorSummary {
    /// Per-parameter summaries, in model order.
    pub parameters: Vec<ParameterSummary>,
    /// Log-density statistics.
    pub log_density: LogDensitySummary,
    /// Convergence diagnostics.
    pub diagnostics: DiagnosticsResult,
    /// Quality gates outcome.
    pub quality: QualitySummary,
    /// Chain health and geometric indicators.
    pub health: HealthReport,
    /// Run configuration.
    pub run: RunEcho,
}

impl PosteriorSummary {
    /// Summarise with the default quality gates.
    pub fn from_result(result: &SamplerResult) -> Self {
        Self::from_result_with_gates(result, &QualityGates::default())
    }

    /// Summarise with explicit quality gates.
    pub fn from_result_with_gates(result: &SamplerResult, gates: &QualityGates) -> Self {
        let parameters: Vec<ParameterSummary> = result
            .param_names
            .iter()
            .enumerate()
            .map(|(i, name)| summarize_parameter(name, &result.param_draws(i)))
            .collect();

        let lps = result.log_density_draws();
        let all: Vec<f64> = lps.iter().flatten().copied().collect();
        let log_density = LogDensitySummary {
            mean: mean(&all),
            std: std_pop(&all),
            min: all.iter().copied().fold(f64::INFINITY, f64::min),
            max: all.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            chain_means: lps.iter().map(|c| mean(c)).collect(),
            chain_stds: lps.iter().map(|c| std_pop(c)).collect(),
        };

        let diagnostics = compute_diagnostics(result);
        let quality = quality_summary(&diagnostics, result.n_chains(), result.n_samples, gates);
        for w in &quality.warnings {
            tracing::warn!(gate = %w, "quality gate warning");
        }
        for f in &quality.failures {
            tracing::warn!(gate = %f, "quality gate failed");
        }
        let health = assess(result, &parameters, &diagnostics);

        let run = RunEcho {
            chains: result.n_chains(),
            n_warmup: result.n_warmup,
            n_samples: result.n_samples,
            seed: result.seed,
            nuts: result.config.clone(),
            step_sizes: result.chains.iter().map(|c| c.step_size).collect(),
        };

        Self { parameters, log_density, diagnostics, quality, health, run }
    }

    /// Summary for a parameter by name.
    pub fn parameter(&self, name: &str) -> Option<&ParameterSummary> {
        self.parameters.iter().find(|p| p.name == name)
    }
}
