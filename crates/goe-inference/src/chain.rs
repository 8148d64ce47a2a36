//! Chain storage and multi-chain runner.

use crate::nuts::{NutsConfig, sample_nuts};
use goe_core::{Error, Result};
use goe_core::traits::LogDensityModel;
use serde::{Deserialize, Serialize};

/// Raw MCMC chain from one NUTS run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Chain {
    /// Draws in unconstrained space.
    pub draws_unconstrained: Vec<Vec<f64>>,
    /// Draws in constrained (model) space.
    pub draws_constrained: Vec<Vec<f64>>,
    /// Unconstrained log density (posterior + log-Jacobian) per draw.
    pub log_densities: Vec<f64>,
    /// Divergence flag per draw.
    pub divergences: Vec<bool>,
    /// Depth of the last subtree built per draw (0-based).
    pub tree_depths: Vec<usize>,
    /// Leapfrog steps per draw.
    pub n_leapfrogs: Vec<usize>,
    /// Acceptance statistic per draw.
    pub accept_probs: Vec<f64>,
    /// Hamiltonian at the start of each transition (after momentum resampling).
    pub energies: Vec<f64>,
    /// Divergent transitions during warmup.
    #[serde(default)]
    pub warmup_divergences: usize,
    /// Configured maximum tree depth for this chain (for diagnostics).
    pub max_treedepth: usize,
    /// Final adapted step size.
    pub step_size: f64,
    /// Final adapted mass matrix diagonal.
    pub mass_diag: Vec<f64>,
}

impl Chain {
    pub(crate) fn with_capacity(n: usize, max_treedepth: usize, step_size: f64, mass_diag: Vec<f64>) -> Self {
        Self {
            draws_unconstrained: Vec::with_capacity(n),
            draws_constrained: Vec::with_capacity(n),
            log_densities: Vec::with_capacity(n),
            divergences: Vec::with_capacity(n),
            tree_depths: Vec::with_capacity(n),
            n_leapfrogs: Vec::with_capacity(n),
            accept_probs: Vec::with_capacity(n),
            energies: Vec::with_capacity(n),
            warmup_divergences: 0,
            max_treedepth,
            step_size,
            mass_diag,
        }
    }

    /// Number of post-warmup draws.
    pub fn len(&self) -> usize {
        self.draws_constrained.len()
    }

    /// `true` if the chain holds no draws.
    pub fn is_empty(&self) -> bool {
        self.draws_constrained.is_empty()
    }

    /// Number of divergent post-warmup transitions.
    pub fn n_divergent(&self) -> usize {
        self.divergences.iter().filter(|&&d| d).count()
    }

    /// Mean acceptance statistic.
    pub fn mean_accept_prob(&self) -> f64 {
        if self.accept_probs.is_empty() {
            return f64::NAN;
        }
        self.accept_probs.iter().sum::<f64>() / self.accept_probs.len() as f64
    }
}

/// Result of a multi-chain NUTS sampling run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplerResult {
    /// Parameter names.
    pub param_names: Vec<String>,
    /// Individual chains, in chain order.
    pub chains: Vec<Chain>,
    /// Number of warmup iterations per chain.
    pub n_warmup: usize,
    /// Number of post-warmup samples per chain.
    pub n_samples: usize,
    /// Base seed; chain `i` ran with `seed + i`.
    pub seed: u64,
    /// Sampler configuration shared by all chains.
    pub config: NutsConfig,
}

impl SamplerResult {
    /// Number of chains.
    pub fn n_chains(&self) -> usize {
        self.chains.len()
    }

    /// Total number of post-warmup draws across all chains.
    pub fn total_draws(&self) -> usize {
        self.chains.iter().map(|c| c.draws_constrained.len()).sum()
    }

    /// Get draws for a single parameter (index) across all chains.
    pub fn param_draws(&self, param_idx: usize) -> Vec<Vec<f64>> {
        self.chains
            .iter()
            .map(|c| c.draws_constrained.iter().map(|d| d[param_idx]).collect())
            .collect()
    }

    /// Mean of a parameter across all draws and chains.
    pub fn param_mean(&self, param_idx: usize) -> f64 {
        let draws = self.param_draws(param_idx);
        let n: usize = draws.iter().map(|c| c.len()).sum();
        let sum: f64 = draws.iter().flat_map(|c| c.iter()).sum();
        sum / n as f64
    }

    /// Log densities per chain.
    pub fn log_density_draws(&self) -> Vec<Vec<f64>> {
        self.chains.iter().map(|c| c.log_densities.clone()).collect()
    }

    /// Check that every draw has one value per parameter and that each
    /// chain's per-draw vectors line up. Results read from disk must pass
    /// this before any accessor indexes into them.
    pub fn validate(&self) -> Result<()> {
        let dim = self.param_names.len();
        if self.chains.is_empty() {
            return Err(Error::Validation("sampler output has no chains".to_string()));
        }
        for (chain_id, c) in self.chains.iter().enumerate() {
            let n = c.draws_constrained.len();
            let lengths = [
                ("draws_unconstrained", c.draws_unconstrained.len()),
                ("log_densities", c.log_densities.len()),
                ("divergences", c.divergences.len()),
                ("tree_depths", c.tree_depths.len()),
                ("n_leapfrogs", c.n_leapfrogs.len()),
                ("accept_probs", c.accept_probs.len()),
                ("energies", c.energies.len()),
            ];
            for (field, len) in lengths {
                if len != n {
                    return Err(Error::Validation(format!(
                        "chain {}: {} has {} entries but draws_constrained has {}",
                        chain_id, field, len, n
                    )));
                }
            }
            let draws = c.draws_constrained.iter().chain(&c.draws_unconstrained);
            if let Some(bad) = draws.map(|d| d.len()).find(|&len| len != dim) {
                return Err(Error::Validation(format!(
                    "chain {}: draw has {} values but there are {} parameters",
                    chain_id, bad, dim
                )));
            }
        }
        Ok(())
    }

    /// Index of a parameter by name.
    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|n| n == name)
    }
}

/// Run NUTS sampling on multiple chains in parallel via Rayon.
///
/// Each chain gets seed `seed + chain_id`.
pub fn sample_nuts_multichain(
    model: &(impl LogDensityModel + Sync),
    n_chains: usize,
    n_warmup: usize,
    n_samples: usize,
    seed: u64,
    config: NutsConfig,
) -> Result<SamplerResult> {
    use rayon::prelude::*;

    config.validate()?;
    if n_chains == 0 {
        return Err(Error::Validation("n_chains must be >= 1".to_string()));
    }
    tracing::info!(n_chains, n_warmup, n_samples, seed, dim = model.dim(), "starting NUTS");

    let chains: Vec<Result<Chain>> = (0..n_chains)
        .into_par_iter()
        .map(|chain_id| {
            let chain_seed = seed.wrapping_add(chain_id as u64);
            let chain = sample_nuts(model, n_warmup, n_samples, chain_seed, config.clone())?;
            tracing::debug!(
                chain_id,
                step_size = chain.step_size,
                divergences = chain.n_divergent(),
                mean_accept = chain.mean_accept_prob(),
                "chain finished"
            );
            Ok(chain)
        })
        .collect();

    let chains: Vec<Chain> = chains.into_iter().collect::<Result<Vec<_>>>()?;

    let param_names: Vec<String> = model.parameter_names();

    Ok(SamplerResult { param_names, chains, n_warmup, n_samples, seed, config })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goe::{GoeData, GoeModel};
    use crate::testing::GaussianModel;

    #[test]
    fn test_multichain_deterministic() {
        let model = GoeModel::new(GoeData::synthetic(2025)).unwrap();
        let config = NutsConfig { max_treedepth: 8, ..NutsConfig::default() };
        let r1 = sample_nuts_multichain(&model, 2, 50, 20, 42, config.clone()).unwrap();
        let r2 = sample_nuts_multichain(&model, 2, 50, 20, 42, config).unwrap();

        for (c1, c2) in r1.chains.iter().zip(r2.chains.iter()) {
            assert_eq!(c1.draws_constrained, c2.draws_constrained, "Multi-chain should be deterministic");
        }
    }

    #[test]
    fn test_chain_i_matches_single_chain_with_offset_seed() {
        let model = GaussianModel::new(vec![0.0, 1.0], vec![1.0, 2.0]);
        let config = NutsConfig::default();
        let result = sample_nuts_multichain(&model, 3, 60, 30, 100, config.clone()).unwrap();
        let single = sample_nuts(&model, 60, 30, 102, config).unwrap();
        assert_eq!(result.chains[2].draws_unconstrained, single.draws_unconstrained);
        assert_ne!(result.chains[0].draws_unconstrained, result.chains[1].draws_unconstrained);
    }

    #[test]
    fn test_multichain_basic() {
        let model = GaussianModel::new(vec![2.0], vec![0.5]);
        let result = sample_nuts_multichain(&model, 2, 200, 400, 42, NutsConfig::default()).unwrap();

        assert_eq!(result.n_chains(), 2);
        assert_eq!(result.n_warmup, 200);
        assert_eq!(result.n_samples, 400);
        assert_eq!(result.total_draws(), 800);
        assert_eq!(result.param_names, vec!["x0".to_string()]);
        assert_eq!(result.param_index("x0"), Some(0));
        assert_eq!(result.param_index("nope"), None);

        let mean = result.param_mean(0);
        assert!((mean - 2.0).abs() < 0.1, "mean={}", mean);
        let lds = result.log_density_draws();
        assert_eq!(lds.len(), 2);
        assert_eq!(lds[0].len(), 400);
    }

    #[test]
    fn test_sampler_result_json_roundtrip() {
        let model = GaussianModel::new(vec![0.0], vec![1.0]);
        let result = sample_nuts_multichain(&model, 1, 20, 10, 9, NutsConfig::default()).unwrap();
        let json = serde_json::to_string(&result).unwrap();
        let back: SamplerResult = serde_json::from_str(&json).unwrap();
        assert_eq!(back.chains[0].len(), 10);
        for (a, b) in back.chains[0].draws_constrained.iter().zip(&result.chains[0].draws_constrained) {
            assert!((a[0] - b[0]).abs() <= 1e-12 * b[0].abs().max(1.0));
        }
        assert_eq!(back.config, result.config);
        assert_eq!(back.seed, 9);
    }

    #[test]
    fn test_zero_chains_rejected() {
        let model = GaussianModel::new(vec![0.0], vec![1.0]);
        assert!(sample_nuts_multichain(&model, 0, 10, 10, 0, NutsConfig::default()).is_err());
    }

    #[test]
    fn test_validate_rejects_ragged_output() {
        let model = GaussianModel::new(vec![0.0, 1.0], vec![1.0, 1.0]);
        let result = sample_nuts_multichain(&model, 2, 20, 10, 3, NutsConfig::default()).unwrap();
        result.validate().unwrap();

        let mut short_draw = result.clone();
        short_draw.chains[1].draws_constrained[4].truncate(1);
        let err = short_draw.validate().unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("chain 1"), "{}", err);

        let mut short_field = result.clone();
        short_field.chains[0].energies.pop();
        assert!(matches!(short_field.validate(), Err(Error::Validation(_))));

        let mut no_chains = result;
        no_chains.chains.clear();
        assert!(no_chains.validate().is_err());
    }
}
