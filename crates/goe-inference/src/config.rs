//! Run configuration for a full sampling job.

use std::path::Path;

use goe_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::nuts::{InitStrategy, MetricKind, NutsConfig};

/// Deepest tree a run may request; `2^30` leapfrog steps per draw is already absurd.
pub const MAX_TREE_DEPTH_LIMIT: usize = 30;

/// Sampling job settings. Defaults reproduce the production run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Warmup iterations per chain.
    pub num_warmup: usize,
    /// Post-warmup draws per chain.
    pub num_samples: usize,
    /// Number of chains.
    pub chains: usize,
    /// Dual-averaging target acceptance.
    pub target_accept: f64,
    /// Maximum number of trajectory doublings.
    pub max_tree_depth: usize,
    /// Starting point of the step-size search (sampler default when absent).
    pub init_step: Option<f64>,
    /// Base seed; chain `i` uses `seed + i`.
    pub seed: u64,
    /// Initial position policy.
    pub init: InitStrategy,
    /// Metric adapted during warmup.
    pub metric: MetricKind,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_warmup: 1200,
            num_samples: 15000,
            chains: 4,
            target_accept: 0.95,
            max_tree_depth: 15,
            init_step: Some(0.05),
            seed: 2025,
            init: InitStrategy::default(),
            metric: MetricKind::default(),
        }
    }
}

impl RunConfig {
    /// Parse from JSON text and validate.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a JSON file and validate.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    /// Check ranges.
    pub fn validate(&self) -> Result<()> {
        if self.chains == 0 {
            return Err(Error::Validation("chains must be >= 1".to_string()));
        }
        if self.num_samples == 0 {
            return Err(Error::Validation("num_samples must be >= 1".to_string()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(Error::Validation(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        if let Some(step) = self.init_step {
            if !(step.is_finite() && step > 0.0) {
                return Err(Error::Validation(format!("init_step must be > 0, got {}", step)));
            }
        }
        if self.max_tree_depth == 0 || self.max_tree_depth > MAX_TREE_DEPTH_LIMIT {
            return Err(Error::Validation(format!(
                "max_tree_depth must be in 1..={}, got {}",
                MAX_TREE_DEPTH_LIMIT, self.max_tree_depth
            )));
        }
        self.nuts_config().validate()
    }

    /// Sampler settings for each chain.
    pub fn nuts_config(&self) -> NutsConfig {
        let defaults = NutsConfig::default();
        NutsConfig {
            max_treedepth: self.max_tree_depth,
            target_accept: self.target_accept,
            init_step: self.init_step.unwrap_or(defaults.init_step),
            init: self.init,
            metric: self.metric,
        }
    }
}
