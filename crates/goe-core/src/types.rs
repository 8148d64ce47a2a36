//! Common data types for the GoE toolkit

use serde::{Deserialize, Serialize};

/// How an interval-bounded parameter is mapped to unconstrained space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ParameterScale {
    /// `theta = a + (b - a) * sigmoid(z)`.
    #[default]
    Linear,
    /// `ln(theta) = ln(a) + (ln(b) - ln(a)) * sigmoid(z)`; requires `0 < a < b`.
    Log,
}

/// Posterior summary for a single parameter (constrained space).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSummary {
    /// Parameter name
    pub name: String,
    /// Mean over all chains and draws
    pub mean: f64,
    /// Standard deviation over all chains and draws (population, ddof = 0)
    pub std: f64,
    /// Smallest draw
    pub min: f64,
    /// Largest draw
    pub max: f64,
    /// 5% quantile
    pub q05: f64,
    /// Median
    pub q50: f64,
    /// 95% quantile
    pub q95: f64,
    /// Coefficient of variation `std / |mean|` (`NaN` when the mean is zero)
    pub cv: f64,
    /// Per-chain means
    pub chain_means: Vec<f64>,
    /// Per-chain standard deviations
    pub chain_stds: Vec<f64>,
}

impl ParameterSummary {
    /// Width of the range explored by the draws.
    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    /// Central 90% credible interval `(q05, q95)`.
    pub fn interval_90(&self) -> (f64, f64) {
        (self.q05, self.q95)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_summary_span() {
        let s = ParameterSummary {
            name: "H_sigma".to_string(),
            mean: 0.5,
            std: 0.1,
            min: 0.2,
            max: 0.9,
            q05: 0.3,
            q50: 0.5,
            q95: 0.7,
            cv: 0.2,
            chain_means: vec![0.5],
            chain_stds: vec![0.1],
        };
        assert!((s.span() - 0.7).abs() < 1e-12);
        assert_eq!(s.interval_90(), (0.3, 0.7));
    }

    #[test]
    fn test_scale_serde_lowercase() {
        let s = serde_json::to_string(&ParameterScale::Log).unwrap();
        assert_eq!(s, "\"log\"");
        let back: ParameterScale = serde_json::from_str("\"linear\"").unwrap();
        assert_eq!(back, ParameterScale::Linear);
    }
}
