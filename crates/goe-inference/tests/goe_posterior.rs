//! End-to-end sampling of the GoE posterior and of a user-defined model.

use goe_core::{LogDensityModel, ParameterScale};
use goe_inference::goe::{PARAMETER_BOUNDS, PARAMETER_NAMES};
use goe_inference::{
    GoeData, GoeModel, NutsConfig, Posterior, PosteriorSummary, RunConfig, SamplerResult, sample_nuts,
    sample_nuts_multichain,
};
use std::path::PathBuf;

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../tests/fixtures").join(name)
}

/// Log-normal scale parameter with a bounded support.
struct LogNormalScale {
    mu: f64,
    sigma: f64,
}

impl LogDensityModel for LogNormalScale {
    fn dim(&self) -> usize {
        1
    }

    fn parameter_names(&self) -> Vec<String> {
        vec!["scale".to_string()]
    }

    fn parameter_bounds(&self) -> Vec<(f64, f64)> {
        vec![(1e-3, 1e3)]
    }

    fn parameter_scales(&self) -> Vec<ParameterScale> {
        vec![ParameterScale::Log]
    }

    fn parameter_init(&self) -> Vec<f64> {
        vec![1.0]
    }

    fn nll(&self, params: &[f64]) -> goe_core::Result<f64> {
        let x = params[0];
        if x <= 0.0 {
            return Ok(f64::INFINITY);
        }
        let z = (x.ln() - self.mu) / self.sigma;
        Ok(0.5 * z * z + x.ln())
    }

    fn grad_nll(&self, params: &[f64]) -> goe_core::Result<Vec<f64>> {
        let x = params[0];
        let z = (x.ln() - self.mu) / self.sigma;
        Ok(vec![(z / self.sigma + 1.0) / x])
    }
}

#[test]
fn fixture_data_loads_and_normalises() {
    let data = GoeData::from_path(fixture_path("goe_data.json")).unwrap();
    let dirs = data.pta_dirs.as_ref().unwrap();
    assert_eq!(dirs.len(), 6);
    for d in dirs {
        let n = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
        assert!((n - 1.0).abs() < 1e-12, "direction not normalised: {:?}", d);
    }

    let model = GoeModel::new(data).unwrap();
    assert_eq!(model.parameter_names(), PARAMETER_NAMES.map(String::from).to_vec());
    let init = model.parameter_init();
    assert!(model.log_prob(&init).is_finite());
    let terms = model.terms(&init).unwrap();
    assert!((terms.total() - model.log_prob(&init)).abs() < 1e-9);
}

#[test]
fn run_config_fixture_drives_multichain_sampling() {
    let config = RunConfig::from_path(fixture_path("run_config_small.json")).unwrap();
    assert_eq!(config.chains, 2);

    let model = GoeModel::new(GoeData::from_path(fixture_path("goe_data.json")).unwrap()).unwrap();
    let result = sample_nuts_multichain(
        &model,
        config.chains,
        config.num_warmup,
        config.num_samples,
        config.seed,
        config.nuts_config(),
    )
    .unwrap();

    assert_eq!(result.n_chains(), 2);
    assert_eq!(result.total_draws(), 200);
    for chain in &result.chains {
        assert_eq!(chain.draws_constrained.len(), 100);
        for draw in &chain.draws_constrained {
            for (v, (lo, hi)) in draw.iter().zip(PARAMETER_BOUNDS.iter()) {
                assert!(*lo <= *v && *v <= *hi, "draw {} outside ({}, {})", v, lo, hi);
            }
        }
        assert!(chain.log_densities.iter().all(|lp| lp.is_finite()));
        assert!(chain.step_size > 0.0);
        assert!(chain.tree_depths.iter().all(|&d| d <= 8));
    }

    let summary = PosteriorSummary::from_result(&result);
    assert_eq!(summary.parameters.len(), 5);
    assert_eq!(summary.run.nuts.max_treedepth, 8);
    let h = summary.parameter("H_sigma").unwrap();
    assert!(h.min >= 0.0 && h.max <= 1.0);
}

#[test]
fn bad_config_key_is_rejected() {
    let err = RunConfig::from_path(fixture_path("run_config_bad_key.json")).unwrap_err();
    assert!(matches!(err, goe_core::Error::Json(_)), "{}", err);
}

#[test]
fn sampler_output_survives_json_roundtrip() {
    let model = GoeModel::new(GoeData::synthetic(11)).unwrap();
    let config = NutsConfig { max_treedepth: 7, ..NutsConfig::default() };
    let result = sample_nuts_multichain(&model, 2, 80, 40, 3, config).unwrap();

    let json = serde_json::to_string(&result).unwrap();
    let back: SamplerResult = serde_json::from_str(&json).unwrap();
    assert_eq!(back.param_names, result.param_names);
    assert_eq!(back.n_samples, 40);

    let a = PosteriorSummary::from_result(&result);
    let b = PosteriorSummary::from_result(&back);
    for (pa, pb) in a.parameters.iter().zip(&b.parameters) {
        assert!((pa.mean - pb.mean).abs() <= 1e-12 * pa.mean.abs().max(1e-300), "{}", pa.name);
    }
}

#[test]
fn log_scaled_parameter_is_recovered() {
    let model = LogNormalScale { mu: 1.0, sigma: 0.5 };
    let config = NutsConfig::default();
    let result = sample_nuts_multichain(&model, 2, 400, 1000, 21, config).unwrap();

    let logs: Vec<f64> =
        result.chains.iter().flat_map(|c| c.draws_constrained.iter().map(|d| d[0].ln())).collect();
    let mean = logs.iter().sum::<f64>() / logs.len() as f64;
    let var = logs.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / logs.len() as f64;
    assert!((mean - 1.0).abs() < 0.1, "mean log = {}", mean);
    assert!((var.sqrt() - 0.5).abs() < 0.1, "std log = {}", var.sqrt());
}

#[test]
fn posterior_transform_roundtrip_on_goe_support() {
    let model = GoeModel::new(GoeData::synthetic(1)).unwrap();
    let posterior = Posterior::new(&model);
    let theta = vec![0.4, 1e-4, 1e-30, 1e5, 0.01];
    let z = posterior.to_unconstrained(&theta);
    let back = posterior.to_constrained(&z);
    for (a, b) in theta.iter().zip(&back) {
        assert!((a - b).abs() <= 1e-9 * a.abs(), "{} vs {}", a, b);
    }
    assert!(posterior.logpdf_unconstrained(&z).unwrap().is_finite());
}

#[test]
fn single_chain_matches_first_multichain_chain() {
    let model = GoeModel::new(GoeData::synthetic(5)).unwrap();
    let config = NutsConfig { max_treedepth: 6, ..NutsConfig::default() };
    let multi = sample_nuts_multichain(&model, 2, 40, 20, 99, config.clone()).unwrap();
    let single = sample_nuts(&model, 40, 20, 99, config).unwrap();
    assert_eq!(multi.chains[0].draws_unconstrained, single.draws_unconstrained);
}

#[test]
#[ignore = "slow: multi-thousand-draw GoE run; use `cargo test --release -- --ignored`"]
fn goe_synthetic_run_passes_quality_gates() {
    let model = GoeModel::new(GoeData::synthetic(2025)).unwrap();
    let config = RunConfig { num_warmup: 1000, num_samples: 2000, ..RunConfig::default() };
    let result = sample_nuts_multichain(
        &model,
        config.chains,
        config.num_warmup,
        config.num_samples,
        config.seed,
        config.nuts_config(),
    )
    .unwrap();

    let summary = PosteriorSummary::from_result(&result);
    assert!(!summary.health.any_stuck());
    for (name, r) in result.param_names.iter().zip(&summary.diagnostics.r_hat) {
        assert!(*r < 1.1, "{}: r_hat = {}", name, r);
    }
    assert!(summary.diagnostics.divergence_rate < 0.05, "divergence rate {}", summary.diagnostics.divergence_rate);
}
