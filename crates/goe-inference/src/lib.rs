//! # goe-inference
//!
//! Bayesian inference for the GoE research toolkit.
//!
//! This crate provides:
//! - NUTS (multinomial, windowed adaptation) over any [`goe_core::LogDensityModel`]
//! - The GoE physics log-posterior
//! - Convergence diagnostics, chain health and posterior summaries
//! - The fermion mass validation suite and the muon g-2 prior scan
//!
//! ## Architecture
//!
//! Samplers only see the `LogDensityModel` trait from goe-core; bounded
//! parameters are mapped to unconstrained space by [`Posterior`].

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Adaptation: step-size dual averaging and windowed mass-matrix estimation.
pub mod adapt;
/// Chain storage and multi-chain parallel runner.
pub mod chain;
/// Run configuration (JSON file + defaults).
pub mod config;
/// MCMC diagnostics: split R-hat, bulk/tail ESS, E-BFMI, quality gates.
pub mod diagnostics;
/// GoE physics model and data.
pub mod goe;
/// Chain health and geometric exploration indicators.
pub mod health;
/// HMC leapfrog integrator.
pub mod hmc;
/// NUTS tree-building and sampling.
pub mod nuts;
/// Posterior API: log-pdf, gradient, transforms.
pub mod posterior;
/// Muon g-2 Monte Carlo prior scan.
pub mod scan;
/// Posterior summary report.
pub mod summary;
/// Fermion mass golden-ratio validation suite.
pub mod validation;

#[cfg(test)]
mod testing;

pub use chain::{Chain, SamplerResult, sample_nuts_multichain};
pub use config::RunConfig;
pub use diagnostics::{DiagnosticsResult, QualityGates, QualitySummary};
pub use goe::{GoeData, GoeModel};
pub use health::HealthReport;
pub use nuts::{InitStrategy, MetricKind, NutsConfig, sample_nuts};
pub use posterior::{Posterior, Prior};
pub use scan::{ScanConfig, ScanReport, run_scan};
pub use summary::PosteriorSummary;
pub use validation::{Sector, SectorReport, ValidationConfig, analyze_sector};
