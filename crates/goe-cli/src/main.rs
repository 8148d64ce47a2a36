//! GoE CLI

use anyhow::{Result, bail};
use clap::{Parser, Subcommand, ValueEnum};
use goe_inference::health::ChainHealth;
use goe_inference::validation::analyze_sector;
use goe_inference::{
    GoeData, GoeModel, MetricKind, PosteriorSummary, RunConfig, SamplerResult, ScanConfig, Sector,
    ValidationConfig, run_scan, sample_nuts_multichain,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "goe")]
#[command(about = "GoE - NUTS posterior sampling and statistical validation")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the GoE posterior with multi-chain NUTS
    Sample {
        /// Observational data (JSON)
        #[arg(short, long, conflicts_with = "synthetic")]
        data: Option<PathBuf>,

        /// Use the built-in synthetic dataset instead of `--data`
        #[arg(long)]
        synthetic: bool,

        /// Seed for the synthetic dataset
        #[arg(long, default_value = "42")]
        data_seed: u64,

        /// Run configuration (JSON). Flags below override it.
        #[arg(short, long)]
        config: Option<PathBuf>,

        #[command(flatten)]
        overrides: RunOverrides,

        /// Output file for sampler output (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Also write the posterior summary here.
        #[arg(long)]
        summary: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Summarise a saved sampler output
    Analyze {
        /// Sampler output written by `goe sample`
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for the summary (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Golden-ratio fermion mass validation
    Validate {
        /// Sector to analyse (repeatable). Defaults to all sectors.
        #[arg(long = "sector")]
        sectors: Vec<Sector>,

        /// Bootstrap resamples
        #[arg(long, default_value = "10000")]
        bootstrap: usize,

        /// Permutations
        #[arg(long, default_value = "10000")]
        permutations: usize,

        /// Seed for bootstrap and permutations
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Monte Carlo prior scan of the muon g-2 contribution
    Scan {
        /// Prior draws
        #[arg(long, default_value = "1000000")]
        points: usize,

        /// Draws per parallel batch
        #[arg(long, default_value = "10000")]
        batch_size: usize,

        /// Base seed
        #[arg(long, default_value = "123")]
        seed: u64,

        /// Output file for the report (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Threads (0 = auto).
        #[arg(long, default_value = "0")]
        threads: usize,
    },

    /// Print version
    Version,
}

/// Command-line overrides of [`RunConfig`] fields.
#[derive(clap::Args, Debug, Default)]
struct RunOverrides {
    /// Warmup iterations per chain
    #[arg(long)]
    num_warmup: Option<usize>,

    /// Post-warmup draws per chain
    #[arg(long)]
    num_samples: Option<usize>,

    /// Number of chains
    #[arg(long)]
    chains: Option<usize>,

    /// Dual-averaging target acceptance
    #[arg(long)]
    target_accept: Option<f64>,

    /// Maximum tree depth
    #[arg(long)]
    max_tree_depth: Option<usize>,

    /// Initial step size
    #[arg(long)]
    init_step: Option<f64>,

    /// Base seed (chain i uses seed + i)
    #[arg(long)]
    seed: Option<u64>,

    /// Mass matrix adapted during warmup
    #[arg(long, value_enum)]
    metric: Option<MetricArg>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum MetricArg {
    Diag,
    Dense,
}

impl From<MetricArg> for MetricKind {
    fn from(m: MetricArg) -> Self {
        match m {
            MetricArg::Diag => MetricKind::Diag,
            MetricArg::Dense => MetricKind::Dense,
        }
    }
}

impl RunOverrides {
    fn apply(&self, config: &mut RunConfig) {
        if let Some(v) = self.num_warmup {
            config.num_warmup = v;
        }
        if let Some(v) = self.num_samples {
            config.num_samples = v;
        }
        if let Some(v) = self.chains {
            config.chains = v;
        }
        if let Some(v) = self.target_accept {
            config.target_accept = v;
        }
        if let Some(v) = self.max_tree_depth {
            config.max_tree_depth = v;
        }
        if let Some(v) = self.init_step {
            config.init_step = Some(v);
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
        if let Some(v) = self.metric {
            config.metric = v.into();
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_target(false).init();

    match cli.command {
        Commands::Sample { data, synthetic, data_seed, config, overrides, output, summary, threads } => {
            let data = load_data(data.as_ref(), synthetic, data_seed)?;
            let config = load_config(config.as_ref(), &overrides)?;
            init_threads(threads);
            cmd_sample(data, &config, output.as_ref(), summary.as_ref())
        }
        Commands::Analyze { input, output } => cmd_analyze(&input, output.as_ref()),
        Commands::Validate { sectors, bootstrap, permutations, seed, output } => {
            let config =
                ValidationConfig { n_bootstrap: bootstrap, n_permutations: permutations, seed, ..Default::default() };
            cmd_validate(&sectors, &config, output.as_ref())
        }
        Commands::Scan { points, batch_size, seed, output, threads } => {
            init_threads(threads);
            cmd_scan(&ScanConfig { n_points: points, batch_size, seed }, output.as_ref())
        }
        Commands::Version => {
            println!("goe {}", goe_core::VERSION);
            Ok(())
        }
    }
}

fn init_threads(threads: usize) {
    if threads > 0 {
        // Best-effort; if a global pool already exists, keep going.
        let _ = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global();
    }
}

fn load_data(path: Option<&PathBuf>, synthetic: bool, data_seed: u64) -> Result<GoeData> {
    match (path, synthetic) {
        (Some(path), _) => {
            tracing::info!(path = %path.display(), "loading data");
            Ok(GoeData::from_path(path)?)
        }
        (None, true) => {
            tracing::info!(data_seed, "using synthetic data");
            Ok(GoeData::synthetic(data_seed))
        }
        (None, false) => bail!("either --data <FILE> or --synthetic is required"),
    }
}

fn load_config(path: Option<&PathBuf>, overrides: &RunOverrides) -> Result<RunConfig> {
    let mut config = match path {
        Some(path) => RunConfig::from_path(path)?,
        None => RunConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn write_json<T: Serialize>(output: Option<&PathBuf>, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    if let Some(path) = output {
        std::fs::write(path, text)?;
    } else {
        println!("{}", text);
    }
    Ok(())
}

fn cmd_sample(
    data: GoeData,
    config: &RunConfig,
    output: Option<&PathBuf>,
    summary: Option<&PathBuf>,
) -> Result<()> {
    let model = GoeModel::new(data)?;
    let result = sample_nuts_multichain(
        &model,
        config.chains,
        config.num_warmup,
        config.num_samples,
        config.seed,
        config.nuts_config(),
    )?;

    for (chain_id, chain) in result.chains.iter().enumerate() {
        let health = ChainHealth::from_log_densities(chain_id, &chain.log_densities);
        tracing::info!(
            chain_id,
            status = %health.status,
            log_density_mean = health.log_density_mean,
            log_density_std = health.log_density_std,
            step_size = chain.step_size,
            divergences = chain.n_divergent(),
            "chain status"
        );
    }

    write_json(output, &result)?;
    if let Some(path) = summary {
        let s = PosteriorSummary::from_result(&result);
        tracing::info!(status = ?s.quality.status, "posterior summary written");
        write_json(Some(path), &s)?;
    }
    Ok(())
}

fn cmd_analyze(input: &PathBuf, output: Option<&PathBuf>) -> Result<()> {
    tracing::info!(path = %input.display(), "loading sampler output");
    let json = std::fs::read_to_string(input)?;
    let result: SamplerResult = serde_json::from_str(&json)?;
    result.validate()?;
    let summary = PosteriorSummary::from_result(&result);
    write_json(output, &summary)
}

fn cmd_validate(sectors: &[Sector], config: &ValidationConfig, output: Option<&PathBuf>) -> Result<()> {
    let sectors: Vec<Sector> = if sectors.is_empty() { Sector::ALL.to_vec() } else { sectors.to_vec() };
    let mut reports = serde_json::Map::new();
    for sector in sectors {
        let report = analyze_sector(sector, config)?;
        reports.insert(sector.to_string(), serde_json::to_value(&report)?);
    }
    write_json(output, &serde_json::Value::Object(reports))
}

fn cmd_scan(config: &ScanConfig, output: Option<&PathBuf>) -> Result<()> {
    let report = run_scan(config)?;
    write_json(output, &report)
}
