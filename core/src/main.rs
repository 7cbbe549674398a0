//! PFILTER: particle-filter likelihood evaluation for POMP models from the command line.
//!
//! - `run` evaluates the log-likelihood of a built-in model for a data file, optionally
//!   over several independent replicates.
//! - `simulate` draws a synthetic data set from a built-in model.
//! - `config` writes a filter configuration template (TOML/JSON/YAML).
//!
//! Filter settings come from `--config` when given; command-line flags override them.

mod common;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use common::{init_logger, parse_values, validate_input_path, validate_output_path};
use log::{error, info};
use nalgebra::DVector;
use pomp::ObservationSampler;
use pomp::config::{FilterConfig, FilterOutputs};
use pomp::data::Observations;
use pomp::filter::ParticleFilter;
use pomp::models::ModelKind;
use pomp::models::linear_gaussian::LinearGaussianModel;
use pomp::models::sir::SirModel;
use pomp::particle::ResamplingStrategy;
use pomp::replicate::replicate;
use pomp::simulate::simulate;

const LONG_ABOUT: &str = "PFILTER: particle-filter likelihood evaluation for partially observed Markov process models.

Estimates the log-likelihood of a built-in model (a stochastic SIR epidemic or a
linear-Gaussian state-space model) for a time series stored as CSV, using a bootstrap
particle filter. Replicate runs are combined with log-mean-exp and reported with a
jackknife standard error.

Filter settings can be loaded from a configuration file (TOML/JSON/YAML) with --config;
any flag given on the command line takes precedence over the file.";

/// Command line arguments
#[derive(Parser, Debug)]
#[command(author, version, about = "Particle-filter likelihood evaluation for POMP models.", long_about = LONG_ABOUT)]
struct Cli {
    /// Filter configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    #[command(
        about = "Estimate the log-likelihood of a model for a data set",
        long_about = "Run the particle filter on the observations in a CSV file. With more than one replicate, independent runs are combined on the likelihood scale (log-mean-exp) and a jackknife standard error is reported."
    )]
    Run(RunArgs),
    #[command(about = "Simulate a data set from a model")]
    Simulate(SimulateArgs),
    #[command(about = "Write a filter configuration template")]
    Config(ConfigArgs),
}

/// Model selection shared by `run` and `simulate`.
#[derive(Args, Debug, Clone)]
struct ModelArgs {
    /// Built-in model
    #[arg(long, value_enum)]
    model: ModelKind,

    /// Comma-separated parameter vector. SIR: beta,mu_ir,rho,eta,pop. Linear-Gaussian:
    /// A (row-major),C (row-major),process sd,measurement sd,initial mean,initial sd
    #[arg(long, allow_hyphen_values = true)]
    params: String,

    /// Largest Euler sub-step of the SIR model
    #[arg(long, default_value_t = 1.0 / 7.0)]
    substep: f64,
}

#[derive(Args, Debug, Clone)]
struct FilterArgs {
    /// Number of particles
    #[arg(short = 'j', long)]
    particles: Option<usize>,
    /// Master random seed
    #[arg(long)]
    seed: Option<u64>,
    /// Number of independent replicate runs
    #[arg(short, long)]
    replicates: Option<usize>,
    /// Resampling strategy
    #[arg(long, value_enum)]
    resampling: Option<ResamplingStrategy>,
    /// Abort once more than this many steps have collapsed
    #[arg(long)]
    max_collapses: Option<usize>,
    /// Run particles and replicates on all cores
    #[arg(long)]
    parallel: bool,
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    filter: FilterArgs,

    /// Input CSV file with a header row
    #[arg(short, long)]
    input: PathBuf,

    /// Column holding observation times
    #[arg(long, default_value = "time")]
    time_column: String,

    /// Comma-separated columns forming each observation
    #[arg(long, default_value = "y")]
    value_columns: String,

    /// Start time of the latent process (defaults to one observation spacing before
    /// the first observation)
    #[arg(long, allow_hyphen_values = true)]
    t0: Option<f64>,

    /// Write per-step conditional log-likelihoods and filter means to this CSV file
    #[arg(short, long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
struct SimulateArgs {
    #[command(flatten)]
    model: ModelArgs,

    /// Number of observations
    #[arg(long)]
    steps: usize,

    /// Time between observations
    #[arg(long, default_value_t = 1.0)]
    dt: f64,

    /// Start time of the latent process
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    t0: f64,

    /// Observation dimension of the linear-Gaussian model
    #[arg(long, default_value_t = 1)]
    obs_dim: usize,

    /// Random seed
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output CSV file
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Debug, Clone)]
struct ConfigArgs {
    /// Output file; the format follows the extension (.toml, .json, .yaml, .yml)
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_ref())?;

    let result = match &cli.command {
        Command::Run(args) => run(cli.config.as_deref(), args),
        Command::Simulate(args) => run_simulation(args),
        Command::Config(args) => write_config_template(cli.config.as_deref(), &args.output),
    };
    if let Err(e) = &result {
        error!("{e:#}");
    }
    result
}

/// Configuration file values, overridden by any flags given on the command line.
fn filter_config(config_path: Option<&Path>, args: &FilterArgs) -> Result<FilterConfig> {
    let mut config = match config_path {
        Some(path) => {
            info!("Loading filter configuration from {}", path.display());
            FilterConfig::from_file(path)
                .with_context(|| format!("cannot read configuration '{}'", path.display()))?
        }
        None => FilterConfig::default(),
    };
    if let Some(particles) = args.particles {
        config.num_particles = particles;
    }
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(replicates) = args.replicates {
        config.replicates = replicates;
    }
    if let Some(resampling) = args.resampling {
        config.resampling = resampling;
    }
    if args.max_collapses.is_some() {
        config.max_collapses = args.max_collapses;
    }
    if args.parallel {
        config.parallel = true;
    }
    Ok(config)
}

fn build_model(args: &ModelArgs, obs_dim: usize) -> Result<(Box<dyn ObservationSampler>, DVector<f64>)> {
    let params = DVector::from_vec(parse_values(&args.params)?);
    let model: Box<dyn ObservationSampler> = match args.model {
        ModelKind::Sir => Box::new(SirModel::new(args.substep)?),
        ModelKind::LinearGaussian => Box::new(LinearGaussianModel::infer(params.len(), obs_dim)?),
    };
    Ok((model, params))
}

fn run(config_path: Option<&Path>, args: &RunArgs) -> Result<()> {
    validate_input_path(&args.input)?;
    let config = filter_config(config_path, &args.filter)?;
    let value_columns: Vec<&str> = args
        .value_columns
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    if value_columns.is_empty() {
        bail!("at least one value column is required");
    }
    let data = Observations::from_csv(&args.input, &args.time_column, &value_columns, args.t0)?;
    let (model, params) = build_model(&args.model, data.dimension())?;
    info!(
        "Evaluating {} model on {} observations from {} with J = {}, {} replicate(s), {} resampling",
        args.model.model,
        data.len(),
        args.input.display(),
        config.num_particles,
        config.replicates,
        config.resampling
    );

    let mut filter = ParticleFilter::from_config(&config);
    if let Some(output) = &args.output {
        validate_output_path(output)?;
        filter.outputs = FilterOutputs {
            filter_mean: true,
            ..config.outputs
        };
        let result = filter.run(&*model, &data, &params, config.seed)?;
        result.to_csv(output)?;
        info!("Wrote per-step results to {}", output.display());
        filter.outputs = config.outputs;
    }

    if config.replicates > 1 {
        let summary = replicate(&filter, &*model, &data, &params, config.seed, config.replicates)?;
        match summary.standard_error {
            Some(se) => println!("log-likelihood: {:.6} (se {:.6})", summary.log_mean_exp, se),
            None => println!("log-likelihood: {:.6}", summary.log_mean_exp),
        }
        println!(
            "replicates: {}, mean: {:.6}, variance: {:.6}",
            summary.log_likelihoods.len(),
            summary.mean,
            summary.variance
        );
    } else {
        let result = filter.run(&*model, &data, &params, config.seed)?;
        println!("log-likelihood: {:.6}", result.log_likelihood);
        if result.has_collapsed() {
            println!("collapsed steps: {:?}", result.collapsed_steps);
        }
    }
    Ok(())
}

fn run_simulation(args: &SimulateArgs) -> Result<()> {
    if args.steps == 0 {
        bail!("--steps must be at least 1");
    }
    if !(args.dt > 0.0) {
        bail!("--dt must be positive");
    }
    validate_output_path(&args.output)?;
    let (model, params) = build_model(&args.model, args.obs_dim)?;
    let times: Vec<f64> = (1..=args.steps).map(|n| args.t0 + n as f64 * args.dt).collect();
    let sim = simulate(&*model, &params, args.t0, &times, args.seed)?;
    let columns: Vec<String> = if sim.observations.dimension() == 1 {
        vec!["y".to_string()]
    } else {
        (1..=sim.observations.dimension()).map(|k| format!("y{k}")).collect()
    };
    let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
    sim.observations.to_csv(&args.output, "time", &columns)?;
    info!(
        "Wrote {} simulated observations to {}",
        sim.observations.len(),
        args.output.display()
    );
    Ok(())
}

fn write_config_template(config_path: Option<&Path>, output: &Path) -> Result<()> {
    let config = match config_path {
        Some(path) => FilterConfig::from_file(path)
            .with_context(|| format!("cannot read configuration '{}'", path.display()))?,
        None => FilterConfig::default(),
    };
    validate_output_path(output)?;
    config
        .to_file(output)
        .with_context(|| format!("cannot write configuration '{}'", output.display()))?;
    info!("Wrote filter configuration to {}", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use tempfile::tempdir;

    #[test]
    fn cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_run_command() {
        let cli = Cli::try_parse_from([
            "pfilter",
            "--log-level",
            "debug",
            "run",
            "--model",
            "sir",
            "--params",
            "1.5,0.5,0.6,0.9,10000",
            "--input",
            "reports.csv",
            "--value-columns",
            "reports",
            "-j",
            "2000",
            "--resampling",
            "residual",
            "--parallel",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        let Command::Run(args) = cli.command else {
            panic!("expected the run command");
        };
        assert_eq!(args.model.model, ModelKind::Sir);
        assert_eq!(args.filter.particles, Some(2000));
        assert_eq!(args.filter.resampling, Some(ResamplingStrategy::Residual));
        assert!(args.filter.parallel);
        assert_eq!(args.time_column, "time");
    }

    #[test]
    fn parses_negative_parameters() {
        let cli = Cli::try_parse_from([
            "pfilter",
            "simulate",
            "--model",
            "linear-gaussian",
            "--params",
            "-0.5,1,1,1,0,1",
            "--steps",
            "10",
            "--output",
            "sim.csv",
        ])
        .unwrap();
        let Command::Simulate(args) = cli.command else {
            panic!("expected the simulate command");
        };
        assert_eq!(parse_values(&args.model.params).unwrap()[0], -0.5);
        assert_eq!(args.dt, 1.0);
    }

    #[test]
    fn flags_override_configuration_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pf.toml");
        let file_config = FilterConfig {
            num_particles: 64,
            seed: 9,
            replicates: 5,
            ..FilterConfig::default()
        };
        file_config.to_file(&path).unwrap();
        let args = FilterArgs {
            particles: Some(128),
            seed: None,
            replicates: None,
            resampling: Some(ResamplingStrategy::Stratified),
            max_collapses: None,
            parallel: false,
        };
        let config = filter_config(Some(&path), &args).unwrap();
        assert_eq!(config.num_particles, 128);
        assert_eq!(config.seed, 9);
        assert_eq!(config.replicates, 5);
        assert_eq!(config.resampling, ResamplingStrategy::Stratified);
    }

    #[test]
    fn simulate_then_run_end_to_end() {
        let dir = tempdir().unwrap();
        let data = dir.path().join("lg.csv");
        let sim_args = SimulateArgs {
            model: ModelArgs {
                model: ModelKind::LinearGaussian,
                params: "0.8,1,1,0.5,0,1".to_string(),
                substep: 1.0 / 7.0,
            },
            steps: 12,
            dt: 1.0,
            t0: 0.0,
            obs_dim: 1,
            seed: 3,
            output: data.clone(),
        };
        run_simulation(&sim_args).unwrap();

        let steps = dir.path().join("out").join("steps.csv");
        let run_args = RunArgs {
            model: sim_args.model.clone(),
            filter: FilterArgs {
                particles: Some(100),
                seed: Some(1),
                replicates: Some(3),
                resampling: None,
                max_collapses: None,
                parallel: false,
            },
            input: data,
            time_column: "time".to_string(),
            value_columns: "y".to_string(),
            t0: None,
            output: Some(steps.clone()),
        };
        run(None, &run_args).unwrap();
        let mut rdr = csv::Reader::from_path(&steps).unwrap();
        assert_eq!(rdr.records().count(), 12);
    }

    #[test]
    fn writes_configuration_template() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("template.yaml");
        write_config_template(None, &path).unwrap();
        assert_eq!(FilterConfig::from_file(&path).unwrap(), FilterConfig::default());
    }
}
