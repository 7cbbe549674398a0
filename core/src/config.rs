//! Filter configuration and its file formats.
//!
//! [`FilterConfig`] gathers every knob of a particle-filter run. It is plain data with
//! serde derives so the command-line tool can read it from JSON, YAML or TOML, chosen
//! by file extension, and write a template back out.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::particle::ResamplingStrategy;

/// What a step contributes to the log-likelihood when every particle has zero weight.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CollapsePolicy {
    /// Contribute `-inf`, so the total log-likelihood is `-inf`.
    #[default]
    NegativeInfinity,
    /// Contribute a fixed, large negative log-likelihood so that totals remain
    /// comparable between parameter values.
    Floor { log_likelihood: f64 },
}

impl CollapsePolicy {
    pub fn contribution(&self) -> f64 {
        match self {
            CollapsePolicy::NegativeInfinity => f64::NEG_INFINITY,
            CollapsePolicy::Floor { log_likelihood } => *log_likelihood,
        }
    }
}

/// Optional outputs recorded during a run. All are off by default since they cost
/// memory proportional to `N` (or `N * J` for particle histories).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOutputs {
    /// Keep the filtering particle set at `t0` and after every step.
    #[serde(default)]
    pub save_particles: bool,
    /// Weighted mean of the prediction particles at each step.
    #[serde(default)]
    pub filter_mean: bool,
    /// Unweighted mean of the prediction particles at each step.
    #[serde(default)]
    pub pred_mean: bool,
    /// Per-component variance of the prediction particles at each step.
    #[serde(default)]
    pub pred_var: bool,
    /// Sample one ancestral trajectory `x_0..x_N` at the end of the run.
    #[serde(default)]
    pub filter_trajectory: bool,
}

fn default_num_particles() -> usize {
    1000
}
fn default_seed() -> u64 {
    42
}
fn default_replicates() -> usize {
    1
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Number of particles `J`.
    #[serde(default = "default_num_particles")]
    pub num_particles: usize,

    #[serde(default)]
    pub resampling: ResamplingStrategy,

    /// Abort with an error once more than this many steps have collapsed. `None`
    /// never aborts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_collapses: Option<usize>,

    /// Propagate and weight particles on the rayon thread pool, and run replicates
    /// concurrently. Results are identical either way.
    #[serde(default)]
    pub parallel: bool,

    /// Master seed. Use the same seed to repeat a run exactly.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Number of independent replicate runs used by batch evaluation.
    #[serde(default = "default_replicates")]
    pub replicates: usize,

    #[serde(default)]
    pub collapse: CollapsePolicy,

    #[serde(default)]
    pub outputs: FilterOutputs,
}

impl Default for FilterConfig {
    fn default() -> Self {
        FilterConfig {
            num_particles: default_num_particles(),
            resampling: ResamplingStrategy::default(),
            max_collapses: None,
            parallel: false,
            seed: default_seed(),
            replicates: default_replicates(),
            collapse: CollapsePolicy::default(),
            outputs: FilterOutputs::default(),
        }
    }
}

impl FilterConfig {
    /// Write the configuration to a JSON file (pretty-printed).
    pub fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    pub fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    pub fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    pub fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    pub fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    pub fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}
