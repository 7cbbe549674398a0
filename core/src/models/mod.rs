//! Built-in models.
//!
//! - [`closure::ClosureModel`] turns three closures into a [`crate::PompModel`].
//! - [`linear_gaussian::LinearGaussianModel`] has an exact Kalman likelihood and is
//!   the reference for checking the filter.
//! - [`sir::SirModel`] is a discrete-population epidemic model with binomial case
//!   reporting.
use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

pub mod closure;
pub mod linear_gaussian;
pub mod sir;

/// Built-in models selectable from the command line.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    /// Stochastic SIR epidemic with binomially reported recoveries.
    Sir,
    /// Scalar (one state, one observation) linear-Gaussian model.
    LinearGaussian,
}

impl Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Sir => write!(f, "sir"),
            ModelKind::LinearGaussian => write!(f, "linear-gaussian"),
        }
    }
}
