//! Error types shared across the crate.
//!
//! Two classes of failure are distinguished. Misuse (bad parameters, empty data,
//! zero particles, illegal density values) aborts a filter run and is returned to the
//! caller. Statistical failure (every particle weight is zero at some step) is not an
//! error by default: it is recorded in the [`crate::filter::FilterResult`] so that a
//! caller comparing parameter values still gets an answer. Only when a collapse limit
//! is configured does it surface as [`PompError::FilterCollapse`].

use thiserror::Error;

/// Result alias used by every fallible operation in the crate.
pub type PompResult<T> = Result<T, PompError>;

#[derive(Debug, Error)]
pub enum PompError {
    /// A parameter value makes the model undefined (negative rate, probability
    /// outside [0, 1], ...).
    #[error("invalid parameter `{name}` = {value}: {reason}")]
    InvalidParameter {
        name: String,
        value: f64,
        reason: String,
    },

    /// Sizes that do not line up: zero particles, empty data, wrong parameter
    /// vector length, observations of differing dimension.
    #[error("dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Observation data that cannot be used (non-finite or decreasing times,
    /// malformed cells).
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A measurement density evaluated to an illegal value.
    #[error("illegal measurement density {value} at step {step}, particle {particle}")]
    InvalidDensity {
        step: usize,
        particle: usize,
        value: f64,
    },

    /// More steps collapsed than the configured limit allows.
    #[error("particle filter collapsed at {collapses} steps (limit {limit})")]
    FilterCollapse { collapses: usize, limit: usize },

    /// A numerical routine failed (e.g. a covariance that is not positive definite).
    #[error("numerical failure: {0}")]
    Numerical(String),

    /// A model evaluation failed for a single particle. The filter turns this into a
    /// zero weight instead of aborting.
    #[error("model evaluation failed: {0}")]
    Evaluation(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl PompError {
    /// Convenience constructor for [`PompError::InvalidParameter`].
    pub fn invalid_parameter(name: &str, value: f64, reason: &str) -> Self {
        PompError::InvalidParameter {
            name: name.to_string(),
            value,
            reason: reason.to_string(),
        }
    }

    /// Whether this error must abort a filter run even when raised while weighting a
    /// single particle.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, PompError::Evaluation(_) | PompError::Numerical(_))
    }
}
