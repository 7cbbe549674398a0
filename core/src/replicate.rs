//! Replicate filter runs and their summary.
//!
//! A single particle-filter log-likelihood is a noisy, downward-biased estimate. Running
//! the filter `R` times with independent streams and averaging on the likelihood
//! scale, via [`log_mean_exp`], gives a less biased estimate together with a jackknife
//! standard error.
use log::{info, warn};
use nalgebra::DVector;
use rayon::prelude::*;

use crate::PompModel;
use crate::data::Observations;
use crate::error::{PompError, PompResult};
use crate::filter::ParticleFilter;
use crate::streams::RngStream;

/// `log((1/n) Σ exp(x_i))`, computed stably. `-inf` entries contribute zero; the
/// result is `-inf` if every entry is `-inf`, and `NaN` for an empty slice.
pub fn log_mean_exp(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let max = values.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if max == f64::NEG_INFINITY {
        return f64::NEG_INFINITY;
    }
    if max == f64::INFINITY {
        return f64::INFINITY;
    }
    let sum: f64 = values.iter().map(|v| (v - max).exp()).sum();
    max + (sum / values.len() as f64).ln()
}

/// [`log_mean_exp`] together with its jackknife standard error.
///
/// The leave-one-out estimates `lme_{-i}` give
/// `se = (n - 1) * sd(lme_{-i}) / sqrt(n)`, with the sample standard deviation. The
/// error is `None` for fewer than two values or when it is not finite.
pub fn log_mean_exp_se(values: &[f64]) -> (f64, Option<f64>) {
    let estimate = log_mean_exp(values);
    let n = values.len();
    if n < 2 {
        return (estimate, None);
    }
    let mut rest = Vec::with_capacity(n - 1);
    let jackknife: Vec<f64> = (0..n)
        .map(|i| {
            rest.clear();
            rest.extend(values.iter().enumerate().filter(|&(k, _)| k != i).map(|(_, v)| *v));
            log_mean_exp(&rest)
        })
        .collect();
    let mean = jackknife.iter().sum::<f64>() / n as f64;
    let var = jackknife.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let se = (n - 1) as f64 * var.sqrt() / (n as f64).sqrt();
    (estimate, se.is_finite().then_some(se))
}

/// Log-likelihoods from `R` independent filter runs at one parameter vector.
#[derive(Clone, Debug, PartialEq)]
pub struct ReplicateSummary {
    pub log_likelihoods: Vec<f64>,
    /// `log_mean_exp(log_likelihoods)`.
    pub log_mean_exp: f64,
    /// Jackknife standard error of `log_mean_exp`, when defined.
    pub standard_error: Option<f64>,
    /// Plain mean of the log-likelihoods.
    pub mean: f64,
    /// Sample variance of the log-likelihoods (zero for a single replicate).
    pub variance: f64,
}

impl ReplicateSummary {
    pub fn from_log_likelihoods(log_likelihoods: Vec<f64>) -> ReplicateSummary {
        let (log_mean_exp, standard_error) = log_mean_exp_se(&log_likelihoods);
        let n = log_likelihoods.len();
        let mean = log_likelihoods.iter().sum::<f64>() / n as f64;
        let variance = if n > 1 {
            log_likelihoods.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / (n - 1) as f64
        } else {
            0.0
        };
        ReplicateSummary {
            log_likelihoods,
            log_mean_exp,
            standard_error,
            mean,
            variance,
        }
    }
}

/// Run the filter `replicates` times at `params`. Replicate `i` draws from
/// `RngStream::new(master_seed).child(i)`, so the results do not depend on whether the
/// replicates run concurrently.
pub fn replicate<M: PompModel + ?Sized>(
    filter: &ParticleFilter,
    model: &M,
    data: &Observations,
    params: &DVector<f64>,
    master_seed: u64,
    replicates: usize,
) -> PompResult<ReplicateSummary> {
    replicate_with_stream(filter, model, data, params, &RngStream::new(master_seed), replicates)
}

fn replicate_with_stream<M: PompModel + ?Sized>(
    filter: &ParticleFilter,
    model: &M,
    data: &Observations,
    params: &DVector<f64>,
    stream: &RngStream,
    replicates: usize,
) -> PompResult<ReplicateSummary> {
    if replicates == 0 {
        return Err(PompError::DimensionMismatch(
            "number of replicates must be at least 1".to_string(),
        ));
    }
    let run_one = |i: usize| -> PompResult<f64> {
        filter
            .run_with_stream(model, data, params, &stream.child(i as u64))
            .map(|result| result.log_likelihood)
    };
    let log_likelihoods: Vec<f64> = if filter.parallel {
        (0..replicates).into_par_iter().map(run_one).collect::<PompResult<_>>()?
    } else {
        (0..replicates).map(run_one).collect::<PompResult<_>>()?
    };
    let collapsed = log_likelihoods.iter().filter(|l| **l == f64::NEG_INFINITY).count();
    if collapsed > 0 {
        warn!("{collapsed} of {replicates} replicate(s) returned a log-likelihood of -inf");
    }
    let summary = ReplicateSummary::from_log_likelihoods(log_likelihoods);
    info!(
        "{replicates} replicate(s): log-mean-exp = {:.4}, se = {}",
        summary.log_mean_exp,
        summary
            .standard_error
            .map_or_else(|| "n/a".to_string(), |se| format!("{se:.4}"))
    );
    Ok(summary)
}

/// Evaluate the likelihood at several parameter vectors, `replicates` runs each. Point
/// `p`, replicate `i` draws from `RngStream::new(master_seed).child(p).child(i)`.
///
/// Errors at one point abort the whole evaluation.
pub fn evaluate_points<M: PompModel + ?Sized>(
    filter: &ParticleFilter,
    model: &M,
    data: &Observations,
    points: &[DVector<f64>],
    master_seed: u64,
    replicates: usize,
) -> PompResult<Vec<ReplicateSummary>> {
    let root = RngStream::new(master_seed);
    points
        .iter()
        .enumerate()
        .map(|(p, params)| {
            replicate_with_stream(filter, model, data, params, &root.child(p as u64), replicates)
        })
        .collect()
}
