//! Likelihood evaluation for partially observed Markov process (POMP) models
//!
//! A POMP model is a latent Markov process $X_0, X_1, \dots, X_N$ that is only seen
//! through noisy measurements $Y_1, \dots, Y_N$ taken at times $t_1 \le \dots \le t_N$.
//! The likelihood of a parameter vector $\theta$,
//!
//! $$
//! L(\theta) = \prod_{n=1}^{N} f_{Y_n | Y_{1:n-1}}(y_n^* \mid y_{1:n-1}^*; \theta),
//! $$
//!
//! is almost never available in closed form. This crate estimates it with the
//! sequential Monte Carlo (bootstrap particle) filter, which only needs three things
//! from a model:
//!
//! - a sampler for the initial state $X_0$,
//! - a sampler for the transition $X_{n-1} \to X_n$ (no transition density is ever
//!   evaluated, the so-called "plug-and-play" property),
//! - the measurement density $f_{Y_n|X_n}(y_n \mid x_n; \theta)$.
//!
//! These are the methods of the [`PompModel`] trait.
//!
//! ## Crate overview
//!
//! - [filter]: the particle filter itself and its [`filter::FilterResult`].
//! - [particle]: particle sets and resampling strategies.
//! - [streams]: reproducible, scheduling-independent random streams.
//! - [replicate]: replicate runs, log-mean-exp averaging and evaluation at many
//!   parameter values.
//! - [data]: time-stamped observation sequences and CSV I/O.
//! - [config]: serialisable filter configuration.
//! - [models]: a closure-backed model, a linear-Gaussian model with an exact Kalman
//!   likelihood, and a stochastic SIR epidemic model.
//! - [simulate]: forward simulation of models that can also sample observations.
//!
//! ## The particle filter
//!
//! With $J$ particles, the filter starts from $J$ draws of $X_0$ and, for each
//! observation, propagates every particle, weights it by the measurement density
//! $w_{n,j}$, and forms the conditional likelihood estimate
//!
//! $$
//! \hat L_n = \frac{1}{J} \sum_{j=1}^{J} w_{n,j}.
//! $$
//!
//! Particles are then resampled with probability proportional to their weight. The
//! log-likelihood estimate is $\sum_n \log \hat L_n$, accumulated in log space. The
//! product $\prod_n \hat L_n$ is an unbiased estimate of $L(\theta)$ for every
//! $J \ge 1$; its logarithm is biased downwards, which is why replicate estimates are
//! combined with [`replicate::log_mean_exp`] rather than a plain mean.
//!
//! ```rust
//! use nalgebra::DVector;
//! use pomp::filter::ParticleFilter;
//! use pomp::models::linear_gaussian::{LinearGaussianModel, LinearGaussianParams};
//! use pomp::simulate::simulate;
//!
//! let model = LinearGaussianModel::new(1, 1);
//! let params = LinearGaussianParams::scalar(0.8, 1.0, 1.0, 0.5, 0.0, 1.0).pack();
//! let times: Vec<f64> = (1..=20).map(|t| t as f64).collect();
//! let data = simulate(&model, &params, 0.0, &times, 7).unwrap().observations;
//!
//! let pf = ParticleFilter::new(500);
//! let result = pf.run(&model, &data, &params, 42).unwrap();
//! assert_eq!(result.cond_log_likelihoods.len(), 20);
//! assert!(result.log_likelihood.is_finite());
//! ```
pub mod config;
pub mod data;
pub mod error;
pub mod filter;
pub mod models;
pub mod particle;
pub mod replicate;
pub mod simulate;
pub mod streams;

use nalgebra::DVector;
use rand::rngs::StdRng;

pub use crate::data::Observations;
pub use crate::error::{PompError, PompResult};
pub use crate::filter::{FilterResult, ParticleFilter};

/// A partially observed Markov process model.
///
/// Every method receives the full parameter vector `params` unchanged. Randomness is
/// only ever drawn from the generator passed in, so a model is deterministic given its
/// inputs and the generator state. Models are shared read-only between threads, hence
/// the `Sync` bound.
pub trait PompModel: Sync {
    /// Draw one latent state at the initial time `t0`.
    fn initial_state(&self, params: &DVector<f64>, rng: &mut StdRng) -> PompResult<DVector<f64>>;

    /// Advance `state` over the interval `[t, t + dt]`, returning a new state.
    fn transition(
        &self,
        state: &DVector<f64>,
        params: &DVector<f64>,
        t: f64,
        dt: f64,
        rng: &mut StdRng,
    ) -> PompResult<DVector<f64>>;

    /// Density (or probability mass) of `observation` given `state`. Must be
    /// non-negative; zero marks the particle as infeasible.
    fn measurement_density(
        &self,
        state: &DVector<f64>,
        observation: &DVector<f64>,
        params: &DVector<f64>,
    ) -> PompResult<f64>;

    /// Natural logarithm of [`PompModel::measurement_density`]. Override when the
    /// density underflows on the natural scale.
    fn log_measurement_density(
        &self,
        state: &DVector<f64>,
        observation: &DVector<f64>,
        params: &DVector<f64>,
    ) -> PompResult<f64> {
        let density = self.measurement_density(state, observation, params)?;
        if density < 0.0 {
            return Err(PompError::Evaluation(format!(
                "negative measurement density {density}"
            )));
        }
        Ok(density.ln())
    }

    /// Reject parameter vectors for which the model is undefined. Called once before
    /// any sampling.
    fn check_parameters(&self, _params: &DVector<f64>) -> PompResult<()> {
        Ok(())
    }
}

/// Models that can also draw observations, which is all [`simulate::simulate`] needs
/// on top of [`PompModel`].
pub trait ObservationSampler: PompModel {
    fn sample_observation(
        &self,
        state: &DVector<f64>,
        params: &DVector<f64>,
        rng: &mut StdRng,
    ) -> PompResult<DVector<f64>>;
}

/// Reads a parameter by position, reporting a dimension mismatch instead of panicking.
pub(crate) fn param(params: &DVector<f64>, index: usize, name: &str) -> PompResult<f64> {
    params.get(index).copied().ok_or_else(|| {
        PompError::DimensionMismatch(format!(
            "parameter `{name}` expected at index {index}, vector has length {}",
            params.len()
        ))
    })
}
