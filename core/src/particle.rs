//! Particle sets and resampling.
//!
//! A [`ParticleSet`] is the weighted swarm the filter carries between observation
//! times. Sets are never modified in place: each filter step builds a new one from the
//! propagated states and the indices chosen by a [`ResamplingStrategy`].
use nalgebra::DVector;
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug, Display};

/// Weighted particle swarm at a single time.
#[derive(Clone)]
pub struct ParticleSet {
    time: f64,
    states: Vec<DVector<f64>>,
    weights: Vec<f64>,
    ancestors: Vec<usize>,
}
impl Debug for ParticleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let min_weight = self.weights.iter().cloned().fold(f64::INFINITY, f64::min);
        let max_weight = self.weights.iter().cloned().fold(0.0, f64::max);
        f.debug_struct("ParticleSet")
            .field("time", &self.time)
            .field("num_particles", &self.states.len())
            .field("effective_particles", &self.effective_sample_size())
            .field(
                "weight_range",
                &format_args!("[{:.4e}, {:.4e}]", min_weight, max_weight),
            )
            .finish()
    }
}
impl Display for ParticleSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mean = self.weighted_mean();
        write!(
            f,
            "ParticleSet(t = {}, J = {}, mean = {:?})",
            self.time,
            self.states.len(),
            mean.as_slice()
        )
    }
}
impl ParticleSet {
    /// Equally weighted set whose particles are their own ancestors.
    pub fn uniform(time: f64, states: Vec<DVector<f64>>) -> ParticleSet {
        let n = states.len();
        let ancestors = (0..n).collect();
        ParticleSet::with_ancestors(time, states, ancestors)
    }
    /// Equally weighted set produced by resampling; `ancestors[j]` is the index of the
    /// previous-set particle that particle `j` descends from.
    pub fn with_ancestors(
        time: f64,
        states: Vec<DVector<f64>>,
        ancestors: Vec<usize>,
    ) -> ParticleSet {
        assert_eq!(
            states.len(),
            ancestors.len(),
            "every particle needs exactly one ancestor"
        );
        let n = states.len();
        ParticleSet {
            time,
            states,
            weights: vec![1.0 / n as f64; n],
            ancestors,
        }
    }
    pub fn time(&self) -> f64 {
        self.time
    }
    pub fn len(&self) -> usize {
        self.states.len()
    }
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
    pub fn states(&self) -> &[DVector<f64>] {
        &self.states
    }
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }
    pub fn ancestors(&self) -> &[usize] {
        &self.ancestors
    }
    pub fn effective_sample_size(&self) -> f64 {
        effective_sample_size(&self.weights)
    }
    /// Weighted mean of the particle states.
    pub fn weighted_mean(&self) -> DVector<f64> {
        weighted_mean(&self.states, &self.weights)
    }
}

/// Normalise non-negative weights to sum to one. Returns `None` when the total is zero
/// or not finite.
pub fn normalize_weights(weights: &[f64]) -> Option<Vec<f64>> {
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        Some(weights.iter().map(|w| w / sum).collect())
    } else {
        None
    }
}

/// Effective sample size `1 / Σ w̃²` of (possibly unnormalised) weights. Zero when all
/// weights vanish.
pub fn effective_sample_size(weights: &[f64]) -> f64 {
    match normalize_weights(weights) {
        Some(normalized) => {
            let sum_of_squares: f64 = normalized.iter().map(|w| w * w).sum();
            1.0 / sum_of_squares
        }
        None => 0.0,
    }
}

/// Weighted mean of a collection of equally sized state vectors.
pub fn weighted_mean(states: &[DVector<f64>], weights: &[f64]) -> DVector<f64> {
    let dim = states.first().map_or(0, |s| s.len());
    let mut mean = DVector::<f64>::zeros(dim);
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return mean;
    }
    for (state, &w) in states.iter().zip(weights.iter()) {
        mean.axpy(w / total, state, 1.0);
    }
    mean
}

/// How resampling indices are drawn. All strategies give each particle an expected
/// number of offspring equal to `J * w̃[j]`; they differ in the variance of that count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[derive(clap::ValueEnum)]
pub enum ResamplingStrategy {
    /// One uniform draw, `J` evenly spaced pointers.
    #[default]
    Systematic,
    /// One uniform draw per stratum `[k/J, (k+1)/J)`.
    Stratified,
    /// `J` independent draws from the categorical distribution.
    Multinomial,
    /// Deterministic `floor(J w̃)` copies, remainder filled systematically from the
    /// residual weights.
    Residual,
}
impl Display for ResamplingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResamplingStrategy::Systematic => "systematic",
            ResamplingStrategy::Stratified => "stratified",
            ResamplingStrategy::Multinomial => "multinomial",
            ResamplingStrategy::Residual => "residual",
        };
        f.write_str(name)
    }
}

impl ResamplingStrategy {
    /// Draw `weights.len()` ancestor indices with probability proportional to
    /// `weights`.
    ///
    /// # Panics
    /// If the weights are empty or do not have a positive finite sum. The filter only
    /// resamples after checking for collapse.
    pub fn resample(&self, weights: &[f64], rng: &mut StdRng) -> Vec<usize> {
        let normalized =
            normalize_weights(weights).expect("resampling requires a positive finite weight sum");
        let n = normalized.len();
        match self {
            ResamplingStrategy::Systematic => {
                let start = rng.random::<f64>() / n as f64;
                let positions: Vec<f64> = (0..n).map(|k| start + k as f64 / n as f64).collect();
                select_sorted(&normalized, &positions)
            }
            ResamplingStrategy::Stratified => {
                let positions: Vec<f64> = (0..n)
                    .map(|k| (k as f64 + rng.random::<f64>()) / n as f64)
                    .collect();
                select_sorted(&normalized, &positions)
            }
            ResamplingStrategy::Multinomial => {
                let mut positions: Vec<f64> = (0..n).map(|_| rng.random::<f64>()).collect();
                positions.sort_by(|a, b| a.total_cmp(b));
                select_sorted(&normalized, &positions)
            }
            ResamplingStrategy::Residual => residual_resample(&normalized, rng),
        }
    }
}

/// Map sorted positions in [0, 1) onto the cumulative weights. The last particle
/// with positive weight absorbs any rounding shortfall in the cumulative sum, so a
/// zero-weight particle is never selected.
fn select_sorted(normalized: &[f64], positions: &[f64]) -> Vec<usize> {
    let last = normalized.iter().rposition(|&w| w > 0.0).unwrap_or(0);
    let mut indices = Vec::with_capacity(positions.len());
    let mut i = 0;
    let mut cumsum = normalized[0];
    for &u in positions {
        while u >= cumsum && i < last {
            i += 1;
            cumsum += normalized[i];
        }
        indices.push(i);
    }
    indices
}

fn residual_resample(normalized: &[f64], rng: &mut StdRng) -> Vec<usize> {
    let n = normalized.len();
    let mut indices = Vec::<usize>::with_capacity(n);
    let mut residual: Vec<f64> = vec![0.0; n];
    for (i, &w) in normalized.iter().enumerate() {
        let copies = (w * n as f64).floor() as usize;
        residual[i] = w * n as f64 - copies as f64;
        indices.extend(std::iter::repeat_n(i, copies));
    }
    // Rounding can push the deterministic part one past n.
    indices.truncate(n);
    let remaining = n - indices.len();
    if remaining > 0 {
        let sum_residual: f64 = residual.iter().sum();
        if sum_residual > 0.0 {
            let scaled: Vec<f64> = residual.iter().map(|r| r / sum_residual).collect();
            let start = rng.random::<f64>() / remaining as f64;
            let positions: Vec<f64> = (0..remaining)
                .map(|k| start + k as f64 / remaining as f64)
                .collect();
            indices.extend(select_sorted(&scaled, &positions));
        } else {
            let best = normalized
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.total_cmp(b.1))
                .map_or(0, |(i, _)| i);
            indices.extend(std::iter::repeat_n(best, remaining));
        }
    }
    indices
}
