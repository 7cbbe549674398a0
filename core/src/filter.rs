//! Bootstrap particle filter for POMP likelihood evaluation.
//!
//! The filter makes one forward pass over the data. For every observation it
//!
//! 1. propagates each particle with [`PompModel::transition`],
//! 2. weights it with [`PompModel::log_measurement_density`],
//! 3. adds the log of the mean weight (the conditional likelihood estimate) to the
//!    running log-likelihood, and
//! 4. resamples the particles in proportion to their weights.
//!
//! Steps 1 and 2 are independent across particles and can run on the rayon pool;
//! step 4 is a barrier over all weights. Every particle draws from its own
//! [`RngStream`], so serial and parallel runs produce identical results.
//!
//! A step where every weight is zero has *collapsed*. The run continues: the step
//! contributes according to the [`CollapsePolicy`] and the unweighted prediction
//! particles are carried forward. Callers detect this through
//! [`FilterResult::collapsed_steps`] or a `-inf` log-likelihood.

use std::path::Path;

use log::{debug, info, trace, warn};
use nalgebra::DVector;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{CollapsePolicy, FilterConfig, FilterOutputs};
use crate::data::Observations;
use crate::error::{PompError, PompResult};
use crate::particle::{ParticleSet, ResamplingStrategy, effective_sample_size, weighted_mean};
use crate::streams::RngStream;
use crate::PompModel;

const PROPAGATE_STREAM: u64 = 0;
const RESAMPLE_STREAM: u64 = 1;
const TRAJECTORY_STREAM: u64 = u64::MAX;

/// Outcome of one filter run.
#[derive(Clone, Debug)]
pub struct FilterResult {
    /// Estimated log-likelihood, `Σ_n log L̂_n`.
    pub log_likelihood: f64,
    /// `log L̂_n` for each observation.
    pub cond_log_likelihoods: Vec<f64>,
    /// Effective sample size of the normalised weights at each observation (0 when
    /// the step collapsed).
    pub effective_sample_sizes: Vec<f64>,
    /// Observation indices (0-based) at which every particle had zero weight.
    pub collapsed_steps: Vec<usize>,
    /// Number of individual density evaluations that failed and were given zero
    /// weight.
    pub weight_failures: usize,
    /// Observation times, for convenience when exporting.
    pub times: Vec<f64>,
    pub filter_means: Option<Vec<DVector<f64>>>,
    pub pred_means: Option<Vec<DVector<f64>>>,
    pub pred_vars: Option<Vec<DVector<f64>>>,
    /// Filtering particle sets at `t0` and after every observation.
    pub particle_history: Option<Vec<ParticleSet>>,
    /// One ancestral trajectory `x_0, x_1, ..., x_N`.
    pub filter_trajectory: Option<Vec<DVector<f64>>>,
}

/// Summary of one filter step, as written by [`FilterResult::to_csv`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepRecord {
    pub time: f64,
    pub cond_log_likelihood: f64,
    pub effective_sample_size: f64,
    pub collapsed: bool,
}

impl FilterResult {
    /// Conditional likelihood estimates `L̂_n` on the natural scale.
    pub fn conditional_likelihoods(&self) -> Vec<f64> {
        self.cond_log_likelihoods.iter().map(|l| l.exp()).collect()
    }

    pub fn has_collapsed(&self) -> bool {
        !self.collapsed_steps.is_empty()
    }

    /// Write one row per observation: time, conditional log-likelihood, effective
    /// sample size, a collapse flag and, when recorded, the filter mean components.
    pub fn to_csv<P: AsRef<Path>>(&self, path: P) -> PompResult<()> {
        let mut writer = csv::Writer::from_path(path)?;
        let mean_dim = self
            .filter_means
            .as_ref()
            .and_then(|m| m.first())
            .map_or(0, |m| m.len());
        let mut header = vec![
            "time".to_string(),
            "cond_log_likelihood".to_string(),
            "effective_sample_size".to_string(),
            "collapsed".to_string(),
        ];
        header.extend((0..mean_dim).map(|k| format!("filter_mean_{k}")));
        writer.write_record(&header)?;
        for (n, record) in self.step_records().into_iter().enumerate() {
            let mut row = vec![
                record.time.to_string(),
                record.cond_log_likelihood.to_string(),
                record.effective_sample_size.to_string(),
                record.collapsed.to_string(),
            ];
            if let Some(means) = &self.filter_means {
                row.extend(means[n].iter().map(|v| v.to_string()));
            }
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Per-step records without the filter means.
    pub fn step_records(&self) -> Vec<StepRecord> {
        (0..self.times.len())
            .map(|n| StepRecord {
                time: self.times[n],
                cond_log_likelihood: self.cond_log_likelihoods[n],
                effective_sample_size: self.effective_sample_sizes[n],
                collapsed: self.collapsed_steps.contains(&n),
            })
            .collect()
    }
}

/// Sequential importance resampling (bootstrap) particle filter.
#[derive(Clone, Debug)]
pub struct ParticleFilter {
    pub num_particles: usize,
    pub resampling: ResamplingStrategy,
    pub collapse: CollapsePolicy,
    pub max_collapses: Option<usize>,
    pub parallel: bool,
    pub outputs: FilterOutputs,
}

impl Default for ParticleFilter {
    fn default() -> Self {
        ParticleFilter::from_config(&FilterConfig::default())
    }
}

impl ParticleFilter {
    /// Filter with `num_particles` particles and default settings (systematic
    /// resampling, `-inf` on collapse, serial, no optional outputs).
    pub fn new(num_particles: usize) -> Self {
        ParticleFilter {
            num_particles,
            ..ParticleFilter::default()
        }
    }

    pub fn from_config(config: &FilterConfig) -> Self {
        ParticleFilter {
            num_particles: config.num_particles,
            resampling: config.resampling,
            collapse: config.collapse,
            max_collapses: config.max_collapses,
            parallel: config.parallel,
            outputs: config.outputs,
        }
    }

    pub fn with_resampling(mut self, resampling: ResamplingStrategy) -> Self {
        self.resampling = resampling;
        self
    }
    pub fn with_collapse_policy(mut self, collapse: CollapsePolicy) -> Self {
        self.collapse = collapse;
        self
    }
    pub fn with_max_collapses(mut self, max_collapses: Option<usize>) -> Self {
        self.max_collapses = max_collapses;
        self
    }
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
    pub fn with_outputs(mut self, outputs: FilterOutputs) -> Self {
        self.outputs = outputs;
        self
    }

    /// Run the filter with a fresh stream rooted at `seed`.
    pub fn run<M: PompModel + ?Sized>(
        &self,
        model: &M,
        data: &Observations,
        params: &DVector<f64>,
        seed: u64,
    ) -> PompResult<FilterResult> {
        self.run_with_stream(model, data, params, &RngStream::new(seed))
    }

    /// Run the filter drawing every random number from below `stream`.
    ///
    /// # Errors
    /// - [`PompError::DimensionMismatch`] for `J = 0` or empty data, before any
    ///   sampling.
    /// - Any error from [`PompModel::check_parameters`], the initial sampler or the
    ///   transition sampler.
    /// - Fatal errors from the measurement density (see [`PompError::is_fatal`]) and
    ///   [`PompError::InvalidDensity`] for a `+inf` log density.
    /// - [`PompError::FilterCollapse`] when `max_collapses` is exceeded.
    pub fn run_with_stream<M: PompModel + ?Sized>(
        &self,
        model: &M,
        data: &Observations,
        params: &DVector<f64>,
        stream: &RngStream,
    ) -> PompResult<FilterResult> {
        let num_particles = self.num_particles;
        if num_particles == 0 {
            return Err(PompError::DimensionMismatch(
                "number of particles must be at least 1".to_string(),
            ));
        }
        if data.is_empty() {
            return Err(PompError::DimensionMismatch(
                "observation sequence is empty".to_string(),
            ));
        }
        model.check_parameters(params)?;

        let n_obs = data.len();
        debug!(
            "Particle filter: J = {num_particles}, N = {n_obs}, {} resampling, {stream}",
            self.resampling
        );
        let keep_history = self.outputs.save_particles || self.outputs.filter_trajectory;
        let mut history: Vec<ParticleSet> = Vec::new();
        let mut filter_means = Vec::new();
        let mut pred_means = Vec::new();
        let mut pred_vars = Vec::new();
        let mut cond_log_likelihoods = Vec::with_capacity(n_obs);
        let mut effective_sample_sizes = Vec::with_capacity(n_obs);
        let mut collapsed_steps = Vec::new();
        let mut weight_failures = 0usize;

        let init_stream = stream.child(0).child(PROPAGATE_STREAM);
        let initial = self.map_particles(|j| {
            let mut rng = init_stream.child(j as u64).rng();
            model.initial_state(params, &mut rng)
        })?;
        let mut filtering = ParticleSet::uniform(data.t0(), initial);
        let initial_set = keep_history.then(|| filtering.clone());

        for n in 0..n_obs {
            let (t_start, dt) = data.interval(n);
            let time = data.times()[n];
            let observation = &data.values()[n];
            let step_stream = stream.child(n as u64 + 1);
            let propagate_stream = step_stream.child(PROPAGATE_STREAM);

            let weighted = self.map_particles(|j| {
                let mut rng = propagate_stream.child(j as u64).rng();
                let state =
                    model.transition(&filtering.states()[j], params, t_start, dt, &mut rng)?;
                let log_weight = match model.log_measurement_density(&state, observation, params)
                {
                    Ok(lw) if lw == f64::INFINITY => {
                        return Err(PompError::InvalidDensity {
                            step: n,
                            particle: j,
                            value: lw,
                        });
                    }
                    Ok(lw) if lw.is_nan() => None,
                    Ok(lw) => Some(lw),
                    Err(e) if e.is_fatal() => return Err(e),
                    Err(e) => {
                        trace!("density failed at step {n}, particle {j}: {e}");
                        None
                    }
                };
                Ok((state, log_weight))
            })?;

            let mut predictions = Vec::with_capacity(num_particles);
            let mut log_weights = Vec::with_capacity(num_particles);
            for (state, log_weight) in weighted {
                predictions.push(state);
                match log_weight {
                    Some(lw) => log_weights.push(lw),
                    None => {
                        weight_failures += 1;
                        log_weights.push(f64::NEG_INFINITY);
                    }
                }
            }

            if self.outputs.pred_mean || self.outputs.pred_var {
                let uniform = vec![1.0; num_particles];
                let mean = weighted_mean(&predictions, &uniform);
                if self.outputs.pred_var {
                    pred_vars.push(component_variance(&predictions, &mean));
                }
                if self.outputs.pred_mean {
                    pred_means.push(mean);
                }
            }

            let max_log_weight = log_weights
                .iter()
                .cloned()
                .fold(f64::NEG_INFINITY, f64::max);

            if max_log_weight == f64::NEG_INFINITY {
                collapsed_steps.push(n);
                warn!(
                    "All {num_particles} particles have zero weight at step {n} (t = {time}); \
                     contributing {} to the log-likelihood",
                    self.collapse.contribution()
                );
                if let Some(limit) = self.max_collapses {
                    if collapsed_steps.len() > limit {
                        return Err(PompError::FilterCollapse {
                            collapses: collapsed_steps.len(),
                            limit,
                        });
                    }
                }
                cond_log_likelihoods.push(self.collapse.contribution());
                effective_sample_sizes.push(0.0);
                if self.outputs.filter_mean {
                    filter_means.push(weighted_mean(&predictions, &vec![1.0; num_particles]));
                }
                filtering = ParticleSet::uniform(time, predictions);
            } else {
                // Shift by the largest log weight before leaving log space.
                let shifted: Vec<f64> = log_weights
                    .iter()
                    .map(|lw| (lw - max_log_weight).exp())
                    .collect();
                let mean_shifted = shifted.iter().sum::<f64>() / num_particles as f64;
                let cond_log_likelihood = max_log_weight + mean_shifted.ln();
                cond_log_likelihoods.push(cond_log_likelihood);
                effective_sample_sizes.push(effective_sample_size(&shifted));
                if self.outputs.filter_mean {
                    filter_means.push(weighted_mean(&predictions, &shifted));
                }

                let mut resample_rng = step_stream.child(RESAMPLE_STREAM).rng();
                let ancestors = self.resampling.resample(&shifted, &mut resample_rng);
                let states = ancestors.iter().map(|&a| predictions[a].clone()).collect();
                filtering = ParticleSet::with_ancestors(time, states, ancestors);
                debug!(
                    "step {n}: t = {time}, cond. log-lik = {cond_log_likelihood:.4}, ESS = {:.1}",
                    effective_sample_sizes[n]
                );
            }

            if keep_history {
                history.push(filtering.clone());
            }
        }

        let log_likelihood: f64 = cond_log_likelihoods.iter().sum();
        info!(
            "Particle filter finished: J = {num_particles}, N = {n_obs}, log-likelihood = {log_likelihood:.4}, {} collapsed step(s)",
            collapsed_steps.len()
        );

        let (filter_trajectory, particle_history) = match initial_set {
            Some(initial_set) => {
                let trajectory = self.outputs.filter_trajectory.then(|| {
                    let mut rng = stream.child(TRAJECTORY_STREAM).rng();
                    trace_trajectory(&initial_set, &history, &mut rng)
                });
                let sets = self.outputs.save_particles.then(|| {
                    let mut all = Vec::with_capacity(history.len() + 1);
                    all.push(initial_set);
                    all.extend(history);
                    all
                });
                (trajectory, sets)
            }
            None => (None, None),
        };

        Ok(FilterResult {
            log_likelihood,
            cond_log_likelihoods,
            effective_sample_sizes,
            collapsed_steps,
            weight_failures,
            times: data.times().to_vec(),
            filter_means: self.outputs.filter_mean.then_some(filter_means),
            pred_means: self.outputs.pred_mean.then_some(pred_means),
            pred_vars: self.outputs.pred_var.then_some(pred_vars),
            particle_history,
            filter_trajectory,
        })
    }

    /// Evaluate `f` for every particle index, in parallel when configured. Output order
    /// always follows the particle index.
    fn map_particles<T, F>(&self, f: F) -> PompResult<Vec<T>>
    where
        T: Send,
        F: Fn(usize) -> PompResult<T> + Sync + Send,
    {
        if self.parallel {
            (0..self.num_particles).into_par_iter().map(f).collect()
        } else {
            (0..self.num_particles).map(f).collect()
        }
    }
}

fn component_variance(states: &[DVector<f64>], mean: &DVector<f64>) -> DVector<f64> {
    let mut var = DVector::<f64>::zeros(mean.len());
    if states.len() < 2 {
        return var;
    }
    for state in states {
        let diff = state - mean;
        var += diff.component_mul(&diff);
    }
    var / (states.len() - 1) as f64
}

/// Pick a final particle uniformly and follow its ancestor indices back to `t0`.
fn trace_trajectory(
    initial: &ParticleSet,
    history: &[ParticleSet],
    rng: &mut rand::rngs::StdRng,
) -> Vec<DVector<f64>> {
    use rand::Rng;
    let n_steps = history.len();
    let mut trajectory = vec![DVector::zeros(0); n_steps + 1];
    let last = history.last().unwrap_or(initial);
    let mut index = rng.random_range(0..last.len());
    for n in (0..n_steps).rev() {
        let set = &history[n];
        trajectory[n + 1] = set.states()[index].clone();
        index = set.ancestors()[index];
    }
    trajectory[0] = initial.states()[index].clone();
    trajectory
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::closure::ClosureModel;
    use assert_approx_eq::assert_approx_eq;
    use rand::Rng;
    use rand_distr::StandardNormal;

    /// Random walk observed with unit Gaussian noise.
    fn random_walk() -> impl PompModel {
        ClosureModel::new(
            |_params: &DVector<f64>, _rng: &mut rand::rngs::StdRng| Ok(DVector::from_element(1, 0.0)),
            |x: &DVector<f64>, params: &DVector<f64>, _t: f64, dt: f64, rng: &mut rand::rngs::StdRng| {
                let z: f64 = rng.sample(StandardNormal);
                Ok(DVector::from_element(1, x[0] + params[0] * dt.sqrt() * z))
            },
            |x: &DVector<f64>, y: &DVector<f64>, _params: &DVector<f64>| {
                let r = y[0] - x[0];
                Ok((-0.5 * r * r).exp() / (2.0 * std::f64::consts::PI).sqrt())
            },
        )
    }

    fn walk_data() -> Observations {
        Observations::from_scalars(
            0.0,
            (1..=15).map(|t| t as f64).collect(),
            &[
                0.3, 0.9, 1.2, 0.4, -0.5, -1.1, -0.2, 0.8, 1.9, 2.4, 1.7, 1.1, 0.2, -0.4, 0.1,
            ],
        )
        .unwrap()
    }

    #[test]
    fn rejects_zero_particles() {
        let err = ParticleFilter::new(0)
            .run(&random_walk(), &walk_data(), &DVector::from_vec(vec![1.0]), 1)
            .unwrap_err();
        assert!(matches!(err, PompError::DimensionMismatch(_)));
    }

    #[test]
    fn observation_dimension_must_match_the_model() {
        use crate::models::linear_gaussian::{LinearGaussianModel, LinearGaussianParams};
        use crate::models::sir::SirModel;
        use nalgebra::DMatrix;

        let params = LinearGaussianParams {
            transition: DMatrix::identity(1, 1),
            observation: DMatrix::from_element(2, 1, 1.0),
            process_sd: DVector::from_element(1, 1.0),
            measurement_sd: DVector::from_element(2, 1.0),
            initial_mean: DVector::zeros(1),
            initial_sd: DVector::from_element(1, 1.0),
        }
        .pack();
        let err = ParticleFilter::new(10)
            .run(&LinearGaussianModel::new(1, 2), &walk_data(), &params, 1)
            .unwrap_err();
        assert!(matches!(err, PompError::DimensionMismatch(_)), "{err}");

        let empty = Observations::new(0.0, vec![1.0], vec![DVector::zeros(0)]).unwrap();
        let sir_params = DVector::from_vec(vec![2.0, 1.0, 0.5, 0.95, 5_000.0]);
        let err = ParticleFilter::new(10)
            .run(&SirModel::default(), &empty, &sir_params, 1)
            .unwrap_err();
        assert!(matches!(err, PompError::DimensionMismatch(_)), "{err}");
    }

    #[test]
    fn same_seed_reproduces_exactly() {
        let pf = ParticleFilter::new(200);
        let params = DVector::from_vec(vec![1.0]);
        let a = pf.run(&random_walk(), &walk_data(), &params, 9).unwrap();
        let b = pf.run(&random_walk(), &walk_data(), &params, 9).unwrap();
        assert_eq!(a.log_likelihood, b.log_likelihood);
        assert_eq!(a.cond_log_likelihoods, b.cond_log_likelihoods);
    }

    #[test]
    fn different_seeds_differ() {
        let pf = ParticleFilter::new(200);
        let params = DVector::from_vec(vec![1.0]);
        let a = pf.run(&random_walk(), &walk_data(), &params, 1).unwrap();
        let b = pf.run(&random_walk(), &walk_data(), &params, 2).unwrap();
        assert_ne!(a.log_likelihood, b.log_likelihood);
        assert!(a.log_likelihood.is_finite() && b.log_likelihood.is_finite());
    }

    #[test]
    fn parallel_matches_serial() {
        let params = DVector::from_vec(vec![1.0]);
        let outputs = FilterOutputs {
            save_particles: true,
            filter_mean: true,
            filter_trajectory: true,
            ..FilterOutputs::default()
        };
        let serial = ParticleFilter::new(300).with_outputs(outputs);
        let parallel = serial.clone().with_parallel(true);
        let a = serial.run(&random_walk(), &walk_data(), &params, 5).unwrap();
        let b = parallel.run(&random_walk(), &walk_data(), &params, 5).unwrap();
        assert_eq!(a.log_likelihood, b.log_likelihood);
        assert_eq!(a.filter_means, b.filter_means);
        assert_eq!(a.filter_trajectory, b.filter_trajectory);
    }

    #[test]
    fn log_likelihood_is_sum_of_conditionals() {
        let result = ParticleFilter::new(100)
            .run(&random_walk(), &walk_data(), &DVector::from_vec(vec![1.0]), 3)
            .unwrap();
        let sum: f64 = result.cond_log_likelihoods.iter().sum();
        assert_approx_eq!(result.log_likelihood, sum, 1e-12);
        assert_eq!(result.effective_sample_sizes.len(), 15);
        assert!(result.effective_sample_sizes.iter().all(|&e| e >= 1.0 && e <= 100.0));
        assert!(!result.has_collapsed());
    }

    #[test]
    fn single_particle_is_pure_simulation() {
        let result = ParticleFilter::new(1)
            .run(&random_walk(), &walk_data(), &DVector::from_vec(vec![1.0]), 3)
            .unwrap();
        assert!(result.log_likelihood.is_finite());
        assert!(result.effective_sample_sizes.iter().all(|&e| e == 1.0));
    }

    #[test]
    fn histories_have_expected_shapes() {
        let outputs = FilterOutputs {
            save_particles: true,
            filter_mean: true,
            pred_mean: true,
            pred_var: true,
            filter_trajectory: true,
        };
        let result = ParticleFilter::new(50)
            .with_outputs(outputs)
            .run(&random_walk(), &walk_data(), &DVector::from_vec(vec![1.0]), 4)
            .unwrap();
        let history = result.particle_history.as_ref().unwrap();
        assert_eq!(history.len(), 16);
        assert_eq!(history[0].time(), 0.0);
        assert!(history.iter().all(|set| set.len() == 50));
        assert!(history[0].states().iter().all(|s| s[0] == 0.0));
        assert_eq!(result.filter_means.as_ref().unwrap().len(), 15);
        assert_eq!(result.pred_means.as_ref().unwrap().len(), 15);
        assert!(result.pred_vars.as_ref().unwrap().iter().all(|v| v[0] >= 0.0));
        let trajectory = result.filter_trajectory.as_ref().unwrap();
        assert_eq!(trajectory.len(), 16);
        assert_eq!(trajectory[0][0], 0.0);
    }

    #[test]
    fn trajectory_follows_ancestry() {
        let outputs = FilterOutputs {
            save_particles: true,
            filter_trajectory: true,
            ..FilterOutputs::default()
        };
        let result = ParticleFilter::new(20)
            .with_outputs(outputs)
            .run(&random_walk(), &walk_data(), &DVector::from_vec(vec![1.0]), 8)
            .unwrap();
        let history = result.particle_history.unwrap();
        let trajectory = result.filter_trajectory.unwrap();
        // Every point of the trajectory is a particle of the matching filtering set.
        for (n, point) in trajectory.iter().enumerate() {
            assert!(history[n].states().iter().any(|s| s == point));
        }
    }

    fn never_matches() -> impl PompModel {
        ClosureModel::new(
            |_p: &DVector<f64>, _rng: &mut rand::rngs::StdRng| Ok(DVector::from_element(1, 0.0)),
            |x: &DVector<f64>, _p: &DVector<f64>, _t: f64, _dt: f64, _rng: &mut rand::rngs::StdRng| {
                Ok(x.clone())
            },
            |x: &DVector<f64>, y: &DVector<f64>, _p: &DVector<f64>| {
                Ok(if (x[0] - y[0]).abs() < 0.5 { 1.0 } else { 0.0 })
            },
        )
    }

    #[test]
    fn collapse_is_recorded_not_fatal() {
        let data = Observations::from_scalars(0.0, vec![1.0, 2.0, 3.0], &[0.0, 5.0, 0.0]).unwrap();
        let result = ParticleFilter::new(10)
            .run(&never_matches(), &data, &DVector::zeros(0), 1)
            .unwrap();
        assert_eq!(result.collapsed_steps, vec![1]);
        assert_eq!(result.cond_log_likelihoods[0], 0.0);
        assert_eq!(result.cond_log_likelihoods[1], f64::NEG_INFINITY);
        assert_eq!(result.cond_log_likelihoods[2], 0.0);
        assert_eq!(result.log_likelihood, f64::NEG_INFINITY);
        assert_eq!(result.effective_sample_sizes[1], 0.0);
    }

    #[test]
    fn collapse_floor_keeps_total_finite() {
        let data = Observations::from_scalars(0.0, vec![1.0, 2.0], &[5.0, 0.0]).unwrap();
        let result = ParticleFilter::new(10)
            .with_collapse_policy(CollapsePolicy::Floor {
                log_likelihood: -1000.0,
            })
            .run(&never_matches(), &data, &DVector::zeros(0), 1)
            .unwrap();
        assert_eq!(result.log_likelihood, -1000.0);
        assert!(result.has_collapsed());
    }

    #[test]
    fn collapse_limit_aborts() {
        let data = Observations::from_scalars(0.0, vec![1.0, 2.0, 3.0], &[5.0, 5.0, 5.0]).unwrap();
        let err = ParticleFilter::new(10)
            .with_max_collapses(Some(1))
            .run(&never_matches(), &data, &DVector::zeros(0), 1)
            .unwrap_err();
        assert!(matches!(
            err,
            PompError::FilterCollapse {
                collapses: 2,
                limit: 1
            }
        ));
    }

    #[test]
    fn invalid_parameters_abort_before_sampling() {
        let model = ClosureModel::new(
            |_p: &DVector<f64>, _rng: &mut rand::rngs::StdRng| -> PompResult<DVector<f64>> {
                panic!("sampled despite invalid parameters")
            },
            |x: &DVector<f64>, _p: &DVector<f64>, _t: f64, _dt: f64, _rng: &mut rand::rngs::StdRng| {
                Ok(x.clone())
            },
            |_x: &DVector<f64>, _y: &DVector<f64>, _p: &DVector<f64>| Ok(1.0),
        )
        .with_parameter_check(|p: &DVector<f64>| {
            if p[0] < 0.0 {
                Err(PompError::invalid_parameter("sigma", p[0], "must be non-negative"))
            } else {
                Ok(())
            }
        });
        let err = ParticleFilter::new(10)
            .run(&model, &walk_data(), &DVector::from_vec(vec![-1.0]), 1)
            .unwrap_err();
        assert!(matches!(err, PompError::InvalidParameter { .. }));
    }

    #[test]
    fn invalid_parameter_from_density_aborts() {
        let model = ClosureModel::new(
            |_p: &DVector<f64>, _rng: &mut rand::rngs::StdRng| Ok(DVector::from_element(1, 0.0)),
            |x: &DVector<f64>, _p: &DVector<f64>, _t: f64, _dt: f64, _rng: &mut rand::rngs::StdRng| {
                Ok(x.clone())
            },
            |_x: &DVector<f64>, _y: &DVector<f64>, p: &DVector<f64>| {
                Err(PompError::invalid_parameter("tau", p[0], "must be positive"))
            },
        );
        let err = ParticleFilter::new(5)
            .run(&model, &walk_data(), &DVector::from_vec(vec![0.0]), 1)
            .unwrap_err();
        assert!(matches!(err, PompError::InvalidParameter { .. }));
    }

    #[test]
    fn failed_densities_become_zero_weights() {
        // Odd-numbered particles start at 1.0 and fail to evaluate.
        let model = ClosureModel::new(
            |_p: &DVector<f64>, rng: &mut rand::rngs::StdRng| {
                Ok(DVector::from_element(1, if rng.random::<bool>() { 1.0 } else { 0.0 }))
            },
            |x: &DVector<f64>, _p: &DVector<f64>, _t: f64, _dt: f64, _rng: &mut rand::rngs::StdRng| {
                Ok(x.clone())
            },
            |x: &DVector<f64>, _y: &DVector<f64>, _p: &DVector<f64>| {
                if x[0] > 0.5 {
                    Err(PompError::Evaluation("overflow".into()))
                } else {
                    Ok(0.5)
                }
            },
        );
        let data = Observations::from_scalars(0.0, vec![1.0, 2.0], &[0.0, 0.0]).unwrap();
        let result = ParticleFilter::new(64).run(&model, &data, &DVector::zeros(0), 3).unwrap();
        assert!(result.weight_failures > 0);
        assert!(!result.has_collapsed());
        // After the first resampling only evaluable particles remain.
        assert_approx_eq!(result.cond_log_likelihoods[1], 0.5f64.ln(), 1e-12);
    }

    #[test]
    fn infinite_density_is_rejected() {
        let model = ClosureModel::new(
            |_p: &DVector<f64>, _rng: &mut rand::rngs::StdRng| Ok(DVector::from_element(1, 0.0)),
            |x: &DVector<f64>, _p: &DVector<f64>, _t: f64, _dt: f64, _rng: &mut rand::rngs::StdRng| {
                Ok(x.clone())
            },
            |_x: &DVector<f64>, _y: &DVector<f64>, _p: &DVector<f64>| Ok(f64::INFINITY),
        );
        let err = ParticleFilter::new(5)
            .run(&model, &walk_data(), &DVector::zeros(0), 1)
            .unwrap_err();
        assert!(matches!(err, PompError::InvalidDensity { step: 0, .. }));
    }

    #[test]
    fn step_csv_has_one_row_per_observation() {
        let result = ParticleFilter::new(30)
            .with_outputs(FilterOutputs {
                filter_mean: true,
                ..FilterOutputs::default()
            })
            .run(&random_walk(), &walk_data(), &DVector::from_vec(vec![1.0]), 2)
            .unwrap();
        let file = tempfile::NamedTempFile::new().unwrap();
        result.to_csv(file.path()).unwrap();
        let mut rdr = csv::Reader::from_path(file.path()).unwrap();
        let headers = rdr.headers().unwrap().clone();
        assert_eq!(headers.len(), 5);
        assert_eq!(&headers[4], "filter_mean_0");
        assert_eq!(rdr.records().count(), 15);
        assert_eq!(result.step_records().len(), 15);
    }
}
