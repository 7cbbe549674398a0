//! Forward simulation of a model and its observations.
use log::info;
use nalgebra::DVector;

use crate::ObservationSampler;
use crate::data::Observations;
use crate::error::{PompError, PompResult};
use crate::streams::RngStream;

const STATE_STREAM: u64 = 0;
const OBSERVATION_STREAM: u64 = 1;

/// One simulated realisation.
#[derive(Clone, Debug)]
pub struct Simulation {
    /// Latent states `x_0, x_1, ..., x_N`.
    pub states: Vec<DVector<f64>>,
    pub observations: Observations,
}

/// Simulate the latent process from `t0` and draw one observation at each of `times`.
///
/// Step `n` draws its transition from stream `seed/n/0` and its observation from
/// `seed/n/1`, with the initial state from `seed/0/0`.
pub fn simulate<M: ObservationSampler + ?Sized>(
    model: &M,
    params: &DVector<f64>,
    t0: f64,
    times: &[f64],
    seed: u64,
) -> PompResult<Simulation> {
    if times.is_empty() {
        return Err(PompError::DimensionMismatch(
            "no observation times to simulate".to_string(),
        ));
    }
    model.check_parameters(params)?;
    let root = RngStream::new(seed);

    let mut state = model.initial_state(params, &mut root.child(0).child(STATE_STREAM).rng())?;
    let mut states = Vec::with_capacity(times.len() + 1);
    let mut values = Vec::with_capacity(times.len());
    states.push(state.clone());
    let mut t_prev = t0;
    for (n, &t) in times.iter().enumerate() {
        let step = root.child(n as u64 + 1);
        let mut rng = step.child(STATE_STREAM).rng();
        state = model.transition(&state, params, t_prev, t - t_prev, &mut rng)?;
        values.push(model.sample_observation(
            &state,
            params,
            &mut step.child(OBSERVATION_STREAM).rng(),
        )?);
        states.push(state.clone());
        t_prev = t;
    }
    let observations = Observations::new(t0, times.to_vec(), values)?;
    info!("Simulated {} observations from t0 = {t0}", times.len());
    Ok(Simulation {
        states,
        observations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::linear_gaussian::{LinearGaussianModel, LinearGaussianParams};
    use crate::models::sir::SirModel;

    #[test]
    fn simulation_is_reproducible() {
        let model = LinearGaussianModel::new(1, 1);
        let params = LinearGaussianParams::scalar(0.9, 1.0, 1.0, 1.0, 0.0, 1.0).pack();
        let times = [1.0, 2.0, 3.0, 4.0];
        let a = simulate(&model, &params, 0.0, &times, 21).unwrap();
        let b = simulate(&model, &params, 0.0, &times, 21).unwrap();
        let c = simulate(&model, &params, 0.0, &times, 22).unwrap();
        assert_eq!(a.observations, b.observations);
        assert_eq!(a.states.len(), 5);
        assert_ne!(a.observations, c.observations);
    }

    #[test]
    fn sir_reports_are_bounded_by_recoveries() {
        let model = SirModel::default();
        let params = DVector::from_vec(vec![2.0, 1.0, 0.5, 0.95, 5_000.0]);
        let times: Vec<f64> = (1..=30).map(|w| w as f64).collect();
        let sim = simulate(&model, &params, 0.0, &times, 4).unwrap();
        for (state, y) in sim.states[1..].iter().zip(sim.observations.values()) {
            assert!(y[0] <= state[3]);
            assert_eq!(state[0] + state[1] + state[2], 5_000.0);
        }
    }

    #[test]
    fn rejects_invalid_parameters() {
        let model = SirModel::default();
        let params = DVector::from_vec(vec![2.0, 1.0, 1.5, 0.95, 5_000.0]);
        assert!(simulate(&model, &params, 0.0, &[1.0], 4).is_err());
        let valid = DVector::from_vec(vec![2.0, 1.0, 0.5, 0.95, 5_000.0]);
        assert!(simulate(&model, &valid, 0.0, &[], 4).is_err());
    }
}
