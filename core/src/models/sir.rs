//! Stochastic SIR epidemic with binomial case reporting.
//!
//! The latent state is `[S, I, R, H]`: susceptible, infected and recovered counts, and
//! `H`, the number of recoveries since the last observation. Over each observation
//! interval the model takes Euler-binomial sub-steps of length at most `substep`:
//!
//! ```text
//! ΔN_SI ~ Binomial(S, 1 - exp(-beta I / pop h))
//! ΔN_IR ~ Binomial(I, 1 - exp(-mu_ir h))
//! ```
//!
//! `H` is reset at the start of the interval and accumulates `ΔN_IR`. Reported cases
//! are `Binomial(H, rho)`.
//!
//! Parameters are `[beta, mu_ir, rho, eta, pop]`; `eta` is the initial susceptible
//! fraction. The epidemic starts with a single infected individual.
use log::trace;
use nalgebra::DVector;
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::Binomial;
use statrs::distribution::{Binomial as BinomialPmf, Discrete};

use crate::error::{PompError, PompResult};
use crate::{ObservationSampler, PompModel, param};

pub const PARAMETER_NAMES: [&str; 5] = ["beta", "mu_ir", "rho", "eta", "pop"];

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SirModel {
    /// Largest Euler sub-step, in the time units of the data.
    pub substep: f64,
}

impl Default for SirModel {
    fn default() -> Self {
        SirModel { substep: 1.0 / 7.0 }
    }
}

struct SirParams {
    beta: f64,
    mu_ir: f64,
    rho: f64,
    eta: f64,
    pop: f64,
}

impl SirModel {
    pub fn new(substep: f64) -> PompResult<Self> {
        if !(substep > 0.0 && substep.is_finite()) {
            return Err(PompError::invalid_parameter(
                "substep",
                substep,
                "must be positive and finite",
            ));
        }
        Ok(SirModel { substep })
    }

    fn unpack(&self, params: &DVector<f64>) -> PompResult<SirParams> {
        if params.len() != PARAMETER_NAMES.len() {
            return Err(PompError::DimensionMismatch(format!(
                "SIR model takes {} parameters ({}), got {}",
                PARAMETER_NAMES.len(),
                PARAMETER_NAMES.join(", "),
                params.len()
            )));
        }
        Ok(SirParams {
            beta: param(params, 0, "beta")?,
            mu_ir: param(params, 1, "mu_ir")?,
            rho: param(params, 2, "rho")?,
            eta: param(params, 3, "eta")?,
            pop: param(params, 4, "pop")?,
        })
    }
}

fn binomial_draw(n: f64, p: f64, rng: &mut StdRng) -> PompResult<f64> {
    let dist = Binomial::new(n as u64, p)
        .map_err(|e| PompError::Evaluation(format!("binomial({n}, {p}): {e}")))?;
    Ok(rng.sample(dist) as f64)
}

impl PompModel for SirModel {
    fn initial_state(&self, params: &DVector<f64>, _rng: &mut StdRng) -> PompResult<DVector<f64>> {
        let p = self.unpack(params)?;
        let infected = 1.0;
        let susceptible = (p.eta * (p.pop - infected)).round();
        let recovered = p.pop - susceptible - infected;
        Ok(DVector::from_vec(vec![susceptible, infected, recovered, 0.0]))
    }

    fn transition(
        &self,
        state: &DVector<f64>,
        params: &DVector<f64>,
        t: f64,
        dt: f64,
        rng: &mut StdRng,
    ) -> PompResult<DVector<f64>> {
        let p = self.unpack(params)?;
        let (mut s, mut i, mut r) = (state[0], state[1], state[2]);
        let mut h = 0.0;
        let steps = (dt / self.substep).ceil() as usize;
        if steps > 0 {
            let step = dt / steps as f64;
            let p_recover = 1.0 - (-p.mu_ir * step).exp();
            for _ in 0..steps {
                let p_infect = 1.0 - (-p.beta * i / p.pop * step).exp();
                let infections = binomial_draw(s, p_infect, rng)?;
                let recoveries = binomial_draw(i, p_recover, rng)?;
                s -= infections;
                i += infections - recoveries;
                r += recoveries;
                h += recoveries;
            }
        }
        trace!("SIR t = {t}: S = {s}, I = {i}, R = {r}, H = {h}");
        Ok(DVector::from_vec(vec![s, i, r, h]))
    }

    fn measurement_density(
        &self,
        state: &DVector<f64>,
        observation: &DVector<f64>,
        params: &DVector<f64>,
    ) -> PompResult<f64> {
        self.log_measurement_density(state, observation, params)
            .map(f64::exp)
    }

    fn log_measurement_density(
        &self,
        state: &DVector<f64>,
        observation: &DVector<f64>,
        params: &DVector<f64>,
    ) -> PompResult<f64> {
        if observation.len() != 1 {
            return Err(PompError::DimensionMismatch(format!(
                "SIR reports are scalar, got {} components",
                observation.len()
            )));
        }
        let p = self.unpack(params)?;
        let reports = observation[0];
        if reports.is_nan() {
            return Ok(0.0);
        }
        let h = state[3];
        if reports < 0.0 || reports.fract() != 0.0 || reports > h {
            return Ok(f64::NEG_INFINITY);
        }
        let dist = BinomialPmf::new(p.rho, h as u64)
            .map_err(|e| PompError::Evaluation(format!("binomial({h}, {}): {e}", p.rho)))?;
        Ok(dist.ln_pmf(reports as u64))
    }

    fn check_parameters(&self, params: &DVector<f64>) -> PompResult<()> {
        let p = self.unpack(params)?;
        for (name, value) in PARAMETER_NAMES.iter().zip(params.iter()) {
            if !value.is_finite() {
                return Err(PompError::invalid_parameter(name, *value, "must be finite"));
            }
        }
        if p.beta < 0.0 {
            return Err(PompError::invalid_parameter("beta", p.beta, "must be non-negative"));
        }
        if p.mu_ir < 0.0 {
            return Err(PompError::invalid_parameter("mu_ir", p.mu_ir, "must be non-negative"));
        }
        if !(0.0..=1.0).contains(&p.rho) {
            return Err(PompError::invalid_parameter("rho", p.rho, "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&p.eta) {
            return Err(PompError::invalid_parameter("eta", p.eta, "must lie in [0, 1]"));
        }
        if p.pop < 1.0 || p.pop.fract() != 0.0 {
            return Err(PompError::invalid_parameter(
                "pop",
                p.pop,
                "must be a positive whole number",
            ));
        }
        Ok(())
    }
}

impl ObservationSampler for SirModel {
    fn sample_observation(
        &self,
        state: &DVector<f64>,
        params: &DVector<f64>,
        rng: &mut StdRng,
    ) -> PompResult<DVector<f64>> {
        let p = self.unpack(params)?;
        let reports = binomial_draw(state[3], p.rho, rng)?;
        Ok(DVector::from_element(1, reports))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;

    fn params() -> DVector<f64> {
        DVector::from_vec(vec![1.5, 0.5, 0.6, 0.9, 10_000.0])
    }

    #[test]
    fn initial_state_starts_with_one_infected() {
        let model = SirModel::default();
        let mut rng = StdRng::seed_from_u64(0);
        let x0 = model.initial_state(&params(), &mut rng).unwrap();
        assert_eq!(x0[1], 1.0);
        assert_eq!(x0[3], 0.0);
        assert_eq!(x0[0] + x0[1] + x0[2], 10_000.0);
        assert_eq!(x0[0], (0.9f64 * 9_999.0).round());
    }

    #[test]
    fn transition_conserves_population() {
        let model = SirModel::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut x = model.initial_state(&params(), &mut rng).unwrap();
        x[1] = 200.0;
        x[0] -= 199.0;
        let mut recovered_before = x[2];
        for week in 0..20 {
            x = model.transition(&x, &params(), week as f64, 1.0, &mut rng).unwrap();
            assert_eq!(x[0] + x[1] + x[2], 10_000.0);
            assert!(x.iter().all(|v| *v >= 0.0));
            // H counts recoveries over this interval only.
            assert_eq!(x[3], x[2] - recovered_before);
            recovered_before = x[2];
        }
    }

    #[test]
    fn zero_length_interval_resets_accumulator_only() {
        let model = SirModel::default();
        let mut rng = StdRng::seed_from_u64(3);
        let x = DVector::from_vec(vec![50.0, 10.0, 40.0, 7.0]);
        let y = model.transition(&x, &params(), 1.0, 0.0, &mut rng).unwrap();
        assert_eq!(y, DVector::from_vec(vec![50.0, 10.0, 40.0, 0.0]));
    }

    #[test]
    fn reporting_density_is_binomial() {
        let model = SirModel::default();
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 10.0]);
        let y = DVector::from_element(1, 6.0);
        // C(10, 6) 0.6^6 0.4^4
        let expected = 210.0 * 0.6f64.powi(6) * 0.4f64.powi(4);
        assert_approx_eq!(model.measurement_density(&x, &y, &params()).unwrap(), expected, 1e-12);
    }

    #[test]
    fn impossible_reports_have_zero_density() {
        let model = SirModel::default();
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 3.0]);
        for reports in [4.0, -1.0, 1.5] {
            let y = DVector::from_element(1, reports);
            assert_eq!(
                model.log_measurement_density(&x, &y, &params()).unwrap(),
                f64::NEG_INFINITY
            );
        }
        let missing = DVector::from_element(1, f64::NAN);
        assert_eq!(model.log_measurement_density(&x, &missing, &params()).unwrap(), 0.0);
    }

    #[test]
    fn parameter_checks() {
        let model = SirModel::default();
        assert!(model.check_parameters(&params()).is_ok());
        let mut bad = params();
        bad[2] = 1.2;
        assert!(matches!(
            model.check_parameters(&bad),
            Err(PompError::InvalidParameter { ref name, .. }) if name == "rho"
        ));
        let mut bad = params();
        bad[0] = -0.1;
        assert!(model.check_parameters(&bad).is_err());
        let mut bad = params();
        bad[4] = 100.5;
        assert!(model.check_parameters(&bad).is_err());
        assert!(matches!(
            model.check_parameters(&DVector::zeros(4)),
            Err(PompError::DimensionMismatch(_))
        ));
        assert!(SirModel::new(0.0).is_err());
    }

    #[test]
    fn sampled_reports_never_exceed_recoveries() {
        let model = SirModel::default();
        let mut rng = StdRng::seed_from_u64(5);
        let x = DVector::from_vec(vec![0.0, 0.0, 0.0, 25.0]);
        for _ in 0..100 {
            let y = model.sample_observation(&x, &params(), &mut rng).unwrap();
            assert!(y[0] >= 0.0 && y[0] <= 25.0);
        }
    }
}
