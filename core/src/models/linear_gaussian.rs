//! Linear-Gaussian state-space model.
//!
//! ```text
//! X_0 ~ N(m_0, diag(s_0²))
//! X_n = A X_{n-1} + diag(q) ε_n,   ε_n ~ N(0, I_n)
//! Y_n = C X_n + diag(r) η_n,       η_n ~ N(0, I_m)
//! ```
//!
//! One transition is taken per observation regardless of the time spacing. The
//! likelihood is available exactly from the Kalman filter, see
//! [`LinearGaussianModel::kalman_log_likelihood`], which makes this model the reference
//! for checking particle-filter estimates.
//!
//! Parameter vectors are flat, laid out as
//! `[A (n×n, row-major), C (m×n, row-major), q (n), r (m), m_0 (n), s_0 (n)]`.
use std::f64::consts::PI;

use log::debug;
use nalgebra::{Cholesky, DMatrix, DVector};
use rand::Rng;
use rand::rngs::StdRng;
use rand_distr::StandardNormal;

use crate::data::Observations;
use crate::error::{PompError, PompResult};
use crate::{ObservationSampler, PompModel};

/// Linear-Gaussian model with `state_dim` latent and `obs_dim` observed components.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LinearGaussianModel {
    pub state_dim: usize,
    pub obs_dim: usize,
}

/// Structured form of a linear-Gaussian parameter vector.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearGaussianParams {
    pub transition: DMatrix<f64>,
    pub observation: DMatrix<f64>,
    pub process_sd: DVector<f64>,
    pub measurement_sd: DVector<f64>,
    pub initial_mean: DVector<f64>,
    pub initial_sd: DVector<f64>,
}

impl LinearGaussianParams {
    /// Parameters of the one-dimensional model.
    pub fn scalar(
        a: f64,
        c: f64,
        process_sd: f64,
        measurement_sd: f64,
        initial_mean: f64,
        initial_sd: f64,
    ) -> Self {
        LinearGaussianParams {
            transition: DMatrix::from_element(1, 1, a),
            observation: DMatrix::from_element(1, 1, c),
            process_sd: DVector::from_element(1, process_sd),
            measurement_sd: DVector::from_element(1, measurement_sd),
            initial_mean: DVector::from_element(1, initial_mean),
            initial_sd: DVector::from_element(1, initial_sd),
        }
    }

    /// Flatten into the parameter vector layout.
    pub fn pack(&self) -> DVector<f64> {
        let mut flat = Vec::new();
        // nalgebra is column-major; the layout is row-major.
        flat.extend(self.transition.transpose().iter());
        flat.extend(self.observation.transpose().iter());
        flat.extend(self.process_sd.iter());
        flat.extend(self.measurement_sd.iter());
        flat.extend(self.initial_mean.iter());
        flat.extend(self.initial_sd.iter());
        DVector::from_vec(flat)
    }
}

impl LinearGaussianModel {
    pub fn new(state_dim: usize, obs_dim: usize) -> Self {
        LinearGaussianModel { state_dim, obs_dim }
    }

    /// Recover the state dimension from the length of a parameter vector and the
    /// observation dimension.
    pub fn infer(param_count: usize, obs_dim: usize) -> PompResult<Self> {
        (1..=param_count)
            .map(|n| LinearGaussianModel::new(n, obs_dim))
            .take_while(|model| model.parameter_count() <= param_count)
            .find(|model| model.parameter_count() == param_count)
            .ok_or_else(|| {
                PompError::DimensionMismatch(format!(
                    "{param_count} parameters do not fit a linear-Gaussian model with {obs_dim} observed component(s)"
                ))
            })
    }

    /// Length of the flat parameter vector.
    pub fn parameter_count(&self) -> usize {
        let (n, m) = (self.state_dim, self.obs_dim);
        n * n + m * n + n + m + n + n
    }

    pub fn unpack(&self, params: &DVector<f64>) -> PompResult<LinearGaussianParams> {
        if params.len() != self.parameter_count() {
            return Err(PompError::DimensionMismatch(format!(
                "linear-Gaussian model with n = {}, m = {} takes {} parameters, got {}",
                self.state_dim,
                self.obs_dim,
                self.parameter_count(),
                params.len()
            )));
        }
        let (n, m) = (self.state_dim, self.obs_dim);
        let (a, rest) = params.as_slice().split_at(n * n);
        let (c, rest) = rest.split_at(m * n);
        let (q, rest) = rest.split_at(n);
        let (r, rest) = rest.split_at(m);
        let (m0, s0) = rest.split_at(n);
        Ok(LinearGaussianParams {
            transition: DMatrix::from_row_slice(n, n, a),
            observation: DMatrix::from_row_slice(m, n, c),
            process_sd: DVector::from_column_slice(q),
            measurement_sd: DVector::from_column_slice(r),
            initial_mean: DVector::from_column_slice(m0),
            initial_sd: DVector::from_column_slice(s0),
        })
    }

    /// Exact log-likelihood of `data` by the Kalman filter. `NaN` observation components
    /// are treated as missing and dropped from the update.
    ///
    /// # Errors
    /// Parameter errors as for [`PompModel::check_parameters`], a
    /// [`PompError::DimensionMismatch`] if the observations are not `obs_dim`-dimensional,
    /// and [`PompError::Numerical`] if an innovation covariance is not positive
    /// definite.
    pub fn kalman_log_likelihood(
        &self,
        params: &DVector<f64>,
        data: &Observations,
    ) -> PompResult<f64> {
        self.check_parameters(params)?;
        if data.dimension() != self.obs_dim {
            return Err(PompError::DimensionMismatch(format!(
                "observations have dimension {}, model expects {}",
                data.dimension(),
                self.obs_dim
            )));
        }
        let p = self.unpack(params)?;
        let q = DMatrix::from_diagonal(&p.process_sd.map(|s| s * s));
        let mut mean = p.initial_mean.clone();
        let mut cov = DMatrix::from_diagonal(&p.initial_sd.map(|s| s * s));
        let mut log_likelihood = 0.0;

        for (n, y) in data.values().iter().enumerate() {
            mean = &p.transition * &mean;
            cov = symmetrize(&(&p.transition * &cov * p.transition.transpose() + &q));

            let observed: Vec<usize> = (0..self.obs_dim).filter(|&i| !y[i].is_nan()).collect();
            if observed.is_empty() {
                continue;
            }
            let c = p.observation.select_rows(observed.iter());
            let r = DMatrix::from_diagonal(&DVector::from_iterator(
                observed.len(),
                observed.iter().map(|&i| p.measurement_sd[i].powi(2)),
            ));
            let y_obs = DVector::from_iterator(observed.len(), observed.iter().map(|&i| y[i]));

            let innovation = &y_obs - &c * &mean;
            let s = symmetrize(&(&c * &cov * c.transpose() + r));
            let chol = Cholesky::new(s).ok_or_else(|| {
                PompError::Numerical(format!(
                    "innovation covariance is not positive definite at step {n}"
                ))
            })?;
            let log_det: f64 = 2.0 * chol.l().diagonal().iter().map(|d| d.ln()).sum::<f64>();
            let solved = chol.solve(&innovation);
            let k = observed.len() as f64;
            log_likelihood += -0.5 * (k * (2.0 * PI).ln() + log_det + innovation.dot(&solved));

            // K = P Cᵀ S⁻¹
            let gain = chol.solve(&(&c * &cov)).transpose();
            mean += &gain * innovation;
            cov = symmetrize(&(&cov - &gain * &c * &cov));
        }
        debug!("Kalman log-likelihood = {log_likelihood:.6}");
        Ok(log_likelihood)
    }
}

fn symmetrize(m: &DMatrix<f64>) -> DMatrix<f64> {
    0.5 * (m + m.transpose())
}

fn standard_normal_vector(len: usize, rng: &mut StdRng) -> DVector<f64> {
    DVector::from_fn(len, |_, _| rng.sample(StandardNormal))
}

impl PompModel for LinearGaussianModel {
    fn initial_state(&self, params: &DVector<f64>, rng: &mut StdRng) -> PompResult<DVector<f64>> {
        let p = self.unpack(params)?;
        let z = standard_normal_vector(self.state_dim, rng);
        Ok(p.initial_mean + p.initial_sd.component_mul(&z))
    }

    fn transition(
        &self,
        state: &DVector<f64>,
        params: &DVector<f64>,
        _t: f64,
        _dt: f64,
        rng: &mut StdRng,
    ) -> PompResult<DVector<f64>> {
        let p = self.unpack(params)?;
        let z = standard_normal_vector(self.state_dim, rng);
        Ok(&p.transition * state + p.process_sd.component_mul(&z))
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

    /// Sum of independent normal log densities over the observed components.
    fn log_measurement_density(
        &self,
        state: &DVector<f64>,
        observation: &DVector<f64>,
        params: &DVector<f64>,
    ) -> PompResult<f64> {
        if observation.len() != self.obs_dim {
            return Err(PompError::DimensionMismatch(format!(
                "observation has {} components, model expects {}",
                observation.len(),
                self.obs_dim
            )));
        }
        let p = self.unpack(params)?;
        let expected = &p.observation * state;
        let mut log_density = 0.0;
        for i in 0..self.obs_dim {
            let y = observation[i];
            if y.is_nan() {
                continue;
            }
            let sd = p.measurement_sd[i];
            let z = (y - expected[i]) / sd;
            log_density += -0.5 * z * z - sd.ln() - 0.5 * (2.0 * PI).ln();
        }
        Ok(log_density)
    }

    fn check_parameters(&self, params: &DVector<f64>) -> PompResult<()> {
        let p = self.unpack(params)?;
        if let Some(v) = params.iter().find(|v| !v.is_finite()) {
            return Err(PompError::invalid_parameter(
                "theta",
                *v,
                "all parameters must be finite",
            ));
        }
        for (name, sds) in [
            ("process_sd", &p.process_sd),
            ("initial_sd", &p.initial_sd),
        ] {
            if let Some(v) = sds.iter().find(|v| **v < 0.0) {
                return Err(PompError::invalid_parameter(name, *v, "must be non-negative"));
            }
        }
        if let Some(v) = p.measurement_sd.iter().find(|v| **v <= 0.0) {
            return Err(PompError::invalid_parameter(
                "measurement_sd",
                *v,
                "must be positive",
            ));
        }
        Ok(())
    }
}

impl ObservationSampler for LinearGaussianModel {
    fn sample_observation(
        &self,
        state: &DVector<f64>,
        params: &DVector<f64>,
        rng: &mut StdRng,
    ) -> PompResult<DVector<f64>> {
        let p = self.unpack(params)?;
        let z = standard_normal_vector(self.obs_dim, rng);
        Ok(&p.observation * state + p.measurement_sd.component_mul(&z))
    }
}
