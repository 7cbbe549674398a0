//! A model assembled from closures.
use nalgebra::DVector;
use rand::rngs::StdRng;

use crate::PompModel;
use crate::error::PompResult;

type ParameterCheck = Box<dyn Fn(&DVector<f64>) -> PompResult<()> + Send + Sync>;

/// [`PompModel`] backed by an initial-state sampler, a transition sampler and a
/// measurement density.
///
/// ```rust
/// use nalgebra::DVector;
/// use pomp::models::closure::ClosureModel;
/// use rand::Rng;
/// use rand::rngs::StdRng;
///
/// let model = ClosureModel::new(
///     |_theta: &DVector<f64>, _rng: &mut StdRng| Ok(DVector::from_element(1, 0.0)),
///     |x: &DVector<f64>, _theta: &DVector<f64>, _t: f64, _dt: f64, rng: &mut StdRng| {
///         Ok(x.map(|v| v + rng.random_range(-1.0..1.0)))
///     },
///     |x: &DVector<f64>, y: &DVector<f64>, _theta: &DVector<f64>| {
///         Ok(if (x[0] - y[0]).abs() < 1.0 { 0.5 } else { 0.0 })
///     },
/// );
/// # let _ = model;
/// ```
pub struct ClosureModel<I, T, D> {
    init: I,
    transition: T,
    density: D,
    check: Option<ParameterCheck>,
}

impl<I, T, D> ClosureModel<I, T, D>
where
    I: Fn(&DVector<f64>, &mut StdRng) -> PompResult<DVector<f64>> + Sync,
    T: Fn(&DVector<f64>, &DVector<f64>, f64, f64, &mut StdRng) -> PompResult<DVector<f64>>
        + Sync,
    D: Fn(&DVector<f64>, &DVector<f64>, &DVector<f64>) -> PompResult<f64> + Sync,
{
    pub fn new(init: I, transition: T, density: D) -> Self {
        ClosureModel {
            init,
            transition,
            density,
            check: None,
        }
    }

    /// Validate parameter vectors before each run.
    pub fn with_parameter_check<C>(mut self, check: C) -> Self
    where
        C: Fn(&DVector<f64>) -> PompResult<()> + Send + Sync + 'static,
    {
        self.check = Some(Box::new(check));
        self
    }
}

impl<I, T, D> PompModel for ClosureModel<I, T, D>
where
    I: Fn(&DVector<f64>, &mut StdRng) -> PompResult<DVector<f64>> + Sync,
    T: Fn(&DVector<f64>, &DVector<f64>, f64, f64, &mut StdRng) -> PompResult<DVector<f64>>
        + Sync,
    D: Fn(&DVector<f64>, &DVector<f64>, &DVector<f64>) -> PompResult<f64> + Sync,
{
    fn initial_state(&self, params: &DVector<f64>, rng: &mut StdRng) -> PompResult<DVector<f64>> {
        (self.init)(params, rng)
    }

    fn transition(
        &self,
        state: &DVector<f64>,
        params: &DVector<f64>,
        t: f64,
        dt: f64,
        rng: &mut StdRng,
    ) -> PompResult<DVector<f64>> {
        (self.transition)(state, params, t, dt, rng)
    }

    fn measurement_density(
        &self,
        state: &DVector<f64>,
        observation: &DVector<f64>,
        params: &DVector<f64>,
    ) -> PompResult<f64> {
        (self.density)(state, observation, params)
    }

    fn check_parameters(&self, params: &DVector<f64>) -> PompResult<()> {
        match &self.check {
            Some(check) => check(params),
            None => Ok(()),
        }
    }
}
