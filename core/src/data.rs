//! Time-stamped observation sequences.
//!
//! [`Observations`] holds the data a filter is run against: an initial time `t0` at
//! which the latent process starts, and `N ≥ 1` observations at non-decreasing times
//! `t_1..t_N`. Values are vectors; a `NaN` component marks a missing measurement.
//! CSV loading is header based so that the same reader serves any model.

use std::path::Path;

use log::debug;
use nalgebra::DVector;

use crate::error::{PompError, PompResult};

/// An immutable sequence of observations with their times.
#[derive(Clone, Debug, PartialEq)]
pub struct Observations {
    t0: f64,
    times: Vec<f64>,
    values: Vec<DVector<f64>>,
}

impl Observations {
    /// Build and validate an observation sequence.
    ///
    /// # Errors
    /// - [`PompError::DimensionMismatch`] if there are no observations, `times` and
    ///   `values` differ in length, or the values differ in dimension.
    /// - [`PompError::InvalidData`] if a time is not finite, times decrease, or
    ///   `t0 > times[0]`.
    pub fn new(t0: f64, times: Vec<f64>, values: Vec<DVector<f64>>) -> PompResult<Self> {
        if times.is_empty() {
            return Err(PompError::DimensionMismatch(
                "observation sequence is empty".to_string(),
            ));
        }
        if times.len() != values.len() {
            return Err(PompError::DimensionMismatch(format!(
                "{} times but {} observations",
                times.len(),
                values.len()
            )));
        }
        let dim = values[0].len();
        if let Some((n, v)) = values.iter().enumerate().find(|(_, v)| v.len() != dim) {
            return Err(PompError::DimensionMismatch(format!(
                "observation {n} has dimension {} but observation 0 has dimension {dim}",
                v.len()
            )));
        }
        if !t0.is_finite() || times.iter().any(|t| !t.is_finite()) {
            return Err(PompError::InvalidData("times must be finite".to_string()));
        }
        if t0 > times[0] {
            return Err(PompError::InvalidData(format!(
                "t0 = {t0} is after the first observation time {}",
                times[0]
            )));
        }
        if let Some(w) = times.windows(2).position(|w| w[1] < w[0]) {
            return Err(PompError::InvalidData(format!(
                "observation times decrease at index {}",
                w + 1
            )));
        }
        Ok(Observations { t0, times, values })
    }

    /// Scalar observations, one per time.
    pub fn from_scalars(t0: f64, times: Vec<f64>, values: &[f64]) -> PompResult<Self> {
        let values = values.iter().map(|&v| DVector::from_element(1, v)).collect();
        Observations::new(t0, times, values)
    }

    pub fn t0(&self) -> f64 {
        self.t0
    }
    pub fn times(&self) -> &[f64] {
        &self.times
    }
    pub fn values(&self) -> &[DVector<f64>] {
        &self.values
    }
    /// Number of observations `N`.
    pub fn len(&self) -> usize {
        self.times.len()
    }
    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }
    /// Dimension of each observation vector.
    pub fn dimension(&self) -> usize {
        self.values[0].len()
    }
    /// Start time and length of the interval that ends at observation `n` (0-based).
    pub fn interval(&self, n: usize) -> (f64, f64) {
        let start = if n == 0 { self.t0 } else { self.times[n - 1] };
        (start, self.times[n] - start)
    }

    /// Read observations from a CSV file with a header row.
    ///
    /// # Arguments
    /// * `path` - CSV file to read.
    /// * `time_column` - Name of the column holding observation times.
    /// * `value_columns` - Names of the columns forming each observation vector, in
    ///   order.
    /// * `t0` - Start time of the latent process. When `None`, one observation spacing
    ///   before the first time is used (or the first time itself for a single row).
    ///
    /// Empty cells and `NA` are read as missing (`NaN`).
    pub fn from_csv<P: AsRef<Path>>(
        path: P,
        time_column: &str,
        value_columns: &[&str],
        t0: Option<f64>,
    ) -> PompResult<Self> {
        let mut rdr = csv::Reader::from_path(path.as_ref())?;
        let headers = rdr.headers()?.clone();
        let position = |name: &str| -> PompResult<usize> {
            headers.iter().position(|h| h.trim() == name).ok_or_else(|| {
                PompError::InvalidData(format!("column `{name}` not found in CSV header"))
            })
        };
        let time_index = position(time_column)?;
        let value_indices = value_columns
            .iter()
            .map(|name| position(*name))
            .collect::<PompResult<Vec<_>>>()?;

        let mut times = Vec::new();
        let mut values = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result?;
            let cell = |index: usize| -> PompResult<f64> {
                let raw = record.get(index).unwrap_or("").trim();
                if raw.is_empty() || raw.eq_ignore_ascii_case("na") {
                    return Ok(f64::NAN);
                }
                raw.parse::<f64>().map_err(|_| {
                    PompError::InvalidData(format!("row {}: cannot parse `{raw}`", row + 1))
                })
            };
            times.push(cell(time_index)?);
            let value: Vec<f64> = value_indices
                .iter()
                .map(|&i| cell(i))
                .collect::<PompResult<_>>()?;
            values.push(DVector::from_vec(value));
        }
        debug!(
            "Read {} observations from {}",
            times.len(),
            path.as_ref().display()
        );
        let t0 = match (t0, times.as_slice()) {
            (Some(t0), _) => t0,
            (None, [first, second, ..]) => first - (second - first),
            (None, [first]) => *first,
            (None, []) => 0.0,
        };
        Observations::new(t0, times, values)
    }

    /// Write the observations as CSV with the given column names.
    pub fn to_csv<P: AsRef<Path>>(
        &self,
        path: P,
        time_column: &str,
        value_columns: &[&str],
    ) -> PompResult<()> {
        if value_columns.len() != self.dimension() {
            return Err(PompError::DimensionMismatch(format!(
                "{} column names for observations of dimension {}",
                value_columns.len(),
                self.dimension()
            )));
        }
        let mut writer = csv::Writer::from_path(path)?;
        let mut header = vec![time_column.to_string()];
        header.extend(value_columns.iter().map(|s| s.to_string()));
        writer.write_record(&header)?;
        for (t, y) in self.times.iter().zip(self.values.iter()) {
            let mut row = vec![t.to_string()];
            row.extend(y.iter().map(|v| {
                if v.is_nan() {
                    "NA".to_string()
                } else {
                    v.to_string()
                }
            }));
            writer.write_record(&row)?;
        }
        writer.flush()?;
        Ok(())
    }
}
