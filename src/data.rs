//! Observations and datasets.

use thiserror::Error;

/// Reasons a dataset cannot be used.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DatasetError {
    #[error("need at least {required} observations, got {actual}")]
    TooFewObservations { required: usize, actual: usize },
    #[error("x has {x} values but y has {y}")]
    LengthMismatch { x: usize, y: usize },
    #[error("observation {index} is not finite: ({x}, {y})")]
    NonFinite { index: usize, x: f64, y: f64 },
    #[error("x has zero variance, the slope is not identifiable")]
    ConstantPredictor,
    #[error("y has zero variance, the correlation is undefined")]
    ConstantResponse,
    #[error("row {index} is out of range for a dataset of {len} observations")]
    RowOutOfRange { index: usize, len: usize },
    #[error("covariance matrix is not positive definite: {0}")]
    InvalidCovariance(String),
}

/// A single `(x, y)` pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Observation {
    pub x: f64,
    pub y: f64,
}

impl Observation {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl From<(f64, f64)> for Observation {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// An ordered sequence of observations with finite coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    observations: Vec<Observation>,
}

impl Dataset {
    /// Build a dataset. Fails on an empty input or non-finite values.
    pub fn new(observations: Vec<Observation>) -> Result<Self, DatasetError> {
        if observations.is_empty() {
            return Err(DatasetError::TooFewObservations {
                required: 1,
                actual: 0,
            });
        }
        if let Some((index, obs)) = observations
            .iter()
            .enumerate()
            .find(|(_, obs)| !(obs.x.is_finite() && obs.y.is_finite()))
        {
            return Err(DatasetError::NonFinite {
                index,
                x: obs.x,
                y: obs.y,
            });
        }
        Ok(Self { observations })
    }

    /// Build a dataset from separate predictor and response columns.
    pub fn from_columns(x: &[f64], y: &[f64]) -> Result<Self, DatasetError> {
        if x.len() != y.len() {
            return Err(DatasetError::LengthMismatch {
                x: x.len(),
                y: y.len(),
            });
        }
        Self::new(
            x.iter()
                .zip(y)
                .map(|(&x, &y)| Observation { x, y })
                .collect(),
        )
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn x(&self) -> Vec<f64> {
        self.observations.iter().map(|obs| obs.x).collect()
    }

    pub fn y(&self) -> Vec<f64> {
        self.observations.iter().map(|obs| obs.y).collect()
    }

    pub(crate) fn observations_mut(&mut self) -> &mut [Observation] {
        &mut self.observations
    }

    /// The slope of a regression is only identifiable with two or more rows.
    pub fn ensure_fittable(&self) -> Result<(), DatasetError> {
        if self.len() < 2 {
            return Err(DatasetError::TooFewObservations {
                required: 2,
                actual: self.len(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn from_columns_pairs_values() {
        let data = Dataset::from_columns(&[1., 2., 3.], &[4., 5., 6.]).unwrap();
        assert_eq!(
            data.observations(),
            &[
                Observation::new(1., 4.),
                Observation::new(2., 5.),
                Observation::new(3., 6.)
            ]
        );
        assert_eq!(data.x(), vec![1., 2., 3.]);
        assert_eq!(data.y(), vec![4., 5., 6.]);
    }

    #[test]
    fn rejects_mismatched_columns() {
        let err = Dataset::from_columns(&[1., 2.], &[1.]).unwrap_err();
        assert_eq!(err, DatasetError::LengthMismatch { x: 2, y: 1 });
    }

    #[test]
    fn rejects_non_finite() {
        let err = Dataset::from_columns(&[1., f64::NAN], &[1., 2.]).unwrap_err();
        assert!(matches!(err, DatasetError::NonFinite { index: 1, .. }));
    }

    #[test]
    fn single_row_is_not_fittable() {
        let data = Dataset::new(vec![(1., 2.).into()]).unwrap();
        assert_eq!(
            data.ensure_fittable(),
            Err(DatasetError::TooFewObservations {
                required: 2,
                actual: 1
            })
        );
        assert!(Dataset::new(vec![]).is_err());
    }
}
