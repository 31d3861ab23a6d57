//! Demonstration data: correlated bivariate normal draws and outlier injection.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;

use crate::data::{Dataset, DatasetError, Observation};

/// A 2x2 covariance matrix `[[xx, xy], [xy, yy]]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Covariance {
    pub xx: f64,
    pub xy: f64,
    pub yy: f64,
}

impl Covariance {
    pub fn new(xx: f64, xy: f64, yy: f64) -> Self {
        Self { xx, xy, yy }
    }

    /// Covariance of two variables with standard deviations `sd_x`, `sd_y`
    /// and correlation `rho`.
    pub fn from_correlation(sd_x: f64, sd_y: f64, rho: f64) -> Self {
        Self {
            xx: sd_x * sd_x,
            xy: rho * sd_x * sd_y,
            yy: sd_y * sd_y,
        }
    }

    pub fn correlation(&self) -> f64 {
        self.xy / (self.xx * self.yy).sqrt()
    }

    /// Lower Cholesky factor `(l11, l21, l22)`.
    fn cholesky(&self) -> Result<(f64, f64, f64), DatasetError> {
        if !(self.xx.is_finite() && self.xy.is_finite() && self.yy.is_finite()) {
            return Err(DatasetError::InvalidCovariance(format!("{self:?}")));
        }
        if self.xx <= 0. {
            return Err(DatasetError::InvalidCovariance(format!(
                "variance of x must be positive, got {}",
                self.xx
            )));
        }
        let l11 = self.xx.sqrt();
        let l21 = self.xy / l11;
        let rest = self.yy - l21 * l21;
        if rest <= 0. {
            return Err(DatasetError::InvalidCovariance(format!(
                "determinant is not positive (|rho| = {})",
                self.correlation().abs()
            )));
        }
        Ok((l11, l21, rest.sqrt()))
    }
}

/// Draw `n` observations from a bivariate normal with the given mean and
/// covariance. Identical seeds give identical datasets.
pub fn simulate(
    n: usize,
    covariance: &Covariance,
    mean: Observation,
    seed: u64,
) -> Result<Dataset, DatasetError> {
    let (l11, l21, l22) = covariance.cholesky()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let observations = (0..n)
        .map(|_| {
            let z1: f64 = rng.sample(StandardNormal);
            let z2: f64 = rng.sample(StandardNormal);
            Observation {
                x: mean.x + l11 * z1,
                y: mean.y + l21 * z1 + l22 * z2,
            }
        })
        .collect();
    Dataset::new(observations)
}

/// Overwrite rows of `dataset` with the given observations.
pub fn inject_outliers(
    mut dataset: Dataset,
    replacements: &[(usize, Observation)],
) -> Result<Dataset, DatasetError> {
    let len = dataset.len();
    if let Some(&(index, _)) = replacements.iter().find(|(index, _)| *index >= len) {
        return Err(DatasetError::RowOutOfRange { index, len });
    }
    if let Some((index, obs)) = replacements
        .iter()
        .find(|(_, obs)| !(obs.x.is_finite() && obs.y.is_finite()))
    {
        return Err(DatasetError::NonFinite {
            index: *index,
            x: obs.x,
            y: obs.y,
        });
    }
    let rows = dataset.observations_mut();
    for &(index, obs) in replacements {
        rows[index] = obs;
    }
    Ok(dataset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    fn sample_moments(data: &Dataset) -> (f64, f64, f64, f64, f64) {
        let n = data.len() as f64;
        let mx = data.x().iter().sum::<f64>() / n;
        let my = data.y().iter().sum::<f64>() / n;
        let (mut sxx, mut sxy, mut syy) = (0., 0., 0.);
        for obs in data.observations() {
            sxx += (obs.x - mx) * (obs.x - mx);
            sxy += (obs.x - mx) * (obs.y - my);
            syy += (obs.y - my) * (obs.y - my);
        }
        (mx, my, sxx / n, sxy / n, syy / n)
    }

    #[test]
    fn reproduces_covariance() {
        let cov = Covariance::from_correlation(2., 3., -0.7);
        let data = simulate(20_000, &cov, Observation::new(1., -1.), 7).unwrap();
        let (mx, my, vx, cxy, vy) = sample_moments(&data);
        assert_abs_diff_eq!(mx, 1., epsilon = 0.1);
        assert_abs_diff_eq!(my, -1., epsilon = 0.1);
        assert_abs_diff_eq!(vx, 4., epsilon = 0.25);
        assert_abs_diff_eq!(vy, 9., epsilon = 0.5);
        assert_abs_diff_eq!(cxy, -4.2, epsilon = 0.3);
    }

    #[test]
    fn deterministic_in_seed() {
        let cov = Covariance::new(1., 0.5, 1.);
        let a = simulate(10, &cov, Observation::new(0., 0.), 3).unwrap();
        let b = simulate(10, &cov, Observation::new(0., 0.), 3).unwrap();
        let c = simulate(10, &cov, Observation::new(0., 0.), 4).unwrap();
        assert_eq!(a, b);
        assert!(a != c);
    }

    #[test]
    fn rejects_singular_covariance() {
        let cov = Covariance::from_correlation(1., 1., 1.);
        let err = simulate(5, &cov, Observation::new(0., 0.), 0).unwrap_err();
        assert!(matches!(err, DatasetError::InvalidCovariance(_)));
    }

    #[test]
    fn injects_rows() {
        let cov = Covariance::new(1., 0., 1.);
        let data = simulate(5, &cov, Observation::new(0., 0.), 1).unwrap();
        let original = data.clone();
        let outlier = Observation::new(40., 40.);
        let data = inject_outliers(data, &[(2, outlier)]).unwrap();
        assert_eq!(data.observations()[2], outlier);
        assert_eq!(data.observations()[0], original.observations()[0]);
        assert_eq!(data.observations()[4], original.observations()[4]);

        let err = inject_outliers(data, &[(5, outlier)]).unwrap_err();
        assert_eq!(err, DatasetError::RowOutOfRange { index: 5, len: 5 });
    }
}
