//! Ordinary least squares and Pearson correlation, for comparison with the
//! posterior.

use std::fmt;

use statrs::distribution::{ContinuousCDF, StudentsT};

use crate::{
    data::{Dataset, DatasetError},
    summary::{HpdInterval, SummaryError, SummaryReport},
};

/// Least squares fit of `y = intercept + slope * x`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClassicalFit {
    pub intercept: f64,
    pub slope: f64,
    /// `sqrt(SSR / (N - 2))`, `NaN` for two observations.
    pub residual_sd: f64,
    pub r_squared: f64,
}

/// Centered sums of squares and cross products.
struct Moments {
    n: usize,
    mean_x: f64,
    mean_y: f64,
    sxx: f64,
    sxy: f64,
    syy: f64,
}

impl Moments {
    fn new(dataset: &Dataset) -> Self {
        let n = dataset.len();
        let obs = dataset.observations();
        let mean_x = obs.iter().map(|o| o.x).sum::<f64>() / n as f64;
        let mean_y = obs.iter().map(|o| o.y).sum::<f64>() / n as f64;
        let (sxx, sxy, syy) = obs.iter().fold((0., 0., 0.), |(sxx, sxy, syy), o| {
            let dx = o.x - mean_x;
            let dy = o.y - mean_y;
            (sxx + dx * dx, sxy + dx * dy, syy + dy * dy)
        });
        Self {
            n,
            mean_x,
            mean_y,
            sxx,
            sxy,
            syy,
        }
    }
}

pub fn classical_fit(dataset: &Dataset) -> Result<ClassicalFit, DatasetError> {
    dataset.ensure_fittable()?;
    let m = Moments::new(dataset);
    if m.sxx <= 0. {
        return Err(DatasetError::ConstantPredictor);
    }

    let slope = m.sxy / m.sxx;
    let intercept = m.mean_y - slope * m.mean_x;
    let ssr: f64 = dataset
        .observations()
        .iter()
        .map(|o| {
            let resid = o.y - intercept - slope * o.x;
            resid * resid
        })
        .sum();
    let residual_sd = if m.n > 2 {
        (ssr / (m.n - 2) as f64).sqrt()
    } else {
        f64::NAN
    };
    let r_squared = if m.syy > 0. { 1. - ssr / m.syy } else { 1. };

    Ok(ClassicalFit {
        intercept,
        slope,
        residual_sd,
        r_squared,
    })
}

/// Two-sided test of zero correlation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrelationTest {
    pub r: f64,
    /// `r * sqrt(df / (1 - r^2))`
    pub t: f64,
    pub df: f64,
    pub p_value: f64,
}

pub fn pearson_correlation(dataset: &Dataset) -> Result<CorrelationTest, DatasetError> {
    if dataset.len() < 3 {
        return Err(DatasetError::TooFewObservations {
            required: 3,
            actual: dataset.len(),
        });
    }
    let m = Moments::new(dataset);
    if m.sxx <= 0. {
        return Err(DatasetError::ConstantPredictor);
    }
    if m.syy <= 0. {
        return Err(DatasetError::ConstantResponse);
    }

    let r = (m.sxy / (m.sxx * m.syy).sqrt()).clamp(-1., 1.);
    let df = (m.n - 2) as f64;
    let denom = 1. - r * r;
    let (t, p_value) = if denom <= 0. {
        (f64::INFINITY.copysign(r), 0.)
    } else {
        let t = r * (df / denom).sqrt();
        let p = StudentsT::new(0., 1., df)
            .map(|dist| 2. * dist.sf(t.abs()))
            .unwrap_or(f64::NAN);
        (t, p)
    };

    Ok(CorrelationTest { r, t, df, p_value })
}

/// One coefficient estimated both ways.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoefficientComparison {
    pub classical: f64,
    pub posterior_mean: f64,
    pub hpd: HpdInterval,
}

/// Classical estimates next to the posterior of `alpha` and `beta`.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonReport {
    pub intercept: CoefficientComparison,
    pub slope: CoefficientComparison,
    pub classical: ClassicalFit,
    pub correlation: Option<CorrelationTest>,
}

impl ComparisonReport {
    pub fn new(
        classical: ClassicalFit,
        correlation: Option<CorrelationTest>,
        posterior: &SummaryReport,
    ) -> Result<Self, SummaryError> {
        let coefficient = |name: &str, classical: f64| {
            posterior
                .get(name)
                .map(|param| CoefficientComparison {
                    classical,
                    posterior_mean: param.mean,
                    hpd: param.hpd,
                })
                .ok_or_else(|| SummaryError::UnknownParameter(name.to_string()))
        };
        Ok(Self {
            intercept: coefficient("alpha", classical.intercept)?,
            slope: coefficient("beta", classical.slope)?,
            classical,
            correlation,
        })
    }
}

impl fmt::Display for ComparisonReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:<10} {:>12} {:>14} {:>24}",
            "",
            "OLS",
            "posterior mean",
            format!("hpd {:.0}%", self.slope.hpd.prob * 100.)
        )?;
        for (name, row) in [("intercept", &self.intercept), ("slope", &self.slope)] {
            writeln!(
                f,
                "{:<10} {:>12.4} {:>14.4} {:>24}",
                name,
                row.classical,
                row.posterior_mean,
                row.hpd.to_string()
            )?;
        }
        writeln!(
            f,
            "OLS residual sd {:.4}, R^2 {:.4}",
            self.classical.residual_sd, self.classical.r_squared
        )?;
        if let Some(test) = &self.correlation {
            writeln!(
                f,
                "Pearson r = {:.4}, t({}) = {:.3}, p = {:.3e}",
                test.r, test.df, test.t, test.p_value
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use pretty_assertions::assert_eq;

    #[test]
    fn exact_line() {
        let data = Dataset::from_columns(&[0., 1., 2., 3.], &[1., 3., 5., 7.]).unwrap();
        let fit = classical_fit(&data).unwrap();
        assert_relative_eq!(fit.intercept, 1., epsilon = 1e-12);
        assert_relative_eq!(fit.slope, 2., epsilon = 1e-12);
        assert_relative_eq!(fit.residual_sd, 0., epsilon = 1e-12);
        assert_relative_eq!(fit.r_squared, 1., epsilon = 1e-12);

        let test = pearson_correlation(&data).unwrap();
        assert_relative_eq!(test.r, 1., epsilon = 1e-12);
        assert_eq!(test.p_value, 0.);
    }

    #[test]
    fn noisy_fit() {
        let data = Dataset::from_columns(&[1., 2., 3., 4., 5.], &[2., 4., 5., 4., 5.]).unwrap();
        let fit = classical_fit(&data).unwrap();
        assert_relative_eq!(fit.slope, 0.6, epsilon = 1e-12);
        assert_relative_eq!(fit.intercept, 2.2, epsilon = 1e-12);
        assert_relative_eq!(fit.r_squared, 0.6, epsilon = 1e-12);
        assert_relative_eq!(fit.residual_sd, (2.4f64 / 3.).sqrt(), epsilon = 1e-12);

        let test = pearson_correlation(&data).unwrap();
        assert_relative_eq!(test.r, 0.6f64.sqrt(), epsilon = 1e-12);
        assert_eq!(test.df, 3.);
        // t = 2.1213 with 3 degrees of freedom
        assert_relative_eq!(test.p_value, 0.1240, epsilon = 1e-3);
    }

    #[test]
    fn rejects_degenerate_data() {
        let data = Dataset::from_columns(&[1., 1., 1.], &[1., 2., 3.]).unwrap();
        assert_eq!(classical_fit(&data), Err(DatasetError::ConstantPredictor));
        assert_eq!(
            pearson_correlation(&data),
            Err(DatasetError::ConstantPredictor)
        );

        let data = Dataset::from_columns(&[1., 2., 3.], &[1., 1., 1.]).unwrap();
        assert_eq!(
            pearson_correlation(&data),
            Err(DatasetError::ConstantResponse)
        );

        let data = Dataset::from_columns(&[1.], &[1.]).unwrap();
        assert!(matches!(
            classical_fit(&data),
            Err(DatasetError::TooFewObservations { required: 2, .. })
        ));

        let data = Dataset::from_columns(&[1., 2.], &[1., 3.]).unwrap();
        assert!(classical_fit(&data).unwrap().residual_sd.is_nan());
        assert!(matches!(
            pearson_correlation(&data),
            Err(DatasetError::TooFewObservations { required: 3, .. })
        ));
    }
}
