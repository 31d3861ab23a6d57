//! Robust simple linear regression with a Student-t likelihood.
//!
//! ```text
//! y[i]      ~ student_t(nu, alpha + beta * x[i], sigma)
//! y_rand[i] ~ student_t(nu, alpha + beta * x[i], sigma)
//! ```
//!
//! The sampler sees `(alpha, beta, log(sigma), log(nu))`.

use std::f64::consts::PI;

use rand::Rng;
use rand_distr::StudentT;
use statrs::function::gamma::{digamma, ln_gamma};
use thiserror::Error;

use crate::{
    data::{Dataset, Observation},
    model::{
        Constrained, Constraint, DataDecl, DataKind, GeneratedQuantity, Likelihood,
        LinearPredictor, Model, ModelError, ModelSpec, ParameterSpec, Prior,
    },
    nuts::LogpError,
    potential::CpuLogpFunc,
};

const NAMES: [&str; 4] = ["alpha", "beta", "sigma", "nu"];
const CONSTRAINTS: [Constraint; 4] = [
    Constraint::Real,
    Constraint::Real,
    Constraint::Positive,
    Constraint::Positive,
];

/// Prior distributions of the regression parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionPriors {
    pub alpha: Prior,
    pub beta: Prior,
    pub sigma: Prior,
    pub nu: Prior,
}

impl Default for RegressionPriors {
    fn default() -> Self {
        Self {
            alpha: Prior::Normal { mu: 0., sigma: 1e5 },
            beta: Prior::Normal { mu: 0., sigma: 1e5 },
            sigma: Prior::Uniform {
                lower: 0.,
                upper: 1e5,
            },
            nu: Prior::Exponential { rate: 1. / 30. },
        }
    }
}

impl RegressionPriors {
    fn as_array(&self) -> [Prior; 4] {
        [self.alpha, self.beta, self.sigma, self.nu]
    }
}

/// Student-t regression of `y` on `x`.
#[derive(Debug, Clone, Default)]
pub struct RobustRegression {
    pub priors: RegressionPriors,
}

impl RobustRegression {
    pub fn new(priors: RegressionPriors) -> Self {
        Self { priors }
    }
}

#[derive(Error, Debug)]
pub enum RegressionLogpError {
    #[error("{name} = {value} is outside the support of its prior")]
    OutOfSupport { name: &'static str, value: f64 },
}

impl LogpError for RegressionLogpError {
    fn is_recoverable(&self) -> bool {
        true
    }
}

/// Log posterior density of [`RobustRegression`] for a fixed dataset.
pub struct RegressionLogp<'a> {
    priors: [Prior; 4],
    observations: &'a [Observation],
}

/// Log density of a single Student-t observation and its partial
/// derivatives with respect to `(mu, sigma, nu)`.
struct StudentTTerm {
    logp: f64,
    dmu: f64,
    dsigma: f64,
    dnu: f64,
}

/// Quantities shared by all observations for fixed `(sigma, nu)`.
struct StudentTShared {
    sigma: f64,
    nu: f64,
    norm: f64,
    dnorm_dnu: f64,
}

impl StudentTShared {
    fn new(sigma: f64, nu: f64) -> Self {
        let half = 0.5 * (nu + 1.);
        let norm = ln_gamma(half) - ln_gamma(0.5 * nu) - 0.5 * (nu * PI).ln() - sigma.ln();
        let dnorm_dnu = 0.5 * digamma(half) - 0.5 * digamma(0.5 * nu) - 0.5 / nu;
        Self {
            sigma,
            nu,
            norm,
            dnorm_dnu,
        }
    }

    fn term(&self, y: f64, mu: f64) -> StudentTTerm {
        let Self {
            sigma, nu, norm, ..
        } = *self;
        let resid = y - mu;
        let z = resid / sigma;
        let r = z * z / nu;
        let log1p_r = r.ln_1p();
        StudentTTerm {
            logp: norm - 0.5 * (nu + 1.) * log1p_r,
            dmu: (nu + 1.) * resid / (nu * sigma * sigma + resid * resid),
            dsigma: -1. / sigma + (nu + 1.) * r / (sigma * (1. + r)),
            dnu: self.dnorm_dnu - 0.5 * log1p_r + (nu + 1.) * r / (2. * nu * (1. + r)),
        }
    }
}

impl CpuLogpFunc for RegressionLogp<'_> {
    type LogpError = RegressionLogpError;

    fn dim(&self) -> usize {
        NAMES.len()
    }

    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, RegressionLogpError> {
        assert!(position.len() == NAMES.len());
        assert!(grad.len() == NAMES.len());

        let params: [Constrained; 4] =
            std::array::from_fn(|i| CONSTRAINTS[i].constrain(position[i]));
        for ((param, prior), name) in params.iter().zip(self.priors.iter()).zip(NAMES) {
            if !prior.contains(param.value) {
                return Err(RegressionLogpError::OutOfSupport {
                    name,
                    value: param.value,
                });
            }
        }

        let [alpha, beta, sigma, nu] = params.map(|param| param.value);
        let shared = StudentTShared::new(sigma, nu);

        let mut logp = 0f64;
        let mut dparams = [0f64; 4];
        for obs in self.observations {
            let term = shared.term(obs.y, alpha + beta * obs.x);
            logp += term.logp;
            dparams[0] += term.dmu;
            dparams[1] += term.dmu * obs.x;
            dparams[2] += term.dsigma;
            dparams[3] += term.dnu;
        }

        for (((param, prior), dparam), grad) in params
            .iter()
            .zip(self.priors.iter())
            .zip(dparams)
            .zip(grad.iter_mut())
        {
            logp += prior.ln_pdf(param.value) + param.log_jacobian;
            *grad = (dparam + prior.ln_pdf_grad(param.value)) * param.dvalue_du
                + param.dlog_jacobian_du;
        }
        Ok(logp)
    }
}

impl Model for RobustRegression {
    type Density<'a> = RegressionLogp<'a>;

    fn spec(&self) -> ModelSpec {
        let data = vec![
            DataDecl {
                name: "N",
                kind: DataKind::Count,
            },
            DataDecl {
                name: "x",
                kind: DataKind::RealVector,
            },
            DataDecl {
                name: "y",
                kind: DataKind::RealVector,
            },
        ];
        let parameters = NAMES
            .iter()
            .zip(CONSTRAINTS)
            .zip(self.priors.as_array())
            .map(|((&name, constraint), prior)| ParameterSpec {
                name,
                constraint,
                prior,
            })
            .collect();
        ModelSpec {
            data,
            parameters,
            likelihood: Likelihood::StudentT {
                response: "y",
                nu: "nu",
                location: LinearPredictor {
                    intercept: "alpha",
                    slope: "beta",
                    predictor: "x",
                },
                scale: "sigma",
            },
            generated: vec![GeneratedQuantity {
                name: "y_rand",
                replicates: "y",
            }],
        }
    }

    fn density<'a>(&'a self, data: &'a Dataset) -> RegressionLogp<'a> {
        RegressionLogp {
            priors: self.priors.as_array(),
            observations: data.observations(),
        }
    }

    fn param_names(&self) -> Vec<String> {
        NAMES.iter().map(|name| name.to_string()).collect()
    }

    fn dim(&self) -> usize {
        NAMES.len()
    }

    fn predictive_names(&self, data: &Dataset) -> Vec<String> {
        (0..data.len()).map(|i| format!("y_rand[{i}]")).collect()
    }

    fn draw_predictive<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        data: &Dataset,
        params: &[f64],
        out: &mut Vec<f64>,
    ) -> Result<(), ModelError> {
        let &[alpha, beta, sigma, nu] = params else {
            return Err(ModelError::Predictive(format!(
                "expected 4 parameter values, got {}",
                params.len()
            )));
        };
        let dist = StudentT::new(nu).map_err(|err| ModelError::Predictive(err.to_string()))?;
        out.clear();
        out.extend(data.observations().iter().map(|obs| {
            let t: f64 = rng.sample(&dist);
            alpha + beta * obs.x + sigma * t
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn small_dataset() -> Dataset {
        Dataset::from_columns(&[-1.5, 0., 0.7, 2.1, 3.3], &[2.9, 1.1, -0.4, -3.8, 4.5]).unwrap()
    }

    #[test]
    fn spec_lists_parameters() {
        let model = RobustRegression::default();
        let spec = model.spec();
        let names: Vec<_> = spec.parameters.iter().map(|param| param.name).collect();
        assert_eq!(names, ["alpha", "beta", "sigma", "nu"]);
        assert_eq!(
            spec.parameter("sigma").unwrap().constraint,
            Constraint::Positive
        );
        let listing = spec.to_string();
        assert!(listing.contains("y[i] ~ student_t(nu, alpha + beta * x[i], sigma)"));
        assert!(listing.contains("nu: real > 0 ~ exponential("));
        assert!(listing.contains("y_rand[i]"));
    }

    #[test]
    fn logp_matches_direct_density() {
        let data = small_dataset();
        let model = RobustRegression::default();
        let mut logp = model.density(&data);

        let (alpha, beta, sigma, nu) = (0.3f64, -0.8f64, 1.7f64, 4.5f64);
        let position = [alpha, beta, sigma.ln(), nu.ln()];
        let mut grad = [0.; 4];
        let value = logp.logp(&position, &mut grad).unwrap();

        let mut expected = 0.;
        for obs in data.observations() {
            let z = (obs.y - alpha - beta * obs.x) / sigma;
            expected += ln_gamma((nu + 1.) / 2.)
                - ln_gamma(nu / 2.)
                - 0.5 * (nu * PI).ln()
                - sigma.ln()
                - (nu + 1.) / 2. * (1. + z * z / nu).ln();
        }
        let priors = RegressionPriors::default();
        expected += priors.alpha.ln_pdf(alpha)
            + priors.beta.ln_pdf(beta)
            + priors.sigma.ln_pdf(sigma)
            + priors.nu.ln_pdf(nu)
            + sigma.ln()
            + nu.ln();
        assert_relative_eq!(value, expected, max_relative = 1e-10);
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let data = small_dataset();
        let model = RobustRegression::default();
        let mut logp = model.density(&data);

        let position = [0.4, -0.6, 0.2, 1.3];
        let mut grad = [0.; 4];
        logp.logp(&position, &mut grad).unwrap();

        let h = 1e-6;
        let mut scratch = [0.; 4];
        for i in 0..4 {
            let mut up = position;
            let mut down = position;
            up[i] += h;
            down[i] -= h;
            let numeric = (logp.logp(&up, &mut scratch).unwrap()
                - logp.logp(&down, &mut scratch).unwrap())
                / (2. * h);
            assert_relative_eq!(grad[i], numeric, epsilon = 1e-5, max_relative = 1e-5);
        }
    }

    #[test]
    fn sigma_outside_uniform_prior_is_recoverable() {
        let data = small_dataset();
        let model = RobustRegression::default();
        let mut logp = model.density(&data);
        let mut grad = [0.; 4];
        let err = logp.logp(&[0., 0., 2e5f64.ln(), 1.], &mut grad).unwrap_err();
        assert!(err.is_recoverable());
        assert!(matches!(
            err,
            RegressionLogpError::OutOfSupport { name: "sigma", .. }
        ));
    }

    #[test]
    fn predictive_draws_follow_the_mean() {
        let data = Dataset::from_columns(&[0., 10.], &[0., 0.]).unwrap();
        let model = RobustRegression::default();
        assert_eq!(model.predictive_names(&data), ["y_rand[0]", "y_rand[1]"]);

        let mut rng = StdRng::seed_from_u64(4);
        let mut out = Vec::new();
        let mut sums = [0.; 2];
        let draws = 4000;
        for _ in 0..draws {
            model
                .draw_predictive(&mut rng, &data, &[1., 2., 0.5, 30.], &mut out)
                .unwrap();
            assert_eq!(out.len(), 2);
            sums[0] += out[0];
            sums[1] += out[1];
        }
        assert_relative_eq!(sums[0] / draws as f64, 1., epsilon = 0.05);
        assert_relative_eq!(sums[1] / draws as f64, 21., epsilon = 0.05);
    }
}
