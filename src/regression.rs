//! End-to-end robust regression: sample, summarize, compare.

use std::sync::{atomic::AtomicBool, Arc};

use log::{info, warn};
use thiserror::Error;

use crate::{
    classical::{classical_fit, pearson_correlation, ComparisonReport},
    data::{Dataset, DatasetError},
    model::InitValues,
    sampler::{NutsSampler, NutsSettings, PosteriorSampler, SampleRequest, SamplerError},
    student_t::{RegressionPriors, RobustRegression},
    summary::{summarize, SummaryError, SummaryReport, SummaryRequest, Threshold},
    trace::PosteriorSamples,
};

#[derive(Error, Debug)]
pub enum RegressionError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error(transparent)]
    Sampler(#[from] SamplerError),
    #[error(transparent)]
    Summary(#[from] SummaryError),
    #[error(
        "{divergences} divergent transitions in {draws} draws (at most {allowed} allowed); \
         the posterior draws are unreliable"
    )]
    SamplerDivergence {
        divergences: u64,
        draws: usize,
        allowed: u64,
    },
}

/// Options for [`run_robust_regression`].
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Draws per chain, warmup included.
    pub iterations: u64,
    /// Warmup draws per chain. Half of `iterations` when unset.
    pub warmup: Option<u64>,
    pub chains: usize,
    pub seed: u64,
    pub hpd_prob: f64,
    pub thresholds: Vec<(String, Threshold)>,
    pub init: Option<InitValues>,
    pub posterior_predictive: bool,
    /// Post-warmup divergences tolerated before the fit is rejected.
    pub max_divergences: u64,
    pub priors: RegressionPriors,
    pub sampler: NutsSettings,
    pub cancel: Option<Arc<AtomicBool>>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            iterations: 6000,
            warmup: None,
            chains: 1,
            seed: 0,
            hpd_prob: 0.95,
            thresholds: Vec::new(),
            init: None,
            posterior_predictive: false,
            max_divergences: 0,
            priors: RegressionPriors::default(),
            sampler: NutsSettings::default(),
            cancel: None,
        }
    }
}

impl RunOptions {
    pub fn sample_request(&self) -> SampleRequest {
        SampleRequest {
            seed: self.seed,
            iterations: self.iterations,
            warmup: self.warmup.unwrap_or(self.iterations / 2),
            chains: self.chains,
            init: self.init.clone(),
            posterior_predictive: self.posterior_predictive,
            cancel: self.cancel.clone(),
        }
    }

    pub fn summary_request(&self) -> SummaryRequest {
        SummaryRequest {
            hpd_prob: self.hpd_prob,
            thresholds: self.thresholds.clone(),
        }
    }
}

/// Posterior draws and their summary.
#[derive(Debug, Clone)]
pub struct RegressionFit {
    pub samples: PosteriorSamples,
    pub report: SummaryReport,
}

impl RegressionFit {
    /// Compare the posterior of intercept and slope with least squares on
    /// the same data. The correlation test is left out for fewer than three
    /// observations.
    pub fn compare(&self, dataset: &Dataset) -> Result<ComparisonReport, RegressionError> {
        let classical = classical_fit(dataset)?;
        let correlation = match pearson_correlation(dataset) {
            Ok(test) => Some(test),
            Err(DatasetError::TooFewObservations { .. }) => None,
            Err(err) => return Err(err.into()),
        };
        Ok(ComparisonReport::new(
            classical,
            correlation,
            &self.report,
        )?)
    }
}

/// Fit the Student-t regression with the default NUTS backend.
pub fn run_robust_regression(
    dataset: &Dataset,
    options: RunOptions,
) -> Result<RegressionFit, RegressionError> {
    let sampler = NutsSampler::new(options.sampler);
    run_with_sampler(&sampler, dataset, &options)
}

/// Fit the Student-t regression with any sampling backend.
pub fn run_with_sampler<S: PosteriorSampler>(
    sampler: &S,
    dataset: &Dataset,
    options: &RunOptions,
) -> Result<RegressionFit, RegressionError> {
    dataset.ensure_fittable()?;
    let model = RobustRegression::new(options.priors);
    let request = options.sample_request();

    info!(
        "fitting robust regression to {} observations, seed {}",
        dataset.len(),
        request.seed
    );
    let samples = sampler.sample(&model, dataset, &request)?;

    let divergences = samples.total_divergences();
    if divergences > options.max_divergences {
        warn!(
            "{divergences} divergences exceed the tolerance of {}",
            options.max_divergences
        );
        return Err(RegressionError::SamplerDivergence {
            divergences,
            draws: samples.num_draws(),
            allowed: options.max_divergences,
        });
    }

    let report = summarize(&samples, &options.summary_request())?;
    Ok(RegressionFit { samples, report })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Model;
    use pretty_assertions::assert_eq;

    #[test]
    fn default_options() {
        let options = RunOptions::default();
        let request = options.sample_request();
        assert_eq!(request.iterations, 6000);
        assert_eq!(request.warmup, 3000);
        assert_eq!(request.chains, 1);
        assert_eq!(request.seed, 0);
        assert_eq!(options.hpd_prob, 0.95);

        let options = RunOptions {
            iterations: 8000,
            warmup: Some(2000),
            ..Default::default()
        };
        assert_eq!(options.sample_request().draws_per_chain(), 6000);
    }

    #[test]
    fn rejects_single_observation() {
        let data = Dataset::from_columns(&[1.], &[2.]).unwrap();
        let err = run_robust_regression(&data, RunOptions::default()).unwrap_err();
        assert!(matches!(
            err,
            RegressionError::Dataset(DatasetError::TooFewObservations { .. })
        ));
    }

    /// A backend that returns fixed draws with a set number of divergences.
    struct FixedSampler {
        divergences: u64,
    }

    impl PosteriorSampler for FixedSampler {
        fn sample<M: Model>(
            &self,
            model: &M,
            _data: &Dataset,
            request: &SampleRequest,
        ) -> Result<PosteriorSamples, SamplerError> {
            let n = request.draws_per_chain() as usize;
            let columns = (0..model.dim())
                .map(|j| (0..n).map(|i| 1. + j as f64 + (i % 3) as f64).collect())
                .collect();
            let stats = crate::trace::ChainStats {
                divergences: self.divergences,
                ..Default::default()
            };
            Ok(PosteriorSamples::new(model.param_names(), columns, 1)?.with_chain_stats(vec![stats]))
        }
    }

    #[test]
    fn divergences_are_rejected() {
        let data = Dataset::from_columns(&[0., 1., 2.], &[0., 1., 2.]).unwrap();
        let options = RunOptions {
            iterations: 20,
            ..Default::default()
        };

        let fit = run_with_sampler(&FixedSampler { divergences: 0 }, &data, &options).unwrap();
        assert_eq!(fit.samples.num_draws(), 10);
        assert!(fit.report.get("beta").is_some());
        let comparison = fit.compare(&data).unwrap();
        assert_eq!(comparison.slope.classical, 1.);

        let err = run_with_sampler(&FixedSampler { divergences: 2 }, &data, &options).unwrap_err();
        assert!(matches!(
            err,
            RegressionError::SamplerDivergence {
                divergences: 2,
                draws: 10,
                allowed: 0
            }
        ));

        let tolerant = RunOptions {
            max_divergences: 2,
            ..options
        };
        assert!(run_with_sampler(&FixedSampler { divergences: 2 }, &data, &tolerant).is_ok());
    }
}
