//! Bayesian robust simple linear regression.
//!
//! The response is modelled with a Student-t likelihood around a linear mean,
//! so that a few outliers do not drag the slope the way they drag a least
//! squares fit. Posterior draws come from an adaptive No-U-Turn sampler that
//! runs one chain per thread.
//!
//! ```no_run
//! use robust_regression::{
//!     inject_outliers, run_robust_regression, simulate, Covariance, Observation, RunOptions,
//! };
//!
//! let cov = Covariance::from_correlation(20., 40., -0.95);
//! let data = simulate(40, &cov, Observation::new(10., 30.), 1)?;
//! let data = inject_outliers(data, &[(0, Observation::new(40., 40.))])?;
//! let fit = run_robust_regression(&data, RunOptions::default())?;
//! println!("{}", fit.report);
//! println!("{}", fit.compare(&data)?);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub(crate) mod adapt_strategy;
pub(crate) mod chain;
pub(crate) mod classical;
pub(crate) mod data;
pub mod diagnostics;
pub(crate) mod mass_matrix;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod nuts;
pub(crate) mod potential;
pub(crate) mod regression;
pub(crate) mod sampler;
pub(crate) mod simulate;
pub(crate) mod stepsize;
pub(crate) mod student_t;
pub(crate) mod summary;
pub(crate) mod trace;

pub use adapt_strategy::AdaptOptions;
pub use classical::{
    classical_fit, pearson_correlation, ClassicalFit, CoefficientComparison, ComparisonReport,
    CorrelationTest,
};
pub use data::{Dataset, DatasetError, Observation};
pub use mass_matrix::DiagAdaptSettings;
pub use model::{
    Constraint, DataDecl, DataKind, GeneratedQuantity, InitValues, Likelihood, LinearPredictor,
    Model, ModelError, ModelSpec, ParameterSpec, Prior,
};
pub use nuts::{DivergenceInfo, LogpError, NutsError};
pub use potential::CpuLogpFunc;
pub use regression::{
    run_robust_regression, run_with_sampler, RegressionError, RegressionFit, RunOptions,
};
pub use sampler::{NutsSampler, NutsSettings, PosteriorSampler, SampleRequest, SamplerError};
pub use simulate::{inject_outliers, simulate, Covariance};
pub use stepsize::{DualAverageOptions, DualAverageSettings};
pub use student_t::{RegressionLogp, RegressionLogpError, RegressionPriors, RobustRegression};
pub use summary::{
    hpd_interval, mean, median, std_dev, summarize, tail_probability, HpdInterval,
    ParameterSummary, SummaryError, SummaryReport, SummaryRequest, TailProbability, Threshold,
};
pub use trace::{ChainStats, PosteriorSamples, TraceError};
