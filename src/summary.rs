//! Posterior summaries computed from pooled draws.
//!
//! Every probability here is a Monte Carlo estimate with an error of order
//! `1 / sqrt(M)` for `M` draws. Nothing is corrected for autocorrelation.

use std::fmt;

use itertools::Itertools;
use thiserror::Error;

use crate::{diagnostics, trace::PosteriorSamples};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SummaryError {
    #[error("need at least 2 draws, got {available}")]
    InsufficientSamples { available: usize },
    #[error("probability must lie in (0, 1], got {0}")]
    InvalidProbability(f64),
    #[error("no parameter named {0:?} in the sample set")]
    UnknownParameter(String),
}

/// Arithmetic mean of the draws. `NaN` for an empty slice.
pub fn mean(samples: &[f64]) -> f64 {
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Sample standard deviation (denominator `M - 1`).
pub fn std_dev(samples: &[f64]) -> f64 {
    let m = mean(samples);
    let ss: f64 = samples.iter().map(|x| (x - m) * (x - m)).sum();
    (ss / (samples.len() as f64 - 1.)).sqrt()
}

fn sorted(samples: &[f64]) -> Vec<f64> {
    let mut sorted = samples.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

pub fn median(samples: &[f64]) -> f64 {
    let sorted = sorted(samples);
    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        0.5 * (sorted[n / 2 - 1] + sorted[n / 2])
    }
}

/// Shortest interval containing a fraction `prob` of the draws.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HpdInterval {
    pub lower: f64,
    pub upper: f64,
    pub prob: f64,
}

impl HpdInterval {
    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    pub fn contains(&self, value: f64) -> bool {
        (self.lower <= value) & (value <= self.upper)
    }

    /// Whether `other` lies within this interval.
    pub fn covers(&self, other: &HpdInterval) -> bool {
        (self.lower <= other.lower) & (other.upper <= self.upper)
    }
}

impl fmt::Display for HpdInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.4}, {:.4}]", self.lower, self.upper)
    }
}

/// Highest posterior density interval of the draws.
///
/// Among all windows of `k = ceil(prob * M)` consecutive sorted draws, the
/// narrowest one is returned, the leftmost on ties. `prob = 1` gives the
/// full range of the draws.
///
/// `k` is computed as `ceil(prob * M - 1e-9)`, so a product that is an
/// integer up to rounding error (`0.95 * 100`, `0.07 * 100`) is not pushed
/// to the next integer. At such exact products the window can hold one
/// draw fewer than a literal `ceil(prob * M)` in floating point would give.
pub fn hpd_interval(samples: &[f64], prob: f64) -> Result<HpdInterval, SummaryError> {
    if !((prob > 0.) & (prob <= 1.)) {
        return Err(SummaryError::InvalidProbability(prob));
    }
    let m = samples.len();
    if m < 2 {
        return Err(SummaryError::InsufficientSamples { available: m });
    }

    let sorted = sorted(samples);
    // the epsilon keeps `ceil` from rounding up exact products like 0.95 * 100
    let k = ((prob * m as f64 - 1e-9).ceil() as usize).clamp(1, m);

    let (start, _) = (0..=(m - k))
        .map(|i| (i, sorted[i + k - 1] - sorted[i]))
        .fold((0, f64::INFINITY), |best, (i, width)| {
            if width < best.1 {
                (i, width)
            } else {
                best
            }
        });

    Ok(HpdInterval {
        lower: sorted[start],
        upper: sorted[start + k - 1],
        prob,
    })
}

/// Fraction of draws for which a predicate holds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TailProbability {
    pub value: f64,
    pub draws: usize,
}

impl TailProbability {
    /// Smallest nonzero difference between two estimates, `1 / M`.
    pub fn resolution(&self) -> f64 {
        1. / self.draws as f64
    }

    /// Exactly 0 or 1 only says the true probability is below or above the
    /// resolution of the estimate.
    pub fn is_boundary(&self) -> bool {
        (self.value == 0.) | (self.value == 1.)
    }
}

impl fmt::Display for TailProbability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.value == 0. {
            write!(f, "< {:.2e}", self.resolution())
        } else if self.value == 1. {
            write!(f, "> {:.6}", 1. - self.resolution())
        } else {
            write!(f, "{:.4}", self.value)
        }
    }
}

pub fn tail_probability<P>(samples: &[f64], predicate: P) -> Result<TailProbability, SummaryError>
where
    P: Fn(f64) -> bool,
{
    if samples.is_empty() {
        return Err(SummaryError::InsufficientSamples { available: 0 });
    }
    let hits = samples.iter().filter(|&&x| predicate(x)).count();
    Ok(TailProbability {
        value: hits as f64 / samples.len() as f64,
        draws: samples.len(),
    })
}

/// A region of parameter space whose posterior probability is reported.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Threshold {
    /// `x <= t`
    AtMost(f64),
    /// `x >= t`
    AtLeast(f64),
    /// `lo <= x <= hi`
    Between(f64, f64),
}

impl Threshold {
    pub fn contains(&self, x: f64) -> bool {
        match *self {
            Threshold::AtMost(t) => x <= t,
            Threshold::AtLeast(t) => x >= t,
            Threshold::Between(lo, hi) => (lo <= x) & (x <= hi),
        }
    }

    pub fn probability(&self, samples: &[f64]) -> Result<TailProbability, SummaryError> {
        tail_probability(samples, |x| self.contains(x))
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Threshold::AtMost(t) => write!(f, "<= {t}"),
            Threshold::AtLeast(t) => write!(f, ">= {t}"),
            Threshold::Between(lo, hi) => write!(f, "in [{lo}, {hi}]"),
        }
    }
}

/// What to put into a [`SummaryReport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRequest {
    pub hpd_prob: f64,
    /// Tail probabilities to report, keyed by parameter name.
    pub thresholds: Vec<(String, Threshold)>,
}

impl Default for SummaryRequest {
    fn default() -> Self {
        Self {
            hpd_prob: 0.95,
            thresholds: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub median: f64,
    pub hpd: HpdInterval,
    pub tails: Vec<(Threshold, TailProbability)>,
    /// Effective sample size over all chains
    pub ess: f64,
    /// Split R-hat, `NaN` when it cannot be computed
    pub rhat: f64,
}

impl ParameterSummary {
    /// Summarize the draws of `name`, split into chains for the diagnostics.
    pub fn from_chains(
        name: &str,
        chains: &[&[f64]],
        hpd_prob: f64,
        thresholds: &[Threshold],
    ) -> Result<Self, SummaryError> {
        let pooled: Vec<f64> = chains.iter().flat_map(|chain| chain.iter().copied()).collect();
        let hpd = hpd_interval(&pooled, hpd_prob)?;
        let tails = thresholds
            .iter()
            .map(|threshold| Ok((*threshold, threshold.probability(&pooled)?)))
            .collect::<Result<Vec<_>, SummaryError>>()?;
        Ok(Self {
            name: name.to_string(),
            mean: mean(&pooled),
            sd: std_dev(&pooled),
            median: median(&pooled),
            hpd,
            tails,
            ess: diagnostics::effective_sample_size(chains),
            rhat: diagnostics::split_rhat(chains),
        })
    }
}

/// Summaries for every parameter of a sample set.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub parameters: Vec<ParameterSummary>,
    pub num_draws: usize,
    pub num_chains: usize,
    pub divergences: u64,
}

impl SummaryReport {
    pub fn get(&self, name: &str) -> Option<&ParameterSummary> {
        self.parameters.iter().find(|param| param.name == name)
    }
}

/// Summarize all parameters in `samples`.
///
/// Pure function of its inputs: calling it twice gives identical reports.
pub fn summarize(
    samples: &PosteriorSamples,
    request: &SummaryRequest,
) -> Result<SummaryReport, SummaryError> {
    if let Some((name, _)) = request
        .thresholds
        .iter()
        .find(|(name, _)| !samples.contains(name))
    {
        return Err(SummaryError::UnknownParameter(name.clone()));
    }

    let parameters = samples
        .names()
        .iter()
        .map(|name| {
            let chains = samples
                .chains(name)
                .ok_or_else(|| SummaryError::UnknownParameter(name.clone()))?;
            let thresholds = request
                .thresholds
                .iter()
                .filter(|(param, _)| param == name)
                .map(|(_, threshold)| *threshold)
                .collect_vec();
            ParameterSummary::from_chains(name, &chains, request.hpd_prob, &thresholds)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(SummaryReport {
        parameters,
        num_draws: samples.num_draws(),
        num_chains: samples.num_chains(),
        divergences: samples.total_divergences(),
    })
}

impl fmt::Display for SummaryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let prob = self
            .parameters
            .first()
            .map(|param| param.hpd.prob)
            .unwrap_or(0.95);
        writeln!(
            f,
            "{} draws from {} chains, {} divergences",
            self.num_draws, self.num_chains, self.divergences
        )?;
        writeln!(
            f,
            "{:<12} {:>10} {:>10} {:>10} {:>24} {:>8} {:>6}",
            "parameter",
            "mean",
            "sd",
            "median",
            format!("hpd {:.0}%", prob * 100.),
            "ess",
            "rhat"
        )?;
        for param in &self.parameters {
            writeln!(
                f,
                "{:<12} {:>10.4} {:>10.4} {:>10.4} {:>24} {:>8.0} {:>6.3}",
                param.name,
                param.mean,
                param.sd,
                param.median,
                param.hpd.to_string(),
                param.ess,
                param.rhat
            )?;
        }
        for param in &self.parameters {
            for (threshold, prob) in &param.tails {
                writeln!(f, "P({} {threshold}) = {prob}", param.name)?;
            }
        }
        Ok(())
    }
}
