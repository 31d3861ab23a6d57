//! Backend-agnostic model description.
//!
//! A model declares its data inputs, its parameters (with support constraint
//! and prior) and its likelihood as plain data, so it can be inspected and
//! printed. Binding a model to a dataset gives a [`CpuLogpFunc`] over the
//! unconstrained parameter space, which is all a sampling backend needs.

use std::{collections::HashMap, fmt};

use rand::Rng;
use thiserror::Error;

use crate::{data::Dataset, potential::CpuLogpFunc};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("model has no parameter named {0:?}")]
    UnknownParameter(String),
    #[error("initial value {value} for {name} is outside its support")]
    InvalidInitialValue { name: String, value: f64 },
    #[error("could not draw posterior predictive values: {0}")]
    Predictive(String),
}

/// Support of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    Real,
    /// Strictly positive, sampled as `exp(u)`.
    Positive,
}

/// Result of mapping an unconstrained value into the support.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Constrained {
    pub value: f64,
    pub log_jacobian: f64,
    pub dvalue_du: f64,
    pub dlog_jacobian_du: f64,
}

impl Constraint {
    pub(crate) fn constrain(&self, u: f64) -> Constrained {
        match self {
            Constraint::Real => Constrained {
                value: u,
                log_jacobian: 0.,
                dvalue_du: 1.,
                dlog_jacobian_du: 0.,
            },
            Constraint::Positive => {
                let value = u.exp();
                Constrained {
                    value,
                    log_jacobian: u,
                    dvalue_du: value,
                    dlog_jacobian_du: 1.,
                }
            }
        }
    }

    pub(crate) fn unconstrain(&self, value: f64) -> Option<f64> {
        match self {
            Constraint::Real => value.is_finite().then_some(value),
            Constraint::Positive => (value.is_finite() && value > 0.).then(|| value.ln()),
        }
    }
}

/// Prior distributions used by the regression model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Prior {
    Normal { mu: f64, sigma: f64 },
    Uniform { lower: f64, upper: f64 },
    Exponential { rate: f64 },
}

impl Prior {
    pub fn contains(&self, x: f64) -> bool {
        match *self {
            Prior::Normal { .. } => x.is_finite(),
            Prior::Uniform { lower, upper } => (lower < x) & (x < upper),
            Prior::Exponential { .. } => x >= 0.,
        }
    }

    /// Log density; `-inf` outside the support.
    pub fn ln_pdf(&self, x: f64) -> f64 {
        if !self.contains(x) {
            return f64::NEG_INFINITY;
        }
        match *self {
            Prior::Normal { mu, sigma } => {
                let z = (x - mu) / sigma;
                -0.5 * z * z - sigma.ln() - 0.5 * (2. * std::f64::consts::PI).ln()
            }
            Prior::Uniform { lower, upper } => -(upper - lower).ln(),
            Prior::Exponential { rate } => rate.ln() - rate * x,
        }
    }

    /// Derivative of [`Prior::ln_pdf`] inside the support.
    pub fn ln_pdf_grad(&self, x: f64) -> f64 {
        match *self {
            Prior::Normal { mu, sigma } => -(x - mu) / (sigma * sigma),
            Prior::Uniform { .. } => 0.,
            Prior::Exponential { rate } => -rate,
        }
    }
}

impl fmt::Display for Prior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Prior::Normal { mu, sigma } => write!(f, "normal({mu}, {sigma})"),
            Prior::Uniform { lower, upper } => write!(f, "uniform({lower}, {upper})"),
            Prior::Exponential { rate } => write!(f, "exponential({rate})"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataKind {
    /// Non-negative count, e.g. the number of observations.
    Count,
    /// Real vector of length `N`.
    RealVector,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DataDecl {
    pub name: &'static str,
    pub kind: DataKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSpec {
    pub name: &'static str,
    pub constraint: Constraint,
    pub prior: Prior,
}

/// `location = intercept + slope * predictor`
#[derive(Debug, Clone, PartialEq)]
pub struct LinearPredictor {
    pub intercept: &'static str,
    pub slope: &'static str,
    pub predictor: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Likelihood {
    StudentT {
        response: &'static str,
        nu: &'static str,
        location: LinearPredictor,
        scale: &'static str,
    },
}

/// A quantity drawn from the likelihood at each posterior draw, without
/// conditioning on data.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuantity {
    pub name: &'static str,
    pub replicates: &'static str,
}

/// Inspectable description of a model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSpec {
    pub data: Vec<DataDecl>,
    pub parameters: Vec<ParameterSpec>,
    pub likelihood: Likelihood,
    pub generated: Vec<GeneratedQuantity>,
}

impl ModelSpec {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|param| param.name == name)
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "data:")?;
        for decl in &self.data {
            match decl.kind {
                DataKind::Count => writeln!(f, "  {}: count >= 1", decl.name)?,
                DataKind::RealVector => writeln!(f, "  {}: real[N]", decl.name)?,
            }
        }
        writeln!(f, "parameters:")?;
        for param in &self.parameters {
            let support = match param.constraint {
                Constraint::Real => "real",
                Constraint::Positive => "real > 0",
            };
            writeln!(f, "  {}: {} ~ {}", param.name, support, param.prior)?;
        }
        writeln!(f, "likelihood:")?;
        match &self.likelihood {
            Likelihood::StudentT {
                response,
                nu,
                location,
                scale,
            } => writeln!(
                f,
                "  {response}[i] ~ student_t({nu}, {} + {} * {}[i], {scale})",
                location.intercept, location.slope, location.predictor
            )?,
        }
        if !self.generated.is_empty() {
            writeln!(f, "generated:")?;
            for quantity in &self.generated {
                writeln!(f, "  {}[i] ~ same law as {}[i]", quantity.name, quantity.replicates)?;
            }
        }
        Ok(())
    }
}

/// Initial values on the constrained scale, keyed by parameter name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InitValues {
    values: HashMap<String, f64>,
}

impl InitValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|name| name.as_str())
    }
}

/// A model that can be handed to a sampling backend.
///
/// The trait is thread-safe so that chains can run in parallel against the
/// same model instance.
pub trait Model: Send + Sync {
    /// Log density bound to a dataset.
    type Density<'a>: CpuLogpFunc
    where
        Self: 'a;

    fn spec(&self) -> ModelSpec;

    /// Bind the model to observed data.
    fn density<'a>(&'a self, data: &'a Dataset) -> Self::Density<'a>;

    /// Names of the parameters on the constrained scale, in sampling order.
    fn param_names(&self) -> Vec<String> {
        self.spec()
            .parameters
            .iter()
            .map(|param| param.name.to_string())
            .collect()
    }

    fn dim(&self) -> usize {
        self.spec().parameters.len()
    }

    /// Map an unconstrained position to parameter values.
    fn constrain(&self, position: &[f64], out: &mut [f64]) {
        for ((param, &u), out) in self.spec().parameters.iter().zip(position).zip(out) {
            *out = param.constraint.constrain(u).value;
        }
    }

    /// Starting point for a chain: user values where given, otherwise
    /// uniform(-2, 2) on the unconstrained scale.
    fn init_position<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        init: Option<&InitValues>,
        position: &mut [f64],
    ) -> Result<(), ModelError> {
        let spec = self.spec();
        if let Some(init) = init {
            if let Some(unknown) = init.names().find(|name| spec.parameter(name).is_none()) {
                return Err(ModelError::UnknownParameter(unknown.to_string()));
            }
        }
        for (param, out) in spec.parameters.iter().zip(position.iter_mut()) {
            *out = match init.and_then(|init| init.get(param.name)) {
                Some(value) => param.constraint.unconstrain(value).ok_or_else(|| {
                    ModelError::InvalidInitialValue {
                        name: param.name.to_string(),
                        value,
                    }
                })?,
                None => rng.random_range(-2.0..2.0),
            };
        }
        Ok(())
    }

    /// Names of the posterior predictive quantities for this dataset.
    fn predictive_names(&self, _data: &Dataset) -> Vec<String> {
        Vec::new()
    }

    /// Draw posterior predictive values at the given parameter values.
    fn draw_predictive<R: Rng + ?Sized>(
        &self,
        _rng: &mut R,
        _data: &Dataset,
        _params: &[f64],
        _out: &mut Vec<f64>,
    ) -> Result<(), ModelError> {
        Ok(())
    }
}
