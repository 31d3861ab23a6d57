use itertools::izip;
use rand::Rng;

use crate::{
    math::{multiply, vector_dot},
    nuts::{Collector, SampleInfo},
    potential::State,
};

/// Settings for mass matrix adaptation
#[derive(Clone, Copy, Debug)]
pub struct DiagAdaptSettings {
    /// Estimate the variance as `sqrt(var(draws) / var(gradients))` instead
    /// of the plain draw variance.
    pub use_grad_based_estimate: bool,
    /// Clamp the diagonal to this range.
    pub variance_limits: (f64, f64),
}

impl Default for DiagAdaptSettings {
    fn default() -> Self {
        Self {
            use_grad_based_estimate: true,
            variance_limits: (1e-10, 1e10),
        }
    }
}

/// Diagonal inverse mass matrix.
#[derive(Debug, Clone)]
pub(crate) struct DiagMassMatrix {
    inv_stds: Box<[f64]>,
    pub(crate) variance: Box<[f64]>,
}

impl DiagMassMatrix {
    pub(crate) fn new(ndim: usize) -> Self {
        Self {
            inv_stds: vec![1f64; ndim].into(),
            variance: vec![1f64; ndim].into(),
        }
    }

    pub(crate) fn update_velocity(&self, momentum: &[f64], velocity: &mut [f64]) {
        multiply(&self.variance, momentum, velocity);
    }

    pub(crate) fn kinetic_energy(&self, momentum: &[f64], velocity: &[f64]) -> f64 {
        0.5 * vector_dot(momentum, velocity)
    }

    pub(crate) fn randomize_momentum<R: Rng + ?Sized>(&self, momentum: &mut [f64], rng: &mut R) {
        let dist = rand_distr::StandardNormal;
        momentum
            .iter_mut()
            .zip(self.inv_stds.iter())
            .for_each(|(p, &s)| {
                let norm: f64 = rng.sample(dist);
                *p = s * norm;
            });
    }

    /// Initial guess from a single gradient: `variance = 1 / |grad|`.
    pub(crate) fn update_diag_grad(&mut self, gradient: &[f64], fill_invalid: f64, clamp: (f64, f64)) {
        izip!(self.variance.iter_mut(), self.inv_stds.iter_mut(), gradient).for_each(
            |(var, inv_std, &grad)| {
                let val = grad.abs().clamp(clamp.0, clamp.1).recip();
                let val = if val.is_finite() { val } else { fill_invalid };
                *var = val;
                *inv_std = val.recip().sqrt();
            },
        );
    }

    /// Set the diagonal from draw and gradient variances. Entries that cannot
    /// be estimated keep their previous value.
    pub(crate) fn update_diag_draw_grad(
        &mut self,
        draw_var: &[f64],
        grad_var: &[f64],
        clamp: (f64, f64),
    ) {
        izip!(
            self.variance.iter_mut(),
            self.inv_stds.iter_mut(),
            draw_var,
            grad_var
        )
        .for_each(|(var, inv_std, &draw_var, &grad_var)| {
            let val = (draw_var / grad_var).sqrt();
            if val.is_finite() & (val > 0f64) {
                let val = val.clamp(clamp.0, clamp.1);
                *var = val;
                *inv_std = val.recip().sqrt();
            }
        });
    }

    pub(crate) fn update_diag_draw(&mut self, draw_var: &[f64], clamp: (f64, f64)) {
        izip!(self.variance.iter_mut(), self.inv_stds.iter_mut(), draw_var).for_each(
            |(var, inv_std, &draw_var)| {
                if draw_var.is_finite() & (draw_var > 0f64) {
                    let val = draw_var.clamp(clamp.0, clamp.1);
                    *var = val;
                    *inv_std = val.recip().sqrt();
                }
            },
        );
    }
}

/// Welford estimator of the elementwise variance.
#[derive(Debug, Clone)]
pub(crate) struct RunningVariance {
    mean: Box<[f64]>,
    m2: Box<[f64]>,
    count: u64,
}

impl RunningVariance {
    pub(crate) fn new(dim: usize) -> Self {
        Self {
            mean: vec![0f64; dim].into(),
            m2: vec![0f64; dim].into(),
            count: 0,
        }
    }

    pub(crate) fn add_sample(&mut self, value: &[f64]) {
        self.count += 1;
        let scale = (self.count as f64).recip();
        izip!(self.mean.iter_mut(), self.m2.iter_mut(), value).for_each(|(mean, m2, &x)| {
            let delta = x - *mean;
            *mean += delta * scale;
            *m2 += delta * (x - *mean);
        });
    }

    /// The current variance estimate, `None` with fewer than two samples.
    pub(crate) fn current(&self) -> Option<Vec<f64>> {
        if self.count < 2 {
            return None;
        }
        let scale = (self.count as f64).recip();
        Some(self.m2.iter().map(|m2| m2 * scale).collect())
    }

    pub(crate) fn count(&self) -> u64 {
        self.count
    }
}

/// Records the position and gradient of each accepted draw.
pub(crate) struct DrawGradCollector {
    pub(crate) draw: Box<[f64]>,
    pub(crate) grad: Box<[f64]>,
    pub(crate) is_good: bool,
}

impl DrawGradCollector {
    pub(crate) fn new(dim: usize) -> Self {
        DrawGradCollector {
            draw: vec![0f64; dim].into(),
            grad: vec![0f64; dim].into(),
            is_good: true,
        }
    }
}

impl Collector for DrawGradCollector {
    fn register_draw(&mut self, state: &State, info: &SampleInfo) {
        self.draw.copy_from_slice(&state.q);
        self.grad.copy_from_slice(&state.grad);
        let idx = state.idx_in_trajectory;
        if info.divergence_info.is_some() {
            self.is_good = (idx <= -4) | (idx >= 4);
        } else {
            self.is_good = idx != 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn running_variance_matches_two_pass() {
        let values = [[1., 10.], [2., 14.], [4., 9.], [7., 11.]];
        let mut est = RunningVariance::new(2);
        assert!(est.current().is_none());
        for value in values.iter() {
            est.add_sample(value);
        }
        let var = est.current().unwrap();
        assert_eq!(est.count(), 4);
        // population variances
        assert_relative_eq!(var[0], 5.25, epsilon = 1e-12);
        assert_relative_eq!(var[1], 3.5, epsilon = 1e-12);
    }

    #[test]
    fn draw_grad_estimate() {
        let mut mass = DiagMassMatrix::new(2);
        mass.update_diag_draw_grad(&[4., 1.], &[0.25, 0.], (1e-10, 1e10));
        assert_relative_eq!(mass.variance[0], 4.);
        // invalid estimate keeps the old value
        assert_relative_eq!(mass.variance[1], 1.);

        let mut v = [0.; 2];
        mass.update_velocity(&[1., 2.], &mut v);
        assert_eq!(v, [4., 2.]);
        assert_relative_eq!(mass.kinetic_energy(&[1., 2.], &v), 4.);
    }

    #[test]
    fn grad_init_inverts_gradient() {
        let mut mass = DiagMassMatrix::new(3);
        mass.update_diag_grad(&[2., -0.5, 0.], 1., (1e-10, 1e10));
        assert_relative_eq!(mass.variance[0], 0.5);
        assert_relative_eq!(mass.variance[1], 2.);
        assert_relative_eq!(mass.variance[2], 1e10);
    }
}
