use std::fmt::Debug;

use rand::Rng;

use crate::{
    mass_matrix::DiagMassMatrix,
    math::{all_finite, axpy, axpy_out},
    nuts::{Collector, Direction, DivergenceInfo, LogpError, NullCollector, NutsError},
};

/// An unnormalized log density with gradient on an unconstrained space.
///
/// This is what a sampling backend evaluates. Models produce one by binding
/// themselves to data.
pub trait CpuLogpFunc {
    type LogpError: Debug + LogpError + 'static;

    fn dim(&self) -> usize;

    /// Compute the log density at `position` and write its gradient into `grad`.
    fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, Self::LogpError>;
}

/// A point in phase space.
#[derive(Debug, Clone)]
pub(crate) struct State {
    pub(crate) q: Box<[f64]>,
    pub(crate) p: Box<[f64]>,
    /// Velocity, the momentum scaled by the inverse mass matrix.
    pub(crate) v: Box<[f64]>,
    pub(crate) grad: Box<[f64]>,
    pub(crate) idx_in_trajectory: i64,
    pub(crate) kinetic_energy: f64,
    pub(crate) potential_energy: f64,
}

impl State {
    pub(crate) fn new(dim: usize) -> State {
        State {
            q: vec![0.; dim].into(),
            p: vec![0.; dim].into(),
            v: vec![0.; dim].into(),
            grad: vec![0.; dim].into(),
            idx_in_trajectory: 0,
            kinetic_energy: 0.,
            potential_energy: 0.,
        }
    }

    pub(crate) fn energy(&self) -> f64 {
        self.potential_energy + self.kinetic_energy
    }
}

pub(crate) struct EuclideanPotential<F: CpuLogpFunc> {
    logp: F,
    pub(crate) mass_matrix: DiagMassMatrix,
    max_energy_error: f64,
    pub(crate) step_size: f64,
}

impl<F: CpuLogpFunc> EuclideanPotential<F> {
    pub(crate) fn new(
        logp: F,
        mass_matrix: DiagMassMatrix,
        max_energy_error: f64,
        step_size: f64,
    ) -> Self {
        EuclideanPotential {
            logp,
            mass_matrix,
            max_energy_error,
            step_size,
        }
    }

    pub(crate) fn dim(&self) -> usize {
        self.logp.dim()
    }

    /// Evaluate the density at `position`. The momentum is left at zero and
    /// must be set with [`EuclideanPotential::randomize_momentum`].
    pub(crate) fn init_state(&mut self, position: &[f64]) -> Result<State, NutsError> {
        let mut state = State::new(self.dim());
        state.q.copy_from_slice(position);
        let logp = self
            .logp
            .logp(&state.q, &mut state.grad)
            .map_err(|err| NutsError::BadInitialPoint(err.to_string()))?;
        if !logp.is_finite() {
            return Err(NutsError::BadInitialPoint(format!("logp is {logp}")));
        }
        if !all_finite(&state.grad) {
            return Err(NutsError::BadInitialPoint(format!(
                "gradient is {:?}",
                state.grad
            )));
        }
        state.potential_energy = -logp;
        Ok(state)
    }

    pub(crate) fn randomize_momentum<R: Rng + ?Sized>(&self, state: &mut State, rng: &mut R) {
        self.mass_matrix.randomize_momentum(&mut state.p, rng);
        self.mass_matrix.update_velocity(&state.p, &mut state.v);
        state.kinetic_energy = self.mass_matrix.kinetic_energy(&state.p, &state.v);
        state.idx_in_trajectory = 0;
    }

    /// Perform one leapfrog step.
    ///
    /// Return either an unrecoverable error, a new state or a divergence.
    pub(crate) fn leapfrog<C: Collector>(
        &mut self,
        start: &State,
        dir: Direction,
        initial_energy: f64,
        collector: &mut C,
    ) -> Result<Result<State, DivergenceInfo>, NutsError> {
        let sign = match dir {
            Direction::Forward => 1,
            Direction::Backward => -1,
        };
        let epsilon = (sign as f64) * self.step_size;

        let mut out = start.clone();
        axpy_out(&start.grad, &start.p, epsilon / 2., &mut out.p);
        self.mass_matrix.update_velocity(&out.p, &mut out.v);
        axpy_out(&out.v, &start.q, epsilon, &mut out.q);

        match self.logp.logp(&out.q, &mut out.grad) {
            Ok(logp) => out.potential_energy = -logp,
            Err(logp_error) => {
                if !logp_error.is_recoverable() {
                    return Err(NutsError::LogpFailure(Box::new(logp_error)));
                }
                let div_info = DivergenceInfo {
                    start_location: Some(start.q.clone()),
                    end_location: None,
                    energy_error: None,
                    logp_function_error: Some(logp_error.to_string()),
                };
                collector.register_leapfrog(start, &out, Some(&div_info));
                return Ok(Err(div_info));
            }
        }

        axpy(&out.grad, &mut out.p, epsilon / 2.);
        self.mass_matrix.update_velocity(&out.p, &mut out.v);
        out.kinetic_energy = self.mass_matrix.kinetic_energy(&out.p, &out.v);
        out.idx_in_trajectory = start.idx_in_trajectory + sign;

        let energy_error = out.energy() - initial_energy;
        if (energy_error.abs() > self.max_energy_error) | !energy_error.is_finite() {
            let div_info = DivergenceInfo {
                start_location: Some(start.q.clone()),
                end_location: Some(out.q.clone()),
                energy_error: Some(energy_error),
                logp_function_error: None,
            };
            collector.register_leapfrog(start, &out, Some(&div_info));
            return Ok(Err(div_info));
        }

        collector.register_leapfrog(start, &out, None);
        Ok(Ok(out))
    }

    /// Acceptance probability of a single forward leapfrog step from `init`.
    fn probe_acceptance(&mut self, init: &State) -> f64 {
        let initial_energy = init.energy();
        match self.leapfrog(init, Direction::Forward, initial_energy, &mut NullCollector {}) {
            Ok(Ok(end)) => (initial_energy - end.energy()).min(0.).exp(),
            _ => 0.,
        }
    }

    /// Double or halve the step size until a single leapfrog step crosses an
    /// acceptance probability of one half.
    pub(crate) fn find_reasonable_step_size<R: Rng + ?Sized>(
        &mut self,
        state: &State,
        rng: &mut R,
        initial_step: f64,
    ) -> f64 {
        let mut init = state.clone();
        self.randomize_momentum(&mut init, rng);
        self.step_size = initial_step;

        let grow = self.probe_acceptance(&init) > 0.5;
        for _ in 0..100 {
            let factor = if grow { 2. } else { 0.5 };
            let candidate = self.step_size * factor;
            if !(1e-10..=1e5).contains(&candidate) {
                break;
            }
            self.step_size = candidate;
            let accept = self.probe_acceptance(&init);
            if grow != (accept > 0.5) {
                if grow {
                    self.step_size /= 2.;
                }
                break;
            }
        }
        self.step_size
    }
}

#[cfg(test)]
pub(crate) mod test_logps {
    use thiserror::Error;

    use super::CpuLogpFunc;
    use crate::nuts::LogpError;

    #[derive(Error, Debug)]
    pub(crate) enum NormalLogpError {}

    impl LogpError for NormalLogpError {
        fn is_recoverable(&self) -> bool {
            true
        }
    }

    /// Independent normals with unit variance around `mu`.
    pub(crate) struct NormalLogp {
        dim: usize,
        mu: f64,
    }

    impl NormalLogp {
        pub(crate) fn new(dim: usize, mu: f64) -> NormalLogp {
            NormalLogp { dim, mu }
        }
    }

    impl CpuLogpFunc for NormalLogp {
        type LogpError = NormalLogpError;

        fn dim(&self) -> usize {
            self.dim
        }

        fn logp(&mut self, position: &[f64], grad: &mut [f64]) -> Result<f64, NormalLogpError> {
            let n = position.len();
            assert!(grad.len() == n);

            let mut logp = 0f64;
            for (p, g) in position.iter().zip(grad.iter_mut()) {
                let val = *p - self.mu;
                logp -= val * val / 2.;
                *g = -val;
            }
            Ok(logp)
        }
    }
}
