use std::mem::replace;

use rand::Rng;

use crate::{
    mass_matrix::{DiagAdaptSettings, DrawGradCollector, RunningVariance},
    nuts::{Collector, DivergenceInfo, NutsOptions, SampleInfo},
    potential::{CpuLogpFunc, EuclideanPotential, State},
    stepsize::{AcceptanceRateCollector, DualAverage, DualAverageSettings},
};

/// Settings for the warmup schedule of step size and mass matrix.
#[derive(Debug, Clone, Copy)]
pub struct AdaptOptions {
    pub dual_average: DualAverageSettings,
    pub mass_matrix: DiagAdaptSettings,
    /// Fraction of the warmup in which the mass matrix is updated after
    /// every draw from short estimation windows.
    pub early_window: f64,
    /// Fraction at the end of the warmup in which only the step size is adapted.
    pub step_size_window: f64,
    /// Length of the mass matrix estimation windows after the early phase.
    pub mass_matrix_switch_freq: u64,
    /// Length of the mass matrix estimation windows in the early phase.
    pub early_mass_matrix_switch_freq: u64,
}

impl Default for AdaptOptions {
    fn default() -> Self {
        Self {
            dual_average: DualAverageSettings::default(),
            mass_matrix: DiagAdaptSettings::default(),
            early_window: 0.3,
            step_size_window: 0.15,
            mass_matrix_switch_freq: 80,
            early_mass_matrix_switch_freq: 10,
        }
    }
}

pub(crate) struct CombinedCollector {
    pub(crate) accept: AcceptanceRateCollector,
    pub(crate) draws: DrawGradCollector,
}

impl Collector for CombinedCollector {
    fn register_leapfrog(
        &mut self,
        start: &State,
        end: &State,
        divergence_info: Option<&DivergenceInfo>,
    ) {
        self.accept.register_leapfrog(start, end, divergence_info);
        self.draws.register_leapfrog(start, end, divergence_info);
    }

    fn register_draw(&mut self, state: &State, info: &SampleInfo) {
        self.accept.register_draw(state, info);
        self.draws.register_draw(state, info);
    }

    fn register_init(&mut self, state: &State, options: &NutsOptions) {
        self.accept.register_init(state, options);
        self.draws.register_init(state, options);
    }
}

/// Joint adaptation of step size and diagonal mass matrix during warmup.
///
/// Variances are estimated in two overlapping windows. The background
/// window becomes the foreground estimate whenever it reaches the current
/// window length, so the mass matrix always reflects recent draws only.
pub(crate) struct GlobalStrategy {
    step_size: DualAverage,
    options: AdaptOptions,
    num_tune: u64,
    early_end: u64,
    final_window_start: u64,
    dim: usize,
    draw_var: RunningVariance,
    grad_var: RunningVariance,
    draw_var_bg: RunningVariance,
    grad_var_bg: RunningVariance,
}

impl GlobalStrategy {
    pub(crate) fn new(options: AdaptOptions, num_tune: u64, dim: usize) -> Self {
        let early_end = ((num_tune as f64) * options.early_window).ceil() as u64;
        let final_window_start =
            ((num_tune as f64) * (1f64 - options.step_size_window)).floor() as u64;
        Self {
            step_size: DualAverage::new(
                options.dual_average.params,
                options.dual_average.initial_step,
            ),
            options,
            num_tune,
            early_end: early_end.min(final_window_start),
            final_window_start,
            dim,
            draw_var: RunningVariance::new(dim),
            grad_var: RunningVariance::new(dim),
            draw_var_bg: RunningVariance::new(dim),
            grad_var_bg: RunningVariance::new(dim),
        }
    }

    pub(crate) fn init<F: CpuLogpFunc, R: Rng + ?Sized>(
        &mut self,
        potential: &mut EuclideanPotential<F>,
        state: &State,
        rng: &mut R,
    ) {
        self.draw_var = RunningVariance::new(self.dim);
        self.grad_var = RunningVariance::new(self.dim);
        self.draw_var_bg = RunningVariance::new(self.dim);
        self.grad_var_bg = RunningVariance::new(self.dim);

        let limits = self.options.mass_matrix.variance_limits;
        if self.options.mass_matrix.use_grad_based_estimate {
            potential
                .mass_matrix
                .update_diag_grad(&state.grad, 1f64, limits);
        }

        let initial_step = self.options.dual_average.initial_step;
        let step = potential.find_reasonable_step_size(state, rng, initial_step);
        self.step_size = DualAverage::new(self.options.dual_average.params, step);
        potential.step_size = step;
    }

    pub(crate) fn new_collector(&self) -> CombinedCollector {
        CombinedCollector {
            accept: AcceptanceRateCollector::new(),
            draws: DrawGradCollector::new(self.dim),
        }
    }

    pub(crate) fn is_tuning(&self, draw: u64) -> bool {
        draw < self.num_tune
    }

    fn update_mass_matrix<F: CpuLogpFunc>(&self, potential: &mut EuclideanPotential<F>) -> bool {
        let settings = self.options.mass_matrix;
        let Some(draw_var) = self.draw_var.current() else {
            return false;
        };
        if settings.use_grad_based_estimate {
            let Some(grad_var) = self.grad_var.current() else {
                return false;
            };
            potential
                .mass_matrix
                .update_diag_draw_grad(&draw_var, &grad_var, settings.variance_limits);
        } else {
            potential
                .mass_matrix
                .update_diag_draw(&draw_var, settings.variance_limits);
        }
        true
    }

    fn switch_window(&mut self) {
        self.draw_var = replace(&mut self.draw_var_bg, RunningVariance::new(self.dim));
        self.grad_var = replace(&mut self.grad_var_bg, RunningVariance::new(self.dim));
    }

    /// Update step size and mass matrix after draw number `draw`.
    pub(crate) fn adapt<F: CpuLogpFunc>(
        &mut self,
        potential: &mut EuclideanPotential<F>,
        draw: u64,
        collector: &CombinedCollector,
    ) {
        if draw >= self.num_tune {
            return;
        }

        let target = self.options.dual_average.target_accept;
        let accept = collector.accept.mean.current();
        let accept = if accept.is_finite() { accept } else { 0f64 };

        if draw < self.final_window_start {
            if collector.draws.is_good {
                self.draw_var.add_sample(&collector.draws.draw);
                self.grad_var.add_sample(&collector.draws.grad);
                self.draw_var_bg.add_sample(&collector.draws.draw);
                self.grad_var_bg.add_sample(&collector.draws.grad);
            }

            if draw < self.early_end {
                if self.draw_var_bg.count() >= self.options.early_mass_matrix_switch_freq {
                    self.switch_window();
                }
                if self.draw_var.count() >= 3 {
                    self.update_mass_matrix(potential);
                }
            } else if self.draw_var_bg.count() >= self.options.mass_matrix_switch_freq {
                self.switch_window();
                if self.update_mass_matrix(potential) {
                    let step = self.step_size.current_step_size_adapted();
                    self.step_size.reset(step, 10f64);
                }
            }

            self.step_size.advance(accept, target);
            potential.step_size = self.step_size.current_step_size();
            return;
        }

        if draw == self.final_window_start {
            self.update_mass_matrix(potential);
            let step = self.step_size.current_step_size_adapted();
            self.step_size.reset(step, 10f64);
        }

        self.step_size.advance(accept, target);
        if draw == self.num_tune - 1 {
            potential.step_size = self.step_size.current_step_size_adapted();
        } else {
            potential.step_size = self.step_size.current_step_size();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        mass_matrix::DiagMassMatrix,
        nuts::{draw, NutsOptions},
        potential::test_logps::NormalLogp,
    };
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn schedule_boundaries() {
        let strategy = GlobalStrategy::new(AdaptOptions::default(), 1000, 2);
        assert_eq!(strategy.early_end, 300);
        assert_eq!(strategy.final_window_start, 850);
        assert!(strategy.is_tuning(999));
        assert!(!strategy.is_tuning(1000));

        let strategy = GlobalStrategy::new(AdaptOptions::default(), 0, 2);
        assert!(!strategy.is_tuning(0));
    }

    #[test]
    fn adapts_to_unit_normal() {
        let dim = 3;
        let num_tune = 400;
        let mut potential =
            EuclideanPotential::new(NormalLogp::new(dim, 2.), DiagMassMatrix::new(dim), 1000., 1.);
        let mut strategy = GlobalStrategy::new(AdaptOptions::default(), num_tune, dim);
        let mut collector = strategy.new_collector();
        let mut rng = StdRng::seed_from_u64(17);
        let mut state = potential.init_state(&[0.5, 3., 1.]).unwrap();
        strategy.init(&mut potential, &state, &mut rng);

        let options = NutsOptions { maxdepth: 10 };
        for i in 0..num_tune {
            let (next, _) =
                draw(&mut state, &mut rng, &mut potential, &options, &mut collector).unwrap();
            state = next;
            strategy.adapt(&mut potential, i, &collector);
        }

        assert!(
            potential.step_size > 0.3 && potential.step_size < 2.5,
            "step size {}",
            potential.step_size
        );
        for &var in potential.mass_matrix.variance.iter() {
            assert!(var > 0.3 && var < 3., "variance {var}");
        }
    }
}
