use crate::{
    nuts::{Collector, DivergenceInfo, NutsOptions},
    potential::State,
};

/// Parameters of the dual averaging step size adaptation.
#[derive(Debug, Clone, Copy)]
pub struct DualAverageOptions {
    pub k: f64,
    pub t0: f64,
    pub gamma: f64,
}

impl Default for DualAverageOptions {
    fn default() -> DualAverageOptions {
        DualAverageOptions {
            k: 0.75,
            t0: 10.,
            gamma: 0.05,
        }
    }
}

/// Settings for step size adaptation
#[derive(Debug, Clone, Copy)]
pub struct DualAverageSettings {
    pub target_accept: f64,
    /// Starting point for the step size search at the initial position.
    pub initial_step: f64,
    pub params: DualAverageOptions,
}

impl Default for DualAverageSettings {
    fn default() -> Self {
        Self {
            target_accept: 0.8,
            initial_step: 0.1,
            params: DualAverageOptions::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) struct DualAverage {
    log_step: f64,
    log_step_adapted: f64,
    hbar: f64,
    mu: f64,
    count: u64,
    settings: DualAverageOptions,
}

impl DualAverage {
    pub(crate) fn new(settings: DualAverageOptions, initial_step: f64) -> DualAverage {
        DualAverage {
            log_step: initial_step.ln(),
            log_step_adapted: initial_step.ln(),
            hbar: 0.,
            mu: (10. * initial_step).ln(),
            count: 1,
            settings,
        }
    }

    pub(crate) fn advance(&mut self, accept_stat: f64, target: f64) {
        let w = 1. / (self.count as f64 + self.settings.t0);
        self.hbar = (1. - w) * self.hbar + w * (target - accept_stat);
        self.log_step = self.mu - self.hbar * (self.count as f64).sqrt() / self.settings.gamma;
        let mk = (self.count as f64).powf(-self.settings.k);
        self.log_step_adapted = mk * self.log_step + (1. - mk) * self.log_step_adapted;
        self.count += 1;
    }

    pub(crate) fn current_step_size(&self) -> f64 {
        self.log_step.exp()
    }

    pub(crate) fn current_step_size_adapted(&self) -> f64 {
        self.log_step_adapted.exp()
    }

    pub(crate) fn reset(&mut self, initial_step: f64, bias_factor: f64) {
        self.log_step = initial_step.ln();
        self.log_step_adapted = initial_step.ln();
        self.hbar = 0f64;
        self.mu = (bias_factor * initial_step).ln();
        self.count = 1;
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct RunningMean {
    sum: f64,
    count: u64,
}

impl RunningMean {
    fn add(&mut self, value: f64) {
        self.sum += value;
        self.count += 1;
    }

    pub(crate) fn current(&self) -> f64 {
        self.sum / self.count as f64
    }

    pub(crate) fn reset(&mut self) {
        self.sum = 0f64;
        self.count = 0;
    }
}

/// Mean Metropolis acceptance probability over the leapfrog steps of a
/// trajectory.
pub(crate) struct AcceptanceRateCollector {
    initial_energy: f64,
    pub(crate) mean: RunningMean,
}

impl AcceptanceRateCollector {
    pub(crate) fn new() -> AcceptanceRateCollector {
        AcceptanceRateCollector {
            initial_energy: 0.,
            mean: RunningMean::default(),
        }
    }
}

impl Collector for AcceptanceRateCollector {
    fn register_leapfrog(
        &mut self,
        _start: &State,
        end: &State,
        divergence_info: Option<&DivergenceInfo>,
    ) {
        match divergence_info {
            Some(_) => self.mean.add(0.),
            None => self
                .mean
                .add((self.initial_energy - end.energy()).min(0.).exp()),
        }
    }

    fn register_init(&mut self, state: &State, _options: &NutsOptions) {
        self.initial_energy = state.energy();
        self.mean.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dual_average_shrinks_on_low_acceptance() {
        let mut adapt = DualAverage::new(DualAverageOptions::default(), 1.);
        for _ in 0..50 {
            adapt.advance(0.1, 0.8);
        }
        assert!(adapt.current_step_size() < 1.);
        assert!(adapt.current_step_size_adapted() < 1.);
    }

    #[test]
    fn dual_average_grows_on_high_acceptance() {
        let mut adapt = DualAverage::new(DualAverageOptions::default(), 0.01);
        for _ in 0..50 {
            adapt.advance(1., 0.8);
        }
        assert!(adapt.current_step_size_adapted() > 0.01);
    }

    #[test]
    fn reset_restarts_at_new_step() {
        let mut adapt = DualAverage::new(DualAverageOptions::default(), 1.);
        adapt.advance(0.2, 0.8);
        adapt.reset(0.3, 10.);
        assert_relative_eq!(adapt.current_step_size(), 0.3);
        assert_relative_eq!(adapt.current_step_size_adapted(), 0.3);
    }

    #[test]
    fn running_mean() {
        let mut mean = RunningMean::default();
        mean.add(1.);
        mean.add(0.5);
        assert_relative_eq!(mean.current(), 0.75);
        mean.reset();
        assert!(mean.current().is_nan());
    }
}
