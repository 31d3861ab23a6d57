use rand::Rng;

use crate::{
    adapt_strategy::{CombinedCollector, GlobalStrategy},
    mass_matrix::DiagMassMatrix,
    nuts::{draw, DivergenceInfo, NutsError, NutsOptions, SampleInfo},
    potential::{CpuLogpFunc, EuclideanPotential, State},
    sampler::NutsSettings,
};

/// Per-draw information about the progress of a chain.
#[derive(Debug, Clone)]
pub(crate) struct Progress {
    /// Index of the draw in the chain, warmup included
    pub draw: u64,
    pub chain: u64,
    pub diverging: bool,
    pub tuning: bool,
    pub depth: u64,
    pub reached_maxdepth: bool,
}

/// A single adaptive NUTS chain.
pub(crate) struct NutsChain<F: CpuLogpFunc, R: Rng> {
    potential: EuclideanPotential<F>,
    collector: CombinedCollector,
    options: NutsOptions,
    rng: R,
    state: State,
    last_info: Option<SampleInfo>,
    chain: u64,
    draw_count: u64,
    strategy: GlobalStrategy,
}

impl<F: CpuLogpFunc, R: Rng> NutsChain<F, R> {
    pub(crate) fn new(logp: F, settings: &NutsSettings, num_tune: u64, rng: R, chain: u64) -> Self {
        let dim = logp.dim();
        let potential = EuclideanPotential::new(
            logp,
            DiagMassMatrix::new(dim),
            settings.max_energy_error,
            settings.adapt_options.dual_average.initial_step,
        );
        let strategy = GlobalStrategy::new(settings.adapt_options, num_tune, dim);
        let collector = strategy.new_collector();
        NutsChain {
            potential,
            collector,
            options: NutsOptions {
                maxdepth: settings.maxdepth,
            },
            rng,
            state: State::new(dim),
            last_info: None,
            chain,
            draw_count: 0,
            strategy,
        }
    }

    /// Initialize the sampler to a position. This should be called
    /// before calling draw.
    ///
    /// This fails if the logp function returns an error or a non-finite
    /// value at `position`.
    pub(crate) fn set_position(&mut self, position: &[f64]) -> Result<(), NutsError> {
        let state = self.potential.init_state(position)?;
        self.strategy
            .init(&mut self.potential, &state, &mut self.rng);
        self.state = state;
        Ok(())
    }

    /// Draw a new sample and return the position and some diagnostic information.
    pub(crate) fn draw(&mut self) -> Result<(Box<[f64]>, Progress), NutsError> {
        let tuning = self.strategy.is_tuning(self.draw_count);
        let (state, info) = draw(
            &mut self.state,
            &mut self.rng,
            &mut self.potential,
            &self.options,
            &mut self.collector,
        )?;
        let position = state.q.clone();

        self.strategy
            .adapt(&mut self.potential, self.draw_count, &self.collector);

        let progress = Progress {
            draw: self.draw_count,
            chain: self.chain,
            diverging: info.divergence_info.is_some(),
            tuning,
            depth: info.depth,
            reached_maxdepth: info.reached_maxdepth,
        };

        self.draw_count += 1;
        self.state = state;
        self.last_info = Some(info);
        Ok((position, progress))
    }

    /// Details of the last draw, if it diverged.
    pub(crate) fn last_divergence(&self) -> Option<&DivergenceInfo> {
        self.last_info
            .as_ref()
            .and_then(|info| info.divergence_info.as_ref())
    }

    pub(crate) fn rng(&mut self) -> &mut R {
        &mut self.rng
    }

    pub(crate) fn step_size(&self) -> f64 {
        self.potential.step_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::potential::test_logps::NormalLogp;
    use rand::{rngs::SmallRng, SeedableRng};

    #[test]
    fn chain_tunes_then_samples() {
        let settings = NutsSettings::default();
        let rng = SmallRng::seed_from_u64(9);
        let mut chain = NutsChain::new(NormalLogp::new(2, -1.), &settings, 200, rng, 3);
        chain.set_position(&[0., 0.]).unwrap();

        let mut sum = 0f64;
        let mut count = 0;
        for i in 0..1200 {
            let (position, progress) = chain.draw().unwrap();
            assert_eq!(progress.draw, i);
            assert_eq!(progress.chain, 3);
            assert_eq!(progress.tuning, i < 200);
            if !progress.tuning {
                sum += position[1];
                count += 1;
            }
        }
        let mean = sum / count as f64;
        assert!((mean + 1.).abs() < 0.2, "mean = {mean}");
        assert!(chain.step_size() > 0.1);
    }

    #[test]
    fn rejects_bad_initial_point() {
        let settings = NutsSettings::default();
        let rng = SmallRng::seed_from_u64(0);
        let mut chain = NutsChain::new(NormalLogp::new(2, 0.), &settings, 10, rng, 0);
        let err = chain.set_position(&[f64::NAN, 0.]).unwrap_err();
        assert!(matches!(err, NutsError::BadInitialPoint(_)));
    }
}
