use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use log::{debug, info, warn};
use rand::{rngs::SmallRng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::{
    iter::{IntoParallelIterator, ParallelIterator},
    ThreadPoolBuilder,
};
use thiserror::Error;

use crate::{
    adapt_strategy::AdaptOptions,
    chain::NutsChain,
    data::Dataset,
    model::{InitValues, Model, ModelError},
    nuts::NutsError,
    trace::{ChainStats, PosteriorSamples, TraceError},
};

#[derive(Error, Debug)]
pub enum SamplerError {
    #[error("invalid sampler settings: {0}")]
    InvalidSettings(String),
    #[error("chain {chain} could not be initialized after {attempts} attempts: {reason}")]
    InitializationFailed {
        chain: u64,
        attempts: u64,
        reason: String,
    },
    #[error(transparent)]
    Nuts(#[from] NutsError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("sampling was cancelled")]
    Cancelled,
    #[error("could not start thread pool")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Settings for the NUTS backend
#[derive(Debug, Clone, Copy)]
pub struct NutsSettings {
    /// The maximum tree depth during sampling.
    pub maxdepth: u64,
    /// Energy errors above this are counted as divergences.
    pub max_energy_error: f64,
    pub adapt_options: AdaptOptions,
    /// Random starting points to try per chain before giving up.
    pub init_attempts: u64,
    /// Worker threads for the chains. Defaults to one per chain.
    pub num_threads: Option<usize>,
}

impl Default for NutsSettings {
    fn default() -> Self {
        Self {
            maxdepth: 10,
            max_energy_error: 1000f64,
            adapt_options: AdaptOptions::default(),
            init_attempts: 100,
            num_threads: None,
        }
    }
}

/// What to sample: chain layout, seed and optional extras.
#[derive(Debug, Clone)]
pub struct SampleRequest {
    pub seed: u64,
    /// Draws per chain, warmup included.
    pub iterations: u64,
    /// Leading draws per chain used for tuning and discarded.
    pub warmup: u64,
    pub chains: usize,
    pub init: Option<InitValues>,
    /// Draw the model's posterior predictive quantities at every retained draw.
    pub posterior_predictive: bool,
    /// Raise the flag to stop all chains. No partial results are returned.
    pub cancel: Option<Arc<AtomicBool>>,
}

impl SampleRequest {
    pub fn new(iterations: u64, warmup: u64) -> Self {
        Self {
            seed: 0,
            iterations,
            warmup,
            chains: 1,
            init: None,
            posterior_predictive: false,
            cancel: None,
        }
    }

    pub fn draws_per_chain(&self) -> u64 {
        self.iterations.saturating_sub(self.warmup)
    }

    pub fn validate(&self) -> Result<(), SamplerError> {
        if self.chains == 0 {
            return Err(SamplerError::InvalidSettings(
                "at least one chain is required".to_string(),
            ));
        }
        if self.warmup >= self.iterations {
            return Err(SamplerError::InvalidSettings(format!(
                "warmup ({}) must be smaller than iterations ({})",
                self.warmup, self.iterations
            )));
        }
        Ok(())
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// A backend that draws from the posterior of a [`Model`].
///
/// The returned set holds `chains * (iterations - warmup)` draws for every
/// parameter, pooled chain-major. Draws are returned as they are, without
/// checking convergence.
pub trait PosteriorSampler {
    fn sample<M: Model>(
        &self,
        model: &M,
        data: &Dataset,
        request: &SampleRequest,
    ) -> Result<PosteriorSamples, SamplerError>;
}

/// Adaptive No-U-Turn sampler with a diagonal mass matrix.
#[derive(Debug, Clone, Copy, Default)]
pub struct NutsSampler {
    pub settings: NutsSettings,
}

impl NutsSampler {
    pub fn new(settings: NutsSettings) -> Self {
        Self { settings }
    }

    fn validate(&self) -> Result<(), SamplerError> {
        let settings = &self.settings;
        if settings.maxdepth == 0 {
            return Err(SamplerError::InvalidSettings(
                "maxdepth must be positive".to_string(),
            ));
        }
        if settings.init_attempts == 0 {
            return Err(SamplerError::InvalidSettings(
                "init_attempts must be positive".to_string(),
            ));
        }
        if !(settings.max_energy_error > 0f64) {
            return Err(SamplerError::InvalidSettings(format!(
                "max_energy_error must be positive, got {}",
                settings.max_energy_error
            )));
        }
        let target = settings.adapt_options.dual_average.target_accept;
        if !((0f64 < target) & (target < 1f64)) {
            return Err(SamplerError::InvalidSettings(format!(
                "target_accept must lie in (0, 1), got {target}"
            )));
        }
        if settings.num_threads == Some(0) {
            return Err(SamplerError::InvalidSettings(
                "num_threads must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn run_chain<M: Model>(
        &self,
        model: &M,
        data: &Dataset,
        request: &SampleRequest,
        chain: u64,
    ) -> Result<ChainOutput, SamplerError> {
        let mut seed_rng = ChaCha8Rng::seed_from_u64(request.seed);
        seed_rng.set_stream(chain);
        let rng = SmallRng::from_rng(&mut seed_rng);

        let mut sampler = NutsChain::new(
            model.density(data),
            &self.settings,
            request.warmup,
            rng,
            chain,
        );

        let dim = model.dim();
        let param_names = model.param_names();
        let fixed_init = request.init.as_ref().is_some_and(|init| {
            param_names.iter().all(|name| init.get(name).is_some())
        });
        let max_attempts = if fixed_init {
            1
        } else {
            self.settings.init_attempts
        };

        let mut position = vec![0f64; dim];
        let mut attempts = 0;
        loop {
            attempts += 1;
            model.init_position(sampler.rng(), request.init.as_ref(), &mut position)?;
            match sampler.set_position(&position) {
                Ok(()) => break,
                Err(NutsError::BadInitialPoint(reason)) => {
                    debug!("chain {chain}: rejected initial point {position:?}: {reason}");
                    if attempts >= max_attempts {
                        return Err(SamplerError::InitializationFailed {
                            chain,
                            attempts,
                            reason,
                        });
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }

        let width = dim + if request.posterior_predictive {
            data.len()
        } else {
            0
        };
        let num_draws = request.draws_per_chain() as usize;
        let mut draws = Vec::with_capacity(num_draws * width);
        let mut constrained = vec![0f64; dim];
        let mut predictive = Vec::with_capacity(data.len());
        let mut stats = ChainStats {
            chain,
            init_attempts: attempts,
            ..Default::default()
        };
        let mut depth_sum = 0u64;

        for _ in 0..request.iterations {
            if request.is_cancelled() {
                debug!("chain {chain}: cancelled");
                return Err(SamplerError::Cancelled);
            }
            let (position, progress) = sampler.draw()?;
            if progress.tuning {
                continue;
            }

            let index = (progress.draw - request.warmup) as usize;
            if progress.diverging {
                stats.divergences += 1;
                stats.divergent_draws.push(index);
                if let Some(info) = sampler.last_divergence() {
                    debug!(
                        "chain {}: divergence at draw {index}, energy error {:?}, {:?}",
                        progress.chain, info.energy_error, info.logp_function_error
                    );
                }
            }
            depth_sum += progress.depth;
            if progress.reached_maxdepth {
                stats.maxdepth_reached += 1;
            }

            model.constrain(&position, &mut constrained);
            draws.extend_from_slice(&constrained);
            if request.posterior_predictive {
                model.draw_predictive(sampler.rng(), data, &constrained, &mut predictive)?;
                draws.extend_from_slice(&predictive);
            }
        }

        stats.step_size = sampler.step_size();
        stats.mean_tree_depth = depth_sum as f64 / num_draws as f64;
        info!(
            "chain {chain}: finished with step size {:.3}, mean tree depth {:.2}, {} divergences",
            stats.step_size, stats.mean_tree_depth, stats.divergences
        );
        if stats.maxdepth_reached > 0 {
            warn!(
                "chain {chain}: {} draws reached the maximum tree depth",
                stats.maxdepth_reached
            );
        }

        Ok(ChainOutput {
            draws,
            width,
            stats,
        })
    }
}

/// Retained draws of one chain, one row of `width` values per draw.
struct ChainOutput {
    draws: Vec<f64>,
    width: usize,
    stats: ChainStats,
}

impl PosteriorSampler for NutsSampler {
    fn sample<M: Model>(
        &self,
        model: &M,
        data: &Dataset,
        request: &SampleRequest,
    ) -> Result<PosteriorSamples, SamplerError> {
        request.validate()?;
        self.validate()?;

        let mut names = model.param_names();
        if request.posterior_predictive {
            names.extend(model.predictive_names(data));
        }

        info!(
            "sampling {} chains with {} warmup and {} retained draws each",
            request.chains,
            request.warmup,
            request.draws_per_chain()
        );

        let pool = ThreadPoolBuilder::new()
            .num_threads(self.settings.num_threads.unwrap_or(request.chains))
            .thread_name(|i| format!("nuts-chain-{i}"))
            .build()?;

        let outputs = pool.install(|| {
            (0..request.chains as u64)
                .into_par_iter()
                .map(|chain| self.run_chain(model, data, request, chain))
                .collect::<Result<Vec<_>, _>>()
        });
        let outputs = match outputs {
            Ok(outputs) => outputs,
            Err(SamplerError::Cancelled) => {
                info!("sampling cancelled, all draws discarded");
                return Err(SamplerError::Cancelled);
            }
            Err(err) => return Err(err),
        };

        let total = request.chains * request.draws_per_chain() as usize;
        let mut columns: Vec<Vec<f64>> = names.iter().map(|_| Vec::with_capacity(total)).collect();
        let mut stats = Vec::with_capacity(outputs.len());
        for output in outputs {
            for row in output.draws.chunks_exact(output.width) {
                for (column, &value) in columns.iter_mut().zip(row) {
                    column.push(value);
                }
            }
            stats.push(output.stats);
        }

        let samples = PosteriorSamples::new(names, columns, request.chains)?.with_chain_stats(stats);
        if samples.total_divergences() > 0 {
            warn!(
                "{} divergent transitions after warmup",
                samples.total_divergences()
            );
        }
        Ok(samples)
    }
}
