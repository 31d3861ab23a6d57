use rand::{
    distr::{Distribution, StandardUniform},
    Rng,
};
use thiserror::Error;

use crate::{
    math::{axpy, axpy_out, logaddexp, vector_dot},
    potential::{CpuLogpFunc, EuclideanPotential, State},
};

#[derive(Error, Debug)]
pub enum NutsError {
    #[error("Logp function returned unrecoverable error")]
    LogpFailure(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Logp function is not finite at the initial point: {0}")]
    BadInitialPoint(String),
}

pub type Result<T> = std::result::Result<T, NutsError>;

/// Errors that happen when we evaluate the logp and gradient function
pub trait LogpError: std::error::Error + Send + Sync {
    /// Unrecoverable errors during logp computation stop sampling,
    /// recoverable errors are seen as divergences.
    fn is_recoverable(&self) -> bool;
}

/// Details about a divergent leapfrog step.
#[derive(Debug, Clone)]
pub struct DivergenceInfo {
    /// The position in parameter space where the diverging leapfrog started
    pub start_location: Option<Box<[f64]>>,
    /// The position in parameter space where the diverging leapfrog ended.
    ///
    /// Not available if the logp function failed at that point.
    pub end_location: Option<Box<[f64]>>,
    /// Energy difference between the start of the trajectory and the end of
    /// the diverging leapfrog.
    pub energy_error: Option<f64>,
    /// Message of the recoverable logp error that caused the divergence.
    pub logp_function_error: Option<String>,
}

#[derive(Debug, Copy, Clone)]
pub enum Direction {
    Forward,
    Backward,
}

impl Distribution<Direction> for StandardUniform {
    fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Direction {
        if rng.random::<bool>() {
            Direction::Forward
        } else {
            Direction::Backward
        }
    }
}

/// Callbacks for various events during a Nuts sampling step.
///
/// Collectors can compute statistics like the mean acceptance rate
/// or collect data for mass matrix adaptation.
pub(crate) trait Collector {
    fn register_leapfrog(
        &mut self,
        _start: &State,
        _end: &State,
        _divergence_info: Option<&DivergenceInfo>,
    ) {
    }
    fn register_draw(&mut self, _state: &State, _info: &SampleInfo) {}
    fn register_init(&mut self, _state: &State, _options: &NutsOptions) {}
}

pub(crate) struct NullCollector {}

impl Collector for NullCollector {}

/// Information about a draw
#[derive(Debug)]
pub struct SampleInfo {
    /// The depth of the trajectory that this point was sampled from
    pub depth: u64,

    /// More detailed information about a divergence that might have
    /// occured in the trajectory.
    pub divergence_info: Option<DivergenceInfo>,

    /// Whether the trajectory was terminated because it reached
    /// the maximum tree depth.
    pub reached_maxdepth: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct NutsOptions {
    pub maxdepth: u64,
}

/// A part of the trajectory tree during NUTS sampling.
struct NutsTree {
    /// The left position of the tree.
    ///
    /// The left side always has the smaller index_in_trajectory.
    /// Leapfrogs in backward direction will replace the left.
    left: State,
    right: State,

    /// A draw from the trajectory between left and right using
    /// multinomial sampling.
    draw: State,
    /// Sum of the momenta of all points in the tree.
    p_sum: Box<[f64]>,
    log_size: f64,
    depth: u64,
    initial_energy: f64,

    /// A tree is the main tree if it contains the initial point
    /// of the trajectory.
    is_main: bool,
}

enum ExtendResult {
    /// The tree extension succeeded properly, and the termination
    /// criterion was not reached.
    Ok(NutsTree),
    /// An unrecoverable error happend during a leapfrog step
    Err(NutsError),
    /// Tree extension succeeded and the termination criterion
    /// was reached.
    Turning(NutsTree),
    /// A divergence happend during tree extension.
    Diverging(NutsTree, DivergenceInfo),
}

fn is_turning(rho: &[f64], velocity_start: &[f64], velocity_end: &[f64]) -> bool {
    (vector_dot(rho, velocity_start) <= 0.) | (vector_dot(rho, velocity_end) <= 0.)
}

impl NutsTree {
    fn new(state: State) -> NutsTree {
        let initial_energy = state.energy();
        let p_sum = state.p.clone();
        NutsTree {
            right: state.clone(),
            left: state.clone(),
            draw: state,
            p_sum,
            depth: 0,
            log_size: 0.,
            initial_energy,
            is_main: true,
        }
    }

    /// Check the no-U-turn criterion for the union of `self` (on the left)
    /// and `right`, including the two checks across the seam.
    fn is_turning_with(&self, right: &NutsTree) -> bool {
        let left = self;
        let mut rho = vec![0f64; left.p_sum.len()];

        axpy_out(&left.p_sum, &right.p_sum, 1., &mut rho);
        if is_turning(&rho, &left.left.v, &right.right.v) {
            return true;
        }
        if left.depth == 0 {
            return false;
        }

        axpy_out(&left.p_sum, &right.left.p, 1., &mut rho);
        if is_turning(&rho, &left.left.v, &right.left.v) {
            return true;
        }

        axpy_out(&right.p_sum, &left.right.p, 1., &mut rho);
        is_turning(&rho, &left.right.v, &right.right.v)
    }

    fn extend<F, R, C>(
        mut self,
        rng: &mut R,
        potential: &mut EuclideanPotential<F>,
        direction: Direction,
        collector: &mut C,
    ) -> ExtendResult
    where
        F: CpuLogpFunc,
        R: Rng + ?Sized,
        C: Collector,
    {
        let mut other = match self.single_step(potential, direction, collector) {
            Ok(Ok(tree)) => tree,
            Ok(Err(info)) => return ExtendResult::Diverging(self, info),
            Err(err) => return ExtendResult::Err(err),
        };

        while other.depth < self.depth {
            other = match other.extend(rng, potential, direction, collector) {
                ExtendResult::Ok(tree) => tree,
                ExtendResult::Turning(_) => {
                    return ExtendResult::Turning(self);
                }
                ExtendResult::Diverging(_, info) => {
                    return ExtendResult::Diverging(self, info);
                }
                ExtendResult::Err(error) => {
                    return ExtendResult::Err(error);
                }
            };
        }

        let turning = match direction {
            Direction::Forward => self.is_turning_with(&other),
            Direction::Backward => other.is_turning_with(&self),
        };

        self.merge_into(other, rng, direction);

        if turning {
            ExtendResult::Turning(self)
        } else {
            ExtendResult::Ok(self)
        }
    }

    fn merge_into<R: Rng + ?Sized>(&mut self, other: NutsTree, rng: &mut R, direction: Direction) {
        assert!(self.depth == other.depth);
        assert!(self.left.idx_in_trajectory <= self.right.idx_in_trajectory);

        let NutsTree {
            left,
            right,
            draw,
            p_sum,
            log_size: other_log_size,
            ..
        } = other;

        match direction {
            Direction::Forward => {
                self.right = right;
            }
            Direction::Backward => {
                self.left = left;
            }
        }
        let log_size = logaddexp(self.log_size, other_log_size);

        // Biased progressive sampling on the main tree, uniform otherwise
        let self_log_size = if self.is_main {
            assert!(self.left.idx_in_trajectory <= 0);
            assert!(self.right.idx_in_trajectory >= 0);
            self.log_size
        } else {
            log_size
        };

        if other_log_size >= self_log_size
            || rng.random_bool((other_log_size - self_log_size).exp())
        {
            self.draw = draw;
        }

        axpy(&p_sum, &mut self.p_sum, 1.);
        self.depth += 1;
        self.log_size = log_size;
    }

    fn single_step<F: CpuLogpFunc, C: Collector>(
        &self,
        potential: &mut EuclideanPotential<F>,
        direction: Direction,
        collector: &mut C,
    ) -> Result<std::result::Result<NutsTree, DivergenceInfo>> {
        let start = match direction {
            Direction::Forward => &self.right,
            Direction::Backward => &self.left,
        };
        let end = match potential.leapfrog(start, direction, self.initial_energy, collector) {
            Ok(Ok(end)) => end,
            Ok(Err(info)) => return Ok(Err(info)),
            Err(error) => return Err(error),
        };

        let log_size = self.initial_energy - end.energy();
        Ok(Ok(NutsTree {
            p_sum: end.p.clone(),
            right: end.clone(),
            left: end.clone(),
            draw: end,
            depth: 0,
            log_size,
            initial_energy: self.initial_energy,
            is_main: false,
        }))
    }

    fn info(&self, maxdepth: bool, divergence_info: Option<DivergenceInfo>) -> SampleInfo {
        SampleInfo {
            depth: self.depth,
            divergence_info,
            reached_maxdepth: maxdepth,
        }
    }
}

/// Draw one point of a NUTS trajectory started at `init`.
pub(crate) fn draw<F, R, C>(
    init: &mut State,
    rng: &mut R,
    potential: &mut EuclideanPotential<F>,
    options: &NutsOptions,
    collector: &mut C,
) -> Result<(State, SampleInfo)>
where
    F: CpuLogpFunc,
    R: Rng + ?Sized,
    C: Collector,
{
    potential.randomize_momentum(init, rng);
    collector.register_init(init, options);

    let mut tree = NutsTree::new(init.clone());
    while tree.depth < options.maxdepth {
        let direction: Direction = rng.random();
        tree = match tree.extend(rng, potential, direction, collector) {
            ExtendResult::Ok(tree) => tree,
            ExtendResult::Turning(tree) => {
                let info = tree.info(false, None);
                collector.register_draw(&tree.draw, &info);
                return Ok((tree.draw, info));
            }
            ExtendResult::Diverging(tree, info) => {
                let info = tree.info(false, Some(info));
                collector.register_draw(&tree.draw, &info);
                return Ok((tree.draw, info));
            }
            ExtendResult::Err(error) => {
                return Err(error);
            }
        };
    }
    let info = tree.info(true, None);
    collector.register_draw(&tree.draw, &info);
    Ok((tree.draw, info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{mass_matrix::DiagMassMatrix, potential::test_logps::NormalLogp};
    use pretty_assertions::assert_eq;
    use rand::{rngs::StdRng, SeedableRng};

    fn run_draws(seed: u64, num: usize) -> Vec<Box<[f64]>> {
        let dim = 3;
        let func = NormalLogp::new(dim, 3.);
        let mut potential = EuclideanPotential::new(func, DiagMassMatrix::new(dim), 1000., 0.5);
        let mut state = potential.init_state(&[3.5; 3]).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let options = NutsOptions { maxdepth: 10 };

        (0..num)
            .map(|_| {
                let (next, _info) =
                    draw(&mut state, &mut rng, &mut potential, &options, &mut NullCollector {})
                        .unwrap();
                state = next;
                state.q.clone()
            })
            .collect()
    }

    #[test]
    fn deterministic() {
        assert_eq!(run_draws(42, 5), run_draws(42, 5));
    }

    #[test]
    fn moves_to_target() {
        let draws = run_draws(1, 2000);
        let mean = draws.iter().map(|draw| draw[0]).sum::<f64>() / draws.len() as f64;
        let var = draws
            .iter()
            .map(|draw| (draw[0] - mean) * (draw[0] - mean))
            .sum::<f64>()
            / draws.len() as f64;
        assert!((mean - 3.).abs() < 0.15, "mean = {mean}");
        assert!((var - 1.).abs() < 0.25, "var = {var}");
    }

    #[test]
    fn respects_maxdepth() {
        let func = NormalLogp::new(2, 0.);
        let mut potential = EuclideanPotential::new(func, DiagMassMatrix::new(2), 1000., 1e-4);
        let mut state = potential.init_state(&[0.1, -0.1]).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let options = NutsOptions { maxdepth: 3 };
        let (_, info) =
            draw(&mut state, &mut rng, &mut potential, &options, &mut NullCollector {}).unwrap();
        assert!(info.depth <= 3);
        assert!(info.reached_maxdepth);
    }
}
