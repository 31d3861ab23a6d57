//! Pooled posterior draws.

use std::collections::HashMap;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceError {
    #[error("{name} has {actual} draws, expected {expected}")]
    Misaligned {
        name: String,
        expected: usize,
        actual: usize,
    },
    #[error("{draws} draws cannot be split evenly into {chains} chains")]
    UnevenChains { draws: usize, chains: usize },
    #[error("parameter {0} appears more than once")]
    DuplicateName(String),
    #[error("a sample set needs at least one chain")]
    NoChains,
}

/// Per-chain sampler bookkeeping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChainStats {
    pub chain: u64,
    /// Number of divergent draws after warmup.
    pub divergences: u64,
    /// Positions (within the retained draws) of the divergent transitions.
    pub divergent_draws: Vec<usize>,
    /// Step size at the end of warmup.
    pub step_size: f64,
    pub mean_tree_depth: f64,
    /// Number of retained draws whose trajectory hit the maximum tree depth.
    pub maxdepth_reached: u64,
    /// Number of starting points tried before the log density was finite.
    pub init_attempts: u64,
}

/// Index-aligned draws for every parameter, pooled across chains.
///
/// Draws are stored chain-major: the first `draws_per_chain` values of each
/// column belong to chain 0, the next block to chain 1, and so on.
#[derive(Debug, Clone, PartialEq)]
pub struct PosteriorSamples {
    names: Vec<String>,
    index: HashMap<String, usize>,
    columns: Vec<Vec<f64>>,
    num_chains: usize,
    chain_stats: Vec<ChainStats>,
}

impl PosteriorSamples {
    pub fn new(
        names: Vec<String>,
        columns: Vec<Vec<f64>>,
        num_chains: usize,
    ) -> Result<Self, TraceError> {
        if num_chains == 0 {
            return Err(TraceError::NoChains);
        }
        let expected = columns.first().map(|col| col.len()).unwrap_or(0);
        if names.len() != columns.len() {
            return Err(TraceError::Misaligned {
                name: "<names>".to_string(),
                expected: columns.len(),
                actual: names.len(),
            });
        }
        for (name, column) in names.iter().zip(columns.iter()) {
            if column.len() != expected {
                return Err(TraceError::Misaligned {
                    name: name.clone(),
                    expected,
                    actual: column.len(),
                });
            }
        }
        if expected % num_chains != 0 {
            return Err(TraceError::UnevenChains {
                draws: expected,
                chains: num_chains,
            });
        }

        let mut index = HashMap::with_capacity(names.len());
        for (i, name) in names.iter().enumerate() {
            if index.insert(name.clone(), i).is_some() {
                return Err(TraceError::DuplicateName(name.clone()));
            }
        }

        Ok(Self {
            names,
            index,
            columns,
            num_chains,
            chain_stats: Vec::new(),
        })
    }

    pub fn with_chain_stats(mut self, stats: Vec<ChainStats>) -> Self {
        self.chain_stats = stats;
        self
    }

    /// All pooled draws of a parameter.
    pub fn get(&self, name: &str) -> Option<&[f64]> {
        self.index.get(name).map(|&i| self.columns[i].as_slice())
    }

    /// Draws of a parameter from a single chain.
    pub fn chain(&self, name: &str, chain: usize) -> Option<&[f64]> {
        if chain >= self.num_chains {
            return None;
        }
        let per_chain = self.draws_per_chain();
        self.get(name)
            .map(|draws| &draws[chain * per_chain..(chain + 1) * per_chain])
    }

    /// Per-chain slices of a parameter.
    pub fn chains(&self, name: &str) -> Option<Vec<&[f64]>> {
        let draws = self.get(name)?;
        let per_chain = self.draws_per_chain();
        if per_chain == 0 {
            return Some(vec![&draws[..0]; self.num_chains]);
        }
        Some(draws.chunks(per_chain).collect())
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Total number of pooled draws, `M`.
    pub fn num_draws(&self) -> usize {
        self.columns.first().map(|col| col.len()).unwrap_or(0)
    }

    pub fn num_chains(&self) -> usize {
        self.num_chains
    }

    pub fn draws_per_chain(&self) -> usize {
        self.num_draws() / self.num_chains
    }

    pub fn chain_stats(&self) -> &[ChainStats] {
        &self.chain_stats
    }

    pub fn total_divergences(&self) -> u64 {
        self.chain_stats.iter().map(|stats| stats.divergences).sum()
    }

    /// Values of all parameters at pooled draw `index`, in the order of
    /// [`PosteriorSamples::names`].
    pub fn draw(&self, index: usize) -> Option<Vec<f64>> {
        if index >= self.num_draws() {
            return None;
        }
        Some(self.columns.iter().map(|col| col[index]).collect())
    }

    /// Iterate over `(name, draws)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.names
            .iter()
            .zip(self.columns.iter())
            .map(|(name, col)| (name.as_str(), col.as_slice()))
    }
}
