//! Convergence diagnostics across chains.
//!
//! Both functions take one slice of draws per chain, all of equal length.
//! They are informational only: nothing in the crate rejects a sample set
//! because of them.

fn chain_mean(chain: &[f64]) -> f64 {
    chain.iter().sum::<f64>() / chain.len() as f64
}

fn sample_variance(values: &[f64], mean: f64) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    values
        .iter()
        .map(|value| (value - mean) * (value - mean))
        .sum::<f64>()
        / (values.len() - 1) as f64
}

/// Biased autocovariance at `lag`.
fn autocovariance(chain: &[f64], mean: f64, lag: usize) -> f64 {
    let n = chain.len();
    chain[..n - lag]
        .iter()
        .zip(&chain[lag..])
        .map(|(a, b)| (a - mean) * (b - mean))
        .sum::<f64>()
        / n as f64
}

fn equal_lengths(chains: &[&[f64]]) -> Option<usize> {
    let n = chains.first()?.len();
    chains.iter().all(|chain| chain.len() == n).then_some(n)
}

/// Potential scale reduction factor with every chain split in half.
///
/// Returns `NaN` with fewer than 4 draws per chain, and `1` when all draws
/// are identical.
pub fn split_rhat(chains: &[&[f64]]) -> f64 {
    let Some(n) = equal_lengths(chains) else {
        return f64::NAN;
    };
    if n < 4 {
        return f64::NAN;
    }

    let half = n / 2;
    let splits: Vec<&[f64]> = chains
        .iter()
        .flat_map(|chain| [&chain[..half], &chain[n - half..]])
        .collect();

    let m = splits.len();
    let means: Vec<f64> = splits.iter().map(|chain| chain_mean(chain)).collect();
    let within = splits
        .iter()
        .zip(&means)
        .map(|(chain, &mean)| sample_variance(chain, mean))
        .sum::<f64>()
        / m as f64;
    let grand_mean = means.iter().sum::<f64>() / m as f64;
    let between = half as f64
        * means
            .iter()
            .map(|mean| (mean - grand_mean) * (mean - grand_mean))
            .sum::<f64>()
        / (m - 1) as f64;

    if !(within.is_finite() && within > 0.0 && between.is_finite()) {
        return 1.0;
    }

    let n_f64 = half as f64;
    let var_plus = ((n_f64 - 1.0) / n_f64).mul_add(within, between / n_f64);
    (var_plus / within).sqrt().max(1.0)
}

/// Effective sample size of the pooled draws.
///
/// Autocorrelations are combined across chains and summed over Geyer's
/// initial monotone sequence of positive pairs. Returns `NaN` with fewer
/// than 4 draws per chain, and the number of draws when all draws are
/// identical.
pub fn effective_sample_size(chains: &[&[f64]]) -> f64 {
    let Some(n) = equal_lengths(chains) else {
        return f64::NAN;
    };
    if n < 4 {
        return f64::NAN;
    }
    let m = chains.len();
    let total = (m * n) as f64;

    let means: Vec<f64> = chains.iter().map(|chain| chain_mean(chain)).collect();
    let mean_autocov = |lag: usize| -> f64 {
        chains
            .iter()
            .zip(&means)
            .map(|(chain, &mean)| autocovariance(chain, mean, lag))
            .sum::<f64>()
            / m as f64
    };

    let n_f64 = n as f64;
    let within = mean_autocov(0) * n_f64 / (n_f64 - 1.0);
    let mut var_plus = within * (n_f64 - 1.0) / n_f64;
    if m > 1 {
        var_plus += sample_variance(&means, chain_mean(&means));
    }
    if !(var_plus.is_finite() && var_plus > 0.0) {
        return total;
    }

    let rho = |lag: usize| 1.0 - (within - mean_autocov(lag)) / var_plus;

    let mut tau = -1.0;
    let mut last_pair = f64::INFINITY;
    let mut lag = 0;
    while lag + 1 < n {
        let pair = rho(lag) + rho(lag + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(last_pair);
        tau += 2.0 * pair;
        last_pair = pair;
        lag += 2;
    }

    let tau = tau.max(1.0 / total.log10());
    total / tau
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};
    use rand_distr::StandardNormal;

    fn normal_chain(rng: &mut StdRng, n: usize, shift: f64) -> Vec<f64> {
        (0..n)
            .map(|_| shift + rng.sample::<f64, _>(StandardNormal))
            .collect()
    }

    #[test]
    fn independent_draws_have_full_ess() {
        let mut rng = StdRng::seed_from_u64(3);
        let a = normal_chain(&mut rng, 2000, 0.);
        let b = normal_chain(&mut rng, 2000, 0.);
        let ess = effective_sample_size(&[&a[..], &b[..]]);
        assert!(ess > 2800. && ess < 5500., "ess = {ess}");
        let rhat = split_rhat(&[&a[..], &b[..]]);
        assert!(rhat < 1.01, "rhat = {rhat}");
    }

    #[test]
    fn autocorrelated_draws_have_small_ess() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut value = 0f64;
        let chain: Vec<f64> = (0..4000)
            .map(|_| {
                value = 0.9 * value + rng.sample::<f64, _>(StandardNormal);
                value
            })
            .collect();
        let ess = effective_sample_size(&[&chain[..]]);
        // about 4000 * 0.1 / 1.9
        assert!(ess > 100. && ess < 400., "ess = {ess}");
    }

    #[test]
    fn separated_chains_have_large_rhat() {
        let mut rng = StdRng::seed_from_u64(1);
        let a = normal_chain(&mut rng, 500, 0.);
        let b = normal_chain(&mut rng, 500, 3.);
        assert!(split_rhat(&[&a[..], &b[..]]) > 1.5);
    }

    #[test]
    fn degenerate_inputs() {
        let constant = [2.; 10];
        assert_eq!(split_rhat(&[&constant[..]]), 1.);
        assert_eq!(effective_sample_size(&[&constant[..]]), 10.);
        assert!(split_rhat(&[&[1., 2., 3.][..]]).is_nan());
        assert!(effective_sample_size(&[&[1., 2.][..], &[1.][..]]).is_nan());
        assert!(split_rhat(&[]).is_nan());
    }
}
