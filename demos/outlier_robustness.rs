//! Fit correlated data before and after replacing three rows with outliers,
//! and compare least squares with the Student-t posterior.

use anyhow::Result;
use robust_regression::{
    inject_outliers, run_robust_regression, simulate, Covariance, Dataset, Observation,
    RunOptions, Threshold,
};

fn fit(label: &str, data: &Dataset) -> Result<()> {
    let options = RunOptions {
        iterations: 8000,
        warmup: Some(2000),
        chains: 2,
        seed: 210191,
        hpd_prob: 0.99,
        thresholds: vec![
            ("beta".to_string(), Threshold::AtLeast(0.)),
            ("nu".to_string(), Threshold::AtMost(10.)),
        ],
        max_divergences: 20,
        ..Default::default()
    };
    let fit = run_robust_regression(data, options)?;

    println!("== {label} ==");
    println!("{}", fit.report);
    println!("{}", fit.compare(data)?);
    Ok(())
}

fn main() -> Result<()> {
    let cov = Covariance::from_correlation(20., 40., -0.95);
    let clean = simulate(40, &cov, Observation::new(10., 30.), 210191)?;
    fit("clean data", &clean)?;

    let noisy = inject_outliers(
        clean,
        &[
            (0, Observation::new(-20., -80.)),
            (1, Observation::new(20., 100.)),
            (2, Observation::new(40., 40.)),
        ],
    )?;
    fit("three outliers", &noisy)?;
    Ok(())
}
