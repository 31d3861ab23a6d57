use criterion::{black_box, criterion_group, criterion_main, Criterion};
use robust_regression::{
    inject_outliers, run_robust_regression, simulate, Covariance, CpuLogpFunc, Dataset, Model,
    Observation, RobustRegression, RunOptions,
};

fn make_data(n: usize) -> Dataset {
    let cov = Covariance::from_correlation(20., 40., -0.95);
    let data = simulate(n, &cov, Observation::new(10., 30.), 210191).unwrap();
    inject_outliers(
        data,
        &[
            (0, Observation::new(-20., -80.)),
            (1, Observation::new(20., 100.)),
            (2, Observation::new(40., 40.)),
        ],
    )
    .unwrap()
}

fn criterion_benchmark(c: &mut Criterion) {
    let model = RobustRegression::default();

    for n in [40, 1000] {
        let data = make_data(n);
        let mut logp = model.density(&data);
        let position = [30., -1.9, 2.5, 1.5];
        let mut grad = [0.; 4];
        c.bench_function(&format!("logp student-t {n}"), |b| {
            b.iter(|| logp.logp(black_box(&position), &mut grad).unwrap())
        });
    }

    let data = make_data(40);
    let options = RunOptions {
        iterations: 1000,
        warmup: Some(500),
        seed: 42,
        max_divergences: u64::MAX,
        ..Default::default()
    };
    let mut group = c.benchmark_group("fit");
    group.sample_size(10);
    group.bench_function("robust regression 40", |b| {
        b.iter(|| run_robust_regression(black_box(&data), options.clone()).unwrap())
    });
    group.finish();
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
